//! Upstream quote provider adapters.

mod http;

pub use http::HttpQuoteProvider;
