//! HTTP/REST API adapter.
//!
//! Client-facing JSON and Server-Sent Events endpoints over the engine.
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | POST | `/v1/subscriptions` | subscribe |
//! | DELETE | `/v1/subscriptions` | unsubscribe |
//! | DELETE | `/v1/subscriptions/all` | unsubscribe from everything |
//! | GET | `/v1/snapshot?tickers=A,B` | pull snapshot |
//! | GET | `/v1/stream?tickers=A,B` | push stream (SSE) |
//! | POST | `/v1/alerts` | create alert rule |
//! | GET | `/v1/alerts` | list own rules |
//! | DELETE | `/v1/alerts/{id}` | delete own rule |

mod controller;
mod request;
mod response;
mod server;

pub use controller::{ApiState, ClientToken, create_router};
pub use request::*;
pub use response::*;
pub use server::{ApiServer, ApiServerError};
