//! Alert rule storage adapters.

mod memory;

pub use memory::InMemoryAlertStore;
