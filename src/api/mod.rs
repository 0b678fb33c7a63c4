//! Inbound interfaces of the service.

pub mod http;

pub use http::{router, AppState};
