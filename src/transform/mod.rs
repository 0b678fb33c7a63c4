//! Model output to presentation payloads: denormalization, derived fields,
//! and resampling onto a regular grid.

pub mod domain;
pub mod interp;
pub mod service;

pub use domain::{PredictionResponse, Response2d};
pub use service::build_response;
