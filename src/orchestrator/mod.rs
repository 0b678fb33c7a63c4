//! Per-request state machine tying the stages together.

pub mod domain;
pub mod service;

pub use domain::{Predict2dInput, PredictFixedInput, PredictRequest, RequestState};
pub use service::{Orchestrator, PipelineSettings};
