// lib.rs - prediction service core
pub mod api;
pub mod casegen;
pub mod common;
pub mod data;
pub mod inference;
pub mod orchestrator;
pub mod session;
pub mod transform;

pub use orchestrator::{Orchestrator, PipelineSettings, PredictRequest};
