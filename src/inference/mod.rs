//! Model selection, the prediction gate, and runner-hosted models.

pub mod domain;
pub mod runner;
pub mod service;

pub use domain::{ModelFamily, ModelSelector, PredictionResult, SurrogateModel};
pub use service::{ModelRegistry, PredictionGate};
