//! Geometry export and case generation in isolated worker processes.

pub mod domain;
pub mod export;
pub mod job;
pub mod workers;

pub use domain::{CaseGenerator, CaseOverrides, CaseRequest, GenerationOutput};
pub use workers::ProcessCaseGenerator;
