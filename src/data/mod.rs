//! Generated-case reading and dataset assembly.

pub mod domain;
pub mod repo_fs;
pub mod service;

pub use domain::{Dataset, FamilyMetadata, Field, FieldMap, MetadataCatalog, SampleBounds};
pub use service::{load_dataset, DEFAULT_SEED};
