//! Session domain: per-request working areas on disk.
//!
//! An area is created when a request starts and removed as soon as its case
//! has been read into memory, or on the first failure.

pub mod domain;
pub mod repo_fs;

pub use domain::{AreaState, WorkingArea};
pub use repo_fs::FsSessionStore;
