//! Error handling primitives shared across the core.
//!
//! Every stage reports a `FlowError`; the orchestrator logs the detail and the
//! HTTP boundary only ever sees the numeric `FlowCode`.

use thiserror::Error;

/// Stable error codes that cross the HTTP boundary.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlowCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Identifier already owns an in-flight working area.
    SessionConflict = 1,
    /// Export, case generation, or the worker process failed or timed out.
    GenerationFailed = 2,
    /// Generated case was missing files or violated the point bounds.
    LoadError = 3,
    /// Selector is not a known model or its instance is not loaded.
    UnknownModel = 4,
    /// Model runtime failure.
    InferenceFailed = 5,
    /// Denormalization or interpolation failure.
    TransformError = 6,
    /// Request failed validation.
    InvalidRequest = 7,
    /// Catch-all for IO and configuration problems.
    Internal = 8,
}

/// Canonical error type for the core.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FlowError {
    #[error("session conflict: {0}")]
    SessionConflict(String),

    #[error("case generation failed: {0}")]
    GenerationFailed(String),

    #[error("dataset load failed: {0}")]
    LoadError(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("result transform failed: {0}")]
    TransformError(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    /// Machine parsable code for this error.
    pub fn code(&self) -> FlowCode {
        match self {
            FlowError::SessionConflict(_) => FlowCode::SessionConflict,
            FlowError::GenerationFailed(_) => FlowCode::GenerationFailed,
            FlowError::LoadError(_) => FlowCode::LoadError,
            FlowError::UnknownModel(_) => FlowCode::UnknownModel,
            FlowError::InferenceFailed(_) => FlowCode::InferenceFailed,
            FlowError::TransformError(_) => FlowCode::TransformError,
            FlowError::InvalidRequest(_) => FlowCode::InvalidRequest,
            FlowError::Internal(_) => FlowCode::Internal,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        FlowError::SessionConflict(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        FlowError::GenerationFailed(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        FlowError::LoadError(msg.into())
    }

    pub fn unknown_model(msg: impl Into<String>) -> Self {
        FlowError::UnknownModel(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        FlowError::InferenceFailed(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        FlowError::TransformError(msg.into())
    }

    /// Validation helper.
    pub fn invalid(msg: impl Into<String>) -> Self {
        FlowError::InvalidRequest(msg.into())
    }

    /// Internal error helper.
    pub fn internal(msg: impl Into<String>) -> Self {
        FlowError::Internal(msg.into())
    }

    /// IO error helper, prefixed with what was being touched.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        FlowError::Internal(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FlowCode::Ok as u32, 0);
        assert_eq!(FlowCode::SessionConflict as u32, 1);
        assert_eq!(FlowCode::GenerationFailed as u32, 2);
        assert_eq!(FlowCode::LoadError as u32, 3);
        assert_eq!(FlowCode::UnknownModel as u32, 4);
        assert_eq!(FlowCode::InferenceFailed as u32, 5);
        assert_eq!(FlowCode::TransformError as u32, 6);
        assert_eq!(FlowCode::InvalidRequest as u32, 7);
        assert_eq!(FlowCode::Internal as u32, 8);
    }

    #[test]
    fn variants_map_to_their_codes() {
        assert_eq!(FlowError::conflict("a1").code(), FlowCode::SessionConflict);
        assert_eq!(FlowError::generation("x").code(), FlowCode::GenerationFailed);
        assert_eq!(FlowError::unknown_model("x").code(), FlowCode::UnknownModel);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = FlowError::io("mkdir", io);
        assert_eq!(err.code(), FlowCode::Internal);
        assert!(err.to_string().contains("mkdir: boom"));
    }
}
