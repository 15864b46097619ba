//! Engine-wide error handling.
//!
//! Construction-time failures (bad grid parameters, GPU device loss) are
//! fatal and propagate; per-frame recoverable failures (model inference,
//! readback mapping) are logged at the call site and skipped.

use thiserror::Error;

/// Engine-wide result type
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid grid parameters: {reason}")]
    InvalidGrid { reason: String },

    #[error("gpu operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("failed to map GPU buffer '{buffer}': {error}")]
    BufferMapping { buffer: String, error: String },

    #[error("model inference failed: {reason}")]
    ModelInference { reason: String },

    #[error("{component}: {error}")]
    SystemError { component: String, error: String },
}

/// Helper trait attaching terrain-subsystem context to foreign errors.
pub trait TerrainErrorContext<T> {
    fn terrain_context(self, context: &str) -> EngineResult<T>;
}

impl<T, E> TerrainErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn terrain_context(self, context: &str) -> EngineResult<T> {
        self.map_err(|e| EngineError::SystemError {
            component: "terrain".to_string(),
            error: format!("{}: {}", context, e),
        })
    }
}

impl<T> TerrainErrorContext<T> for Option<T> {
    fn terrain_context(self, context: &str) -> EngineResult<T> {
        self.ok_or_else(|| EngineError::SystemError {
            component: "terrain".to_string(),
            error: context.to_string(),
        })
    }
}
