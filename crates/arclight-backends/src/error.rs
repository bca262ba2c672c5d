//! Backend error types

use crate::backend::types::{BufferHandle, KernelHandle, MarkerHandle, QueueHandle};
use arclight_codegen::CodegenError;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by backend implementations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown buffer handle {0}")]
    UnknownBuffer(BufferHandle),

    #[error("unknown kernel handle {0}")]
    UnknownKernel(KernelHandle),

    #[error("unknown queue handle {0}")]
    UnknownQueue(QueueHandle),

    #[error("unknown marker handle {0}")]
    UnknownMarker(MarkerHandle),

    #[error("allocation of {requested} bytes failed: {reason}")]
    OutOfMemory { requested: usize, reason: String },

    #[error("copy out of range: offset {offset} + {len} bytes exceeds buffer of {size} bytes")]
    CopyOutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("launch exceeds device limits: {0}")]
    LaunchTooLarge(String),

    #[error("launch argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("{backend} backend does not support {what}")]
    NotSupported {
        backend: &'static str,
        what: String,
    },

    #[error("kernel compilation failed: {0}")]
    Compilation(#[from] CodegenError),

    #[error("device error: {0}")]
    Device(String),

    #[error("kernel execution failed: {0}")]
    Execution(String),
}
