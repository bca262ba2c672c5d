//! Error types for runtime operations

use arclight_backends::BackendError;
use arclight_codegen::CodegenError;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller passed something structurally wrong (mismatched accelerators,
    /// wrong argument count, handle from another device)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffer length mismatch on a whole-buffer transfer
    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Ranged access past the end of a buffer
    #[error("out of range: element {offset} + {len} exceeds buffer of {size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The accelerator this object belongs to has been disposed
    #[error("accelerator {0} is disposed")]
    Disposed(u64),

    /// Backend-reported failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Lowering or intrinsic-matching failure outside a backend compile
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl Error {
    /// True when this error is a compile-time intrinsic coverage miss
    pub fn is_unsupported_intrinsic(&self) -> bool {
        matches!(
            self,
            Error::Codegen(CodegenError::UnsupportedIntrinsic { .. })
                | Error::Backend(BackendError::Compilation(
                    CodegenError::UnsupportedIntrinsic { .. }
                ))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_ir::{OpKind, ScalarType};

    #[test]
    fn test_unsupported_intrinsic_detected_through_backend() {
        let inner = CodegenError::UnsupportedIntrinsic {
            op: OpKind::Sin,
            ty: ScalarType::I32,
        };
        let err = Error::Backend(BackendError::Compilation(inner));
        assert!(err.is_unsupported_intrinsic());
        assert!(!Error::Disposed(3).is_unsupported_intrinsic());
    }
}
