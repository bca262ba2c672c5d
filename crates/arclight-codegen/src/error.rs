//! Error types for the lowering pipeline

use arclight_ir::{OpKind, ScalarType};

/// Result type for lowering operations
pub type Result<T> = std::result::Result<T, CodegenError>;

/// Errors that can occur while lowering a kernel
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// No implementation registered for this (operation, type) pair.
    ///
    /// This is a compile-time failure: it is raised while matching the
    /// kernel body against the backend table, never during execution.
    #[error("no intrinsic registered for {op} over {ty}")]
    UnsupportedIntrinsic { op: OpKind, ty: ScalarType },

    /// A second registration arrived for an already-claimed table slot.
    /// The first registration stays in effect; the conflicting call fails.
    #[error("duplicate intrinsic registration for {op} over {ty}")]
    DuplicateIntrinsic { op: OpKind, ty: ScalarType },

    /// A host-namespace call had no entry in the remap table
    #[error("unknown call {namespace}.{name}/{arity}")]
    UnknownCall {
        namespace: String,
        name: String,
        arity: usize,
    },

    /// The kernel still carries a generic element type; it must be
    /// specialized to a concrete type before matching
    #[error("kernel {0:?} is generic; specialize to a concrete element type first")]
    UnspecializedKernel(String),

    /// Structural IR validation failed
    #[error("invalid kernel: {0}")]
    Invalid(#[from] arclight_ir::ValidationError),

    /// Source emission failed
    #[error("emission failed: {0}")]
    Emit(String),

    /// A cancellation token fired before the expensive compile step
    #[error("kernel compilation was cancelled")]
    Cancelled,
}
