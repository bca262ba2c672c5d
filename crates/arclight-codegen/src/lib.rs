//! Kernel lowering pipeline
//!
//! This crate turns a portable [`KernelDef`](arclight_ir::KernelDef) into a
//! backend artifact. The pipeline runs in a fixed order:
//!
//! ```text
//! KernelDef
//!   │  remap        host-namespace calls → portable intrinsics
//!   ▼
//!   │  specialize   generic element type → concrete ScalarType
//!   ▼
//!   │  match        every (OpKind, ScalarType) pair against the
//!   │               backend's IntrinsicTable (miss = compile error)
//!   ▼
//!   │  emit         CPU: specialized IR for the interpreter
//!   │               GPU: C-like source via CodeWriter
//!   ▼
//! KernelArtifact
//! ```
//!
//! Intrinsic tables are built once per backend during backend initialization
//! and are read-only afterwards, so any number of kernels can be compiled
//! concurrently against them.

pub mod cancel;
pub mod error;
pub mod intrinsics;
pub mod lower;
pub mod remap;
pub mod specialize;
pub mod writer;

pub use cancel::CancellationToken;
pub use error::{CodegenError, Result};
pub use intrinsics::{EmitSupport, IntrinsicCall, IntrinsicImpl, IntrinsicTable};
pub use lower::{lower, KernelArtifact, LowerTarget, SourceLanguage};
pub use remap::remap;
pub use specialize::specialize;
pub use writer::CodeWriter;
