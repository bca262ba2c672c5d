//! Portable kernel intermediate representation
//!
//! This crate defines the device-neutral form of a compute kernel:
//! - Scalar element types with size and class predicates
//! - A closed set of portable operation kinds (arithmetic, math functions,
//!   group/warp collectives, index queries)
//! - Kernel definitions: parameters plus a statement body over pure
//!   per-lane expressions
//!
//! The IR is produced by a front end (or by the [`builder::KernelBuilder`]
//! directly) and consumed by the code-generation pipeline, which lowers it to
//! a backend-specific artifact. Nothing in this crate knows about any backend.
//!
//! ```text
//! KernelDef ──lower──▶ CPU interpreter program
//!           ──lower──▶ CUDA C source
//!           ──lower──▶ MSL source
//!           ──lower──▶ OpenCL C source
//! ```

pub mod builder;
pub mod kernel;
pub mod ops;
pub mod types;

pub use builder::KernelBuilder;
pub use kernel::{
    CmpCond, Expr, KernelDef, KernelParam, Literal, ParamKind, Stmt, ValidationError, ValueId,
};
pub use ops::{Axis, OpKind};
pub use types::{ElemType, ScalarType};
