//! OpenCL C emission support
//!
//! There is no OpenCL runtime backend; this module exists so kernels can be
//! lowered to OpenCL C source for external toolchains. OpenCL math builtins
//! are overloaded like MSL's, work-item queries are the `get_*` functions,
//! and sub-group shuffles cover warp operations.

pub mod intrinsics;
