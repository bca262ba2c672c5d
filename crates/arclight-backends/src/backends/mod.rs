//! Backend implementations
//!
//! The CPU backend is always present and executes lowered IR with the
//! interpreter. CUDA and Metal compile emitted source natively and are
//! available behind the `cuda` feature and Apple targets respectively;
//! OpenCL is an emission dialect only.

pub mod cpu;
pub mod cuda;
pub mod metal;
pub mod opencl;
