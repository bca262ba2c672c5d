//! Device backends for the Arclight runtime
//!
//! This crate defines the [`Backend`] trait that the runtime drives, the
//! device enumeration and capability model, and the per-device backend
//! implementations:
//!
//! ```text
//! arclight-backends
//! ├── backend     - Backend trait, handles, launch configuration
//! ├── device      - DeviceDescriptor, capability flags, enumeration
//! ├── arch        - total CUDA / Metal architecture classification
//! └── backends
//!     ├── cpu     - interpreter-backed reference backend (always on)
//!     ├── cuda    - NVRTC + driver API, behind the `cuda` feature
//!     ├── metal   - MSL + compute encoders, on Apple targets
//!     └── opencl  - OpenCL C emission tables only
//! ```
//!
//! Backends hand out opaque `u64` handles for buffers, kernels, queues, and
//! markers; ownership and lifetime live in the runtime crate above this one.

pub mod arch;
pub mod backend;
pub mod backends;
pub mod device;
pub mod error;

pub use arch::{CudaArch, DeviceArch, MetalFamily};
pub use backend::{
    Backend, BufferHandle, GridDim, GroupDim, KernelHandle, LaunchArg, LaunchConfig,
    MarkerHandle, QueueHandle, ScalarValue,
};
pub use backends::cpu::CpuBackend;
pub use backends::cuda::CudaBackend;
pub use backends::metal::MetalBackend;
pub use device::{
    enumerate, enumerate_kind, open_device, select_device, BackendKind, Capabilities,
    CapabilityFlag, DeviceDescriptor,
};
pub use error::{BackendError, Result};
