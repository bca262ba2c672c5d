//! # arclight-runtime - Accelerator Execution API
//!
//! The user-facing layer of Arclight: open a device, move data, compile
//! kernels, and launch them on FIFO streams.
//!
//! ## Architecture
//!
//! ```text
//! Accelerator ── owns one backend (CPU always, CUDA/Metal when present)
//! ├── Buffer<T>        - typed device allocation, Pod host transfers
//! │   └── BufferView   - non-owning strided N-dimensional view
//! ├── Stream           - FIFO queue of launches, copies, and markers
//! │   └── ProfilingMarker - resolves to a timestamp after synchronize
//! └── Kernel           - compiled entry point, cached per accelerator
//! ```
//!
//! Kernels are portable [`arclight_ir::KernelDef`] values; compilation runs
//! the full lowering pipeline (remap, specialize, intrinsic match, emit), so
//! an unsupported (operation, type) pair fails at [`Accelerator::compile`]
//! time, never at launch.
//!
//! ## Example
//!
//! ```no_run
//! use arclight_runtime::{Accelerator, KernelArg};
//! use arclight_backends::LaunchConfig;
//! # fn kernel_def() -> arclight_ir::KernelDef { unimplemented!() }
//!
//! let accel = Accelerator::cpu()?;
//! let stream = accel.stream()?;
//!
//! let x = accel.from_slice(&[1.0f32, 2.0, 3.0, 4.0])?;
//! let out = accel.alloc::<f32>(4)?;
//!
//! let kernel = accel.compile(&kernel_def())?;
//! kernel.launch(
//!     &stream,
//!     &LaunchConfig::linear(4, 4),
//!     &[KernelArg::from(&out), KernelArg::from(&x)],
//! )?;
//! stream.synchronize()?;
//! let result = out.to_vec()?;
//! # Ok::<(), arclight_runtime::Error>(())
//! ```

pub mod accelerator;
pub mod buffer;
mod cache;
pub mod error;
pub mod kernel;
pub mod stream;
pub mod view;

pub use accelerator::Accelerator;
pub use buffer::{Buffer, DeviceScalar};
pub use error::{Error, Result};
pub use kernel::{Kernel, KernelArg};
pub use stream::{MarkerDelta, MarkerTimestamp, ProfilingMarker, Stream};
pub use view::{BufferView, StrideDescriptor};

// The launch-shape types come straight from the backend layer
pub use arclight_backends::{GridDim, GroupDim, LaunchConfig};
pub use arclight_codegen::CancellationToken;
