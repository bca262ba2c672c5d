//! Backend trait for device execution
//!
//! Every accelerator backend implements this trait. The runtime drives it
//! through a trait object, so the interface is kept object safe and byte
//! oriented; typed access lives in the runtime's buffer layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Backend Trait                       │
//! │  - buffer management (allocate/free/read/write/copy)     │
//! │  - kernel compilation (IR → artifact via the pipeline)   │
//! │  - queues (launch/copy/marker submission, synchronize)   │
//! └──────────────────────┬───────────────────────────────────┘
//!                        │
//!            ┌───────────┼───────────┐
//!            ▼           ▼           ▼
//!      ┌─────────┐ ┌─────────┐ ┌─────────┐
//!      │   CPU   │ │  CUDA   │ │  Metal  │
//!      │ Backend │ │ Backend │ │ Backend │
//!      └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! # Queue model
//!
//! Work is submitted to queues and completes in submission order per queue.
//! Submission never blocks on execution; `synchronize` blocks until
//! everything previously submitted to the queue has finished. Profiling
//! markers are timestamped when the device reaches them, and the timestamp
//! becomes observable only after a `synchronize` of the owning queue.

use super::types::{BufferHandle, KernelHandle, LaunchArg, LaunchConfig, MarkerHandle, QueueHandle};
use crate::device::DeviceDescriptor;
use crate::error::Result;
use arclight_codegen::CancellationToken;
use arclight_ir::KernelDef;

/// Execution backend for one device
pub trait Backend {
    /// Descriptor of the device this backend drives
    fn descriptor(&self) -> &DeviceDescriptor;

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a device buffer of `size` bytes
    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle>;

    /// Free a previously allocated buffer
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy host bytes into a buffer at a byte offset
    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy buffer bytes at a byte offset out to the host
    fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()>;

    /// Size in bytes of an allocated buffer
    fn buffer_size(&self, handle: BufferHandle) -> Result<usize>;

    // ============================================================================================
    // Kernel Compilation
    // ============================================================================================

    /// Run the lowering pipeline and any native compile for this device
    ///
    /// The definition must already be specialized to concrete element types.
    /// The token is checked before the native compile step; a cancelled
    /// compilation returns `Compilation(Cancelled)` and retains nothing.
    fn compile_kernel(&mut self, def: &KernelDef, cancel: &CancellationToken) -> Result<KernelHandle>;

    /// Release a compiled kernel
    fn release_kernel(&mut self, handle: KernelHandle) -> Result<()>;

    // ============================================================================================
    // Queues
    // ============================================================================================

    /// Create a submission queue
    fn create_queue(&mut self) -> Result<QueueHandle>;

    /// Destroy a queue, waiting for submitted work first
    fn destroy_queue(&mut self, queue: QueueHandle) -> Result<()>;

    /// Submit a kernel launch
    ///
    /// Arguments bind positionally to the kernel's parameters; a count or
    /// kind mismatch fails with `ArgumentMismatch` before anything runs.
    fn submit_launch(
        &mut self,
        queue: QueueHandle,
        kernel: KernelHandle,
        config: &LaunchConfig,
        args: &[LaunchArg],
    ) -> Result<()>;

    /// Submit a device-to-device copy between buffers of this backend
    fn submit_copy(
        &mut self,
        queue: QueueHandle,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        len: usize,
    ) -> Result<()>;

    /// Submit a profiling marker; its timestamp resolves after `synchronize`
    fn submit_marker(&mut self, queue: QueueHandle) -> Result<MarkerHandle>;

    /// Block until all work submitted to the queue has completed
    fn synchronize(&mut self, queue: QueueHandle) -> Result<()>;

    /// Timestamp of a marker in nanoseconds since backend initialization
    ///
    /// Returns `None` until the owning queue has been synchronized past the
    /// marker.
    fn marker_timestamp(&self, marker: MarkerHandle) -> Result<Option<u64>>;

    // ============================================================================================
    // Type Introspection
    // ============================================================================================

    /// Downcast to `&dyn Any` for backend-specific access
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast to `&mut dyn Any` for backend-specific access
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
