//! Accelerator handles
//!
//! An [`Accelerator`] owns one backend instance and hands out buffers,
//! streams, and compiled kernels tied to it. Handles are cheaply cloneable;
//! the backend lives until the last clone drops or [`Accelerator::dispose`]
//! runs, whichever comes first. After disposal every operation through any
//! clone fails with [`Error::Disposed`].

use crate::buffer::Buffer;
use crate::cache::{CompiledEntry, KernelCache};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::stream::Stream;
use arclight_backends::{Backend, CapabilityFlag, CpuBackend, DeviceDescriptor, QueueHandle};
use arclight_codegen::CancellationToken;
use arclight_ir::KernelDef;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ACCELERATOR_ID: AtomicU64 = AtomicU64::new(0);

/// State shared by an accelerator and every object created from it
///
/// Disposal takes the backend out of the mutex and drops it, which releases
/// device resources immediately even while buffer or kernel objects are
/// still alive.
pub(crate) struct Shared {
    pub id: u64,
    pub descriptor: DeviceDescriptor,
    backend: Mutex<Option<Box<dyn Backend + Send>>>,
    disposed: AtomicBool,
    /// Queue for operations issued without an explicit stream
    pub(crate) default_queue: QueueHandle,
    pub(crate) kernels: KernelCache,
}

impl Shared {
    /// Lock the backend, failing if the accelerator was disposed
    pub(crate) fn backend(&self) -> Result<MappedMutexGuard<'_, Box<dyn Backend + Send>>> {
        MutexGuard::try_map(self.backend.lock(), |b| b.as_mut())
            .map_err(|_| Error::Disposed(self.id))
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Handle to one compute device
///
/// ```no_run
/// use arclight_runtime::Accelerator;
///
/// let accel = Accelerator::cpu()?;
/// let buf = accel.from_slice(&[1.0f32, 2.0, 3.0])?;
/// assert_eq!(buf.to_vec()?, vec![1.0, 2.0, 3.0]);
/// # Ok::<(), arclight_runtime::Error>(())
/// ```
#[derive(Clone)]
pub struct Accelerator {
    pub(crate) shared: Arc<Shared>,
}

impl Accelerator {
    fn from_backend(mut backend: Box<dyn Backend + Send>) -> Result<Self> {
        let descriptor = backend.descriptor().clone();
        let default_queue = backend.create_queue()?;
        let id = NEXT_ACCELERATOR_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(id, device = %descriptor, "accelerator_opened");
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                descriptor,
                backend: Mutex::new(Some(backend)),
                disposed: AtomicBool::new(false),
                default_queue,
                kernels: KernelCache::default(),
            }),
        })
    }

    /// Open the host CPU device
    pub fn cpu() -> Result<Self> {
        Self::from_backend(Box::new(CpuBackend::new()))
    }

    /// Open the device a descriptor points at
    ///
    /// Descriptors come from [`arclight_backends::enumerate`] or
    /// [`arclight_backends::select_device`].
    pub fn open(descriptor: &DeviceDescriptor) -> Result<Self> {
        Self::from_backend(arclight_backends::open_device(descriptor)?)
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.shared.descriptor
    }

    /// Total query: every flag answers true or false, never "unknown"
    pub fn supports(&self, flag: CapabilityFlag) -> bool {
        self.shared.descriptor.supports(flag)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Allocate an uninitialized (zeroed) buffer of `len` elements
    pub fn alloc<T: bytemuck::Pod>(&self, len: usize) -> Result<Buffer<T>> {
        if len == 0 {
            return Err(Error::InvalidArgument(
                "buffer element count must be positive".to_string(),
            ));
        }
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::InvalidArgument(format!("buffer of {len} elements overflows")))?;
        let handle = self.shared.backend()?.allocate_buffer(bytes)?;
        Ok(Buffer::new(Arc::clone(&self.shared), handle, len))
    }

    /// Allocate a dense row-major 2D buffer of `rows` × `cols` elements
    ///
    /// The buffer itself stays flat; [`Buffer::view_2d`] gives the indexed
    /// view over it.
    pub fn alloc_2d<T: bytemuck::Pod>(&self, rows: usize, cols: usize) -> Result<Buffer<T>> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidArgument(format!("{rows}x{cols} buffer overflows")))?;
        self.alloc(len)
    }

    /// Allocate a dense row-major 3D buffer of `depth` × `rows` × `cols`
    pub fn alloc_3d<T: bytemuck::Pod>(
        &self,
        depth: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Buffer<T>> {
        let len = depth
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("{depth}x{rows}x{cols} buffer overflows"))
            })?;
        self.alloc(len)
    }

    /// Allocate a buffer and fill it from a host slice
    pub fn from_slice<T: bytemuck::Pod>(&self, data: &[T]) -> Result<Buffer<T>> {
        let buf = self.alloc(data.len())?;
        buf.copy_from_slice(data)?;
        Ok(buf)
    }

    /// Create a FIFO work stream
    pub fn stream(&self) -> Result<Stream> {
        Stream::create(Arc::clone(&self.shared))
    }

    /// Compile a kernel for this device, consulting the per-device cache
    pub fn compile(&self, def: &KernelDef) -> Result<Kernel> {
        self.compile_with_cancel(def, &CancellationToken::new())
    }

    /// Compile with a caller-owned cancellation token
    ///
    /// The token is checked between pipeline stages and once more right
    /// before the backend's native compile step.
    #[tracing::instrument(skip_all, fields(id = self.shared.id, kernel = %def.name))]
    pub fn compile_with_cancel(&self, def: &KernelDef, cancel: &CancellationToken) -> Result<Kernel> {
        if let Some(entry) = self.shared.kernels.get(&def.name) {
            tracing::debug!(kernel = %def.name, "kernel_cache_hit");
            return Ok(Kernel::new(Arc::clone(&self.shared), def.name.clone(), entry));
        }

        let handle = self.shared.backend()?.compile_kernel(def, cancel)?;
        let entry = self.shared.kernels.insert(
            def.name.clone(),
            CompiledEntry {
                handle,
                params: def.params.iter().map(|p| p.kind).collect(),
                max_group_size: self.shared.descriptor.max_group_size,
            },
        );
        Ok(Kernel::new(Arc::clone(&self.shared), def.name.clone(), entry))
    }

    /// Release the backend and all resources it holds
    ///
    /// Idempotent: the second and later calls are no-ops. Outstanding
    /// buffers, streams, and kernels remain valid objects but every
    /// operation through them fails with [`Error::Disposed`].
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            drop(self.shared.backend.lock().take());
            tracing::info!(id = self.shared.id, "accelerator_disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }
}

impl std::fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerator")
            .field("id", &self.shared.id)
            .field("device", &self.shared.descriptor.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
