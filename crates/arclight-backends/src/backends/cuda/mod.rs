//! CUDA backend for NVIDIA GPUs
//!
//! Kernels are lowered to CUDA C, compiled to PTX with NVRTC at
//! `compile_kernel` time, and dispatched through the driver API. Compiled
//! only with the `cuda` feature; without it this module still exposes
//! enumeration (always empty) and a stub constructor, so callers never need
//! feature gates of their own.
//!
//! # Architecture
//!
//! ```text
//! CudaBackend
//! ├── CudaDevice        - driver context for one GPU
//! ├── buffers           - CudaSlice<u8> allocations by handle
//! ├── modules           - NVRTC-compiled PTX modules by kernel handle
//! └── queues            - submissions ordered on the default stream
//! ```
//!
//! All queues currently share the device's default stream, which is FIFO
//! across every submission; per-queue FIFO ordering follows a fortiori.

pub mod intrinsics;

use crate::backend::Backend;
use crate::device::DeviceDescriptor;
use crate::error::{BackendError, Result};

#[cfg(feature = "cuda")]
mod real {
    use super::intrinsics;
    use crate::arch::{CudaArch, DeviceArch};
    use crate::backend::traits::Backend;
    use crate::backend::types::{
        BufferHandle, KernelHandle, LaunchArg, LaunchConfig, MarkerHandle, QueueHandle,
    };
    use crate::device::{BackendKind, Capabilities, CapabilityFlag, DeviceDescriptor};
    use crate::error::{BackendError, Result};
    use arclight_codegen::{
        lower, CancellationToken, KernelArtifact, LowerTarget, SourceLanguage,
    };
    use arclight_ir::{KernelDef, ParamKind};
    use cudarc::driver::{CudaDevice, CudaSlice, DevicePtr, DeviceSlice};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Instant;

    fn device_err(e: impl std::fmt::Display) -> BackendError {
        BackendError::Device(e.to_string())
    }

    struct CompiledKernel {
        function: cudarc::driver::sys::CUfunction,
        // Module must outlive the function handle
        _module: cudarc::driver::sys::CUmodule,
        params: Vec<ParamKind>,
    }

    // Raw driver handles are plain pointers; access is serialized through
    // &mut self on the backend
    unsafe impl Send for CompiledKernel {}

    #[derive(Default)]
    struct QueueState {
        pending_markers: Vec<u64>,
    }

    struct MarkerState {
        nanos: Option<u64>,
    }

    /// Backend driving one NVIDIA GPU
    pub struct CudaBackend {
        device: Arc<CudaDevice>,
        descriptor: DeviceDescriptor,
        buffers: HashMap<u64, CudaSlice<u8>>,
        next_buffer: u64,
        kernels: HashMap<u64, CompiledKernel>,
        next_kernel: u64,
        queues: HashMap<u64, QueueState>,
        next_queue: u64,
        markers: HashMap<u64, MarkerState>,
        next_marker: u64,
        epoch: Instant,
    }

    impl CudaBackend {
        /// Open the CUDA device at `ordinal`
        pub fn new(ordinal: usize) -> Result<Self> {
            let device = CudaDevice::new(ordinal).map_err(device_err)?;
            let descriptor = describe(&device, ordinal as u32)?;
            tracing::info!(device = %descriptor, "cuda_backend_opened");
            Ok(Self {
                device,
                descriptor,
                buffers: HashMap::new(),
                next_buffer: 0,
                kernels: HashMap::new(),
                next_kernel: 0,
                queues: HashMap::new(),
                next_queue: 0,
                markers: HashMap::new(),
                next_marker: 0,
                epoch: Instant::now(),
            })
        }

        pub fn is_available() -> bool {
            CudaDevice::new(0).is_ok()
        }

        fn check_queue(&self, queue: QueueHandle) -> Result<()> {
            if self.queues.contains_key(&queue.id()) {
                Ok(())
            } else {
                Err(BackendError::UnknownQueue(queue))
            }
        }
    }

    fn attribute(device: &CudaDevice, attr: cudarc::driver::sys::CUdevice_attribute) -> Result<i32> {
        device.attribute(attr).map_err(device_err)
    }

    fn describe(device: &Arc<CudaDevice>, index: u32) -> Result<DeviceDescriptor> {
        use cudarc::driver::sys::CUdevice_attribute::*;
        let major = attribute(device, CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)? as u32;
        let minor = attribute(device, CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)? as u32;
        let arch = CudaArch::classify(major, minor);
        let mut flags = vec![
            CapabilityFlag::Fp16,
            CapabilityFlag::Fp64,
            CapabilityFlag::GroupReduce,
            CapabilityFlag::WarpShuffle,
            CapabilityFlag::ProfilingMarkers,
            CapabilityFlag::CompileCancellation,
        ];
        if major >= 8 {
            flags.push(CapabilityFlag::Bf16);
        }
        Ok(DeviceDescriptor {
            index,
            kind: BackendKind::Cuda,
            name: device.name().map_err(device_err)?,
            arch: DeviceArch::Cuda(arch),
            total_memory: device.total_memory().map_err(device_err)? as u64,
            max_group_size: attribute(device, CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)? as u32,
            max_grid_dim: [
                attribute(device, CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X)? as u32,
                attribute(device, CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y)? as u32,
                attribute(device, CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z)? as u32,
            ],
            warp_size: attribute(device, CU_DEVICE_ATTRIBUTE_WARP_SIZE)? as u32,
            capabilities: Capabilities::new(flags),
        })
    }

    /// Enumerate NVIDIA GPUs, in driver ordinal order
    pub fn enumerate() -> Vec<DeviceDescriptor> {
        let count = match CudaDevice::count() {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                tracing::debug!(error = %e, "cuda_probe_failed");
                return Vec::new();
            }
        };
        (0..count)
            .filter_map(|ordinal| {
                let device = CudaDevice::new(ordinal).ok()?;
                describe(&device, ordinal as u32).ok()
            })
            .collect()
    }

    impl Backend for CudaBackend {
        fn descriptor(&self) -> &DeviceDescriptor {
            &self.descriptor
        }

        fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
            let slice = self
                .device
                .alloc_zeros::<u8>(size)
                .map_err(|e| BackendError::OutOfMemory {
                    requested: size,
                    reason: e.to_string(),
                })?;
            let id = self.next_buffer;
            self.next_buffer += 1;
            self.buffers.insert(id, slice);
            Ok(BufferHandle::new(id))
        }

        fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
            self.buffers
                .remove(&handle.id())
                .map(|_| ())
                .ok_or(BackendError::UnknownBuffer(handle))
        }

        fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
            let slice = self
                .buffers
                .get_mut(&handle.id())
                .ok_or(BackendError::UnknownBuffer(handle))?;
            super::check_bounds(offset, data.len(), slice.len())?;
            let mut view = slice.slice_mut(offset..offset + data.len());
            self.device.htod_sync_copy_into(data, &mut view).map_err(device_err)
        }

        fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
            let slice = self
                .buffers
                .get(&handle.id())
                .ok_or(BackendError::UnknownBuffer(handle))?;
            super::check_bounds(offset, data.len(), slice.len())?;
            let view = slice.slice(offset..offset + data.len());
            self.device.dtoh_sync_copy_into(&view, data).map_err(device_err)
        }

        fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
            self.buffers
                .get(&handle.id())
                .map(|s| s.len())
                .ok_or(BackendError::UnknownBuffer(handle))
        }

        #[tracing::instrument(skip_all, fields(kernel = %def.name))]
        fn compile_kernel(&mut self, def: &KernelDef, cancel: &CancellationToken) -> Result<KernelHandle> {
            let artifact = lower(
                def.clone(),
                LowerTarget::Source(SourceLanguage::CudaC),
                intrinsics::intrinsic_table(),
                cancel,
            )?;
            let KernelArtifact::Source { entry, text, .. } = artifact else {
                return Err(BackendError::Execution("cuda target produced IR".to_string()));
            };

            // Last checkpoint before the expensive native compile
            cancel
                .checkpoint()
                .map_err(BackendError::Compilation)?;

            let start = Instant::now();
            let ptx = cudarc::nvrtc::compile_ptx(&text)
                .map_err(|e| BackendError::Compilation(arclight_codegen::CodegenError::Emit(e.to_string())))?;
            tracing::debug!(duration_us = start.elapsed().as_micros() as u64, "nvrtc_compiled");

            let src = std::ffi::CString::new(ptx.to_src())
                .map_err(|e| BackendError::Device(e.to_string()))?;
            let entry_c = std::ffi::CString::new(entry.as_str())
                .map_err(|e| BackendError::Device(e.to_string()))?;
            let (module, function) = unsafe {
                let module = cudarc::driver::result::module::load_data(
                    src.as_ptr() as *const std::ffi::c_void,
                )
                .map_err(device_err)?;
                let function = cudarc::driver::result::module::get_function(module, entry_c)
                    .map_err(device_err)?;
                (module, function)
            };

            let id = self.next_kernel;
            self.next_kernel += 1;
            self.kernels.insert(
                id,
                CompiledKernel {
                    function,
                    _module: module,
                    params: def.params.iter().map(|p| p.kind).collect(),
                },
            );
            Ok(KernelHandle::new(id))
        }

        fn release_kernel(&mut self, handle: KernelHandle) -> Result<()> {
            let kernel = self
                .kernels
                .remove(&handle.id())
                .ok_or(BackendError::UnknownKernel(handle))?;
            unsafe {
                let _ = cudarc::driver::result::module::unload(kernel._module);
            }
            Ok(())
        }

        fn create_queue(&mut self) -> Result<QueueHandle> {
            let id = self.next_queue;
            self.next_queue += 1;
            self.queues.insert(id, QueueState::default());
            Ok(QueueHandle::new(id))
        }

        fn destroy_queue(&mut self, queue: QueueHandle) -> Result<()> {
            self.synchronize(queue)?;
            self.queues.remove(&queue.id());
            Ok(())
        }

        fn submit_launch(
            &mut self,
            queue: QueueHandle,
            kernel: KernelHandle,
            config: &LaunchConfig,
            args: &[LaunchArg],
        ) -> Result<()> {
            self.check_queue(queue)?;
            if config.group.total_lanes() > self.descriptor.max_group_size {
                return Err(BackendError::LaunchTooLarge(format!(
                    "group of {} lanes exceeds limit {}",
                    config.group.total_lanes(),
                    self.descriptor.max_group_size
                )));
            }
            let compiled = self
                .kernels
                .get(&kernel.id())
                .ok_or(BackendError::UnknownKernel(kernel))?;
            if args.len() != compiled.params.len() {
                return Err(BackendError::ArgumentMismatch(format!(
                    "kernel takes {} arguments, {} given",
                    compiled.params.len(),
                    args.len()
                )));
            }

            // Marshal every argument into an 8-byte slot; the driver reads
            // the true parameter size from the function signature
            let mut slots: Vec<u64> = Vec::with_capacity(args.len());
            for (kind, arg) in compiled.params.iter().zip(args) {
                match (kind, arg) {
                    (ParamKind::Buffer { .. }, LaunchArg::Buffer(handle)) => {
                        let slice = self
                            .buffers
                            .get(&handle.id())
                            .ok_or(BackendError::UnknownBuffer(*handle))?;
                        slots.push(*slice.device_ptr());
                    }
                    (ParamKind::Scalar(_), LaunchArg::Scalar(value)) => slots.push(value.bits),
                    _ => {
                        return Err(BackendError::ArgumentMismatch(
                            "argument kind does not match parameter".to_string(),
                        ))
                    }
                }
            }
            let mut params: Vec<*mut std::ffi::c_void> = slots
                .iter_mut()
                .map(|slot| slot as *mut u64 as *mut std::ffi::c_void)
                .collect();

            unsafe {
                cudarc::driver::result::launch_kernel(
                    compiled.function,
                    (config.grid.x, config.grid.y, config.grid.z),
                    (config.group.x, config.group.y, config.group.z),
                    0,
                    std::ptr::null_mut(),
                    &mut params,
                )
                .map_err(device_err)?;
            }
            Ok(())
        }

        fn submit_copy(
            &mut self,
            queue: QueueHandle,
            src: BufferHandle,
            src_offset: usize,
            dst: BufferHandle,
            dst_offset: usize,
            len: usize,
        ) -> Result<()> {
            self.check_queue(queue)?;
            let src_slice = self
                .buffers
                .get(&src.id())
                .ok_or(BackendError::UnknownBuffer(src))?;
            super::check_bounds(src_offset, len, src_slice.len())?;
            let src_ptr = *src_slice.device_ptr() + src_offset as u64;

            let dst_slice = self
                .buffers
                .get(&dst.id())
                .ok_or(BackendError::UnknownBuffer(dst))?;
            super::check_bounds(dst_offset, len, dst_slice.len())?;
            let dst_ptr = *dst_slice.device_ptr() + dst_offset as u64;

            unsafe {
                cudarc::driver::result::memcpy_dtod_async(
                    dst_ptr,
                    src_ptr,
                    len,
                    std::ptr::null_mut(),
                )
                .map_err(device_err)
            }
        }

        fn submit_marker(&mut self, queue: QueueHandle) -> Result<MarkerHandle> {
            self.check_queue(queue)?;
            // Enqueues without blocking; the host timestamp is taken when
            // the stream drains past this point in synchronize
            let id = self.next_marker;
            self.next_marker += 1;
            self.markers.insert(id, MarkerState { nanos: None });
            self.queues
                .get_mut(&queue.id())
                .ok_or(BackendError::UnknownQueue(queue))?
                .pending_markers
                .push(id);
            Ok(MarkerHandle::new(id))
        }

        fn synchronize(&mut self, queue: QueueHandle) -> Result<()> {
            let pending = std::mem::take(
                &mut self
                    .queues
                    .get_mut(&queue.id())
                    .ok_or(BackendError::UnknownQueue(queue))?
                    .pending_markers,
            );
            self.device.synchronize().map_err(device_err)?;
            let nanos = self.epoch.elapsed().as_nanos() as u64;
            for id in pending {
                if let Some(marker) = self.markers.get_mut(&id) {
                    marker.nanos = Some(nanos);
                }
            }
            Ok(())
        }

        fn marker_timestamp(&self, marker: MarkerHandle) -> Result<Option<u64>> {
            let state = self
                .markers
                .get(&marker.id())
                .ok_or(BackendError::UnknownMarker(marker))?;
            Ok(state.nanos)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }
}

#[cfg(feature = "cuda")]
pub use real::CudaBackend;

#[cfg(feature = "cuda")]
pub fn enumerate() -> Vec<DeviceDescriptor> {
    real::enumerate()
}

/// Open the CUDA device at `ordinal` as a boxed backend
#[cfg(feature = "cuda")]
pub fn open(ordinal: usize) -> Result<Box<dyn Backend + Send>> {
    Ok(Box::new(real::CudaBackend::new(ordinal)?))
}

#[cfg(not(feature = "cuda"))]
pub fn open(_ordinal: usize) -> Result<Box<dyn Backend + Send>> {
    Err(BackendError::NotSupported {
        backend: "cuda",
        what: "builds without the 'cuda' feature".to_string(),
    })
}

#[cfg(any(feature = "cuda", test))]
fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or(BackendError::CopyOutOfRange { offset, len, size })?;
    if end > size {
        return Err(BackendError::CopyOutOfRange { offset, len, size });
    }
    Ok(())
}

// Stub when the cuda feature is disabled: no devices, explicit error on open
#[cfg(not(feature = "cuda"))]
pub struct CudaBackend;

#[cfg(not(feature = "cuda"))]
impl CudaBackend {
    pub fn new(_ordinal: usize) -> Result<Self> {
        Err(BackendError::NotSupported {
            backend: "cuda",
            what: "builds without the 'cuda' feature".to_string(),
        })
    }

    pub fn is_available() -> bool {
        false
    }
}

#[cfg(not(feature = "cuda"))]
pub fn enumerate() -> Vec<DeviceDescriptor> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_helper() {
        check_bounds(0, 4, 8).unwrap();
        assert!(check_bounds(6, 4, 8).is_err());
        assert!(check_bounds(usize::MAX, 2, 8).is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_stub_reports_not_supported() {
        assert!(!CudaBackend::is_available());
        assert!(enumerate().is_empty());
        assert!(matches!(
            CudaBackend::new(0),
            Err(BackendError::NotSupported { backend: "cuda", .. })
        ));
        assert!(matches!(
            open(0),
            Err(BackendError::NotSupported { backend: "cuda", .. })
        ));
    }
}
