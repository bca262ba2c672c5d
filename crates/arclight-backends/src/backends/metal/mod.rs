//! Metal backend for Apple GPUs
//!
//! Kernels are lowered to MSL, compiled with the system Metal compiler at
//! `compile_kernel` time, and dispatched through compute command encoders.
//! Compiled only on Apple targets; elsewhere this module exposes enumeration
//! (always empty) and a stub constructor.
//!
//! # Architecture
//!
//! ```text
//! MetalBackend
//! ├── Device                - system default GPU
//! ├── buffers               - shared-storage MTLBuffer allocations
//! ├── pipelines             - compiled compute pipeline states
//! └── queues                - one MTLCommandQueue each (FIFO per queue)
//! ```

pub mod intrinsics;

use crate::backend::Backend;
use crate::device::DeviceDescriptor;
use crate::error::{BackendError, Result};

#[cfg(target_vendor = "apple")]
mod real {
    use super::intrinsics;
    use crate::arch::{DeviceArch, MetalFamily};
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
    use metal::{
        Buffer, CommandQueue, CompileOptions, ComputePipelineState, Device, MTLGPUFamily,
        MTLResourceOptions, MTLSize,
    };
    use std::collections::HashMap;
    use std::time::Instant;

    struct CompiledKernel {
        pipeline: ComputePipelineState,
        params: Vec<ParamKind>,
    }

    #[derive(Default)]
    struct QueueState {
        pending_markers: Vec<u64>,
    }

    struct MarkerState {
        nanos: u64,
        resolved: bool,
    }

    /// Backend driving one Apple GPU
    pub struct MetalBackend {
        device: Device,
        descriptor: DeviceDescriptor,
        buffers: HashMap<u64, Buffer>,
        next_buffer: u64,
        kernels: HashMap<u64, CompiledKernel>,
        next_kernel: u64,
        queues: HashMap<u64, (CommandQueue, QueueState)>,
        next_queue: u64,
        markers: HashMap<u64, MarkerState>,
        next_marker: u64,
        epoch: Instant,
    }

    fn classify(device: &Device) -> MetalFamily {
        // Newest family the device reports; raw values match MTLGPUFamily
        for (family, raw) in [
            (MTLGPUFamily::Apple9, 1009u32),
            (MTLGPUFamily::Apple8, 1008),
            (MTLGPUFamily::Apple7, 1007),
            (MTLGPUFamily::Mac2, 2002),
        ] {
            if device.supports_family(family) {
                return MetalFamily::classify(raw);
            }
        }
        MetalFamily::Unknown(0)
    }

    fn describe(device: &Device) -> DeviceDescriptor {
        let family = classify(device);
        let mut flags = vec![
            CapabilityFlag::Fp16,
            CapabilityFlag::GroupReduce,
            CapabilityFlag::WarpShuffle,
            CapabilityFlag::ProfilingMarkers,
            CapabilityFlag::CompileCancellation,
        ];
        if family.has_unified_memory() {
            flags.push(CapabilityFlag::UnifiedMemory);
        }
        let group = device.max_threads_per_threadgroup();
        DeviceDescriptor {
            index: 0,
            kind: BackendKind::Metal,
            name: device.name().to_string(),
            arch: DeviceArch::Metal(family),
            total_memory: device.recommended_max_working_set_size(),
            max_group_size: group.width as u32,
            max_grid_dim: [u32::MAX, u32::MAX, u32::MAX],
            warp_size: 32,
            capabilities: Capabilities::new(flags),
        }
    }

    /// Enumerate the system default GPU, if any
    pub fn enumerate() -> Vec<DeviceDescriptor> {
        Device::system_default().iter().map(describe).collect()
    }

    impl MetalBackend {
        pub fn new() -> Result<Self> {
            let device = Device::system_default()
                .ok_or_else(|| BackendError::Device("no metal device".to_string()))?;
            let descriptor = describe(&device);
            tracing::info!(device = %descriptor, "metal_backend_opened");
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
            Device::system_default().is_some()
        }

        fn buffer(&self, handle: BufferHandle) -> Result<&Buffer> {
            self.buffers
                .get(&handle.id())
                .ok_or(BackendError::UnknownBuffer(handle))
        }
    }

    impl Backend for MetalBackend {
        fn descriptor(&self) -> &DeviceDescriptor {
            &self.descriptor
        }

        fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
            let buffer = self
                .device
                .new_buffer(size.max(1) as u64, MTLResourceOptions::StorageModeShared);
            let id = self.next_buffer;
            self.next_buffer += 1;
            self.buffers.insert(id, buffer);
            Ok(BufferHandle::new(id))
        }

        fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
            self.buffers
                .remove(&handle.id())
                .map(|_| ())
                .ok_or(BackendError::UnknownBuffer(handle))
        }

        fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
            let buffer = self.buffer(handle)?;
            super::check_bounds(offset, data.len(), buffer.length() as usize)?;
            unsafe {
                let dst = (buffer.contents() as *mut u8).add(offset);
                std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            }
            Ok(())
        }

        fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
            let buffer = self.buffer(handle)?;
            super::check_bounds(offset, data.len(), buffer.length() as usize)?;
            unsafe {
                let src = (buffer.contents() as *const u8).add(offset);
                std::ptr::copy_nonoverlapping(src, data.as_mut_ptr(), data.len());
            }
            Ok(())
        }

        fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
            Ok(self.buffer(handle)?.length() as usize)
        }

        #[tracing::instrument(skip_all, fields(kernel = %def.name))]
        fn compile_kernel(&mut self, def: &KernelDef, cancel: &CancellationToken) -> Result<KernelHandle> {
            let artifact = lower(
                def.clone(),
                LowerTarget::Source(SourceLanguage::Msl),
                intrinsics::intrinsic_table(),
                cancel,
            )?;
            let KernelArtifact::Source { entry, text, .. } = artifact else {
                return Err(BackendError::Execution("metal target produced IR".to_string()));
            };

            cancel.checkpoint().map_err(BackendError::Compilation)?;

            let start = Instant::now();
            let library = self
                .device
                .new_library_with_source(&text, &CompileOptions::new())
                .map_err(|e| {
                    BackendError::Compilation(arclight_codegen::CodegenError::Emit(e.to_string()))
                })?;
            let function = library
                .get_function(&entry, None)
                .map_err(|e| BackendError::Device(e.to_string()))?;
            let pipeline = self
                .device
                .new_compute_pipeline_state_with_function(&function)
                .map_err(|e| BackendError::Device(e.to_string()))?;
            tracing::debug!(duration_us = start.elapsed().as_micros() as u64, "msl_compiled");

            let id = self.next_kernel;
            self.next_kernel += 1;
            self.kernels.insert(
                id,
                CompiledKernel {
                    pipeline,
                    params: def.params.iter().map(|p| p.kind).collect(),
                },
            );
            Ok(KernelHandle::new(id))
        }

        fn release_kernel(&mut self, handle: KernelHandle) -> Result<()> {
            self.kernels
                .remove(&handle.id())
                .map(|_| ())
                .ok_or(BackendError::UnknownKernel(handle))
        }

        fn create_queue(&mut self) -> Result<QueueHandle> {
            let queue = self.device.new_command_queue();
            let id = self.next_queue;
            self.next_queue += 1;
            self.queues.insert(id, (queue, QueueState::default()));
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
            let (command_queue, _) = self
                .queues
                .get(&queue.id())
                .ok_or(BackendError::UnknownQueue(queue))?;

            let command_buffer = command_queue.new_command_buffer();
            let encoder = command_buffer.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(&compiled.pipeline);
            for (i, (kind, arg)) in compiled.params.iter().zip(args).enumerate() {
                match (kind, arg) {
                    (ParamKind::Buffer { .. }, LaunchArg::Buffer(handle)) => {
                        let buffer = self
                            .buffers
                            .get(&handle.id())
                            .ok_or(BackendError::UnknownBuffer(*handle))?;
                        encoder.set_buffer(i as u64, Some(buffer), 0);
                    }
                    (ParamKind::Scalar(_), LaunchArg::Scalar(value)) => {
                        let bytes = value.to_bytes();
                        encoder.set_bytes(
                            i as u64,
                            bytes.len() as u64,
                            bytes.as_ptr() as *const std::ffi::c_void,
                        );
                    }
                    _ => {
                        encoder.end_encoding();
                        return Err(BackendError::ArgumentMismatch(
                            "argument kind does not match parameter".to_string(),
                        ));
                    }
                }
            }
            encoder.dispatch_thread_groups(
                MTLSize::new(config.grid.x as u64, config.grid.y as u64, config.grid.z as u64),
                MTLSize::new(config.group.x as u64, config.group.y as u64, config.group.z as u64),
            );
            encoder.end_encoding();
            command_buffer.commit();
            command_buffer.wait_until_completed();
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
            let (command_queue, _) = self
                .queues
                .get(&queue.id())
                .ok_or(BackendError::UnknownQueue(queue))?;
            let src_buf = self.buffer(src)?;
            super::check_bounds(src_offset, len, src_buf.length() as usize)?;
            let dst_buf = self.buffer(dst)?;
            super::check_bounds(dst_offset, len, dst_buf.length() as usize)?;

            let command_buffer = command_queue.new_command_buffer();
            let blit = command_buffer.new_blit_command_encoder();
            blit.copy_from_buffer(
                src_buf,
                src_offset as u64,
                dst_buf,
                dst_offset as u64,
                len as u64,
            );
            blit.end_encoding();
            command_buffer.commit();
            command_buffer.wait_until_completed();
            Ok(())
        }

        fn submit_marker(&mut self, queue: QueueHandle) -> Result<MarkerHandle> {
            let nanos = self.epoch.elapsed().as_nanos() as u64;
            let id = self.next_marker;
            self.next_marker += 1;
            self.markers.insert(id, MarkerState { nanos, resolved: false });
            self.queues
                .get_mut(&queue.id())
                .ok_or(BackendError::UnknownQueue(queue))?
                .1
                .pending_markers
                .push(id);
            Ok(MarkerHandle::new(id))
        }

        fn synchronize(&mut self, queue: QueueHandle) -> Result<()> {
            let (_, state) = self
                .queues
                .get_mut(&queue.id())
                .ok_or(BackendError::UnknownQueue(queue))?;
            for id in std::mem::take(&mut state.pending_markers) {
                if let Some(marker) = self.markers.get_mut(&id) {
                    marker.resolved = true;
                }
            }
            Ok(())
        }

        fn marker_timestamp(&self, marker: MarkerHandle) -> Result<Option<u64>> {
            let state = self
                .markers
                .get(&marker.id())
                .ok_or(BackendError::UnknownMarker(marker))?;
            Ok(state.resolved.then_some(state.nanos))
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }
}

#[cfg(target_vendor = "apple")]
pub use real::MetalBackend;

#[cfg(target_vendor = "apple")]
pub fn enumerate() -> Vec<DeviceDescriptor> {
    real::enumerate()
}

/// Open the system GPU as a boxed backend
#[cfg(target_vendor = "apple")]
pub fn open() -> Result<Box<dyn Backend + Send>> {
    Ok(Box::new(real::MetalBackend::new()?))
}

#[cfg(not(target_vendor = "apple"))]
pub fn open() -> Result<Box<dyn Backend + Send>> {
    Err(BackendError::NotSupported {
        backend: "metal",
        what: "non-Apple targets".to_string(),
    })
}

#[cfg(target_vendor = "apple")]
fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or(BackendError::CopyOutOfRange { offset, len, size })?;
    if end > size {
        return Err(BackendError::CopyOutOfRange { offset, len, size });
    }
    Ok(())
}

// Stub on non-Apple targets: no devices, explicit error on open
#[cfg(not(target_vendor = "apple"))]
pub struct MetalBackend;

#[cfg(not(target_vendor = "apple"))]
impl MetalBackend {
    pub fn new() -> Result<Self> {
        Err(BackendError::NotSupported {
            backend: "metal",
            what: "non-Apple targets".to_string(),
        })
    }

    pub fn is_available() -> bool {
        false
    }
}

#[cfg(not(target_vendor = "apple"))]
pub fn enumerate() -> Vec<DeviceDescriptor> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_vendor = "apple"))]
    #[test]
    fn test_stub_reports_not_supported() {
        assert!(!MetalBackend::is_available());
        assert!(enumerate().is_empty());
        assert!(matches!(
            MetalBackend::new(),
            Err(BackendError::NotSupported { backend: "metal", .. })
        ));
        assert!(matches!(
            open(),
            Err(BackendError::NotSupported { backend: "metal", .. })
        ));
    }

    #[cfg(target_vendor = "apple")]
    #[test]
    fn test_enumerate_reports_system_device() {
        if !MetalBackend::is_available() {
            return;
        }
        let devices = enumerate();
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].name.is_empty());
    }
}
