//! CPU backend: interprets specialized kernel IR on host threads
//!
//! Always available. Compilation runs the shared lowering pipeline with an
//! `Interpret` target, so matching against the CPU intrinsic table happens
//! exactly as it would for a source backend; execution then interprets the
//! IR with rayon parallelism across groups.
//!
//! Queues execute inline at submission. Because each submission completes
//! before `submit_*` returns, per-queue FIFO ordering holds trivially and
//! `synchronize` only has to resolve profiling markers; the observable
//! behavior is as if the queue were asynchronous.

mod executor;
mod intrinsics;
mod memory;

use crate::backend::traits::Backend;
use crate::backend::types::{
    BufferHandle, KernelHandle, LaunchArg, LaunchConfig, MarkerHandle, QueueHandle,
};
use crate::device::{cpu_descriptor, DeviceDescriptor};
use crate::error::{BackendError, Result};
use arclight_codegen::{lower, CancellationToken, KernelArtifact, LowerTarget};
use arclight_ir::KernelDef;
use memory::CpuMemory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
struct QueueState {
    /// Markers submitted since the last synchronize
    pending_markers: Vec<u64>,
}

#[derive(Debug)]
struct MarkerState {
    nanos: u64,
    resolved: bool,
}

/// Host CPU backend
pub struct CpuBackend {
    descriptor: DeviceDescriptor,
    memory: CpuMemory,
    kernels: HashMap<u64, Arc<KernelDef>>,
    next_kernel: u64,
    queues: HashMap<u64, QueueState>,
    next_queue: u64,
    markers: HashMap<u64, MarkerState>,
    next_marker: u64,
    epoch: Instant,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            descriptor: cpu_descriptor(),
            memory: CpuMemory::new(),
            kernels: HashMap::new(),
            next_kernel: 0,
            queues: HashMap::new(),
            next_queue: 0,
            markers: HashMap::new(),
            next_marker: 0,
            epoch: Instant::now(),
        }
    }

    fn queue_mut(&mut self, queue: QueueHandle) -> Result<&mut QueueState> {
        self.queues
            .get_mut(&queue.id())
            .ok_or(BackendError::UnknownQueue(queue))
    }

    fn check_queue(&self, queue: QueueHandle) -> Result<()> {
        if self.queues.contains_key(&queue.id()) {
            Ok(())
        } else {
            Err(BackendError::UnknownQueue(queue))
        }
    }

    fn check_launch_limits(&self, config: &LaunchConfig) -> Result<()> {
        let group = config.group.total_lanes();
        if group == 0 || config.grid.total_groups() == 0 {
            return Err(BackendError::LaunchTooLarge(format!(
                "empty launch {config}"
            )));
        }
        if group > self.descriptor.max_group_size {
            return Err(BackendError::LaunchTooLarge(format!(
                "group of {group} lanes exceeds limit {}",
                self.descriptor.max_group_size
            )));
        }
        Ok(())
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.memory.allocate(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.free(handle)
    }

    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        self.memory.write(handle, offset, data)
    }

    fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
        self.memory.read(handle, offset, data)
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.memory.size(handle)
    }

    #[tracing::instrument(skip_all, fields(kernel = %def.name))]
    fn compile_kernel(&mut self, def: &KernelDef, cancel: &CancellationToken) -> Result<KernelHandle> {
        let artifact = lower(
            def.clone(),
            LowerTarget::Interpret,
            intrinsics::intrinsic_table(),
            cancel,
        )?;
        let KernelArtifact::Interpreted(def) = artifact else {
            return Err(BackendError::Execution(
                "interpret target produced a source artifact".to_string(),
            ));
        };
        let id = self.next_kernel;
        self.next_kernel += 1;
        self.kernels.insert(id, def);
        Ok(KernelHandle::new(id))
    }

    fn release_kernel(&mut self, handle: KernelHandle) -> Result<()> {
        self.kernels
            .remove(&handle.id())
            .map(|_| ())
            .ok_or(BackendError::UnknownKernel(handle))
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
        self.check_launch_limits(config)?;
        let def = self
            .kernels
            .get(&kernel.id())
            .cloned()
            .ok_or(BackendError::UnknownKernel(kernel))?;
        executor::execute(&def, config, args, &self.memory, self.descriptor.warp_size)
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
        self.memory.copy(src, src_offset, dst, dst_offset, len)
    }

    fn submit_marker(&mut self, queue: QueueHandle) -> Result<MarkerHandle> {
        self.check_queue(queue)?;
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        let id = self.next_marker;
        self.next_marker += 1;
        self.markers.insert(id, MarkerState { nanos, resolved: false });
        self.queue_mut(queue)?.pending_markers.push(id);
        Ok(MarkerHandle::new(id))
    }

    fn synchronize(&mut self, queue: QueueHandle) -> Result<()> {
        let pending = std::mem::take(&mut self.queue_mut(queue)?.pending_markers);
        for id in pending {
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
