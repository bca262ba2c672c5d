//! Host memory management for the CPU backend
//!
//! Buffers are plain byte vectors behind per-buffer locks, so kernel groups
//! interpreting in parallel can load and store concurrently while host copies
//! stay race free.

use crate::backend::types::BufferHandle;
use crate::error::{BackendError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type SharedBytes = Arc<RwLock<Vec<u8>>>;

#[derive(Debug, Default)]
pub(crate) struct CpuMemory {
    buffers: HashMap<u64, SharedBytes>,
    next_id: u64,
}

impl CpuMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, size: usize) -> Result<BufferHandle> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).map_err(|e| BackendError::OutOfMemory {
            requested: size,
            reason: e.to_string(),
        })?;
        bytes.resize(size, 0);

        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, Arc::new(RwLock::new(bytes)));
        tracing::trace!(handle = id, size, "cpu_buffer_allocated");
        Ok(BufferHandle::new(id))
    }

    pub fn free(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers
            .remove(&handle.id())
            .map(|_| ())
            .ok_or(BackendError::UnknownBuffer(handle))
    }

    pub fn get(&self, handle: BufferHandle) -> Result<SharedBytes> {
        self.buffers
            .get(&handle.id())
            .cloned()
            .ok_or(BackendError::UnknownBuffer(handle))
    }

    pub fn size(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.get(handle)?.read().len())
    }

    pub fn write(&self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let shared = self.get(handle)?;
        let mut bytes = shared.write();
        bounds_check(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
        let shared = self.get(handle)?;
        let bytes = shared.read();
        bounds_check(offset, data.len(), bytes.len())?;
        data.copy_from_slice(&bytes[offset..offset + data.len()]);
        Ok(())
    }

    pub fn copy(
        &self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        let src_shared = self.get(src)?;
        let dst_shared = self.get(dst)?;

        if Arc::ptr_eq(&src_shared, &dst_shared) {
            let mut bytes = dst_shared.write();
            bounds_check(src_offset, len, bytes.len())?;
            bounds_check(dst_offset, len, bytes.len())?;
            bytes.copy_within(src_offset..src_offset + len, dst_offset);
        } else {
            let src_bytes = src_shared.read();
            let mut dst_bytes = dst_shared.write();
            bounds_check(src_offset, len, src_bytes.len())?;
            bounds_check(dst_offset, len, dst_bytes.len())?;
            dst_bytes[dst_offset..dst_offset + len]
                .copy_from_slice(&src_bytes[src_offset..src_offset + len]);
        }
        Ok(())
    }
}

pub(crate) fn bounds_check(offset: usize, len: usize, size: usize) -> Result<()> {
    let end = offset.checked_add(len).ok_or(BackendError::CopyOutOfRange {
        offset,
        len,
        size,
    })?;
    if end > size {
        return Err(BackendError::CopyOutOfRange { offset, len, size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_write_read() {
        let mut mem = CpuMemory::new();
        let buf = mem.allocate(16).unwrap();
        mem.write(buf, 4, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        mem.read(buf, 4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(mem.size(buf).unwrap(), 16);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut mem = CpuMemory::new();
        let buf = mem.allocate(8).unwrap();
        let err = mem.write(buf, 6, &[0; 4]).unwrap_err();
        assert!(matches!(err, BackendError::CopyOutOfRange { offset: 6, len: 4, size: 8 }));
    }

    #[test]
    fn test_free_then_use_fails() {
        let mut mem = CpuMemory::new();
        let buf = mem.allocate(8).unwrap();
        mem.free(buf).unwrap();
        assert!(matches!(mem.size(buf), Err(BackendError::UnknownBuffer(_))));
        assert!(matches!(mem.free(buf), Err(BackendError::UnknownBuffer(_))));
    }

    #[test]
    fn test_copy_between_buffers() {
        let mut mem = CpuMemory::new();
        let a = mem.allocate(8).unwrap();
        let b = mem.allocate(8).unwrap();
        mem.write(a, 0, &[9; 8]).unwrap();
        mem.copy(a, 2, b, 4, 4).unwrap();

        let mut out = [0u8; 8];
        mem.read(b, 0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 9, 9, 9, 9]);
    }

    #[test]
    fn test_copy_within_one_buffer() {
        let mut mem = CpuMemory::new();
        let a = mem.allocate(8).unwrap();
        mem.write(a, 0, &[1, 2, 3, 4, 0, 0, 0, 0]).unwrap();
        mem.copy(a, 0, a, 4, 4).unwrap();

        let mut out = [0u8; 8];
        mem.read(a, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 1, 2, 3, 4]);
    }
}
