//! Typed buffer views over backend-managed memory
//!
//! A [`Buffer<T>`] wraps a backend allocation and provides safe, typed host
//! transfers. `T` must be `bytemuck::Pod`, so any plain-old-data struct can
//! round-trip through device memory; element types that kernels can touch
//! additionally implement [`DeviceScalar`].

use crate::accelerator::Shared;
use crate::error::{Error, Result};
use arclight_backends::BufferHandle;
use arclight_ir::ScalarType;
use std::marker::PhantomData;
use std::sync::Arc;

/// Scalar types kernels operate on
///
/// The associated constant ties a Rust element type to its IR counterpart;
/// launch-time argument checks compare it against the kernel's parameter
/// list.
pub trait DeviceScalar: bytemuck::Pod {
    const SCALAR_TYPE: ScalarType;

    /// Bit pattern widened into the low bytes of a `u64`
    fn to_bits(self) -> u64 {
        let mut buf = [0u8; 8];
        let bytes = bytemuck::bytes_of(&self);
        buf[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(buf)
    }
}

macro_rules! device_scalar {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(impl DeviceScalar for $t {
            const SCALAR_TYPE: ScalarType = ScalarType::$v;
        })*
    };
}

device_scalar! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    half::f16 => F16,
    half::bf16 => BF16,
    f32 => F32,
    f64 => F64,
}

/// Typed handle to one device allocation
///
/// Dropping the buffer frees the allocation unless its accelerator was
/// disposed first, in which case the backend already released everything.
pub struct Buffer<T> {
    shared: Arc<Shared>,
    handle: BufferHandle,
    len: usize,
    released: bool,
    _phantom: PhantomData<T>,
}

impl<T: bytemuck::Pod> Buffer<T> {
    pub(crate) fn new(shared: Arc<Shared>, handle: BufferHandle, len: usize) -> Self {
        Self {
            shared,
            handle,
            len,
            released: false,
            _phantom: PhantomData,
        }
    }

    /// Number of `T` elements
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    pub fn size_bytes(&self) -> usize {
        self.len * self.element_size()
    }

    pub(crate) fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub(crate) fn accelerator_id(&self) -> u64 {
        self.shared.id
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).ok_or(Error::OutOfRange {
            offset,
            len,
            size: self.len,
        })?;
        if end > self.len {
            return Err(Error::OutOfRange {
                offset,
                len,
                size: self.len,
            });
        }
        Ok(())
    }

    /// Copy a whole host slice into the buffer (H2D)
    #[tracing::instrument(skip_all, fields(
        buffer = %self.handle,
        bytes = std::mem::size_of_val(src),
        type_name = std::any::type_name::<T>()
    ))]
    pub fn copy_from_slice(&self, src: &[T]) -> Result<()> {
        if src.len() != self.len {
            return Err(Error::SizeMismatch {
                expected: self.len,
                actual: src.len(),
            });
        }
        self.write_at(0, src)
    }

    /// Copy a host slice into the buffer starting at element `offset`
    pub fn write_at(&self, offset: usize, src: &[T]) -> Result<()> {
        self.check_range(offset, src.len())?;
        self.shared.backend()?.write_buffer(
            self.handle,
            offset * self.element_size(),
            bytemuck::cast_slice(src),
        )?;
        Ok(())
    }

    /// Copy the whole buffer into a host slice (D2H)
    pub fn copy_to_slice(&self, dst: &mut [T]) -> Result<()> {
        if dst.len() != self.len {
            return Err(Error::SizeMismatch {
                expected: self.len,
                actual: dst.len(),
            });
        }
        self.read_at(0, dst)
    }

    /// Copy `dst.len()` elements starting at element `offset` to the host
    pub fn read_at(&self, offset: usize, dst: &mut [T]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        self.shared.backend()?.read_buffer(
            self.handle,
            offset * self.element_size(),
            bytemuck::cast_slice_mut(dst),
        )?;
        Ok(())
    }

    /// Read the whole buffer into a fresh `Vec` (D2H)
    #[tracing::instrument(skip_all, fields(
        buffer = %self.handle,
        bytes = self.size_bytes(),
        type_name = std::any::type_name::<T>()
    ))]
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.len];
        self.read_at(0, &mut out)?;
        Ok(out)
    }

    /// Copy this buffer's contents into `dst`
    ///
    /// On the same accelerator this is a device-side copy. Across
    /// accelerators the data is staged through host memory.
    #[tracing::instrument(skip_all, fields(
        src = %self.handle,
        bytes = self.size_bytes(),
        cross = self.shared.id != dst.shared.id
    ))]
    pub fn copy_to(&self, dst: &Buffer<T>) -> Result<()> {
        if dst.len != self.len {
            return Err(Error::SizeMismatch {
                expected: self.len,
                actual: dst.len,
            });
        }
        if Arc::ptr_eq(&self.shared, &dst.shared) {
            let queue = self.shared.default_queue;
            let mut backend = self.shared.backend()?;
            backend.submit_copy(queue, self.handle, 0, dst.handle, 0, self.size_bytes())?;
            backend.synchronize(queue)?;
            Ok(())
        } else {
            // Host-staged path; the two backends never see each other
            let staged = self.to_vec()?;
            dst.copy_from_slice(&staged)
        }
    }

    /// Strided view over this buffer
    ///
    /// Fails with [`Error::OutOfRange`] if the descriptor can reach past the
    /// buffer's end. The caller must not free in-flight work referencing the
    /// buffer while reading through the view.
    pub fn view(&self, desc: crate::view::StrideDescriptor) -> Result<crate::view::BufferView<'_, T>> {
        crate::view::BufferView::new(self, desc)
    }

    /// Dense row-major 2D view of `rows` × `cols` elements
    pub fn view_2d(&self, rows: usize, cols: usize) -> Result<crate::view::BufferView<'_, T>> {
        self.view(crate::view::StrideDescriptor::dense(&[rows, cols]))
    }

    /// Dense row-major 3D view of `depth` × `rows` × `cols` elements
    pub fn view_3d(
        &self,
        depth: usize,
        rows: usize,
        cols: usize,
    ) -> Result<crate::view::BufferView<'_, T>> {
        self.view(crate::view::StrideDescriptor::dense(&[depth, rows, cols]))
    }

}

impl<T> Buffer<T> {
    /// Release the allocation now instead of at drop
    ///
    /// Idempotent; later calls and the eventual drop are no-ops. The caller
    /// must synchronize any stream still referencing the buffer first.
    pub fn dispose(&mut self) {
        if !self.released {
            self.released = true;
            if let Ok(mut backend) = self.shared.backend() {
                let _ = backend.free_buffer(self.handle);
            }
        }
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::Accelerator;

    #[test]
    fn test_roundtrip_f32() {
        let accel = Accelerator::cpu().unwrap();
        let data: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
        let buf = accel.from_slice(&data).unwrap();
        assert_eq!(buf.len(), 64);
        assert_eq!(buf.size_bytes(), 256);
        assert_eq!(buf.to_vec().unwrap(), data);
    }

    #[test]
    fn test_ranged_write_and_read() {
        let accel = Accelerator::cpu().unwrap();
        let buf = accel.from_slice(&[0u32; 8]).unwrap();
        buf.write_at(4, &[7, 8, 9]).unwrap();

        let mut tail = [0u32; 4];
        buf.read_at(4, &mut tail).unwrap();
        assert_eq!(tail, [7, 8, 9, 0]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let accel = Accelerator::cpu().unwrap();
        let buf = accel.alloc::<u32>(8).unwrap();
        let err = buf.write_at(6, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRange {
                offset: 6,
                len: 3,
                size: 8
            }
        ));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let accel = Accelerator::cpu().unwrap();
        let buf = accel.alloc::<f32>(8).unwrap();
        assert!(matches!(
            buf.copy_from_slice(&[1.0f32; 4]),
            Err(Error::SizeMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_custom_pod_struct_roundtrips() {
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        struct Particle {
            position: [f32; 3],
            mass: f32,
        }

        let accel = Accelerator::cpu().unwrap();
        let particles = vec![
            Particle {
                position: [1.0, 2.0, 3.0],
                mass: 0.5,
            },
            Particle {
                position: [-1.0, 0.0, 4.0],
                mass: 2.0,
            },
        ];
        let buf = accel.from_slice(&particles).unwrap();
        assert_eq!(buf.to_vec().unwrap(), particles);
    }

    #[test]
    fn test_copy_between_buffers_same_device() {
        let accel = Accelerator::cpu().unwrap();
        let src = accel.from_slice(&[1i64, 2, 3, 4]).unwrap();
        let dst = accel.alloc::<i64>(4).unwrap();
        src.copy_to(&dst).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_between_accelerators_stages_through_host() {
        let a = Accelerator::cpu().unwrap();
        let b = Accelerator::cpu().unwrap();
        let src = a.from_slice(&[9u16, 8, 7]).unwrap();
        let dst = b.alloc::<u16>(3).unwrap();
        src.copy_to(&dst).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_operations_fail_after_dispose() {
        let accel = Accelerator::cpu().unwrap();
        let buf = accel.from_slice(&[1.0f32]).unwrap();
        accel.dispose();
        assert!(matches!(buf.to_vec(), Err(Error::Disposed(_))));
    }
}
