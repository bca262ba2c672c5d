//! Strided, non-owning views over buffers
//!
//! A [`StrideDescriptor`] maps an N-dimensional logical index to a linear
//! element offset: each dimension's index is multiplied by its stride and the
//! products are summed onto a base offset. Dense row-major layouts are the
//! default; transposes, column slices, and padded rows fall out of custom
//! strides. A [`BufferView`] pairs a descriptor with a borrowed buffer and
//! does element-indexed host transfers through it.

use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// N-dimensional index mapping: `base + Σ index[i] * strides[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrideDescriptor {
    base: usize,
    extents: Vec<usize>,
    strides: Vec<usize>,
}

impl StrideDescriptor {
    /// Custom layout from explicit per-dimension strides
    ///
    /// `extents` and `strides` must have the same rank.
    pub fn new(base: usize, extents: Vec<usize>, strides: Vec<usize>) -> Result<Self> {
        if extents.len() != strides.len() {
            return Err(Error::InvalidArgument(format!(
                "stride descriptor rank mismatch: {} extents, {} strides",
                extents.len(),
                strides.len()
            )));
        }
        Ok(Self {
            base,
            extents,
            strides,
        })
    }

    /// Dense row-major layout: the last dimension is contiguous
    pub fn dense(extents: &[usize]) -> Self {
        let mut strides = vec![1usize; extents.len()];
        for i in (0..extents.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * extents[i + 1];
        }
        Self {
            base: 0,
            extents: extents.to_vec(),
            strides,
        }
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of addressable elements (product of extents)
    pub fn element_count(&self) -> usize {
        self.extents.iter().product()
    }

    /// Linear element offset of one logical index
    ///
    /// `None` when the rank is wrong or any coordinate is out of its extent.
    pub fn linear_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.extents.len() {
            return None;
        }
        let mut offset = self.base;
        for ((&i, &extent), &stride) in index.iter().zip(&self.extents).zip(&self.strides) {
            if i >= extent {
                return None;
            }
            offset += i * stride;
        }
        Some(offset)
    }

    /// Largest linear offset the descriptor can produce, if any element exists
    fn max_linear_index(&self) -> Option<usize> {
        if self.extents.iter().any(|&e| e == 0) {
            return None;
        }
        let mut offset = self.base;
        for (&extent, &stride) in self.extents.iter().zip(&self.strides) {
            offset += (extent - 1) * stride;
        }
        Some(offset)
    }
}

/// Non-owning indexed view over a [`Buffer`]
///
/// The view borrows the buffer, so it cannot outlive it; it holds no backend
/// resources of its own.
#[derive(Debug)]
pub struct BufferView<'a, T> {
    buffer: &'a Buffer<T>,
    desc: StrideDescriptor,
}

impl<'a, T: bytemuck::Pod> BufferView<'a, T> {
    pub(crate) fn new(buffer: &'a Buffer<T>, desc: StrideDescriptor) -> Result<Self> {
        if let Some(max) = desc.max_linear_index() {
            if max >= buffer.len() {
                return Err(Error::OutOfRange {
                    offset: max,
                    len: 1,
                    size: buffer.len(),
                });
            }
        }
        Ok(Self { buffer, desc })
    }

    pub fn descriptor(&self) -> &StrideDescriptor {
        &self.desc
    }

    pub fn extents(&self) -> &[usize] {
        self.desc.extents()
    }

    fn offset_of(&self, index: &[usize]) -> Result<usize> {
        self.desc.linear_index(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "index {index:?} outside view extents {:?}",
                self.desc.extents()
            ))
        })
    }

    /// Read one element (D2H)
    pub fn get(&self, index: &[usize]) -> Result<T> {
        let offset = self.offset_of(index)?;
        let mut out = [T::zeroed()];
        self.buffer.read_at(offset, &mut out)?;
        Ok(out[0])
    }

    /// Write one element (H2D)
    pub fn set(&self, index: &[usize], value: T) -> Result<()> {
        let offset = self.offset_of(index)?;
        self.buffer.write_at(offset, &[value])
    }
}
