//! Handles and launch configuration shared by all backends

use arclight_ir::ScalarType;
use std::fmt;

/// Handle to a device buffer
///
/// Buffers are opaque handles managed by the backend; all access goes through
/// `Backend` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to a compiled kernel held by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

impl KernelHandle {
    pub const fn new(id: u64) -> Self {
        KernelHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kern{}", self.0)
    }
}

/// Handle to a submission queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

impl QueueHandle {
    pub const fn new(id: u64) -> Self {
        QueueHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue{}", self.0)
    }
}

/// Handle to a profiling marker recorded on a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerHandle(pub u64);

impl MarkerHandle {
    pub const fn new(id: u64) -> Self {
        MarkerHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MarkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker{}", self.0)
    }
}

/// Grid dimensions for a kernel launch (number of groups per axis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDim {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// 1D grid
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Total number of groups
    pub const fn total_groups(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for GridDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Group dimensions (number of lanes per group per axis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupDim {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// 1D group
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Total number of lanes per group
    pub const fn total_lanes(&self) -> u32 {
        self.x * self.y * self.z
    }
}

impl Default for GroupDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GroupDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Launch configuration: the grid × group iteration space of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: GridDim,
    pub group: GroupDim,
}

impl LaunchConfig {
    pub const fn new(grid: GridDim, group: GroupDim) -> Self {
        Self { grid, group }
    }

    /// 1D launch covering `total_elements` with groups of `group_size` lanes
    pub const fn linear(total_elements: u32, group_size: u32) -> Self {
        let groups = total_elements.div_ceil(group_size);
        Self {
            grid: GridDim::linear(groups),
            group: GroupDim::linear(group_size),
        }
    }

    pub const fn total_groups(&self) -> u64 {
        self.grid.total_groups()
    }

    pub const fn total_lanes(&self) -> u64 {
        self.grid.total_groups() * self.group.total_lanes() as u64
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid={}, group={}", self.grid, self.group)
    }
}

/// A scalar launch argument, carried as raw bits plus its element type
///
/// The bit pattern uses the natural encoding of the type widened into the low
/// bits of a `u64` (two's-complement for signed integers, IEEE bits for
/// floats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarValue {
    pub ty: ScalarType,
    pub bits: u64,
}

impl ScalarValue {
    pub fn from_i64(ty: ScalarType, v: i64) -> Self {
        Self { ty, bits: v as u64 }
    }

    pub fn from_u64(ty: ScalarType, v: u64) -> Self {
        Self { ty, bits: v }
    }

    pub fn from_f32(v: f32) -> Self {
        Self {
            ty: ScalarType::F32,
            bits: v.to_bits() as u64,
        }
    }

    pub fn from_f64(v: f64) -> Self {
        Self {
            ty: ScalarType::F64,
            bits: v.to_bits(),
        }
    }

    /// Little-endian bytes of the value at its natural width
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_le_bytes()[..self.ty.size_bytes()].to_vec()
    }
}

/// One positional launch argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchArg {
    Buffer(BufferHandle),
    Scalar(ScalarValue),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_display() {
        assert_eq!(BufferHandle::new(42).to_string(), "buf42");
        assert_eq!(QueueHandle::new(7).to_string(), "queue7");
        assert_eq!(MarkerHandle::new(3).to_string(), "marker3");
        assert_eq!(KernelHandle::new(1).id(), 1);
    }

    #[test]
    fn test_launch_config_linear() {
        let config = LaunchConfig::linear(1000, 256);
        assert_eq!(config.grid.x, 4); // ceil(1000 / 256)
        assert_eq!(config.group.x, 256);
        assert_eq!(config.total_lanes(), 1024);
    }

    #[test]
    fn test_total_groups() {
        let grid = GridDim::new(2, 3, 4);
        assert_eq!(grid.total_groups(), 24);
        assert_eq!(GroupDim::new(8, 8, 1).total_lanes(), 64);
    }

    #[test]
    fn test_scalar_value_bytes() {
        let v = ScalarValue::from_u64(ScalarType::U32, 0x1234_5678);
        assert_eq!(v.to_bytes(), vec![0x78, 0x56, 0x34, 0x12]);

        let f = ScalarValue::from_f32(1.0);
        assert_eq!(f.to_bytes(), 1.0f32.to_le_bytes().to_vec());
    }
}
