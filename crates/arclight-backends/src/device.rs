//! Device descriptors, capability queries, and enumeration
//!
//! A `DeviceDescriptor` is a plain snapshot of one device: identity, limits,
//! architecture, and capability set. Descriptors are cheap to clone and carry
//! no driver state; opening the device happens later, when a backend is
//! constructed from one.
//!
//! Capability queries are total: `supports` answers `true` or `false` for
//! every flag, including flags added after a backend was written (absent
//! means unsupported). Enumeration never fails either; a machine with no
//! GPUs yields the CPU device and nothing else.

use crate::arch::DeviceArch;
use crate::backend::Backend;
use crate::error::{BackendError, Result};
use std::collections::HashSet;
use std::fmt;

/// Backend kind a device is driven by
///
/// `OpenCl`, `Rocm`, and `OneApi` are recognized kinds without an execution
/// backend in this crate; enumeration reports no devices for them and
/// opening one fails with `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BackendKind {
    Cpu,
    Cuda,
    Metal,
    OpenCl,
    Rocm,
    OneApi,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Cuda => "cuda",
            BackendKind::Metal => "metal",
            BackendKind::OpenCl => "opencl",
            BackendKind::Rocm => "rocm",
            BackendKind::OneApi => "oneapi",
        };
        write!(f, "{s}")
    }
}

/// A queryable device capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CapabilityFlag {
    /// 16-bit IEEE float arithmetic
    Fp16,
    /// bfloat16 arithmetic
    Bf16,
    /// 64-bit float arithmetic
    Fp64,
    /// Group-wide reductions
    GroupReduce,
    /// Warp/subgroup shuffles
    WarpShuffle,
    /// Queue profiling markers with device timestamps
    ProfilingMarkers,
    /// Host and device share one address space
    UnifiedMemory,
    /// Cooperative cancellation of kernel compilation
    CompileCancellation,
}

/// Capability set of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    flags: HashSet<CapabilityFlag>,
}

impl Capabilities {
    pub fn new(flags: impl IntoIterator<Item = CapabilityFlag>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }

    /// Total query: every flag answers, absent means unsupported
    pub fn supports(&self, flag: CapabilityFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Snapshot of one enumerable device
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceDescriptor {
    /// Index within its backend kind (cuda:0, cuda:1, ...)
    pub index: u32,
    pub kind: BackendKind,
    /// Driver-reported device name
    pub name: String,
    pub arch: DeviceArch,
    /// Total device memory in bytes (0 when the platform does not report it)
    pub total_memory: u64,
    /// Maximum lanes per group
    pub max_group_size: u32,
    /// Maximum groups per grid axis
    pub max_grid_dim: [u32; 3],
    /// Hardware warp/subgroup width
    pub warp_size: u32,
    pub capabilities: Capabilities,
}

impl DeviceDescriptor {
    /// Total capability query, see [`Capabilities::supports`]
    pub fn supports(&self, flag: CapabilityFlag) -> bool {
        self.capabilities.supports(flag)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {} ({})", self.kind, self.index, self.name, self.arch)
    }
}

/// Descriptor for the host CPU device
///
/// Always present; limits come from the interpreter, memory from the
/// platform where it is reported.
pub fn cpu_descriptor() -> DeviceDescriptor {
    let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    DeviceDescriptor {
        index: 0,
        kind: BackendKind::Cpu,
        name: format!("Host CPU ({threads} threads)"),
        arch: DeviceArch::Host,
        total_memory: host_memory_bytes(),
        max_group_size: arclight_codegen::lower::MAX_GROUP_SIZE,
        max_grid_dim: [u32::MAX, u16::MAX as u32, u16::MAX as u32],
        warp_size: 32,
        capabilities: Capabilities::new([
            CapabilityFlag::Fp16,
            CapabilityFlag::Bf16,
            CapabilityFlag::Fp64,
            CapabilityFlag::GroupReduce,
            CapabilityFlag::WarpShuffle,
            CapabilityFlag::ProfilingMarkers,
            CapabilityFlag::UnifiedMemory,
            CapabilityFlag::CompileCancellation,
        ]),
    }
}

#[cfg(target_os = "linux")]
fn host_memory_bytes() -> u64 {
    // MemTotal is reported in kB
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| {
            text.lines().find_map(|line| {
                let rest = line.strip_prefix("MemTotal:")?;
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                Some(kb * 1024)
            })
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn host_memory_bytes() -> u64 {
    0
}

/// Enumerate every device visible to this process
///
/// The CPU device is always first; GPU devices follow in driver order.
/// Enumeration is infallible: probe failures log and yield nothing.
#[tracing::instrument]
pub fn enumerate() -> Vec<DeviceDescriptor> {
    let mut devices = vec![cpu_descriptor()];
    devices.extend(crate::backends::cuda::enumerate());
    devices.extend(crate::backends::metal::enumerate());
    tracing::debug!(count = devices.len(), "devices_enumerated");
    devices
}

/// Devices of one backend kind, in driver order
pub fn enumerate_kind(kind: BackendKind) -> Vec<DeviceDescriptor> {
    enumerate().into_iter().filter(|d| d.kind == kind).collect()
}

/// First device of the given kind, if any is present
pub fn select_device(kind: BackendKind) -> Option<DeviceDescriptor> {
    enumerate_kind(kind).into_iter().next()
}

/// Construct the execution backend a descriptor points at
///
/// CPU always succeeds. CUDA and Metal require a build carrying the backend
/// and a present device; the kinds without an execution backend fail with
/// [`BackendError::NotSupported`].
pub fn open_device(descriptor: &DeviceDescriptor) -> Result<Box<dyn Backend + Send>> {
    match descriptor.kind {
        BackendKind::Cpu => Ok(Box::new(crate::backends::cpu::CpuBackend::new())),
        BackendKind::Cuda => crate::backends::cuda::open(descriptor.index as usize),
        BackendKind::Metal => crate::backends::metal::open(),
        kind @ (BackendKind::OpenCl | BackendKind::Rocm | BackendKind::OneApi) => {
            Err(BackendError::NotSupported {
                backend: match kind {
                    BackendKind::OpenCl => "opencl",
                    BackendKind::Rocm => "rocm",
                    _ => "oneapi",
                },
                what: "device execution in this build".to_string(),
            })
        }
    }
}
