//! Hardware architecture classification
//!
//! Raw identifiers reported by drivers (CUDA compute capability, Metal GPU
//! family) are mapped to named generations. Classification is total: an
//! identifier newer or stranger than this table falls into an `Unknown`
//! variant carrying the raw value, never an error, so the runtime keeps
//! working on hardware released after this crate was.

use std::fmt;

/// NVIDIA GPU generation, classified from the compute capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CudaArch {
    Maxwell,
    Pascal,
    Volta,
    Turing,
    Ampere,
    Ada,
    Hopper,
    Blackwell,
    /// Compute capability outside the known table
    Unknown { major: u32, minor: u32 },
}

impl CudaArch {
    /// Classify a `(major, minor)` compute capability
    pub const fn classify(major: u32, minor: u32) -> Self {
        match (major, minor) {
            (5, _) => CudaArch::Maxwell,
            (6, _) => CudaArch::Pascal,
            (7, 0) | (7, 2) => CudaArch::Volta,
            (7, 5) => CudaArch::Turing,
            (8, 0) | (8, 6) | (8, 7) => CudaArch::Ampere,
            (8, 9) => CudaArch::Ada,
            (9, _) => CudaArch::Hopper,
            (10, _) | (12, _) => CudaArch::Blackwell,
            (major, minor) => CudaArch::Unknown { major, minor },
        }
    }

    /// True for generations with hardware tensor cores
    pub const fn has_tensor_cores(self) -> bool {
        !matches!(self, CudaArch::Maxwell | CudaArch::Pascal | CudaArch::Unknown { .. })
    }
}

impl fmt::Display for CudaArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CudaArch::Maxwell => write!(f, "maxwell"),
            CudaArch::Pascal => write!(f, "pascal"),
            CudaArch::Volta => write!(f, "volta"),
            CudaArch::Turing => write!(f, "turing"),
            CudaArch::Ampere => write!(f, "ampere"),
            CudaArch::Ada => write!(f, "ada"),
            CudaArch::Hopper => write!(f, "hopper"),
            CudaArch::Blackwell => write!(f, "blackwell"),
            CudaArch::Unknown { major, minor } => write!(f, "sm_{major}{minor}"),
        }
    }
}

/// Apple GPU family, classified from the Metal family query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MetalFamily {
    /// A14 / M1 generation
    Apple7,
    /// A15-A16 / M2 generation
    Apple8,
    /// A17 / M3-M4 generation
    Apple9,
    /// Intel-era Mac GPUs
    Mac2,
    /// Family identifier outside the known table
    Unknown(u32),
}

impl MetalFamily {
    /// Classify a raw `MTLGPUFamily` identifier
    pub const fn classify(raw: u32) -> Self {
        match raw {
            1007 => MetalFamily::Apple7,
            1008 => MetalFamily::Apple8,
            1009 => MetalFamily::Apple9,
            2002 => MetalFamily::Mac2,
            other => MetalFamily::Unknown(other),
        }
    }

    /// True for Apple-silicon families with unified memory
    pub const fn has_unified_memory(self) -> bool {
        matches!(self, MetalFamily::Apple7 | MetalFamily::Apple8 | MetalFamily::Apple9)
    }
}

impl fmt::Display for MetalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetalFamily::Apple7 => write!(f, "apple7"),
            MetalFamily::Apple8 => write!(f, "apple8"),
            MetalFamily::Apple9 => write!(f, "apple9"),
            MetalFamily::Mac2 => write!(f, "mac2"),
            MetalFamily::Unknown(raw) => write!(f, "family_{raw}"),
        }
    }
}

/// Architecture of one device, across backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceArch {
    /// Host CPU
    Host,
    Cuda(CudaArch),
    Metal(MetalFamily),
}

impl fmt::Display for DeviceArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceArch::Host => write!(f, "host"),
            DeviceArch::Cuda(arch) => write!(f, "{arch}"),
            DeviceArch::Metal(family) => write!(f, "{family}"),
        }
    }
}
