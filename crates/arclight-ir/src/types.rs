//! Scalar element types
//!
//! Every typed operation in the IR carries its element type explicitly.
//! `ScalarType` is always concrete; `ElemType` additionally admits a single
//! generic placeholder that must be specialized away before intrinsic
//! matching (the pipeline rejects unspecialized kernels).

use std::fmt;

/// Concrete element type of a value or buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScalarType {
    // Signed integers
    I8,
    I16,
    I32,
    I64,

    // Unsigned integers
    U8,
    U16,
    U32,
    U64,

    // Floating point
    F16,  // IEEE 754 half precision
    BF16, // Brain floating point 16
    F32,  // IEEE 754 single precision
    F64,  // IEEE 754 double precision
}

impl ScalarType {
    /// Size of this type in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 | ScalarType::F16 | ScalarType::BF16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    /// Is this an integer type?
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarType::I8
                | ScalarType::I16
                | ScalarType::I32
                | ScalarType::I64
                | ScalarType::U8
                | ScalarType::U16
                | ScalarType::U32
                | ScalarType::U64
        )
    }

    /// Is this a floating-point type?
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            ScalarType::F16 | ScalarType::BF16 | ScalarType::F32 | ScalarType::F64
        )
    }

    /// Is this a signed type (signed integer or float)?
    pub const fn is_signed(self) -> bool {
        !self.is_unsigned()
    }

    /// Is this an unsigned integer type?
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarType::U8 | ScalarType::U16 | ScalarType::U32 | ScalarType::U64
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::U8 => "u8",
            ScalarType::U16 => "u16",
            ScalarType::U32 => "u32",
            ScalarType::U64 => "u64",
            ScalarType::F16 => "f16",
            ScalarType::BF16 => "bf16",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

/// Element type as it appears in a kernel definition
///
/// A kernel may be written once over a generic element type and specialized
/// to a concrete `ScalarType` at compile time. Specialization happens before
/// intrinsic matching: the matcher only ever sees concrete types, and an
/// `i32` registration never matches an `i64` use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ElemType {
    /// A concrete scalar type
    Scalar(ScalarType),
    /// The kernel's single generic type parameter, resolved by specialization
    Generic,
}

impl ElemType {
    /// The concrete type, if already specialized
    pub const fn concrete(self) -> Option<ScalarType> {
        match self {
            ElemType::Scalar(ty) => Some(ty),
            ElemType::Generic => None,
        }
    }

    /// True if this is the generic placeholder
    pub const fn is_generic(self) -> bool {
        matches!(self, ElemType::Generic)
    }
}

impl From<ScalarType> for ElemType {
    fn from(ty: ScalarType) -> Self {
        ElemType::Scalar(ty)
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemType::Scalar(ty) => write!(f, "{ty}"),
            ElemType::Generic => write!(f, "T"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_sizes() {
        assert_eq!(ScalarType::U8.size_bytes(), 1);
        assert_eq!(ScalarType::F16.size_bytes(), 2);
        assert_eq!(ScalarType::F32.size_bytes(), 4);
        assert_eq!(ScalarType::I64.size_bytes(), 8);
    }

    #[test]
    fn test_scalar_type_classes() {
        assert!(ScalarType::I32.is_integer());
        assert!(ScalarType::I32.is_signed());
        assert!(ScalarType::U32.is_unsigned());
        assert!(!ScalarType::U32.is_signed());
        assert!(ScalarType::F32.is_float());
        assert!(ScalarType::F32.is_signed());
        assert!(ScalarType::BF16.is_float());
    }

    #[test]
    fn test_scalar_type_display() {
        assert_eq!(ScalarType::F32.to_string(), "f32");
        assert_eq!(ScalarType::BF16.to_string(), "bf16");
        assert_eq!(ScalarType::U64.to_string(), "u64");
    }

    #[test]
    fn test_elem_type_specialization_state() {
        assert_eq!(ElemType::Scalar(ScalarType::F32).concrete(), Some(ScalarType::F32));
        assert_eq!(ElemType::Generic.concrete(), None);
        assert!(ElemType::Generic.is_generic());
        assert_eq!(ElemType::Generic.to_string(), "T");
    }
}
