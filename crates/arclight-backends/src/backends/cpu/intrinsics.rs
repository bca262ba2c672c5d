//! CPU intrinsic coverage table
//!
//! The interpreter evaluates operations directly, so every entry here is a
//! `Redirect` carrying the operation mnemonic; what the table contributes is
//! coverage. Pipeline matching consults it exactly like a source backend's
//! table, so a kernel using an unsupported pair (`sin` over `i32`) fails at
//! compile time on the CPU too, not just on GPUs.

use arclight_codegen::{IntrinsicImpl, IntrinsicTable, Result};
use arclight_ir::{OpKind, ScalarType};
use std::sync::OnceLock;

const ALL_TYPES: &[ScalarType] = &[
    ScalarType::I8,
    ScalarType::I16,
    ScalarType::I32,
    ScalarType::I64,
    ScalarType::U8,
    ScalarType::U16,
    ScalarType::U32,
    ScalarType::U64,
    ScalarType::F16,
    ScalarType::BF16,
    ScalarType::F32,
    ScalarType::F64,
];

const SIGNED_AND_FLOAT: &[ScalarType] = &[
    ScalarType::I8,
    ScalarType::I16,
    ScalarType::I32,
    ScalarType::I64,
    ScalarType::F16,
    ScalarType::BF16,
    ScalarType::F32,
    ScalarType::F64,
];

const FLOAT_TYPES: &[ScalarType] = &[
    ScalarType::F16,
    ScalarType::BF16,
    ScalarType::F32,
    ScalarType::F64,
];

fn build() -> Result<IntrinsicTable> {
    let mut t = IntrinsicTable::new("cpu");

    for op in [
        OpKind::Add,
        OpKind::Sub,
        OpKind::Mul,
        OpKind::Div,
        OpKind::Rem,
        OpKind::Min,
        OpKind::Max,
        OpKind::Abs,
        OpKind::MulAdd,
    ] {
        for &ty in ALL_TYPES {
            t.register(op, ty, IntrinsicImpl::Redirect(op.mnemonic()))?;
        }
    }
    for &ty in SIGNED_AND_FLOAT {
        t.register(OpKind::Neg, ty, IntrinsicImpl::Redirect(OpKind::Neg.mnemonic()))?;
    }
    for op in [
        OpKind::Sqrt,
        OpKind::Rsqrt,
        OpKind::Sin,
        OpKind::Cos,
        OpKind::Tan,
        OpKind::Exp,
        OpKind::Log,
        OpKind::Pow,
        OpKind::Floor,
        OpKind::Ceil,
        OpKind::Round,
        OpKind::Tanh,
    ] {
        for &ty in FLOAT_TYPES {
            t.register(op, ty, IntrinsicImpl::Redirect(op.mnemonic()))?;
        }
    }
    for op in [
        OpKind::GroupReduceAdd,
        OpKind::GroupReduceMin,
        OpKind::GroupReduceMax,
        OpKind::WarpShuffle,
        OpKind::WarpShuffleDown,
    ] {
        for &ty in ALL_TYPES {
            t.register(op, ty, IntrinsicImpl::Redirect(op.mnemonic()))?;
        }
    }
    for op in [
        OpKind::Barrier,
        OpKind::GlobalId,
        OpKind::LocalId,
        OpKind::GroupId,
        OpKind::GroupDim,
        OpKind::GridDim,
    ] {
        t.register(op, ScalarType::U32, IntrinsicImpl::Redirect(op.mnemonic()))?;
    }

    Ok(t)
}

/// Shared CPU table, built once on first use
pub(crate) fn intrinsic_table() -> &'static IntrinsicTable {
    static TABLE: OnceLock<IntrinsicTable> = OnceLock::new();
    TABLE.get_or_init(|| build().expect("cpu intrinsic registrations never collide"))
}
