//! MSL intrinsic table
//!
//! Math functions in the Metal Standard Library are overloaded, so one
//! redirect symbol covers `half` and `float` alike. Thread-position queries
//! read the attributed builtin parameters the emitter appends to the kernel
//! signature. `double` never appears here: MSL has no 64-bit float, and the
//! emitter rejects it before the table is consulted.
//!
//! Compiled on every platform so MSL source can be produced anywhere; only
//! dispatch needs an Apple target.

use arclight_codegen::{CodegenError, IntrinsicCall, IntrinsicTable, Result};
use arclight_ir::{OpKind, ScalarType};
use std::sync::OnceLock;

const INT_TYPES: &[ScalarType] = &[
    ScalarType::I8,
    ScalarType::I16,
    ScalarType::I32,
    ScalarType::I64,
    ScalarType::U8,
    ScalarType::U16,
    ScalarType::U32,
    ScalarType::U64,
];

// bfloat has operators but not the full math library
const ARITH_FLOAT_TYPES: &[ScalarType] = &[ScalarType::F16, ScalarType::BF16, ScalarType::F32];
const MATH_FLOAT_TYPES: &[ScalarType] = &[ScalarType::F16, ScalarType::F32];

// simd_shuffle is defined for 32-bit scalars and half
const SHUFFLE_TYPES: &[ScalarType] = &[
    ScalarType::I32,
    ScalarType::U32,
    ScalarType::F16,
    ScalarType::F32,
];

fn infix(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let sym = match c.op {
        OpKind::Add => "+",
        OpKind::Sub => "-",
        OpKind::Mul => "*",
        OpKind::Div => "/",
        OpKind::Rem => "%",
        other => return Err(CodegenError::Emit(format!("{other} is not an infix operation"))),
    };
    Ok(format!("({} {sym} {})", c.args[0], c.args[1]))
}

fn neg(c: &mut IntrinsicCall<'_>) -> Result<String> {
    Ok(format!("(-{})", c.args[0]))
}

fn index_query(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let axis = c.args[0].as_str();
    let base = match c.op {
        OpKind::GlobalId => "__gid",
        OpKind::LocalId => "__lid",
        OpKind::GroupId => "__grp",
        OpKind::GroupDim => "__gdim",
        OpKind::GridDim => "__ngrp",
        other => return Err(CodegenError::Emit(format!("{other} is not an index query"))),
    };
    Ok(format!("{base}.{axis}"))
}

fn barrier(_c: &mut IntrinsicCall<'_>) -> Result<String> {
    Ok("threadgroup_barrier(mem_flags::mem_threadgroup)".to_string())
}

fn shuffle(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let (v, lane) = (&c.args[0], &c.args[1]);
    match c.op {
        OpKind::WarpShuffle => Ok(format!("simd_shuffle({v}, (ushort){lane})")),
        OpKind::WarpShuffleDown => Ok(format!("simd_shuffle_down({v}, (ushort){lane})")),
        other => Err(CodegenError::Emit(format!("{other} is not a shuffle"))),
    }
}

fn combine_expr(op: OpKind, a: &str, b: &str) -> Result<String> {
    let text = match op {
        OpKind::GroupReduceAdd => format!("{a} + {b}"),
        OpKind::GroupReduceMin => format!("min({a}, {b})"),
        OpKind::GroupReduceMax => format!("max({a}, {b})"),
        other => return Err(CodegenError::Emit(format!("{other} is not a reduction"))),
    };
    Ok(text)
}

fn group_reduce(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let (dest, src, scratch) = (&c.args[0], &c.args[1], &c.args[2]);
    let combine = combine_expr(c.op, &format!("{scratch}[0]"), &format!("{scratch}[__i]"))?;
    Ok(format!(
        "{scratch}[__lid.x] = {src};\n\
         threadgroup_barrier(mem_flags::mem_threadgroup);\n\
         if (__lid.x == 0) {{\n\
         \x20   for (uint __i = 1; __i < __gdim.x; __i++) {scratch}[0] = {combine};\n\
         }}\n\
         threadgroup_barrier(mem_flags::mem_threadgroup);\n\
         {dest} = {scratch}[0];"
    ))
}

fn build() -> Result<IntrinsicTable> {
    let mut t = IntrinsicTable::new("msl");

    for op in [OpKind::Add, OpKind::Sub, OpKind::Mul, OpKind::Div] {
        t.generate_all(op, INT_TYPES, infix)?;
        t.generate_all(op, ARITH_FLOAT_TYPES, infix)?;
    }
    t.generate_all(OpKind::Rem, INT_TYPES, infix)?;
    t.redirect_all(OpKind::Rem, MATH_FLOAT_TYPES, "fmod")?;

    // min/max/abs are overloaded across integer and float types
    t.redirect_all(OpKind::Min, INT_TYPES, "min")?;
    t.redirect_all(OpKind::Min, MATH_FLOAT_TYPES, "min")?;
    t.redirect_all(OpKind::Max, INT_TYPES, "max")?;
    t.redirect_all(OpKind::Max, MATH_FLOAT_TYPES, "max")?;
    t.redirect_all(OpKind::Abs, INT_TYPES, "abs")?;
    t.redirect_all(OpKind::Abs, MATH_FLOAT_TYPES, "abs")?;
    t.generate_all(
        OpKind::Neg,
        &[ScalarType::I8, ScalarType::I16, ScalarType::I32, ScalarType::I64],
        neg,
    )?;
    t.generate_all(OpKind::Neg, ARITH_FLOAT_TYPES, neg)?;

    t.redirect_all(OpKind::MulAdd, MATH_FLOAT_TYPES, "fma")?;
    for (op, name) in [
        (OpKind::Sqrt, "sqrt"),
        (OpKind::Rsqrt, "rsqrt"),
        (OpKind::Sin, "sin"),
        (OpKind::Cos, "cos"),
        (OpKind::Tan, "tan"),
        (OpKind::Exp, "exp"),
        (OpKind::Log, "log"),
        (OpKind::Pow, "pow"),
        (OpKind::Floor, "floor"),
        (OpKind::Ceil, "ceil"),
        (OpKind::Round, "round"),
        (OpKind::Tanh, "tanh"),
    ] {
        t.redirect_all(op, MATH_FLOAT_TYPES, name)?;
    }

    for op in [OpKind::GroupReduceAdd, OpKind::GroupReduceMin, OpKind::GroupReduceMax] {
        t.generate_all(op, INT_TYPES, group_reduce)?;
        t.generate_all(op, ARITH_FLOAT_TYPES, group_reduce)?;
    }
    t.generate_all(OpKind::WarpShuffle, SHUFFLE_TYPES, shuffle)?;
    t.generate_all(OpKind::WarpShuffleDown, SHUFFLE_TYPES, shuffle)?;

    t.generate(OpKind::Barrier, ScalarType::U32, barrier)?;
    for op in [
        OpKind::GlobalId,
        OpKind::LocalId,
        OpKind::GroupId,
        OpKind::GroupDim,
        OpKind::GridDim,
    ] {
        t.generate(op, ScalarType::U32, index_query)?;
    }

    Ok(t)
}

/// Shared MSL table, built once on first use
pub fn intrinsic_table() -> &'static IntrinsicTable {
    static TABLE: OnceLock<IntrinsicTable> = OnceLock::new();
    TABLE.get_or_init(|| build().expect("msl intrinsic registrations never collide"))
}
