//! CUDA C intrinsic table
//!
//! Built once per process. Arithmetic lowers to infix expressions, math
//! redirects to libdevice functions, collectives generate shared-memory or
//! `__shfl_sync` sequences. The table is compiled unconditionally so kernels
//! can be lowered to CUDA C (for caching, inspection, or tests) even on
//! machines without the driver; only dispatch requires the `cuda` feature.

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

const FLOAT_TYPES: &[ScalarType] = &[ScalarType::F32, ScalarType::F64];

const SHUFFLE_TYPES: &[ScalarType] = &[
    ScalarType::I32,
    ScalarType::I64,
    ScalarType::U32,
    ScalarType::U64,
    ScalarType::F32,
    ScalarType::F64,
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

fn int_minmax(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let (a, b) = (&c.args[0], &c.args[1]);
    match c.op {
        OpKind::Min => Ok(format!("({a} < {b} ? {a} : {b})")),
        OpKind::Max => Ok(format!("({a} > {b} ? {a} : {b})")),
        other => Err(CodegenError::Emit(format!("{other} is not min/max"))),
    }
}

fn int_abs(c: &mut IntrinsicCall<'_>) -> Result<String> {
    if c.ty.is_unsigned() {
        Ok(c.args[0].clone())
    } else {
        let a = &c.args[0];
        Ok(format!("({a} < 0 ? -{a} : {a})"))
    }
}

fn index_query(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let axis = c.args[0].as_str();
    let text = match c.op {
        OpKind::GlobalId => format!("(blockIdx.{axis} * blockDim.{axis} + threadIdx.{axis})"),
        OpKind::LocalId => format!("threadIdx.{axis}"),
        OpKind::GroupId => format!("blockIdx.{axis}"),
        OpKind::GroupDim => format!("blockDim.{axis}"),
        OpKind::GridDim => format!("gridDim.{axis}"),
        other => return Err(CodegenError::Emit(format!("{other} is not an index query"))),
    };
    Ok(text)
}

fn shuffle(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let (v, lane) = (&c.args[0], &c.args[1]);
    match c.op {
        OpKind::WarpShuffle => Ok(format!("__shfl_sync(0xffffffffu, {v}, {lane})")),
        OpKind::WarpShuffleDown => Ok(format!("__shfl_down_sync(0xffffffffu, {v}, {lane})")),
        other => Err(CodegenError::Emit(format!("{other} is not a shuffle"))),
    }
}

fn combine_expr(op: OpKind, ty: ScalarType, a: &str, b: &str) -> Result<String> {
    let text = match op {
        OpKind::GroupReduceAdd => format!("{a} + {b}"),
        OpKind::GroupReduceMin if ty == ScalarType::F32 => format!("fminf({a}, {b})"),
        OpKind::GroupReduceMin if ty == ScalarType::F64 => format!("fmin({a}, {b})"),
        OpKind::GroupReduceMin => format!("({a} < {b} ? {a} : {b})"),
        OpKind::GroupReduceMax if ty == ScalarType::F32 => format!("fmaxf({a}, {b})"),
        OpKind::GroupReduceMax if ty == ScalarType::F64 => format!("fmax({a}, {b})"),
        OpKind::GroupReduceMax => format!("({a} > {b} ? {a} : {b})"),
        other => return Err(CodegenError::Emit(format!("{other} is not a reduction"))),
    };
    Ok(text)
}

fn group_reduce(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let (dest, src, scratch) = (&c.args[0], &c.args[1], &c.args[2]);
    let combine = combine_expr(c.op, c.ty, &format!("{scratch}[0]"), &format!("{scratch}[__i]"))?;
    Ok(format!(
        "{scratch}[threadIdx.x] = {src};\n\
         __syncthreads();\n\
         if (threadIdx.x == 0) {{\n\
         \x20   for (unsigned int __i = 1; __i < blockDim.x; __i++) {scratch}[0] = {combine};\n\
         }}\n\
         __syncthreads();\n\
         {dest} = {scratch}[0];"
    ))
}

fn build() -> Result<IntrinsicTable> {
    let mut t = IntrinsicTable::new("cuda");

    for op in [OpKind::Add, OpKind::Sub, OpKind::Mul, OpKind::Div] {
        t.generate_all(op, INT_TYPES, infix)?;
        t.generate_all(op, FLOAT_TYPES, infix)?;
    }
    t.generate_all(OpKind::Rem, INT_TYPES, infix)?;
    t.redirect(OpKind::Rem, ScalarType::F32, "fmodf")?;
    t.redirect(OpKind::Rem, ScalarType::F64, "fmod")?;

    t.generate_all(OpKind::Min, INT_TYPES, int_minmax)?;
    t.generate_all(OpKind::Max, INT_TYPES, int_minmax)?;
    t.redirect(OpKind::Min, ScalarType::F32, "fminf")?;
    t.redirect(OpKind::Min, ScalarType::F64, "fmin")?;
    t.redirect(OpKind::Max, ScalarType::F32, "fmaxf")?;
    t.redirect(OpKind::Max, ScalarType::F64, "fmax")?;

    t.generate_all(OpKind::Abs, INT_TYPES, int_abs)?;
    t.redirect(OpKind::Abs, ScalarType::F32, "fabsf")?;
    t.redirect(OpKind::Abs, ScalarType::F64, "fabs")?;
    t.generate_all(
        OpKind::Neg,
        &[ScalarType::I8, ScalarType::I16, ScalarType::I32, ScalarType::I64],
        neg,
    )?;
    t.generate_all(OpKind::Neg, FLOAT_TYPES, neg)?;

    t.redirect(OpKind::MulAdd, ScalarType::F32, "fmaf")?;
    t.redirect(OpKind::MulAdd, ScalarType::F64, "fma")?;

    // libdevice math, f32 names carry the f suffix
    for (op, f32_name, f64_name) in [
        (OpKind::Sqrt, "sqrtf", "sqrt"),
        (OpKind::Rsqrt, "rsqrtf", "rsqrt"),
        (OpKind::Sin, "sinf", "sin"),
        (OpKind::Cos, "cosf", "cos"),
        (OpKind::Tan, "tanf", "tan"),
        (OpKind::Exp, "expf", "exp"),
        (OpKind::Log, "logf", "log"),
        (OpKind::Pow, "powf", "pow"),
        (OpKind::Floor, "floorf", "floor"),
        (OpKind::Ceil, "ceilf", "ceil"),
        (OpKind::Round, "roundf", "round"),
        (OpKind::Tanh, "tanhf", "tanh"),
    ] {
        t.redirect(op, ScalarType::F32, f32_name)?;
        t.redirect(op, ScalarType::F64, f64_name)?;
    }

    for op in [OpKind::GroupReduceAdd, OpKind::GroupReduceMin, OpKind::GroupReduceMax] {
        t.generate_all(op, INT_TYPES, group_reduce)?;
        t.generate_all(op, FLOAT_TYPES, group_reduce)?;
    }
    t.generate_all(OpKind::WarpShuffle, SHUFFLE_TYPES, shuffle)?;
    t.generate_all(OpKind::WarpShuffleDown, SHUFFLE_TYPES, shuffle)?;

    t.redirect(OpKind::Barrier, ScalarType::U32, "__syncthreads")?;
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

/// Shared CUDA table, built once on first use
pub fn intrinsic_table() -> &'static IntrinsicTable {
    static TABLE: OnceLock<IntrinsicTable> = OnceLock::new();
    TABLE.get_or_init(|| build().expect("cuda intrinsic registrations never collide"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_codegen::IntrinsicImpl;

    #[test]
    fn test_math_redirects_carry_f_suffix() {
        let t = intrinsic_table();
        match t.lookup(OpKind::Sin, ScalarType::F32).unwrap() {
            IntrinsicImpl::Redirect(sym) => assert_eq!(*sym, "sinf"),
            other => panic!("expected redirect, got {other:?}"),
        }
        match t.lookup(OpKind::Sin, ScalarType::F64).unwrap() {
            IntrinsicImpl::Redirect(sym) => assert_eq!(*sym, "sin"),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn test_no_f16_math() {
        // Half math is not registered; lowering must fail, not emit garbage
        assert!(!intrinsic_table().contains(OpKind::Sin, ScalarType::F16));
    }

    #[test]
    fn test_collectives_registered() {
        let t = intrinsic_table();
        assert!(t.contains(OpKind::GroupReduceAdd, ScalarType::F32));
        assert!(t.contains(OpKind::WarpShuffleDown, ScalarType::U32));
        assert!(t.contains(OpKind::Barrier, ScalarType::U32));
    }
}
