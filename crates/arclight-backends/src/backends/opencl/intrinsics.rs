//! OpenCL C intrinsic table
//!
//! Math builtins are overloaded over `half`, `float`, and `double` (the
//! emitter enables the fp16/fp64 pragmas when those types appear). Work-item
//! queries take a numeric dimension where CUDA and MSL use an axis suffix.

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

// No bfloat16 in OpenCL C; the emitter rejects it before matching
const FLOAT_TYPES: &[ScalarType] = &[ScalarType::F16, ScalarType::F32, ScalarType::F64];

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

fn axis_dim(axis: &str) -> Result<&'static str> {
    match axis {
        "x" => Ok("0"),
        "y" => Ok("1"),
        "z" => Ok("2"),
        other => Err(CodegenError::Emit(format!("unknown axis {other}"))),
    }
}

fn index_query(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let dim = axis_dim(&c.args[0])?;
    let func = match c.op {
        OpKind::GlobalId => "get_global_id",
        OpKind::LocalId => "get_local_id",
        OpKind::GroupId => "get_group_id",
        OpKind::GroupDim => "get_local_size",
        OpKind::GridDim => "get_num_groups",
        other => return Err(CodegenError::Emit(format!("{other} is not an index query"))),
    };
    Ok(format!("(uint){func}({dim})"))
}

fn barrier(_c: &mut IntrinsicCall<'_>) -> Result<String> {
    Ok("barrier(CLK_LOCAL_MEM_FENCE)".to_string())
}

fn shuffle(c: &mut IntrinsicCall<'_>) -> Result<String> {
    let (v, lane) = (&c.args[0], &c.args[1]);
    match c.op {
        OpKind::WarpShuffle => Ok(format!("sub_group_shuffle({v}, (uint){lane})")),
        OpKind::WarpShuffleDown => Ok(format!("sub_group_shuffle_down({v}, (uint){lane})")),
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
        "{scratch}[get_local_id(0)] = {src};\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         if (get_local_id(0) == 0) {{\n\
         \x20   for (uint __i = 1; __i < get_local_size(0); __i++) {scratch}[0] = {combine};\n\
         }}\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         {dest} = {scratch}[0];"
    ))
}

fn build() -> Result<IntrinsicTable> {
    let mut t = IntrinsicTable::new("opencl");

    for op in [OpKind::Add, OpKind::Sub, OpKind::Mul, OpKind::Div] {
        t.generate_all(op, INT_TYPES, infix)?;
        t.generate_all(op, FLOAT_TYPES, infix)?;
    }
    t.generate_all(OpKind::Rem, INT_TYPES, infix)?;
    t.redirect_all(OpKind::Rem, FLOAT_TYPES, "fmod")?;

    t.redirect_all(OpKind::Min, INT_TYPES, "min")?;
    t.redirect_all(OpKind::Min, FLOAT_TYPES, "fmin")?;
    t.redirect_all(OpKind::Max, INT_TYPES, "max")?;
    t.redirect_all(OpKind::Max, FLOAT_TYPES, "fmax")?;
    t.redirect_all(OpKind::Abs, INT_TYPES, "abs")?;
    t.redirect_all(OpKind::Abs, FLOAT_TYPES, "fabs")?;
    t.generate_all(
        OpKind::Neg,
        &[ScalarType::I8, ScalarType::I16, ScalarType::I32, ScalarType::I64],
        neg,
    )?;
    t.generate_all(OpKind::Neg, FLOAT_TYPES, neg)?;

    t.redirect_all(OpKind::MulAdd, FLOAT_TYPES, "fma")?;
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
        t.redirect_all(op, FLOAT_TYPES, name)?;
    }

    for op in [OpKind::GroupReduceAdd, OpKind::GroupReduceMin, OpKind::GroupReduceMax] {
        t.generate_all(op, INT_TYPES, group_reduce)?;
        t.generate_all(op, FLOAT_TYPES, group_reduce)?;
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

/// Shared OpenCL table, built once on first use
pub fn intrinsic_table() -> &'static IntrinsicTable {
    static TABLE: OnceLock<IntrinsicTable> = OnceLock::new();
    TABLE.get_or_init(|| build().expect("opencl intrinsic registrations never collide"))
}
