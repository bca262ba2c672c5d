//! Statement-lockstep kernel interpreter
//!
//! Executes specialized kernel IR directly: groups run in parallel via rayon,
//! and within a group every lane advances through the body one statement at a
//! time. Lockstep makes collectives exact without real threads per lane: a
//! group reduction sees every active lane's source binding, a barrier is a
//! no-op, and warp shuffles read the source binding of the target lane.
//!
//! Lane guards maintain an active mask. Deactivated lanes stop evaluating
//! bindings and stores; for group reductions they contribute the operation's
//! identity, matching what the source-emitting backends generate.
//!
//! Arithmetic is evaluated widened (i64/u64/f64) and re-narrowed to the
//! element type after every operation, so wrapping and rounding agree with
//! native device code.

use super::memory::{bounds_check, CpuMemory, SharedBytes};
use crate::backend::types::{LaunchArg, LaunchConfig, ScalarValue};
use crate::error::{BackendError, Result};
use arclight_ir::{
    Axis, CmpCond, ElemType, Expr, KernelDef, Literal, OpKind, ParamKind, ScalarType, Stmt, ValueId,
};
use rayon::prelude::*;
use std::collections::HashMap;

/// One interpreted value, widened to 64 bits
#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    I(i64),
    U(u64),
    F(f64),
    B(bool),
}

impl Value {
    fn as_index(self) -> Result<usize> {
        match self {
            Value::U(v) => Ok(v as usize),
            Value::I(v) if v >= 0 => Ok(v as usize),
            other => Err(exec_err(format!("{other:?} is not a valid element index"))),
        }
    }

    fn as_bool(self) -> Result<bool> {
        match self {
            Value::B(b) => Ok(b),
            other => Err(exec_err(format!("{other:?} is not a boolean"))),
        }
    }
}

fn exec_err(msg: impl Into<String>) -> BackendError {
    BackendError::Execution(msg.into())
}

/// A launch argument bound to its kernel parameter
enum BoundParam {
    Buffer {
        bytes: SharedBytes,
        elem: ScalarType,
        writable: bool,
    },
    Scalar(Value),
}

/// Bind launch arguments positionally against the kernel signature
fn bind_params(def: &KernelDef, args: &[LaunchArg], memory: &CpuMemory) -> Result<Vec<BoundParam>> {
    if args.len() != def.params.len() {
        return Err(BackendError::ArgumentMismatch(format!(
            "kernel {} takes {} arguments, {} given",
            def.name,
            def.params.len(),
            args.len()
        )));
    }
    def.params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (param, arg))| match (param.kind, arg) {
            (ParamKind::Buffer { elem, writable }, LaunchArg::Buffer(handle)) => {
                let elem = elem
                    .concrete()
                    .ok_or_else(|| exec_err(format!("parameter {i} of {} is generic", def.name)))?;
                Ok(BoundParam::Buffer {
                    bytes: memory.get(*handle)?,
                    elem,
                    writable,
                })
            }
            (ParamKind::Scalar(elem), LaunchArg::Scalar(value)) => {
                let elem = elem
                    .concrete()
                    .ok_or_else(|| exec_err(format!("parameter {i} of {} is generic", def.name)))?;
                if value.ty != elem {
                    return Err(BackendError::ArgumentMismatch(format!(
                        "argument {i}: expected {elem}, got {}",
                        value.ty
                    )));
                }
                Ok(BoundParam::Scalar(decode_scalar(*value)))
            }
            (ParamKind::Buffer { .. }, LaunchArg::Scalar(_)) => Err(BackendError::ArgumentMismatch(
                format!("argument {i}: expected a buffer, got a scalar"),
            )),
            (ParamKind::Scalar(_), LaunchArg::Buffer(_)) => Err(BackendError::ArgumentMismatch(
                format!("argument {i}: expected a scalar, got a buffer"),
            )),
        })
        .collect()
}

fn decode_scalar(value: ScalarValue) -> Value {
    let bits = value.bits;
    match value.ty {
        ScalarType::I8 => Value::I(bits as u8 as i8 as i64),
        ScalarType::I16 => Value::I(bits as u16 as i16 as i64),
        ScalarType::I32 => Value::I(bits as u32 as i32 as i64),
        ScalarType::I64 => Value::I(bits as i64),
        ScalarType::U8 => Value::U(bits & 0xff),
        ScalarType::U16 => Value::U(bits & 0xffff),
        ScalarType::U32 => Value::U(bits & 0xffff_ffff),
        ScalarType::U64 => Value::U(bits),
        ScalarType::F16 => Value::F(half::f16::from_bits(bits as u16).to_f64()),
        ScalarType::BF16 => Value::F(half::bf16::from_bits(bits as u16).to_f64()),
        ScalarType::F32 => Value::F(f32::from_bits(bits as u32) as f64),
        ScalarType::F64 => Value::F(f64::from_bits(bits)),
    }
}

/// Execute one launch across the whole grid
#[tracing::instrument(skip_all, fields(kernel = %def.name, config = %config))]
pub(crate) fn execute(
    def: &KernelDef,
    config: &LaunchConfig,
    args: &[LaunchArg],
    memory: &CpuMemory,
    warp_size: u32,
) -> Result<()> {
    let params = bind_params(def, args, memory)?;
    let start = std::time::Instant::now();

    let groups = config.grid.total_groups();
    (0..groups).into_par_iter().try_for_each(|linear| {
        let gx = (linear % config.grid.x as u64) as u32;
        let gy = ((linear / config.grid.x as u64) % config.grid.y as u64) as u32;
        let gz = (linear / (config.grid.x as u64 * config.grid.y as u64)) as u32;
        GroupRun {
            def,
            config,
            params: &params,
            warp_size,
            group_idx: [gx, gy, gz],
            active: vec![true; config.group.total_lanes() as usize],
            values: HashMap::new(),
        }
        .run()
    })?;

    tracing::debug!(duration_us = start.elapsed().as_micros() as u64, "kernel_interpreted");
    Ok(())
}

/// Interpreter state for one group
struct GroupRun<'a> {
    def: &'a KernelDef,
    config: &'a LaunchConfig,
    params: &'a [BoundParam],
    warp_size: u32,
    group_idx: [u32; 3],
    active: Vec<bool>,
    /// Column-per-binding storage; `None` where the lane was inactive
    values: HashMap<ValueId, Vec<Option<Value>>>,
}

impl GroupRun<'_> {
    fn lane_count(&self) -> usize {
        self.config.group.total_lanes() as usize
    }

    fn lane_idx(&self, lane: usize) -> [u32; 3] {
        let (gx, gy) = (self.config.group.x, self.config.group.y);
        let lane = lane as u32;
        [lane % gx, (lane / gx) % gy, lane / (gx * gy)]
    }

    fn run(mut self) -> Result<()> {
        for stmt in &self.def.body {
            match stmt {
                Stmt::Let { id, expr } => self.exec_let(*id, expr)?,
                Stmt::Guard { cond } => {
                    for lane in 0..self.lane_count() {
                        if self.active[lane] && !self.eval(cond, lane)?.as_bool()? {
                            self.active[lane] = false;
                        }
                    }
                }
                Stmt::Store { param, index, value } => {
                    for lane in 0..self.lane_count() {
                        if self.active[lane] {
                            let index = self.eval(index, lane)?.as_index()?;
                            let value = self.eval(value, lane)?;
                            self.store(*param, index, value)?;
                        }
                    }
                }
                // Lockstep execution: every lane has already finished the
                // previous statement
                Stmt::Barrier => {}
            }
        }
        Ok(())
    }

    fn exec_let(&mut self, id: ValueId, expr: &Expr) -> Result<()> {
        let column = match expr {
            Expr::GroupReduce { op, ty, source } => self.reduce(*op, *ty, *source)?,
            Expr::WarpShuffle { down, ty, source, lane } => {
                self.shuffle(*down, *ty, *source, lane)?
            }
            _ => {
                let mut column = vec![None; self.lane_count()];
                for lane in 0..self.lane_count() {
                    if self.active[lane] {
                        column[lane] = Some(self.eval(expr, lane)?);
                    }
                }
                column
            }
        };
        self.values.insert(id, column);
        Ok(())
    }

    /// Group reduction: all lanes participate, inactive lanes contribute the
    /// identity, every lane (active or not) receives the result
    fn reduce(&mut self, op: OpKind, ty: ElemType, source: ValueId) -> Result<Vec<Option<Value>>> {
        let elem = concrete(ty)?;
        let column = self
            .values
            .get(&source)
            .ok_or_else(|| exec_err(format!("v{source} unbound in reduction")))?;

        let identity = reduce_identity(op, elem)?;
        let mut acc = identity;
        for (lane, slot) in column.iter().enumerate() {
            let v = if self.active[lane] {
                slot.unwrap_or(identity)
            } else {
                identity
            };
            acc = match op {
                OpKind::GroupReduceAdd => arith(OpKind::Add, elem, &[acc, v])?,
                OpKind::GroupReduceMin => arith(OpKind::Min, elem, &[acc, v])?,
                OpKind::GroupReduceMax => arith(OpKind::Max, elem, &[acc, v])?,
                other => return Err(exec_err(format!("{other} is not a reduction"))),
            };
        }
        Ok(vec![Some(acc); self.lane_count()])
    }

    /// Warp shuffle: lanes are partitioned into warps of `warp_size` by
    /// linear index; each active lane reads the source binding of the target
    /// lane in its warp
    fn shuffle(
        &mut self,
        down: bool,
        ty: ElemType,
        source: ValueId,
        lane_expr: &Expr,
    ) -> Result<Vec<Option<Value>>> {
        concrete(ty)?;
        let column = self
            .values
            .get(&source)
            .ok_or_else(|| exec_err(format!("v{source} unbound in shuffle")))?
            .clone();

        let warp = self.warp_size as usize;
        let mut out = vec![None; self.lane_count()];
        for lane in 0..self.lane_count() {
            if !self.active[lane] {
                continue;
            }
            let operand = self.eval(lane_expr, lane)?.as_index()?;
            let warp_base = (lane / warp) * warp;
            let warp_len = warp.min(self.lane_count() - warp_base);
            let target_in_warp = if down {
                // Shuffle-down past the warp edge reads the lane itself
                let pos = lane - warp_base;
                if pos + operand < warp_len { pos + operand } else { pos }
            } else {
                operand % warp_len
            };
            let target = warp_base + target_in_warp;
            out[lane] = Some(column[target].or(column[lane]).ok_or_else(|| {
                exec_err(format!("shuffle read from lane {target} with no value"))
            })?);
        }
        Ok(out)
    }

    fn store(&self, param: usize, index: usize, value: Value) -> Result<()> {
        match &self.params[param] {
            BoundParam::Buffer { bytes, elem, writable } => {
                if !*writable {
                    return Err(exec_err(format!("store to read-only parameter {param}")));
                }
                let encoded = encode(*elem, value)?;
                let offset = index * elem.size_bytes();
                let mut guard = bytes.write();
                bounds_check(offset, encoded.len(), guard.len())?;
                guard[offset..offset + encoded.len()].copy_from_slice(&encoded);
                Ok(())
            }
            BoundParam::Scalar(_) => Err(exec_err(format!("parameter {param} is not a buffer"))),
        }
    }

    fn eval(&self, expr: &Expr, lane: usize) -> Result<Value> {
        match expr {
            Expr::Literal { ty, value } => literal(concrete(*ty)?, *value),
            Expr::Value(id) => self
                .values
                .get(id)
                .and_then(|column| column[lane])
                .ok_or_else(|| exec_err(format!("v{id} unbound in lane {lane}"))),
            Expr::ScalarParam(index) => match &self.params[*index] {
                BoundParam::Scalar(v) => Ok(*v),
                BoundParam::Buffer { .. } => {
                    Err(exec_err(format!("parameter {index} is not a scalar")))
                }
            },
            Expr::Load { param, index } => {
                let index = self.eval(index, lane)?.as_index()?;
                self.load(*param, index)
            }
            Expr::ThreadIndex { op, axis } => Ok(Value::U(self.thread_index(*op, *axis, lane))),
            Expr::Intrinsic { op, ty, args } => {
                let elem = concrete(*ty)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, lane))
                    .collect::<Result<Vec<_>>>()?;
                arith(*op, elem, &args)
            }
            Expr::GroupReduce { .. } | Expr::WarpShuffle { .. } => Err(exec_err(
                "collectives must bind directly to a value".to_string(),
            )),
            Expr::CallNamed { namespace, name, .. } => Err(exec_err(format!(
                "unresolved call {namespace}.{name} reached execution"
            ))),
            Expr::Cast { to, from } => {
                let from = self.eval(from, lane)?;
                cast(concrete(*to)?, from)
            }
            Expr::Cmp { cond, a, b, .. } => {
                let a = self.eval(a, lane)?;
                let b = self.eval(b, lane)?;
                compare(*cond, a, b)
            }
        }
    }

    fn load(&self, param: usize, index: usize) -> Result<Value> {
        match &self.params[param] {
            BoundParam::Buffer { bytes, elem, .. } => {
                let size = elem.size_bytes();
                let offset = index * size;
                let guard = bytes.read();
                bounds_check(offset, size, guard.len())?;
                Ok(decode(*elem, &guard[offset..offset + size]))
            }
            BoundParam::Scalar(_) => Err(exec_err(format!("parameter {param} is not a buffer"))),
        }
    }

    fn thread_index(&self, op: OpKind, axis: Axis, lane: usize) -> u64 {
        let a = axis.index();
        let lane_idx = self.lane_idx(lane);
        let group_dim = [self.config.group.x, self.config.group.y, self.config.group.z];
        let grid_dim = [self.config.grid.x, self.config.grid.y, self.config.grid.z];
        match op {
            OpKind::GlobalId => self.group_idx[a] as u64 * group_dim[a] as u64 + lane_idx[a] as u64,
            OpKind::LocalId => lane_idx[a] as u64,
            OpKind::GroupId => self.group_idx[a] as u64,
            OpKind::GroupDim => group_dim[a] as u64,
            OpKind::GridDim => grid_dim[a] as u64,
            // validate() rejects anything else inside ThreadIndex
            _ => unreachable!("not an index query"),
        }
    }
}

fn concrete(ty: ElemType) -> Result<ScalarType> {
    ty.concrete()
        .ok_or_else(|| exec_err("generic element type reached execution".to_string()))
}

// --- element encoding ---

fn decode(ty: ScalarType, bytes: &[u8]) -> Value {
    let mut wide = [0u8; 8];
    wide[..bytes.len()].copy_from_slice(bytes);
    decode_scalar(ScalarValue {
        ty,
        bits: u64::from_le_bytes(wide),
    })
}

fn encode(ty: ScalarType, value: Value) -> Result<Vec<u8>> {
    let bits: u64 = match (ty, value) {
        (t, Value::I(v)) if t.is_integer() => v as u64,
        (t, Value::U(v)) if t.is_integer() => v,
        (ScalarType::F16, Value::F(v)) => half::f16::from_f64(v).to_bits() as u64,
        (ScalarType::BF16, Value::F(v)) => half::bf16::from_f64(v).to_bits() as u64,
        (ScalarType::F32, Value::F(v)) => (v as f32).to_bits() as u64,
        (ScalarType::F64, Value::F(v)) => v.to_bits(),
        (t, v) => return Err(exec_err(format!("cannot store {v:?} as {t}"))),
    };
    Ok(bits.to_le_bytes()[..ty.size_bytes()].to_vec())
}

fn literal(ty: ScalarType, value: Literal) -> Result<Value> {
    let v = match (ty, value) {
        (t, Literal::Int(v)) if t.is_unsigned() => Value::U(narrow_u(t, v as u64)),
        (t, Literal::Int(v)) if t.is_float() => Value::F(narrow_f(t, v as f64)),
        (t, Literal::Int(v)) => Value::I(narrow_i(t, v)),
        (t, Literal::UInt(v)) if t.is_signed() => Value::I(narrow_i(t, v as i64)),
        (t, Literal::UInt(v)) if t.is_float() => Value::F(narrow_f(t, v as f64)),
        (t, Literal::UInt(v)) => Value::U(narrow_u(t, v)),
        (t, Literal::Float(v)) if t.is_signed() => Value::I(narrow_i(t, v as i64)),
        (t, Literal::Float(v)) if t.is_unsigned() => Value::U(narrow_u(t, v as u64)),
        (t, Literal::Float(v)) => Value::F(narrow_f(t, v)),
        (_, Literal::Bool(v)) => Value::B(v),
    };
    Ok(v)
}

/// Re-narrow a widened signed value to the element width (two's-complement
/// wrap, like native code)
fn narrow_i(ty: ScalarType, v: i64) -> i64 {
    match ty {
        ScalarType::I8 => v as i8 as i64,
        ScalarType::I16 => v as i16 as i64,
        ScalarType::I32 => v as i32 as i64,
        _ => v,
    }
}

fn narrow_u(ty: ScalarType, v: u64) -> u64 {
    match ty {
        ScalarType::U8 => v & 0xff,
        ScalarType::U16 => v & 0xffff,
        ScalarType::U32 => v & 0xffff_ffff,
        _ => v,
    }
}

/// Round a widened float through the element precision
fn narrow_f(ty: ScalarType, v: f64) -> f64 {
    match ty {
        ScalarType::F16 => half::f16::from_f64(v).to_f64(),
        ScalarType::BF16 => half::bf16::from_f64(v).to_f64(),
        ScalarType::F32 => v as f32 as f64,
        _ => v,
    }
}

fn arith(op: OpKind, ty: ScalarType, args: &[Value]) -> Result<Value> {
    if ty.is_float() {
        let f = |i: usize| -> Result<f64> {
            match args[i] {
                Value::F(v) => Ok(v),
                other => Err(exec_err(format!("{op} over {ty} got {other:?}"))),
            }
        };
        let v = match op {
            OpKind::Add => f(0)? + f(1)?,
            OpKind::Sub => f(0)? - f(1)?,
            OpKind::Mul => f(0)? * f(1)?,
            OpKind::Div => f(0)? / f(1)?,
            OpKind::Rem => f(0)? % f(1)?,
            OpKind::Min => f(0)?.min(f(1)?),
            OpKind::Max => f(0)?.max(f(1)?),
            OpKind::Abs => f(0)?.abs(),
            OpKind::Neg => -f(0)?,
            OpKind::MulAdd => f(0)?.mul_add(f(1)?, f(2)?),
            OpKind::Sqrt => f(0)?.sqrt(),
            OpKind::Rsqrt => f(0)?.sqrt().recip(),
            OpKind::Sin => f(0)?.sin(),
            OpKind::Cos => f(0)?.cos(),
            OpKind::Tan => f(0)?.tan(),
            OpKind::Exp => f(0)?.exp(),
            OpKind::Log => f(0)?.ln(),
            OpKind::Pow => f(0)?.powf(f(1)?),
            OpKind::Floor => f(0)?.floor(),
            OpKind::Ceil => f(0)?.ceil(),
            OpKind::Round => f(0)?.round(),
            OpKind::Tanh => f(0)?.tanh(),
            other => return Err(exec_err(format!("{other} is not a float operation"))),
        };
        return Ok(Value::F(narrow_f(ty, v)));
    }

    if ty.is_signed() {
        let i = |idx: usize| -> Result<i64> {
            match args[idx] {
                Value::I(v) => Ok(v),
                Value::U(v) => Ok(v as i64),
                other => Err(exec_err(format!("{op} over {ty} got {other:?}"))),
            }
        };
        let v = match op {
            OpKind::Add => i(0)?.wrapping_add(i(1)?),
            OpKind::Sub => i(0)?.wrapping_sub(i(1)?),
            OpKind::Mul => i(0)?.wrapping_mul(i(1)?),
            OpKind::Div => i(0)?
                .checked_div(i(1)?)
                .ok_or_else(|| exec_err("integer division by zero".to_string()))?,
            OpKind::Rem => i(0)?
                .checked_rem(i(1)?)
                .ok_or_else(|| exec_err("integer remainder by zero".to_string()))?,
            OpKind::Min => i(0)?.min(i(1)?),
            OpKind::Max => i(0)?.max(i(1)?),
            OpKind::Abs => i(0)?.wrapping_abs(),
            OpKind::Neg => i(0)?.wrapping_neg(),
            OpKind::MulAdd => i(0)?.wrapping_mul(i(1)?).wrapping_add(i(2)?),
            other => return Err(exec_err(format!("{other} is not an integer operation"))),
        };
        return Ok(Value::I(narrow_i(ty, v)));
    }

    let u = |idx: usize| -> Result<u64> {
        match args[idx] {
            Value::U(v) => Ok(v),
            Value::I(v) if v >= 0 => Ok(v as u64),
            other => Err(exec_err(format!("{op} over {ty} got {other:?}"))),
        }
    };
    let v = match op {
        OpKind::Add => u(0)?.wrapping_add(u(1)?),
        OpKind::Sub => u(0)?.wrapping_sub(u(1)?),
        OpKind::Mul => u(0)?.wrapping_mul(u(1)?),
        OpKind::Div => u(0)?
            .checked_div(u(1)?)
            .ok_or_else(|| exec_err("integer division by zero".to_string()))?,
        OpKind::Rem => u(0)?
            .checked_rem(u(1)?)
            .ok_or_else(|| exec_err("integer remainder by zero".to_string()))?,
        OpKind::Min => u(0)?.min(u(1)?),
        OpKind::Max => u(0)?.max(u(1)?),
        OpKind::Abs => u(0)?,
        OpKind::MulAdd => u(0)?.wrapping_mul(u(1)?).wrapping_add(u(2)?),
        other => return Err(exec_err(format!("{other} is not an unsigned operation"))),
    };
    Ok(Value::U(narrow_u(ty, v)))
}

fn reduce_identity(op: OpKind, ty: ScalarType) -> Result<Value> {
    let v = match op {
        OpKind::GroupReduceAdd => match ty {
            t if t.is_float() => Value::F(0.0),
            t if t.is_signed() => Value::I(0),
            _ => Value::U(0),
        },
        OpKind::GroupReduceMin => match ty {
            t if t.is_float() => Value::F(f64::INFINITY),
            ScalarType::I8 => Value::I(i8::MAX as i64),
            ScalarType::I16 => Value::I(i16::MAX as i64),
            ScalarType::I32 => Value::I(i32::MAX as i64),
            ScalarType::I64 => Value::I(i64::MAX),
            ScalarType::U8 => Value::U(u8::MAX as u64),
            ScalarType::U16 => Value::U(u16::MAX as u64),
            ScalarType::U32 => Value::U(u32::MAX as u64),
            _ => Value::U(u64::MAX),
        },
        OpKind::GroupReduceMax => match ty {
            t if t.is_float() => Value::F(f64::NEG_INFINITY),
            ScalarType::I8 => Value::I(i8::MIN as i64),
            ScalarType::I16 => Value::I(i16::MIN as i64),
            ScalarType::I32 => Value::I(i32::MIN as i64),
            ScalarType::I64 => Value::I(i64::MIN),
            _ => Value::U(0),
        },
        other => return Err(exec_err(format!("{other} is not a reduction"))),
    };
    Ok(v)
}

fn cast(to: ScalarType, from: Value) -> Result<Value> {
    let v = match (to, from) {
        (t, Value::I(v)) if t.is_signed() => Value::I(narrow_i(t, v)),
        (t, Value::I(v)) if t.is_unsigned() => Value::U(narrow_u(t, v as u64)),
        (t, Value::I(v)) => Value::F(narrow_f(t, v as f64)),
        (t, Value::U(v)) if t.is_unsigned() => Value::U(narrow_u(t, v)),
        (t, Value::U(v)) if t.is_signed() => Value::I(narrow_i(t, v as i64)),
        (t, Value::U(v)) => Value::F(narrow_f(t, v as f64)),
        // Float-to-int follows Rust `as` semantics (saturating)
        (ScalarType::I8, Value::F(v)) => Value::I(v as i8 as i64),
        (ScalarType::I16, Value::F(v)) => Value::I(v as i16 as i64),
        (ScalarType::I32, Value::F(v)) => Value::I(v as i32 as i64),
        (ScalarType::I64, Value::F(v)) => Value::I(v as i64),
        (ScalarType::U8, Value::F(v)) => Value::U(v as u8 as u64),
        (ScalarType::U16, Value::F(v)) => Value::U(v as u16 as u64),
        (ScalarType::U32, Value::F(v)) => Value::U(v as u32 as u64),
        (ScalarType::U64, Value::F(v)) => Value::U(v as u64),
        (t, Value::F(v)) => Value::F(narrow_f(t, v)),
        (t, Value::B(v)) if t.is_float() => Value::F(if v { 1.0 } else { 0.0 }),
        (t, Value::B(v)) if t.is_signed() => Value::I(i64::from(v)),
        (_, Value::B(v)) => Value::U(u64::from(v)),
    };
    Ok(v)
}

fn compare(cond: CmpCond, a: Value, b: Value) -> Result<Value> {
    use std::cmp::Ordering;
    let ord = match (a, b) {
        (Value::I(a), Value::I(b)) => a.partial_cmp(&b),
        (Value::U(a), Value::U(b)) => a.partial_cmp(&b),
        (Value::F(a), Value::F(b)) => a.partial_cmp(&b),
        (Value::I(a), Value::U(b)) => (a as i128).partial_cmp(&(b as i128)),
        (Value::U(a), Value::I(b)) => (a as i128).partial_cmp(&(b as i128)),
        (a, b) => return Err(exec_err(format!("cannot compare {a:?} with {b:?}"))),
    };
    let result = match (cond, ord) {
        // NaN compares false for everything except Ne
        (CmpCond::Ne, None) => true,
        (_, None) => false,
        (CmpCond::Eq, Some(o)) => o == Ordering::Equal,
        (CmpCond::Ne, Some(o)) => o != Ordering::Equal,
        (CmpCond::Lt, Some(o)) => o == Ordering::Less,
        (CmpCond::Le, Some(o)) => o != Ordering::Greater,
        (CmpCond::Gt, Some(o)) => o == Ordering::Greater,
        (CmpCond::Ge, Some(o)) => o != Ordering::Less,
    };
    Ok(Value::B(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{BufferHandle, GridDim, GroupDim};
    use arclight_ir::KernelBuilder;

    fn f32_elem() -> ElemType {
        ElemType::Scalar(ScalarType::F32)
    }

    fn u32_elem() -> ElemType {
        ElemType::Scalar(ScalarType::U32)
    }

    fn setup(memory: &mut CpuMemory, elems: usize) -> BufferHandle {
        memory.allocate(elems * 4).unwrap()
    }

    fn write_index_kernel() -> KernelDef {
        let mut b = KernelBuilder::new("write_index");
        let out = b.buffer_param("out", ElemType::Scalar(ScalarType::I32), true);
        let n = b.scalar_param("n", u32_elem());
        let gid = b.bind(Expr::ThreadIndex {
            op: OpKind::GlobalId,
            axis: Axis::X,
        });
        b.guard(Expr::Cmp {
            cond: CmpCond::Lt,
            ty: u32_elem(),
            a: Box::new(Expr::Value(gid)),
            b: Box::new(Expr::ScalarParam(n)),
        });
        b.store(
            out,
            Expr::Value(gid),
            Expr::Cast {
                to: ElemType::Scalar(ScalarType::I32),
                from: Box::new(Expr::Value(gid)),
            },
        );
        b.build().unwrap()
    }

    #[test]
    fn test_write_index_across_grid() {
        let mut memory = CpuMemory::new();
        let n = 1000usize;
        let out = setup(&mut memory, n);
        let def = write_index_kernel();
        let config = LaunchConfig::linear(n as u32, 256);
        execute(
            &def,
            &config,
            &[
                LaunchArg::Buffer(out),
                LaunchArg::Scalar(ScalarValue::from_u64(ScalarType::U32, n as u64)),
            ],
            &memory,
            32,
        )
        .unwrap();

        let mut bytes = vec![0u8; n * 4];
        memory.read(out, 0, &mut bytes).unwrap();
        let values: &[i32] = bytemuck::cast_slice(&bytes);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(*v, i as i32);
        }
    }

    #[test]
    fn test_guard_masks_tail_lanes() {
        let mut memory = CpuMemory::new();
        // 10 elements, launch covers 256 lanes; lanes past n must not store
        let out = setup(&mut memory, 10);
        let def = write_index_kernel();
        execute(
            &def,
            &LaunchConfig::linear(10, 256),
            &[
                LaunchArg::Buffer(out),
                LaunchArg::Scalar(ScalarValue::from_u64(ScalarType::U32, 10)),
            ],
            &memory,
            32,
        )
        .unwrap();
    }

    #[test]
    fn test_argument_count_mismatch() {
        let memory = CpuMemory::new();
        let def = write_index_kernel();
        let err = execute(&def, &LaunchConfig::linear(1, 1), &[], &memory, 32).unwrap_err();
        assert!(matches!(err, BackendError::ArgumentMismatch(_)));
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let mut memory = CpuMemory::new();
        let out = setup(&mut memory, 4);
        let def = write_index_kernel();
        let err = execute(
            &def,
            &LaunchConfig::linear(4, 4),
            &[
                LaunchArg::Buffer(out),
                LaunchArg::Scalar(ScalarValue::from_f32(4.0)),
            ],
            &memory,
            32,
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::ArgumentMismatch(_)));
    }

    #[test]
    fn test_group_reduce_add_with_guard() {
        // out[0] = sum of in[0..n] computed by one group of 8 lanes, n = 5
        let mut memory = CpuMemory::new();
        let out = setup(&mut memory, 8);
        let input = setup(&mut memory, 8);
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 100.0, 100.0, 100.0];
        memory.write(input, 0, bytemuck::cast_slice(&data)).unwrap();

        let mut b = KernelBuilder::new("block_sum");
        let outp = b.buffer_param("out", f32_elem(), true);
        let inp = b.buffer_param("in", f32_elem(), false);
        let np = b.scalar_param("n", u32_elem());
        let gid = b.bind(Expr::ThreadIndex {
            op: OpKind::GlobalId,
            axis: Axis::X,
        });
        b.guard(Expr::Cmp {
            cond: CmpCond::Lt,
            ty: u32_elem(),
            a: Box::new(Expr::Value(gid)),
            b: Box::new(Expr::ScalarParam(np)),
        });
        let v = b.bind(Expr::Load {
            param: inp,
            index: Box::new(Expr::Value(gid)),
        });
        let total = b.bind(Expr::GroupReduce {
            op: OpKind::GroupReduceAdd,
            ty: f32_elem(),
            source: v,
        });
        b.store(outp, Expr::Value(gid), Expr::Value(total));
        let def = b.build().unwrap();

        execute(
            &def,
            &LaunchConfig::new(GridDim::linear(1), GroupDim::linear(8)),
            &[
                LaunchArg::Buffer(out),
                LaunchArg::Buffer(input),
                LaunchArg::Scalar(ScalarValue::from_u64(ScalarType::U32, 5)),
            ],
            &memory,
            32,
        )
        .unwrap();

        let mut bytes = vec![0u8; 4];
        memory.read(out, 0, &mut bytes).unwrap();
        let sum: f32 = bytemuck::cast_slice::<_, f32>(&bytes)[0];
        // Masked lanes contribute the identity, so the 100s never count
        assert_eq!(sum, 15.0);
    }

    #[test]
    fn test_warp_shuffle_down() {
        // v = gid; shifted = shuffle_down(v, 1); out[gid] = shifted
        let mut memory = CpuMemory::new();
        let out = setup(&mut memory, 4);

        let mut b = KernelBuilder::new("shift");
        let outp = b.buffer_param("out", u32_elem(), true);
        let gid = b.bind(Expr::ThreadIndex {
            op: OpKind::GlobalId,
            axis: Axis::X,
        });
        let shifted = b.bind(Expr::WarpShuffle {
            down: true,
            ty: u32_elem(),
            source: gid,
            lane: Box::new(Expr::Literal {
                ty: u32_elem(),
                value: Literal::UInt(1),
            }),
        });
        b.store(outp, Expr::Value(gid), Expr::Value(shifted));
        let def = b.build().unwrap();

        execute(
            &def,
            &LaunchConfig::new(GridDim::linear(1), GroupDim::linear(4)),
            &[LaunchArg::Buffer(out)],
            &memory,
            4,
        )
        .unwrap();

        let mut bytes = vec![0u8; 16];
        memory.read(out, 0, &mut bytes).unwrap();
        let values: &[u32] = bytemuck::cast_slice(&bytes);
        // Last lane has no lane+1 in its warp and keeps its own value
        assert_eq!(values, &[1, 2, 3, 3]);
    }

    #[test]
    fn test_integer_wrapping_matches_width() {
        let v = arith(
            OpKind::Add,
            ScalarType::I32,
            &[Value::I(i32::MAX as i64), Value::I(1)],
        )
        .unwrap();
        assert_eq!(v, Value::I(i32::MIN as i64));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let err = arith(OpKind::Div, ScalarType::U32, &[Value::U(1), Value::U(0)]).unwrap_err();
        assert!(matches!(err, BackendError::Execution(_)));
    }

    #[test]
    fn test_literal_coerces_across_classes() {
        // Literal class and element class may disagree; the element type wins
        assert_eq!(literal(ScalarType::I32, Literal::Float(2.9)).unwrap(), Value::I(2));
        assert_eq!(literal(ScalarType::U8, Literal::Float(300.0)).unwrap(), Value::U(44));
        assert_eq!(literal(ScalarType::U32, Literal::Int(-1)).unwrap(), Value::U(0xffff_ffff));
        assert_eq!(literal(ScalarType::I8, Literal::UInt(0x80)).unwrap(), Value::I(-128));
        assert_eq!(literal(ScalarType::F32, Literal::Int(3)).unwrap(), Value::F(3.0));
    }

    #[test]
    fn test_f16_rounding() {
        // 1/3 is not representable in f16; the interpreter must round
        let v = arith(OpKind::Div, ScalarType::F16, &[Value::F(1.0), Value::F(3.0)]).unwrap();
        let Value::F(v) = v else { panic!() };
        assert_eq!(v, half::f16::from_f64(1.0 / 3.0).to_f64());
    }
}
