//! Kernel lowering driver and source emitters
//!
//! `lower` runs the fixed pipeline (validate, remap, match, emit) against one
//! backend's intrinsic table and produces a [`KernelArtifact`]: either the
//! specialized IR itself (for the interpreting CPU backend) or C-family
//! source text for a native compiler.
//!
//! The source emitters share one shape across languages. Value bindings are
//! hoisted to declarations at the top of the kernel so lane guards can be
//! expressed as predication: after the first `Guard`, every binding and store
//! is wrapped in `if (__act)`, while barriers and group reductions stay
//! unconditional (all lanes of a group must reach them). Lanes deactivated by
//! a guard contribute the reduction identity to group reductions.
//!
//! All operation code comes from the backend's table; the emitter itself only
//! knows parameter signatures, type names, literals, casts, and comparisons.

use crate::cancel::CancellationToken;
use crate::error::{CodegenError, Result};
use crate::intrinsics::{EmitSupport, IntrinsicCall, IntrinsicImpl, IntrinsicTable};
use crate::remap::remap;
use crate::writer::CodeWriter;
use arclight_ir::{
    CmpCond, ElemType, Expr, KernelDef, Literal, OpKind, ParamKind, ScalarType, Stmt, ValueId,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Group size the emitted scratch arrays are dimensioned for
///
/// Launches with a larger group against a source backend are rejected by the
/// runtime before dispatch.
pub const MAX_GROUP_SIZE: u32 = 1024;

/// Source dialect of an emitted kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SourceLanguage {
    CudaC,
    Msl,
    OpenClC,
}

impl std::fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceLanguage::CudaC => "cuda-c",
            SourceLanguage::Msl => "msl",
            SourceLanguage::OpenClC => "opencl-c",
        };
        write!(f, "{s}")
    }
}

/// What the pipeline should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerTarget {
    /// Keep the specialized IR; the backend interprets it directly
    Interpret,
    /// Emit source text in the given dialect for a native compiler
    Source(SourceLanguage),
}

/// Output of a successful lowering
#[derive(Debug, Clone)]
pub enum KernelArtifact {
    /// Specialized, fully matched IR for the interpreting backend
    Interpreted(Arc<KernelDef>),
    /// Source text plus the entry-point symbol to bind after native compile
    Source {
        language: SourceLanguage,
        entry: String,
        text: String,
    },
}

impl KernelArtifact {
    /// Entry-point name of the lowered kernel
    pub fn entry(&self) -> &str {
        match self {
            KernelArtifact::Interpreted(def) => &def.name,
            KernelArtifact::Source { entry, .. } => entry,
        }
    }
}

/// Lower one kernel definition against a backend's intrinsic table
///
/// The definition must already be specialized to concrete element types;
/// generic definitions fail with `UnspecializedKernel`. Every
/// `(OpKind, ScalarType)` pair the body uses is matched against the table
/// before any emission, so an unsupported intrinsic fails here and never at
/// launch.
#[tracing::instrument(skip(def, table, cancel), fields(kernel = %def.name, backend = table.backend()))]
pub fn lower(
    def: KernelDef,
    target: LowerTarget,
    table: &IntrinsicTable,
    cancel: &CancellationToken,
) -> Result<KernelArtifact> {
    cancel.checkpoint()?;
    def.validate()?;
    let def = remap(def)?;
    if def.is_generic() {
        return Err(CodegenError::UnspecializedKernel(def.name));
    }

    for (op, ty) in def.used_intrinsics() {
        table.lookup(op, ty)?;
    }
    cancel.checkpoint()?;

    let artifact = match target {
        LowerTarget::Interpret => KernelArtifact::Interpreted(Arc::new(def)),
        LowerTarget::Source(language) => {
            let text = SourceEmitter::new(language, table, &def).emit()?;
            tracing::debug!(language = %language, bytes = text.len(), "kernel_source_emitted");
            KernelArtifact::Source {
                language,
                entry: def.name,
                text,
            }
        }
    };
    Ok(artifact)
}

/// Element type of an emitted expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitType {
    Scalar(ScalarType),
    Bool,
}

struct SourceEmitter<'a> {
    lang: SourceLanguage,
    table: &'a IntrinsicTable,
    def: &'a KernelDef,
    support: EmitSupport,
    value_types: HashMap<ValueId, EmitType>,
}

impl<'a> SourceEmitter<'a> {
    fn new(lang: SourceLanguage, table: &'a IntrinsicTable, def: &'a KernelDef) -> Self {
        Self {
            lang,
            table,
            def,
            support: EmitSupport::new(),
            value_types: HashMap::new(),
        }
    }

    fn emit(mut self) -> Result<String> {
        // Body first: it populates value types and helper requirements
        let body = self.emit_body()?;

        let mut w = CodeWriter::new();
        self.emit_preamble(&mut w)?;
        for helper in self.support.helpers() {
            w.block(helper);
            w.blank();
        }
        w.open_block(self.signature()?);
        w.block(body);
        w.close_block();
        Ok(w.finish())
    }

    // --- language tables ---

    fn type_name(&self, ty: ScalarType) -> Result<&'static str> {
        let name = match (self.lang, ty) {
            (SourceLanguage::CudaC, ScalarType::I8) => "signed char",
            (SourceLanguage::CudaC, ScalarType::U8) => "unsigned char",
            (SourceLanguage::CudaC, ScalarType::I16) => "short",
            (SourceLanguage::CudaC, ScalarType::U16) => "unsigned short",
            (SourceLanguage::CudaC, ScalarType::I32) => "int",
            (SourceLanguage::CudaC, ScalarType::U32) => "unsigned int",
            (SourceLanguage::CudaC, ScalarType::I64) => "long long",
            (SourceLanguage::CudaC, ScalarType::U64) => "unsigned long long",
            (SourceLanguage::CudaC, ScalarType::F16) => "__half",
            (SourceLanguage::CudaC, ScalarType::BF16) => "__nv_bfloat16",
            (SourceLanguage::CudaC, ScalarType::F32) => "float",
            (SourceLanguage::CudaC, ScalarType::F64) => "double",

            (SourceLanguage::Msl, ScalarType::I8) => "char",
            (SourceLanguage::Msl, ScalarType::U8) => "uchar",
            (SourceLanguage::Msl, ScalarType::I16) => "short",
            (SourceLanguage::Msl, ScalarType::U16) => "ushort",
            (SourceLanguage::Msl, ScalarType::I32) => "int",
            (SourceLanguage::Msl, ScalarType::U32) => "uint",
            (SourceLanguage::Msl, ScalarType::I64) => "long",
            (SourceLanguage::Msl, ScalarType::U64) => "ulong",
            (SourceLanguage::Msl, ScalarType::F16) => "half",
            (SourceLanguage::Msl, ScalarType::BF16) => "bfloat",
            (SourceLanguage::Msl, ScalarType::F32) => "float",
            (SourceLanguage::Msl, ScalarType::F64) => {
                return Err(CodegenError::Emit("MSL has no 64-bit float type".into()))
            }

            (SourceLanguage::OpenClC, ScalarType::I8) => "char",
            (SourceLanguage::OpenClC, ScalarType::U8) => "uchar",
            (SourceLanguage::OpenClC, ScalarType::I16) => "short",
            (SourceLanguage::OpenClC, ScalarType::U16) => "ushort",
            (SourceLanguage::OpenClC, ScalarType::I32) => "int",
            (SourceLanguage::OpenClC, ScalarType::U32) => "uint",
            (SourceLanguage::OpenClC, ScalarType::I64) => "long",
            (SourceLanguage::OpenClC, ScalarType::U64) => "ulong",
            (SourceLanguage::OpenClC, ScalarType::F16) => "half",
            (SourceLanguage::OpenClC, ScalarType::F32) => "float",
            (SourceLanguage::OpenClC, ScalarType::F64) => "double",
            (SourceLanguage::OpenClC, ScalarType::BF16) => {
                return Err(CodegenError::Emit("OpenCL C has no bfloat16 type".into()))
            }
        };
        Ok(name)
    }

    fn emit_type_name(&self, ty: EmitType) -> Result<&'static str> {
        match ty {
            EmitType::Scalar(s) => self.type_name(s),
            EmitType::Bool => Ok("bool"),
        }
    }

    fn uses_type(&self, wanted: ScalarType) -> bool {
        self.def.used_intrinsics().iter().any(|&(op, ty)| !op.is_untyped() && ty == wanted)
            || self.def.params.iter().any(|p| p.kind.elem() == ElemType::Scalar(wanted))
    }

    fn emit_preamble(&self, w: &mut CodeWriter) -> Result<()> {
        match self.lang {
            SourceLanguage::CudaC => {
                if self.uses_type(ScalarType::F16) {
                    w.line("#include <cuda_fp16.h>");
                }
                if self.uses_type(ScalarType::BF16) {
                    w.line("#include <cuda_bf16.h>");
                }
            }
            SourceLanguage::Msl => {
                w.line("#include <metal_stdlib>");
                w.line("using namespace metal;");
            }
            SourceLanguage::OpenClC => {
                if self.uses_type(ScalarType::F16) {
                    w.line("#pragma OPENCL EXTENSION cl_khr_fp16 : enable");
                }
                if self.uses_type(ScalarType::F64) {
                    w.line("#pragma OPENCL EXTENSION cl_khr_fp64 : enable");
                }
            }
        }
        w.blank();
        Ok(())
    }

    fn signature(&self) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();
        for (i, p) in self.def.params.iter().enumerate() {
            let elem = p
                .kind
                .elem()
                .concrete()
                .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))?;
            let ty = self.type_name(elem)?;
            let part = match (self.lang, p.kind) {
                (SourceLanguage::CudaC, ParamKind::Buffer { writable: true, .. }) => {
                    format!("{ty}* {}", p.name)
                }
                (SourceLanguage::CudaC, ParamKind::Buffer { writable: false, .. }) => {
                    format!("const {ty}* {}", p.name)
                }
                (SourceLanguage::CudaC, ParamKind::Scalar(_)) => format!("{ty} {}", p.name),

                (SourceLanguage::Msl, ParamKind::Buffer { writable: true, .. }) => {
                    format!("device {ty}* {} [[buffer({i})]]", p.name)
                }
                (SourceLanguage::Msl, ParamKind::Buffer { writable: false, .. }) => {
                    format!("device const {ty}* {} [[buffer({i})]]", p.name)
                }
                (SourceLanguage::Msl, ParamKind::Scalar(_)) => {
                    format!("constant {ty}& {} [[buffer({i})]]", p.name)
                }

                (SourceLanguage::OpenClC, ParamKind::Buffer { writable: true, .. }) => {
                    format!("__global {ty}* {}", p.name)
                }
                (SourceLanguage::OpenClC, ParamKind::Buffer { writable: false, .. }) => {
                    format!("__global const {ty}* {}", p.name)
                }
                (SourceLanguage::OpenClC, ParamKind::Scalar(_)) => format!("const {ty} {}", p.name),
            };
            parts.push(part);
        }

        if self.lang == SourceLanguage::Msl {
            // Thread-position builtins become attributed parameters; only the
            // queries the body uses are appended. Group reductions index their
            // scratch array by lane, so they pull in __lid and __gdim too.
            let used = self.def.used_intrinsics();
            let has_reduce = used.iter().any(|(op, _)| {
                matches!(
                    op,
                    OpKind::GroupReduceAdd | OpKind::GroupReduceMin | OpKind::GroupReduceMax
                )
            });
            let builtins: &[(OpKind, bool, &str)] = &[
                (OpKind::GlobalId, false, "uint3 __gid [[thread_position_in_grid]]"),
                (OpKind::LocalId, has_reduce, "uint3 __lid [[thread_position_in_threadgroup]]"),
                (OpKind::GroupId, false, "uint3 __grp [[threadgroup_position_in_grid]]"),
                (OpKind::GroupDim, has_reduce, "uint3 __gdim [[threads_per_threadgroup]]"),
                (OpKind::GridDim, false, "uint3 __ngrp [[threadgroups_per_grid]]"),
            ];
            for (op, forced, decl) in builtins {
                if *forced || used.iter().any(|(u, _)| u == op) {
                    parts.push((*decl).to_string());
                }
            }
        }

        let qualifier = match self.lang {
            SourceLanguage::CudaC => "extern \"C\" __global__ void",
            SourceLanguage::Msl => "kernel void",
            SourceLanguage::OpenClC => "__kernel void",
        };
        Ok(format!("{qualifier} {}({})", self.def.name, parts.join(", ")))
    }

    // --- body ---

    fn emit_body(&mut self) -> Result<String> {
        let mut w = CodeWriter::new();

        // Hoist value declarations so guard predication never hides a binding
        // from later statements
        let mut decls: Vec<(ValueId, EmitType)> = Vec::new();
        for stmt in &self.def.body {
            if let Stmt::Let { id, expr } = stmt {
                let ty = self.infer(expr)?;
                self.value_types.insert(*id, ty);
                decls.push((*id, ty));
            }
        }
        for (id, ty) in &decls {
            w.line(format!("{} v{id};", self.emit_type_name(*ty)?));
        }

        // One scratch array per element type reduced over
        let mut scratch_tys: Vec<ScalarType> = Vec::new();
        for stmt in &self.def.body {
            if let Stmt::Let {
                expr: Expr::GroupReduce { ty, .. },
                ..
            } = stmt
            {
                if let Some(t) = ty.concrete() {
                    if !scratch_tys.contains(&t) {
                        scratch_tys.push(t);
                    }
                }
            }
        }
        let shared_qualifier = match self.lang {
            SourceLanguage::CudaC => "__shared__",
            SourceLanguage::Msl => "threadgroup",
            SourceLanguage::OpenClC => "__local",
        };
        for ty in &scratch_tys {
            w.line(format!(
                "{shared_qualifier} {} __ag_scratch_{ty}[{MAX_GROUP_SIZE}];",
                self.type_name(*ty)?
            ));
        }

        let has_guard = self.def.body.iter().any(|s| matches!(s, Stmt::Guard { .. }));
        if has_guard {
            w.line("bool __act = true;");
        }

        let mut guarded = false;
        for stmt in &self.def.body {
            match stmt {
                Stmt::Guard { cond } => {
                    let cond = self.emit_expr(cond)?;
                    if guarded {
                        w.line(format!("__act = __act && {cond};"));
                    } else {
                        w.line(format!("__act = {cond};"));
                    }
                    guarded = true;
                }
                Stmt::Let { id, expr } => match expr {
                    Expr::GroupReduce { op, ty, source } => {
                        self.emit_group_reduce(&mut w, *id, *op, *ty, *source, guarded)?;
                    }
                    _ => {
                        let rhs = self.emit_expr(expr)?;
                        if guarded {
                            w.line(format!("if (__act) {{ v{id} = {rhs}; }}"));
                        } else {
                            w.line(format!("v{id} = {rhs};"));
                        }
                    }
                },
                Stmt::Store { param, index, value } => {
                    let name = &self.def.params[*param].name;
                    let index = self.emit_expr(index)?;
                    let value = self.emit_expr(value)?;
                    if guarded {
                        w.line(format!("if (__act) {{ {name}[{index}] = {value}; }}"));
                    } else {
                        w.line(format!("{name}[{index}] = {value};"));
                    }
                }
                Stmt::Barrier => {
                    let code = self.invoke(OpKind::Barrier, ScalarType::U32, &[])?;
                    w.line(format!("{code};"));
                }
            }
        }
        Ok(w.finish())
    }

    /// Group reductions run on all lanes of the group; lanes a guard turned
    /// off contribute the identity element instead of their source value
    fn emit_group_reduce(
        &mut self,
        w: &mut CodeWriter,
        dest: ValueId,
        op: OpKind,
        ty: ElemType,
        source: ValueId,
        guarded: bool,
    ) -> Result<()> {
        let elem = ty
            .concrete()
            .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))?;
        let source = if guarded {
            format!("(__act ? v{source} : {})", self.reduce_identity(op, elem)?)
        } else {
            format!("v{source}")
        };
        let args = vec![
            format!("v{dest}"),
            source,
            format!("__ag_scratch_{elem}"),
        ];
        let code = self.invoke(op, elem, &args)?;
        w.block(code);
        Ok(())
    }

    fn reduce_identity(&self, op: OpKind, ty: ScalarType) -> Result<String> {
        let name = self.type_name(ty)?;
        let text = match op {
            OpKind::GroupReduceAdd => match ty {
                t if t.is_float() => format!("({name})(0.0f)"),
                _ => format!("({name})0"),
            },
            OpKind::GroupReduceMin => match ty {
                t if t.is_float() => format!("({name})(INFINITY)"),
                ScalarType::I8 => "(signed char)127".into(),
                ScalarType::I16 => "(short)32767".into(),
                ScalarType::I32 => format!("({name})2147483647"),
                ScalarType::I64 => format!("({name})9223372036854775807LL"),
                ScalarType::U8 => format!("({name})255"),
                ScalarType::U16 => format!("({name})65535"),
                ScalarType::U32 => format!("({name})4294967295u"),
                ScalarType::U64 => format!("({name})18446744073709551615ULL"),
                _ => return Err(CodegenError::Emit(format!("no reduce identity for {ty}"))),
            },
            OpKind::GroupReduceMax => match ty {
                t if t.is_float() => format!("({name})(-INFINITY)"),
                t if t.is_unsigned() => format!("({name})0"),
                ScalarType::I8 => "(signed char)-128".into(),
                ScalarType::I16 => "(short)-32768".into(),
                ScalarType::I32 => format!("({name})(-2147483647 - 1)"),
                ScalarType::I64 => format!("({name})(-9223372036854775807LL - 1)"),
                _ => return Err(CodegenError::Emit(format!("no reduce identity for {ty}"))),
            },
            other => return Err(CodegenError::Emit(format!("{other} is not a reduction"))),
        };
        Ok(text)
    }

    /// Look up and run the table entry for one operation use
    fn invoke(&mut self, op: OpKind, ty: ScalarType, args: &[String]) -> Result<String> {
        match self.table.lookup(op, ty)? {
            IntrinsicImpl::Redirect(sym) => Ok(format!("{sym}({})", args.join(", "))),
            IntrinsicImpl::Generate(f) => {
                let args: Vec<String> = args.to_vec();
                let mut call = IntrinsicCall {
                    op,
                    ty,
                    args: &args,
                    support: &mut self.support,
                };
                f(&mut call)
            }
        }
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Literal { ty, value } => {
                let elem = ty
                    .concrete()
                    .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))?;
                self.literal(elem, *value)
            }
            Expr::Value(id) => Ok(format!("v{id}")),
            Expr::ScalarParam(index) => Ok(self.def.params[*index].name.clone()),
            Expr::Load { param, index } => {
                let name = self.def.params[*param].name.clone();
                let index = self.emit_expr(index)?;
                Ok(format!("{name}[{index}]"))
            }
            Expr::ThreadIndex { op, axis } => self.invoke(*op, ScalarType::U32, &[axis.to_string()]),
            Expr::Intrinsic { op, ty, args } => {
                let elem = ty
                    .concrete()
                    .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))?;
                let args = args
                    .iter()
                    .map(|a| self.emit_expr(a))
                    .collect::<Result<Vec<_>>>()?;
                self.invoke(*op, elem, &args)
            }
            Expr::GroupReduce { .. } => Err(CodegenError::Emit(
                "group reductions must bind directly to a value".into(),
            )),
            Expr::WarpShuffle { down, ty, source, lane } => {
                let elem = ty
                    .concrete()
                    .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))?;
                let op = if *down { OpKind::WarpShuffleDown } else { OpKind::WarpShuffle };
                let lane = self.emit_expr(lane)?;
                self.invoke(op, elem, &[format!("v{source}"), lane])
            }
            Expr::CallNamed { namespace, name, args, .. } => Err(CodegenError::UnknownCall {
                namespace: namespace.clone(),
                name: name.clone(),
                arity: args.len(),
            }),
            Expr::Cast { to, from } => {
                let elem = to
                    .concrete()
                    .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))?;
                let from = self.emit_expr(from)?;
                Ok(format!("({})({from})", self.type_name(elem)?))
            }
            Expr::Cmp { cond, a, b, .. } => {
                let a = self.emit_expr(a)?;
                let b = self.emit_expr(b)?;
                let sym = match cond {
                    CmpCond::Eq => "==",
                    CmpCond::Ne => "!=",
                    CmpCond::Lt => "<",
                    CmpCond::Le => "<=",
                    CmpCond::Gt => ">",
                    CmpCond::Ge => ">=",
                };
                Ok(format!("({a} {sym} {b})"))
            }
        }
    }

    fn literal(&self, ty: ScalarType, value: Literal) -> Result<String> {
        let text = match (ty, value) {
            (ScalarType::F32, Literal::Float(v)) => format!("{}f", fmt_float(v)),
            (ScalarType::F64, Literal::Float(v)) => fmt_float(v),
            (ScalarType::F16 | ScalarType::BF16, Literal::Float(v)) => {
                format!("({})({}f)", self.type_name(ty)?, fmt_float(v))
            }
            // Remaining types are the integers; emit a cast
            (t, Literal::Float(v)) => format!("({})({v})", self.type_name(t)?),
            (t, Literal::Int(v)) if t.is_float() => {
                return self.literal(t, Literal::Float(v as f64))
            }
            (ScalarType::I64, Literal::Int(v)) => match self.lang {
                SourceLanguage::Msl => format!("{v}L"),
                _ => format!("{v}LL"),
            },
            (ScalarType::U64, Literal::Int(v)) => match self.lang {
                SourceLanguage::Msl => format!("{v}UL"),
                _ => format!("{v}ULL"),
            },
            (t, Literal::UInt(v)) if t.is_float() => {
                return self.literal(t, Literal::Float(v as f64))
            }
            (ScalarType::U64, Literal::UInt(v)) => match self.lang {
                SourceLanguage::Msl => format!("{v}UL"),
                _ => format!("{v}ULL"),
            },
            (t, Literal::UInt(v)) if t.is_unsigned() => format!("{v}u"),
            (_, Literal::Int(v)) => format!("{v}"),
            (_, Literal::UInt(v)) => format!("{v}"),
            (_, Literal::Bool(v)) => format!("{v}"),
        };
        Ok(text)
    }

    fn infer(&self, expr: &Expr) -> Result<EmitType> {
        let elem = |ty: &ElemType| -> Result<EmitType> {
            ty.concrete()
                .map(EmitType::Scalar)
                .ok_or_else(|| CodegenError::UnspecializedKernel(self.def.name.clone()))
        };
        match expr {
            Expr::Literal { ty, value } => match value {
                Literal::Bool(_) => Ok(EmitType::Bool),
                _ => elem(ty),
            },
            Expr::Value(id) => self
                .value_types
                .get(id)
                .copied()
                .ok_or_else(|| CodegenError::Emit(format!("v{id} used before binding"))),
            Expr::ScalarParam(index) => elem(&self.def.params[*index].kind.elem()),
            Expr::Load { param, .. } => elem(&self.def.params[*param].kind.elem()),
            Expr::ThreadIndex { .. } => Ok(EmitType::Scalar(ScalarType::U32)),
            Expr::Intrinsic { ty, .. } => elem(ty),
            Expr::GroupReduce { ty, .. } => elem(ty),
            Expr::WarpShuffle { ty, .. } => elem(ty),
            Expr::CallNamed { ty, .. } => elem(ty),
            Expr::Cast { to, .. } => elem(to),
            Expr::Cmp { .. } => Ok(EmitType::Bool),
        }
    }
}

fn fmt_float(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e17 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_ir::{Axis, KernelBuilder};

    // Minimal CUDA-flavored table covering what the fixtures use
    fn cuda_table() -> IntrinsicTable {
        let mut t = IntrinsicTable::new("cuda-test");
        t.generate_all(
            OpKind::Mul,
            &[ScalarType::F32, ScalarType::U32],
            |c| Ok(format!("({} * {})", c.args[0], c.args[1])),
        )
        .unwrap();
        t.generate(OpKind::Add, ScalarType::F32, |c| {
            Ok(format!("({} + {})", c.args[0], c.args[1]))
        })
        .unwrap();
        t.redirect(OpKind::Sqrt, ScalarType::F32, "sqrtf").unwrap();
        t.generate(OpKind::GlobalId, ScalarType::U32, |c| {
            let axis = &c.args[0];
            Ok(format!("(blockIdx.{axis} * blockDim.{axis} + threadIdx.{axis})"))
        })
        .unwrap();
        t.redirect(OpKind::Barrier, ScalarType::U32, "__syncthreads").unwrap();
        t.generate(OpKind::GroupReduceAdd, ScalarType::F32, |c| {
            let (dest, src, scratch) = (&c.args[0], &c.args[1], &c.args[2]);
            Ok(format!(
                "{scratch}[threadIdx.x] = {src};\n__syncthreads();\nif (threadIdx.x == 0) {{\n    float __acc = 0.0f;\n    for (unsigned int __i = 0; __i < blockDim.x; __i++) __acc += {scratch}[__i];\n    {scratch}[0] = __acc;\n}}\n__syncthreads();\n{dest} = {scratch}[0];"
            ))
        })
        .unwrap();
        t
    }

    fn saxpy_f32() -> KernelDef {
        // out[gid] = a * x[gid] + y[gid] for gid < n
        let f32 = ElemType::Scalar(ScalarType::F32);
        let mut b = KernelBuilder::new("saxpy_f32");
        let out = b.buffer_param("out", f32, true);
        let x = b.buffer_param("x", f32, false);
        let y = b.buffer_param("y", f32, false);
        let a = b.scalar_param("a", f32);
        let n = b.scalar_param("n", ElemType::Scalar(ScalarType::U32));
        let gid = b.bind(Expr::ThreadIndex {
            op: OpKind::GlobalId,
            axis: Axis::X,
        });
        b.guard(Expr::Cmp {
            cond: CmpCond::Lt,
            ty: ElemType::Scalar(ScalarType::U32),
            a: Box::new(Expr::Value(gid)),
            b: Box::new(Expr::ScalarParam(n)),
        });
        let scaled = b.bind(Expr::Intrinsic {
            op: OpKind::Mul,
            ty: f32,
            args: vec![
                Expr::ScalarParam(a),
                Expr::Load {
                    param: x,
                    index: Box::new(Expr::Value(gid)),
                },
            ],
        });
        let sum = b.bind(Expr::Intrinsic {
            op: OpKind::Add,
            ty: f32,
            args: vec![
                Expr::Value(scaled),
                Expr::Load {
                    param: y,
                    index: Box::new(Expr::Value(gid)),
                },
            ],
        });
        b.store(out, Expr::Value(gid), Expr::Value(sum));
        b.build().unwrap()
    }

    #[test]
    fn test_interpret_target_keeps_ir() {
        let table = cuda_table();
        let artifact = lower(
            saxpy_f32(),
            LowerTarget::Interpret,
            &table,
            &CancellationToken::ignored(),
        )
        .unwrap();
        match artifact {
            KernelArtifact::Interpreted(def) => assert_eq!(def.name, "saxpy_f32"),
            other => panic!("expected interpreted artifact, got {other:?}"),
        }
    }

    #[test]
    fn test_cuda_source_shape() {
        let table = cuda_table();
        let artifact = lower(
            saxpy_f32(),
            LowerTarget::Source(SourceLanguage::CudaC),
            &table,
            &CancellationToken::ignored(),
        )
        .unwrap();
        let KernelArtifact::Source { language, entry, text } = artifact else {
            panic!("expected source artifact");
        };
        assert_eq!(language, SourceLanguage::CudaC);
        assert_eq!(entry, "saxpy_f32");
        assert!(text.contains("extern \"C\" __global__ void saxpy_f32(float* out, const float* x, const float* y, float a, unsigned int n)"));
        assert!(text.contains("blockIdx.x * blockDim.x + threadIdx.x"));
        // Guard becomes predication on the store
        assert!(text.contains("bool __act = true;"));
        assert!(text.contains("if (__act) { out[v0] = v2; }"));
    }

    #[test]
    fn test_unsupported_intrinsic_fails_before_emit() {
        let table = cuda_table();
        let f32 = ElemType::Scalar(ScalarType::F32);
        let mut b = KernelBuilder::new("needs_sin");
        let out = b.buffer_param("out", f32, true);
        let v = b.bind(Expr::Intrinsic {
            op: OpKind::Sin,
            ty: f32,
            args: vec![Expr::Literal {
                ty: f32,
                value: Literal::Float(1.0),
            }],
        });
        b.store(
            out,
            Expr::Literal {
                ty: ElemType::Scalar(ScalarType::U32),
                value: Literal::UInt(0),
            },
            Expr::Value(v),
        );
        let err = lower(
            b.build().unwrap(),
            LowerTarget::Source(SourceLanguage::CudaC),
            &table,
            &CancellationToken::ignored(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodegenError::UnsupportedIntrinsic {
                op: OpKind::Sin,
                ty: ScalarType::F32
            }
        ));
    }

    #[test]
    fn test_generic_kernel_rejected() {
        let table = cuda_table();
        let mut b = KernelBuilder::new("generic");
        let out = b.buffer_param("out", ElemType::Generic, true);
        b.store(
            out,
            Expr::Literal {
                ty: ElemType::Scalar(ScalarType::U32),
                value: Literal::UInt(0),
            },
            Expr::Literal {
                ty: ElemType::Generic,
                value: Literal::Float(0.0),
            },
        );
        let err = lower(
            b.build().unwrap(),
            LowerTarget::Interpret,
            &table,
            &CancellationToken::ignored(),
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::UnspecializedKernel(_)));
    }

    #[test]
    fn test_group_reduce_emits_scratch_and_identity_mask() {
        let table = cuda_table();
        let f32 = ElemType::Scalar(ScalarType::F32);
        let mut b = KernelBuilder::new("block_sum");
        let out = b.buffer_param("out", f32, true);
        let src = b.buffer_param("in", f32, false);
        let n = b.scalar_param("n", ElemType::Scalar(ScalarType::U32));
        let gid = b.bind(Expr::ThreadIndex {
            op: OpKind::GlobalId,
            axis: Axis::X,
        });
        b.guard(Expr::Cmp {
            cond: CmpCond::Lt,
            ty: ElemType::Scalar(ScalarType::U32),
            a: Box::new(Expr::Value(gid)),
            b: Box::new(Expr::ScalarParam(n)),
        });
        let v = b.bind(Expr::Load {
            param: src,
            index: Box::new(Expr::Value(gid)),
        });
        let total = b.bind(Expr::GroupReduce {
            op: OpKind::GroupReduceAdd,
            ty: f32,
            source: v,
        });
        b.store(out, Expr::Value(gid), Expr::Value(total));
        let artifact = lower(
            b.build().unwrap(),
            LowerTarget::Source(SourceLanguage::CudaC),
            &table,
            &CancellationToken::ignored(),
        )
        .unwrap();
        let KernelArtifact::Source { text, .. } = artifact else {
            panic!("expected source artifact");
        };
        assert!(text.contains("__shared__ float __ag_scratch_f32[1024];"));
        // Deactivated lanes contribute the additive identity
        assert!(text.contains("(__act ? v1 : (float)(0.0f))"));
    }

    #[test]
    fn test_integer_typed_float_literal_emits_cast() {
        let table = cuda_table();
        let u32t = ElemType::Scalar(ScalarType::U32);
        let mut b = KernelBuilder::new("fill_three");
        let out = b.buffer_param("out", u32t, true);
        b.store(
            out,
            Expr::Literal {
                ty: u32t,
                value: Literal::UInt(0),
            },
            Expr::Literal {
                ty: u32t,
                value: Literal::Float(3.0),
            },
        );
        let artifact = lower(
            b.build().unwrap(),
            LowerTarget::Source(SourceLanguage::CudaC),
            &table,
            &CancellationToken::ignored(),
        )
        .unwrap();
        let KernelArtifact::Source { text, .. } = artifact else {
            panic!("expected source artifact");
        };
        assert!(text.contains("(unsigned int)(3)"));
    }

    #[test]
    fn test_cancellation_stops_pipeline() {
        let table = cuda_table();
        let token = CancellationToken::new();
        token.cancel();
        let err = lower(saxpy_f32(), LowerTarget::Interpret, &table, &token).unwrap_err();
        assert!(matches!(err, CodegenError::Cancelled));
    }

    #[test]
    fn test_opencl_and_cuda_differ_from_one_definition() {
        let mut opencl = IntrinsicTable::new("opencl-test");
        opencl
            .generate_all(OpKind::Mul, &[ScalarType::F32, ScalarType::U32], |c| {
                Ok(format!("({} * {})", c.args[0], c.args[1]))
            })
            .unwrap();
        opencl
            .generate(OpKind::Add, ScalarType::F32, |c| {
                Ok(format!("({} + {})", c.args[0], c.args[1]))
            })
            .unwrap();
        opencl
            .generate(OpKind::GlobalId, ScalarType::U32, |c| {
                let dim = match c.args[0].as_str() {
                    "x" => 0,
                    "y" => 1,
                    _ => 2,
                };
                Ok(format!("((uint)get_global_id({dim}))"))
            })
            .unwrap();

        let cuda_text = match lower(
            saxpy_f32(),
            LowerTarget::Source(SourceLanguage::CudaC),
            &cuda_table(),
            &CancellationToken::ignored(),
        )
        .unwrap()
        {
            KernelArtifact::Source { text, .. } => text,
            _ => unreachable!(),
        };
        let cl_text = match lower(
            saxpy_f32(),
            LowerTarget::Source(SourceLanguage::OpenClC),
            &opencl,
            &CancellationToken::ignored(),
        )
        .unwrap()
        {
            KernelArtifact::Source { text, .. } => text,
            _ => unreachable!(),
        };
        assert!(cuda_text.contains("__global__"));
        assert!(cl_text.contains("__kernel void saxpy_f32(__global float* out"));
        assert!(cl_text.contains("get_global_id(0)"));
        assert_ne!(cuda_text, cl_text);
    }
}
