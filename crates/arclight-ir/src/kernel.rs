//! Kernel definitions
//!
//! A `KernelDef` is a parameter list plus a straight-line statement body
//! executed once per lane of the launch grid. Expressions are pure per-lane
//! values; cross-lane communication happens only through the explicit
//! collective forms (`GroupReduce`, `WarpShuffle`), whose sources are named
//! bindings so every backend can evaluate them in statement lockstep.
//!
//! The body is deliberately structured (no arbitrary control flow): the only
//! forms are value bindings, a bounds guard that deactivates lanes, stores,
//! and barriers. This keeps the per-backend lowering small while covering the
//! launch-grid kernels the runtime dispatches.

use crate::ops::{Axis, OpKind};
use crate::types::{ElemType, ScalarType};
use std::fmt;

/// Identifier of a `Let`-bound value within one kernel body
pub type ValueId = u32;

/// A complete portable kernel definition
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KernelDef {
    /// Entry-point name (must be a valid C identifier for source backends)
    pub name: String,
    /// Ordered parameter list; launch arguments bind positionally
    pub params: Vec<KernelParam>,
    /// Straight-line statement body
    pub body: Vec<Stmt>,
}

/// One kernel parameter
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KernelParam {
    pub name: String,
    pub kind: ParamKind,
}

/// Parameter binding kind
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParamKind {
    /// A device buffer of `elem` elements
    Buffer { elem: ElemType, writable: bool },
    /// A scalar passed by value at launch
    Scalar(ElemType),
}

impl ParamKind {
    /// Element type of this parameter
    pub const fn elem(self) -> ElemType {
        match self {
            ParamKind::Buffer { elem, .. } => elem,
            ParamKind::Scalar(elem) => elem,
        }
    }
}

/// A literal constant
///
/// Literals are stored widened; the surrounding expression's element type
/// decides the value actually materialized.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

/// Comparison condition for guards and selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CmpCond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpCond::Eq => "eq",
            CmpCond::Ne => "ne",
            CmpCond::Lt => "lt",
            CmpCond::Le => "le",
            CmpCond::Gt => "gt",
            CmpCond::Ge => "ge",
        };
        write!(f, "{s}")
    }
}

/// A pure per-lane expression
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    /// A literal constant of the given element type
    Literal { ty: ElemType, value: Literal },
    /// A previously bound value
    Value(ValueId),
    /// A scalar kernel parameter (by parameter index)
    ScalarParam(usize),
    /// Element load from a buffer parameter at an element index
    Load { param: usize, index: Box<Expr> },
    /// Thread-position query (`op` must be an index query)
    ThreadIndex { op: OpKind, axis: Axis },
    /// A typed portable operation applied to argument expressions
    Intrinsic {
        op: OpKind,
        ty: ElemType,
        args: Vec<Expr>,
    },
    /// Group-wide reduction over a named per-lane binding
    GroupReduce {
        op: OpKind,
        ty: ElemType,
        source: ValueId,
    },
    /// Warp shuffle of a named per-lane binding
    WarpShuffle {
        down: bool,
        ty: ElemType,
        source: ValueId,
        lane: Box<Expr>,
    },
    /// Unresolved host-namespace call, substituted by the remap pass
    ///
    /// Kernel authors write familiar calls such as `Math.sin(x)`; the
    /// pipeline rewrites these to `Intrinsic` nodes before matching. A
    /// `CallNamed` that survives to matching is a compile error.
    CallNamed {
        namespace: String,
        name: String,
        ty: ElemType,
        args: Vec<Expr>,
    },
    /// Numeric conversion
    Cast { to: ElemType, from: Box<Expr> },
    /// Comparison producing a boolean
    Cmp {
        cond: CmpCond,
        ty: ElemType,
        a: Box<Expr>,
        b: Box<Expr>,
    },
}

/// One statement of a kernel body
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    /// Bind `id` to `expr` in every active lane
    Let { id: ValueId, expr: Expr },
    /// Deactivate lanes for which `cond` is false; deactivated lanes skip the
    /// rest of the body (the usual bounds guard at the top of a kernel)
    Guard { cond: Expr },
    /// Store `value` at element `index` of buffer parameter `param`
    Store { param: usize, index: Expr, value: Expr },
    /// Group-wide execution barrier
    Barrier,
}

/// Validation failure for a kernel definition
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("value v{0} used before definition")]
    UndefinedValue(ValueId),

    #[error("value v{0} bound twice")]
    Rebind(ValueId),

    #[error("parameter index {0} out of range ({1} parameters)")]
    BadParamIndex(usize, usize),

    #[error("parameter {0} is not a buffer")]
    NotABuffer(usize),

    #[error("parameter {0} is not a scalar")]
    NotAScalar(usize),

    #[error("store to read-only buffer parameter {0}")]
    StoreToReadOnly(usize),

    #[error("operation {op} used with {given} arguments, expects {expected}")]
    BadArity {
        op: OpKind,
        given: usize,
        expected: usize,
    },

    #[error("{0} is not an index query")]
    NotAnIndexQuery(OpKind),

    #[error("{0} is not a reduction")]
    NotAReduction(OpKind),

    #[error("kernel name {0:?} is not a valid identifier")]
    BadName(String),
}

impl KernelDef {
    /// Check structural well-formedness: binding order, parameter indices,
    /// arities, and store targets
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .enumerate()
                .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
        {
            return Err(ValidationError::BadName(self.name.clone()));
        }

        let mut defined: Vec<ValueId> = Vec::new();
        for stmt in &self.body {
            match stmt {
                Stmt::Let { id, expr } => {
                    self.validate_expr(expr, &defined)?;
                    if defined.contains(id) {
                        return Err(ValidationError::Rebind(*id));
                    }
                    defined.push(*id);
                }
                Stmt::Guard { cond } => self.validate_expr(cond, &defined)?,
                Stmt::Store { param, index, value } => {
                    let kind = self.param_kind(*param)?;
                    match kind {
                        ParamKind::Buffer { writable: true, .. } => {}
                        ParamKind::Buffer { writable: false, .. } => {
                            return Err(ValidationError::StoreToReadOnly(*param));
                        }
                        ParamKind::Scalar(_) => return Err(ValidationError::NotABuffer(*param)),
                    }
                    self.validate_expr(index, &defined)?;
                    self.validate_expr(value, &defined)?;
                }
                Stmt::Barrier => {}
            }
        }
        Ok(())
    }

    /// True if any element type in the definition is still generic
    pub fn is_generic(&self) -> bool {
        fn expr_generic(e: &Expr) -> bool {
            match e {
                Expr::Literal { ty, .. } => ty.is_generic(),
                Expr::Value(_) | Expr::ScalarParam(_) | Expr::ThreadIndex { .. } => false,
                Expr::Load { index, .. } => expr_generic(index),
                Expr::Intrinsic { ty, args, .. } => ty.is_generic() || args.iter().any(expr_generic),
                Expr::GroupReduce { ty, .. } => ty.is_generic(),
                Expr::WarpShuffle { ty, lane, .. } => ty.is_generic() || expr_generic(lane),
                Expr::CallNamed { ty, args, .. } => ty.is_generic() || args.iter().any(expr_generic),
                Expr::Cast { to, from } => to.is_generic() || expr_generic(from),
                Expr::Cmp { ty, a, b, .. } => ty.is_generic() || expr_generic(a) || expr_generic(b),
            }
        }
        self.params.iter().any(|p| p.kind.elem().is_generic())
            || self.body.iter().any(|s| match s {
                Stmt::Let { expr, .. } => expr_generic(expr),
                Stmt::Guard { cond } => expr_generic(cond),
                Stmt::Store { index, value, .. } => expr_generic(index) || expr_generic(value),
                Stmt::Barrier => false,
            })
    }

    /// Collect every `(OpKind, ScalarType)` pair the body uses
    ///
    /// Only valid on specialized kernels; generic element types are skipped
    /// (the pipeline specializes before calling this).
    pub fn used_intrinsics(&self) -> Vec<(OpKind, ScalarType)> {
        let mut used = Vec::new();
        let mut push = |op: OpKind, ty: ElemType, used: &mut Vec<(OpKind, ScalarType)>| {
            let key_ty = if op.is_untyped() {
                ScalarType::U32
            } else {
                match ty.concrete() {
                    Some(t) => t,
                    None => return,
                }
            };
            if !used.contains(&(op, key_ty)) {
                used.push((op, key_ty));
            }
        };
        fn walk(
            e: &Expr,
            push: &mut impl FnMut(OpKind, ElemType, &mut Vec<(OpKind, ScalarType)>),
            used: &mut Vec<(OpKind, ScalarType)>,
        ) {
            match e {
                Expr::Literal { .. } | Expr::Value(_) | Expr::ScalarParam(_) => {}
                Expr::Load { index, .. } => walk(index, push, used),
                Expr::ThreadIndex { op, .. } => push(*op, ElemType::Scalar(ScalarType::U32), used),
                Expr::Intrinsic { op, ty, args } => {
                    push(*op, *ty, used);
                    for a in args {
                        walk(a, push, used);
                    }
                }
                Expr::GroupReduce { op, ty, .. } => push(*op, *ty, used),
                Expr::WarpShuffle { down, ty, lane, .. } => {
                    let op = if *down { OpKind::WarpShuffleDown } else { OpKind::WarpShuffle };
                    push(op, *ty, used);
                    walk(lane, push, used);
                }
                Expr::CallNamed { args, .. } => {
                    for a in args {
                        walk(a, push, used);
                    }
                }
                Expr::Cast { from, .. } => walk(from, push, used),
                Expr::Cmp { a, b, .. } => {
                    walk(a, push, used);
                    walk(b, push, used);
                }
            }
        }
        for stmt in &self.body {
            match stmt {
                Stmt::Let { expr, .. } => walk(expr, &mut push, &mut used),
                Stmt::Guard { cond } => walk(cond, &mut push, &mut used),
                Stmt::Store { index, value, .. } => {
                    walk(index, &mut push, &mut used);
                    walk(value, &mut push, &mut used);
                }
                Stmt::Barrier => push(OpKind::Barrier, ElemType::Scalar(ScalarType::U32), &mut used),
            }
        }
        used
    }

    /// True if any `CallNamed` node remains (remap pass not yet run)
    pub fn has_unresolved_calls(&self) -> bool {
        fn expr_has(e: &Expr) -> bool {
            match e {
                Expr::CallNamed { .. } => true,
                Expr::Literal { .. } | Expr::Value(_) | Expr::ScalarParam(_) | Expr::ThreadIndex { .. } => false,
                Expr::Load { index, .. } => expr_has(index),
                Expr::Intrinsic { args, .. } => args.iter().any(expr_has),
                Expr::GroupReduce { .. } => false,
                Expr::WarpShuffle { lane, .. } => expr_has(lane),
                Expr::Cast { from, .. } => expr_has(from),
                Expr::Cmp { a, b, .. } => expr_has(a) || expr_has(b),
            }
        }
        self.body.iter().any(|s| match s {
            Stmt::Let { expr, .. } => expr_has(expr),
            Stmt::Guard { cond } => expr_has(cond),
            Stmt::Store { index, value, .. } => expr_has(index) || expr_has(value),
            Stmt::Barrier => false,
        })
    }

    fn param_kind(&self, index: usize) -> Result<ParamKind, ValidationError> {
        self.params
            .get(index)
            .map(|p| p.kind)
            .ok_or(ValidationError::BadParamIndex(index, self.params.len()))
    }

    fn validate_expr(&self, expr: &Expr, defined: &[ValueId]) -> Result<(), ValidationError> {
        match expr {
            Expr::Literal { .. } => Ok(()),
            Expr::Value(id) => {
                if defined.contains(id) {
                    Ok(())
                } else {
                    Err(ValidationError::UndefinedValue(*id))
                }
            }
            Expr::ScalarParam(index) => match self.param_kind(*index)? {
                ParamKind::Scalar(_) => Ok(()),
                ParamKind::Buffer { .. } => Err(ValidationError::NotAScalar(*index)),
            },
            Expr::Load { param, index } => {
                match self.param_kind(*param)? {
                    ParamKind::Buffer { .. } => {}
                    ParamKind::Scalar(_) => return Err(ValidationError::NotABuffer(*param)),
                }
                self.validate_expr(index, defined)
            }
            Expr::ThreadIndex { op, .. } => {
                if op.is_index_query() {
                    Ok(())
                } else {
                    Err(ValidationError::NotAnIndexQuery(*op))
                }
            }
            Expr::Intrinsic { op, args, .. } => {
                if args.len() != op.arity() {
                    return Err(ValidationError::BadArity {
                        op: *op,
                        given: args.len(),
                        expected: op.arity(),
                    });
                }
                for a in args {
                    self.validate_expr(a, defined)?;
                }
                Ok(())
            }
            Expr::GroupReduce { op, source, .. } => {
                if !matches!(op, OpKind::GroupReduceAdd | OpKind::GroupReduceMin | OpKind::GroupReduceMax) {
                    return Err(ValidationError::NotAReduction(*op));
                }
                if defined.contains(source) {
                    Ok(())
                } else {
                    Err(ValidationError::UndefinedValue(*source))
                }
            }
            Expr::WarpShuffle { source, lane, .. } => {
                if !defined.contains(source) {
                    return Err(ValidationError::UndefinedValue(*source));
                }
                self.validate_expr(lane, defined)
            }
            Expr::CallNamed { args, .. } => {
                for a in args {
                    self.validate_expr(a, defined)?;
                }
                Ok(())
            }
            Expr::Cast { from, .. } => self.validate_expr(from, defined),
            Expr::Cmp { a, b, .. } => {
                self.validate_expr(a, defined)?;
                self.validate_expr(b, defined)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_index_kernel() -> KernelDef {
        // out[i] = i for i < n
        KernelDef {
            name: "write_index".into(),
            params: vec![
                KernelParam {
                    name: "out".into(),
                    kind: ParamKind::Buffer {
                        elem: ElemType::Scalar(ScalarType::I32),
                        writable: true,
                    },
                },
                KernelParam {
                    name: "n".into(),
                    kind: ParamKind::Scalar(ElemType::Scalar(ScalarType::U32)),
                },
            ],
            body: vec![
                Stmt::Let {
                    id: 0,
                    expr: Expr::ThreadIndex {
                        op: OpKind::GlobalId,
                        axis: Axis::X,
                    },
                },
                Stmt::Guard {
                    cond: Expr::Cmp {
                        cond: CmpCond::Lt,
                        ty: ElemType::Scalar(ScalarType::U32),
                        a: Box::new(Expr::Value(0)),
                        b: Box::new(Expr::ScalarParam(1)),
                    },
                },
                Stmt::Store {
                    param: 0,
                    index: Expr::Value(0),
                    value: Expr::Cast {
                        to: ElemType::Scalar(ScalarType::I32),
                        from: Box::new(Expr::Value(0)),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_validate_ok() {
        write_index_kernel().validate().unwrap();
    }

    #[test]
    fn test_validate_undefined_value() {
        let mut def = write_index_kernel();
        def.body[0] = Stmt::Let {
            id: 0,
            expr: Expr::Value(7),
        };
        assert_eq!(def.validate(), Err(ValidationError::UndefinedValue(7)));
    }

    #[test]
    fn test_validate_store_to_readonly() {
        let mut def = write_index_kernel();
        def.params[0].kind = ParamKind::Buffer {
            elem: ElemType::Scalar(ScalarType::I32),
            writable: false,
        };
        assert_eq!(def.validate(), Err(ValidationError::StoreToReadOnly(0)));
    }

    #[test]
    fn test_validate_bad_arity() {
        let def = KernelDef {
            name: "bad".into(),
            params: vec![],
            body: vec![Stmt::Let {
                id: 0,
                expr: Expr::Intrinsic {
                    op: OpKind::Add,
                    ty: ElemType::Scalar(ScalarType::F32),
                    args: vec![Expr::Literal {
                        ty: ElemType::Scalar(ScalarType::F32),
                        value: Literal::Float(1.0),
                    }],
                },
            }],
        };
        assert!(matches!(def.validate(), Err(ValidationError::BadArity { .. })));
    }

    #[test]
    fn test_validate_bad_name() {
        let mut def = write_index_kernel();
        def.name = "1bad name".into();
        assert!(matches!(def.validate(), Err(ValidationError::BadName(_))));
    }

    #[test]
    fn test_used_intrinsics() {
        let used = write_index_kernel().used_intrinsics();
        assert!(used.contains(&(OpKind::GlobalId, ScalarType::U32)));
        // No math ops in this kernel
        assert!(!used.iter().any(|(op, _)| *op == OpKind::Sin));
    }

    #[test]
    fn test_generic_detection() {
        let mut def = write_index_kernel();
        assert!(!def.is_generic());
        def.params[0].kind = ParamKind::Buffer {
            elem: ElemType::Generic,
            writable: true,
        };
        assert!(def.is_generic());
    }

    #[test]
    fn test_unresolved_call_detection() {
        let mut def = write_index_kernel();
        assert!(!def.has_unresolved_calls());
        def.body.push(Stmt::Let {
            id: 1,
            expr: Expr::CallNamed {
                namespace: "Math".into(),
                name: "sin".into(),
                ty: ElemType::Scalar(ScalarType::F32),
                args: vec![Expr::Literal {
                    ty: ElemType::Scalar(ScalarType::F32),
                    value: Literal::Float(0.5),
                }],
            },
        });
        assert!(def.has_unresolved_calls());
    }
}
