//! Host-call substitution pass
//!
//! Kernel authors write calls in familiar host namespaces (`Math.sin(x)`,
//! `Math.pow(a, b)`). This pass rewrites every `CallNamed` node into the
//! portable `Intrinsic` node it stands for, keyed by
//! `(namespace, name, arity)` so overloads like `Math.min/2` resolve
//! unambiguously. A call with no table entry fails with `UnknownCall`;
//! after a successful pass the definition carries no `CallNamed` nodes.

use crate::error::{CodegenError, Result};
use arclight_ir::{Expr, KernelDef, OpKind, Stmt};
use std::collections::HashMap;
use std::sync::OnceLock;

// The element type rides on the CallNamed node and is checked at
// intrinsic-match time, so arity alone disambiguates overloads here;
// parameter types never need to enter the key.
type CallKey = (&'static str, &'static str, usize);

fn substitution_table() -> &'static HashMap<CallKey, OpKind> {
    static TABLE: OnceLock<HashMap<CallKey, OpKind>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = HashMap::new();
        t.insert(("Math", "abs", 1), OpKind::Abs);
        t.insert(("Math", "min", 2), OpKind::Min);
        t.insert(("Math", "max", 2), OpKind::Max);
        t.insert(("Math", "fma", 3), OpKind::MulAdd);
        t.insert(("Math", "sqrt", 1), OpKind::Sqrt);
        t.insert(("Math", "rsqrt", 1), OpKind::Rsqrt);
        t.insert(("Math", "sin", 1), OpKind::Sin);
        t.insert(("Math", "cos", 1), OpKind::Cos);
        t.insert(("Math", "tan", 1), OpKind::Tan);
        t.insert(("Math", "exp", 1), OpKind::Exp);
        t.insert(("Math", "log", 1), OpKind::Log);
        t.insert(("Math", "pow", 2), OpKind::Pow);
        t.insert(("Math", "floor", 1), OpKind::Floor);
        t.insert(("Math", "ceil", 1), OpKind::Ceil);
        t.insert(("Math", "round", 1), OpKind::Round);
        t.insert(("Math", "tanh", 1), OpKind::Tanh);
        t
    })
}

fn resolve(namespace: &str, name: &str, arity: usize) -> Result<OpKind> {
    substitution_table()
        .get(&(namespace, name, arity))
        .copied()
        .ok_or_else(|| CodegenError::UnknownCall {
            namespace: namespace.to_string(),
            name: name.to_string(),
            arity,
        })
}

fn remap_expr(expr: Expr) -> Result<Expr> {
    Ok(match expr {
        Expr::CallNamed {
            namespace,
            name,
            ty,
            args,
        } => {
            let op = resolve(&namespace, &name, args.len())?;
            let args = args.into_iter().map(remap_expr).collect::<Result<Vec<_>>>()?;
            Expr::Intrinsic { op, ty, args }
        }
        Expr::Load { param, index } => Expr::Load {
            param,
            index: Box::new(remap_expr(*index)?),
        },
        Expr::Intrinsic { op, ty, args } => Expr::Intrinsic {
            op,
            ty,
            args: args.into_iter().map(remap_expr).collect::<Result<Vec<_>>>()?,
        },
        Expr::WarpShuffle { down, ty, source, lane } => Expr::WarpShuffle {
            down,
            ty,
            source,
            lane: Box::new(remap_expr(*lane)?),
        },
        Expr::Cast { to, from } => Expr::Cast {
            to,
            from: Box::new(remap_expr(*from)?),
        },
        Expr::Cmp { cond, ty, a, b } => Expr::Cmp {
            cond,
            ty,
            a: Box::new(remap_expr(*a)?),
            b: Box::new(remap_expr(*b)?),
        },
        leaf @ (Expr::Literal { .. }
        | Expr::Value(_)
        | Expr::ScalarParam(_)
        | Expr::ThreadIndex { .. }
        | Expr::GroupReduce { .. }) => leaf,
    })
}

/// Rewrite every host-namespace call into its portable intrinsic
#[tracing::instrument(skip(def), fields(kernel = %def.name))]
pub fn remap(def: KernelDef) -> Result<KernelDef> {
    let body = def
        .body
        .into_iter()
        .map(|stmt| {
            Ok(match stmt {
                Stmt::Let { id, expr } => Stmt::Let {
                    id,
                    expr: remap_expr(expr)?,
                },
                Stmt::Guard { cond } => Stmt::Guard {
                    cond: remap_expr(cond)?,
                },
                Stmt::Store { param, index, value } => Stmt::Store {
                    param,
                    index: remap_expr(index)?,
                    value: remap_expr(value)?,
                },
                Stmt::Barrier => Stmt::Barrier,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let remapped = KernelDef {
        name: def.name,
        params: def.params,
        body,
    };
    debug_assert!(!remapped.has_unresolved_calls());
    Ok(remapped)
}
