//! Generic-element specialization pass
//!
//! A kernel may be authored once over `ElemType::Generic` and instantiated
//! per concrete element type. This pass substitutes a concrete `ScalarType`
//! for every generic slot and suffixes the entry-point name with the type
//! (`saxpy` → `saxpy_f32`), so each instantiation caches and links under a
//! distinct symbol. There is no implicit widening: the chosen type is used
//! exactly as given, and intrinsic matching later decides whether the
//! backend supports it.

use arclight_ir::{ElemType, Expr, KernelDef, ScalarType, Stmt};

fn subst(ty: ElemType, concrete: ScalarType) -> ElemType {
    match ty {
        ElemType::Generic => ElemType::Scalar(concrete),
        scalar => scalar,
    }
}

fn specialize_expr(expr: Expr, concrete: ScalarType) -> Expr {
    match expr {
        Expr::Literal { ty, value } => Expr::Literal {
            ty: subst(ty, concrete),
            value,
        },
        Expr::Load { param, index } => Expr::Load {
            param,
            index: Box::new(specialize_expr(*index, concrete)),
        },
        Expr::Intrinsic { op, ty, args } => Expr::Intrinsic {
            op,
            ty: subst(ty, concrete),
            args: args.into_iter().map(|a| specialize_expr(a, concrete)).collect(),
        },
        Expr::GroupReduce { op, ty, source } => Expr::GroupReduce {
            op,
            ty: subst(ty, concrete),
            source,
        },
        Expr::WarpShuffle { down, ty, source, lane } => Expr::WarpShuffle {
            down,
            ty: subst(ty, concrete),
            source,
            lane: Box::new(specialize_expr(*lane, concrete)),
        },
        Expr::CallNamed {
            namespace,
            name,
            ty,
            args,
        } => Expr::CallNamed {
            namespace,
            name,
            ty: subst(ty, concrete),
            args: args.into_iter().map(|a| specialize_expr(a, concrete)).collect(),
        },
        Expr::Cast { to, from } => Expr::Cast {
            to: subst(to, concrete),
            from: Box::new(specialize_expr(*from, concrete)),
        },
        Expr::Cmp { cond, ty, a, b } => Expr::Cmp {
            cond,
            ty: subst(ty, concrete),
            a: Box::new(specialize_expr(*a, concrete)),
            b: Box::new(specialize_expr(*b, concrete)),
        },
        leaf @ (Expr::Value(_) | Expr::ScalarParam(_) | Expr::ThreadIndex { .. }) => leaf,
    }
}

/// Instantiate a (possibly generic) kernel at a concrete element type
///
/// Non-generic definitions pass through unchanged, name included.
#[tracing::instrument(skip(def), fields(kernel = %def.name, elem = %concrete))]
pub fn specialize(def: KernelDef, concrete: ScalarType) -> KernelDef {
    if !def.is_generic() {
        return def;
    }

    let mut params = def.params;
    for p in &mut params {
        p.kind = match p.kind {
            arclight_ir::ParamKind::Buffer { elem, writable } => arclight_ir::ParamKind::Buffer {
                elem: subst(elem, concrete),
                writable,
            },
            arclight_ir::ParamKind::Scalar(elem) => arclight_ir::ParamKind::Scalar(subst(elem, concrete)),
        };
    }

    let body = def
        .body
        .into_iter()
        .map(|stmt| match stmt {
            Stmt::Let { id, expr } => Stmt::Let {
                id,
                expr: specialize_expr(expr, concrete),
            },
            Stmt::Guard { cond } => Stmt::Guard {
                cond: specialize_expr(cond, concrete),
            },
            Stmt::Store { param, index, value } => Stmt::Store {
                param,
                index: specialize_expr(index, concrete),
                value: specialize_expr(value, concrete),
            },
            Stmt::Barrier => Stmt::Barrier,
        })
        .collect();

    KernelDef {
        name: format!("{}_{}", def.name, concrete),
        params,
        body,
    }
}
