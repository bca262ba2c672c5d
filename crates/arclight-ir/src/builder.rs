//! Fluent construction of kernel definitions
//!
//! `KernelBuilder` hands out parameter indices and value ids so callers never
//! track them manually. Front ends and tests both build kernels this way.
//!
//! ```
//! use arclight_ir::{Axis, CmpCond, Expr, KernelBuilder, OpKind, ScalarType};
//!
//! let mut b = KernelBuilder::new("write_index");
//! let out = b.buffer_param("out", ScalarType::I32.into(), true);
//! let n = b.scalar_param("n", ScalarType::U32.into());
//! let gid = b.bind(Expr::ThreadIndex { op: OpKind::GlobalId, axis: Axis::X });
//! b.guard(Expr::Cmp {
//!     cond: CmpCond::Lt,
//!     ty: ScalarType::U32.into(),
//!     a: Box::new(Expr::Value(gid)),
//!     b: Box::new(Expr::ScalarParam(n)),
//! });
//! b.store(out, Expr::Value(gid), Expr::Cast {
//!     to: ScalarType::I32.into(),
//!     from: Box::new(Expr::Value(gid)),
//! });
//! let def = b.build().unwrap();
//! assert_eq!(def.params.len(), 2);
//! ```

use crate::kernel::{Expr, KernelDef, KernelParam, ParamKind, Stmt, ValidationError, ValueId};
use crate::types::ElemType;

/// Incremental builder for a [`KernelDef`]
#[derive(Debug, Clone)]
pub struct KernelBuilder {
    name: String,
    params: Vec<KernelParam>,
    body: Vec<Stmt>,
    next_value: ValueId,
}

impl KernelBuilder {
    /// Start a kernel with the given entry-point name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: Vec::new(),
            next_value: 0,
        }
    }

    /// Declare a buffer parameter; returns its parameter index
    pub fn buffer_param(&mut self, name: impl Into<String>, elem: ElemType, writable: bool) -> usize {
        self.params.push(KernelParam {
            name: name.into(),
            kind: ParamKind::Buffer { elem, writable },
        });
        self.params.len() - 1
    }

    /// Declare a scalar parameter; returns its parameter index
    pub fn scalar_param(&mut self, name: impl Into<String>, elem: ElemType) -> usize {
        self.params.push(KernelParam {
            name: name.into(),
            kind: ParamKind::Scalar(elem),
        });
        self.params.len() - 1
    }

    /// Bind an expression to a fresh value id
    pub fn bind(&mut self, expr: Expr) -> ValueId {
        let id = self.next_value;
        self.next_value += 1;
        self.body.push(Stmt::Let { id, expr });
        id
    }

    /// Append a lane guard
    pub fn guard(&mut self, cond: Expr) {
        self.body.push(Stmt::Guard { cond });
    }

    /// Append a store into a buffer parameter
    pub fn store(&mut self, param: usize, index: Expr, value: Expr) {
        self.body.push(Stmt::Store { param, index, value });
    }

    /// Append a group barrier
    pub fn barrier(&mut self) {
        self.body.push(Stmt::Barrier);
    }

    /// Finish and validate the definition
    pub fn build(self) -> Result<KernelDef, ValidationError> {
        let def = KernelDef {
            name: self.name,
            params: self.params,
            body: self.body,
        };
        def.validate()?;
        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Axis, OpKind};
    use crate::types::ScalarType;

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let mut b = KernelBuilder::new("ids");
        let a = b.bind(Expr::ThreadIndex {
            op: OpKind::GlobalId,
            axis: Axis::X,
        });
        let c = b.bind(Expr::Value(a));
        assert_eq!(a, 0);
        assert_eq!(c, 1);
        b.build().unwrap();
    }

    #[test]
    fn test_builder_rejects_invalid_body() {
        let mut b = KernelBuilder::new("broken");
        let p = b.scalar_param("x", ElemType::Scalar(ScalarType::F32));
        // Store to a scalar parameter is rejected at build time
        b.store(
            p,
            Expr::Literal {
                ty: ElemType::Scalar(ScalarType::U32),
                value: crate::kernel::Literal::UInt(0),
            },
            Expr::ScalarParam(p),
        );
        assert!(b.build().is_err());
    }
}
