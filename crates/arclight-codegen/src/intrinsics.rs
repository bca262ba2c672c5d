//! Per-backend intrinsic registration tables
//!
//! An `IntrinsicTable` is a matrix keyed by `(OpKind, ScalarType)`. Each
//! backend populates its table once at initialization with one of two entry
//! forms:
//!
//! - **Redirect**: the operation maps 1:1 onto a backend-native symbol
//!   (`sin(f32)` → `__sinf`). Zero cost: emission is a plain call.
//! - **Generate**: a callback produces a backend-specific code sequence
//!   (emulated collectives, infix arithmetic, index query expansions).
//!
//! Registration is write-once per key: a second registration for the same
//! slot fails with `DuplicateIntrinsic` and the first entry stays in effect.
//! Tables are never mutated after backend init, so concurrent kernel
//! compilation reads them without synchronization.
//!
//! # Generator calling convention
//!
//! Generators receive already-emitted operand strings in `IntrinsicCall::args`
//! and return the code for the whole call:
//!
//! - expression ops (arithmetic, math, warp shuffles): operand expressions in
//!   order; return one expression string
//! - index queries: a single arg, the axis name (`"x"`, `"y"`, `"z"`)
//! - `Barrier`: no args; return a call expression (the emitter appends `;`)
//! - `GroupReduce*`: statement-level; args are `[dest, source, scratch]` and
//!   the return value is a block of statements emitted verbatim

use crate::error::{CodegenError, Result};
use arclight_ir::{OpKind, ScalarType};
use std::collections::{BTreeMap, HashMap};

/// One intrinsic use being emitted
#[derive(Debug)]
pub struct IntrinsicCall<'a> {
    pub op: OpKind,
    pub ty: ScalarType,
    /// Emitted operand strings, per the convention above
    pub args: &'a [String],
    /// Collector for helper functions the generated code depends on
    pub support: &'a mut EmitSupport,
}

/// Generator callback type
pub type GenerateFn = fn(&mut IntrinsicCall<'_>) -> Result<String>;

/// Implementation descriptor for one table slot
pub enum IntrinsicImpl {
    /// Emit a call to this backend-native symbol
    Redirect(&'static str),
    /// Invoke a callback to produce the code sequence
    Generate(GenerateFn),
}

impl std::fmt::Debug for IntrinsicImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntrinsicImpl::Redirect(sym) => write!(f, "Redirect({sym})"),
            IntrinsicImpl::Generate(_) => write!(f, "Generate(..)"),
        }
    }
}

/// Helper definitions required by generated code
///
/// Generators call [`EmitSupport::require`] with a stable helper name; each
/// helper is emitted exactly once, before the kernel body, in name order.
#[derive(Debug, Default)]
pub struct EmitSupport {
    helpers: BTreeMap<&'static str, String>,
}

impl EmitSupport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a helper definition; repeated calls with the same name are a
    /// no-op (the first definition wins)
    pub fn require(&mut self, name: &'static str, text: impl Into<String>) {
        self.helpers.entry(name).or_insert_with(|| text.into());
    }

    /// Helper texts in deterministic (name) order
    pub fn helpers(&self) -> impl Iterator<Item = &str> {
        self.helpers.values().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

/// Untyped operations (barriers, index queries) are keyed under a canonical
/// `u32` slot so the table stays a plain (kind, type) matrix.
pub(crate) fn table_key(op: OpKind, ty: ScalarType) -> (OpKind, ScalarType) {
    if op.is_untyped() {
        (op, ScalarType::U32)
    } else {
        (op, ty)
    }
}

/// Registration table for one backend
pub struct IntrinsicTable {
    backend: &'static str,
    entries: HashMap<(OpKind, ScalarType), IntrinsicImpl>,
}

impl IntrinsicTable {
    /// Create an empty table for the named backend
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            entries: HashMap::new(),
        }
    }

    /// Backend name this table belongs to (used in diagnostics)
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Register an implementation for one (operation, type) slot
    ///
    /// Fails with [`CodegenError::DuplicateIntrinsic`] if the slot is already
    /// claimed; the existing entry is left untouched.
    pub fn register(&mut self, op: OpKind, ty: ScalarType, imp: IntrinsicImpl) -> Result<()> {
        let key = table_key(op, ty);
        if self.entries.contains_key(&key) {
            return Err(CodegenError::DuplicateIntrinsic { op: key.0, ty: key.1 });
        }
        self.entries.insert(key, imp);
        Ok(())
    }

    /// Register a redirect to a native symbol
    pub fn redirect(&mut self, op: OpKind, ty: ScalarType, symbol: &'static str) -> Result<()> {
        self.register(op, ty, IntrinsicImpl::Redirect(symbol))
    }

    /// Register the same redirect for several element types
    pub fn redirect_all(&mut self, op: OpKind, tys: &[ScalarType], symbol: &'static str) -> Result<()> {
        for &ty in tys {
            self.redirect(op, ty, symbol)?;
        }
        Ok(())
    }

    /// Register a generator callback
    pub fn generate(&mut self, op: OpKind, ty: ScalarType, f: GenerateFn) -> Result<()> {
        self.register(op, ty, IntrinsicImpl::Generate(f))
    }

    /// Register the same generator for several element types
    pub fn generate_all(&mut self, op: OpKind, tys: &[ScalarType], f: GenerateFn) -> Result<()> {
        for &ty in tys {
            self.generate(op, ty, f)?;
        }
        Ok(())
    }

    /// Exact lookup; a miss is a compile-time failure
    ///
    /// No implicit widening or narrowing: an `i32` use never matches an
    /// `i64` registration.
    pub fn lookup(&self, op: OpKind, ty: ScalarType) -> Result<&IntrinsicImpl> {
        let key = table_key(op, ty);
        self.entries
            .get(&key)
            .ok_or(CodegenError::UnsupportedIntrinsic { op: key.0, ty: key.1 })
    }

    /// True if the slot is registered
    pub fn contains(&self, op: OpKind, ty: ScalarType) -> bool {
        self.entries.contains_key(&table_key(op, ty))
    }

    /// Check that every pair in `required` is registered; returns the first
    /// missing pair as `UnsupportedIntrinsic`
    ///
    /// Backends run this over their advertised coverage at init time so gaps
    /// surface before the first compilation.
    pub fn validate_coverage(&self, required: &[(OpKind, ScalarType)]) -> Result<()> {
        for &(op, ty) in required {
            if !self.contains(op, ty) {
                let key = table_key(op, ty);
                return Err(CodegenError::UnsupportedIntrinsic { op: key.0, ty: key.1 });
            }
        }
        Ok(())
    }

    /// Number of registered slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for IntrinsicTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrinsicTable")
            .field("backend", &self.backend)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut table = IntrinsicTable::new("test");
        table.redirect(OpKind::Sin, ScalarType::F32, "__sinf").unwrap();

        match table.lookup(OpKind::Sin, ScalarType::F32).unwrap() {
            IntrinsicImpl::Redirect(sym) => assert_eq!(*sym, "__sinf"),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn test_no_implicit_widening() {
        let mut table = IntrinsicTable::new("test");
        table.redirect(OpKind::Min, ScalarType::I64, "min64").unwrap();

        // An i32 use must not match the i64 registration
        let err = table.lookup(OpKind::Min, ScalarType::I32).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::UnsupportedIntrinsic {
                op: OpKind::Min,
                ty: ScalarType::I32
            }
        ));
    }

    #[test]
    fn test_duplicate_registration_is_deterministic() {
        let mut table = IntrinsicTable::new("test");
        table.redirect(OpKind::Sqrt, ScalarType::F32, "first").unwrap();
        let err = table.redirect(OpKind::Sqrt, ScalarType::F32, "second").unwrap_err();
        assert!(matches!(err, CodegenError::DuplicateIntrinsic { .. }));

        // First registration wins
        match table.lookup(OpKind::Sqrt, ScalarType::F32).unwrap() {
            IntrinsicImpl::Redirect(sym) => assert_eq!(*sym, "first"),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn test_untyped_ops_share_canonical_slot() {
        let mut table = IntrinsicTable::new("test");
        table.redirect(OpKind::Barrier, ScalarType::U32, "__syncthreads").unwrap();

        // Lookup under any type resolves the canonical u32 slot
        assert!(table.contains(OpKind::Barrier, ScalarType::F64));
        // And re-registering under another type is still a duplicate
        let err = table.redirect(OpKind::Barrier, ScalarType::F32, "other").unwrap_err();
        assert!(matches!(err, CodegenError::DuplicateIntrinsic { .. }));
    }

    #[test]
    fn test_validate_coverage_reports_missing_pair() {
        let mut table = IntrinsicTable::new("test");
        table.redirect(OpKind::Add, ScalarType::F32, "+").unwrap();

        table.validate_coverage(&[(OpKind::Add, ScalarType::F32)]).unwrap();
        let err = table
            .validate_coverage(&[(OpKind::Add, ScalarType::F32), (OpKind::Sub, ScalarType::F32)])
            .unwrap_err();
        assert!(matches!(
            err,
            CodegenError::UnsupportedIntrinsic {
                op: OpKind::Sub,
                ty: ScalarType::F32
            }
        ));
    }

    #[test]
    fn test_emit_support_first_definition_wins() {
        let mut support = EmitSupport::new();
        support.require("helper_a", "void a() {}");
        support.require("helper_a", "void a_other() {}");
        let texts: Vec<&str> = support.helpers().collect();
        assert_eq!(texts, vec!["void a() {}"]);
    }
}
