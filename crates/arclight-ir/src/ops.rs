//! Portable operation kinds
//!
//! `OpKind` is the closed set of abstract operations a kernel may use. Each
//! backend registers exactly one implementation per `(OpKind, ScalarType)`
//! pair it supports; the code-generation pipeline fails compilation for any
//! pair without a registration. Keeping the set closed is what makes the
//! registration table totally checkable before first use.

use std::fmt;

/// A portable kernel operation
///
/// Grouped by category; `arity` and the category predicates below are the
/// only structure the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OpKind {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    Abs,
    Neg,
    MulAdd,

    // Math functions
    Sqrt,
    Rsqrt,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Pow,
    Floor,
    Ceil,
    Round,
    Tanh,

    // Group/warp collectives
    GroupReduceAdd,
    GroupReduceMin,
    GroupReduceMax,
    WarpShuffle,
    WarpShuffleDown,
    Barrier,

    // Index queries
    GlobalId,
    LocalId,
    GroupId,
    GroupDim,
    GridDim,
}

impl OpKind {
    /// Number of value operands this operation consumes
    pub const fn arity(self) -> usize {
        match self {
            OpKind::Abs
            | OpKind::Neg
            | OpKind::Sqrt
            | OpKind::Rsqrt
            | OpKind::Sin
            | OpKind::Cos
            | OpKind::Tan
            | OpKind::Exp
            | OpKind::Log
            | OpKind::Floor
            | OpKind::Ceil
            | OpKind::Round
            | OpKind::Tanh => 1,
            OpKind::Add
            | OpKind::Sub
            | OpKind::Mul
            | OpKind::Div
            | OpKind::Rem
            | OpKind::Min
            | OpKind::Max
            | OpKind::Pow => 2,
            OpKind::MulAdd => 3,
            // Collectives take their source from a named binding, shuffles add
            // a lane operand
            OpKind::GroupReduceAdd | OpKind::GroupReduceMin | OpKind::GroupReduceMax => 1,
            OpKind::WarpShuffle | OpKind::WarpShuffleDown => 2,
            OpKind::Barrier => 0,
            OpKind::GlobalId | OpKind::LocalId | OpKind::GroupId | OpKind::GroupDim | OpKind::GridDim => 0,
        }
    }

    /// True for operations that act across a group or warp rather than one lane
    pub const fn is_collective(self) -> bool {
        matches!(
            self,
            OpKind::GroupReduceAdd
                | OpKind::GroupReduceMin
                | OpKind::GroupReduceMax
                | OpKind::WarpShuffle
                | OpKind::WarpShuffleDown
                | OpKind::Barrier
        )
    }

    /// True for thread-position queries (global/local/group id, dims)
    pub const fn is_index_query(self) -> bool {
        matches!(
            self,
            OpKind::GlobalId | OpKind::LocalId | OpKind::GroupId | OpKind::GroupDim | OpKind::GridDim
        )
    }

    /// True for operations that are keyed in registration tables without a
    /// meaningful operand type (barriers and index queries)
    ///
    /// These are registered under the canonical `u32` slot; see
    /// `IntrinsicTable` in arclight-codegen.
    pub const fn is_untyped(self) -> bool {
        matches!(self, OpKind::Barrier) || self.is_index_query()
    }

    /// Short lowercase mnemonic, used in emitted code comments and errors
    pub const fn mnemonic(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Rem => "rem",
            OpKind::Min => "min",
            OpKind::Max => "max",
            OpKind::Abs => "abs",
            OpKind::Neg => "neg",
            OpKind::MulAdd => "fma",
            OpKind::Sqrt => "sqrt",
            OpKind::Rsqrt => "rsqrt",
            OpKind::Sin => "sin",
            OpKind::Cos => "cos",
            OpKind::Tan => "tan",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Pow => "pow",
            OpKind::Floor => "floor",
            OpKind::Ceil => "ceil",
            OpKind::Round => "round",
            OpKind::Tanh => "tanh",
            OpKind::GroupReduceAdd => "group_reduce_add",
            OpKind::GroupReduceMin => "group_reduce_min",
            OpKind::GroupReduceMax => "group_reduce_max",
            OpKind::WarpShuffle => "warp_shuffle",
            OpKind::WarpShuffleDown => "warp_shuffle_down",
            OpKind::Barrier => "barrier",
            OpKind::GlobalId => "global_id",
            OpKind::LocalId => "local_id",
            OpKind::GroupId => "group_id",
            OpKind::GroupDim => "group_dim",
            OpKind::GridDim => "grid_dim",
        }
    }

    /// All operation kinds, in declaration order
    ///
    /// Used for table coverage validation.
    pub const ALL: &'static [OpKind] = &[
        OpKind::Add,
        OpKind::Sub,
        OpKind::Mul,
        OpKind::Div,
        OpKind::Rem,
        OpKind::Min,
        OpKind::Max,
        OpKind::Abs,
        OpKind::Neg,
        OpKind::MulAdd,
        OpKind::Sqrt,
        OpKind::Rsqrt,
        OpKind::Sin,
        OpKind::Cos,
        OpKind::Tan,
        OpKind::Exp,
        OpKind::Log,
        OpKind::Pow,
        OpKind::Floor,
        OpKind::Ceil,
        OpKind::Round,
        OpKind::Tanh,
        OpKind::GroupReduceAdd,
        OpKind::GroupReduceMin,
        OpKind::GroupReduceMax,
        OpKind::WarpShuffle,
        OpKind::WarpShuffleDown,
        OpKind::Barrier,
        OpKind::GlobalId,
        OpKind::LocalId,
        OpKind::GroupId,
        OpKind::GroupDim,
        OpKind::GridDim,
    ];
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Axis selector for index queries and launch dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Component index (x=0, y=1, z=2)
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity() {
        assert_eq!(OpKind::Sin.arity(), 1);
        assert_eq!(OpKind::Add.arity(), 2);
        assert_eq!(OpKind::MulAdd.arity(), 3);
        assert_eq!(OpKind::Barrier.arity(), 0);
        assert_eq!(OpKind::GlobalId.arity(), 0);
    }

    #[test]
    fn test_categories() {
        assert!(OpKind::GroupReduceAdd.is_collective());
        assert!(OpKind::Barrier.is_collective());
        assert!(!OpKind::Add.is_collective());

        assert!(OpKind::GlobalId.is_index_query());
        assert!(!OpKind::Sin.is_index_query());

        assert!(OpKind::Barrier.is_untyped());
        assert!(OpKind::GroupDim.is_untyped());
        assert!(!OpKind::GroupReduceAdd.is_untyped());
    }

    #[test]
    fn test_all_covers_every_kind() {
        // Every kind displays a distinct mnemonic and appears exactly once
        let mut seen = std::collections::HashSet::new();
        for op in OpKind::ALL {
            assert!(seen.insert(op.mnemonic()), "duplicate mnemonic {}", op);
        }
        assert_eq!(seen.len(), OpKind::ALL.len());
    }

    #[test]
    fn test_axis_index() {
        assert_eq!(Axis::X.index(), 0);
        assert_eq!(Axis::Y.index(), 1);
        assert_eq!(Axis::Z.index(), 2);
        assert_eq!(Axis::Z.to_string(), "z");
    }
}
