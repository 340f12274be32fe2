//! Defines the structural expression kinds the equivalence graph recognises.
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of swizzle applied to a set of loop axes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum SwizzleKind {
    /// Reorders axes for bank-conflict-free shared memory access; identity for indexing.
    Xor,
    /// An explicit identity swizzle, kept around so replay can recreate it structurally.
    Identity,
}

/// Structurally recognised expression kinds.
///
/// `exprs_map` (see `crate::id_graph`) only ever compares two expressions of the same kind; the
/// kind also carries the attributes that must agree numerically for the two to be considered
/// congruent.
#[derive(Clone, Debug)]
pub enum ExprKind {
    /// Splits one axis into an outer and an inner axis by `factor`.
    Split { factor: u64 },
    /// Merges two axes into one, in input order `(outer, inner)`.
    Merge,
    /// Reorders a set of axes for indexing purposes without changing their extents.
    Swizzle { kind: SwizzleKind },
    /// Reads or writes a whole tensor; its first input is the source `TensorView`.
    LoadStoreOp {
        is_cp_async: bool,
        uses_ld_matrix: bool,
        /// Whether this op's hardware instruction can fold a bounds check into itself, rather
        /// than needing a separate guard. Decoupling a Prolog clone from this capability is what
        /// `double_buffer::cloner::keep_in_prolog` rebuilds the op for.
        supports_inline_predicate: bool,
    },
}

impl ExprKind {
    /// Whether `self` and `other` have the same structural kind with matching
    /// kind-specific numeric attributes (condition 1 and 3 of `exprs_map`).
    pub fn structurally_matches(&self, other: &ExprKind) -> bool {
        match (self, other) {
            (ExprKind::Split { factor: f1 }, ExprKind::Split { factor: f2 }) => f1 == f2,
            (ExprKind::Merge, ExprKind::Merge) => true,
            (ExprKind::Swizzle { kind: k1 }, ExprKind::Swizzle { kind: k2 }) => k1 == k2,
            (
                ExprKind::LoadStoreOp { is_cp_async: a1, .. },
                ExprKind::LoadStoreOp { is_cp_async: a2, .. },
            ) => a1 == a2,
            _ => false,
        }
    }

    pub fn is_split_or_merge(&self) -> bool {
        matches!(self, ExprKind::Split { .. } | ExprKind::Merge)
    }

    pub fn is_swizzle(&self) -> bool {
        matches!(self, ExprKind::Swizzle { .. })
    }

    pub fn is_load_store(&self) -> bool {
        matches!(self, ExprKind::LoadStoreOp { .. })
    }
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExprKind::Split { factor } => write!(f, "Split(factor={})", factor),
            ExprKind::Merge => write!(f, "Merge"),
            ExprKind::Swizzle { kind } => write!(f, "Swizzle({:?})", kind),
            ExprKind::LoadStoreOp {
                is_cp_async,
                uses_ld_matrix,
                supports_inline_predicate,
            } => write!(
                f,
                "LoadStoreOp(cp_async={}, ld_matrix={}, inline_predicate={})",
                is_cp_async, uses_ld_matrix, supports_inline_predicate
            ),
        }
    }
}
