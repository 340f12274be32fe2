//! The lowered loop-tree representation the double-buffer pass rewrites.
//!
//! Out of scope here (external collaborator): turning this tree into CUDA source text.
use crate::ir::{IterDomainId, TensorViewId};
use std::fmt;

/// A loop bound: either a fixed constant or a symbolic expression carried through as text (the
/// kernel emitter, out of scope here, owns actually evaluating it).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Bound {
    Const(i64),
    Symbolic(String),
}

impl Bound {
    pub fn minus(&self, n: i64) -> Bound {
        match self {
            Bound::Const(c) => Bound::Const(c - n),
            Bound::Symbolic(s) => Bound::Symbolic(format!("({} - {})", s, n)),
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bound::Const(c) => write!(f, "{}", c),
            Bound::Symbolic(s) => write!(f, "{}", s),
        }
    }
}

/// Identifies a `LoadStoreOp` as it appears inside a lowered loop body (distinct from
/// `ir::ExprId` so the same tensor-IR load can appear, unrolled or cloned, at several points in
/// the loop tree).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LoadStoreOpId(pub u32);

/// The kind of address arithmetic an `AddressCompute` statement performs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddressComputeKind {
    /// Advances a global-memory read pointer by one buffering stage.
    GmemIncrement,
    /// Materialises the rotating shared-memory read offset into a uniform register.
    DoubleBufferUpdate {
        switch_size_in_bytes: u32,
        stage_depth: u32,
    },
}

impl AddressComputeKind {
    pub fn is_gmem_increment(self) -> bool {
        matches!(self, AddressComputeKind::GmemIncrement)
    }
}

/// One statement in a lowered loop body.
#[derive(Clone, Debug)]
pub enum Stmt {
    /// Reads (or writes) a whole tensor; carries the `LoadStoreOp` identity and the output
    /// `TensorView` it targets, so the cloner can recognise "is this one of the annotated loads".
    Load {
        op: LoadStoreOpId,
        output_tv: TensorViewId,
        is_cp_async: bool,
        /// Whether this op's instruction can fold its bounds check in inline. Cleared by
        /// `double_buffer::cloner::keep_in_prolog` when rebuilding a Prolog copy, to decouple
        /// the copy's predication from the source loop's.
        supports_inline_predicate: bool,
    },
    AddressCompute(AddressComputeKind, TensorViewId),
    BlockSync { war_hazard: bool },
    CpAsyncCommit,
    CpAsyncWait(u32),
    ScalarFill(TensorViewId),
    Nested(For),
    /// A predicate-guarded block, e.g. the bounds check an unpeeled loop's boundary iteration
    /// still carries. Out of scope here (external collaborator): deciding what `cond` evaluates
    /// to; this pass only ever needs to walk into `then_body`/`else_body` to find buffered loads.
    IfThenElse {
        cond: String,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
}

impl Stmt {
    pub fn is_block_sync(&self) -> bool {
        matches!(self, Stmt::BlockSync { .. })
    }

    pub fn is_cp_async_commit(&self) -> bool {
        matches!(self, Stmt::CpAsyncCommit)
    }

    /// The `TensorView` a `Load` or scalar-fill writes to, if this statement is one.
    pub fn output_tv(&self) -> Option<TensorViewId> {
        match self {
            Stmt::Load { output_tv, .. } => Some(*output_tv),
            Stmt::ScalarFill(tv) => Some(*tv),
            _ => None,
        }
    }

    /// Whether `self` transitively contains a `Load` whose output is in `loads`, walking into
    /// nested `For` bodies and both arms of an `IfThenElse`.
    pub fn contains_load_of(&self, loads: &[TensorViewId]) -> bool {
        match self {
            Stmt::Load { output_tv, .. } => loads.contains(output_tv),
            Stmt::Nested(inner) => inner.body.iter().any(|s| s.contains_load_of(loads)),
            Stmt::IfThenElse {
                then_body,
                else_body,
                ..
            } => {
                then_body.iter().any(|s| s.contains_load_of(loads))
                    || else_body.iter().any(|s| s.contains_load_of(loads))
            }
            _ => false,
        }
    }
}

/// A lowered `for` loop over one iteration-domain axis.
#[derive(Clone, Debug)]
pub struct For {
    pub axis: IterDomainId,
    pub start: Bound,
    pub stop: Bound,
    pub step: i64,
    pub unrolled: bool,
    pub body: Vec<Stmt>,
    /// Set on a loop produced by `DoubleBufferLoopCloner::clone_stage`. The inserter skips loops
    /// with this flag when looking for double-buffer candidates, so running the pass again over
    /// its own output is a no-op rather than re-splitting an already-staged loop.
    pub is_stage: bool,
}

impl For {
    pub fn new(axis: IterDomainId, start: Bound, stop: Bound, body: Vec<Stmt>) -> Self {
        For {
            axis,
            start,
            stop,
            step: 1,
            unrolled: false,
            body,
            is_stage: false,
        }
    }

    /// Whether this loop shape is one `§7 UnsupportedLoopShape` must reject: non-zero start,
    /// non-unit step, or vectorised/unrolled.
    pub fn is_supported_shape(&self) -> bool {
        matches!(self.start, Bound::Const(0)) && self.step == 1 && !self.unrolled
    }

    pub fn with_body(&self, body: Vec<Stmt>) -> For {
        For {
            axis: self.axis,
            start: self.start.clone(),
            stop: self.stop.clone(),
            step: self.step,
            unrolled: self.unrolled,
            body,
            is_stage: self.is_stage,
        }
    }
}

impl fmt::Display for For {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "for {} in {}..{}", self.axis, self.start, self.stop)
    }
}
