//! Defines the tensor IR surface consumed by the equivalence graph and the double-buffer pass.
//!
//! This mirrors, at the scale this crate needs, the `Expression`/`IterDomain` node kinds the
//! surrounding fusion compiler owns (out of scope here): enough structure to recognise `Split`,
//! `Merge`, `Swizzle` and `LoadStoreOp` expressions and to walk a `TensorView`'s axis list.
pub mod operator;

pub use self::operator::{ExprKind, SwizzleKind};

use std::fmt;

/// Identifies one loop axis of one tensor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct IterDomainId(pub u32);

impl fmt::Display for IterDomainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "id{}", self.0)
    }
}

/// Identifies a tensor in the fusion.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TensorViewId(pub u32);

impl fmt::Display for TensorViewId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tv{}", self.0)
    }
}

/// Identifies an IR expression (`Split`, `Merge`, `Swizzle`, `LoadStoreOp`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ExprId(pub u32);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// An operand to an `Expression`: either a loop axis or a whole tensor (as `LoadStoreOp` takes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Operand {
    Id(IterDomainId),
    Tv(TensorViewId),
}

impl Operand {
    pub fn as_id(self) -> Option<IterDomainId> {
        match self {
            Operand::Id(id) => Some(id),
            Operand::Tv(_) => None,
        }
    }

    pub fn as_tv(self) -> Option<TensorViewId> {
        match self {
            Operand::Tv(tv) => Some(tv),
            Operand::Id(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Id(id) => write!(f, "{}", id),
            Operand::Tv(tv) => write!(f, "{}", tv),
        }
    }
}

/// Parallelization assigned to a loop axis.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub enum ParallelType {
    Serial,
    Unroll,
    Vectorize,
    TidX,
    TidY,
    TidZ,
    BidX,
    BidY,
    BidZ,
}

impl ParallelType {
    /// Whether the type schedules onto a hardware thread/block index (as opposed to `Serial`,
    /// `Unroll` or `Vectorize`, which do not carve out a distinct piece of the iteration space
    /// per concrete thread).
    pub fn is_thread_parallel(self) -> bool {
        use ParallelType::*;
        matches!(self, TidX | TidY | TidZ | BidX | BidY | BidZ)
    }
}

impl fmt::Display for ParallelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a tensor's values live.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub enum MemoryType {
    Global,
    Shared,
    Local,
}

/// A loop axis extent: either known at compile time or a symbolic value.
///
/// Extents are compared by structural equality, never by numeric evaluation, as required by the
/// `Merge` congruence rule in `IdGraph::exprs_map`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Extent {
    Const(u64),
    Symbolic(String),
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Extent::Const(n) => write!(f, "{}", n),
            Extent::Symbolic(s) => write!(f, "{}", s),
        }
    }
}

/// One loop axis of one tensor.
#[derive(Clone, Debug)]
pub struct IterDomain {
    pub id: IterDomainId,
    pub parallel_type: ParallelType,
    pub is_broadcast: bool,
    pub extent: Extent,
    pub is_rfactor: bool,
}

impl IterDomain {
    pub fn new(id: IterDomainId, extent: Extent) -> Self {
        IterDomain {
            id,
            parallel_type: ParallelType::Serial,
            is_broadcast: false,
            extent,
            is_rfactor: false,
        }
    }

    pub fn with_parallel_type(mut self, pt: ParallelType) -> Self {
        self.parallel_type = pt;
        self
    }

    pub fn with_broadcast(mut self, is_broadcast: bool) -> Self {
        self.is_broadcast = is_broadcast;
        self
    }
}

/// Whether (and how deeply) a tensor is annotated for double/circular buffering.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BufferingKind {
    None,
    Double,
    Circular(u32),
}

/// A tensor in the fusion: an ordered axis list plus compute-at and memory-placement metadata.
#[derive(Clone, Debug)]
pub struct TensorView {
    pub id: TensorViewId,
    pub name: String,
    pub memory_type: MemoryType,
    pub axes: Vec<IterDomainId>,
    pub compute_at_position: usize,
    pub buffering: BufferingKind,
    pub should_lift_read_address: bool,
    pub has_compute_with: bool,
    /// The expression that produces this tensor, if any (e.g. a `LoadStoreOp`).
    pub definition: Option<ExprId>,
}

impl TensorView {
    pub fn new(id: TensorViewId, name: impl Into<String>, memory_type: MemoryType) -> Self {
        TensorView {
            id,
            name: name.into(),
            memory_type,
            axes: Vec::new(),
            compute_at_position: 0,
            buffering: BufferingKind::None,
            should_lift_read_address: false,
            has_compute_with: false,
            definition: None,
        }
    }

    pub fn is_double_buffered(&self) -> bool {
        self.buffering == BufferingKind::Double
    }

    pub fn is_circular_buffered(&self) -> bool {
        matches!(self.buffering, BufferingKind::Circular(_))
    }

    pub fn is_buffered(&self) -> bool {
        self.buffering != BufferingKind::None
    }

    pub fn circular_buffer_depth(&self) -> Option<u32> {
        match self.buffering {
            BufferingKind::Circular(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for TensorView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An IR node with ordered inputs and outputs, structurally recognised as one of a fixed set of
/// kinds (`Split`, `Merge`, `Swizzle`, `LoadStoreOp`).
#[derive(Clone, Debug)]
pub struct Expression {
    pub id: ExprId,
    pub kind: ExprKind,
    pub inputs: Vec<Operand>,
    pub outputs: Vec<Operand>,
}

impl Expression {
    pub fn input_ids(&self) -> impl Iterator<Item = IterDomainId> + '_ {
        self.inputs.iter().filter_map(|o| o.as_id())
    }

    pub fn output_ids(&self) -> impl Iterator<Item = IterDomainId> + '_ {
        self.outputs.iter().filter_map(|o| o.as_id())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}({}) -> ({})",
            self.kind,
            self.inputs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            self.outputs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        )
    }
}

/// The full fused graph: an arena of iteration domains, tensor views and expressions.
///
/// Out of scope for this crate: parsing fusion definitions into this structure. Callers build a
/// `Fusion` directly (or via a host compiler that does the parsing) and hand it to
/// `IterDomainGraphs::build`.
#[derive(Clone, Debug, Default)]
pub struct Fusion {
    iter_domains: Vec<IterDomain>,
    tensor_views: Vec<TensorView>,
    exprs: Vec<Expression>,
}

impl Fusion {
    pub fn new() -> Self {
        Fusion::default()
    }

    pub fn add_iter_domain(&mut self, extent: Extent) -> IterDomainId {
        let id = IterDomainId(self.iter_domains.len() as u32);
        self.iter_domains.push(IterDomain::new(id, extent));
        id
    }

    pub fn iter_domain_mut(&mut self, id: IterDomainId) -> &mut IterDomain {
        &mut self.iter_domains[id.0 as usize]
    }

    pub fn iter_domain(&self, id: IterDomainId) -> &IterDomain {
        &self.iter_domains[id.0 as usize]
    }

    pub fn iter_domains(&self) -> impl Iterator<Item = &IterDomain> {
        self.iter_domains.iter()
    }

    pub fn add_tensor_view(&mut self, tv: TensorView) -> TensorViewId {
        let id = tv.id;
        debug_assert_eq!(id.0 as usize, self.tensor_views.len());
        self.tensor_views.push(tv);
        id
    }

    pub fn tensor_view(&self, id: TensorViewId) -> &TensorView {
        &self.tensor_views[id.0 as usize]
    }

    pub fn tensor_view_mut(&mut self, id: TensorViewId) -> &mut TensorView {
        &mut self.tensor_views[id.0 as usize]
    }

    pub fn tensor_views(&self) -> impl Iterator<Item = &TensorView> {
        self.tensor_views.iter()
    }

    pub fn next_tensor_view_id(&self) -> TensorViewId {
        TensorViewId(self.tensor_views.len() as u32)
    }

    pub fn add_expr(&mut self, kind: ExprKind, inputs: Vec<Operand>, outputs: Vec<Operand>) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expression {
            id,
            kind,
            inputs,
            outputs,
        });
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expression {
        &self.exprs[id.0 as usize]
    }

    pub fn exprs(&self) -> impl Iterator<Item = &Expression> {
        self.exprs.iter()
    }

    /// Expressions whose outputs include `id`.
    pub fn definitions_of(&self, id: IterDomainId) -> Vec<ExprId> {
        self.exprs
            .iter()
            .filter(|e| e.output_ids().any(|o| o == id))
            .map(|e| e.id)
            .collect()
    }

    /// Expressions whose inputs include `id`.
    pub fn uses_of(&self, id: IterDomainId) -> Vec<ExprId> {
        self.exprs
            .iter()
            .filter(|e| e.input_ids().any(|i| i == id))
            .map(|e| e.id)
            .collect()
    }
}
