//! The explicit compiler context threaded through the double-buffer pass.
//!
//! Never a global: every entry point in `crate::double_buffer` takes `&GpuLowerContext`
//! explicitly, so this crate has no `GpuLower::current()`-style accessor.
use crate::id_graph::IdGroup;
use crate::ir::{self, IterDomainId, TensorViewId};
use crate::iter_domain_graphs::{IterDomainGraphs, MappingMode};
use crate::kernel_ir::For;
use crate::utils::HashSet;

/// Backs `compute_at_map()`'s queries with the LOOP-mode `IdGraph`, plus the two external-pass
/// results (RAW sync requirements, predicate-peeling decisions) this crate models as caller-
/// supplied facts rather than recomputing them.
pub struct GpuLowerContext<'a> {
    fusion: &'a ir::Fusion,
    graphs: &'a IterDomainGraphs,
    raw_sync_tvs: HashSet<TensorViewId>,
    peeled_loops: HashSet<IterDomainId>,
}

impl<'a> GpuLowerContext<'a> {
    pub fn new(fusion: &'a ir::Fusion, graphs: &'a IterDomainGraphs) -> Self {
        GpuLowerContext {
            fusion,
            graphs,
            raw_sync_tvs: HashSet::default(),
            peeled_loops: HashSet::default(),
        }
    }

    /// Marks `tv`'s consumers as requiring a thread RAW sync after its buffered loads land.
    pub fn with_raw_sync(mut self, tv: TensorViewId) -> Self {
        self.raw_sync_tvs.insert(tv);
        self
    }

    /// Marks the loop over `axis` as subject to predicate peeling.
    pub fn with_peeled_loop(mut self, axis: IterDomainId) -> Self {
        self.peeled_loops.insert(axis);
        self
    }

    pub fn fusion(&self) -> &ir::Fusion {
        self.fusion
    }

    pub fn graphs(&self) -> &IterDomainGraphs {
        self.graphs
    }

    /// Whether `tv` needs a thread RAW sync inserted once its buffered loads are issued.
    pub fn needs_raw_sync(&self, tv: TensorViewId) -> bool {
        self.raw_sync_tvs.contains(&tv)
    }

    /// Whether `for_loop` is subject to predicate peeling (its trip count is not known to divide
    /// evenly, so the last iteration needs special-cased handling).
    pub fn should_peel_loop(&self, for_loop: &For) -> bool {
        self.peeled_loops.contains(&for_loop.axis)
    }

    pub fn compute_at_map(&self) -> ComputeAtMap<'_> {
        ComputeAtMap { ctx: self }
    }
}

/// A thin view over the LOOP-mode `IdGraph`, exposing the three queries `§4.8` names.
pub struct ComputeAtMap<'a> {
    ctx: &'a GpuLowerContext<'a>,
}

impl<'a> ComputeAtMap<'a> {
    /// The LOOP-mode representative group `id` concretely maps to.
    pub fn get_concrete_mapped_id(&self, id: IterDomainId) -> IdGroup {
        self.ctx
            .graphs
            .graph(MappingMode::Loop)
            .id_group_const(id)
    }

    pub fn are_mapped(&self, a: IterDomainId, b: IterDomainId) -> bool {
        self.ctx.graphs.graph(MappingMode::Loop).are_mapped(a, b)
    }

    pub fn get_index_variable(&self, id: IterDomainId) -> Option<String> {
        let group = self.get_concrete_mapped_id(id);
        self.ctx
            .graphs
            .index_variable(group)
            .map(ToString::to_string)
    }
}
