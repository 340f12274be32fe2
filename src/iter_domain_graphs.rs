//! A collection of `IdGraph`s, one per mapping mode, built in dependency order, plus
//! loop-promotion (parallel-type propagation) and self-mapping detection.
use crate::error::Error;
use crate::id_graph::{IdGraph, IdGroup};
use crate::ir::{self, ExprId, ExprKind, IterDomainId, Operand};
use crate::utils::HashMap;
use log::{debug, trace};
use std::fmt;

/// The four coexisting equivalence modes, ordered from coarsest-refinement-source to finest:
/// each mode is built by refining the previous one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MappingMode {
    Exact,
    AlmostExact,
    Permissive,
    Loop,
}

impl MappingMode {
    pub const ALL: [MappingMode; 4] = [
        MappingMode::Exact,
        MappingMode::AlmostExact,
        MappingMode::Permissive,
        MappingMode::Loop,
    ];

    fn index(self) -> usize {
        match self {
            MappingMode::Exact => 0,
            MappingMode::AlmostExact => 1,
            MappingMode::Permissive => 2,
            MappingMode::Loop => 3,
        }
    }
}

impl fmt::Display for MappingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MappingMode::Exact => "EXACT",
            MappingMode::AlmostExact => "ALMOST_EXACT",
            MappingMode::Permissive => "PERMISSIVE",
            MappingMode::Loop => "LOOP",
        };
        write!(f, "{}", name)
    }
}

/// Set iff two distinct axes of the same `TensorView` end up in the same group under a mode
/// that the rest of the compiler relies on to tell them apart.
#[derive(Clone, Debug)]
pub struct SelfMappingInfo {
    pub tv: ir::TensorViewId,
    pub a: IterDomainId,
    pub b: IterDomainId,
    pub mode: MappingMode,
}

/// The collection of per-mode `IdGraph`s built from a `Fusion`, plus loop-promotion results.
pub struct IterDomainGraphs {
    graphs: [IdGraph; 4],
    self_mapping_info: Option<SelfMappingInfo>,
    index_var_by_loop_group: HashMap<IdGroup, String>,
}

/// Options controlling graph construction that would otherwise be hard compile errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOptions {
    pub allow_self_mapping: bool,
}

impl IterDomainGraphs {
    pub fn graph(&self, mode: MappingMode) -> &IdGraph {
        &self.graphs[mode.index()]
    }

    fn graph_mut(&mut self, mode: MappingMode) -> &mut IdGraph {
        &mut self.graphs[mode.index()]
    }

    pub fn self_mapping_info(&self) -> Option<&SelfMappingInfo> {
        self.self_mapping_info.as_ref()
    }

    pub fn has_self_mapping(&self) -> bool {
        self.self_mapping_info.is_some()
    }

    pub fn index_variable(&self, group: IdGroup) -> Option<&str> {
        self.index_var_by_loop_group.get(&group).map(String::as_str)
    }

    /// Builds every mode's `IdGraph` from `fusion`, in dependency order, then validates and
    /// propagates parallel types across LOOP groups and asserts no self mapping (unless
    /// `options.allow_self_mapping`).
    pub fn build(fusion: &mut ir::Fusion, options: BuildOptions) -> Result<Self, Error> {
        debug!("building iteration domain definitions and uses");
        let defs_and_uses = build_iter_domain_definitions_and_uses(fusion);

        let mut graphs = [
            IdGraph::new(),
            IdGraph::new(),
            IdGraph::new(),
            IdGraph::new(),
        ];
        for graph in graphs.iter_mut() {
            for id in fusion.iter_domains() {
                let (defs, uses) = &defs_and_uses[&id.id];
                graph.initialize_id(id.id, defs, uses);
            }
        }

        trace!("building EXACT map");
        build_exact_map(&mut graphs[MappingMode::Exact.index()], fusion);

        trace!("building ALMOST_EXACT map");
        let almost_exact = clone_mappings(&graphs[MappingMode::Exact.index()], fusion);
        graphs[MappingMode::AlmostExact.index()] = almost_exact;
        build_almost_exact_map(&mut graphs[MappingMode::AlmostExact.index()], fusion);

        trace!("building PERMISSIVE map");
        let permissive = clone_mappings(&graphs[MappingMode::AlmostExact.index()], fusion);
        graphs[MappingMode::Permissive.index()] = permissive;
        build_permissive_map(&mut graphs[MappingMode::Permissive.index()], fusion);

        trace!("building LOOP map");
        build_loop_map(&mut graphs, fusion);

        let mut this = IterDomainGraphs {
            graphs,
            self_mapping_info: None,
            index_var_by_loop_group: HashMap::default(),
        };

        this.validate_and_propagate_ptype(fusion)?;
        this.build_index_map();
        this.assert_no_self_mapping(fusion, options.allow_self_mapping)?;

        Ok(this)
    }

    /// For every LOOP group, collects the non-`Serial` parallel types among its members; more
    /// than one distinct type is a `ParallelTypeConflict`. Otherwise assigns the single type (if
    /// any) to every member of the group.
    fn validate_and_propagate_ptype(&mut self, fusion: &mut ir::Fusion) -> Result<(), Error> {
        let groups = self.graph(MappingMode::Loop).id_groups();
        let mut assignments = Vec::new();
        for (_, members) in &groups {
            let mut distinct: Vec<ir::ParallelType> = Vec::new();
            for &id in members {
                let pt = fusion.iter_domain(id).parallel_type;
                if pt != ir::ParallelType::Serial && !distinct.contains(&pt) {
                    distinct.push(pt);
                }
            }
            if distinct.len() > 1 {
                return Err(Error::ParallelTypeConflict {
                    group: members
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(","),
                    first: format!("{:?}", distinct[0]),
                    second: format!("{:?}", distinct[1]),
                });
            }
            if let Some(&pt) = distinct.first() {
                for &id in members {
                    assignments.push((id, pt));
                }
            }
        }
        for (id, pt) in assignments {
            fusion.iter_domain_mut(id).parallel_type = pt;
        }
        Ok(())
    }

    fn build_index_map(&mut self) {
        let mut groups: Vec<IdGroup> = self
            .graph(MappingMode::Loop)
            .id_groups()
            .into_keys()
            .collect();
        groups.sort_by_key(|g| format!("{:?}", g));
        for (i, g) in groups.into_iter().enumerate() {
            self.index_var_by_loop_group.insert(g, format!("i{}", i));
        }
    }

    /// Checks, for every `TensorView`, whether two of its own distinct axes ended up in the
    /// same EXACT group (the finest mode, and the one the rest of the compiler depends on most
    /// to tell axes of the same tensor apart).
    fn assert_no_self_mapping(&mut self, fusion: &mut ir::Fusion, allow: bool) -> Result<(), Error> {
        for tv in fusion.tensor_views() {
            for i in 0..tv.axes.len() {
                for j in (i + 1)..tv.axes.len() {
                    let (a, b) = (tv.axes[i], tv.axes[j]);
                    if self.graph_mut(MappingMode::Exact).id_group(a)
                        == self.graph_mut(MappingMode::Exact).id_group(b)
                    {
                        let info = SelfMappingInfo {
                            tv: tv.id,
                            a,
                            b,
                            mode: MappingMode::Exact,
                        };
                        if allow {
                            self.self_mapping_info = Some(info);
                            continue;
                        }
                        return Err(Error::SelfMapping {
                            tv: tv.name.clone(),
                            a: a.to_string(),
                            b: b.to_string(),
                            mode: MappingMode::Exact.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends new `IterDomain`s mirroring `expr`'s outputs, under a fresh expression with the
    /// given `new_inputs`, and extends every mode's map with the mapping the replay implies
    /// (new inputs ↔ old inputs propagate, via each `IdGraph`'s own congruence closure, to new
    /// outputs ↔ old outputs).
    pub fn add_replay_as(
        &mut self,
        fusion: &mut ir::Fusion,
        new_inputs: &[IterDomainId],
        expr: ExprId,
    ) -> ExprId {
        let orig = fusion.expr(expr).clone();
        let orig_inputs: Vec<IterDomainId> = orig.input_ids().collect();
        assert_eq!(
            new_inputs.len(),
            orig_inputs.len(),
            "replay must supply one new input per original input"
        );
        let orig_outputs: Vec<IterDomainId> = orig.output_ids().collect();
        let new_outputs: Vec<IterDomainId> = orig_outputs
            .iter()
            .map(|&o| {
                let extent = fusion.iter_domain(o).extent.clone();
                let pt = fusion.iter_domain(o).parallel_type;
                let bc = fusion.iter_domain(o).is_broadcast;
                let id = fusion.add_iter_domain(extent);
                fusion.iter_domain_mut(id).parallel_type = pt;
                fusion.iter_domain_mut(id).is_broadcast = bc;
                id
            })
            .collect();
        let new_expr = fusion.add_expr(
            orig.kind.clone(),
            new_inputs.iter().map(|&i| Operand::Id(i)).collect(),
            new_outputs.iter().map(|&o| Operand::Id(o)).collect(),
        );

        for graph in self.graphs.iter_mut() {
            for &new_in in new_inputs {
                graph.initialize_id(new_in, &fusion.definitions_of(new_in), &fusion.uses_of(new_in));
            }
            for &new_out in &new_outputs {
                graph.initialize_id(
                    new_out,
                    &fusion.definitions_of(new_out),
                    &fusion.uses_of(new_out),
                );
            }
            for (&new_in, &orig_in) in new_inputs.iter().zip(orig_inputs.iter()) {
                graph.map_ids(fusion, new_in, orig_in);
            }
        }

        new_expr
    }

    /// Merges `a` and `b`'s LOOP-mode groups after a post-scheduling compute-with resolution.
    pub fn update_compute_with(&mut self, fusion: &ir::Fusion, a: IterDomainId, b: IterDomainId) {
        self.graph_mut(MappingMode::Loop).map_ids(fusion, a, b);
    }
}

/// Builds, for each `IterDomain`, the set of expressions that produce it (`definitions`) and
/// the set that consume it (`uses`).
fn build_iter_domain_definitions_and_uses(
    fusion: &ir::Fusion,
) -> HashMap<IterDomainId, (Vec<ExprId>, Vec<ExprId>)> {
    fusion
        .iter_domains()
        .map(|id| {
            (
                id.id,
                (fusion.definitions_of(id.id), fusion.uses_of(id.id)),
            )
        })
        .collect()
}

/// Maps producer and consumer `IterDomain`s one-to-one through every `LoadStoreOp` (the only
/// expression kind that crosses `TensorView` boundaries), skipping axes where the direction
/// would map a broadcast axis to a non-broadcast one.
fn build_exact_map(graph: &mut IdGraph, fusion: &ir::Fusion) {
    for expr in load_store_exprs(fusion) {
        let (producer, consumer) = load_store_tvs(fusion, expr);
        let producer = fusion.tensor_view(producer);
        let consumer = fusion.tensor_view(consumer);
        for (&p, &c) in producer.axes.iter().zip(consumer.axes.iter()) {
            let p_bc = fusion.iter_domain(p).is_broadcast;
            let c_bc = fusion.iter_domain(c).is_broadcast;
            if p_bc == c_bc {
                graph.map_ids(fusion, p, c);
            }
        }
    }
}

/// Additionally maps across Split-by-1 and Merge-with-1: the non-degenerate side of each such
/// trivial expression equivalence-maps to the other.
fn build_almost_exact_map(graph: &mut IdGraph, fusion: &ir::Fusion) {
    let exprs: Vec<ExprId> = fusion.exprs().map(|e| e.id).collect();
    for e in exprs {
        for (a, b) in IdGraph::is_trivial_expr(fusion, e) {
            graph.map_ids(fusion, a, b);
        }
    }
}

/// Additionally maps broadcast `IterDomain`s to the concrete ones they resolve to: the other
/// axis of the same `LoadStoreOp` position, when exactly one side is a broadcast.
fn build_permissive_map(graph: &mut IdGraph, fusion: &ir::Fusion) {
    for expr in load_store_exprs(fusion) {
        let (producer, consumer) = load_store_tvs(fusion, expr);
        let producer = fusion.tensor_view(producer);
        let consumer = fusion.tensor_view(consumer);
        for (&p, &c) in producer.axes.iter().zip(consumer.axes.iter()) {
            let p_bc = fusion.iter_domain(p).is_broadcast;
            let c_bc = fusion.iter_domain(c).is_broadcast;
            if p_bc != c_bc {
                graph.map_ids(fusion, p, c);
            }
        }
    }
    graph.map_through_loop_swizzles(fusion);
}

/// Builds the LOOP map: for each `LoadStoreOp`, maps only the leaf axes to the left of the
/// consumer's compute-at position, and only among axes that PERMISSIVE already agrees on.
fn build_loop_map(graphs: &mut [IdGraph; 4], fusion: &ir::Fusion) {
    let permissive_idx = MappingMode::Permissive.index();
    let loop_idx = MappingMode::Loop.index();
    for expr in load_store_exprs(fusion) {
        let (producer, consumer) = load_store_tvs(fusion, expr);
        let producer = fusion.tensor_view(producer);
        let consumer = fusion.tensor_view(consumer);
        let bound = consumer
            .compute_at_position
            .min(producer.axes.len())
            .min(consumer.axes.len());
        for i in 0..bound {
            let (p, c) = (producer.axes[i], consumer.axes[i]);
            if graphs[permissive_idx].are_mapped(p, c) {
                graphs[loop_idx].map_ids(fusion, p, c);
            }
        }
    }
}

/// Every `LoadStoreOp` expression in `fusion`.
fn load_store_exprs(fusion: &ir::Fusion) -> Vec<ExprId> {
    fusion
        .exprs()
        .filter(|e| matches!(e.kind, ExprKind::LoadStoreOp { .. }))
        .map(|e| e.id)
        .collect()
}

/// The `(producer, consumer)` tensor views of a `LoadStoreOp`: its first input and its output.
fn load_store_tvs(fusion: &ir::Fusion, expr: ExprId) -> (ir::TensorViewId, ir::TensorViewId) {
    let e = fusion.expr(expr);
    let producer = crate::unwrap!(
        e.inputs.first().and_then(|o| o.as_tv()),
        "LoadStoreOp's first input must be a TensorView"
    );
    let consumer = crate::unwrap!(
        e.outputs.first().and_then(|o| o.as_tv()),
        "LoadStoreOp's output must be a TensorView"
    );
    (producer, consumer)
}

/// Replays every `IdGroup` union recorded in `source` onto a fresh `IdGraph`, used to seed each
/// refining mode from the previous one without aliasing their union-find state.
fn clone_mappings(source: &IdGraph, fusion: &ir::Fusion) -> IdGraph {
    let mut clone = IdGraph::new();
    for id in fusion.iter_domains() {
        clone.initialize_id(id.id, &fusion.definitions_of(id.id), &fusion.uses_of(id.id));
    }
    for (_, members) in source.id_groups() {
        for pair in members.windows(2) {
            clone.map_ids(fusion, pair[0], pair[1]);
        }
    }
    clone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BufferingKind, Extent, MemoryType, TensorView, TensorViewId};

    /// A global-memory producer feeding a shared-memory consumer through a single `LoadStoreOp`,
    /// with the consumer's outer axis marked `TidX` and computed at position 1.
    fn simple_copy_fusion() -> ir::Fusion {
        let mut fusion = ir::Fusion::new();
        let p0 = fusion.add_iter_domain(Extent::Const(4));
        let p1 = fusion.add_iter_domain(Extent::Const(8));
        let c0 = fusion.add_iter_domain(Extent::Const(4));
        let c1 = fusion.add_iter_domain(Extent::Const(8));
        fusion.iter_domain_mut(c0).parallel_type = ir::ParallelType::TidX;

        let mut producer = TensorView::new(TensorViewId(0), "p", MemoryType::Global);
        producer.axes = vec![p0, p1];
        fusion.add_tensor_view(producer);

        let mut consumer = TensorView::new(fusion.next_tensor_view_id(), "c", MemoryType::Shared);
        consumer.axes = vec![c0, c1];
        consumer.compute_at_position = 1;
        consumer.buffering = BufferingKind::Double;
        let consumer_id = fusion.add_tensor_view(consumer);

        fusion.add_expr(
            ExprKind::LoadStoreOp {
                is_cp_async: true,
                uses_ld_matrix: false,
                supports_inline_predicate: false,
            },
            vec![Operand::Tv(TensorViewId(0))],
            vec![Operand::Tv(consumer_id)],
        );
        fusion
    }

    #[test]
    fn exact_map_matches_producer_and_consumer_axes() {
        let mut fusion = simple_copy_fusion();
        let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
        let (p0, p1, c0, c1) = (
            IterDomainId(0),
            IterDomainId(1),
            IterDomainId(2),
            IterDomainId(3),
        );
        assert!(graphs.graph(MappingMode::Exact).are_mapped(p0, c0));
        assert!(graphs.graph(MappingMode::Exact).are_mapped(p1, c1));
    }

    #[test]
    fn loop_map_only_covers_axes_left_of_compute_at_position() {
        let mut fusion = simple_copy_fusion();
        let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
        let (p0, p1, c0, c1) = (
            IterDomainId(0),
            IterDomainId(1),
            IterDomainId(2),
            IterDomainId(3),
        );
        assert!(graphs.graph(MappingMode::Loop).are_mapped(p0, c0));
        assert!(!graphs.graph(MappingMode::Loop).are_mapped(p1, c1));
    }

    #[test]
    fn ptype_propagates_to_the_rest_of_the_loop_group() {
        let mut fusion = simple_copy_fusion();
        IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
        assert_eq!(
            fusion.iter_domain(IterDomainId(0)).parallel_type,
            ir::ParallelType::TidX
        );
    }

    #[test]
    fn conflicting_ptypes_on_the_same_loop_group_are_rejected() {
        let mut fusion = simple_copy_fusion();
        fusion.iter_domain_mut(IterDomainId(0)).parallel_type = ir::ParallelType::TidY;
        let err = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ParallelTypeConflict { .. }));
    }

    #[test]
    fn index_variables_are_assigned_only_to_loop_groups() {
        let mut fusion = simple_copy_fusion();
        let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
        let group = graphs.graph(MappingMode::Loop).id_group(IterDomainId(0));
        assert!(graphs.index_variable(group).is_some());
    }

    #[test]
    fn add_replay_as_maps_new_outputs_to_old_ones_under_exact() {
        let mut fusion = simple_copy_fusion();
        let mut graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
        let split_in = fusion.add_iter_domain(Extent::Const(4));
        let split_outer = fusion.add_iter_domain(Extent::Const(2));
        let split_inner = fusion.add_iter_domain(Extent::Const(2));
        let split = fusion.add_expr(
            ExprKind::Split { factor: 2 },
            vec![Operand::Id(split_in)],
            vec![Operand::Id(split_outer), Operand::Id(split_inner)],
        );
        let replay_in = fusion.add_iter_domain(Extent::Const(4));
        graphs.add_replay_as(&mut fusion, &[replay_in], split);
        assert!(graphs
            .graph(MappingMode::Exact)
            .are_mapped(replay_in, split_in));
    }
}
