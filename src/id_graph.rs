//! A single equivalence relation over iteration domains plus the derived definition/use edges
//! between equivalence classes.
use crate::disjoint_sets::DisjointSets;
use crate::ir::{self, ExprId, ExprKind, IterDomainId};
use crate::utils::{HashMap, HashSet, VecSet};
use std::fmt;

/// A shared handle to an equivalence class of `IterDomain`s. Value-identity on the group, not on
/// its contents: two `IdGroup`s compare equal iff they currently denote the same class, no
/// matter how many further merges have happened since either was obtained.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IdGroup(crate::disjoint_sets::GroupId);

/// A shared handle to an equivalence class of `Expression`s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ExprGroup(crate::disjoint_sets::GroupId);

/// A single mapping mode's equivalence relation, plus the `unique_definitions`/`unique_uses`
/// edges between `IdGroup`s and `ExprGroup`s that congruence-closure propagation walks.
#[derive(Default)]
pub struct IdGraph {
    ids: DisjointSets<IterDomainId>,
    exprs: DisjointSets<ExprId>,
    representative: HashMap<ExprGroup, ExprId>,
    unique_definitions: HashMap<IdGroup, VecSet<ExprGroup>>,
    unique_uses: HashMap<IdGroup, VecSet<ExprGroup>>,
}

impl IdGraph {
    pub fn new() -> Self {
        IdGraph::default()
    }

    /// Creates a singleton `IdGroup` containing `id`, if not already present, and registers its
    /// definitions and uses as singleton `ExprGroup`s.
    pub fn initialize_id(
        &mut self,
        id: IterDomainId,
        definitions: &[ExprId],
        uses: &[ExprId],
    ) -> IdGroup {
        let group = IdGroup(self.ids.find_set(&id));
        for &e in definitions {
            let eg = self.singleton_expr_group(e);
            self.unique_definitions.entry(group).or_default().insert(eg);
        }
        for &e in uses {
            let eg = self.singleton_expr_group(e);
            self.unique_uses.entry(group).or_default().insert(eg);
        }
        group
    }

    fn singleton_expr_group(&mut self, e: ExprId) -> ExprGroup {
        let eg = ExprGroup(self.exprs.find_set(&e));
        self.representative.entry(eg).or_insert(e);
        eg
    }

    /// The group containing `id`. Registers `id` as a new singleton group if unseen.
    pub fn id_group(&mut self, id: IterDomainId) -> IdGroup {
        IdGroup(self.ids.find_set(&id))
    }

    /// The group containing `id`, without registering it if unseen.
    ///
    /// Panics if `id` was never passed to `initialize_id`: by the time callers query a built
    /// `IterDomainGraphs` read-only, every `IterDomain` in the fusion has already been
    /// initialized into every mode's graph.
    pub fn id_group_const(&self, id: IterDomainId) -> IdGroup {
        IdGroup(crate::unwrap!(
            self.ids.try_find_set(&id),
            "id_group_const on an uninitialized IterDomain {}",
            id
        ))
    }

    /// The group containing `e`. Registers `e` as a new singleton group if unseen.
    pub fn expr_group(&mut self, e: ExprId) -> ExprGroup {
        self.singleton_expr_group(e)
    }

    pub fn are_mapped(&self, a: IterDomainId, b: IterDomainId) -> bool {
        self.ids.strict_are_mapped(&a, &b)
    }

    pub fn exprs_are_mapped(&self, a: ExprId, b: ExprId) -> bool {
        self.exprs.strict_are_mapped(&a, &b)
    }

    pub fn representative_expr(&self, g: ExprGroup) -> ExprId {
        *crate::unwrap!(self.representative.get(&g), "expr group has no representative")
    }

    pub fn unique_definitions(&self, g: IdGroup) -> &[ExprGroup] {
        self.unique_definitions
            .get(&g)
            .map(VecSet::as_slice)
            .unwrap_or(&[])
    }

    pub fn unique_uses(&self, g: IdGroup) -> &[ExprGroup] {
        self.unique_uses
            .get(&g)
            .map(VecSet::as_slice)
            .unwrap_or(&[])
    }

    pub fn num_id_groups(&self) -> usize {
        self.ids.num_groups()
    }

    /// Every registered `IdGroup`, with its member `IterDomain`s.
    pub fn id_groups(&self) -> HashMap<IdGroup, Vec<IterDomainId>> {
        self.ids
            .disjoint_set_map()
            .into_iter()
            .map(|(g, members)| (IdGroup(g), members))
            .collect()
    }

    /// Returns true iff `first` and `second` are congruent: same structural kind, every matched
    /// position (inputs if `forward`, outputs otherwise) already mapped, kind-specific numeric
    /// attributes agree, and (for `Merge`) input extents agree pairwise by structural equality.
    pub fn exprs_map(
        &self,
        fusion: &ir::Fusion,
        first: ExprId,
        second: ExprId,
        forward: bool,
    ) -> bool {
        let e1 = fusion.expr(first);
        let e2 = fusion.expr(second);
        if !e1.kind.structurally_matches(&e2.kind) {
            return false;
        }
        let (ids1, ids2): (Vec<_>, Vec<_>) = if forward {
            (e1.input_ids().collect(), e2.input_ids().collect())
        } else {
            (e1.output_ids().collect(), e2.output_ids().collect())
        };
        if ids1.len() != ids2.len() {
            return false;
        }
        if !ids1
            .iter()
            .zip(ids2.iter())
            .all(|(&a, &b)| self.are_mapped(a, b))
        {
            return false;
        }
        if matches!(e1.kind, ExprKind::Merge) {
            let in1: Vec<_> = e1.input_ids().collect();
            let in2: Vec<_> = e2.input_ids().collect();
            if in1.len() != in2.len() {
                return false;
            }
            for (&a, &b) in in1.iter().zip(in2.iter()) {
                if fusion.iter_domain(a).extent != fusion.iter_domain(b).extent {
                    return false;
                }
            }
        }
        true
    }

    /// Unions `a` and `b`, cascading any further merges their congruence implies, until a fixed
    /// point is reached.
    pub fn map_ids(&mut self, fusion: &ir::Fusion, a: IterDomainId, b: IterDomainId) {
        let mut worklist = vec![(a, b)];
        while let Some((x, y)) = worklist.pop() {
            if self.ids.strict_are_mapped(&x, &y) {
                continue;
            }
            let new_group = self.union_id_groups(x, y);

            let defs: Vec<ExprGroup> = self.unique_definitions(new_group).to_vec();
            for i in 0..defs.len() {
                for j in (i + 1)..defs.len() {
                    let e1 = self.representative_expr(defs[i]);
                    let e2 = self.representative_expr(defs[j]);
                    if !self.exprs_are_mapped(e1, e2) && self.exprs_map(fusion, e1, e2, false) {
                        self.map_through_expr(fusion, e1, e2, false, &mut worklist);
                    }
                }
            }

            let uses: Vec<ExprGroup> = self.unique_uses(new_group).to_vec();
            for i in 0..uses.len() {
                for j in (i + 1)..uses.len() {
                    let e1 = self.representative_expr(uses[i]);
                    let e2 = self.representative_expr(uses[j]);
                    if !self.exprs_are_mapped(e1, e2) && self.exprs_map(fusion, e1, e2, true) {
                        self.map_through_expr(fusion, e1, e2, true, &mut worklist);
                    }
                }
            }
        }
    }

    /// Unions `e1` and `e2`'s expr groups, then queues unions of their corresponding outputs
    /// (`forward`) or inputs (`!forward`) so the enclosing `map_ids` fixed-point loop picks them
    /// up.
    fn map_through_expr(
        &mut self,
        fusion: &ir::Fusion,
        e1: ExprId,
        e2: ExprId,
        forward: bool,
        worklist: &mut Vec<(IterDomainId, IterDomainId)>,
    ) {
        self.map_exprs(e1, e2);
        let expr1 = fusion.expr(e1);
        let expr2 = fusion.expr(e2);
        let (ports1, ports2): (Vec<_>, Vec<_>) = if forward {
            (expr1.output_ids().collect(), expr2.output_ids().collect())
        } else {
            (expr1.input_ids().collect(), expr2.input_ids().collect())
        };
        for (p1, p2) in ports1.into_iter().zip(ports2.into_iter()) {
            worklist.push((p1, p2));
        }
    }

    /// Unions `e1` and `e2` in the expr equivalence relation, merging their
    /// `unique_definitions`/`unique_uses` membership across all `IdGroup`s that reference them.
    pub fn map_exprs(&mut self, e1: ExprId, e2: ExprId) -> ExprGroup {
        let old1 = self.singleton_expr_group(e1);
        let old2 = self.singleton_expr_group(e2);
        if old1 == old2 {
            return old1;
        }
        let new_root = self.exprs.map_entries(&e1, &e2);
        let new = ExprGroup(new_root);
        let rep1 = self.representative.remove(&old1);
        let rep2 = self.representative.remove(&old2);
        let rep = rep1.or(rep2).unwrap_or(e1);
        self.representative.insert(new, rep);
        if old1 != new {
            self.rewrite_expr_group(old1, new);
        }
        if old2 != new {
            self.rewrite_expr_group(old2, new);
        }
        new
    }

    /// Replaces every occurrence of `old` with `new` across all `unique_definitions`/
    /// `unique_uses` entries. Handles are not globally unique once a merge happens, so any map
    /// keyed by an `ExprGroup` value (rather than as the union-find's own bookkeeping) needs
    /// this explicit rewrite.
    fn rewrite_expr_group(&mut self, old: ExprGroup, new: ExprGroup) {
        for set in self.unique_definitions.values_mut() {
            if set.contains(&old) {
                let mut rebuilt = VecSet::new();
                for item in set.iter() {
                    rebuilt.insert(if *item == old { new } else { *item });
                }
                *set = rebuilt;
            }
        }
        for set in self.unique_uses.values_mut() {
            if set.contains(&old) {
                let mut rebuilt = VecSet::new();
                for item in set.iter() {
                    rebuilt.insert(if *item == old { new } else { *item });
                }
                *set = rebuilt;
            }
        }
    }

    /// Unions `a` and `b`'s id groups, migrating `unique_definitions`/`unique_uses` satellite
    /// data from the two old group handles to the new one.
    fn union_id_groups(&mut self, a: IterDomainId, b: IterDomainId) -> IdGroup {
        let old_a = self.id_group(a);
        let old_b = self.id_group(b);
        let new_root = self.ids.map_entries(&a, &b);
        let new = IdGroup(new_root);
        let mut defs = self.unique_definitions.remove(&old_a).unwrap_or_default();
        for e in self.unique_definitions.remove(&old_b).unwrap_or_default() {
            defs.insert(e);
        }
        self.unique_definitions.insert(new, defs);
        let mut uses = self.unique_uses.remove(&old_a).unwrap_or_default();
        for e in self.unique_uses.remove(&old_b).unwrap_or_default() {
            uses.insert(e);
        }
        self.unique_uses.insert(new, uses);
        new
    }

    /// Picks a representative expression of `group` and maps each of its outputs to its
    /// `IdGroup`.
    pub fn output_groups(&mut self, fusion: &ir::Fusion, group: ExprGroup) -> Vec<IdGroup> {
        let rep = self.representative_expr(group);
        let outputs: Vec<_> = fusion.expr(rep).output_ids().collect();
        outputs.into_iter().map(|id| self.id_group(id)).collect()
    }

    /// Picks a representative expression of `group` and maps each of its inputs to its
    /// `IdGroup`.
    pub fn input_groups(&mut self, fusion: &ir::Fusion, group: ExprGroup) -> Vec<IdGroup> {
        let rep = self.representative_expr(group);
        let inputs: Vec<_> = fusion.expr(rep).input_ids().collect();
        inputs.into_iter().map(|id| self.id_group(id)).collect()
    }

    /// BFS backwards over `IdGroup -> {ExprGroup}` definition edges, collecting every
    /// `ExprGroup` reachable from `ids`.
    pub fn all_definitions_of(&mut self, fusion: &ir::Fusion, ids: &[IterDomainId]) -> HashSet<ExprGroup> {
        let mut seen_ids: HashSet<IdGroup> = HashSet::default();
        let mut seen_exprs: HashSet<ExprGroup> = HashSet::default();
        let mut frontier: Vec<IdGroup> = ids.iter().map(|&id| self.id_group(id)).collect();
        while let Some(g) = frontier.pop() {
            if !seen_ids.insert(g) {
                continue;
            }
            for &eg in self.unique_definitions(g).to_vec().iter() {
                if seen_exprs.insert(eg) {
                    frontier.extend(self.input_groups(fusion, eg));
                }
            }
        }
        seen_exprs
    }

    /// BFS forwards over `IdGroup -> {ExprGroup}` use edges, collecting every `ExprGroup`
    /// reachable from `ids`.
    pub fn all_uses_of(&mut self, fusion: &ir::Fusion, ids: &[IterDomainId]) -> HashSet<ExprGroup> {
        let mut seen_ids: HashSet<IdGroup> = HashSet::default();
        let mut seen_exprs: HashSet<ExprGroup> = HashSet::default();
        let mut frontier: Vec<IdGroup> = ids.iter().map(|&id| self.id_group(id)).collect();
        while let Some(g) = frontier.pop() {
            if !seen_ids.insert(g) {
                continue;
            }
            for &eg in self.unique_uses(g).to_vec().iter() {
                if seen_exprs.insert(eg) {
                    frontier.extend(self.output_groups(fusion, eg));
                }
            }
        }
        seen_exprs
    }

    /// BFS forwards from `from`, pruning at `to`; returns the `ExprGroup`s on the frontier, in
    /// the order they were first discovered (a valid topological order since we never revisit a
    /// group after collecting its uses).
    pub fn exprs_between(
        &mut self,
        fusion: &ir::Fusion,
        from: &[IterDomainId],
        to: &[IterDomainId],
    ) -> Vec<ExprGroup> {
        let to_groups: HashSet<IdGroup> = to.iter().map(|&id| self.id_group(id)).collect();
        let mut seen_ids: HashSet<IdGroup> = HashSet::default();
        let mut seen_exprs: HashSet<ExprGroup> = HashSet::default();
        let mut order = Vec::new();
        let mut frontier: Vec<IdGroup> = from.iter().map(|&id| self.id_group(id)).collect();
        while let Some(g) = frontier.pop() {
            if !seen_ids.insert(g) || to_groups.contains(&g) {
                continue;
            }
            for &eg in self.unique_uses(g).to_vec().iter() {
                if seen_exprs.insert(eg) {
                    order.push(eg);
                    frontier.extend(self.output_groups(fusion, eg));
                }
            }
        }
        order
    }

    /// For each `f` in `from`, the `t`s in `to` with the same `IdGroup`, in the order `to` was
    /// supplied.
    pub fn build_map_between(
        &mut self,
        from: &[IterDomainId],
        to: &[IterDomainId],
    ) -> HashMap<IterDomainId, Vec<IterDomainId>> {
        let to_with_groups: Vec<(IterDomainId, IdGroup)> =
            to.iter().map(|&id| (id, self.id_group(id))).collect();
        let mut result = HashMap::default();
        for &f in from {
            let fg = self.id_group(f);
            let matches: Vec<IterDomainId> = to_with_groups
                .iter()
                .filter(|(_, g)| *g == fg)
                .map(|(id, _)| *id)
                .collect();
            result.insert(f, matches);
        }
        result
    }

    /// Unions the input `IdGroup`s of every `Swizzle` expression with its output `IdGroup`s,
    /// positionally: loop swizzles are identity for indexing purposes.
    pub fn map_through_loop_swizzles(&mut self, fusion: &ir::Fusion) {
        let swizzle_exprs: Vec<ExprId> = fusion
            .exprs()
            .filter(|e| e.kind.is_swizzle())
            .map(|e| e.id)
            .collect();
        for e in swizzle_exprs {
            let expr = fusion.expr(e);
            let inputs: Vec<_> = expr.input_ids().collect();
            let outputs: Vec<_> = expr.output_ids().collect();
            for (i, o) in inputs.into_iter().zip(outputs.into_iter()) {
                self.map_ids(fusion, i, o);
            }
        }
    }

    /// Returns the identity-mapped `(input, output)` pairs for a trivial expression: a
    /// Split-by-1 (the non-trivial side becomes the input), a Merge-with-a-size-1-input (the
    /// non-1 input maps to the output), or an identity `Swizzle`.
    pub fn is_trivial_expr(fusion: &ir::Fusion, e: ExprId) -> Vec<(IterDomainId, IterDomainId)> {
        let expr = fusion.expr(e);
        match &expr.kind {
            ExprKind::Split { factor } => {
                let inputs: Vec<_> = expr.input_ids().collect();
                let outputs: Vec<_> = expr.output_ids().collect();
                if *factor == 1 && inputs.len() == 1 && outputs.len() == 2 {
                    // Outputs are conventionally (outer, inner); splitting by 1 makes one of
                    // them degenerate and the other equal to the input.
                    let non_degenerate = outputs
                        .iter()
                        .find(|&&o| fusion.iter_domain(o).extent != ir::Extent::Const(1))
                        .copied();
                    non_degenerate
                        .into_iter()
                        .map(|o| (inputs[0], o))
                        .collect()
                } else {
                    Vec::new()
                }
            }
            ExprKind::Merge => {
                let inputs: Vec<_> = expr.input_ids().collect();
                let outputs: Vec<_> = expr.output_ids().collect();
                if inputs.len() == 2 && outputs.len() == 1 {
                    let non_one = inputs
                        .iter()
                        .find(|&&i| fusion.iter_domain(i).extent != ir::Extent::Const(1))
                        .copied();
                    non_one.into_iter().map(|i| (i, outputs[0])).collect()
                } else {
                    Vec::new()
                }
            }
            ExprKind::Swizzle {
                kind: ir::SwizzleKind::Identity,
            } => expr
                .input_ids()
                .zip(expr.output_ids())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for IdGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IdGraph {{ {} id groups }}", self.num_id_groups())
    }
}
