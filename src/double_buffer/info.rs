//! Query-only results of the double-buffer inspection pass: which axis buffers which tensor, at
//! what stage depth, and where the rotating read-switch register (if any) lives.
use crate::error::Error;
use crate::id_graph::IdGroup;
use crate::ir::{self, IterDomainId, TensorViewId};
use crate::iter_domain_graphs::{IterDomainGraphs, MappingMode};
use crate::utils::{HashMap, HashSet};

/// Populated once by `DoubleBufferFusionInspector::run`, then only ever queried.
#[derive(Default)]
pub struct DoubleBufferInfo {
    axis_by_tv: HashMap<TensorViewId, IterDomainId>,
    stage_depth_by_concrete_loop_id: HashMap<IdGroup, u32>,
    first_tv_by_concrete_loop_id: HashMap<IdGroup, String>,
    original_alloc_size_by_tv: HashMap<TensorViewId, u64>,
    read_switch_index_by_tv: HashMap<TensorViewId, String>,
}

impl DoubleBufferInfo {
    pub fn new() -> Self {
        DoubleBufferInfo::default()
    }

    /// Records `axis` as `tv`'s double-buffer axis, and `tv`'s stage depth (2 for plain double
    /// buffering, or the tensor's own circular-buffer depth). Rejects a second, conflicting depth
    /// request on the same LOOP-concrete axis.
    pub fn set_double_buffer_axis(
        &mut self,
        graphs: &IterDomainGraphs,
        tv: &ir::TensorView,
        axis: IterDomainId,
    ) -> Result<(), Error> {
        let depth = match tv.buffering {
            ir::BufferingKind::Double => 2,
            ir::BufferingKind::Circular(d) => d,
            ir::BufferingKind::None => {
                return Err(Error::InvalidAnnotation {
                    tv: tv.name.clone(),
                    reason: "not annotated for (circular-)buffering".to_string(),
                })
            }
        };
        let group = graphs.graph(MappingMode::Loop).id_group_const(axis);
        if let Some(&recorded) = self.stage_depth_by_concrete_loop_id.get(&group) {
            if recorded != depth {
                return Err(Error::StageDepthConflict {
                    axis: axis.to_string(),
                    tv: tv.name.clone(),
                    requested: depth,
                    first_tv: self
                        .first_tv_by_concrete_loop_id
                        .get(&group)
                        .cloned()
                        .unwrap_or_default(),
                    recorded,
                });
            }
        } else {
            self.stage_depth_by_concrete_loop_id.insert(group, depth);
            self.first_tv_by_concrete_loop_id
                .insert(group, tv.name.clone());
        }
        self.axis_by_tv.insert(tv.id, axis);
        Ok(())
    }

    pub fn set_original_alloc_size(&mut self, tv: TensorViewId, bytes: u64) {
        self.original_alloc_size_by_tv.insert(tv, bytes);
    }

    pub fn set_read_switch_index(&mut self, tv: TensorViewId, var: impl Into<String>) {
        self.read_switch_index_by_tv.insert(tv, var.into());
    }

    pub fn axis_of(&self, tv: TensorViewId) -> Option<IterDomainId> {
        self.axis_by_tv.get(&tv).copied()
    }

    pub fn is_double_buffer_load(&self, tv: TensorViewId) -> bool {
        self.axis_by_tv.contains_key(&tv)
    }

    /// Every `TensorView` annotated and validated as (circular-)buffered.
    pub fn all_tvs(&self) -> impl Iterator<Item = TensorViewId> + '_ {
        self.axis_by_tv.keys().copied()
    }

    pub fn stage_depth(&self, group: IdGroup) -> Option<u32> {
        self.stage_depth_by_concrete_loop_id.get(&group).copied()
    }

    /// The stage depth of the LOOP-concrete axis `axis` (possibly unmapped to any buffered
    /// tensor, in which case `None`).
    pub fn stage_depth_of_axis(&self, graphs: &IterDomainGraphs, axis: IterDomainId) -> Option<u32> {
        let group = graphs.graph(MappingMode::Loop).id_group_const(axis);
        self.stage_depth(group)
    }

    pub fn original_alloc_size(&self, tv: TensorViewId) -> Option<u64> {
        self.original_alloc_size_by_tv.get(&tv).copied()
    }

    pub fn read_switch_index(&self, tv: TensorViewId) -> Option<&str> {
        self.read_switch_index_by_tv.get(&tv).map(String::as_str)
    }

    /// Every LOOP-concrete axis group that some annotated tensor maps into.
    pub fn concrete_double_buffered_loop_ids(&self) -> HashSet<IdGroup> {
        self.stage_depth_by_concrete_loop_id.keys().copied().collect()
    }

    pub fn is_concrete_double_buffer_loop(&self, graphs: &IterDomainGraphs, axis: IterDomainId) -> bool {
        let group = graphs.graph(MappingMode::Loop).id_group_const(axis);
        self.stage_depth_by_concrete_loop_id.contains_key(&group)
    }

    /// Every buffered tensor whose double-buffer axis concretely maps to `axis`.
    pub fn loads_on_axis(
        &self,
        graphs: &IterDomainGraphs,
        axis: IterDomainId,
    ) -> Vec<TensorViewId> {
        let group = graphs.graph(MappingMode::Loop).id_group_const(axis);
        self.axis_by_tv
            .iter()
            .filter(|(_, &a)| graphs.graph(MappingMode::Loop).id_group_const(a) == group)
            .map(|(&tv, _)| tv)
            .collect()
    }
}
