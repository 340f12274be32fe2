//! Validates (circular-)buffered tensors and picks their double-buffer axis; separately, groups
//! a lowered loop nest's loads by their enclosing double-buffer loop.
use super::info::DoubleBufferInfo;
use crate::error::Error;
use crate::ir::{self, ExprKind, MemoryType, Operand, TensorViewId};
use crate::iter_domain_graphs::IterDomainGraphs;
use crate::kernel_ir::{For, Stmt};
use crate::utils::HashMap;
use log::debug;

/// Walks every buffered `TensorView` in a `Fusion`, validating its annotation and selecting its
/// double-buffer axis, producing a populated `DoubleBufferInfo`.
pub struct DoubleBufferFusionInspector;

impl DoubleBufferFusionInspector {
    pub fn run(fusion: &ir::Fusion, graphs: &IterDomainGraphs) -> Result<DoubleBufferInfo, Error> {
        let mut info = DoubleBufferInfo::new();
        for tv in fusion.tensor_views() {
            if !tv.is_buffered() {
                continue;
            }
            debug!("inspecting buffered tensor `{}`", tv.name);
            validate_tensor(fusion, tv)?;
            let pos = double_buffer_axis_position(fusion, tv)?;
            let axis = tv.axes[pos];
            info.set_double_buffer_axis(graphs, tv, axis)?;
            info.set_original_alloc_size(tv.id, alloc_size_from(fusion, tv, pos));
            if wants_read_switch(fusion, tv) {
                info.set_read_switch_index(tv.id, format!("{}_read_switch", tv.name));
            }
        }
        Ok(info)
    }
}

/// A tensor's defining expression must be a `LoadStoreOp`, it must not have a `compute_with`
/// resolution pending, its producer's compute position must not exceed the eventual double-buffer
/// axis, and the memory direction must be one the pass knows how to buffer.
fn validate_tensor(fusion: &ir::Fusion, tv: &ir::TensorView) -> Result<(), Error> {
    let def = tv.definition.ok_or_else(|| Error::InvalidAnnotation {
        tv: tv.name.clone(),
        reason: "has no defining expression".to_string(),
    })?;
    let expr = fusion.expr(def);
    if !matches!(expr.kind, ExprKind::LoadStoreOp { .. }) {
        return Err(Error::InvalidAnnotation {
            tv: tv.name.clone(),
            reason: "defining expression is not a LoadStoreOp".to_string(),
        });
    }
    let producer = expr
        .inputs
        .first()
        .and_then(|o| o.as_tv())
        .ok_or_else(|| Error::InvalidAnnotation {
            tv: tv.name.clone(),
            reason: "LoadStoreOp's first input is not a TensorView".to_string(),
        })?;
    let producer = fusion.tensor_view(producer);

    if tv.has_compute_with {
        return Err(Error::InvalidAnnotation {
            tv: tv.name.clone(),
            reason: "has an unresolved compute-with".to_string(),
        });
    }

    match (producer.memory_type, tv.memory_type) {
        (MemoryType::Global, MemoryType::Shared) => {}
        (MemoryType::Global, MemoryType::Local) => {}
        (_, MemoryType::Local) => {}
        _ => {
            return Err(Error::InvalidAnnotation {
                tv: tv.name.clone(),
                reason: format!(
                    "unsupported memory direction {:?} -> {:?}",
                    producer.memory_type, tv.memory_type
                ),
            })
        }
    }

    if producer.compute_at_position > tv.compute_at_position {
        return Err(Error::InvalidAnnotation {
            tv: tv.name.clone(),
            reason: "producer's compute position exceeds its own compute-at position".to_string(),
        });
    }
    Ok(())
}

/// §4.4: require `compute_at_position > 0`; cap at the first `Unroll`-parallel axis; scan
/// backwards from there for the first axis that is neither thread-parallel nor broadcast.
fn double_buffer_axis_position(fusion: &ir::Fusion, tv: &ir::TensorView) -> Result<usize, Error> {
    if tv.compute_at_position == 0 {
        return Err(Error::InvalidAnnotation {
            tv: tv.name.clone(),
            reason: "compute_at_position is 0".to_string(),
        });
    }
    let first_unroll_pos = tv
        .axes
        .iter()
        .position(|&id| fusion.iter_domain(id).parallel_type == ir::ParallelType::Unroll)
        .unwrap_or(tv.axes.len());
    let p = tv.compute_at_position.min(first_unroll_pos);
    for i in (0..p).rev() {
        let d = fusion.iter_domain(tv.axes[i]);
        if !d.parallel_type.is_thread_parallel() && !d.is_broadcast {
            return Ok(i);
        }
    }
    Err(Error::AxisNotFound { tv: tv.name.clone() })
}

/// The per-stage allocation size: the element count of the axes strictly inside the chosen
/// double-buffer axis (the ones that make up one stage's tile), when all are compile-time
/// constants; symbolic extents are not evaluated here (out of scope: the allocation pass), so
/// they report `0` and the allocator (an external collaborator) resolves the real size.
fn alloc_size_from(fusion: &ir::Fusion, tv: &ir::TensorView, axis_pos: usize) -> u64 {
    tv.axes[axis_pos + 1..]
        .iter()
        .try_fold(1u64, |acc, &id| match fusion.iter_domain(id).extent {
            ir::Extent::Const(n) => Some(acc * n),
            ir::Extent::Symbolic(_) => None,
        })
        .unwrap_or(0)
}

/// §4.3 `DoubleBufferInfo` doc: the read-switch register is only allocated for a shared-memory,
/// buffered output with `should_lift_read_address` set, and only when every consuming
/// `LoadStoreOp` uses `ld.matrix`.
fn wants_read_switch(fusion: &ir::Fusion, tv: &ir::TensorView) -> bool {
    if tv.memory_type != MemoryType::Shared || !tv.is_buffered() || !tv.should_lift_read_address {
        return false;
    }
    let mut consumers = fusion
        .exprs()
        .filter(|e| e.inputs.contains(&Operand::Tv(tv.id)))
        .peekable();
    if consumers.peek().is_none() {
        return false;
    }
    consumers.all(|e| matches!(e.kind, ExprKind::LoadStoreOp { uses_ld_matrix: true, .. }))
}

/// For each `For` loop in a lowered loop nest, the tensors whose double-buffer axis concretely
/// maps to it.
pub struct DoubleBufferLoopNestInspector;

impl DoubleBufferLoopNestInspector {
    /// Groups buffered loads by their enclosing double-buffer `For` loop, identified by the
    /// loop's `axis`. Descends into `Nested` statements.
    pub fn collect(
        root: &For,
        info: &DoubleBufferInfo,
        graphs: &IterDomainGraphs,
    ) -> HashMap<crate::ir::IterDomainId, Vec<TensorViewId>> {
        let mut out = HashMap::default();
        collect_inner(root, info, graphs, &mut out);
        out
    }

    /// Same as `collect`, but over a whole lowered loop nest's top-level statement list rather
    /// than a single `For` (the shape `double_buffer::run` is actually handed).
    pub fn collect_body(
        body: &[Stmt],
        info: &DoubleBufferInfo,
        graphs: &IterDomainGraphs,
    ) -> HashMap<crate::ir::IterDomainId, Vec<TensorViewId>> {
        let mut out = HashMap::default();
        collect_inner_body(body, info, graphs, &mut out);
        out
    }

    /// Every buffered `TensorView` `info` knows about that no loop in `body` was found to
    /// enclose. A non-empty result is a `MissingDoubleBufferLoop` condition.
    pub fn missing_loops(
        body: &[Stmt],
        info: &DoubleBufferInfo,
        graphs: &IterDomainGraphs,
    ) -> Vec<TensorViewId> {
        let found: crate::utils::HashSet<TensorViewId> = Self::collect_body(body, info, graphs)
            .values()
            .flatten()
            .copied()
            .collect();
        info.all_tvs().filter(|tv| !found.contains(tv)).collect()
    }
}

fn collect_inner(
    for_loop: &For,
    info: &DoubleBufferInfo,
    graphs: &IterDomainGraphs,
    out: &mut HashMap<crate::ir::IterDomainId, Vec<TensorViewId>>,
) {
    if info.is_concrete_double_buffer_loop(graphs, for_loop.axis) {
        let mut loads = Vec::new();
        collect_loads(&for_loop.body, info, &mut loads);
        out.entry(for_loop.axis).or_insert(loads);
    }
    collect_inner_body(&for_loop.body, info, graphs, out);
}

fn collect_inner_body(
    body: &[Stmt],
    info: &DoubleBufferInfo,
    graphs: &IterDomainGraphs,
    out: &mut HashMap<crate::ir::IterDomainId, Vec<TensorViewId>>,
) {
    for stmt in body {
        match stmt {
            Stmt::Nested(inner) => collect_inner(inner, info, graphs, out),
            Stmt::IfThenElse {
                then_body,
                else_body,
                ..
            } => {
                collect_inner_body(then_body, info, graphs, out);
                collect_inner_body(else_body, info, graphs, out);
            }
            _ => {}
        }
    }
}

fn collect_loads(body: &[Stmt], info: &DoubleBufferInfo, loads: &mut Vec<TensorViewId>) {
    for stmt in body {
        match stmt {
            Stmt::Load { output_tv, .. } if info.is_double_buffer_load(*output_tv) => {
                loads.push(*output_tv);
            }
            Stmt::Nested(inner) if inner.body.len() == 1 => {
                collect_loads(&inner.body, info, loads);
            }
            Stmt::IfThenElse {
                then_body,
                else_body,
                ..
            } => {
                collect_loads(then_body, info, loads);
                collect_loads(else_body, info, loads);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BufferingKind, Extent, Fusion, ParallelType, TensorView, TensorViewId};

    fn tensor_view_with_axes(
        fusion: &mut Fusion,
        name: &str,
        memory_type: MemoryType,
        n: usize,
    ) -> (TensorViewId, Vec<crate::ir::IterDomainId>) {
        let axes: Vec<_> = (0..n).map(|_| fusion.add_iter_domain(Extent::Const(4))).collect();
        let mut tv = TensorView::new(fusion.next_tensor_view_id(), name, memory_type);
        tv.axes = axes.clone();
        let id = fusion.add_tensor_view(tv);
        (id, axes)
    }

    #[test]
    fn axis_position_skips_thread_parallel_and_broadcast() {
        let mut fusion = Fusion::new();
        let (tv_id, axes) = tensor_view_with_axes(&mut fusion, "t", MemoryType::Shared, 4);
        fusion.iter_domain_mut(axes[2]).parallel_type = ParallelType::TidX;
        fusion.iter_domain_mut(axes[1]).is_broadcast = true;
        let mut tv = fusion.tensor_view(tv_id).clone();
        tv.compute_at_position = 3;
        assert_eq!(double_buffer_axis_position(&fusion, &tv).unwrap(), 0);
    }

    #[test]
    fn axis_position_caps_at_first_unroll() {
        let mut fusion = Fusion::new();
        let (tv_id, axes) = tensor_view_with_axes(&mut fusion, "t", MemoryType::Shared, 4);
        fusion.iter_domain_mut(axes[1]).parallel_type = ParallelType::Unroll;
        let mut tv = fusion.tensor_view(tv_id).clone();
        tv.compute_at_position = 3;
        // p = min(3, first_unroll_pos=1) = 1; scanning [0..1] finds axis 0.
        assert_eq!(double_buffer_axis_position(&fusion, &tv).unwrap(), 0);
    }

    #[test]
    fn axis_position_fails_when_every_candidate_is_disqualified() {
        let mut fusion = Fusion::new();
        let (tv_id, axes) = tensor_view_with_axes(&mut fusion, "t", MemoryType::Shared, 2);
        fusion.iter_domain_mut(axes[0]).parallel_type = ParallelType::TidX;
        let mut tv = fusion.tensor_view(tv_id).clone();
        tv.compute_at_position = 1;
        assert!(matches!(
            double_buffer_axis_position(&fusion, &tv),
            Err(Error::AxisNotFound { .. })
        ));
    }

    #[test]
    fn read_switch_requires_all_uses_to_be_ld_matrix() {
        let mut fusion = Fusion::new();
        let (tv_id, _) = tensor_view_with_axes(&mut fusion, "t", MemoryType::Shared, 1);
        {
            let tv = fusion.tensor_view_mut(tv_id);
            tv.buffering = BufferingKind::Double;
            tv.should_lift_read_address = true;
        }
        let tv = fusion.tensor_view(tv_id).clone();
        assert!(!wants_read_switch(&fusion, &tv));

        fusion.add_expr(
            ExprKind::LoadStoreOp {
                is_cp_async: false,
                uses_ld_matrix: true,
                supports_inline_predicate: false,
            },
            vec![Operand::Tv(tv_id)],
            vec![],
        );
        assert!(wants_read_switch(&fusion, &tv));

        fusion.add_expr(
            ExprKind::LoadStoreOp {
                is_cp_async: false,
                uses_ld_matrix: false,
                supports_inline_predicate: false,
            },
            vec![Operand::Tv(tv_id)],
            vec![],
        );
        assert!(!wants_read_switch(&fusion, &tv));
    }
}
