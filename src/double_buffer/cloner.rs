//! Clones a double-buffered `For` loop into one of its four possible stages, rewriting its body
//! and iteration range to match.
use super::info::DoubleBufferInfo;
use crate::ir::{self, TensorViewId};
use crate::iter_domain_graphs::IterDomainGraphs;
use crate::kernel_ir::{AddressComputeKind, Bound, For, Stmt};
use log::trace;

/// Which of the four loop copies is being produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Prolog,
    Main,
    Epilog,
    CircularInitProlog,
}

pub struct DoubleBufferLoopCloner;

impl DoubleBufferLoopCloner {
    /// Clones `source` into `stage`, given the set of buffered `loads` (their output
    /// `TensorView`s) that identify which statements belong to the double-buffering prelude.
    pub fn clone_stage(
        source: &For,
        loads: &[TensorViewId],
        stage: Stage,
        requires_epilog: bool,
        info: &DoubleBufferInfo,
        graphs: &IterDomainGraphs,
        fusion: &ir::Fusion,
        peeled: bool,
    ) -> For {
        let depth = crate::unwrap!(
            info.stage_depth_of_axis(graphs, source.axis),
            "cloning a double-buffer stage for an axis with no recorded stage depth"
        ) as i64;
        trace!("cloning {:?} of {} at depth {}", stage, source, depth);

        let (start, stop) = iteration_range(source, stage, depth, requires_epilog);
        let body = clone_body(
            &source.body,
            loads,
            stage,
            peeled,
            source.axis,
            info,
            graphs,
            fusion,
        );
        let body = if stage == Stage::Main {
            insert_read_switches(body, loads, info, depth as u32)
        } else {
            body
        };
        let body = if stage == Stage::Main && peeled {
            hoist_gmem_increments(body)
        } else {
            body
        };

        let mut cloned = source.with_body(body);
        cloned.start = start;
        cloned.stop = stop;
        cloned.is_stage = true;
        cloned
    }
}

fn iteration_range(source: &For, stage: Stage, depth: i64, requires_epilog: bool) -> (Bound, Bound) {
    match stage {
        Stage::Prolog => (Bound::Const(0), Bound::Const(depth - 1)),
        Stage::Main => {
            let stop = if requires_epilog {
                source.stop.minus(1)
            } else {
                source.stop.clone()
            };
            (source.start.clone(), stop)
        }
        Stage::Epilog => (source.stop.minus(depth - 1), source.stop.clone()),
        Stage::CircularInitProlog => (Bound::Const(depth - 1), Bound::Const(depth)),
    }
}

/// Whether a buffered load's write ends up in shared memory: this is what forces an Epilog stage
/// to exist (shared-memory writes need the trailing iterations to drain without a predicate
/// guard; global-memory targets can rely on natural predication instead).
pub fn requires_epilog(fusion: &ir::Fusion, loads: &[TensorViewId]) -> bool {
    loads
        .iter()
        .any(|&tv| fusion.tensor_view(tv).memory_type == ir::MemoryType::Shared)
}

fn clone_body(
    body: &[Stmt],
    loads: &[TensorViewId],
    stage: Stage,
    peeled: bool,
    loop_axis: ir::IterDomainId,
    info: &DoubleBufferInfo,
    graphs: &IterDomainGraphs,
    fusion: &ir::Fusion,
) -> Vec<Stmt> {
    match stage {
        Stage::Prolog => body
            .iter()
            .filter_map(|s| filter_prolog_like(s, loads, keep_in_prolog))
            .collect(),
        Stage::Main => body
            .iter()
            .filter(|s| !skip_in_main(s, loads, peeled, loop_axis, info, graphs, fusion))
            .cloned()
            .collect(),
        Stage::Epilog => body
            .iter()
            .filter_map(|s| drop_buffered_loads(s, loads))
            .collect(),
        Stage::CircularInitProlog => body
            .iter()
            .filter_map(|s| filter_prolog_like(s, loads, keep_in_circular_init_prolog))
            .collect(),
    }
}

fn is_buffered_load(stmt: &Stmt, loads: &[TensorViewId]) -> bool {
    matches!(stmt, Stmt::Load { output_tv, .. } if loads.contains(output_tv))
}

/// Epilog's "keep everything except the annotated loads" rule, recursing into `IfThenElse` arms
/// the same way `filter_prolog_like` does, so a predicate-guarded buffered load does not survive
/// into the Epilog (which must not reissue it). Drops the conditional itself once both of its
/// filtered arms are empty.
fn drop_buffered_loads(stmt: &Stmt, loads: &[TensorViewId]) -> Option<Stmt> {
    match stmt {
        Stmt::IfThenElse {
            cond,
            then_body,
            else_body,
        } => {
            let then_body: Vec<Stmt> = then_body
                .iter()
                .filter_map(|s| drop_buffered_loads(s, loads))
                .collect();
            let else_body: Vec<Stmt> = else_body
                .iter()
                .filter_map(|s| drop_buffered_loads(s, loads))
                .collect();
            if then_body.is_empty() && else_body.is_empty() {
                None
            } else {
                Some(Stmt::IfThenElse {
                    cond: cond.clone(),
                    then_body,
                    else_body,
                })
            }
        }
        _ if is_buffered_load(stmt, loads) => None,
        _ => Some(stmt.clone()),
    }
}

/// Shared shape of the Prolog/CircularInitProlog stage filters: both keep (and possibly rebuild)
/// only a subset of leaf statements, but still need to recurse into `IfThenElse` arms (a
/// predicate-guarded buffered load is still a buffered load) rather than drop the block whole.
/// Drops an `IfThenElse` entirely once both of its filtered arms are empty.
fn filter_prolog_like(
    stmt: &Stmt,
    loads: &[TensorViewId],
    keep_leaf: fn(&Stmt, &[TensorViewId]) -> Option<Stmt>,
) -> Option<Stmt> {
    match stmt {
        Stmt::IfThenElse {
            cond,
            then_body,
            else_body,
        } => {
            let then_body: Vec<Stmt> = then_body
                .iter()
                .filter_map(|s| filter_prolog_like(s, loads, keep_leaf))
                .collect();
            let else_body: Vec<Stmt> = else_body
                .iter()
                .filter_map(|s| filter_prolog_like(s, loads, keep_leaf))
                .collect();
            if then_body.is_empty() && else_body.is_empty() {
                None
            } else {
                Some(Stmt::IfThenElse {
                    cond: cond.clone(),
                    then_body,
                    else_body,
                })
            }
        }
        _ => keep_leaf(stmt, loads),
    }
}

/// Prolog's keep rule. A kept `Load` whose op supports inline predication is rebuilt as a fresh
/// `Stmt::Load` with that support turned off, decoupling the Prolog's copy from the source loop's
/// inline-predicated codegen path (the external emitter then owns wrapping it in its own explicit
/// guard, the same way it owns any other `IfThenElse`'s `cond`).
fn keep_in_prolog(stmt: &Stmt, loads: &[TensorViewId]) -> Option<Stmt> {
    match stmt {
        Stmt::Load {
            op,
            output_tv,
            is_cp_async,
            supports_inline_predicate,
        } => {
            if !loads.contains(output_tv) {
                return None;
            }
            if *supports_inline_predicate {
                Some(Stmt::Load {
                    op: *op,
                    output_tv: *output_tv,
                    is_cp_async: *is_cp_async,
                    supports_inline_predicate: false,
                })
            } else {
                Some(stmt.clone())
            }
        }
        Stmt::AddressCompute(AddressComputeKind::DoubleBufferUpdate { .. }, tv) if loads.contains(tv) => {
            Some(stmt.clone())
        }
        Stmt::AddressCompute(AddressComputeKind::GmemIncrement, _) => Some(stmt.clone()),
        _ => None,
    }
}

/// Main keeps everything, except a `cp.async` load that predicate peeling already made redundant:
/// the buffered tensor's own initial fill, issued once more by the Prolog/CircularInitProlog, does
/// not need to be reissued on the loop's peeled final pass — but only if every one of the tensor's
/// axes inward of its double-buffer axis is either thread-parallel or a compile-time constant
/// extent; a non-constant serial inner axis means the fill still varies within the loop and must
/// not be dropped.
fn skip_in_main(
    stmt: &Stmt,
    loads: &[TensorViewId],
    peeled: bool,
    loop_axis: ir::IterDomainId,
    info: &DoubleBufferInfo,
    graphs: &IterDomainGraphs,
    fusion: &ir::Fusion,
) -> bool {
    if !peeled {
        return false;
    }
    match stmt {
        Stmt::Load {
            output_tv,
            is_cp_async: true,
            ..
        } if loads.contains(output_tv) => {
            let axis = match info.axis_of(*output_tv) {
                Some(a) => a,
                None => return false,
            };
            if !graphs
                .graph(crate::iter_domain_graphs::MappingMode::Loop)
                .are_mapped(axis, loop_axis)
            {
                return false;
            }
            inner_axes_are_parallel_or_const(*output_tv, axis, fusion)
        }
        _ => false,
    }
}

/// Whether every axis of `tv` inward of `axis` (its double-buffer axis) is either thread/block
/// parallel or has a compile-time constant extent, per [4.5]'s fourth `skip_in_main` condition.
fn inner_axes_are_parallel_or_const(
    tv: TensorViewId,
    axis: ir::IterDomainId,
    fusion: &ir::Fusion,
) -> bool {
    let axes = &fusion.tensor_view(tv).axes;
    let pos = match axes.iter().position(|&a| a == axis) {
        Some(p) => p,
        None => return false,
    };
    axes[pos + 1..].iter().all(|&inner| {
        let d = fusion.iter_domain(inner);
        d.parallel_type.is_thread_parallel() || matches!(d.extent, ir::Extent::Const(_))
    })
}

fn keep_in_circular_init_prolog(stmt: &Stmt, loads: &[TensorViewId]) -> Option<Stmt> {
    match stmt {
        Stmt::ScalarFill(tv) if loads.contains(tv) => Some(stmt.clone()),
        Stmt::AddressCompute(AddressComputeKind::GmemIncrement, _) => Some(stmt.clone()),
        _ => None,
    }
}

/// Appends a `DoubleBufferUpdate` address-compute statement for every buffered load with a
/// registered read-switch register, parameterised by its per-stage allocation size and stage
/// depth (materialising the rotating read offset into a uniform register).
fn insert_read_switches(
    mut body: Vec<Stmt>,
    loads: &[TensorViewId],
    info: &DoubleBufferInfo,
    stage_depth: u32,
) -> Vec<Stmt> {
    for &tv in loads {
        if info.read_switch_index(tv).is_some() {
            let switch_size_in_bytes = info.original_alloc_size(tv).unwrap_or(0) as u32;
            body.push(Stmt::AddressCompute(
                AddressComputeKind::DoubleBufferUpdate {
                    switch_size_in_bytes,
                    stage_depth,
                },
                tv,
            ));
        }
    }
    body
}

/// Moves every `GmemIncrement` (possibly the sole statement of a nested `For`) to the front of
/// the body, to compensate for the decrement the `CircularInitProlog` has already applied.
fn hoist_gmem_increments(body: Vec<Stmt>) -> Vec<Stmt> {
    let (incs, rest): (Vec<Stmt>, Vec<Stmt>) = body.into_iter().partition(is_gmem_increment);
    incs.into_iter().chain(rest).collect()
}

fn is_gmem_increment(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::AddressCompute(AddressComputeKind::GmemIncrement, _) => true,
        Stmt::Nested(inner) if inner.body.len() == 1 => is_gmem_increment(&inner.body[0]),
        _ => false,
    }
}
