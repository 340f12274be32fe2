//! Orchestrates the double-buffer rewrite: walks a lowered loop nest inner-to-outer, replacing
//! each annotated `For` loop with its Prolog/CircularInitProlog/Main/Epilog sequence and the
//! synchronization the annotated loads require.
use super::cloner::{requires_epilog, DoubleBufferLoopCloner, Stage};
use super::info::DoubleBufferInfo;
use crate::context::GpuLowerContext;
use crate::error::Error;
use crate::ir::TensorViewId;
use crate::iter_domain_graphs::IterDomainGraphs;
use crate::kernel_ir::{For, Stmt};
use log::debug;

pub struct DoubleBufferInserter;

impl DoubleBufferInserter {
    /// Rewrites every double-buffered loop reachable from `body`, inner-to-outer.
    pub fn run(
        body: &mut Vec<Stmt>,
        info: &DoubleBufferInfo,
        graphs: &IterDomainGraphs,
        ctx: &GpuLowerContext,
    ) -> Result<(), Error> {
        for stmt in body.iter_mut() {
            match stmt {
                Stmt::Nested(inner) => Self::run(&mut inner.body, info, graphs, ctx)?,
                Stmt::IfThenElse {
                    then_body,
                    else_body,
                    ..
                } => {
                    Self::run(then_body, info, graphs, ctx)?;
                    Self::run(else_body, info, graphs, ctx)?;
                }
                _ => {}
            }
        }

        let mut rewritten = Vec::with_capacity(body.len());
        for stmt in body.drain(..) {
            match stmt {
                Stmt::Nested(for_loop) if graphs_has_buffer(info, graphs, &for_loop) => {
                    rewritten.extend(Self::rewrite_loop(for_loop, info, graphs, ctx)?);
                }
                other => rewritten.push(other),
            }
        }
        *body = rewritten;
        Ok(())
    }

    fn rewrite_loop(
        for_loop: For,
        info: &DoubleBufferInfo,
        graphs: &IterDomainGraphs,
        ctx: &GpuLowerContext,
    ) -> Result<Vec<Stmt>, Error> {
        let loads = info.loads_on_axis(graphs, for_loop.axis);
        if loads.is_empty() {
            return Ok(vec![Stmt::Nested(for_loop)]);
        }
        if !for_loop.is_supported_shape() {
            return Err(Error::UnsupportedLoopShape {
                for_loop: for_loop.to_string(),
                reason: "start must be 0, step must be 1, and the loop must not be unrolled"
                    .to_string(),
            });
        }
        debug!(
            "inserting double-buffer stages for loop over {} ({} loads)",
            for_loop.axis,
            loads.len()
        );
        let depth = crate::unwrap!(
            info.stage_depth_of_axis(graphs, for_loop.axis),
            "rewriting a double-buffer loop with no recorded stage depth"
        );
        let needs_epilog = requires_epilog(ctx.fusion(), &loads);
        let peeled = ctx.should_peel_loop(&for_loop);
        let any_cp_async = any_cp_async_load(&for_loop.body, &loads);
        let needs_raw_sync = loads.iter().any(|&tv| ctx.needs_raw_sync(tv));
        let needs_circular_init =
            peeled && loads.iter().any(|&tv| ctx.fusion().tensor_view(tv).memory_type == crate::ir::MemoryType::Shared);

        let mut out = Vec::new();

        // Step 1: allocate read-switch scalars for loads that need one.
        for &tv in &loads {
            if info.read_switch_index(tv).is_some() {
                out.push(Stmt::ScalarFill(tv));
            }
        }

        // Step 2 (+ step 4's commit, appended to the Prolog body before insertion).
        let mut prolog = DoubleBufferLoopCloner::clone_stage(
            &for_loop,
            &loads,
            Stage::Prolog,
            needs_epilog,
            info,
            graphs,
            ctx.fusion(),
            peeled,
        );
        if any_cp_async {
            prolog.body.push(Stmt::CpAsyncCommit);
        }
        out.push(Stmt::Nested(prolog));

        // Step 3.
        if needs_circular_init {
            let circular_init = DoubleBufferLoopCloner::clone_stage(
                &for_loop,
                &loads,
                Stage::CircularInitProlog,
                needs_epilog,
                info,
                graphs,
                ctx.fusion(),
                peeled,
            );
            out.push(Stmt::Nested(circular_init));
        }

        // Step 4's wait, before L.
        if any_cp_async {
            out.push(Stmt::CpAsyncWait(depth.saturating_sub(2)));
        }

        // Step 5.
        if needs_raw_sync {
            out.push(Stmt::BlockSync { war_hazard: false });
        }

        // Step 6.
        let mut main = DoubleBufferLoopCloner::clone_stage(
            &for_loop,
            &loads,
            Stage::Main,
            needs_epilog,
            info,
            graphs,
            ctx.fusion(),
            peeled,
        );

        // Step 7.
        if any_cp_async {
            insert_main_commit_and_wait(&mut main.body, &loads, depth);
        }
        out.push(Stmt::Nested(main));

        // Step 8.
        if needs_epilog {
            let epilog = DoubleBufferLoopCloner::clone_stage(
                &for_loop,
                &loads,
                Stage::Epilog,
                needs_epilog,
                info,
                graphs,
                ctx.fusion(),
                peeled,
            );
            out.push(Stmt::Nested(epilog));
        }

        Ok(out)
    }
}

/// A loop is an eligible double-buffer candidate iff its axis maps to a buffered stage depth and
/// it was not itself produced by a previous run of this pass: the Prolog/Main/Epilog/
/// CircularInitProlog clones retain the source loop's axis, so without the `is_stage` check a
/// second pass over this pass's own output would re-split them.
fn graphs_has_buffer(info: &DoubleBufferInfo, graphs: &IterDomainGraphs, for_loop: &For) -> bool {
    !for_loop.is_stage && info.is_concrete_double_buffer_loop(graphs, for_loop.axis)
}

fn any_cp_async_load(body: &[Stmt], loads: &[TensorViewId]) -> bool {
    body.iter().any(|s| match s {
        Stmt::Load {
            output_tv,
            is_cp_async: true,
            ..
        } => loads.contains(output_tv),
        Stmt::Nested(inner) => any_cp_async_load(&inner.body, loads),
        Stmt::IfThenElse {
            then_body,
            else_body,
            ..
        } => any_cp_async_load(then_body, loads) || any_cp_async_load(else_body, loads),
        _ => false,
    })
}

/// Finds the last statement that (transitively) contains a buffered load, inserts
/// `CpAsyncCommit` immediately after it, then searches backwards from the commit for an existing
/// `BlockSync` to place `CpAsyncWait(stage_depth - 2)` immediately before (or appends the wait at
/// the end of the body if no sync is found).
fn insert_main_commit_and_wait(body: &mut Vec<Stmt>, loads: &[TensorViewId], depth: u32) {
    let last_load_idx = body.iter().rposition(|s| s.contains_load_of(loads));
    let commit_idx = match last_load_idx {
        Some(i) => i + 1,
        None => return,
    };
    body.insert(commit_idx, Stmt::CpAsyncCommit);

    let sync_idx = body[..commit_idx].iter().rposition(|s| s.is_block_sync());
    let wait = Stmt::CpAsyncWait(depth.saturating_sub(2));
    match sync_idx {
        Some(i) => body.insert(i, wait),
        None => body.push(wait),
    }
}

