//! End-to-end scenarios driving the full pipeline (`IterDomainGraphs::build` ->
//! `DoubleBufferFusionInspector` -> `double_buffer::run`) the way a host compiler would, matching
//! the worked examples of the double-buffer lowering pass.
use iterdom::context::GpuLowerContext;
use iterdom::double_buffer::{self, DoubleBufferFusionInspector};
use iterdom::error::Error;
use iterdom::ir::{
    BufferingKind, Extent, ExprKind, Fusion, MemoryType, Operand, ParallelType, TensorView,
    TensorViewId,
};
use iterdom::iter_domain_graphs::{BuildOptions, IterDomainGraphs};
use iterdom::kernel_ir::{Bound, For, LoadStoreOpId, Stmt};

fn add_global_to_x_copy(
    fusion: &mut Fusion,
    consumer_memory: MemoryType,
    extent: u64,
    compute_at_position: usize,
    buffering: BufferingKind,
    is_cp_async: bool,
) -> (TensorViewId, TensorViewId, iterdom::ir::IterDomainId) {
    let p0 = fusion.add_iter_domain(Extent::Const(extent));
    let c0 = fusion.add_iter_domain(Extent::Const(extent));

    let mut producer = TensorView::new(fusion.next_tensor_view_id(), "producer", MemoryType::Global);
    producer.axes = vec![p0];
    let producer_id = fusion.add_tensor_view(producer);

    let mut consumer = TensorView::new(fusion.next_tensor_view_id(), "buffered", consumer_memory);
    consumer.axes = vec![c0];
    consumer.compute_at_position = compute_at_position;
    consumer.buffering = buffering;
    let consumer_id = fusion.add_tensor_view(consumer);

    let expr = fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(producer_id)],
        vec![Operand::Tv(consumer_id)],
    );
    fusion.tensor_view_mut(consumer_id).definition = Some(expr);
    (producer_id, consumer_id, c0)
}

/// Scenario 1: simple double buffer (d=2), Global -> Shared, no `cp.async`. The consumer is
/// marked as needing a thread RAW sync (simulating the external sync-map collaborator), which is
/// what actually produces the `BlockSync` here, since nothing else would.
#[test]
fn simple_double_buffer_global_to_shared() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) =
        add_global_to_x_copy(&mut fusion, MemoryType::Shared, 8, 1, BufferingKind::Double, false);
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs).with_raw_sync(consumer);

    let mut body = vec![Stmt::Nested(For::new(
        axis,
        Bound::Const(0),
        Bound::Const(8),
        vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer,
            is_cp_async: false,
            supports_inline_predicate: false,
        }],
    ))];

    let info = double_buffer::run(&mut body, &ctx).unwrap();
    assert_eq!(info.axis_of(consumer), Some(axis));
    assert_eq!(info.stage_depth_of_axis(&graphs, axis), Some(2));

    assert_eq!(body.len(), 4, "prolog, block sync, main, epilog");
    match &body[0] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(0));
            assert_eq!(f.stop, Bound::Const(1));
        }
        other => panic!("expected prolog, got {:?}", other),
    }
    assert!(matches!(body[1], Stmt::BlockSync { war_hazard: false }));
    match &body[2] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(0));
            assert_eq!(f.stop, Bound::Const(7));
        }
        other => panic!("expected main, got {:?}", other),
    }
    match &body[3] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(7));
            assert_eq!(f.stop, Bound::Const(8));
        }
        other => panic!("expected epilog, got {:?}", other),
    }
}

/// Scenario 2: circular buffer (d=4), `cp.async`, Global -> Shared, no predicate peeling.
#[test]
fn circular_buffer_with_cp_async() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) = add_global_to_x_copy(
        &mut fusion,
        MemoryType::Shared,
        16,
        1,
        BufferingKind::Circular(4),
        true,
    );
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs).with_raw_sync(consumer);

    // The loop body already contains a `BlockSync` after the load, as the external WAR-sync
    // pass would have left it; the commit/wait insertion must not disturb it.
    let mut body = vec![Stmt::Nested(For::new(
        axis,
        Bound::Const(0),
        Bound::Const(16),
        vec![
            Stmt::Load {
                op: LoadStoreOpId(0),
                output_tv: consumer,
                is_cp_async: true,
                supports_inline_predicate: false,
            },
            Stmt::BlockSync { war_hazard: true },
        ],
    ))];

    let info = double_buffer::run(&mut body, &ctx).unwrap();
    assert_eq!(info.stage_depth_of_axis(&graphs, axis), Some(4));

    // prolog, wait, block sync, main, epilog -- no circular-init prolog since nothing is peeled.
    assert_eq!(body.len(), 5);
    match &body[0] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(0));
            assert_eq!(f.stop, Bound::Const(3));
            assert!(matches!(f.body.last(), Some(Stmt::CpAsyncCommit)));
        }
        other => panic!("expected prolog, got {:?}", other),
    }
    assert!(matches!(body[1], Stmt::CpAsyncWait(2)));
    assert!(matches!(body[2], Stmt::BlockSync { war_hazard: false }));
    match &body[3] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(0));
            assert_eq!(f.stop, Bound::Const(15));
            // Commit immediately after the load, then the existing BlockSync, then the wait
            // appended at the end since no sync precedes the commit.
            assert!(matches!(f.body[0], Stmt::Load { .. }));
            assert!(matches!(f.body[1], Stmt::CpAsyncCommit));
            assert!(matches!(f.body[2], Stmt::BlockSync { war_hazard: true }));
            assert!(matches!(f.body[3], Stmt::CpAsyncWait(2)));
        }
        other => panic!("expected main, got {:?}", other),
    }
    match &body[4] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(13));
            assert_eq!(f.stop, Bound::Const(16));
            assert!(f.body.iter().all(|s| !matches!(s, Stmt::Load { .. })));
        }
        other => panic!("expected epilog, got {:?}", other),
    }
}

/// Scenario 3: double buffer, Global -> Local. No epilog (local writes don't need draining), no
/// sync, no commit/wait.
#[test]
fn double_buffer_global_to_local_has_no_epilog() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) =
        add_global_to_x_copy(&mut fusion, MemoryType::Local, 10, 1, BufferingKind::Double, false);
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs);

    let mut body = vec![Stmt::Nested(For::new(
        axis,
        Bound::Const(0),
        Bound::Const(10),
        vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer,
            is_cp_async: false,
            supports_inline_predicate: false,
        }],
    ))];

    double_buffer::run(&mut body, &ctx).unwrap();

    assert_eq!(body.len(), 2, "prolog and main only");
    match &body[0] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(0));
            assert_eq!(f.stop, Bound::Const(1));
        }
        other => panic!("expected prolog, got {:?}", other),
    }
    match &body[1] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(0));
            assert_eq!(f.stop, Bound::Const(10), "main keeps the original stop");
        }
        other => panic!("expected main, got {:?}", other),
    }
}

/// Scenario 4: two tensors whose double-buffer axis maps to the same LOOP-concrete group but
/// request different stage depths.
#[test]
fn conflicting_stage_depths_on_the_same_loop_axis_is_an_error() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let p0 = fusion.add_iter_domain(Extent::Const(8));
    let c0 = fusion.add_iter_domain(Extent::Const(8));

    let mut producer = TensorView::new(fusion.next_tensor_view_id(), "p", MemoryType::Global);
    producer.axes = vec![p0];
    let producer_id = fusion.add_tensor_view(producer);

    let mut tv1 = TensorView::new(fusion.next_tensor_view_id(), "double", MemoryType::Shared);
    tv1.axes = vec![c0];
    tv1.compute_at_position = 1;
    tv1.buffering = BufferingKind::Double;
    let tv1_id = fusion.add_tensor_view(tv1);
    let e1 = fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: false,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(producer_id)],
        vec![Operand::Tv(tv1_id)],
    );
    fusion.tensor_view_mut(tv1_id).definition = Some(e1);

    // Reuses the same axis `c0`: both tensors' double-buffer axis maps to the same LOOP group.
    let mut tv2 = TensorView::new(fusion.next_tensor_view_id(), "circular", MemoryType::Shared);
    tv2.axes = vec![c0];
    tv2.compute_at_position = 1;
    tv2.buffering = BufferingKind::Circular(3);
    let tv2_id = fusion.add_tensor_view(tv2);
    let e2 = fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: false,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(producer_id)],
        vec![Operand::Tv(tv2_id)],
    );
    fusion.tensor_view_mut(tv2_id).definition = Some(e2);

    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let err = DoubleBufferFusionInspector::run(&fusion, &graphs).unwrap_err();
    assert!(matches!(err, Error::StageDepthConflict { .. }));
}

/// Scenario 5: no valid double-buffer axis exists once `Unroll` caps the scan and a broadcast
/// axis disqualifies the only remaining candidate.
#[test]
fn no_valid_axis_is_an_error() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let a0 = fusion.add_iter_domain(Extent::Const(4));
    let a1 = fusion.add_iter_domain(Extent::Const(4));
    let a2 = fusion.add_iter_domain(Extent::Const(4));
    let a3 = fusion.add_iter_domain(Extent::Const(4));
    fusion.iter_domain_mut(a0).is_broadcast = true;
    fusion.iter_domain_mut(a1).parallel_type = ParallelType::Unroll;

    let mut producer = TensorView::new(fusion.next_tensor_view_id(), "p", MemoryType::Global);
    producer.axes = vec![a0, a1, a2, a3];
    let producer_id = fusion.add_tensor_view(producer);

    let mut tv = TensorView::new(fusion.next_tensor_view_id(), "buf", MemoryType::Shared);
    tv.axes = vec![a0, a1, a2, a3];
    tv.compute_at_position = 3;
    tv.buffering = BufferingKind::Double;
    let tv_id = fusion.add_tensor_view(tv);
    let e = fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: false,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(producer_id)],
        vec![Operand::Tv(tv_id)],
    );
    fusion.tensor_view_mut(tv_id).definition = Some(e);

    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let err = DoubleBufferFusionInspector::run(&fusion, &graphs).unwrap_err();
    assert!(matches!(err, Error::AxisNotFound { .. }));
}

/// Running the pass a second time over its own output must be a no-op: the cloned stages keep
/// the buffered axis, so without the `is_stage` marker on `kernel_ir::For` a second pass would
/// recognise and re-split them.
#[test]
fn running_the_pass_twice_is_idempotent() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) =
        add_global_to_x_copy(&mut fusion, MemoryType::Shared, 8, 1, BufferingKind::Double, false);
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs).with_raw_sync(consumer);

    let mut body = vec![Stmt::Nested(For::new(
        axis,
        Bound::Const(0),
        Bound::Const(8),
        vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer,
            is_cp_async: false,
            supports_inline_predicate: false,
        }],
    ))];

    double_buffer::run(&mut body, &ctx).unwrap();
    let after_first = format!("{:?}", body);
    double_buffer::run(&mut body, &ctx).unwrap();
    let after_second = format!("{:?}", body);
    assert_eq!(after_first, after_second);
}

/// Scenario 6: a `TensorView` whose own two axes end up EXACT-mapped, indirectly through a
/// shared upstream axis, is rejected as a self mapping, unless explicitly allowed.
#[test]
fn self_mapping_is_detected_and_rejected_by_default() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();

    let z = fusion.add_iter_domain(Extent::Const(4));
    let mut dummy = TensorView::new(fusion.next_tensor_view_id(), "dummy", MemoryType::Shared);
    dummy.axes = vec![z];
    let dummy_id = fusion.add_tensor_view(dummy);

    let x = fusion.add_iter_domain(Extent::Const(4));
    let mut feed_x = TensorView::new(fusion.next_tensor_view_id(), "feed_x", MemoryType::Global);
    feed_x.axes = vec![x];
    let feed_x_id = fusion.add_tensor_view(feed_x);
    fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: false,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(feed_x_id)],
        vec![Operand::Tv(dummy_id)],
    );

    let y = fusion.add_iter_domain(Extent::Const(4));
    let mut feed_y = TensorView::new(fusion.next_tensor_view_id(), "feed_y", MemoryType::Global);
    feed_y.axes = vec![y];
    let feed_y_id = fusion.add_tensor_view(feed_y);
    fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: false,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(feed_y_id)],
        vec![Operand::Tv(dummy_id)],
    );

    // `x` and `y` both EXACT-map to `z` above, hence to each other. `target` never goes through
    // a `LoadStoreOp` itself; it just happens to list both as its own axes.
    let mut target = TensorView::new(fusion.next_tensor_view_id(), "target", MemoryType::Shared);
    target.axes = vec![x, y];
    let target_id = fusion.add_tensor_view(target);

    let err = IterDomainGraphs::build(&mut fusion.clone(), BuildOptions::default()).unwrap_err();
    assert!(matches!(err, Error::SelfMapping { .. }));

    let graphs = IterDomainGraphs::build(
        &mut fusion,
        BuildOptions {
            allow_self_mapping: true,
        },
    )
    .unwrap();
    assert!(graphs.has_self_mapping());
    assert_eq!(graphs.self_mapping_info().unwrap().tv, target_id);
}

/// A tensor is validated and assigned a double-buffer axis, but the lowered nest handed to
/// `double_buffer::run` never actually contains a loop over that axis.
#[test]
fn missing_enclosing_loop_is_an_error() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) =
        add_global_to_x_copy(&mut fusion, MemoryType::Shared, 8, 1, BufferingKind::Double, false);
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs);
    let _ = axis;

    // An empty nest: `consumer` is a valid double-buffer annotation, but nothing in `body`
    // encloses it.
    let mut body: Vec<Stmt> = Vec::new();
    let err = double_buffer::run(&mut body, &ctx).unwrap_err();
    assert!(matches!(err, Error::MissingDoubleBufferLoop { .. }));
}

/// A loop whose start is not 0 is rejected before any stage cloning happens.
#[test]
fn unsupported_loop_shape_is_an_error() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) =
        add_global_to_x_copy(&mut fusion, MemoryType::Shared, 8, 1, BufferingKind::Double, false);
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs).with_raw_sync(consumer);

    let mut bad_loop = For::new(
        axis,
        Bound::Const(1),
        Bound::Const(8),
        vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer,
            is_cp_async: false,
            supports_inline_predicate: false,
        }],
    );
    bad_loop.start = Bound::Const(1);
    let mut body = vec![Stmt::Nested(bad_loop)];

    let err = double_buffer::run(&mut body, &ctx).unwrap_err();
    assert!(matches!(err, Error::UnsupportedLoopShape { .. }));
}

/// The buffered load sits behind a predicate-guarded block (a peeled loop's boundary-iteration
/// bounds check) rather than directly in the loop body. The nest inspector and inserter must both
/// walk into `IfThenElse` arms to find it, or this looks exactly like `MissingDoubleBufferLoop`.
#[test]
fn buffered_load_inside_an_if_then_else_is_still_found() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let (_producer, consumer, axis) =
        add_global_to_x_copy(&mut fusion, MemoryType::Shared, 8, 1, BufferingKind::Double, false);
    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs).with_raw_sync(consumer);

    let guarded_load = Stmt::IfThenElse {
        cond: "threadIdx.x < 8".to_string(),
        then_body: vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer,
            is_cp_async: false,
            supports_inline_predicate: false,
        }],
        else_body: vec![],
    };
    let mut body = vec![Stmt::Nested(For::new(
        axis,
        Bound::Const(0),
        Bound::Const(8),
        vec![guarded_load],
    ))];

    let info = double_buffer::run(&mut body, &ctx).unwrap();
    assert_eq!(info.axis_of(consumer), Some(axis));
    assert_eq!(body.len(), 4, "prolog, block sync, main, epilog");
}

/// A peeled loop whose buffered tensor's double-buffer axis is LOOP-mapped to the loop's own axis,
/// and whose sole inner axis is thread-parallel. The Main copy's `cp.async` init is redundant (the
/// CircularInitProlog already reissued it for the peeled tail) and must be dropped.
#[test]
fn peeled_loop_drops_redundant_cp_async_init_when_inner_axis_is_parallel() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let p0 = fusion.add_iter_domain(Extent::Const(16));
    let c0 = fusion.add_iter_domain(Extent::Const(16));
    let inner = fusion.add_iter_domain(Extent::Symbolic("threadIdx.x".to_string()));
    fusion.iter_domain_mut(inner).parallel_type = ParallelType::TidX;

    let mut producer = TensorView::new(fusion.next_tensor_view_id(), "producer", MemoryType::Global);
    producer.axes = vec![p0];
    let producer_id = fusion.add_tensor_view(producer);

    let mut consumer = TensorView::new(fusion.next_tensor_view_id(), "buffered", MemoryType::Shared);
    consumer.axes = vec![c0, inner];
    consumer.compute_at_position = 2;
    consumer.buffering = BufferingKind::Double;
    let consumer_id = fusion.add_tensor_view(consumer);
    let expr = fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: true,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(producer_id)],
        vec![Operand::Tv(consumer_id)],
    );
    fusion.tensor_view_mut(consumer_id).definition = Some(expr);

    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs)
        .with_raw_sync(consumer_id)
        .with_peeled_loop(c0);

    let mut body = vec![Stmt::Nested(For::new(
        c0,
        Bound::Const(0),
        Bound::Const(16),
        vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer_id,
            is_cp_async: true,
            supports_inline_predicate: false,
        }],
    ))];

    let info = double_buffer::run(&mut body, &ctx).unwrap();
    assert_eq!(info.axis_of(consumer_id), Some(c0));

    // prolog, circular-init prolog, wait, block sync, main, epilog.
    assert_eq!(body.len(), 6);
    match &body[1] {
        Stmt::Nested(f) => {
            assert_eq!(f.start, Bound::Const(1));
            assert_eq!(f.stop, Bound::Const(2));
        }
        other => panic!("expected circular-init prolog, got {:?}", other),
    }
    match &body[4] {
        Stmt::Nested(f) => assert!(
            f.body.is_empty(),
            "redundant cp.async init should have been dropped from Main, got {:?}",
            f.body
        ),
        other => panic!("expected main, got {:?}", other),
    }
}

/// Same peeled loop, but the buffered tensor's inner axis is a non-constant, non-parallel
/// broadcast axis. `skip_in_main`'s fourth condition must fail and the init must survive in Main,
/// since its value still varies within the loop.
#[test]
fn peeled_loop_keeps_cp_async_init_when_inner_axis_is_non_constant_serial() {
    let _ = env_logger::try_init();
    let mut fusion = Fusion::new();
    let p0 = fusion.add_iter_domain(Extent::Const(16));
    let c0 = fusion.add_iter_domain(Extent::Const(16));
    let inner = fusion.add_iter_domain(Extent::Symbolic("n".to_string()));
    fusion.iter_domain_mut(inner).is_broadcast = true;

    let mut producer = TensorView::new(fusion.next_tensor_view_id(), "producer", MemoryType::Global);
    producer.axes = vec![p0];
    let producer_id = fusion.add_tensor_view(producer);

    let mut consumer = TensorView::new(fusion.next_tensor_view_id(), "buffered", MemoryType::Shared);
    consumer.axes = vec![c0, inner];
    consumer.compute_at_position = 2;
    consumer.buffering = BufferingKind::Double;
    let consumer_id = fusion.add_tensor_view(consumer);
    let expr = fusion.add_expr(
        ExprKind::LoadStoreOp {
            is_cp_async: true,
            uses_ld_matrix: false,
            supports_inline_predicate: false,
        },
        vec![Operand::Tv(producer_id)],
        vec![Operand::Tv(consumer_id)],
    );
    fusion.tensor_view_mut(consumer_id).definition = Some(expr);

    let graphs = IterDomainGraphs::build(&mut fusion, BuildOptions::default()).unwrap();
    let ctx = GpuLowerContext::new(&fusion, &graphs)
        .with_raw_sync(consumer_id)
        .with_peeled_loop(c0);

    let mut body = vec![Stmt::Nested(For::new(
        c0,
        Bound::Const(0),
        Bound::Const(16),
        vec![Stmt::Load {
            op: LoadStoreOpId(0),
            output_tv: consumer_id,
            is_cp_async: true,
            supports_inline_predicate: false,
        }],
    ))];

    let info = double_buffer::run(&mut body, &ctx).unwrap();
    assert_eq!(info.axis_of(consumer_id), Some(c0));

    assert_eq!(body.len(), 6);
    match &body[4] {
        Stmt::Nested(f) => assert!(
            matches!(f.body.first(), Some(Stmt::Load { .. })),
            "non-constant inner axis must keep the init in Main, got {:?}",
            f.body
        ),
        other => panic!("expected main, got {:?}", other),
    }
}
