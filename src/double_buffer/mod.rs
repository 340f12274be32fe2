//! The double-buffer loop lowering pass: inspects a fusion's buffered tensors, then rewrites a
//! lowered loop nest to interleave asynchronous loads with compute.
pub mod cloner;
pub mod info;
pub mod inserter;
pub mod inspector;

pub use self::cloner::{DoubleBufferLoopCloner, Stage};
pub use self::info::DoubleBufferInfo;
pub use self::inserter::DoubleBufferInserter;
pub use self::inspector::{DoubleBufferFusionInspector, DoubleBufferLoopNestInspector};

use crate::context::GpuLowerContext;
use crate::error::Error;
use crate::kernel_ir::Stmt;
use log::info;

/// Runs the full pass: inspect `fusion`'s buffered tensors, confirm every one of them is
/// actually enclosed by some loop in `body`, then rewrite `body` in place.
pub fn run(body: &mut Vec<Stmt>, ctx: &GpuLowerContext) -> Result<DoubleBufferInfo, Error> {
    info!("running double-buffer inspection");
    let double_buffer_info = DoubleBufferFusionInspector::run(ctx.fusion(), ctx.graphs())?;

    let missing = DoubleBufferLoopNestInspector::missing_loops(body, &double_buffer_info, ctx.graphs());
    if let Some(tv) = missing.first() {
        return Err(Error::MissingDoubleBufferLoop {
            tv: ctx.fusion().tensor_view(*tv).name.clone(),
        });
    }

    info!("running double-buffer loop insertion");
    DoubleBufferInserter::run(body, &double_buffer_info, ctx.graphs(), ctx)?;
    Ok(double_buffer_info)
}
