//! Structured errors for the equivalence graph and double-buffer lowering pass.
use failure::Fail;

/// Failures raised while building the iteration-domain equivalence graph or while running the
/// double-buffer lowering pass.
///
/// Every variant is fatal: nothing in this pass retries, and a failure here means either a bug
/// in the compiler or an invalid user-provided schedule.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(
        display = "invalid double-buffer annotation on `{}`: {}",
        tv, reason
    )]
    InvalidAnnotation { tv: String, reason: String },

    #[fail(display = "valid double buffer axis not found on `{}`", tv)]
    AxisNotFound { tv: String },

    #[fail(
        display = "stage depth conflict on loop axis `{}`: `{}` wants depth {} but `{}` already requested depth {}",
        axis, tv, requested, first_tv, recorded
    )]
    StageDepthConflict {
        axis: String,
        tv: String,
        requested: u32,
        first_tv: String,
        recorded: u32,
    },

    #[fail(
        display = "parallel type conflict on loop group `{}`: both `{:?}` and `{:?}` are requested",
        group, first, second
    )]
    ParallelTypeConflict {
        group: String,
        first: String,
        second: String,
    },

    #[fail(
        display = "self mapping detected on `{}`: axes `{}` and `{}` are mapped together under {}",
        tv, a, b, mode
    )]
    SelfMapping {
        tv: String,
        a: String,
        b: String,
        mode: String,
    },

    #[fail(
        display = "buffered load on `{}` has no enclosing loop mapped to its double buffer axis",
        tv
    )]
    MissingDoubleBufferLoop { tv: String },

    #[fail(display = "unsupported loop shape for `{}`: {}", for_loop, reason)]
    UnsupportedLoopShape { for_loop: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
