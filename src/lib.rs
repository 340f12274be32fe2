//! Iteration-domain equivalence reasoning and double-buffer loop lowering for a GPU-kernel
//! fusion compiler.
//!
//! The [`iter_domain_graphs`] module builds, for a `Fusion`, the four coexisting equivalence
//! relations over loop axes (`EXACT`/`ALMOST_EXACT`/`PERMISSIVE`/`LOOP`) that the rest of the
//! compiler uses to decide which axes share an iteration variable. The [`double_buffer`] module
//! consumes those graphs, together with a lowered loop nest and a [`context::GpuLowerContext`],
//! to rewrite annotated loops into their prologue/main/epilogue stages.
pub mod context;
pub mod disjoint_sets;
pub mod double_buffer;
pub mod error;
pub mod id_graph;
pub mod ir;
pub mod iter_domain_graphs;
pub mod kernel_ir;
pub mod utils;

pub use self::context::GpuLowerContext;
pub use self::double_buffer::{DoubleBufferInfo, DoubleBufferInserter};
pub use self::error::{Error, Result};
pub use self::id_graph::IdGraph;
pub use self::iter_domain_graphs::{IterDomainGraphs, MappingMode};
