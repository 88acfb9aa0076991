//! Trace optimization passes.
//!
//! - `rewrite`: peephole and strength reduction over one trace
//! - `vectorize`: loop unrolling and SIMD packing
//! - `pipeline`: pass ordering, fallback and statistics
//!
//! The supporting modules hold the shared forward-pass state
//! (`optimizer`), integer bounds (`intbound`), pointer facts (`info`) and
//! the pure-operation cache (`pure`).

pub mod error;
pub mod info;
pub mod intbound;
pub mod optimizer;
pub mod pipeline;
pub mod pure;
pub mod rewrite;
pub mod vectorize;

use crate::cpu::Cpu;
use crate::ir::Trace;

pub use error::{NotVectorizable, OptError, OptResult};
pub use info::{Nullness, PtrInfo};
pub use intbound::IntBound;
pub use optimizer::{fold_constant, Optimizer};
pub use pipeline::{
    optimize, optimize_full, optimize_minimal, OptPipeline, PassPhase, PassStat, PipelineConfig,
    PipelineStats,
};
pub use pure::PureCache;
pub use rewrite::{OptRewrite, Rewrite, RewriteStats};
pub use vectorize::{Vectorize, VectorizeConfig, VectorizeStats, VectorizingOptimizer};

/// A pass over a whole trace.
pub trait TracePass {
    /// Name used in statistics.
    fn name(&self) -> &'static str;

    /// Run the pass, replacing `trace` with its output. Returns whether
    /// anything changed.
    fn run(&mut self, cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<bool>;
}
