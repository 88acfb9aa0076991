//! Loop Vectorization Pass
//!
//! Superword-level parallelism over unrolled loop traces:
//!
//! - **Dependency Graph**: data, memory, guard and side-effect ordering
//! - **Guard Relaxation**: loop-exit guards move in front of the body
//! - **Packing**: isomorphic independent operations grouped into packs
//! - **Scheduling**: packs lowered to vector operations in one pass
//!
//! # Module Structure
//!
//! - `memref`: Index variables and memory references
//! - `dependency`: Dependency graph construction and queries
//! - `schedule`: Priority list scheduler
//! - `packset`: Pack types, packs and the pack set
//! - `vecops`: Vector operation lowering, packing and unpacking
//! - `optimizer`: Stage driver
//!
//! # Example
//!
//! ```text
//! Before (int32, 16 byte registers, unrolled 4x):
//!   i1 = getarrayitem_raw(a, i0)  ...  i4 = getarrayitem_raw(a, i3')
//!   ...
//!
//! After:
//!   v1[4xi32] = vec_getarrayitem_raw(a, i0)
//!   v2[4xi32] = vec_getarrayitem_raw(b, i0)
//!   v3[4xi32] = vec_int_add(v1, v2)
//!   vec_setarrayitem_raw(c, i0, v3)
//! ```

pub mod dependency;
pub mod memref;
pub mod optimizer;
pub mod packset;
pub mod schedule;
pub mod vecops;

use tracing::debug;

use crate::cpu::Cpu;
use crate::ir::Trace;
use crate::opt::error::{OptError, OptResult};
use crate::opt::TracePass;

pub use dependency::{DependencyGraph, Edge, EdgeKind, Node, NodeId};
pub use memref::{compute_index_vars, IndexVar, MemoryRef};
pub use optimizer::VectorizingOptimizer;
pub use packset::{Pack, PackKind, PackSet, PackType};
pub use schedule::{Scheduled, Scheduler};
pub use vecops::{vector_shape, VecScheduleData, VecShape};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the vectorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorizeConfig {
    /// Run the vectorizer at all.
    pub enabled: bool,
    /// Loops needing more extra body copies than this are rejected.
    pub max_unroll: usize,
    /// Guards with more dependency paths to the early exit stay in place.
    pub max_paths_per_guard: usize,
    /// Drop relaxed index guards implied by a stronger one.
    pub collapse_index_guards: bool,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_unroll: 16,
            max_paths_per_guard: 256,
            collapse_index_guards: true,
        }
    }
}

impl VectorizeConfig {
    /// Vectorizer turned off; every loop is rejected.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Wide registers and deep guard analysis.
    pub fn aggressive() -> Self {
        Self {
            enabled: true,
            max_unroll: 64,
            max_paths_per_guard: 4096,
            collapse_index_guards: true,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from the vectorizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorizeStats {
    /// Number of loops analyzed.
    pub loops_analyzed: usize,
    /// Number of loops successfully vectorized.
    pub loops_vectorized: usize,
    /// Number of loops left scalar.
    pub loops_rejected: usize,
    pub packs_formed: usize,
    /// Vector operations emitted, pack and unpack included.
    pub vector_ops_created: usize,
    /// Lane extractions for scalar users.
    pub unpacks_inserted: usize,
    pub guards_relaxed: usize,
    pub guards_collapsed: usize,
}

impl VectorizeStats {
    /// Merge statistics from another instance.
    pub fn merge(&mut self, other: &VectorizeStats) {
        self.loops_analyzed += other.loops_analyzed;
        self.loops_vectorized += other.loops_vectorized;
        self.loops_rejected += other.loops_rejected;
        self.packs_formed += other.packs_formed;
        self.vector_ops_created += other.vector_ops_created;
        self.unpacks_inserted += other.unpacks_inserted;
        self.guards_relaxed += other.guards_relaxed;
        self.guards_collapsed += other.guards_collapsed;
    }

    /// Get the vectorization success rate.
    pub fn success_rate(&self) -> f32 {
        if self.loops_analyzed == 0 {
            0.0
        } else {
            self.loops_vectorized as f32 / self.loops_analyzed as f32
        }
    }
}

// =============================================================================
// Main Pass
// =============================================================================

/// Loop vectorization pass.
///
/// Loops that cannot be vectorized are left exactly as they were; the
/// rejection only shows up in the statistics.
pub struct Vectorize {
    config: VectorizeConfig,
    stats: VectorizeStats,
}

impl Vectorize {
    /// Create vectorization pass with default configuration.
    pub fn new() -> Self {
        Self::with_config(VectorizeConfig::default())
    }

    /// Create vectorization pass with custom configuration.
    pub fn with_config(config: VectorizeConfig) -> Self {
        Self {
            config,
            stats: VectorizeStats::default(),
        }
    }

    pub fn config(&self) -> &VectorizeConfig {
        &self.config
    }

    /// Get accumulated statistics.
    pub fn stats(&self) -> &VectorizeStats {
        &self.stats
    }

    pub fn loops_vectorized(&self) -> usize {
        self.stats.loops_vectorized
    }
}

impl Default for Vectorize {
    fn default() -> Self {
        Self::new()
    }
}

impl TracePass for Vectorize {
    fn name(&self) -> &'static str {
        "vectorize"
    }

    fn run(&mut self, cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<bool> {
        self.stats.loops_analyzed += 1;
        match VectorizingOptimizer::optimize(cpu, &self.config, trace) {
            Ok((vectorized, stats)) => {
                *trace = vectorized;
                self.stats.merge(&VectorizeStats {
                    loops_analyzed: 0,
                    ..stats
                });
                Ok(true)
            }
            Err(OptError::NotVectorizable(reason)) => {
                debug!(%reason, "loop not vectorized");
                self.stats.loops_rejected += 1;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::SimulatedCpu;
    use crate::ir::{ArrayDescr, Opcode, TraceBuilder, Value};

    #[test]
    fn test_config_default() {
        let config = VectorizeConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_unroll, 16);
        assert_eq!(config.max_paths_per_guard, 256);
        assert!(config.collapse_index_guards);
    }

    #[test]
    fn test_config_disabled() {
        let config = VectorizeConfig::disabled();
        assert!(!config.enabled);
        assert_eq!(config.max_unroll, 16);
    }

    #[test]
    fn test_config_aggressive() {
        let config = VectorizeConfig::aggressive();
        assert!(config.enabled);
        assert!(config.max_unroll > VectorizeConfig::default().max_unroll);
    }

    #[test]
    fn test_stats_default() {
        let stats = VectorizeStats::default();
        assert_eq!(stats.loops_analyzed, 0);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_stats_merge() {
        let mut stats1 = VectorizeStats {
            loops_analyzed: 10,
            loops_vectorized: 5,
            packs_formed: 3,
            ..Default::default()
        };
        let stats2 = VectorizeStats {
            loops_analyzed: 20,
            loops_vectorized: 15,
            guards_relaxed: 2,
            ..Default::default()
        };
        stats1.merge(&stats2);
        assert_eq!(stats1.loops_analyzed, 30);
        assert_eq!(stats1.loops_vectorized, 20);
        assert_eq!(stats1.packs_formed, 3);
        assert_eq!(stats1.guards_relaxed, 2);
    }

    #[test]
    fn test_stats_success_rate() {
        let stats = VectorizeStats {
            loops_analyzed: 10,
            loops_vectorized: 7,
            ..Default::default()
        };
        assert!((stats.success_rate() - 0.7).abs() < 0.001);
    }

    #[test]
    fn test_vectorize_pass_new() {
        let pass = Vectorize::new();
        assert_eq!(pass.name(), "vectorize");
        assert_eq!(pass.loops_vectorized(), 0);
    }

    #[test]
    fn test_vectorize_pass_with_config() {
        let pass = Vectorize::with_config(VectorizeConfig::disabled());
        assert!(!pass.config().enabled);
    }

    // -------------------------------------------------------------------------
    // Pass behaviour
    // -------------------------------------------------------------------------

    fn copy_loop() -> Trace {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let (src, dst, n) = (b.ptr(), b.ptr(), b.int());
        let d = ArrayDescr::floats(1, 8);
        let header = [i0.into(), src.into(), dst.into(), n.into()];
        b.label(&[i0, src, dst, n], 1);
        b.guard(Opcode::GuardEarlyExit, &[], &header);
        let x = b.load(Opcode::GetarrayitemRaw, &[src.into(), i0.into()], &d);
        b.store(Opcode::SetarrayitemRaw, &[dst.into(), i0.into(), x.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        let c = b.pure(Opcode::IntLt, &[i1.into(), n.into()]);
        b.guard(
            Opcode::GuardTrue,
            &[c.into()],
            &[i1.into(), src.into(), dst.into(), n.into()],
        );
        b.jump(&[i1.into(), src.into(), dst.into(), n.into()], 1);
        b.build()
    }

    #[test]
    fn test_pass_vectorizes_copy_loop() {
        let cpu = SimulatedCpu::sse();
        let mut trace = copy_loop();
        let mut pass = Vectorize::new();
        assert!(pass.run(&cpu, &mut trace).unwrap());
        assert_eq!(trace.count(Opcode::VecGetarrayitemRaw), 1);
        assert_eq!(trace.count(Opcode::VecSetarrayitemRaw), 1);
        assert_eq!(pass.stats().loops_analyzed, 1);
        assert_eq!(pass.stats().loops_vectorized, 1);
        assert_eq!(pass.stats().loops_rejected, 0);
    }

    #[test]
    fn test_pass_rejection_keeps_trace() {
        let cpu = SimulatedCpu::scalar();
        let mut trace = copy_loop();
        let before = trace.ops.clone();
        let mut pass = Vectorize::new();
        assert!(!pass.run(&cpu, &mut trace).unwrap());
        assert_eq!(trace.ops, before);
        assert_eq!(pass.stats().loops_rejected, 1);
        assert_eq!(pass.stats().success_rate(), 0.0);
    }
}
