//! Optimization Pipeline.
//!
//! Runs the trace passes in phase order and keeps per-pass statistics.
//!
//! # Pass Phases
//!
//! 1. **Rewrite**: peephole rewriting, iterated to a fixed point
//! 2. **Vectorize**: loop vectorization, run once
//!
//! # Failure Handling
//!
//! [`OptError::NotVectorizable`] from any pass is absorbed: the trace the
//! pass was given stays in place. [`OptError::InvalidLoop`] aborts the
//! pipeline and is returned to the caller.

use super::error::{OptError, OptResult};
use super::rewrite::Rewrite;
use super::vectorize::{Vectorize, VectorizeConfig};
use super::TracePass;
use crate::cpu::Cpu;
use crate::ir::Trace;

use std::time::{Duration, Instant};

use tracing::debug;

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Peephole rewriting.
    Rewrite,
    /// Loop vectorization.
    Vectorize,
}

impl PassPhase {
    pub const ALL: [PassPhase; 2] = [PassPhase::Rewrite, PassPhase::Vectorize];

    /// Whether passes of this phase are repeated until nothing changes.
    pub fn iterates(self) -> bool {
        matches!(self, PassPhase::Rewrite)
    }
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn TracePass>,
    phase: PassPhase,
    enabled: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: TracePass + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            enabled: true,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the optimization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum iterations of an iterating phase.
    pub max_iterations_per_phase: usize,

    /// Enable the rewrite pass.
    pub enable_rewrite: bool,

    /// Enable the vectorizer.
    pub enable_vectorize: bool,

    /// Vectorizer settings.
    pub vectorize: VectorizeConfig,

    /// Collect timing statistics.
    pub collect_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_phase: 2,
            enable_rewrite: true,
            enable_vectorize: true,
            vectorize: VectorizeConfig::default(),
            collect_timing: true,
        }
    }
}

impl PipelineConfig {
    /// Rewrite only, single iteration, no timing.
    pub fn minimal() -> Self {
        Self {
            max_iterations_per_phase: 1,
            enable_rewrite: true,
            enable_vectorize: false,
            vectorize: VectorizeConfig::disabled(),
            collect_timing: false,
        }
    }

    /// Every pass, aggressive vectorizer settings.
    pub fn full() -> Self {
        Self {
            max_iterations_per_phase: 4,
            vectorize: VectorizeConfig::aggressive(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

/// The main optimization pipeline.
pub struct OptPipeline {
    config: PipelineConfig,

    /// Registered passes in order.
    passes: Vec<PassEntry>,

    /// Total iterations run.
    total_iterations: usize,

    /// Total time spent.
    total_time: Duration,
}

impl OptPipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_iterations: 0,
            total_time: Duration::ZERO,
        };

        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.enable_rewrite {
            self.register(Rewrite::new(), PassPhase::Rewrite);
        }
        if self.config.enable_vectorize {
            let vectorize = Vectorize::with_config(self.config.vectorize.clone());
            self.register(vectorize, PassPhase::Vectorize);
        }
    }

    /// Register a custom pass.
    pub fn register<P: TracePass + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    /// Enable or disable every pass with the given name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        for entry in &mut self.passes {
            if entry.pass.name() == name {
                entry.enabled = enabled;
            }
        }
    }

    /// Run the pipeline on a trace.
    ///
    /// On `Err` the trace is unspecified and the compilation attempt should
    /// be dropped.
    pub fn run(&mut self, cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<PipelineStats> {
        let start = Instant::now();
        let initial_size = trace.len();

        let mut stats = PipelineStats::default();
        let mut iterations = 0;

        for phase in PassPhase::ALL {
            iterations += self.run_phase(cpu, trace, phase, &mut stats)?;
        }

        self.total_iterations += iterations;
        let elapsed = start.elapsed();
        self.total_time += elapsed;

        stats.total_iterations = iterations;
        stats.total_time = elapsed;
        stats.initial_size = initial_size;
        stats.final_size = trace.len();

        Ok(stats)
    }

    /// Run all passes in a specific phase. Returns the iterations used.
    fn run_phase(
        &mut self,
        cpu: &dyn Cpu,
        trace: &mut Trace,
        phase: PassPhase,
        stats: &mut PipelineStats,
    ) -> OptResult<usize> {
        let max_iterations = if phase.iterates() {
            self.config.max_iterations_per_phase.max(1)
        } else {
            1
        };
        let mut iterations = 0;

        for _ in 0..max_iterations {
            iterations += 1;
            let mut iter_changed = false;

            for entry in &mut self.passes {
                if entry.phase != phase || !entry.enabled {
                    continue;
                }

                let start = if self.config.collect_timing {
                    Some(Instant::now())
                } else {
                    None
                };

                let before = trace.clone();
                let result = entry.pass.run(cpu, trace);

                if let Some(start) = start {
                    entry.time += start.elapsed();
                }
                entry.runs += 1;

                match result {
                    Ok(true) => {
                        entry.changes += 1;
                        iter_changed = true;
                    }
                    Ok(false) => {}
                    Err(OptError::NotVectorizable(reason)) => {
                        debug!(pass = entry.pass.name(), %reason, "pass fell back");
                        *trace = before;
                    }
                    Err(err) => {
                        debug!(pass = entry.pass.name(), %err, "optimization aborted");
                        return Err(err);
                    }
                }
            }

            if !iter_changed {
                break;
            }
        }

        stats.phases_run += 1;
        Ok(iterations)
    }

    /// Get pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name().to_string(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.total_iterations
    }

    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: String,
    pub phase: PassPhase,
    /// Number of times run.
    pub runs: usize,
    /// Number of times it made changes.
    pub changes: usize,
    /// Total time spent in this pass.
    pub time: Duration,
}

/// Statistics from one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Iterations across all phases.
    pub total_iterations: usize,
    pub phases_run: usize,
    pub total_time: Duration,
    /// Operations before the first pass.
    pub initial_size: usize,
    /// Operations after the last pass.
    pub final_size: usize,
}

impl PipelineStats {
    /// Get size ratio, final over initial.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

/// Run the full pipeline on a trace.
pub fn optimize_full(cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::full()).run(cpu, trace)
}

/// Run the rewrite-only pipeline on a trace.
pub fn optimize_minimal(cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::minimal()).run(cpu, trace)
}

/// Run the default pipeline on a trace.
pub fn optimize(cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<PipelineStats> {
    OptPipeline::new().run(cpu, trace)
}

// =============================================================================
// Tests
// =============================================================================
