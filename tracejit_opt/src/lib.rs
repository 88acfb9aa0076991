//! Trace optimizer mid-end.
//!
//! Optimizes recorded loop traces before code generation:
//! - Peephole rewriting driven by integer bounds and known pointer facts
//! - Guard strengthening and removal
//! - Loop auto-vectorization by unrolling and packing into SIMD operations
//!
//! Passes run through [`opt::OptPipeline`]; a loop that cannot be vectorized
//! falls back to its scalar form.

pub mod cpu;
pub mod ir;
pub mod opt;

pub use cpu::{Cpu, SimulatedCpu};
pub use ir::{Opcode, Operation, Trace, TraceBuilder, Value, Var};
pub use opt::{optimize, OptError, OptPipeline, OptResult, PipelineConfig, TracePass};
