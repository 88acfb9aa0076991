//! Trace Optimizer Benchmarks
//!
//! Measures the cost of the optimization passes on synthetic loop traces.
//!
//! # Benchmark Categories
//!
//! 1. **Rewrite**: Peephole pass over straight-line arithmetic chains
//! 2. **Dependency Graph**: Graph construction over unrolled loop bodies
//! 3. **Vectorize**: Full vectorizer on element-wise loops per register width
//! 4. **Pipeline**: Rewrite followed by vectorization

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tracejit_opt::ir::{ArrayDescr, Opcode, Trace, TraceBuilder, Value};
use tracejit_opt::opt::vectorize::{DependencyGraph, VectorizeConfig, VectorizingOptimizer};
use tracejit_opt::opt::{OptPipeline, OptRewrite, PipelineConfig};
use tracejit_opt::SimulatedCpu;

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// `c[i] = a[i] <op> b[i]` with an early exit and an index guard.
fn binop_loop(opcode: Opcode, descr: &Arc<ArrayDescr>) -> Trace {
    let mut b = TraceBuilder::new();
    let i0 = b.int();
    let (pa, pb, pc) = (b.ptr(), b.ptr(), b.ptr());
    let n = b.int();
    let header = [i0.into(), pa.into(), pb.into(), pc.into(), n.into()];
    b.label(&[i0, pa, pb, pc, n], 1);
    b.guard(Opcode::GuardEarlyExit, &[], &header);
    let x = b.load(Opcode::GetarrayitemRaw, &[pa.into(), i0.into()], descr);
    let y = b.load(Opcode::GetarrayitemRaw, &[pb.into(), i0.into()], descr);
    let s = b.pure(opcode, &[x.into(), y.into()]);
    b.store(Opcode::SetarrayitemRaw, &[pc.into(), i0.into(), s.into()], descr);
    let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
    let c = b.pure(Opcode::IntLt, &[i1.into(), n.into()]);
    b.guard(
        Opcode::GuardTrue,
        &[c.into()],
        &[i1.into(), pa.into(), pb.into(), pc.into(), n.into()],
    );
    b.jump(&[i1.into(), pa.into(), pb.into(), pc.into(), n.into()], 1);
    b.build()
}

/// Arithmetic chain of `len` operations with foldable identities mixed in.
fn arithmetic_chain(len: usize) -> Trace {
    let mut b = TraceBuilder::new();
    let (i0, i1) = (b.int(), b.int());
    b.label(&[i0, i1], 0);
    let mut acc = Value::Var(i0);
    for k in 0..len {
        let var = match k % 4 {
            0 => b.pure(Opcode::IntAdd, &[acc, Value::int(0)]),
            1 => b.pure(Opcode::IntMul, &[acc, Value::int(8)]),
            2 => b.pure(Opcode::IntXor, &[acc, i1.into()]),
            _ => b.pure(Opcode::IntSub, &[acc, Value::int(k as i64)]),
        };
        acc = Value::Var(var);
    }
    b.jump(&[acc, i1.into()], 0);
    b.build()
}

// =============================================================================
// Rewrite Benchmarks
// =============================================================================

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite");
    let cpu = SimulatedCpu::sse();

    for len in [16usize, 64, 256, 1024].iter() {
        let trace = arithmetic_chain(*len);
        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("chain_length", len), &trace, |b, trace| {
            b.iter(|| black_box(OptRewrite::optimize(&cpu, trace.clone())))
        });
    }

    group.bench_function("int_add_loop", |b| {
        let trace = binop_loop(Opcode::IntAdd, &ArrayDescr::ints(1, 4));
        b.iter(|| black_box(OptRewrite::optimize(&cpu, trace.clone())))
    });

    group.finish();
}

// =============================================================================
// Dependency Graph Benchmarks
// =============================================================================

fn bench_dependency_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_graph");

    for item_size in [8usize, 4, 2, 1].iter() {
        let cpu = SimulatedCpu::avx2();
        let trace = binop_loop(Opcode::IntAdd, &ArrayDescr::ints(1, *item_size));
        let mut opt = VectorizingOptimizer::new(&cpu, VectorizeConfig::aggressive(), &trace);
        opt.linear_find_smallest_type();
        let unroll = opt.get_unroll_count(32);
        opt.unroll_loop_iterations(unroll);
        let ops = opt.operations().to_vec();

        group.throughput(Throughput::Elements(ops.len() as u64));
        group.bench_with_input(BenchmarkId::new("unrolled_ops", ops.len()), &ops, |b, ops| {
            b.iter(|| black_box(DependencyGraph::new(ops.clone())))
        });
    }

    group.finish();
}

// =============================================================================
// Vectorize Benchmarks
// =============================================================================

fn bench_vectorize(c: &mut Criterion) {
    let mut group = c.benchmark_group("vectorize");
    let config = VectorizeConfig::default();

    group.bench_function("int32_add_sse", |b| {
        let cpu = SimulatedCpu::sse();
        let trace = binop_loop(Opcode::IntAdd, &ArrayDescr::ints(1, 4));
        b.iter(|| black_box(VectorizingOptimizer::optimize(&cpu, &config, &trace)))
    });

    group.bench_function("int32_add_avx2", |b| {
        let cpu = SimulatedCpu::avx2();
        let trace = binop_loop(Opcode::IntAdd, &ArrayDescr::ints(1, 4));
        b.iter(|| black_box(VectorizingOptimizer::optimize(&cpu, &config, &trace)))
    });

    group.bench_function("f64_mul_avx2", |b| {
        let cpu = SimulatedCpu::avx2();
        let trace = binop_loop(Opcode::FloatMul, &ArrayDescr::floats(2, 8));
        b.iter(|| black_box(VectorizingOptimizer::optimize(&cpu, &config, &trace)))
    });

    // Rejection path: no vector registers
    group.bench_function("rejected_scalar", |b| {
        let cpu = SimulatedCpu::scalar();
        let trace = binop_loop(Opcode::IntAdd, &ArrayDescr::ints(1, 4));
        b.iter(|| black_box(VectorizingOptimizer::optimize(&cpu, &config, &trace)))
    });

    group.finish();
}

// =============================================================================
// Pipeline Benchmarks
// =============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let cpu = SimulatedCpu::sse();
    let trace = binop_loop(Opcode::IntAdd, &ArrayDescr::ints(1, 4));

    group.bench_function("minimal", |b| {
        b.iter(|| {
            let mut pipeline = OptPipeline::with_config(PipelineConfig::minimal());
            let mut t = trace.clone();
            black_box(pipeline.run(&cpu, &mut t))
        })
    });

    group.bench_function("full", |b| {
        b.iter(|| {
            let mut pipeline = OptPipeline::with_config(PipelineConfig::full());
            let mut t = trace.clone();
            black_box(pipeline.run(&cpu, &mut t))
        })
    });

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    optimizer_benches,
    bench_rewrite,
    bench_dependency_graph,
    bench_vectorize,
    bench_pipeline,
);

criterion_main!(optimizer_benches);
