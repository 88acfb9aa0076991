//! Loop vectorizer driver.
//!
//! Stages, in order:
//!
//! 1. Reject traces that cannot be vectorized.
//! 2. Find the narrowest array item and derive the unroll count.
//! 3. Relax guards to the early exit and reschedule the body.
//! 4. Unroll.
//! 5. Rebuild the dependency graph and build the pack set.
//! 6. Schedule, emitting vector operations for packs.
//! 7. Collapse redundant index guards.
//!
//! Any rejection leaves the input trace untouched.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::cpu::Cpu;
use crate::ir::{Opcode, Operation, ResumeKind, Snapshot, Trace, Value, Var, VarAllocator};
use crate::opt::error::{NotVectorizable, OptResult};

use super::dependency::{DependencyGraph, EdgeKind, NodeId};
use super::memref::{compute_index_vars, IndexVar};
use super::packset::{Pack, PackSet};
use super::schedule::{Scheduled, Scheduler};
use super::vecops::VecScheduleData;
use super::{VectorizeConfig, VectorizeStats};

/// Priority of pure index computations moved in front of the early exit.
const PULLUP_PRIORITY: i32 = 10;

/// Guards that are never duplicated by unrolling nor relaxed.
fn is_loop_guard(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::GuardEarlyExit | Opcode::GuardFutureCondition | Opcode::GuardNotInvalidated
    )
}

/// `LABEL ... JUMP` or `LABEL ... LABEL`.
fn is_loop(ops: &[Operation]) -> bool {
    ops.len() >= 2
        && ops[0].opcode == Opcode::Label
        && matches!(ops[ops.len() - 1].opcode, Opcode::Jump | Opcode::Label)
}

fn rename_value(rename: &FxHashMap<Var, Value>, value: Value) -> Value {
    match value {
        Value::Var(v) => rename.get(&v).copied().unwrap_or(value),
        Value::Const(_) => value,
    }
}

/// Vectorizes one loop trace.
pub struct VectorizingOptimizer<'a> {
    cpu: &'a dyn Cpu,
    config: VectorizeConfig,
    ops: Vec<Operation>,
    vars: VarAllocator,
    graph: Option<DependencyGraph>,
    packset: PackSet,
    smallest_type_bytes: usize,
    unroll_count: usize,
    stats: VectorizeStats,
}

impl<'a> VectorizingOptimizer<'a> {
    pub fn new(cpu: &'a dyn Cpu, config: VectorizeConfig, trace: &Trace) -> Self {
        Self {
            cpu,
            config,
            ops: trace.ops.clone(),
            vars: trace.vars.clone(),
            graph: None,
            packset: PackSet::new(),
            smallest_type_bytes: 0,
            unroll_count: 0,
            stats: VectorizeStats::default(),
        }
    }

    /// Vectorize `trace`. On error the caller keeps `trace` as it was.
    pub fn optimize(
        cpu: &'a dyn Cpu,
        config: &VectorizeConfig,
        trace: &Trace,
    ) -> OptResult<(Trace, VectorizeStats)> {
        let mut opt = Self::new(cpu, config.clone(), trace);
        opt.propagate_all_forward()?;
        let stats = opt.stats.clone();
        Ok((
            Trace {
                ops: opt.ops,
                vars: opt.vars,
                call_pure_results: trace.call_pure_results.clone(),
            },
            stats,
        ))
    }

    #[inline]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    #[inline]
    pub fn stats(&self) -> &VectorizeStats {
        &self.stats
    }

    #[inline]
    pub fn unroll_count(&self) -> usize {
        self.unroll_count
    }

    #[inline]
    pub fn smallest_type_bytes(&self) -> usize {
        self.smallest_type_bytes
    }

    #[inline]
    pub fn packset(&self) -> &PackSet {
        &self.packset
    }

    /// Run every stage.
    pub fn propagate_all_forward(&mut self) -> OptResult<()> {
        if !self.config.enabled {
            return Err(NotVectorizable::Disabled.into());
        }
        if !is_loop(&self.ops) {
            return Err(NotVectorizable::NotALoop.into());
        }

        self.linear_find_smallest_type();
        let vsize = self.cpu.vector_register_size();
        if vsize == 0 {
            return Err(NotVectorizable::NoSimdSupport.into());
        }
        if self.smallest_type_bytes == 0 {
            return Err(NotVectorizable::NoArrayAccess.into());
        }

        self.unroll_count = self.get_unroll_count(vsize);
        if self.unroll_count > self.config.max_unroll {
            return Err(NotVectorizable::UnrollTooLarge(self.unroll_count).into());
        }
        debug!(
            vsize,
            smallest = self.smallest_type_bytes,
            unroll = self.unroll_count,
            "vectorizing loop"
        );

        self.analyse_index_calculations();
        self.unroll_loop_iterations(self.unroll_count);
        self.build_dependency_graph();
        if let Some(graph) = self.graph.as_mut() {
            if !graph.pull_up_relaxed_guards() {
                return Err(NotVectorizable::ImpureGuard.into());
            }
        }

        self.find_adjacent_memory_refs();
        self.extend_packset();
        self.combine_packset()?;
        debug!(packs = self.packset.pack_count(), "pack set built");

        self.schedule(true);
        if self.config.collapse_index_guards {
            self.collapse_index_guards();
        }
        self.stats.loops_vectorized += 1;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Stage 1-2: type and unroll factor
    // -------------------------------------------------------------------------

    /// Narrowest item size among primitive (non-pointer, non-struct) array
    /// accesses; `0` when there are none.
    pub fn linear_find_smallest_type(&mut self) {
        let mut smallest = 0;
        for op in &self.ops {
            if !op.opcode.is_array_op() || op.opcode.is_vector() {
                continue;
            }
            let Some(descr) = op.array_descr() else {
                continue;
            };
            if descr.is_array_of_pointers() || descr.is_array_of_structs() {
                continue;
            }
            if smallest == 0 || descr.item_size < smallest {
                smallest = descr.item_size;
            }
        }
        self.smallest_type_bytes = smallest;
    }

    /// Extra copies of the body needed to fill a register with the
    /// narrowest type.
    pub fn get_unroll_count(&self, vsize: usize) -> usize {
        if self.smallest_type_bytes == 0 {
            return 0;
        }
        (vsize / self.smallest_type_bytes).saturating_sub(1)
    }

    // -------------------------------------------------------------------------
    // Stage 3: guard relaxation
    // -------------------------------------------------------------------------

    /// Relax every guard that depends on the early exit only through pure
    /// index arithmetic, then reorder the body so relaxed guards and their
    /// inputs come first.
    pub fn analyse_index_calculations(&mut self) {
        let mut graph = DependencyGraph::new(self.ops.clone());
        let (Some(label), Some(ee)) = (graph.label(), graph.early_exit()) else {
            return;
        };

        for guard in graph.guards().to_vec() {
            let op = graph.node(guard).op();
            if guard == ee
                || is_loop_guard(op.opcode)
                || op.resume_kind() == ResumeKind::AtPosition
            {
                continue;
            }
            let Some(paths) = graph.iterate_paths(guard, ee, self.config.max_paths_per_guard) else {
                trace!(guard = guard.0, "too many paths, guard kept");
                continue;
            };

            let mut delete: Vec<NodeId> = Vec::new();
            let mut pullup: Vec<NodeId> = Vec::new();
            let mut valid = true;
            for path in &paths {
                let second = path[1];
                if graph.edge_kind(second, guard) != Some(EdgeKind::Data) {
                    if !delete.contains(&second) {
                        delete.push(second);
                    }
                    continue;
                }
                let inner = &path[1..path.len() - 1];
                if !inner.iter().all(|&n| graph.node(n).opcode().is_always_pure()) {
                    valid = false;
                    break;
                }
                for &n in inner {
                    graph.node_mut(n).priority = PULLUP_PRIORITY;
                }
                let last_but_one = path[path.len() - 2];
                if !pullup.contains(&last_but_one) {
                    pullup.push(last_but_one);
                }
            }
            if !valid {
                continue;
            }

            for n in delete {
                graph.remove_edge_to(n, guard);
            }
            for n in pullup {
                graph.remove_edge_to(ee, n);
                graph.edge_to(label, n, EdgeKind::Pullup);
            }
            graph.edge_to(guard, ee, EdgeKind::Pullup);
            graph.relax_guard(guard, ee);
            self.stats.guards_relaxed += 1;
            trace!(guard = guard.0, "guard relaxed to the loop header");
        }

        self.graph = Some(graph);
        self.schedule(false);
    }

    // -------------------------------------------------------------------------
    // Stage 4: unrolling
    // -------------------------------------------------------------------------

    /// Append `count` renamed copies of the loop body.
    pub fn unroll_loop_iterations(&mut self, count: usize) {
        let n = self.ops.len();
        if n < 2 {
            return;
        }
        let label = self.ops[0].clone();
        let last = &self.ops[n - 1];
        let jump = if last.opcode == Opcode::Label {
            let mut jump = Operation::new(Opcode::Jump, last.args.iter().copied(), None);
            jump.descr = label.descr.clone();
            jump
        } else {
            last.clone()
        };
        let body: Vec<Operation> = self.ops[1..n - 1].to_vec();

        let mut out = Vec::with_capacity(n + body.len() * count);
        out.push(label.clone());
        out.extend(body.iter().cloned());

        let mut rename: FxHashMap<Var, Value> = FxHashMap::default();
        for _ in 0..count {
            // All carried values are read before any is rebound.
            let carried: Vec<(Var, Value)> = label
                .args
                .iter()
                .zip(jump.args.iter())
                .filter_map(|(&la, &ja)| Some((la.var()?, rename_value(&rename, ja))))
                .collect();
            rename.extend(carried);

            for op in &body {
                if is_loop_guard(op.opcode) || op.opcode.is_debug() {
                    continue;
                }
                let mut copy = op.clone();
                for arg in copy.args.iter_mut() {
                    *arg = rename_value(&rename, *arg);
                }
                if let Some(res) = op.result {
                    let fresh = self.vars.fresh(res.ty());
                    rename.insert(res, Value::Var(fresh));
                    copy.result = Some(fresh);
                }
                if copy.is_guard() && !copy.exits_early() {
                    if let Some(snapshot) = copy.snapshot.take() {
                        let renamed = Snapshot::rename(&snapshot, &mut |v| rename_value(&rename, v));
                        copy.snapshot = Some(renamed);
                    }
                }
                out.push(copy);
            }
        }

        let mut jump = jump;
        for arg in jump.args.iter_mut() {
            *arg = rename_value(&rename, *arg);
        }
        out.push(jump);
        self.ops = out;
    }

    // -------------------------------------------------------------------------
    // Stage 5: packing
    // -------------------------------------------------------------------------

    pub fn build_dependency_graph(&mut self) {
        self.graph = Some(DependencyGraph::new(std::mem::take(&mut self.ops)));
    }

    pub fn find_adjacent_memory_refs(&mut self) {
        if let Some(graph) = self.graph.as_ref() {
            self.packset.find_adjacent_memory_refs(graph, self.cpu);
        }
    }

    pub fn extend_packset(&mut self) {
        if let Some(graph) = self.graph.as_ref() {
            self.packset.extend(graph, self.cpu);
        }
    }

    pub fn combine_packset(&mut self) -> OptResult<()> {
        match self.graph.as_mut() {
            Some(graph) => self.packset.combine(graph),
            None => Err(NotVectorizable::NoPacks.into()),
        }
    }

    // -------------------------------------------------------------------------
    // Stage 6: scheduling
    // -------------------------------------------------------------------------

    /// Replace the operation list by a schedule of the current graph.
    /// With `vectorize`, packs become vector operations.
    fn schedule(&mut self, vectorize: bool) {
        let Some(mut graph) = self.graph.take() else {
            return;
        };
        let mut packs: Vec<Pack> = if vectorize {
            self.packset.packs().to_vec()
        } else {
            Vec::new()
        };
        let mut scheduler = Scheduler::new(&graph);
        let mut data = VecScheduleData::new(
            self.cpu,
            self.cpu.vector_register_size(),
            self.smallest_type_bytes,
        );
        let mut out = Vec::with_capacity(graph.len());

        while scheduler.has_more() {
            match scheduler.next(&mut graph, &packs) {
                Scheduled::Pack(p) => {
                    data.as_vector_operation(&mut packs[p], &graph, &mut self.vars, &mut out)
                }
                Scheduled::Node(id) => {
                    let mut op = graph.node(id).op().clone();
                    if vectorize {
                        if op.opcode.is_debug() {
                            continue;
                        }
                        data.unpack_operation(&mut op, &mut self.vars, &mut out);
                    }
                    out.push(op);
                }
            }
        }

        if vectorize {
            self.stats.packs_formed += packs.len();
            self.stats.vector_ops_created += data.vector_ops();
            self.stats.unpacks_inserted += data.unpacks();
        }
        self.ops = out;
    }

    // -------------------------------------------------------------------------
    // Stage 7: index guard collapsing
    // -------------------------------------------------------------------------

    /// Drop relaxed index guards implied by a later, stronger one, and
    /// rewrite index arithmetic to `var + constant`.
    pub fn collapse_index_guards(&mut self) {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        struct GuardKey {
            opcode: Opcode,
            var: Var,
            mul: i64,
            div: i64,
            bound: Value,
        }

        let index_vars = compute_index_vars(&self.ops);
        let comparisons: FxHashMap<Var, (Opcode, Value, Value)> = self
            .ops
            .iter()
            .filter(|op| {
                matches!(
                    op.opcode,
                    Opcode::IntLt | Opcode::IntLe | Opcode::IntGt | Opcode::IntGe
                )
            })
            .filter_map(|op| Some((op.result?, (op.opcode, op.arg(0), op.arg(1)))))
            .collect();
        let derived = |v: Value| v.var().is_some_and(|v| index_vars.contains_key(&v));

        let mut strongest: FxHashMap<GuardKey, (i64, usize)> = FxHashMap::default();
        let mut dropped: FxHashSet<usize> = FxHashSet::default();
        let mut dropped_conditions: FxHashSet<Var> = FxHashSet::default();

        for (pos, op) in self.ops.iter().enumerate() {
            if !op.exits_early() || !matches!(op.opcode, Opcode::GuardTrue | Opcode::GuardFalse) {
                continue;
            }
            let Some(cond) = op.arg(0).var() else {
                continue;
            };
            let Some(&(cmp, lhs, rhs)) = comparisons.get(&cond) else {
                continue;
            };
            let cmp = if op.opcode == Opcode::GuardFalse {
                match cmp.bool_inverse() {
                    Some(inv) => inv,
                    None => continue,
                }
            } else {
                cmp
            };
            let (cmp, index, bound) = if !derived(lhs) && derived(rhs) {
                match cmp.bool_reflex() {
                    Some(r) => (r, rhs, lhs),
                    None => continue,
                }
            } else {
                (cmp, lhs, rhs)
            };
            let Some(iv) = IndexVar::of_value(index, &index_vars) else {
                continue;
            };
            let Some(var) = iv.var else {
                continue;
            };
            let key = GuardKey {
                opcode: cmp,
                var,
                mul: iv.coefficient_mul,
                div: iv.coefficient_div,
                bound,
            };
            let upper = matches!(cmp, Opcode::IntLt | Opcode::IntLe);
            match strongest.get(&key).copied() {
                None => {
                    strongest.insert(key, (iv.constant, pos));
                }
                Some((c, prev)) => {
                    let stronger = if upper { iv.constant >= c } else { iv.constant <= c };
                    if stronger {
                        dropped.insert(prev);
                        strongest.insert(key, (iv.constant, pos));
                    } else {
                        dropped.insert(pos);
                    }
                }
            }
        }

        for &pos in &dropped {
            if let Some(cond) = self.ops[pos].arg(0).var() {
                dropped_conditions.insert(cond);
            }
        }

        let ops = std::mem::take(&mut self.ops);
        let mut kept: Vec<Operation> = Vec::with_capacity(ops.len());
        for (pos, mut op) in ops.into_iter().enumerate() {
            if dropped.contains(&pos) {
                continue;
            }
            if op.opcode.is_always_pure() {
                if let Some(iv) = op.result.and_then(|r| index_vars.get(&r)) {
                    iv.adapt_operation(&mut op);
                }
            }
            kept.push(op);
        }

        // Conditions of dropped guards are dead unless read elsewhere.
        let used: FxHashSet<Var> = kept
            .iter()
            .flat_map(|op| op.uses())
            .filter_map(|v| v.var())
            .collect();
        kept.retain(|op| {
            op.result
                .map_or(true, |r| !dropped_conditions.contains(&r) || used.contains(&r))
        });

        if !dropped.is_empty() {
            debug!(collapsed = dropped.len(), "index guards collapsed");
        }
        self.stats.guards_collapsed += dropped.len();
        self.ops = kept;
    }
}
