//! Dependency graph over a loop body.
//!
//! One [`Node`] per operation. An edge `a -> b` means `b` must be scheduled
//! after `a`. Besides data flow the graph orders memory accesses that may
//! alias, keeps side effects between the guards that surround them, and
//! ties every guard to the producers of its resume snapshot.
//!
//! # Relaxed guards
//!
//! A guard whose resume kind is [`ResumeKind::AtLoopHeader`] restarts the
//! whole iteration when it fails. Such a guard only needs its data inputs;
//! it is not chained to other guards and carries no snapshot edges. After
//! unrolling, [`DependencyGraph::pull_up_relaxed_guards`] moves these
//! guards in front of the `GUARD_EARLY_EXIT` so that no side effect can
//! happen before them.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::{GuardDescr, Opcode, Operation, ResumeKind, Var};

use super::memref::{compute_index_vars, IndexVar, MemoryRef};

// =============================================================================
// Nodes and Edges
// =============================================================================

/// Index of a node, equal to the position of its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Why one node must follow another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The target reads a box defined by the source.
    Data,
    /// Possibly aliasing memory accesses.
    Memory,
    /// Guard order and loads behind guards.
    Guard,
    /// Side effects stay between their surrounding guards.
    SideEffect,
    /// The source defines a box in the target's resume snapshot.
    Snapshot,
    /// Added when a relaxed guard is moved to the loop header.
    Pullup,
    /// Every sink precedes the closing jump.
    Jump,
    /// The label precedes every root.
    Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub node: NodeId,
    pub kind: EdgeKind,
}

/// One operation of the loop body and its edges.
#[derive(Debug, Clone)]
pub struct Node {
    op: Operation,
    id: NodeId,
    /// Outgoing edges: nodes that must come later.
    provides: SmallVec<[Edge; 4]>,
    /// Incoming edges: nodes that must come earlier.
    depends: SmallVec<[Edge; 4]>,
    memref: Option<MemoryRef>,
    /// Scheduling preference; higher runs first among ready nodes.
    pub priority: i32,
    pub emitted: bool,
    /// Index of the pack this node belongs to.
    pub pack: Option<usize>,
}

impl Node {
    fn new(op: Operation, id: NodeId) -> Self {
        Self {
            op,
            id,
            provides: SmallVec::new(),
            depends: SmallVec::new(),
            memref: None,
            priority: 0,
            emitted: false,
            pack: None,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn op(&self) -> &Operation {
        &self.op
    }

    #[inline]
    pub fn op_mut(&mut self) -> &mut Operation {
        &mut self.op
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.op.opcode
    }

    #[inline]
    pub fn provides(&self) -> &[Edge] {
        &self.provides
    }

    #[inline]
    pub fn depends(&self) -> &[Edge] {
        &self.depends
    }

    #[inline]
    pub fn memref(&self) -> Option<&MemoryRef> {
        self.memref.as_ref()
    }

    #[inline]
    pub fn is_before(&self, other: &Node) -> bool {
        self.id < other.id
    }

    #[inline]
    pub fn is_guard(&self) -> bool {
        self.op.is_guard()
    }

    /// Guard that resumes at the loop header.
    #[inline]
    pub fn is_relaxed(&self) -> bool {
        self.op.exits_early() && self.op.opcode != Opcode::GuardEarlyExit
    }

    /// Writes memory, calls out, or otherwise must not be reordered
    /// across guards.
    pub fn has_side_effects(&self) -> bool {
        let opcode = self.op.opcode;
        !opcode.has_no_side_effect() && !opcode.is_guard() && !opcode.is_final()
    }

    /// Depends on `other` through a direct edge.
    pub fn depends_on(&self, other: NodeId) -> bool {
        self.depends.iter().any(|e| e.node == other)
    }
}

// =============================================================================
// Dependency Graph
// =============================================================================

/// Dependency graph of a loop (or of a plain trace).
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    /// Nodes with a [`MemoryRef`], in program order.
    memory_refs: Vec<NodeId>,
    /// Every guard, in program order.
    guards: Vec<NodeId>,
    index_vars: FxHashMap<Var, IndexVar>,
    early_exit: Option<NodeId>,
}

/// What one memory access (or barrier) leaves behind for later accesses.
struct Access {
    node: NodeId,
    write: bool,
    memref: Option<MemoryRef>,
}

impl Access {
    fn may_alias(&self, other: Option<&MemoryRef>) -> bool {
        match (&self.memref, other) {
            (Some(a), Some(b)) => a.may_alias(b),
            _ => true,
        }
    }
}

impl DependencyGraph {
    /// Build the graph of `ops`.
    pub fn new(ops: Vec<Operation>) -> Self {
        let index_vars = compute_index_vars(&ops);
        let nodes = ops
            .into_iter()
            .enumerate()
            .map(|(i, op)| Node::new(op, NodeId(i as u32)))
            .collect();
        let mut graph = Self {
            nodes,
            memory_refs: Vec::new(),
            guards: Vec::new(),
            index_vars,
            early_exit: None,
        };
        graph.build();
        graph
    }

    fn build(&mut self) {
        self.early_exit = self
            .nodes
            .iter()
            .find(|n| n.opcode() == Opcode::GuardEarlyExit)
            .map(Node::id);
        let relax = self.early_exit.is_some();

        let mut defs: FxHashMap<Var, NodeId> = FxHashMap::default();
        let mut last_guard: Option<NodeId> = None;
        let mut side_effects: Vec<NodeId> = Vec::new();
        let mut accesses: Vec<Access> = Vec::new();

        for i in 0..self.nodes.len() {
            let id = NodeId(i as u32);
            let opcode = self.nodes[i].opcode();

            if opcode == Opcode::Label && i == 0 {
                for var in self.nodes[i].op.args.iter().filter_map(|a| a.var()) {
                    defs.insert(var, id);
                }
                continue;
            }

            let arg_defs: SmallVec<[NodeId; 4]> = self.nodes[i]
                .op
                .args
                .iter()
                .filter_map(|a| a.var())
                .filter_map(|v| defs.get(&v).copied())
                .collect();
            for def in arg_defs {
                self.edge_to(def, id, EdgeKind::Data);
            }

            if self.nodes[i].is_guard() {
                self.guards.push(id);
                let relaxed = relax && self.nodes[i].is_relaxed();
                if !relaxed {
                    let snapshot_defs: SmallVec<[NodeId; 8]> = self.nodes[i]
                        .op
                        .fail_args()
                        .filter_map(|a| a.var())
                        .filter_map(|v| defs.get(&v).copied())
                        .collect();
                    for def in snapshot_defs {
                        self.edge_to(def, id, EdgeKind::Snapshot);
                    }
                    if let Some(g) = last_guard {
                        self.edge_to(g, id, EdgeKind::Guard);
                    }
                    for s in side_effects.drain(..) {
                        self.edge_to(s, id, EdgeKind::SideEffect);
                    }
                    last_guard = Some(id);
                }
                if opcode == Opcode::GuardEarlyExit {
                    if let Some(label) = self.label() {
                        self.edge_to(label, id, EdgeKind::Label);
                        let label_vars: SmallVec<[Var; 8]> = self.nodes[label.index()]
                            .op
                            .args
                            .iter()
                            .filter_map(|a| a.var())
                            .collect();
                        for var in label_vars {
                            defs.insert(var, id);
                        }
                    }
                }
            }

            if opcode.is_array_op() || self.nodes[i].has_side_effects() {
                let memref = MemoryRef::of_operation(&self.nodes[i].op, &self.index_vars);
                let write = !opcode.is_load();
                if memref.is_some() {
                    self.memory_refs.push(id);
                }
                let mut memory_deps: SmallVec<[NodeId; 4]> = SmallVec::new();
                for prev in accesses.iter().rev() {
                    if !prev.may_alias(memref.as_ref()) {
                        continue;
                    }
                    if write {
                        memory_deps.push(prev.node);
                        if prev.write {
                            break;
                        }
                    } else if prev.write {
                        memory_deps.push(prev.node);
                        break;
                    }
                }
                for dep in memory_deps {
                    self.edge_to(dep, id, EdgeKind::Memory);
                }
                if !write {
                    if let Some(g) = last_guard {
                        self.edge_to(g, id, EdgeKind::Guard);
                    }
                }
                self.nodes[i].memref = memref.clone();
                accesses.push(Access {
                    node: id,
                    write,
                    memref,
                });
            }

            if self.nodes[i].has_side_effects() {
                if let Some(g) = last_guard {
                    self.edge_to(g, id, EdgeKind::SideEffect);
                }
                side_effects.push(id);
            }

            if let Some(res) = self.nodes[i].op.result {
                defs.insert(res, id);
            }
        }

        self.connect_label_and_jump();
    }

    /// Sinks precede the closing jump, the label precedes every root.
    fn connect_label_and_jump(&mut self) {
        let n = self.nodes.len();
        if n < 2 {
            return;
        }
        let last = NodeId((n - 1) as u32);
        if self.nodes[last.index()].opcode().is_final() {
            for i in 0..n - 1 {
                if self.nodes[i].provides.is_empty() {
                    self.edge_to(NodeId(i as u32), last, EdgeKind::Jump);
                }
            }
        }
        if let Some(label) = self.label() {
            for i in 1..n {
                if self.nodes[i].depends.is_empty() {
                    self.edge_to(label, NodeId(i as u32), EdgeKind::Label);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Leading `LABEL`, if any.
    pub fn label(&self) -> Option<NodeId> {
        self.nodes
            .first()
            .filter(|n| n.opcode() == Opcode::Label)
            .map(Node::id)
    }

    pub fn early_exit(&self) -> Option<NodeId> {
        self.early_exit
    }

    pub fn guards(&self) -> &[NodeId] {
        &self.guards
    }

    pub fn memory_refs(&self) -> &[NodeId] {
        &self.memory_refs
    }

    pub fn index_vars(&self) -> &FxHashMap<Var, IndexVar> {
        &self.index_vars
    }

    /// Operations in their original order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> + '_ {
        self.nodes.iter().map(Node::op)
    }

    // -------------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------------

    /// Add `from -> to`. An existing edge keeps its kind. Returns whether
    /// an edge was added.
    pub fn edge_to(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> bool {
        if from == to || self.nodes[from.index()].provides.iter().any(|e| e.node == to) {
            return false;
        }
        self.nodes[from.index()].provides.push(Edge { node: to, kind });
        self.nodes[to.index()].depends.push(Edge { node: from, kind });
        true
    }

    /// Remove `from -> to`. Returns whether the edge existed.
    pub fn remove_edge_to(&mut self, from: NodeId, to: NodeId) -> bool {
        let before = self.nodes[from.index()].provides.len();
        self.nodes[from.index()].provides.retain(|e| e.node != to);
        self.nodes[to.index()].depends.retain(|e| e.node != from);
        before != self.nodes[from.index()].provides.len()
    }

    pub fn edge_kind(&self, from: NodeId, to: NodeId) -> Option<EdgeKind> {
        self.nodes[from.index()]
            .provides
            .iter()
            .find(|e| e.node == to)
            .map(|e| e.kind)
    }

    /// Whether `to` is reachable from `from`.
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if !visited.insert(n) {
                continue;
            }
            stack.extend(self.nodes[n.index()].provides.iter().map(|e| e.node));
        }
        false
    }

    /// Neither node can reach the other.
    pub fn independent(&self, a: NodeId, b: NodeId) -> bool {
        a != b && !self.has_path(a, b) && !self.has_path(b, a)
    }

    /// Every path from `from` backwards along dependencies to `to`, as
    /// `[from, ..., to]`. Returns `None` once more than `max_paths` paths
    /// (or a proportional amount of search work) would be needed.
    pub fn iterate_paths(&self, from: NodeId, to: NodeId, max_paths: usize) -> Option<Vec<Vec<NodeId>>> {
        let mut paths = Vec::new();
        let mut budget = max_paths.saturating_mul(self.nodes.len().max(1));
        let mut path = vec![from];
        // Stack of (node, next dependency to try).
        let mut stack: Vec<(NodeId, usize)> = vec![(from, 0)];

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let depends = &self.nodes[node.index()].depends;
            if next >= depends.len() {
                stack.pop();
                path.pop();
                continue;
            }
            top.1 += 1;
            let dep = depends[next].node;

            budget = budget.checked_sub(1)?;
            if dep == to {
                let mut found = path.clone();
                found.push(to);
                paths.push(found);
                if paths.len() > max_paths {
                    return None;
                }
                continue;
            }
            // Edges run forward in program order before relaxation, so
            // nodes in front of `to` cannot reach it.
            if dep < to || path.contains(&dep) {
                continue;
            }
            path.push(dep);
            stack.push((dep, 0));
        }
        Some(paths)
    }

    // -------------------------------------------------------------------------
    // Relaxed guards
    // -------------------------------------------------------------------------

    /// Move every relaxed guard in front of the early exit.
    ///
    /// The data inputs of a relaxed guard that were fed by the early exit
    /// are re-rooted at the label, the guard is ordered before the early
    /// exit and before every side effect. Returns `false` when a guard
    /// depends on something impure, in which case it cannot move.
    pub fn pull_up_relaxed_guards(&mut self) -> bool {
        let (Some(label), Some(ee)) = (self.label(), self.early_exit) else {
            return true;
        };
        let relaxed: Vec<NodeId> = self
            .guards
            .iter()
            .copied()
            .filter(|&g| self.node(g).is_relaxed())
            .collect();
        let effects: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.has_side_effects())
            .map(Node::id)
            .collect();

        for guard in relaxed {
            let mut visited = FxHashSet::default();
            let mut to_pull: SmallVec<[NodeId; 4]> = SmallVec::new();
            let mut stack = vec![guard];
            while let Some(n) = stack.pop() {
                if !visited.insert(n) {
                    continue;
                }
                if n != guard && !self.node(n).opcode().is_always_pure() {
                    return false;
                }
                for edge in self.node(n).depends() {
                    if edge.kind != EdgeKind::Data || edge.node == label {
                        continue;
                    }
                    if edge.node == ee {
                        to_pull.push(n);
                    } else {
                        stack.push(edge.node);
                    }
                }
            }
            for n in to_pull {
                self.remove_edge_to(ee, n);
                self.edge_to(label, n, EdgeKind::Pullup);
            }
            for &n in &visited {
                let node = self.node_mut(n);
                node.priority = node.priority.max(10);
            }
            self.edge_to(guard, ee, EdgeKind::Pullup);
            for &s in &effects {
                self.edge_to(guard, s, EdgeKind::Pullup);
            }
        }
        true
    }

    /// Whether a relaxed guard may be placed before side effects: it and
    /// its whole data cone up to the label or early exit must be pure.
    pub fn has_pure_cone(&self, guard: NodeId) -> bool {
        let stop = |n: NodeId| Some(n) == self.label() || Some(n) == self.early_exit;
        let mut visited = FxHashSet::default();
        let mut stack: Vec<NodeId> = self
            .node(guard)
            .depends()
            .iter()
            .filter(|e| e.kind == EdgeKind::Data)
            .map(|e| e.node)
            .collect();
        while let Some(n) = stack.pop() {
            if stop(n) || !visited.insert(n) {
                continue;
            }
            if !self.node(n).opcode().is_always_pure() {
                return false;
            }
            stack.extend(
                self.node(n)
                    .depends()
                    .iter()
                    .filter(|e| e.kind == EdgeKind::Data)
                    .map(|e| e.node),
            );
        }
        true
    }

    /// Turn `guard` into a relaxed guard resuming with `snapshot_of`'s
    /// resume state.
    pub fn relax_guard(&mut self, guard: NodeId, snapshot_of: NodeId) {
        let snapshot = self.node(snapshot_of).op().snapshot.clone();
        let op = self.node_mut(guard).op_mut();
        op.descr = Some(GuardDescr::new(ResumeKind::AtLoopHeader).into());
        op.snapshot = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArrayDescr, CallDescr, TraceBuilder, Value};

    /// `a[i] = b[i] + c[i]` with an early exit.
    fn simple_loop() -> Vec<Operation> {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let (pa, pb, pc) = (b.ptr(), b.ptr(), b.ptr());
        let n = b.int();
        let d = ArrayDescr::ints(1, 4);
        let all = [i0.into(), pa.into(), pb.into(), pc.into(), n.into()];
        b.label(&[i0, pa, pb, pc, n], 1);
        b.guard(Opcode::GuardEarlyExit, &[], &all);
        let x = b.load(Opcode::GetarrayitemRaw, &[pb.into(), i0.into()], &d);
        let y = b.load(Opcode::GetarrayitemRaw, &[pc.into(), i0.into()], &d);
        let s = b.pure(Opcode::IntAdd, &[x.into(), y.into()]);
        b.store(Opcode::SetarrayitemRaw, &[pa.into(), i0.into(), s.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        let c = b.pure(Opcode::IntLt, &[i1.into(), n.into()]);
        b.guard(
            Opcode::GuardTrue,
            &[c.into()],
            &[i1.into(), pa.into(), pb.into(), pc.into(), n.into()],
        );
        b.jump(&[i1.into(), pa.into(), pb.into(), pc.into(), n.into()], 1);
        b.build().ops
    }

    fn id(i: u32) -> NodeId {
        NodeId(i)
    }

    #[test]
    fn test_data_edges() {
        let graph = DependencyGraph::new(simple_loop());
        assert_eq!(graph.len(), 10);
        assert_eq!(graph.early_exit(), Some(id(1)));
        // int_add(x, y) reads both loads.
        assert_eq!(graph.edge_kind(id(2), id(4)), Some(EdgeKind::Data));
        assert_eq!(graph.edge_kind(id(3), id(4)), Some(EdgeKind::Data));
        // The early exit redefines the label boxes.
        assert_eq!(graph.edge_kind(id(1), id(2)), Some(EdgeKind::Data));
        assert!(!graph.node(id(2)).depends_on(id(0)));
    }

    #[test]
    fn test_guard_edges() {
        let graph = DependencyGraph::new(simple_loop());
        assert_eq!(graph.guards(), &[id(1), id(8)]);
        // Store before the guard.
        assert_eq!(graph.edge_kind(id(5), id(8)), Some(EdgeKind::SideEffect));
        // The guard's snapshot names i1.
        assert_eq!(graph.edge_kind(id(6), id(8)), Some(EdgeKind::Snapshot));
        // Sinks feed the jump.
        assert_eq!(graph.edge_kind(id(8), id(9)), Some(EdgeKind::Jump));
    }

    #[test]
    fn test_distinct_arrays_same_index_ordered() {
        let graph = DependencyGraph::new(simple_loop());
        assert_eq!(graph.memory_refs(), &[id(2), id(3), id(5)]);
        assert_eq!(graph.edge_kind(id(2), id(5)), Some(EdgeKind::Memory));
        assert_eq!(graph.edge_kind(id(3), id(5)), Some(EdgeKind::Memory));
    }

    #[test]
    fn test_store_orders_load_through_other_array() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let (pa, pc) = (b.ptr(), b.ptr());
        let d = ArrayDescr::ints(1, 4);
        b.label(&[i0, pa, pc], 1);
        b.store(Opcode::SetarrayitemRaw, &[pc.into(), i0.into(), Value::int(7)], &d);
        b.load(Opcode::GetarrayitemRaw, &[pa.into(), i0.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        b.load(Opcode::GetarrayitemRaw, &[pa.into(), i1.into()], &d);
        b.jump(&[i1.into(), pa.into(), pc.into()], 1);
        let graph = DependencyGraph::new(b.build().ops);

        assert_eq!(graph.edge_kind(id(1), id(2)), Some(EdgeKind::Memory));
        assert!(graph.edge_kind(id(1), id(4)).is_none());
    }

    #[test]
    fn test_store_orders_aliasing_load() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let pa = b.ptr();
        let d = ArrayDescr::ints(1, 8);
        b.label(&[i0, pa], 1);
        b.store(Opcode::SetarrayitemRaw, &[pa.into(), i0.into(), Value::int(7)], &d);
        b.load(Opcode::GetarrayitemRaw, &[pa.into(), i0.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        b.load(Opcode::GetarrayitemRaw, &[pa.into(), i1.into()], &d);
        b.jump(&[i1.into(), pa.into()], 1);
        let graph = DependencyGraph::new(b.build().ops);

        assert_eq!(graph.edge_kind(id(1), id(2)), Some(EdgeKind::Memory));
        assert!(graph.edge_kind(id(1), id(4)).is_none());
    }

    #[test]
    fn test_call_is_memory_barrier() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let pa = b.ptr();
        let d = ArrayDescr::ints(1, 8);
        b.label(&[i0, pa], 1);
        b.call(Opcode::Call, &[Value::int(0x100)], &CallDescr::plain(), None);
        b.load(Opcode::GetarrayitemRaw, &[pa.into(), i0.into()], &d);
        b.jump(&[i0.into(), pa.into()], 1);
        let graph = DependencyGraph::new(b.build().ops);

        assert_eq!(graph.edge_kind(id(1), id(2)), Some(EdgeKind::Memory));
    }

    #[test]
    fn test_independent() {
        let graph = DependencyGraph::new(simple_loop());
        assert!(graph.independent(id(2), id(3)));
        assert!(!graph.independent(id(2), id(5)));
        assert!(!graph.independent(id(4), id(4)));
    }

    #[test]
    fn test_iterate_paths() {
        let graph = DependencyGraph::new(simple_loop());
        let paths = graph.iterate_paths(id(8), id(1), 64).unwrap();
        assert!(paths.iter().all(|p| p.first() == Some(&id(8)) && p.last() == Some(&id(1))));
        assert!(paths.contains(&vec![id(8), id(7), id(6), id(1)]));
        assert!(paths.contains(&vec![id(8), id(1)]));
        assert!(graph.iterate_paths(id(8), id(1), 1).is_none());
    }

    #[test]
    fn test_relax_guard() {
        let mut graph = DependencyGraph::new(simple_loop());
        graph.relax_guard(id(8), id(1));
        assert!(graph.node(id(8)).is_relaxed());
        assert_eq!(
            graph.node(id(8)).op().snapshot,
            graph.node(id(1)).op().snapshot
        );
        assert!(graph.has_pure_cone(id(8)));
    }

    #[test]
    fn test_pull_up_relaxed_guards() {
        let mut ops = simple_loop();
        ops[8].descr = Some(GuardDescr::new(ResumeKind::AtLoopHeader).into());
        let mut graph = DependencyGraph::new(ops);
        // Not chained behind the early exit.
        assert!(graph.edge_kind(id(1), id(8)).is_none());

        assert!(graph.pull_up_relaxed_guards());
        assert_eq!(graph.edge_kind(id(8), id(1)), Some(EdgeKind::Pullup));
        assert_eq!(graph.edge_kind(id(8), id(5)), Some(EdgeKind::Pullup));
        // int_lt(i1, n) read n from the early exit; now rooted at the label.
        assert_eq!(graph.edge_kind(id(0), id(7)), Some(EdgeKind::Pullup));
        assert!(graph.edge_kind(id(1), id(7)).is_none());
        assert!(graph.node(id(6)).priority >= 10);
    }

    #[test]
    fn test_pull_up_rejects_impure_cone() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let pa = b.ptr();
        let d = ArrayDescr::ints(1, 8);
        b.label(&[i0, pa], 1);
        b.guard(Opcode::GuardEarlyExit, &[], &[i0.into(), pa.into()]);
        let x = b.load(Opcode::GetarrayitemRaw, &[pa.into(), i0.into()], &d);
        b.push(
            Operation::new(Opcode::GuardTrue, [x.into()], None)
                .with_descr(GuardDescr::new(ResumeKind::AtLoopHeader)),
        );
        b.jump(&[i0.into(), pa.into()], 1);
        let mut graph = DependencyGraph::new(b.build().ops);
        assert!(!graph.has_pure_cone(id(3)));
        assert!(!graph.pull_up_relaxed_guards());
    }
}
