//! Packs of isomorphic, independent operations.
//!
//! Packing follows the superword-level parallelism scheme:
//!
//! 1. **Seed**: pairs of adjacent memory accesses.
//! 2. **Extend**: follow use-def and def-use chains from existing pairs.
//! 3. **Combine**: merge pairs `(a, b)` and `(b, c)` into `(a, b, c)`.
//!
//! Each node ends up in at most one pack, and the packs are checked to
//! leave the graph schedulable.

use std::fmt;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::cpu::Cpu;
use crate::ir::{ArrayDescr, ElemKind, ItemKind, Operation, Value, ValueType, VectorSpec};
use crate::opt::error::{NotVectorizable, OptResult};

use super::dependency::{DependencyGraph, NodeId};

// =============================================================================
// Pack Type
// =============================================================================

/// Lane element kind of a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackKind {
    Int,
    Float,
    /// Not decided yet; taken from the operands.
    Unknown,
}

/// Lane type of a pack. A `size` of `0` means "same as the pack".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackType {
    pub kind: PackKind,
    pub size: usize,
    pub signed: bool,
}

impl PackType {
    pub const UNKNOWN: PackType = PackType::new(PackKind::Unknown, 0, true);
    pub const INT_GENERIC: PackType = PackType::new(PackKind::Int, 0, true);
    pub const FLOAT_GENERIC: PackType = PackType::new(PackKind::Float, 0, true);
    pub const SINGLE_FLOAT: PackType = PackType::new(PackKind::Float, 4, true);
    pub const DOUBLE: PackType = PackType::new(PackKind::Float, 8, true);
    pub const INT64: PackType = PackType::new(PackKind::Int, 8, true);

    #[inline]
    pub const fn new(kind: PackKind, size: usize, signed: bool) -> Self {
        Self { kind, size, signed }
    }

    /// Lane type of the items an array descriptor describes.
    pub fn by_descr(descr: &ArrayDescr) -> Self {
        let kind = match descr.kind {
            _ if descr.is_struct => PackKind::Unknown,
            ItemKind::Float => PackKind::Float,
            ItemKind::Int => PackKind::Int,
            ItemKind::Ref => PackKind::Unknown,
        };
        Self::new(kind, descr.item_size, descr.signed)
    }

    /// Lane type of a vector box.
    pub fn of_vector(spec: VectorSpec) -> Self {
        let kind = match spec.kind {
            ElemKind::Int => PackKind::Int,
            ElemKind::Float => PackKind::Float,
        };
        Self::new(kind, spec.item_size as usize, spec.signed)
    }

    /// Both kind and size are known.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.kind != PackKind::Unknown && self.size > 0
    }

    /// Fill in what `self` leaves open from the pack's type.
    pub fn resolve(self, pack: PackType) -> PackType {
        let mut out = self;
        if out.kind == PackKind::Unknown {
            out.kind = pack.kind;
            out.signed = pack.signed;
        }
        if out.size == 0 {
            out.size = pack.size;
            out.signed = pack.signed;
        }
        out
    }

    /// Widen to cover the lanes of an input vector.
    pub fn record_vector(&mut self, spec: VectorSpec) {
        let input = PackType::of_vector(spec);
        if self.kind == PackKind::Unknown {
            self.kind = input.kind;
            self.signed = input.signed;
        }
        self.size = self.size.max(input.size);
    }

    /// Vector box shape holding `count` lanes of this type.
    pub fn vector_spec(&self, count: usize) -> VectorSpec {
        let kind = match self.kind {
            PackKind::Float => ElemKind::Float,
            PackKind::Int | PackKind::Unknown => ElemKind::Int,
        };
        VectorSpec::new(kind, count as u16, self.size as u8, self.signed)
    }

    pub fn vector_type(&self, count: usize) -> ValueType {
        ValueType::Vector(self.vector_spec(count))
    }
}

impl fmt::Display for PackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let k = match self.kind {
            PackKind::Int => 'i',
            PackKind::Float => 'f',
            PackKind::Unknown => '?',
        };
        write!(f, "{}{}", k, self.size * 8)
    }
}

// =============================================================================
// Pack
// =============================================================================

/// Operations executed as the lanes of one vector operation, in lane
/// order. A pack of two is a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    nodes: SmallVec<[NodeId; 8]>,
    ptype: Option<PackType>,
}

impl Pack {
    pub fn pair(left: NodeId, right: NodeId) -> Self {
        Self {
            nodes: SmallVec::from_slice(&[left, right]),
            ptype: None,
        }
    }

    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn is_pair(&self) -> bool {
        self.nodes.len() == 2
    }

    /// First lane.
    #[inline]
    pub fn left(&self) -> NodeId {
        self.nodes[0]
    }

    /// Second lane of a pair, last lane otherwise.
    #[inline]
    pub fn right(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    #[inline]
    pub fn ptype(&self) -> Option<PackType> {
        self.ptype
    }

    #[inline]
    pub fn set_ptype(&mut self, ptype: PackType) {
        self.ptype = Some(ptype);
    }

    /// `self` ends where `other` starts.
    pub fn rightmost_match_leftmost(&self, other: &Pack) -> bool {
        self.right() == other.left()
    }

    /// Bytes the whole pack occupies; `0` while the type is unknown.
    pub fn size_in_bytes(&self) -> usize {
        self.ptype.map_or(0, |t| t.size * self.nodes.len())
    }

    /// Does not fit a single vector register.
    pub fn is_overloaded(&self, vec_reg_size: usize) -> bool {
        self.size_in_bytes() > vec_reg_size
    }

    fn append(&mut self, other: &Pack) {
        self.nodes.extend_from_slice(&other.nodes[1..]);
    }
}

impl fmt::Display for Pack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pack(")?;
        for (i, n) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "#{}", n.0)?;
        }
        f.write_str(")")
    }
}

// =============================================================================
// Pack Set
// =============================================================================

/// Every pack found in a loop body.
#[derive(Debug, Clone, Default)]
pub struct PackSet {
    packs: Vec<Pack>,
}

impl PackSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    #[inline]
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Add `(left, right)`; memory accesses get their lane type from the
    /// array descriptor.
    pub fn add_pair(&mut self, graph: &DependencyGraph, left: NodeId, right: NodeId) {
        let mut pack = Pack::pair(left, right);
        if let Some(descr) = graph.node(left).op().array_descr() {
            let ptype = PackType::by_descr(descr);
            if ptype.is_valid() {
                pack.set_ptype(ptype);
            }
        }
        self.packs.push(pack);
    }

    /// Same opcode and descriptor, a vector form on this target, no
    /// dependency between them, and neither already used on that side.
    pub fn can_be_packed(
        &self,
        graph: &DependencyGraph,
        cpu: &dyn Cpu,
        left: NodeId,
        right: NodeId,
    ) -> bool {
        let (l, r) = (graph.node(left).op(), graph.node(right).op());
        if l.opcode != r.opcode || l.descr != r.descr || l.num_args() != r.num_args() {
            return false;
        }
        if cpu.vector_equivalent(l.opcode).is_none() {
            return false;
        }
        if !graph.independent(left, right) {
            return false;
        }
        !self
            .packs
            .iter()
            .any(|p| p.left() == left || p.right() == right)
    }

    /// Cost estimate for packing `(lnode, rnode)` next to `pack`.
    pub fn estimate_savings(
        &self,
        graph: &DependencyGraph,
        cpu: &dyn Cpu,
        lnode: NodeId,
        rnode: NodeId,
        pack: usize,
    ) -> i32 {
        let pack = &self.packs[pack];
        let (lpack, rpack) = (graph.node(pack.left()).op(), graph.node(pack.right()).op());
        let (lop, rop) = (graph.node(lnode).op(), graph.node(rnode).op());
        let mut savings = -1;
        if prohibit_packing(cpu, lpack, lop) || prohibit_packing(cpu, rpack, rop) {
            return -1;
        }
        if !must_unpack_result(cpu, lpack) && !must_unpack_result(cpu, rpack) {
            savings += 1;
        }
        savings
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Pair every memory access with the access to the next item of the
    /// same array.
    pub fn find_adjacent_memory_refs(&mut self, graph: &DependencyGraph, cpu: &dyn Cpu) {
        let refs = graph.memory_refs();
        for (i, &a) in refs.iter().enumerate() {
            for &b in &refs[i + 1..] {
                let (na, nb) = (graph.node(a), graph.node(b));
                let (Some(ma), Some(mb)) = (na.memref(), nb.memref()) else {
                    continue;
                };
                if na.is_before(nb)
                    && ma.is_adjacent_after(mb)
                    && self.can_be_packed(graph, cpu, a, b)
                {
                    self.add_pair(graph, a, b);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Extension
    // -------------------------------------------------------------------------

    /// Grow the pack set along use-def and def-use chains until nothing
    /// changes.
    pub fn extend(&mut self, graph: &DependencyGraph, cpu: &dyn Cpu) {
        loop {
            let before = self.packs.len();
            let mut i = 0;
            while i < self.packs.len() {
                if self.packs[i].is_pair() {
                    self.follow_use_defs(graph, cpu, i);
                    self.follow_def_uses(graph, cpu, i);
                }
                i += 1;
            }
            if self.packs.len() == before {
                break;
            }
        }
    }

    fn follow_use_defs(&mut self, graph: &DependencyGraph, cpu: &dyn Cpu, pack: usize) {
        let (left, right) = (self.packs[pack].left(), self.packs[pack].right());
        for ldep in graph.node(left).depends() {
            for rdep in graph.node(right).depends() {
                let (lnode, rnode) = (ldep.node, rdep.node);
                if !graph.node(lnode).is_before(graph.node(rnode)) {
                    continue;
                }
                if !self.can_be_packed(graph, cpu, lnode, rnode) {
                    continue;
                }
                if self.estimate_savings(graph, cpu, lnode, rnode, pack) >= 0 {
                    self.add_pair(graph, lnode, rnode);
                }
            }
        }
    }

    fn follow_def_uses(&mut self, graph: &DependencyGraph, cpu: &dyn Cpu, pack: usize) {
        let (left, right) = (self.packs[pack].left(), self.packs[pack].right());
        let mut savings = -1;
        let mut candidate = None;
        for luse in graph.node(left).provides() {
            for ruse in graph.node(right).provides() {
                let (lnode, rnode) = (luse.node, ruse.node);
                if !graph.node(lnode).is_before(graph.node(rnode)) {
                    continue;
                }
                if !self.can_be_packed(graph, cpu, lnode, rnode) {
                    continue;
                }
                let est = self.estimate_savings(graph, cpu, lnode, rnode, pack);
                if est > savings {
                    savings = est;
                    candidate = Some((lnode, rnode));
                }
            }
        }
        if savings >= 0 {
            if let Some((l, r)) = candidate {
                self.add_pair(graph, l, r);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Combination
    // -------------------------------------------------------------------------

    /// Merge packs end to start until no merge applies, then make the packs
    /// disjoint and record each node's pack.
    pub fn combine(&mut self, graph: &mut DependencyGraph) -> OptResult<()> {
        if self.packs.is_empty() {
            return Err(NotVectorizable::NoPacks.into());
        }
        while let Some((i, j)) = self.find_mergeable(graph) {
            let other = self.packs.swap_remove(j);
            // `swap_remove` moved the last pack into slot `j`.
            let i = if i == self.packs.len() { j } else { i };
            self.packs[i].append(&other);
        }
        self.make_disjoint();
        self.assign_nodes(graph);
        if !self.is_schedulable(graph) {
            return Err(NotVectorizable::CyclicPacks.into());
        }
        Ok(())
    }

    fn find_mergeable(&self, graph: &DependencyGraph) -> Option<(usize, usize)> {
        for (i, a) in self.packs.iter().enumerate() {
            for (j, b) in self.packs.iter().enumerate() {
                if i == j || !a.rightmost_match_leftmost(b) || a.ptype != b.ptype {
                    continue;
                }
                let independent = a.nodes().iter().all(|&x| {
                    b.nodes()[1..]
                        .iter()
                        .all(|&y| x != y && graph.independent(x, y))
                });
                if independent {
                    return Some((i, j));
                }
            }
        }
        None
    }

    /// Drop packs that reuse a node claimed by an earlier pack.
    fn make_disjoint(&mut self) {
        let mut claimed = FxHashSet::default();
        self.packs.retain(|p| {
            if p.nodes().iter().any(|n| claimed.contains(n)) {
                return false;
            }
            claimed.extend(p.nodes().iter().copied());
            true
        });
    }

    fn assign_nodes(&self, graph: &mut DependencyGraph) {
        for i in 0..graph.len() {
            graph.node_mut(NodeId(i as u32)).pack = None;
        }
        for (p, pack) in self.packs.iter().enumerate() {
            for &n in pack.nodes() {
                graph.node_mut(n).pack = Some(p);
            }
        }
    }

    /// The graph with every pack contracted to one node is acyclic.
    pub fn is_schedulable(&self, graph: &DependencyGraph) -> bool {
        let n = graph.len();
        let group = |id: NodeId| graph.node(id).pack.map_or(id.index(), |p| n + p);
        let groups = n + self.packs.len();
        let mut indegree = vec![0usize; groups];
        let mut present = vec![false; groups];
        for node in graph.nodes() {
            let g = group(node.id());
            present[g] = true;
            for edge in node.provides() {
                let h = group(edge.node);
                if h != g {
                    indegree[h] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = (0..groups)
            .filter(|&g| present[g] && indegree[g] == 0)
            .collect();
        let mut visited = 0;
        let total = present.iter().filter(|&&p| p).count();
        while let Some(g) = ready.pop() {
            visited += 1;
            let members: SmallVec<[NodeId; 8]> = if g >= n {
                SmallVec::from_slice(self.packs[g - n].nodes())
            } else {
                SmallVec::from_slice(&[NodeId(g as u32)])
            };
            for m in members {
                for edge in graph.node(m).provides() {
                    let h = group(edge.node);
                    if h != g {
                        indegree[h] -= 1;
                        if indegree[h] == 0 {
                            ready.push(h);
                        }
                    }
                }
            }
        }
        visited == total
    }
}

/// `inquestion` has no vector form, or would be the index of the packed
/// array access.
fn prohibit_packing(cpu: &dyn Cpu, packed: &Operation, inquestion: &Operation) -> bool {
    if cpu.vector_equivalent(inquestion.opcode).is_none() {
        return true;
    }
    if packed.opcode.is_array_op() && packed.num_args() > 1 {
        if let Some(res) = inquestion.result {
            return packed.arg(1) == Value::Var(res);
        }
    }
    false
}

/// Result of `op` would have to be unpacked before any use.
fn must_unpack_result(cpu: &dyn Cpu, op: &Operation) -> bool {
    cpu.vector_equivalent(op.opcode).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::SimulatedCpu;
    use crate::ir::{Opcode, TraceBuilder};
    use crate::opt::error::OptError;

    /// Two unrolled iterations of `a[i] = b[i] + 1`.
    fn unrolled() -> DependencyGraph {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let (pa, pb) = (b.ptr(), b.ptr());
        let d = ArrayDescr::ints(1, 8);
        b.label(&[i0, pa, pb], 1);
        let x0 = b.load(Opcode::GetarrayitemRaw, &[pb.into(), i0.into()], &d);
        let y0 = b.pure(Opcode::IntAdd, &[x0.into(), Value::int(1)]);
        b.store(Opcode::SetarrayitemRaw, &[pa.into(), i0.into(), y0.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        let x1 = b.load(Opcode::GetarrayitemRaw, &[pb.into(), i1.into()], &d);
        let y1 = b.pure(Opcode::IntAdd, &[x1.into(), Value::int(1)]);
        b.store(Opcode::SetarrayitemRaw, &[pa.into(), i1.into(), y1.into()], &d);
        let i2 = b.pure(Opcode::IntAdd, &[i1.into(), Value::int(1)]);
        b.jump(&[i2.into(), pa.into(), pb.into()], 1);
        DependencyGraph::new(b.build().ops)
    }

    fn id(i: u32) -> NodeId {
        NodeId(i)
    }

    // -------------------------------------------------------------------------
    // Pack types
    // -------------------------------------------------------------------------

    #[test]
    fn test_pack_type_by_descr() {
        assert_eq!(
            PackType::by_descr(&ArrayDescr::ints(1, 4)),
            PackType::new(PackKind::Int, 4, true)
        );
        assert_eq!(
            PackType::by_descr(&ArrayDescr::floats(1, 8)),
            PackType::DOUBLE
        );
        assert!(!PackType::by_descr(&ArrayDescr::refs(1)).is_valid());
    }

    #[test]
    fn test_pack_type_resolve() {
        let pack = PackType::new(PackKind::Int, 2, false);
        assert_eq!(PackType::INT_GENERIC.resolve(pack), pack);
        assert_eq!(PackType::DOUBLE.resolve(pack), PackType::DOUBLE);
    }

    #[test]
    fn test_record_vector_widens() {
        let mut t = PackType::UNKNOWN;
        t.record_vector(VectorSpec::new(ElemKind::Float, 2, 8, true));
        assert_eq!(t.kind, PackKind::Float);
        assert_eq!(t.size, 8);
        t.record_vector(VectorSpec::new(ElemKind::Float, 4, 4, true));
        assert_eq!(t.size, 8);
    }

    #[test]
    fn test_overloaded() {
        let mut pack = Pack::pair(id(1), id(2));
        assert!(!pack.is_overloaded(16));
        pack.set_ptype(PackType::new(PackKind::Int, 8, true));
        assert_eq!(pack.size_in_bytes(), 16);
        assert!(!pack.is_overloaded(16));
        pack.append(&Pack::pair(id(2), id(3)));
        assert_eq!(pack.nodes(), &[id(1), id(2), id(3)]);
        assert!(pack.is_overloaded(16));
    }

    // -------------------------------------------------------------------------
    // Packing
    // -------------------------------------------------------------------------

    #[test]
    fn test_seed_pairs_in_address_order() {
        let graph = unrolled();
        let mut packs = PackSet::new();
        packs.find_adjacent_memory_refs(&graph, &SimulatedCpu::sse());
        let pairs: Vec<_> = packs.packs().iter().map(|p| (p.left(), p.right())).collect();
        assert_eq!(pairs, vec![(id(1), id(5)), (id(3), id(7))]);
        assert_eq!(packs.packs()[0].ptype(), Some(PackType::INT64));
    }

    #[test]
    fn test_extend_follows_chains() {
        let graph = unrolled();
        let cpu = SimulatedCpu::sse();
        let mut packs = PackSet::new();
        packs.find_adjacent_memory_refs(&graph, &cpu);
        packs.extend(&graph, &cpu);
        let pairs: Vec<_> = packs.packs().iter().map(|p| (p.left(), p.right())).collect();
        assert!(pairs.contains(&(id(2), id(6))));
        // The index increments depend on each other.
        assert!(!pairs.contains(&(id(4), id(8))));
    }

    #[test]
    fn test_no_vector_form_no_pack() {
        let graph = unrolled();
        let cpu = SimulatedCpu::sse().without_vector_op(Opcode::GetarrayitemRaw);
        let mut packs = PackSet::new();
        packs.find_adjacent_memory_refs(&graph, &cpu);
        assert_eq!(packs.pack_count(), 1);
        assert!(!packs.can_be_packed(&graph, &cpu, id(1), id(5)));
    }

    #[test]
    fn test_combine_empty_is_rejected() {
        let mut graph = unrolled();
        let mut packs = PackSet::new();
        let err = packs.combine(&mut graph).unwrap_err();
        assert_eq!(err, OptError::NotVectorizable(NotVectorizable::NoPacks));
    }

    #[test]
    fn test_combine_assigns_nodes() {
        let mut graph = unrolled();
        let cpu = SimulatedCpu::sse();
        let mut packs = PackSet::new();
        packs.find_adjacent_memory_refs(&graph, &cpu);
        packs.extend(&graph, &cpu);
        packs.combine(&mut graph).unwrap();
        assert_eq!(packs.pack_count(), 3);
        for (p, pack) in packs.packs().iter().enumerate() {
            for &n in pack.nodes() {
                assert_eq!(graph.node(n).pack, Some(p));
            }
        }
        assert!(packs.is_schedulable(&graph));
    }

    #[test]
    fn test_chain_of_pairs_is_merged() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let pb = b.ptr();
        let d = ArrayDescr::ints(1, 8);
        b.label(&[i0, pb], 1);
        b.load(Opcode::GetarrayitemRaw, &[pb.into(), i0.into()], &d);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        b.load(Opcode::GetarrayitemRaw, &[pb.into(), i1.into()], &d);
        let i2 = b.pure(Opcode::IntAdd, &[i1.into(), Value::int(1)]);
        b.load(Opcode::GetarrayitemRaw, &[pb.into(), i2.into()], &d);
        b.jump(&[i2.into(), pb.into()], 1);
        let mut graph = DependencyGraph::new(b.build().ops);

        let mut packs = PackSet::new();
        packs.find_adjacent_memory_refs(&graph, &SimulatedCpu::avx2());
        assert_eq!(packs.pack_count(), 2);
        packs.combine(&mut graph).unwrap();
        assert_eq!(packs.pack_count(), 1);
        assert_eq!(packs.packs()[0].nodes(), &[id(1), id(3), id(5)]);
        assert_eq!(packs.packs()[0].size_in_bytes(), 24);
    }
}
