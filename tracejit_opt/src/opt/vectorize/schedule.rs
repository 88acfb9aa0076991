//! List scheduling over a [`DependencyGraph`].
//!
//! A node becomes ready once every node it depends on has been emitted.
//! Among ready nodes the highest priority wins, then program order. A
//! packed node is only ready together with the rest of its pack, and the
//! whole pack is emitted as one group.

use super::dependency::{DependencyGraph, NodeId};
use super::packset::Pack;

/// One scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// A scalar operation.
    Node(NodeId),
    /// Every member of a pack, by index into the pack list.
    Pack(usize),
}

/// Ready-list scheduler state.
#[derive(Debug, Clone)]
pub struct Scheduler {
    /// Unemitted predecessors per node.
    pending: Vec<usize>,
    remaining: usize,
}

impl Scheduler {
    pub fn new(graph: &DependencyGraph) -> Self {
        let pending = graph.nodes().iter().map(|n| n.depends().len()).collect();
        let remaining = graph.nodes().iter().filter(|n| !n.emitted).count();
        Self { pending, remaining }
    }

    #[inline]
    pub fn has_more(&self) -> bool {
        self.remaining > 0
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn is_ready(&self, graph: &DependencyGraph, id: NodeId) -> bool {
        !graph.node(id).emitted && self.pending[id.index()] == 0
    }

    /// Pick and emit the next node or pack.
    ///
    /// # Panics
    ///
    /// Panics when nodes remain but none is ready, which means the graph
    /// (or the pack set) has a cycle.
    pub fn next(&mut self, graph: &mut DependencyGraph, packs: &[Pack]) -> Scheduled {
        let mut best: Option<(i32, NodeId)> = None;
        for node in graph.nodes() {
            let id = node.id();
            if !self.is_ready(graph, id) {
                continue;
            }
            if let Some(p) = node.pack {
                if !packs[p].nodes().iter().all(|&m| self.is_ready(graph, m)) {
                    continue;
                }
            }
            let better = match best {
                None => true,
                Some((prio, _)) => node.priority > prio,
            };
            if better {
                best = Some((node.priority, id));
            }
        }

        let Some((_, id)) = best else {
            panic!(
                "scheduler stuck: {} nodes left and none is ready",
                self.remaining
            );
        };
        match graph.node(id).pack {
            Some(p) => {
                for &member in packs[p].nodes() {
                    self.mark_emitted(graph, member);
                }
                Scheduled::Pack(p)
            }
            None => {
                self.mark_emitted(graph, id);
                Scheduled::Node(id)
            }
        }
    }

    fn mark_emitted(&mut self, graph: &mut DependencyGraph, id: NodeId) {
        graph.node_mut(id).emitted = true;
        self.remaining -= 1;
        for edge in graph.node(id).provides() {
            let pending = &mut self.pending[edge.node.index()];
            *pending = pending.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, TraceBuilder, Value};

    fn drain(graph: &mut DependencyGraph, packs: &[Pack]) -> Vec<Scheduled> {
        let mut scheduler = Scheduler::new(graph);
        let mut out = Vec::new();
        while scheduler.has_more() {
            out.push(scheduler.next(graph, packs));
        }
        out
    }

    fn chain() -> DependencyGraph {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        b.label(&[i0], 1);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        let i2 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(2)]);
        let i3 = b.pure(Opcode::IntAdd, &[i1.into(), i2.into()]);
        b.jump(&[i3.into()], 1);
        DependencyGraph::new(b.build().ops)
    }

    #[test]
    fn test_program_order_without_priorities() {
        let mut graph = chain();
        let order = drain(&mut graph, &[]);
        let ids: Vec<u32> = order
            .iter()
            .map(|s| match s {
                Scheduled::Node(id) => id.0,
                Scheduled::Pack(_) => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_priority_wins() {
        let mut graph = chain();
        graph.node_mut(NodeId(2)).priority = 10;
        let order = drain(&mut graph, &[]);
        assert_eq!(order[1], Scheduled::Node(NodeId(2)));
        assert_eq!(order[2], Scheduled::Node(NodeId(1)));
    }

    #[test]
    fn test_pack_emitted_as_group() {
        let mut graph = chain();
        let packs = vec![Pack::pair(NodeId(1), NodeId(2))];
        graph.node_mut(NodeId(1)).pack = Some(0);
        graph.node_mut(NodeId(2)).pack = Some(0);
        let order = drain(&mut graph, &packs);
        assert_eq!(
            order,
            vec![
                Scheduled::Node(NodeId(0)),
                Scheduled::Pack(0),
                Scheduled::Node(NodeId(3)),
                Scheduled::Node(NodeId(4)),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "scheduler stuck")]
    fn test_cyclic_pack_panics() {
        let mut graph = chain();
        // i1 and i3 depend on each other through the pack.
        let packs = vec![Pack::pair(NodeId(1), NodeId(3))];
        graph.node_mut(NodeId(1)).pack = Some(0);
        graph.node_mut(NodeId(3)).pack = Some(0);
        drain(&mut graph, &packs);
    }
}
