//! Resume snapshots.
//!
//! A snapshot lists the boxes the interpreter needs to rebuild its frames
//! when a guard fails. Frames form a chain through `prev`; chains are
//! shared between guards, so renaming only copies the frames that change.

use std::sync::Arc;

use smallvec::SmallVec;

use super::value::Value;

/// One frame of resume state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    prev: Option<Arc<Snapshot>>,
    boxes: SmallVec<[Value; 8]>,
}

impl Snapshot {
    pub fn new(prev: Option<Arc<Snapshot>>, boxes: impl IntoIterator<Item = Value>) -> Arc<Self> {
        Arc::new(Self {
            prev,
            boxes: boxes.into_iter().collect(),
        })
    }

    /// Single-frame snapshot.
    pub fn root(boxes: impl IntoIterator<Item = Value>) -> Arc<Self> {
        Self::new(None, boxes)
    }

    #[inline]
    pub fn prev(&self) -> Option<&Arc<Snapshot>> {
        self.prev.as_ref()
    }

    /// Boxes of this frame only.
    #[inline]
    pub fn boxes(&self) -> &[Value] {
        &self.boxes
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        1 + self.prev.as_ref().map_or(0, |p| p.depth())
    }

    /// All boxes of the chain, innermost frame first.
    pub fn values(&self) -> SnapshotValues<'_> {
        SnapshotValues {
            frame: Some(self),
            idx: 0,
        }
    }

    pub fn contains(&self, value: Value) -> bool {
        self.values().any(|v| v == value)
    }

    /// Rewrite every box through `map`. Frames whose boxes are unchanged
    /// are shared with `this`.
    pub fn rename(this: &Arc<Snapshot>, map: &mut dyn FnMut(Value) -> Value) -> Arc<Snapshot> {
        let prev = this.prev.as_ref().map(|p| Snapshot::rename(p, map));
        let mut changed = match (&prev, &this.prev) {
            (Some(new), Some(old)) => !Arc::ptr_eq(new, old),
            _ => false,
        };
        let mut boxes = SmallVec::with_capacity(this.boxes.len());
        for &b in &this.boxes {
            let renamed = map(b);
            changed |= renamed != b;
            boxes.push(renamed);
        }
        if changed {
            Arc::new(Snapshot { prev, boxes })
        } else {
            Arc::clone(this)
        }
    }
}

/// Iterator over every box of a snapshot chain.
pub struct SnapshotValues<'a> {
    frame: Option<&'a Snapshot>,
    idx: usize,
}

impl<'a> Iterator for SnapshotValues<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        loop {
            let frame = self.frame?;
            if let Some(&v) = frame.boxes.get(self.idx) {
                self.idx += 1;
                return Some(v);
            }
            self.frame = frame.prev.as_deref();
            self.idx = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::{ValueType, Var};

    fn int(id: u32) -> Value {
        Value::Var(Var::new(id, ValueType::Int))
    }

    #[test]
    fn test_values_walks_all_frames() {
        let outer = Snapshot::root([int(0), int(1)]);
        let inner = Snapshot::new(Some(outer), [int(2)]);
        let all: Vec<_> = inner.values().collect();
        assert_eq!(all, vec![int(2), int(0), int(1)]);
        assert_eq!(inner.depth(), 2);
        assert!(inner.contains(int(1)));
        assert!(!inner.contains(int(5)));
    }

    #[test]
    fn test_rename_shares_unchanged_frames() {
        let outer = Snapshot::root([int(0), int(1)]);
        let inner = Snapshot::new(Some(Arc::clone(&outer)), [int(2)]);
        let renamed = Snapshot::rename(&inner, &mut |v| if v == int(2) { int(9) } else { v });
        assert_eq!(renamed.boxes(), &[int(9)]);
        assert!(Arc::ptr_eq(renamed.prev().unwrap(), &outer));
    }

    #[test]
    fn test_rename_identity_returns_same_chain() {
        let snap = Snapshot::root([int(0)]);
        let renamed = Snapshot::rename(&snap, &mut |v| v);
        assert!(Arc::ptr_eq(&snap, &renamed));
    }

    #[test]
    fn test_rename_outer_frame_copies_inner() {
        let outer = Snapshot::root([int(0)]);
        let inner = Snapshot::new(Some(outer), [int(2)]);
        let renamed = Snapshot::rename(&inner, &mut |v| if v == int(0) { Value::int(7) } else { v });
        let all: Vec<_> = renamed.values().collect();
        assert_eq!(all, vec![int(2), Value::int(7)]);
    }
}
