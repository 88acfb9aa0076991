//! Memo table of pure operations.
//!
//! Every emitted pure operation is recorded under its opcode and canonical
//! arguments, so a later identical operation can reuse the earlier result.
//! Some operations also imply other identities ("reverse forms"): after
//! `r = a + b`, both `r - b` and `r - a` are already known.

use smallvec::SmallVec;

use rustc_hash::FxHashMap;

use crate::ir::{Opcode, Operation, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PureKey {
    opcode: Opcode,
    args: SmallVec<[Value; 2]>,
}

impl PureKey {
    fn new(opcode: Opcode, args: &[Value]) -> Self {
        Self {
            opcode,
            args: args.iter().copied().collect(),
        }
    }
}

/// Results of pure operations, keyed by opcode and arguments.
#[derive(Debug, Clone, Default)]
pub struct PureCache {
    results: FxHashMap<PureKey, Value>,
}

impl PureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, opcode: Opcode, args: &[Value]) -> Option<Value> {
        self.results.get(&PureKey::new(opcode, args)).copied()
    }

    /// Remember `opcode(args) == result`. An existing entry wins.
    pub fn record(&mut self, opcode: Opcode, args: &[Value], result: Value) {
        self.results.entry(PureKey::new(opcode, args)).or_insert(result);
    }

    /// Record the identities implied by an emitted operation.
    pub fn record_reverse(&mut self, op: &Operation) {
        let Some(res) = op.result else {
            return;
        };
        let r = Value::Var(res);
        match op.opcode {
            Opcode::IntAdd => {
                let (a, b) = (op.arg(0), op.arg(1));
                self.record(Opcode::IntAdd, &[b, a], r);
                self.record(Opcode::IntSub, &[r, b], a);
                self.record(Opcode::IntSub, &[r, a], b);
                if let Some(neg) = negated_constant(b) {
                    self.record(Opcode::IntSub, &[a, neg], r);
                }
                if let Some(neg) = negated_constant(a) {
                    self.record(Opcode::IntSub, &[b, neg], r);
                }
            }
            Opcode::IntSub => {
                let (a, b) = (op.arg(0), op.arg(1));
                self.record(Opcode::IntAdd, &[r, b], a);
                self.record(Opcode::IntAdd, &[b, r], a);
                self.record(Opcode::IntSub, &[a, r], b);
                if let Some(neg) = negated_constant(b) {
                    self.record(Opcode::IntAdd, &[a, neg], r);
                    self.record(Opcode::IntAdd, &[neg, a], r);
                }
            }
            Opcode::IntMul | Opcode::IntAnd | Opcode::IntOr | Opcode::IntXor
            | Opcode::FloatAdd | Opcode::FloatMul => {
                self.record(op.opcode, &[op.arg(1), op.arg(0)], r);
            }
            Opcode::FloatSub => {
                let (a, b) = (op.arg(0), op.arg(1));
                if let Some(neg_b) = self.lookup(Opcode::FloatNeg, &[b]) {
                    self.record(Opcode::FloatAdd, &[a, neg_b], r);
                    self.record(Opcode::FloatAdd, &[neg_b, a], r);
                }
            }
            Opcode::FloatNeg | Opcode::IntNeg | Opcode::IntInvert => {
                self.record(op.opcode, &[r], op.arg(0));
            }
            Opcode::CastPtrToInt => self.record(Opcode::CastIntToPtr, &[r], op.arg(0)),
            Opcode::CastIntToPtr => self.record(Opcode::CastPtrToInt, &[r], op.arg(0)),
            _ => {}
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

fn negated_constant(v: Value) -> Option<Value> {
    v.constant()
        .and_then(|c| c.as_int())
        .and_then(i64::checked_neg)
        .map(Value::int)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ValueType, Var};

    fn ivar(id: u32) -> Var {
        Var::new(id, ValueType::Int)
    }

    #[test]
    fn test_lookup_after_record() {
        let mut cache = PureCache::new();
        let args = [Value::Var(ivar(0)), Value::int(1)];
        cache.record(Opcode::IntAdd, &args, Value::Var(ivar(1)));
        assert_eq!(cache.lookup(Opcode::IntAdd, &args), Some(Value::Var(ivar(1))));
        assert_eq!(cache.lookup(Opcode::IntSub, &args), None);
    }

    #[test]
    fn test_first_record_wins() {
        let mut cache = PureCache::new();
        let args = [Value::Var(ivar(0))];
        cache.record(Opcode::IntNeg, &args, Value::Var(ivar(1)));
        cache.record(Opcode::IntNeg, &args, Value::Var(ivar(2)));
        assert_eq!(cache.lookup(Opcode::IntNeg, &args), Some(Value::Var(ivar(1))));
    }

    #[test]
    fn test_int_add_reverse_forms() {
        let (a, b, r) = (ivar(0), ivar(1), ivar(2));
        let op = Operation::new(Opcode::IntAdd, [a.into(), b.into()], Some(r));
        let mut cache = PureCache::new();
        cache.record_reverse(&op);
        assert_eq!(cache.lookup(Opcode::IntSub, &[r.into(), b.into()]), Some(a.into()));
        assert_eq!(cache.lookup(Opcode::IntSub, &[r.into(), a.into()]), Some(b.into()));
        assert_eq!(cache.lookup(Opcode::IntAdd, &[b.into(), a.into()]), Some(r.into()));
    }

    #[test]
    fn test_int_sub_constant_reverse() {
        let (a, r) = (ivar(0), ivar(1));
        let op = Operation::new(Opcode::IntSub, [a.into(), Value::int(3)], Some(r));
        let mut cache = PureCache::new();
        cache.record_reverse(&op);
        assert_eq!(cache.lookup(Opcode::IntAdd, &[a.into(), Value::int(-3)]), Some(r.into()));
        assert_eq!(cache.lookup(Opcode::IntAdd, &[r.into(), Value::int(3)]), Some(a.into()));
    }

    #[test]
    fn test_float_sub_needs_known_negation() {
        let a = Var::new(0, ValueType::Float);
        let b = Var::new(1, ValueType::Float);
        let r = Var::new(2, ValueType::Float);
        let nb = Var::new(3, ValueType::Float);
        let sub = Operation::new(Opcode::FloatSub, [a.into(), b.into()], Some(r));

        let mut cache = PureCache::new();
        cache.record_reverse(&sub);
        assert!(cache.is_empty());

        cache.record(Opcode::FloatNeg, &[b.into()], nb.into());
        cache.record_reverse(&sub);
        assert_eq!(cache.lookup(Opcode::FloatAdd, &[a.into(), nb.into()]), Some(r.into()));
    }
}
