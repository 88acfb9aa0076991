//! Traces and a builder for writing them by hand.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::descr::{ArrayDescr, CallDescr, Descr, GuardDescr, TargetToken};
use super::opcode::{Opcode, ResultClass};
use super::operation::Operation;
use super::snapshot::Snapshot;
use super::value::{Const, ConstKey, Value, ValueType, Var, VarAllocator};

/// Results of pure calls observed while recording, keyed by the constant
/// arguments (call target included).
pub type CallPureResults = FxHashMap<Vec<ConstKey>, Const>;

/// A linear sequence of operations, optionally a loop
/// (`LABEL ... JUMP`).
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub ops: Vec<Operation>,
    pub vars: VarAllocator,
    pub call_pure_results: CallPureResults,
}

impl Trace {
    /// Wrap `ops`, reserving every box id they mention.
    pub fn from_ops(ops: Vec<Operation>) -> Self {
        let mut vars = VarAllocator::default();
        for op in &ops {
            if let Some(r) = op.result {
                vars.reserve(r);
            }
            for v in op.uses() {
                if let Some(var) = v.var() {
                    vars.reserve(var);
                }
            }
        }
        Self {
            ops,
            vars,
            call_pure_results: CallPureResults::default(),
        }
    }

    /// Same allocator and call results, different operations.
    pub fn with_ops(&self, ops: Vec<Operation>) -> Self {
        Self {
            ops,
            vars: self.vars.clone(),
            call_pure_results: self.call_pure_results.clone(),
        }
    }

    pub fn record_call_pure_result(&mut self, args: &[Const], result: Const) {
        let key = args.iter().map(|&c| ConstKey(c)).collect();
        self.call_pure_results.insert(key, result);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// `LABEL ... JUMP` or `LABEL ... LABEL`.
    pub fn is_loop(&self) -> bool {
        match (self.ops.first(), self.ops.last()) {
            (Some(first), Some(last)) if self.ops.len() >= 2 => {
                first.opcode == Opcode::Label
                    && matches!(last.opcode, Opcode::Jump | Opcode::Label)
            }
            _ => false,
        }
    }

    pub fn count(&self, opcode: Opcode) -> usize {
        self.ops.iter().filter(|op| op.opcode == opcode).count()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Incremental trace construction, mostly for tests and benchmarks.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    ops: Vec<Operation>,
    vars: VarAllocator,
    call_pure_results: CallPureResults,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// New input box.
    pub fn input(&mut self, ty: ValueType) -> Var {
        self.vars.fresh(ty)
    }

    pub fn int(&mut self) -> Var {
        self.input(ValueType::Int)
    }

    pub fn float(&mut self) -> Var {
        self.input(ValueType::Float)
    }

    pub fn ptr(&mut self) -> Var {
        self.input(ValueType::Ref)
    }

    /// Append a prepared operation.
    pub fn push(&mut self, op: Operation) {
        if let Some(r) = op.result {
            self.vars.reserve(r);
        }
        self.ops.push(op);
    }

    pub fn label(&mut self, args: &[Var], token: u32) {
        self.push(
            Operation::new(Opcode::Label, args.iter().map(|&v| Value::Var(v)), None)
                .with_descr(Descr::Target(TargetToken(token))),
        );
    }

    pub fn jump(&mut self, args: &[Value], token: u32) {
        self.push(
            Operation::new(Opcode::Jump, args.iter().copied(), None)
                .with_descr(Descr::Target(TargetToken(token))),
        );
    }

    /// Operation whose result type follows from its opcode. Returns the
    /// result box, or `None` for void opcodes.
    pub fn op(&mut self, opcode: Opcode, args: &[Value]) -> Option<Var> {
        let ty = match opcode.result_class() {
            ResultClass::Int => Some(ValueType::Int),
            ResultClass::Float => Some(ValueType::Float),
            ResultClass::Ref => Some(ValueType::Ref),
            ResultClass::Void => None,
            ResultClass::FromDescr | ResultClass::Explicit => {
                panic!("{} needs an explicit result type", opcode)
            }
        };
        let result = ty.map(|t| self.vars.fresh(t));
        self.push(Operation::new(opcode, args.iter().copied(), result));
        result
    }

    /// Pure integer/float operation with a result.
    pub fn pure(&mut self, opcode: Opcode, args: &[Value]) -> Var {
        match self.op(opcode, args) {
            Some(v) => v,
            None => panic!("{} has no result", opcode),
        }
    }

    /// Operation with an explicit result type.
    pub fn typed(&mut self, opcode: Opcode, args: &[Value], ty: ValueType) -> Var {
        let result = self.vars.fresh(ty);
        self.push(Operation::new(opcode, args.iter().copied(), Some(result)));
        result
    }

    pub fn load(&mut self, opcode: Opcode, args: &[Value], descr: &Arc<ArrayDescr>) -> Var {
        let result = self.vars.fresh(descr.item_type());
        self.push(
            Operation::new(opcode, args.iter().copied(), Some(result))
                .with_descr(Descr::Array(Arc::clone(descr))),
        );
        result
    }

    pub fn store(&mut self, opcode: Opcode, args: &[Value], descr: &Arc<ArrayDescr>) {
        self.push(
            Operation::new(opcode, args.iter().copied(), None).with_descr(Descr::Array(Arc::clone(descr))),
        );
    }

    pub fn call(
        &mut self,
        opcode: Opcode,
        args: &[Value],
        descr: &Arc<CallDescr>,
        ty: Option<ValueType>,
    ) -> Option<Var> {
        let result = ty.map(|t| self.vars.fresh(t));
        self.push(
            Operation::new(opcode, args.iter().copied(), result).with_descr(Descr::Call(Arc::clone(descr))),
        );
        result
    }

    /// Guard with a single-frame snapshot.
    pub fn guard(&mut self, opcode: Opcode, args: &[Value], fail_args: &[Value]) {
        self.push(
            Operation::new(opcode, args.iter().copied(), None)
                .with_descr(Descr::Guard(GuardDescr::default()))
                .with_snapshot(Snapshot::root(fail_args.iter().copied())),
        );
    }

    pub fn record_call_pure_result(&mut self, args: &[Const], result: Const) {
        let key = args.iter().map(|&c| ConstKey(c)).collect();
        self.call_pure_results.insert(key, result);
    }

    pub fn build(self) -> Trace {
        Trace {
            ops: self.ops,
            vars: self.vars,
            call_pure_results: self.call_pure_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_loop_shape() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        b.label(&[i0], 0);
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        b.jump(&[i1.into()], 0);
        let trace = b.build();
        assert!(trace.is_loop());
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.count(Opcode::IntAdd), 1);
    }

    #[test]
    fn test_from_ops_reserves_ids() {
        let a = Var::new(7, ValueType::Int);
        let ops = vec![Operation::new(Opcode::Label, [Value::Var(a)], None)];
        let mut trace = Trace::from_ops(ops);
        assert_eq!(trace.vars.fresh(ValueType::Int).id(), 8);
        assert!(!trace.is_loop());
    }

    #[test]
    fn test_display_lists_ops() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        b.label(&[i0], 0);
        b.jump(&[i0.into()], 0);
        assert_eq!(b.build().to_string(), "label(i0)\njump(i0)\n");
    }
}
