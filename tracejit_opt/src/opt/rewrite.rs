//! Peephole rewriting.
//!
//! [`OptRewrite`] walks a trace once, front to back, and applies local
//! algebraic identities, strength reductions and guard simplifications.
//! Each operation is either dropped (its result replaced by an existing
//! value or a constant), rewritten into a cheaper form, or emitted
//! unchanged through [`Optimizer::emit_operation`].
//!
//! # Rules
//!
//! - **Identities**: `x & -1`, `x | 0`, `x + 0`, `x * 1`, `x >> 0`, ...
//! - **Strength reduction**: `x * 2^k` to a shift, `x / 2^k` on floats to a
//!   multiplication by the exact reciprocal, `0 - x` to a negation.
//! - **Boolean reuse**: a comparison whose inverse or mirrored form was
//!   already computed and decided is folded.
//! - **Guards**: guards whose outcome is known are dropped; guards that
//!   provably fail abort the loop with [`OptError::InvalidLoop`]; a later
//!   stronger guard on the same reference may overwrite the earlier one in
//!   place.
//! - **Calls**: repeated loop-invariant calls, pure calls with recorded
//!   results, decided conditional calls and short constant arraycopies.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use super::error::{OptError, OptResult};
use super::info::PtrInfo;
use super::optimizer::Optimizer;
use super::TracePass;
use crate::cpu::Cpu;
use crate::ir::{
    CallPureResults, Const, ConstKey, Descr, GuardDescr, OopSpec, Opcode, Operation, ResumeKind,
    Trace, Value, Var, VarAllocator,
};

// =============================================================================
// Statistics
// =============================================================================

/// Counters collected by one rewrite run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Operations fed into the pass.
    pub ops_in: usize,
    /// Operations emitted.
    pub ops_out: usize,
    /// Operations turned into a cheaper operation or an existing value.
    pub strength_reduced: usize,
    /// Guards proven redundant.
    pub guards_removed: usize,
    /// Guards folded into an earlier guard.
    pub guards_merged: usize,
    /// Calls removed or expanded inline.
    pub calls_removed: usize,
}

impl RewriteStats {
    /// Operations that did not survive.
    pub fn removed(&self) -> usize {
        self.ops_in.saturating_sub(self.ops_out)
    }

    pub fn merge(&mut self, other: &RewriteStats) {
        self.ops_in += other.ops_in;
        self.ops_out += other.ops_out;
        self.strength_reduced += other.strength_reduced;
        self.guards_removed += other.guards_removed;
        self.guards_merged += other.guards_merged;
        self.calls_removed += other.calls_removed;
    }
}

// =============================================================================
// Rewrite Pass
// =============================================================================

/// Forward peephole optimizer.
pub struct OptRewrite<'a> {
    opt: Optimizer<'a>,
    /// Results of `CALL_LOOPINVARIANT`, keyed by call target.
    loop_invariant_results: FxHashMap<ConstKey, Option<Value>>,
    stats: RewriteStats,
}

impl<'a> OptRewrite<'a> {
    pub fn new(cpu: &'a dyn Cpu, vars: VarAllocator, call_pure_results: CallPureResults) -> Self {
        Self {
            opt: Optimizer::new(cpu, vars, call_pure_results),
            loop_invariant_results: FxHashMap::default(),
            stats: RewriteStats::default(),
        }
    }

    /// Rewrite a whole trace.
    pub fn optimize(cpu: &'a dyn Cpu, trace: Trace) -> OptResult<(Trace, RewriteStats)> {
        let Trace {
            ops,
            vars,
            call_pure_results,
        } = trace;
        let mut pass = OptRewrite::new(cpu, vars, call_pure_results);
        for op in ops {
            pass.stats.ops_in += 1;
            pass.propagate_forward(op)?;
        }
        let (ops, vars, call_pure_results, stats) = pass.finish();
        debug!(
            ops_in = stats.ops_in,
            ops_out = stats.ops_out,
            reduced = stats.strength_reduced,
            guards_removed = stats.guards_removed,
            guards_merged = stats.guards_merged,
            "rewrite finished"
        );
        Ok((
            Trace {
                ops,
                vars,
                call_pure_results,
            },
            stats,
        ))
    }

    pub fn optimizer(&self) -> &Optimizer<'a> {
        &self.opt
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub fn finish(mut self) -> (Vec<Operation>, VarAllocator, CallPureResults, RewriteStats) {
        let (ops, vars, results) = self.opt.finish();
        self.stats.ops_out = ops.len();
        (ops, vars, results, self.stats)
    }

    /// Handle one operation.
    pub fn propagate_forward(&mut self, op: Operation) -> OptResult<()> {
        if (op.opcode.bool_inverse().is_some() || op.opcode.bool_reflex().is_some())
            && self.find_rewritable_bool(&op)
        {
            return Ok(());
        }

        match op.opcode {
            Opcode::IntAnd => self.optimize_int_and(op),
            Opcode::IntOr | Opcode::IntXor => self.optimize_int_or_xor(op),
            Opcode::IntSub => self.optimize_int_sub(op),
            Opcode::IntAdd => self.optimize_int_add(op),
            Opcode::IntMul => self.optimize_int_mul(op),
            Opcode::IntFloordiv => self.optimize_int_floordiv(op),
            Opcode::UintFloordiv => self.optimize_uint_floordiv(op),
            Opcode::IntLshift | Opcode::IntRshift | Opcode::UintRshift => self.optimize_shift(op),
            Opcode::IntIsTrue => self.optimize_int_is_true(op),
            Opcode::FloatMul => self.optimize_float_mul(op),
            Opcode::FloatTruediv => self.optimize_float_truediv(op),
            Opcode::FloatAdd
            | Opcode::FloatSub
            | Opcode::FloatNeg
            | Opcode::CastPtrToInt
            | Opcode::CastIntToPtr => self.emit_reversible(op),
            Opcode::SameAs => self.optimize_same_as(op),
            Opcode::PtrEq => self.optimize_oois(op, false, false),
            Opcode::PtrNe => self.optimize_oois(op, true, false),
            Opcode::InstancePtrEq => self.optimize_oois(op, false, true),
            Opcode::InstancePtrNe => self.optimize_oois(op, true, true),

            Opcode::GuardTrue => self.optimize_guard(op, Const::Int(1)),
            Opcode::GuardFalse => self.optimize_guard(op, Const::Int(0)),
            Opcode::GuardValue => self.optimize_guard_value(op),
            Opcode::GuardIsnull => self.optimize_guard_isnull(op),
            Opcode::GuardNonnull => self.optimize_guard_nonnull(op),
            Opcode::GuardIsObject => self.optimize_guard_is_object(op),
            Opcode::GuardGcType => self.optimize_guard_gc_type(op),
            Opcode::GuardSubclass => self.optimize_guard_subclass(op),
            Opcode::GuardClass => self.optimize_guard_class(op),
            Opcode::GuardNonnullClass => self.optimize_guard_nonnull_class(op),
            Opcode::GuardNoException => self.optimize_guard_no_exception(op),
            Opcode::RecordExactClass => self.optimize_record_exact_class(op),

            Opcode::Call => self.optimize_call(op),
            Opcode::CallPure => self.optimize_call_pure(op),
            Opcode::CallLoopinvariant => self.optimize_call_loopinvariant(op),
            Opcode::CondCall => self.optimize_cond_call(op),

            _ => self.emit(op),
        }
    }

    fn emit(&mut self, op: Operation) -> OptResult<()> {
        self.opt.emit_operation(op).map(|_| ())
    }

    /// Emit and remember the identities the operation implies.
    fn emit_reversible(&mut self, op: Operation) -> OptResult<()> {
        if self.opt.emit_operation(op)? {
            self.opt.record_reverse_of_last();
        }
        Ok(())
    }

    fn replace_with(&mut self, res: Var, value: Value) -> OptResult<()> {
        self.opt.make_equal_to(res, value);
        self.stats.strength_reduced += 1;
        Ok(())
    }

    fn guard_removed(&mut self) -> OptResult<()> {
        self.stats.guards_removed += 1;
        Ok(())
    }

    // =========================================================================
    // Comparisons
    // =========================================================================

    /// Fold a comparison whose inverse or mirrored form was already
    /// computed and decided.
    fn find_rewritable_bool(&mut self, op: &Operation) -> bool {
        let Some(res) = op.result else {
            return false;
        };
        if op.num_args() != 2 {
            return false;
        }
        let a = self.opt.get_box_replacement(op.arg(0));
        let b = self.opt.get_box_replacement(op.arg(1));

        if let Some(inverse) = op.opcode.bool_inverse() {
            if self.try_boolinvers(res, inverse, &[a, b]) {
                return true;
            }
        }
        if let Some(reflex) = op.opcode.bool_reflex() {
            if let Some(old) = self.opt.pure().lookup(reflex, &[b, a]) {
                self.opt.make_equal_to(res, old);
                return true;
            }
            if let Some(inverse) = reflex.bool_inverse() {
                if self.try_boolinvers(res, inverse, &[b, a]) {
                    return true;
                }
            }
        }
        false
    }

    fn try_boolinvers(&mut self, res: Var, opcode: Opcode, args: &[Value]) -> bool {
        let Some(old) = self.opt.pure().lookup(opcode, args) else {
            return false;
        };
        let bound = self.opt.getintbound(old);
        if bound.equal(1) {
            self.opt.make_constant_int(res, 0);
            true
        } else if bound.equal(0) {
            self.opt.make_constant_int(res, 1);
            true
        } else {
            false
        }
    }

    fn optimize_oois(&mut self, op: Operation, expect_isnot: bool, instance: bool) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let a = self.opt.get_box_replacement(op.arg(0));
        let b = self.opt.get_box_replacement(op.arg(1));
        let (info_a, info_b) = (self.opt.ptr_info(a), self.opt.ptr_info(b));

        let decided = if info_b.is_null() {
            nullness_result(&info_a, expect_isnot)
        } else if info_a.is_null() {
            nullness_result(&info_b, expect_isnot)
        } else if a == b {
            Some(!expect_isnot)
        } else if instance {
            match (info_a.known_class(), info_b.known_class()) {
                (Some(ca), Some(cb)) if ca != cb => Some(expect_isnot),
                _ => None,
            }
        } else {
            None
        };

        match decided {
            Some(v) => {
                self.opt.make_constant_int(res, v as i64);
                Ok(())
            }
            None => self.emit(op),
        }
    }

    fn optimize_int_is_true(&mut self, op: Operation) -> OptResult<()> {
        if let Some(res) = op.result {
            if self.opt.getintbound(op.arg(0)).is_bool() {
                return self.replace_with(res, op.arg(0));
            }
        }
        self.emit(op)
    }

    // =========================================================================
    // Integer Arithmetic
    // =========================================================================

    fn optimize_int_and(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        let (b1, b2) = (self.opt.getintbound(a), self.opt.getintbound(b));
        if b1.equal(0) || b2.equal(0) {
            self.opt.make_constant_int(res, 0);
            return Ok(());
        }
        for (x, bx, mask) in [(a, b1, b2), (b, b2, b1)] {
            if let Some(m) = mask.get_constant() {
                let low_ones = m & !m.wrapping_add(1);
                if m == -1 || (bx.known_nonnegative() && bx.upper <= low_ones) {
                    return self.replace_with(res, x);
                }
            }
        }
        self.emit_reversible(op)
    }

    fn optimize_int_or_xor(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        if self.opt.getintbound(a).equal(0) {
            return self.replace_with(res, b);
        }
        if self.opt.getintbound(b).equal(0) {
            return self.replace_with(res, a);
        }
        self.emit_reversible(op)
    }

    fn optimize_int_sub(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        if self.opt.getintbound(b).equal(0) {
            return self.replace_with(res, a);
        }
        if self.opt.getintbound(a).equal(0) {
            self.stats.strength_reduced += 1;
            return self.emit_reversible(op.copy_and_change(Opcode::IntNeg, [b]));
        }
        if self.opt.get_box_replacement(a) == self.opt.get_box_replacement(b) {
            self.opt.make_constant_int(res, 0);
            return Ok(());
        }
        self.emit_reversible(op)
    }

    fn optimize_int_add(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        if self.opt.getintbound(a).equal(0) {
            return self.replace_with(res, b);
        }
        if self.opt.getintbound(b).equal(0) {
            return self.replace_with(res, a);
        }
        self.emit_reversible(op)
    }

    fn optimize_int_mul(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        let (b1, b2) = (self.opt.getintbound(a), self.opt.getintbound(b));
        if b1.equal(1) {
            return self.replace_with(res, b);
        }
        if b2.equal(1) {
            return self.replace_with(res, a);
        }
        if b1.equal(0) || b2.equal(0) {
            self.opt.make_constant_int(res, 0);
            return Ok(());
        }
        for (factor, other) in [(b1, b), (b2, a)] {
            if let Some(x) = factor.get_constant() {
                if x != 0 && x & x.wrapping_sub(1) == 0 {
                    self.stats.strength_reduced += 1;
                    let shift = Value::int(i64::from(x.trailing_zeros()));
                    return self.emit(op.copy_and_change(Opcode::IntLshift, [other, shift]));
                }
            }
        }
        self.emit_reversible(op)
    }

    fn optimize_int_floordiv(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        let (b1, b2) = (self.opt.getintbound(a), self.opt.getintbound(b));
        if b2.equal(1) {
            return self.replace_with(res, a);
        }
        if b1.equal(0) && b2.known_nonzero() {
            self.opt.make_constant_int(res, 0);
            return Ok(());
        }
        if let Some(d) = b2.get_constant() {
            if b1.known_nonnegative() && d > 0 && d & (d - 1) == 0 {
                self.stats.strength_reduced += 1;
                let shift = Value::int(i64::from(d.trailing_zeros()));
                return self.emit(op.copy_and_change(Opcode::IntRshift, [a, shift]));
            }
        }
        self.emit(op)
    }

    fn optimize_uint_floordiv(&mut self, op: Operation) -> OptResult<()> {
        if let Some(res) = op.result {
            if self.opt.getintbound(op.arg(1)).equal(1) {
                return self.replace_with(res, op.arg(0));
            }
        }
        self.emit(op)
    }

    fn optimize_shift(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        if self.opt.getintbound(op.arg(1)).equal(0) {
            return self.replace_with(res, op.arg(0));
        }
        if self.opt.getintbound(op.arg(0)).equal(0) {
            self.opt.make_constant_int(res, 0);
            return Ok(());
        }
        self.emit(op)
    }

    fn optimize_same_as(&mut self, op: Operation) -> OptResult<()> {
        match op.result {
            Some(res) => {
                self.opt.make_equal_to(res, op.arg(0));
                Ok(())
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // Float Arithmetic
    // =========================================================================

    fn optimize_float_mul(&mut self, op: Operation) -> OptResult<()> {
        let Some(res) = op.result else {
            return self.emit(op);
        };
        let (a, b) = (op.arg(0), op.arg(1));
        for (lhs, rhs) in [(a, b), (b, a)] {
            match self.opt.get_constant(lhs).and_then(Const::as_float) {
                Some(v) if v == 1.0 => return self.replace_with(res, rhs),
                Some(v) if v == -1.0 => {
                    self.stats.strength_reduced += 1;
                    return self.emit_reversible(op.copy_and_change(Opcode::FloatNeg, [rhs]));
                }
                _ => {}
            }
        }
        self.emit_reversible(op)
    }

    /// `x / c` becomes `x * (1/c)` when both `c` and `1/c` are exact
    /// powers of two.
    fn optimize_float_truediv(&mut self, op: Operation) -> OptResult<()> {
        let divisor = self.opt.get_constant(op.arg(1)).and_then(Const::as_float);
        if let Some(d) = divisor {
            let reciprocal = 1.0 / d;
            if is_normal_power_of_two(d) && is_normal_power_of_two(reciprocal) {
                self.stats.strength_reduced += 1;
                let mul = op.copy_and_change(Opcode::FloatMul, [op.arg(0), Value::float(reciprocal)]);
                return self.emit_reversible(mul);
            }
        }
        self.emit(op)
    }

    // =========================================================================
    // Guards
    // =========================================================================

    /// Guard that its first argument equals `constant`.
    fn optimize_guard(&mut self, op: Operation, constant: Const) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        if let Some(known) = self.opt.get_constant(value) {
            if known.same_constant(constant) {
                return self.guard_removed();
            }
            return Err(OptError::invalid_loop(format!(
                "{} was proven to always fail",
                op
            )));
        }
        let truth = match op.opcode {
            Opcode::GuardTrue => Some(true),
            Opcode::GuardFalse => Some(false),
            _ => None,
        };
        self.emit(op)?;
        if let Some(truth) = truth {
            self.opt.narrow_from_guard(value, truth)?;
        }
        self.opt.make_constant(value, constant);
        Ok(())
    }

    fn optimize_guard_value(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let Some(constant) = self.opt.get_constant(op.arg(1)) else {
            return self.emit(op);
        };
        if value.ty().is_ref() && !value.is_const() {
            let info = self.opt.ptr_info(value);
            if let Some(pos) = info.last_guard_pos() {
                if self.merge_into_guard_value(value, &info, pos, constant)? {
                    self.opt.make_constant(value, constant);
                    return Ok(());
                }
            }
        }
        self.optimize_guard(op, constant)
    }

    /// Overwrite the guard at `pos` with a `GUARD_VALUE`.
    fn merge_into_guard_value(
        &mut self,
        value: Value,
        info: &PtrInfo,
        pos: usize,
        constant: Const,
    ) -> OptResult<bool> {
        if !constant.nonnull() {
            return Err(OptError::invalid_loop(
                "guard_value(..., NULL) follows a guard that it is not NULL",
            ));
        }
        if let Some(prev) = info.known_class() {
            let expected = constant
                .as_address()
                .and_then(|ptr| self.opt.cpu().class_of(ptr));
            match expected {
                Some(cls) if cls == prev => {}
                Some(_) => {
                    return Err(OptError::invalid_loop(
                        "guard_value(..., const) follows guard_class(..., other class)",
                    ))
                }
                None => return Ok(false),
            }
        }
        let old = self.opt.operation_at(pos);
        if old.resume_kind() == ResumeKind::AtPosition {
            return Ok(false);
        }
        let merged = old
            .copy_and_change(Opcode::GuardValue, [old.arg(0), Value::Const(constant)])
            .with_descr(GuardDescr::default());
        self.opt.replace_guard(pos, merged);
        if let Some(info) = self.opt.ptr_info_mut(value) {
            info.reset_last_guard_pos();
        }
        self.stats.guards_merged += 1;
        Ok(true)
    }

    fn optimize_guard_isnull(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let info = self.opt.ptr_info(value);
        if info.is_null() {
            return self.guard_removed();
        }
        if info.is_nonnull() {
            return Err(OptError::invalid_loop(
                "a guard_isnull was proven to always fail",
            ));
        }
        self.emit(op)?;
        self.opt.make_constant(value, Const::NULL);
        Ok(())
    }

    fn optimize_guard_nonnull(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let info = self.opt.ptr_info(value);
        if info.is_nonnull() {
            return self.guard_removed();
        }
        if info.is_null() {
            return Err(OptError::invalid_loop(
                "a guard_nonnull was proven to always fail",
            ));
        }
        let resume = op.resume_kind();
        let pos = self.opt.next_position();
        self.emit(op)?;
        if let Some(info) = self.opt.ptr_info_mut(value) {
            info.mark_nonnull();
            if resume != ResumeKind::AtPosition {
                info.mark_last_guard(pos);
            }
        }
        Ok(())
    }

    fn optimize_guard_is_object(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        if let Value::Const(c) = value {
            let ptr = c.as_address().unwrap_or(0);
            if ptr == 0 {
                return Err(OptError::invalid_loop("a guard_is_object(NULL) found"));
            }
            if self.opt.cpu().is_object(ptr) {
                return self.guard_removed();
            }
            return Err(OptError::invalid_loop(
                "a guard_is_object(const) was proven to always fail",
            ));
        }
        let info = self.opt.ptr_info(value);
        if info.is_about_object() {
            return self.guard_removed();
        }
        if info.is_precise() {
            return Err(OptError::invalid_loop(
                "a guard_is_object on a known non-object was proven to always fail",
            ));
        }
        self.emit(op)
    }

    fn optimize_guard_gc_type(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let Some(expected) = self.opt.get_constant_int(op.arg(1)) else {
            return self.emit(op);
        };
        let known = match value {
            Value::Const(c) => c.as_address().and_then(|p| self.opt.cpu().type_id_of(p)),
            Value::Var(_) => self.opt.ptr_info(value).type_id(),
        };
        match known {
            Some(t) if i64::from(t) == expected => self.guard_removed(),
            Some(_) => Err(OptError::invalid_loop(
                "a guard_gc_type was proven to always fail",
            )),
            None => self.emit(op),
        }
    }

    fn optimize_guard_subclass(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let Some(expected) = self.opt.get_constant(op.arg(1)).and_then(Const::as_address) else {
            return self.emit(op);
        };
        match value {
            Value::Const(c) => {
                let class = c.as_address().and_then(|p| self.opt.cpu().class_of(p));
                if let Some(class) = class {
                    match self.check_subclass(class, expected) {
                        Some(true) => return self.guard_removed(),
                        Some(false) => {
                            return Err(OptError::invalid_loop(
                                "a guard_subclass(const) was proven to always fail",
                            ))
                        }
                        None => {}
                    }
                }
            }
            Value::Var(_) => {
                let info = self.opt.ptr_info(value);
                if let (true, Some(class)) = (info.is_about_object(), info.known_class()) {
                    if self.check_subclass(class, expected) == Some(true) {
                        return self.guard_removed();
                    }
                }
            }
        }
        self.emit(op)
    }

    /// Whether `class` is `expected` or one of its subclasses, when the CPU
    /// knows both ranges.
    fn check_subclass(&self, class: u64, expected: u64) -> Option<bool> {
        let cpu = self.opt.cpu();
        let (class_min, _) = cpu.subclass_range(class)?;
        let (min, max) = cpu.subclass_range(expected)?;
        Some(min <= class_min && class_min <= max)
    }

    fn optimize_guard_class(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let class_arg = self.opt.get_box_replacement(op.arg(1));
        let Some(expected) = class_arg.constant().and_then(Const::as_address) else {
            return self.emit(op);
        };
        let info = self.opt.ptr_info(value);
        if let Some(known) = info.known_class() {
            if known == expected {
                return self.guard_removed();
            }
            return Err(OptError::invalid_loop(format!(
                "{} was proven to always fail",
                op
            )));
        }
        if value.is_const() {
            return self.emit(op);
        }

        if let Some(pos) = info.last_guard_pos() {
            let old = self.opt.operation_at(pos);
            if old.opcode == Opcode::GuardNonnull && old.resume_kind() != ResumeKind::AtPosition {
                let merged = old
                    .copy_and_change(Opcode::GuardNonnullClass, [old.arg(0), class_arg])
                    .with_descr(GuardDescr::default());
                self.opt.replace_guard(pos, merged);
                self.stats.guards_merged += 1;
                if let Some(info) = self.opt.ptr_info_mut(value) {
                    info.set_class(expected);
                }
                return Ok(());
            }
        }

        let resume = op.resume_kind();
        let pos = self.opt.next_position();
        self.emit(op)?;
        if let Some(info) = self.opt.ptr_info_mut(value) {
            info.set_class(expected);
            if resume != ResumeKind::AtPosition {
                info.mark_last_guard(pos);
            }
        }
        Ok(())
    }

    fn optimize_guard_nonnull_class(&mut self, op: Operation) -> OptResult<()> {
        if self.opt.ptr_info(op.arg(0)).is_null() {
            return Err(OptError::invalid_loop(
                "a guard_nonnull_class was proven to always fail",
            ));
        }
        self.optimize_guard_class(op)
    }

    fn optimize_guard_no_exception(&mut self, op: Operation) -> OptResult<()> {
        if self.opt.last_emitted_removed() {
            return self.guard_removed();
        }
        self.emit(op)
    }

    fn optimize_record_exact_class(&mut self, op: Operation) -> OptResult<()> {
        let value = self.opt.get_box_replacement(op.arg(0));
        let Some(expected) = self.opt.get_constant(op.arg(1)).and_then(Const::as_address) else {
            return Ok(());
        };
        if let Some(known) = self.opt.ptr_info(value).known_class() {
            if known != expected {
                return Err(OptError::invalid_loop(
                    "record_exact_class conflicts with the known class",
                ));
            }
            return Ok(());
        }
        if let Some(info) = self.opt.ptr_info_mut(value) {
            info.set_class(expected);
        }
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn optimize_call(&mut self, op: Operation) -> OptResult<()> {
        let is_arraycopy = op
            .call_descr()
            .is_some_and(|d| d.effect.oopspec == OopSpec::ArrayCopy);
        if is_arraycopy && self.try_unroll_arraycopy(&op)? {
            self.opt.mark_last_removed();
            self.stats.calls_removed += 1;
            return Ok(());
        }
        self.emit(op)
    }

    /// `arraycopy(func, source, dest, source_start, dest_start, length)`
    /// with a short constant range becomes explicit loads and stores.
    fn try_unroll_arraycopy(&mut self, op: &Operation) -> OptResult<bool> {
        if op.num_args() < 6 {
            return Ok(false);
        }
        let length = self.opt.get_constant_int(op.arg(5));
        if length == Some(0) {
            return Ok(true);
        }
        let (Some(source_start), Some(dest_start), Some(length)) = (
            self.opt.get_constant_int(op.arg(3)),
            self.opt.get_constant_int(op.arg(4)),
            length,
        ) else {
            return Ok(false);
        };
        if !(1..=8).contains(&length)
            || source_start.checked_add(length).is_none()
            || dest_start.checked_add(length).is_none()
        {
            return Ok(false);
        }
        let descr = match op.call_descr().map(|d| d.effect.write_descrs_arrays.as_slice()) {
            Some([descr]) if !descr.is_array_of_structs() => Arc::clone(descr),
            _ => return Ok(false),
        };

        let (source, dest) = (op.arg(1), op.arg(2));
        for i in 0..length {
            let item = self.opt.fresh_var(descr.item_type());
            let load = Operation::new(
                Opcode::GetarrayitemGc,
                [source, Value::int(source_start + i)],
                Some(item),
            )
            .with_descr(Descr::Array(Arc::clone(&descr)));
            self.propagate_forward(load)?;
            let store = Operation::new(
                Opcode::SetarrayitemGc,
                [dest, Value::int(dest_start + i), Value::Var(item)],
                None,
            )
            .with_descr(Descr::Array(Arc::clone(&descr)));
            self.propagate_forward(store)?;
        }
        Ok(true)
    }

    fn optimize_call_pure(&mut self, op: Operation) -> OptResult<()> {
        let consts: Option<SmallVec<[Const; 6]>> = op
            .args
            .iter()
            .map(|&a| self.opt.get_constant(a))
            .collect();
        if let Some(result) = consts.and_then(|c| self.opt.call_pure_result(&c)) {
            if let Some(res) = op.result {
                self.opt.make_constant(Value::Var(res), result);
            }
            self.opt.mark_last_removed();
            self.stats.calls_removed += 1;
            return Ok(());
        }
        let call = op.copy_and_change(Opcode::Call, op.args.iter().copied());
        self.emit(call)
    }

    fn optimize_call_loopinvariant(&mut self, op: Operation) -> OptResult<()> {
        let call = op.copy_and_change(Opcode::Call, op.args.iter().copied());
        let Some(func) = self.opt.get_constant(op.arg(0)) else {
            return self.emit(call);
        };
        let key = ConstKey(func);
        match (self.loop_invariant_results.get(&key).copied(), op.result) {
            (Some(Some(prev)), Some(res)) => {
                self.opt.make_equal_to(res, prev);
                self.opt.mark_last_removed();
                self.stats.calls_removed += 1;
                return Ok(());
            }
            (Some(_), None) => {
                self.opt.mark_last_removed();
                self.stats.calls_removed += 1;
                return Ok(());
            }
            _ => {}
        }
        self.emit(call)?;
        self.loop_invariant_results
            .insert(key, op.result.map(Value::Var));
        Ok(())
    }

    fn optimize_cond_call(&mut self, op: Operation) -> OptResult<()> {
        let cond = self.opt.getintbound(op.arg(0));
        if cond.equal(0) {
            self.opt.mark_last_removed();
            self.stats.calls_removed += 1;
            return Ok(());
        }
        if cond.known_nonzero() {
            self.stats.strength_reduced += 1;
            let call = op.copy_and_change(Opcode::Call, op.args[1..].iter().copied());
            return self.emit(call);
        }
        self.emit(op)
    }
}

fn nullness_result(info: &PtrInfo, expect_nonnull: bool) -> Option<bool> {
    if info.is_nonnull() {
        Some(expect_nonnull)
    } else if info.is_null() {
        Some(!expect_nonnull)
    } else {
        None
    }
}

const F64_MANTISSA_MASK: u64 = (1 << 52) - 1;

/// `±2^k` with a normal exponent. Subnormals are excluded: their reciprocal
/// overflows to infinity, so `1/c` is not exact.
pub fn is_normal_power_of_two(x: f64) -> bool {
    x.is_normal() && x.to_bits() & F64_MANTISSA_MASK == 0
}

// =============================================================================
// Pipeline Pass
// =============================================================================

/// [`OptRewrite`] as a pipeline pass, accumulating statistics across runs.
///
/// On [`OptError::InvalidLoop`] the trace is left empty; the caller is
/// expected to drop the compilation attempt.
#[derive(Debug, Default)]
pub struct Rewrite {
    stats: RewriteStats,
}

impl Rewrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get accumulated statistics.
    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }
}

impl TracePass for Rewrite {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    fn run(&mut self, cpu: &dyn Cpu, trace: &mut Trace) -> OptResult<bool> {
        let (rewritten, stats) = OptRewrite::optimize(cpu, std::mem::take(trace))?;
        *trace = rewritten;
        self.stats.merge(&stats);
        Ok(stats.ops_in != stats.ops_out || stats.strength_reduced > 0 || stats.guards_merged > 0)
    }
}
