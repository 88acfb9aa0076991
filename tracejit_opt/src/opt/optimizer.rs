//! Shared optimizer state.
//!
//! The [`Optimizer`] owns everything a forward pass learns while walking a
//! trace: box replacements, integer bounds, reference facts, the pure memo
//! table and the list of emitted operations.
//!
//! # Emission
//!
//! [`Optimizer::emit_operation`] is the single funnel into the output. It
//! substitutes replacements into arguments and guard snapshots, folds pure
//! operations over constants, reuses earlier identical pure results, and
//! propagates integer bounds forward. Folding and reuse happen before the
//! operation reaches the output, so a removed operation never shows up.
//!
//! # Guards
//!
//! After a `GUARD_TRUE`/`GUARD_FALSE` is emitted,
//! [`Optimizer::narrow_from_guard`] narrows the operands of the comparison
//! that produced the condition.

use rustc_hash::FxHashMap;
use tracing::trace;

use super::error::OptResult;
use super::info::PtrInfo;
use super::intbound::IntBound;
use super::pure::PureCache;
use crate::cpu::Cpu;
use crate::ir::{
    CallPureResults, Const, ConstKey, Opcode, Operation, Snapshot, Value, ValueType, Var,
    VarAllocator,
};

/// Forward optimization state shared by the rewrite rules.
pub struct Optimizer<'a> {
    cpu: &'a dyn Cpu,
    replacements: FxHashMap<Var, Value>,
    int_bounds: FxHashMap<Var, IntBound>,
    ptr_infos: FxHashMap<Var, PtrInfo>,
    /// Output position of the operation defining each emitted box.
    producers: FxHashMap<Var, usize>,
    pure: PureCache,
    call_pure_results: CallPureResults,
    vars: VarAllocator,
    new_operations: Vec<Operation>,
    last_emitted_removed: bool,
}

impl<'a> Optimizer<'a> {
    pub fn new(cpu: &'a dyn Cpu, vars: VarAllocator, call_pure_results: CallPureResults) -> Self {
        Self {
            cpu,
            replacements: FxHashMap::default(),
            int_bounds: FxHashMap::default(),
            ptr_infos: FxHashMap::default(),
            producers: FxHashMap::default(),
            pure: PureCache::new(),
            call_pure_results,
            vars,
            new_operations: Vec::new(),
            last_emitted_removed: false,
        }
    }

    #[inline]
    pub fn cpu(&self) -> &'a dyn Cpu {
        self.cpu
    }

    // =========================================================================
    // Replacements and Facts
    // =========================================================================

    /// Follow the replacement chain of `value`.
    pub fn get_box_replacement(&self, value: Value) -> Value {
        let mut cur = value;
        while let Value::Var(var) = cur {
            match self.replacements.get(&var) {
                Some(&next) => cur = next,
                None => break,
            }
        }
        cur
    }

    /// Constant value of `value`, through replacements and integer bounds.
    pub fn get_constant(&self, value: Value) -> Option<Const> {
        match self.get_box_replacement(value) {
            Value::Const(c) => Some(c),
            Value::Var(var) if var.ty().is_int() => self
                .int_bounds
                .get(&var)
                .and_then(IntBound::get_constant)
                .map(Const::Int),
            Value::Var(_) => None,
        }
    }

    pub fn get_constant_int(&self, value: Value) -> Option<i64> {
        self.get_constant(value).and_then(Const::as_int)
    }

    pub fn getintbound(&self, value: Value) -> IntBound {
        match self.get_box_replacement(value) {
            Value::Const(Const::Int(c)) => IntBound::from_constant(c),
            Value::Const(_) => IntBound::unbounded(),
            Value::Var(var) => self.int_bounds.get(&var).copied().unwrap_or_default(),
        }
    }

    /// Reference facts of `value`. Constants are described from the CPU's
    /// view of the heap.
    pub fn ptr_info(&self, value: Value) -> PtrInfo {
        match self.get_box_replacement(value) {
            Value::Const(Const::Ref(0)) => PtrInfo::null(),
            Value::Const(Const::Ref(ptr)) => {
                let mut info = PtrInfo::nonnull();
                if let Some(class) = self.cpu.class_of(ptr) {
                    info.set_class(class);
                }
                info
            }
            Value::Const(_) => PtrInfo::default(),
            Value::Var(var) => self.ptr_infos.get(&var).cloned().unwrap_or_default(),
        }
    }

    /// Mutable facts of the box `value` currently stands for, if it is a
    /// box.
    pub fn ptr_info_mut(&mut self, value: Value) -> Option<&mut PtrInfo> {
        match self.get_box_replacement(value) {
            Value::Var(var) => Some(self.ptr_infos.entry(var).or_default()),
            Value::Const(_) => None,
        }
    }

    /// Every later use of `var` becomes `value`.
    pub fn make_equal_to(&mut self, var: Var, value: Value) {
        let value = self.get_box_replacement(value);
        if value == Value::Var(var) {
            return;
        }
        trace!(%var, %value, "replace");
        self.replacements.insert(var, value);
    }

    /// `value` is known to be `constant` from here on.
    pub fn make_constant(&mut self, value: Value, constant: Const) {
        if let Value::Var(target) = self.get_box_replacement(value) {
            trace!(var = %target, %constant, "constant");
            self.replacements.insert(target, Value::Const(constant));
            if let Const::Int(c) = constant {
                self.int_bounds.insert(target, IntBound::from_constant(c));
            }
        }
    }

    pub fn make_constant_int(&mut self, var: Var, value: i64) {
        self.make_constant(Value::Var(var), Const::Int(value));
    }

    /// Narrow the bound of the integer box behind `value`.
    pub fn narrow_bound(
        &mut self,
        value: Value,
        f: impl FnOnce(&mut IntBound) -> OptResult<bool>,
    ) -> OptResult<()> {
        let var = match self.get_box_replacement(value) {
            Value::Var(var) if var.ty().is_int() => var,
            _ => return Ok(()),
        };
        let bound = self.int_bounds.entry(var).or_default();
        if f(bound)? {
            let narrowed = *bound;
            trace!(%var, bound = %narrowed, "narrowed");
            if let Some(c) = narrowed.get_constant() {
                self.make_constant_int(var, c);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Emit `op` after substituting replacements. Returns `false` when the
    /// operation was folded or reused instead of being emitted.
    pub fn emit_operation(&mut self, mut op: Operation) -> OptResult<bool> {
        self.force_args(&mut op);

        let pure = op.opcode.is_always_pure() && !op.opcode.is_vector();
        if let (true, Some(res)) = (pure, op.result) {
            if let Some(c) = self.try_fold(&op) {
                self.make_constant(Value::Var(res), c);
                return Ok(false);
            }
            if let Some(prev) = self.pure.lookup(op.opcode, &op.args) {
                self.make_equal_to(res, prev);
                return Ok(false);
            }
        }

        if let Some(res) = op.result.filter(|r| r.ty().is_int()) {
            let bound = self.forward_bound(&op);
            if pure {
                if let Some(c) = bound.get_constant() {
                    self.make_constant_int(res, c);
                    return Ok(false);
                }
            }
            if !bound.is_unbounded() {
                self.int_bounds.insert(res, bound);
            }
        }

        if let (Some(res), Some(size)) = (op.result, op.descr.as_ref().and_then(|d| d.as_size())) {
            if matches!(op.opcode, Opcode::New | Opcode::NewWithVtable) {
                self.ptr_infos
                    .insert(res, PtrInfo::allocation(size.type_id, size.vtable));
            }
        }

        if let (true, Some(res)) = (pure, op.result) {
            self.pure.record(op.opcode, &op.args, Value::Var(res));
        }
        if let Some(res) = op.result {
            self.producers.insert(res, self.new_operations.len());
        }
        trace!(op = %op, "emit");
        self.new_operations.push(op);
        self.last_emitted_removed = false;
        Ok(true)
    }

    fn force_args(&self, op: &mut Operation) {
        for arg in op.args.iter_mut() {
            *arg = self.get_box_replacement(*arg);
        }
        if op.is_guard() {
            if let Some(snap) = op.snapshot.take() {
                op.snapshot = Some(Snapshot::rename(&snap, &mut |v| self.get_box_replacement(v)));
            }
        }
    }

    fn try_fold(&self, op: &Operation) -> Option<Const> {
        let mut consts = smallvec::SmallVec::<[Const; 4]>::new();
        for &arg in &op.args {
            consts.push(arg.constant()?);
        }
        fold_constant(op.opcode, &consts)
    }

    /// Bound of the result of `op` given its arguments' bounds.
    fn forward_bound(&self, op: &Operation) -> IntBound {
        use Opcode::*;
        let arg = |i: usize| self.getintbound(op.arg(i));
        let same_args = op.num_args() == 2 && op.arg(0) == op.arg(1);
        match op.opcode {
            IntAdd => arg(0).add(&arg(1)),
            IntSub if same_args => IntBound::from_constant(0),
            IntSub => arg(0).sub(&arg(1)),
            IntMul => arg(0).mul(&arg(1)),
            IntAnd => arg(0).and(&arg(1)),
            IntOr => arg(0).or(&arg(1)),
            IntXor if same_args => IntBound::from_constant(0),
            IntXor => arg(0).xor(&arg(1)),
            IntLshift => arg(0).lshift(&arg(1)),
            IntRshift => arg(0).rshift(&arg(1)),
            UintRshift => arg(0).uint_rshift(&arg(1)),
            IntFloordiv => arg(0).floordiv(&arg(1)),
            IntMod => arg(0).modulo(&arg(1)),
            IntNeg => arg(0).neg(),
            IntSignext => arg(0).signext(&arg(1)),
            IntIsTrue | IntIsZero => {
                let x = arg(0);
                let truth = opcode_truth(op.opcode == IntIsTrue, x.known_nonzero(), x.equal(0));
                truth.unwrap_or(IntBound::boolean())
            }
            IntLt | IntLe | IntGt | IntGe | IntEq | IntNe => {
                compare_bounds(op.opcode, &arg(0), &arg(1), same_args)
            }
            UintLt | UintLe | UintGt | UintGe => {
                let (a, b) = (arg(0), arg(1));
                if a.known_nonnegative() && b.known_nonnegative() {
                    let signed = match op.opcode {
                        UintLt => IntLt,
                        UintLe => IntLe,
                        UintGt => IntGt,
                        _ => IntGe,
                    };
                    compare_bounds(signed, &a, &b, same_args)
                } else {
                    IntBound::boolean()
                }
            }
            FloatLt | FloatLe | FloatEq | FloatNe | FloatGt | FloatGe | PtrEq | PtrNe
            | InstancePtrEq | InstancePtrNe => IntBound::boolean(),
            Arraylen => IntBound::nonnegative(),
            GetarrayitemGc | GetarrayitemRaw | RawLoad => match op.array_descr() {
                Some(d) if d.item_type() == ValueType::Int && !d.is_struct => {
                    IntBound::of_item(d.item_size, d.signed)
                }
                _ => IntBound::unbounded(),
            },
            _ => IntBound::unbounded(),
        }
    }

    /// Narrow the operands of the comparison that produced `cond`, now that
    /// a guard established `cond == truth`.
    pub fn narrow_from_guard(&mut self, cond: Value, truth: bool) -> OptResult<()> {
        let Some(var) = self.get_box_replacement(cond).var() else {
            return Ok(());
        };
        let Some(&pos) = self.producers.get(&var) else {
            return Ok(());
        };
        let producer = &self.new_operations[pos];
        let opcode = producer.opcode;
        let (a, b) = match producer.args.as_slice() {
            [a] => (*a, None),
            [a, b] => (*a, Some(*b)),
            _ => return Ok(()),
        };

        match (opcode, b) {
            (Opcode::IntIsTrue | Opcode::IntIsZero, _) => {
                if (opcode == Opcode::IntIsTrue) == truth {
                    self.narrow_bound(a, IntBound::make_nonzero)
                } else {
                    self.narrow_bound(a, |x| x.intersect(&IntBound::from_constant(0)))
                }
            }
            (_, Some(b)) if opcode.is_comparison() => {
                let rel = if truth { Some(opcode) } else { opcode.bool_inverse() };
                match rel {
                    Some(rel) => self.narrow_comparison(rel, a, b),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    fn narrow_comparison(&mut self, rel: Opcode, a: Value, b: Value) -> OptResult<()> {
        use Opcode::*;
        let (ba, bb) = (self.getintbound(a), self.getintbound(b));
        let rel = match rel {
            UintLt | UintLe | UintGt | UintGe
                if ba.known_nonnegative() && bb.known_nonnegative() =>
            {
                match rel {
                    UintLt => IntLt,
                    UintLe => IntLe,
                    UintGt => IntGt,
                    _ => IntGe,
                }
            }
            other => other,
        };
        match rel {
            IntLt => {
                self.narrow_bound(a, |x| x.make_lt(&bb))?;
                self.narrow_bound(b, |x| x.make_gt(&ba))
            }
            IntLe => {
                self.narrow_bound(a, |x| x.make_le(&bb))?;
                self.narrow_bound(b, |x| x.make_ge(&ba))
            }
            IntGt => {
                self.narrow_bound(a, |x| x.make_gt(&bb))?;
                self.narrow_bound(b, |x| x.make_lt(&ba))
            }
            IntGe => {
                self.narrow_bound(a, |x| x.make_ge(&bb))?;
                self.narrow_bound(b, |x| x.make_le(&ba))
            }
            IntEq => {
                self.narrow_bound(a, |x| x.intersect(&bb))?;
                self.narrow_bound(b, |x| x.intersect(&ba))
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Output
    // =========================================================================

    pub fn new_operations(&self) -> &[Operation] {
        &self.new_operations
    }

    /// Position the next emitted operation will get.
    pub fn next_position(&self) -> usize {
        self.new_operations.len()
    }

    pub fn operation_at(&self, pos: usize) -> &Operation {
        &self.new_operations[pos]
    }

    /// Overwrite an already emitted guard.
    pub fn replace_guard(&mut self, pos: usize, op: Operation) {
        trace!(pos, op = %op, "replace guard");
        self.new_operations[pos] = op;
    }

    pub fn fresh_var(&mut self, ty: ValueType) -> Var {
        self.vars.fresh(ty)
    }

    pub fn call_pure_result(&self, args: &[Const]) -> Option<Const> {
        let key: Vec<ConstKey> = args.iter().map(|&c| ConstKey(c)).collect();
        self.call_pure_results.get(&key).copied()
    }

    pub fn pure(&self) -> &PureCache {
        &self.pure
    }

    pub fn pure_mut(&mut self) -> &mut PureCache {
        &mut self.pure
    }

    /// Record the reverse forms of the most recently emitted operation.
    pub fn record_reverse_of_last(&mut self) {
        if let Some(op) = self.new_operations.last() {
            self.pure.record_reverse(op);
        }
    }

    #[inline]
    pub fn last_emitted_removed(&self) -> bool {
        self.last_emitted_removed
    }

    /// Note that the operation just handled was dropped.
    pub fn mark_last_removed(&mut self) {
        self.last_emitted_removed = true;
    }

    pub fn finish(self) -> (Vec<Operation>, VarAllocator, CallPureResults) {
        (self.new_operations, self.vars, self.call_pure_results)
    }
}

fn opcode_truth(positive: bool, known_nonzero: bool, known_zero: bool) -> Option<IntBound> {
    let value = if known_nonzero {
        positive
    } else if known_zero {
        !positive
    } else {
        return None;
    };
    Some(IntBound::from_constant(value as i64))
}

/// Bound of a signed integer comparison.
fn compare_bounds(opcode: Opcode, a: &IntBound, b: &IntBound, same_args: bool) -> IntBound {
    use Opcode::*;
    let decided = match opcode {
        IntLt => decide(a.known_lt(b), a.known_ge(b) || same_args),
        IntLe => decide(a.known_le(b) || same_args, a.known_gt(b)),
        IntGt => decide(a.known_gt(b), a.known_le(b) || same_args),
        IntGe => decide(a.known_ge(b) || same_args, a.known_lt(b)),
        IntEq => decide(
            same_args || (a.is_constant() && a == b),
            a.known_lt(b) || a.known_gt(b),
        ),
        IntNe => decide(
            a.known_lt(b) || a.known_gt(b),
            same_args || (a.is_constant() && a == b),
        ),
        _ => None,
    };
    decided.map_or(IntBound::boolean(), |v| IntBound::from_constant(v as i64))
}

fn decide(is_true: bool, is_false: bool) -> Option<bool> {
    if is_true {
        Some(true)
    } else if is_false {
        Some(false)
    } else {
        None
    }
}

// =============================================================================
// Constant Folding
// =============================================================================

/// Evaluate a pure opcode over constant arguments. `None` when the result
/// is undefined (division by zero, out-of-range cast) or the opcode is not
/// foldable.
pub fn fold_constant(opcode: Opcode, args: &[Const]) -> Option<Const> {
    use Opcode::*;
    let int = |i: usize| args.get(i).and_then(|c| c.as_int());
    let float = |i: usize| args.get(i).and_then(|c| c.as_float());
    let truth = |v: bool| Some(Const::Int(v as i64));
    let shift = |i: usize| int(i).filter(|s| (0..64).contains(s)).map(|s| s as u32);

    match opcode {
        IntAdd => Some(Const::Int(int(0)?.wrapping_add(int(1)?))),
        IntSub => Some(Const::Int(int(0)?.wrapping_sub(int(1)?))),
        IntMul => Some(Const::Int(int(0)?.wrapping_mul(int(1)?))),
        IntAnd => Some(Const::Int(int(0)? & int(1)?)),
        IntOr => Some(Const::Int(int(0)? | int(1)?)),
        IntXor => Some(Const::Int(int(0)? ^ int(1)?)),
        IntLshift => Some(Const::Int(int(0)?.wrapping_shl(shift(1)?))),
        IntRshift => Some(Const::Int(int(0)?.wrapping_shr(shift(1)?))),
        UintRshift => Some(Const::Int(((int(0)? as u64) >> shift(1)?) as i64)),
        IntFloordiv => {
            let (x, y) = (int(0)?, int(1)?);
            (y != 0).then(|| Const::Int(x.wrapping_div(y)))
        }
        UintFloordiv => {
            let (x, y) = (int(0)? as u64, int(1)? as u64);
            (y != 0).then(|| Const::Int((x / y) as i64))
        }
        IntMod => {
            let (x, y) = (int(0)?, int(1)?);
            (y != 0).then(|| Const::Int(x.wrapping_rem(y)))
        }
        IntNeg => Some(Const::Int(int(0)?.wrapping_neg())),
        IntInvert => Some(Const::Int(!int(0)?)),
        IntSignext => {
            let (x, n) = (int(0)?, int(1)?);
            match n {
                1..=7 => {
                    let s = 64 - 8 * n as u32;
                    Some(Const::Int((x << s) >> s))
                }
                8 => Some(Const::Int(x)),
                _ => None,
            }
        }
        IntIsTrue => truth(int(0)? != 0),
        IntIsZero => truth(int(0)? == 0),
        IntLt => truth(int(0)? < int(1)?),
        IntLe => truth(int(0)? <= int(1)?),
        IntEq => truth(int(0)? == int(1)?),
        IntNe => truth(int(0)? != int(1)?),
        IntGt => truth(int(0)? > int(1)?),
        IntGe => truth(int(0)? >= int(1)?),
        UintLt => truth((int(0)? as u64) < (int(1)? as u64)),
        UintLe => truth((int(0)? as u64) <= (int(1)? as u64)),
        UintGt => truth((int(0)? as u64) > (int(1)? as u64)),
        UintGe => truth((int(0)? as u64) >= (int(1)? as u64)),

        FloatAdd => Some(Const::Float(float(0)? + float(1)?)),
        FloatSub => Some(Const::Float(float(0)? - float(1)?)),
        FloatMul => Some(Const::Float(float(0)? * float(1)?)),
        FloatTruediv => {
            let (x, y) = (float(0)?, float(1)?);
            (y != 0.0).then(|| Const::Float(x / y))
        }
        FloatNeg => Some(Const::Float(-float(0)?)),
        FloatAbs => Some(Const::Float(float(0)?.abs())),
        FloatLt => truth(float(0)? < float(1)?),
        FloatLe => truth(float(0)? <= float(1)?),
        FloatEq => truth(float(0)? == float(1)?),
        FloatNe => truth(float(0)? != float(1)?),
        FloatGt => truth(float(0)? > float(1)?),
        FloatGe => truth(float(0)? >= float(1)?),

        CastFloatToInt => {
            let x = float(0)?;
            let in_range = x.is_finite() && x >= -9.223_372_036_854_776e18 && x < 9.223_372_036_854_776e18;
            in_range.then(|| Const::Int(x as i64))
        }
        CastIntToFloat => Some(Const::Float(int(0)? as f64)),
        CastFloatToSinglefloat => Some(Const::Int((float(0)? as f32).to_bits() as i64)),
        CastSinglefloatToFloat => Some(Const::Float(f32::from_bits(int(0)? as u32) as f64)),
        CastPtrToInt => Some(Const::Int(args.first()?.as_ref()? as i64)),
        CastIntToPtr => Some(Const::Ref(int(0)? as u64)),

        PtrEq | InstancePtrEq => truth(args.first()?.bits() == args.get(1)?.bits()),
        PtrNe | InstancePtrNe => truth(args.first()?.bits() != args.get(1)?.bits()),
        SameAs => args.first().copied(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::SimulatedCpu;

    fn ivar(id: u32) -> Var {
        Var::new(id, ValueType::Int)
    }

    fn optimizer(cpu: &SimulatedCpu) -> Optimizer<'_> {
        Optimizer::new(cpu, VarAllocator::starting_at(100), CallPureResults::default())
    }

    // -------------------------------------------------------------------------
    // Folding
    // -------------------------------------------------------------------------

    #[test]
    fn test_fold_int_arith_wraps() {
        assert_eq!(
            fold_constant(Opcode::IntAdd, &[Const::Int(i64::MAX), Const::Int(1)]),
            Some(Const::Int(i64::MIN))
        );
        assert_eq!(
            fold_constant(Opcode::IntFloordiv, &[Const::Int(-7), Const::Int(2)]),
            Some(Const::Int(-3))
        );
        assert_eq!(fold_constant(Opcode::IntFloordiv, &[Const::Int(1), Const::Int(0)]), None);
    }

    #[test]
    fn test_fold_shifts() {
        assert_eq!(
            fold_constant(Opcode::UintRshift, &[Const::Int(-1), Const::Int(60)]),
            Some(Const::Int(15))
        );
        assert_eq!(fold_constant(Opcode::IntLshift, &[Const::Int(1), Const::Int(64)]), None);
    }

    #[test]
    fn test_fold_signext() {
        assert_eq!(
            fold_constant(Opcode::IntSignext, &[Const::Int(0xff), Const::Int(1)]),
            Some(Const::Int(-1))
        );
    }

    #[test]
    fn test_fold_float_compare_nan() {
        let nan = Const::Float(f64::NAN);
        assert_eq!(fold_constant(Opcode::FloatEq, &[nan, nan]), Some(Const::Int(0)));
        assert_eq!(fold_constant(Opcode::FloatNe, &[nan, nan]), Some(Const::Int(1)));
    }

    #[test]
    fn test_fold_cast_out_of_range() {
        assert_eq!(fold_constant(Opcode::CastFloatToInt, &[Const::Float(1e30)]), None);
        assert_eq!(
            fold_constant(Opcode::CastFloatToInt, &[Const::Float(-2.7)]),
            Some(Const::Int(-2))
        );
    }

    // -------------------------------------------------------------------------
    // Emission
    // -------------------------------------------------------------------------

    #[test]
    fn test_emit_folds_constants() {
        let cpu = SimulatedCpu::sse();
        let mut opt = optimizer(&cpu);
        let r = ivar(1);
        let op = Operation::new(Opcode::IntAdd, [Value::int(2), Value::int(3)], Some(r));
        assert!(!opt.emit_operation(op).unwrap());
        assert_eq!(opt.get_box_replacement(r.into()), Value::int(5));
        assert!(opt.new_operations().is_empty());
    }

    #[test]
    fn test_emit_reuses_pure_result() {
        let cpu = SimulatedCpu::sse();
        let mut opt = optimizer(&cpu);
        let (a, r1, r2) = (ivar(0), ivar(1), ivar(2));
        let args = [Value::Var(a), Value::int(3)];
        assert!(opt
            .emit_operation(Operation::new(Opcode::IntMul, args, Some(r1)))
            .unwrap());
        assert!(!opt
            .emit_operation(Operation::new(Opcode::IntMul, args, Some(r2)))
            .unwrap());
        assert_eq!(opt.get_box_replacement(r2.into()), Value::Var(r1));
    }

    #[test]
    fn test_emit_forces_replacements_into_snapshot() {
        let cpu = SimulatedCpu::sse();
        let mut opt = optimizer(&cpu);
        let (a, b) = (ivar(0), ivar(1));
        opt.make_equal_to(b, Value::Var(a));
        let guard = Operation::new(Opcode::GuardTrue, [Value::Var(b)], None)
            .with_snapshot(Snapshot::root([Value::Var(b)]));
        opt.emit_operation(guard).unwrap();
        let emitted = &opt.new_operations()[0];
        assert_eq!(emitted.arg(0), Value::Var(a));
        assert_eq!(emitted.fail_args().collect::<Vec<_>>(), vec![Value::Var(a)]);
    }

    #[test]
    fn test_forward_bound_decides_comparison() {
        let cpu = SimulatedCpu::sse();
        let mut opt = optimizer(&cpu);
        let (a, masked, cmp) = (ivar(0), ivar(1), ivar(2));
        opt.emit_operation(Operation::new(
            Opcode::IntAnd,
            [Value::Var(a), Value::int(7)],
            Some(masked),
        ))
        .unwrap();
        assert_eq!(opt.getintbound(masked.into()), IntBound::new(0, 7));
        let lt = Operation::new(Opcode::IntLt, [Value::Var(masked), Value::int(8)], Some(cmp));
        assert!(!opt.emit_operation(lt).unwrap());
        assert_eq!(opt.get_constant_int(cmp.into()), Some(1));
    }

    #[test]
    fn test_narrow_from_guard() {
        let cpu = SimulatedCpu::sse();
        let mut opt = optimizer(&cpu);
        let (i, cmp) = (ivar(0), ivar(1));
        opt.emit_operation(Operation::new(
            Opcode::IntLt,
            [Value::Var(i), Value::int(10)],
            Some(cmp),
        ))
        .unwrap();
        opt.narrow_from_guard(cmp.into(), true).unwrap();
        assert_eq!(opt.getintbound(i.into()).upper, 9);

        let (j, cmp2) = (ivar(2), ivar(3));
        opt.emit_operation(Operation::new(
            Opcode::IntLt,
            [Value::Var(j), Value::int(0)],
            Some(cmp2),
        ))
        .unwrap();
        opt.narrow_from_guard(cmp2.into(), false).unwrap();
        assert!(opt.getintbound(j.into()).known_nonnegative());
    }

    #[test]
    fn test_narrow_to_constant_replaces() {
        let cpu = SimulatedCpu::sse();
        let mut opt = optimizer(&cpu);
        let (i, cmp) = (ivar(0), ivar(1));
        opt.emit_operation(Operation::new(
            Opcode::IntEq,
            [Value::Var(i), Value::int(4)],
            Some(cmp),
        ))
        .unwrap();
        opt.narrow_from_guard(cmp.into(), true).unwrap();
        assert_eq!(opt.get_box_replacement(i.into()), Value::int(4));
    }

    #[test]
    fn test_constant_ptr_info() {
        let cpu = SimulatedCpu::sse().with_object(0x100, 0x8, 1);
        let opt = optimizer(&cpu);
        assert!(opt.ptr_info(Value::ptr(0)).is_null());
        let info = opt.ptr_info(Value::ptr(0x100));
        assert!(info.is_nonnull());
        assert_eq!(info.known_class(), Some(0x8));
    }
}
