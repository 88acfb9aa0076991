//! Affine index tracking and memory references.
//!
//! In SSA form an array index is just a box, so adjacency of two accesses
//! cannot be read off the operands. Instead every integer box that is an
//! affine function of another box is described as
//! `var * coefficient_mul / coefficient_div + constant`. After unrolling,
//! `i1 = int_add(i0, 1)` gives `i1 = i0 + 1`, and the accesses `a[i0]` and
//! `a[i1]` are recognized as neighbours.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ir::{ArrayDescr, Opcode, Operation, Value, Var};

// =============================================================================
// Index Variables
// =============================================================================

/// `var * coefficient_mul / coefficient_div + constant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexVar {
    /// Base box; `None` for a constant index.
    pub var: Option<Var>,
    pub coefficient_mul: i64,
    pub coefficient_div: i64,
    pub constant: i64,
}

impl IndexVar {
    pub const fn new(var: Var) -> Self {
        Self {
            var: Some(var),
            coefficient_mul: 1,
            coefficient_div: 1,
            constant: 0,
        }
    }

    pub const fn constant(value: i64) -> Self {
        Self {
            var: None,
            coefficient_mul: 1,
            coefficient_div: 1,
            constant: value,
        }
    }

    /// Index of an operand, looked up in `known`.
    pub fn of_value(value: Value, known: &FxHashMap<Var, IndexVar>) -> Option<Self> {
        match value {
            Value::Var(var) if var.ty().is_int() => {
                Some(known.get(&var).copied().unwrap_or(IndexVar::new(var)))
            }
            Value::Const(c) => c.as_int().map(IndexVar::constant),
            Value::Var(_) => None,
        }
    }

    #[inline]
    pub fn same_variable(&self, other: &IndexVar) -> bool {
        self.var == other.var
    }

    #[inline]
    pub fn same_mulfactor(&self, other: &IndexVar) -> bool {
        self.coefficient_mul == other.coefficient_mul
            && self.coefficient_div == other.coefficient_div
    }

    /// `self.constant - other.constant`.
    pub fn constant_diff(&self, other: &IndexVar) -> Option<i64> {
        self.constant.checked_sub(other.constant)
    }

    /// Plain `var + constant`.
    pub fn is_unit(&self) -> bool {
        self.coefficient_mul == 1 && self.coefficient_div == 1
    }

    pub fn add_const(self, c: i64) -> Option<Self> {
        Some(Self {
            constant: self.constant.checked_add(c)?,
            ..self
        })
    }

    pub fn sub_const(self, c: i64) -> Option<Self> {
        Some(Self {
            constant: self.constant.checked_sub(c)?,
            ..self
        })
    }

    pub fn mul_const(self, c: i64) -> Option<Self> {
        Some(Self {
            coefficient_mul: self.coefficient_mul.checked_mul(c)?,
            constant: self.constant.checked_mul(c)?,
            ..self
        })
    }

    /// Only exact divisions of the constant part are tracked.
    pub fn div_const(self, c: i64) -> Option<Self> {
        if c <= 0 || self.constant % c != 0 {
            return None;
        }
        Some(Self {
            coefficient_div: self.coefficient_div.checked_mul(c)?,
            constant: self.constant / c,
            ..self
        })
    }

    /// Rewrite a pure `INT_ADD`/`INT_SUB` defining this index into
    /// `int_add(var, constant)`, cutting the chain through intermediate
    /// index boxes.
    pub fn adapt_operation(&self, op: &mut Operation) {
        if !matches!(op.opcode, Opcode::IntAdd | Opcode::IntSub) || !self.is_unit() {
            return;
        }
        let Some(var) = self.var else {
            return;
        };
        if self.constant == 0 || op.result == Some(var) {
            return;
        }
        op.opcode = Opcode::IntAdd;
        op.args.clear();
        op.args.push(Value::Var(var));
        op.args.push(Value::int(self.constant));
    }
}

impl fmt::Display for IndexVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.var {
            Some(var) if self.is_unit() => write!(f, "{} + {}", var, self.constant),
            Some(var) => write!(
                f,
                "{} * {} / {} + {}",
                var, self.coefficient_mul, self.coefficient_div, self.constant
            ),
            None => write!(f, "{}", self.constant),
        }
    }
}

/// Affine descriptions of every integer box defined by `ops` in terms of
/// an earlier box.
pub fn compute_index_vars(ops: &[Operation]) -> FxHashMap<Var, IndexVar> {
    let mut known = FxHashMap::default();
    for op in ops {
        let Some(res) = op.result else {
            continue;
        };
        if let Some(iv) = derive_index_var(op, &known) {
            known.insert(res, iv);
        }
    }
    known
}

fn derive_index_var(op: &Operation, known: &FxHashMap<Var, IndexVar>) -> Option<IndexVar> {
    if op.num_args() != 2 {
        return None;
    }
    let (a, b) = (op.arg(0), op.arg(1));
    let var_and_const = || match (a, b) {
        (Value::Var(v), Value::Const(c)) => Some((v, c.as_int()?, false)),
        (Value::Const(c), Value::Var(v)) => Some((v, c.as_int()?, true)),
        _ => None,
    };
    let base = |v: Var| known.get(&v).copied().unwrap_or(IndexVar::new(v));

    match op.opcode {
        Opcode::IntAdd => {
            let (v, c, _) = var_and_const()?;
            base(v).add_const(c)
        }
        Opcode::IntSub => match var_and_const()? {
            (v, c, false) => base(v).sub_const(c),
            _ => None,
        },
        Opcode::IntMul => {
            let (v, c, _) = var_and_const()?;
            base(v).mul_const(c)
        }
        Opcode::IntFloordiv => match var_and_const()? {
            (v, c, false) => base(v).div_const(c),
            _ => None,
        },
        _ => None,
    }
}

// =============================================================================
// Memory References
// =============================================================================

/// The location touched by an array access.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRef {
    pub array: Value,
    pub descr: Arc<ArrayDescr>,
    pub index: IndexVar,
    /// Raw access indexed in bytes rather than items.
    pub byte_index: bool,
}

impl MemoryRef {
    /// Reference of an array operation (`array, index, ...` operands).
    pub fn of_operation(op: &Operation, index_vars: &FxHashMap<Var, IndexVar>) -> Option<Self> {
        if !op.opcode.is_array_op() || op.num_args() < 2 {
            return None;
        }
        let descr = op.array_descr()?;
        let index = IndexVar::of_value(op.arg(1), index_vars)?;
        Some(Self {
            array: op.arg(0),
            descr: Arc::clone(descr),
            index,
            byte_index: op.opcode.is_byte_indexed(),
        })
    }

    /// Index distance between two neighbouring items.
    pub fn stride(&self) -> i64 {
        if self.byte_index {
            self.descr.item_size as i64
        } else {
            1
        }
    }

    /// Same array, same descriptor.
    pub fn same_array(&self, other: &MemoryRef) -> bool {
        self.array == other.array && self.descr == other.descr
    }

    fn same_affine_base(&self, other: &MemoryRef) -> bool {
        self.same_array(other)
            && self.index.same_variable(&other.index)
            && self.index.same_mulfactor(&other.index)
    }

    /// The two references touch neighbouring items, in either order.
    pub fn is_adjacent_to(&self, other: &MemoryRef) -> bool {
        self.same_affine_base(other)
            && self
                .index
                .constant_diff(&other.index)
                .is_some_and(|d| d.abs() == self.stride())
    }

    /// `other` touches the item directly after `self`.
    pub fn is_adjacent_after(&self, other: &MemoryRef) -> bool {
        self.same_affine_base(other)
            && other
                .index
                .constant_diff(&self.index)
                .is_some_and(|d| d == self.stride())
    }

    /// Whether the two references may touch the same item. Two array
    /// operands may name the same array at runtime, so only a constant gap
    /// between the indices separates accesses with the same descriptor.
    pub fn may_alias(&self, other: &MemoryRef) -> bool {
        if self.descr != other.descr {
            return false;
        }
        if self.byte_index != other.byte_index
            || !self.index.same_variable(&other.index)
            || !self.index.same_mulfactor(&other.index)
        {
            return true;
        }
        match self.index.constant_diff(&other.index) {
            Some(d) => d.abs() < self.stride(),
            None => true,
        }
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.array, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{TraceBuilder, ValueType};

    fn ivar(id: u32) -> Var {
        Var::new(id, ValueType::Int)
    }

    fn memref(array: u32, index: IndexVar) -> MemoryRef {
        MemoryRef {
            array: Value::Var(Var::new(array, ValueType::Ref)),
            descr: ArrayDescr::ints(1, 4),
            index,
            byte_index: false,
        }
    }

    // -------------------------------------------------------------------------
    // Index variables
    // -------------------------------------------------------------------------

    #[test]
    fn test_index_chain() {
        let mut b = TraceBuilder::new();
        let i0 = b.int();
        let i1 = b.pure(Opcode::IntAdd, &[i0.into(), Value::int(1)]);
        let i2 = b.pure(Opcode::IntAdd, &[Value::int(2), i1.into()]);
        let i3 = b.pure(Opcode::IntMul, &[i2.into(), Value::int(4)]);
        let i4 = b.pure(Opcode::IntSub, &[i3.into(), Value::int(4)]);
        let trace = b.build();

        let known = compute_index_vars(&trace.ops);
        assert_eq!(known[&i2], IndexVar::new(i0).add_const(3).unwrap());
        let iv = known[&i4];
        assert_eq!(iv.var, Some(i0));
        assert_eq!(iv.coefficient_mul, 4);
        assert_eq!(iv.constant, 8);
    }

    #[test]
    fn test_div_requires_exact_constant() {
        let iv = IndexVar::new(ivar(0)).add_const(3).unwrap();
        assert!(iv.div_const(2).is_none());
        let iv = IndexVar::new(ivar(0)).add_const(4).unwrap();
        let d = iv.div_const(2).unwrap();
        assert_eq!((d.coefficient_div, d.constant), (2, 2));
    }

    #[test]
    fn test_overflow_stops_tracking() {
        let iv = IndexVar::new(ivar(0)).add_const(i64::MAX).unwrap();
        assert!(iv.add_const(1).is_none());
    }

    #[test]
    fn test_adapt_operation() {
        let (i0, i1, i2) = (ivar(0), ivar(1), ivar(2));
        let mut op = Operation::new(Opcode::IntAdd, [i1.into(), Value::int(1)], Some(i2));
        IndexVar::new(i0).add_const(2).unwrap().adapt_operation(&mut op);
        assert_eq!(op.args.as_slice(), &[Value::Var(i0), Value::int(2)]);
    }

    // -------------------------------------------------------------------------
    // Memory references
    // -------------------------------------------------------------------------

    #[test]
    fn test_adjacency() {
        let i0 = ivar(0);
        let a = memref(10, IndexVar::new(i0));
        let b = memref(10, IndexVar::new(i0).add_const(1).unwrap());
        let c = memref(10, IndexVar::new(i0).add_const(2).unwrap());
        assert!(a.is_adjacent_to(&b));
        assert!(b.is_adjacent_to(&a));
        assert!(a.is_adjacent_after(&b));
        assert!(!b.is_adjacent_after(&a));
        assert!(!a.is_adjacent_to(&c));
    }

    #[test]
    fn test_adjacency_needs_same_array() {
        let i0 = ivar(0);
        let a = memref(10, IndexVar::new(i0));
        let b = memref(11, IndexVar::new(i0).add_const(1).unwrap());
        assert!(!a.is_adjacent_to(&b));
    }

    #[test]
    fn test_byte_indexed_stride() {
        let i0 = ivar(0);
        let mut a = memref(10, IndexVar::new(i0));
        let mut b = memref(10, IndexVar::new(i0).add_const(4).unwrap());
        a.byte_index = true;
        b.byte_index = true;
        assert!(a.is_adjacent_after(&b));
        assert!(!a.may_alias(&b));
    }

    #[test]
    fn test_may_alias() {
        let (i0, i9) = (ivar(0), ivar(9));
        let a = memref(10, IndexVar::new(i0));
        assert!(a.may_alias(&memref(10, IndexVar::new(i0))));
        assert!(!a.may_alias(&memref(10, IndexVar::new(i0).add_const(1).unwrap())));
        assert!(a.may_alias(&memref(10, IndexVar::new(i9))));
    }

    #[test]
    fn test_distinct_arrays_may_alias() {
        let (i0, i9) = (ivar(0), ivar(9));
        let a = memref(10, IndexVar::new(i0));
        assert!(a.may_alias(&memref(11, IndexVar::new(i0))));
        assert!(a.may_alias(&memref(11, IndexVar::new(i9))));
        assert!(!a.may_alias(&memref(11, IndexVar::new(i0).add_const(1).unwrap())));

        let mut floats = memref(11, IndexVar::new(i0));
        floats.descr = ArrayDescr::floats(2, 8);
        assert!(!a.may_alias(&floats));
    }
}
