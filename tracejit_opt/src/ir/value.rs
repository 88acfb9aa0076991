//! Trace values: SSA boxes, constants and operands.
//!
//! Every operation in a trace reads [`Value`]s and defines at most one
//! [`Var`]. Constants are compared by bit pattern so that `0.0`, `-0.0`
//! and NaN payloads stay distinct, which is what the optimizer needs for
//! memoization and constant guards.

use std::fmt;
use std::hash::{Hash, Hasher};

// =============================================================================
// Value Types
// =============================================================================

/// Element kind of a vector lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    Int,
    Float,
}

/// Shape of a vector register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorSpec {
    /// Lane element kind.
    pub kind: ElemKind,
    /// Number of lanes.
    pub count: u16,
    /// Size of one lane in bytes.
    pub item_size: u8,
    /// Whether integer lanes are signed.
    pub signed: bool,
}

impl VectorSpec {
    #[inline]
    pub const fn new(kind: ElemKind, count: u16, item_size: u8, signed: bool) -> Self {
        Self {
            kind,
            count,
            item_size,
            signed,
        }
    }

    /// Total width in bytes.
    #[inline]
    pub const fn byte_size(self) -> usize {
        self.count as usize * self.item_size as usize
    }

    /// Same lane type, different lane count.
    #[inline]
    pub const fn with_count(self, count: u16) -> Self {
        Self { count, ..self }
    }

    /// Same lane count, different lane size.
    #[inline]
    pub const fn with_item_size(self, item_size: u8) -> Self {
        Self { item_size, ..self }
    }
}

impl fmt::Display for VectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let k = match self.kind {
            ElemKind::Int if self.signed => 'i',
            ElemKind::Int => 'u',
            ElemKind::Float => 'f',
        };
        write!(f, "<{}x{}{}>", self.count, k, self.item_size as u32 * 8)
    }
}

/// Type of a trace value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Machine-word integer (also used for raw addresses).
    Int,
    /// 64-bit float.
    Float,
    /// GC reference.
    Ref,
    /// SIMD register.
    Vector(VectorSpec),
}

impl ValueType {
    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(self, ValueType::Int)
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, ValueType::Float)
    }

    #[inline]
    pub const fn is_ref(self) -> bool {
        matches!(self, ValueType::Ref)
    }

    #[inline]
    pub const fn is_vector(self) -> bool {
        matches!(self, ValueType::Vector(_))
    }

    #[inline]
    pub const fn vector(self) -> Option<VectorSpec> {
        match self {
            ValueType::Vector(spec) => Some(spec),
            _ => None,
        }
    }

    /// One-letter prefix used when printing boxes.
    pub const fn prefix(self) -> char {
        match self {
            ValueType::Int => 'i',
            ValueType::Float => 'f',
            ValueType::Ref => 'p',
            ValueType::Vector(_) => 'v',
        }
    }
}

// =============================================================================
// Var
// =============================================================================

/// An SSA box: the result of exactly one operation or an input argument.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var {
    id: u32,
    ty: ValueType,
}

impl Var {
    #[inline]
    pub const fn new(id: u32, ty: ValueType) -> Self {
        Self { id, ty }
    }

    #[inline]
    pub const fn id(self) -> u32 {
        self.id
    }

    #[inline]
    pub const fn ty(self) -> ValueType {
        self.ty
    }

    #[inline]
    pub const fn vector(self) -> Option<VectorSpec> {
        self.ty.vector()
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ty.prefix(), self.id)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Hands out fresh box ids for a trace.
#[derive(Debug, Clone, Default)]
pub struct VarAllocator {
    next: u32,
}

impl VarAllocator {
    /// Start allocating at `next`.
    pub const fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Allocate a new box of type `ty`.
    pub fn fresh(&mut self, ty: ValueType) -> Var {
        let var = Var::new(self.next, ty);
        self.next += 1;
        var
    }

    /// Make sure future ids do not collide with `var`.
    pub fn reserve(&mut self, var: Var) {
        self.next = self.next.max(var.id() + 1);
    }

    /// Id the next allocation will get.
    pub const fn peek(&self) -> u32 {
        self.next
    }
}

// =============================================================================
// Constants
// =============================================================================

/// A compile-time constant operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    /// Address of a GC object; `0` is NULL.
    Ref(u64),
}

impl Const {
    pub const NULL: Const = Const::Ref(0);

    pub const fn ty(self) -> ValueType {
        match self {
            Const::Int(_) => ValueType::Int,
            Const::Float(_) => ValueType::Float,
            Const::Ref(_) => ValueType::Ref,
        }
    }

    #[inline]
    pub const fn as_int(self) -> Option<i64> {
        match self {
            Const::Int(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_float(self) -> Option<f64> {
        match self {
            Const::Float(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_ref(self) -> Option<u64> {
        match self {
            Const::Ref(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret the constant as an address (class pointers are stored
    /// either as integers or references).
    pub const fn as_address(self) -> Option<u64> {
        match self {
            Const::Int(v) => Some(v as u64),
            Const::Ref(v) => Some(v),
            Const::Float(_) => None,
        }
    }

    /// Raw 64-bit pattern.
    pub fn bits(self) -> u64 {
        match self {
            Const::Int(v) => v as u64,
            Const::Float(v) => v.to_bits(),
            Const::Ref(v) => v,
        }
    }

    /// `false` only for a NULL reference or a zero integer.
    pub fn nonnull(self) -> bool {
        match self {
            Const::Int(v) => v != 0,
            Const::Ref(v) => v != 0,
            Const::Float(v) => v != 0.0,
        }
    }

    /// Bit-exact equality.
    pub fn same_constant(self, other: Const) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other) && self.bits() == other.bits()
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{}", v),
            Const::Float(v) => write!(f, "{:?}", v),
            Const::Ref(0) => write!(f, "NULL"),
            Const::Ref(v) => write!(f, "ConstPtr(0x{:x})", v),
        }
    }
}

/// Hashable wrapper comparing constants by value identity (bit pattern).
#[derive(Debug, Clone, Copy)]
pub struct ConstKey(pub Const);

impl PartialEq for ConstKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_constant(other.0)
    }
}

impl Eq for ConstKey {}

impl Hash for ConstKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        self.0.bits().hash(state);
    }
}

// =============================================================================
// Value
// =============================================================================

/// An operand: either a box or a constant.
#[derive(Clone, Copy)]
pub enum Value {
    Var(Var),
    Const(Const),
}

impl Value {
    #[inline]
    pub const fn int(v: i64) -> Self {
        Value::Const(Const::Int(v))
    }

    #[inline]
    pub const fn float(v: f64) -> Self {
        Value::Const(Const::Float(v))
    }

    #[inline]
    pub const fn ptr(v: u64) -> Self {
        Value::Const(Const::Ref(v))
    }

    #[inline]
    pub const fn var(self) -> Option<Var> {
        match self {
            Value::Var(v) => Some(v),
            Value::Const(_) => None,
        }
    }

    #[inline]
    pub const fn constant(self) -> Option<Const> {
        match self {
            Value::Const(c) => Some(c),
            Value::Var(_) => None,
        }
    }

    #[inline]
    pub const fn is_const(self) -> bool {
        matches!(self, Value::Const(_))
    }

    pub const fn ty(self) -> ValueType {
        match self {
            Value::Var(v) => v.ty(),
            Value::Const(c) => c.ty(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Var(a), Value::Var(b)) => a == b,
            (Value::Const(a), Value::Const(b)) => ConstKey(*a) == ConstKey(*b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Var(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Const(c) => {
                1u8.hash(state);
                ConstKey(*c).hash(state);
            }
        }
    }
}

impl From<Var> for Value {
    fn from(v: Var) -> Self {
        Value::Var(v)
    }
}

impl From<Const> for Value {
    fn from(c: Const) -> Self {
        Value::Const(c)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Var(v) => write!(f, "{:?}", v),
            Value::Const(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_const_identity_is_bitwise() {
        assert!(Const::Float(0.0).same_constant(Const::Float(0.0)));
        assert!(!Const::Float(0.0).same_constant(Const::Float(-0.0)));
        assert!(Const::Float(f64::NAN).same_constant(Const::Float(f64::NAN)));
        assert!(!Const::Int(1).same_constant(Const::Ref(1)));
    }

    #[test]
    fn test_value_hash_uses_const_identity() {
        let mut set = FxHashSet::default();
        set.insert(Value::float(0.0));
        set.insert(Value::float(-0.0));
        set.insert(Value::float(0.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_var_allocator() {
        let mut vars = VarAllocator::starting_at(3);
        let a = vars.fresh(ValueType::Int);
        assert_eq!(a.id(), 3);
        vars.reserve(Var::new(10, ValueType::Float));
        assert_eq!(vars.fresh(ValueType::Ref).id(), 11);
    }

    #[test]
    fn test_display() {
        let v = Var::new(4, ValueType::Float);
        assert_eq!(format!("{}", v), "f4");
        assert_eq!(format!("{}", Value::ptr(0)), "NULL");
        let spec = VectorSpec::new(ElemKind::Int, 4, 4, true);
        assert_eq!(format!("{}", spec), "<4xi32>");
        assert_eq!(spec.byte_size(), 16);
    }
}
