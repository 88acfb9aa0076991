//! Integer interval lattice.
//!
//! An [`IntBound`] is a closed interval `[lower, upper]` of `i64` that is
//! known to contain a box's runtime value. Transfer functions are sound
//! under wrapping arithmetic: whenever a result could overflow, they return
//! the unbounded interval.
//!
//! Narrowing ([`IntBound::intersect`] and the `make_*` family) only ever
//! shrinks an interval. Narrowing to the empty set means the trace
//! contradicts itself and is reported as [`OptError::InvalidLoop`].

use std::fmt;

use super::error::{OptError, OptResult};

/// Closed `i64` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntBound {
    pub lower: i64,
    pub upper: i64,
}

impl Default for IntBound {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl IntBound {
    #[inline]
    pub const fn new(lower: i64, upper: i64) -> Self {
        debug_assert!(lower <= upper);
        Self { lower, upper }
    }

    #[inline]
    pub const fn unbounded() -> Self {
        Self {
            lower: i64::MIN,
            upper: i64::MAX,
        }
    }

    #[inline]
    pub const fn from_constant(value: i64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    #[inline]
    pub const fn nonnegative() -> Self {
        Self {
            lower: 0,
            upper: i64::MAX,
        }
    }

    /// `[0, 1]`.
    #[inline]
    pub const fn boolean() -> Self {
        Self { lower: 0, upper: 1 }
    }

    /// Values representable in `bytes` bytes.
    pub fn of_item(bytes: usize, signed: bool) -> Self {
        match (bytes, signed) {
            (1..=7, true) => {
                let half = 1i64 << (bytes * 8 - 1);
                Self::new(-half, half - 1)
            }
            (1..=7, false) => Self::new(0, (1i64 << (bytes * 8)) - 1),
            _ => Self::unbounded(),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub const fn is_constant(&self) -> bool {
        self.lower == self.upper
    }

    #[inline]
    pub const fn get_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.lower)
        } else {
            None
        }
    }

    /// Known to be exactly `value`.
    #[inline]
    pub const fn equal(&self, value: i64) -> bool {
        self.lower == value && self.upper == value
    }

    #[inline]
    pub const fn contains(&self, value: i64) -> bool {
        self.lower <= value && value <= self.upper
    }

    #[inline]
    pub const fn is_unbounded(&self) -> bool {
        self.lower == i64::MIN && self.upper == i64::MAX
    }

    /// Every value is 0 or 1.
    #[inline]
    pub const fn is_bool(&self) -> bool {
        self.lower >= 0 && self.upper <= 1
    }

    #[inline]
    pub const fn known_nonnegative(&self) -> bool {
        self.lower >= 0
    }

    #[inline]
    pub const fn known_nonzero(&self) -> bool {
        !self.contains(0)
    }

    /// Every value of `self` is below every value of `other`.
    #[inline]
    pub const fn known_lt(&self, other: &IntBound) -> bool {
        self.upper < other.lower
    }

    #[inline]
    pub const fn known_le(&self, other: &IntBound) -> bool {
        self.upper <= other.lower
    }

    #[inline]
    pub const fn known_gt(&self, other: &IntBound) -> bool {
        other.known_lt(self)
    }

    #[inline]
    pub const fn known_ge(&self, other: &IntBound) -> bool {
        other.known_le(self)
    }

    /// `self` is at least as precise as `other`.
    #[inline]
    pub const fn is_within(&self, other: &IntBound) -> bool {
        other.lower <= self.lower && self.upper <= other.upper
    }

    // =========================================================================
    // Narrowing
    // =========================================================================

    /// Restrict to values also in `other`. Returns whether anything changed.
    pub fn intersect(&mut self, other: &IntBound) -> OptResult<bool> {
        self.narrow(other.lower, other.upper)
    }

    /// Restrict to values below some value of `other`.
    pub fn make_lt(&mut self, other: &IntBound) -> OptResult<bool> {
        match other.upper.checked_sub(1) {
            Some(upper) => self.narrow(i64::MIN, upper),
            None => Err(empty(self, "< i64::MIN")),
        }
    }

    pub fn make_le(&mut self, other: &IntBound) -> OptResult<bool> {
        self.narrow(i64::MIN, other.upper)
    }

    pub fn make_gt(&mut self, other: &IntBound) -> OptResult<bool> {
        match other.lower.checked_add(1) {
            Some(lower) => self.narrow(lower, i64::MAX),
            None => Err(empty(self, "> i64::MAX")),
        }
    }

    pub fn make_ge(&mut self, other: &IntBound) -> OptResult<bool> {
        self.narrow(other.lower, i64::MAX)
    }

    /// Exclude zero where that can be expressed as an interval.
    pub fn make_nonzero(&mut self) -> OptResult<bool> {
        if self.lower == 0 {
            self.narrow(1, i64::MAX)
        } else if self.upper == 0 {
            self.narrow(i64::MIN, -1)
        } else {
            Ok(false)
        }
    }

    fn narrow(&mut self, lower: i64, upper: i64) -> OptResult<bool> {
        let new_lower = self.lower.max(lower);
        let new_upper = self.upper.min(upper);
        if new_lower > new_upper {
            return Err(empty(self, &format!("[{}, {}]", lower, upper)));
        }
        let changed = new_lower != self.lower || new_upper != self.upper;
        self.lower = new_lower;
        self.upper = new_upper;
        Ok(changed)
    }

    /// Smallest interval containing both.
    pub fn union(&self, other: &IntBound) -> IntBound {
        IntBound::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }

    // =========================================================================
    // Transfer Functions
    // =========================================================================

    pub fn add(&self, other: &IntBound) -> IntBound {
        match (
            self.lower.checked_add(other.lower),
            self.upper.checked_add(other.upper),
        ) {
            (Some(lo), Some(hi)) => IntBound::new(lo, hi),
            _ => IntBound::unbounded(),
        }
    }

    pub fn sub(&self, other: &IntBound) -> IntBound {
        match (
            self.lower.checked_sub(other.upper),
            self.upper.checked_sub(other.lower),
        ) {
            (Some(lo), Some(hi)) => IntBound::new(lo, hi),
            _ => IntBound::unbounded(),
        }
    }

    pub fn mul(&self, other: &IntBound) -> IntBound {
        let corners = [
            self.lower.checked_mul(other.lower),
            self.lower.checked_mul(other.upper),
            self.upper.checked_mul(other.lower),
            self.upper.checked_mul(other.upper),
        ];
        let mut lo = i64::MAX;
        let mut hi = i64::MIN;
        for c in corners {
            match c {
                Some(v) => {
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
                None => return IntBound::unbounded(),
            }
        }
        IntBound::new(lo, hi)
    }

    pub fn neg(&self) -> IntBound {
        if self.lower == i64::MIN {
            IntBound::unbounded()
        } else {
            IntBound::new(-self.upper, -self.lower)
        }
    }

    pub fn and(&self, other: &IntBound) -> IntBound {
        match (self.known_nonnegative(), other.known_nonnegative()) {
            (true, true) => IntBound::new(0, self.upper.min(other.upper)),
            (true, false) => IntBound::new(0, self.upper),
            (false, true) => IntBound::new(0, other.upper),
            (false, false) => IntBound::unbounded(),
        }
    }

    pub fn or(&self, other: &IntBound) -> IntBound {
        if self.known_nonnegative() && other.known_nonnegative() {
            let hi = fill_low_bits(self.upper.max(other.upper));
            IntBound::new(self.lower.max(other.lower), hi)
        } else {
            IntBound::unbounded()
        }
    }

    pub fn xor(&self, other: &IntBound) -> IntBound {
        if self.known_nonnegative() && other.known_nonnegative() {
            IntBound::new(0, fill_low_bits(self.upper.max(other.upper)))
        } else {
            IntBound::unbounded()
        }
    }

    pub fn lshift(&self, other: &IntBound) -> IntBound {
        match other.get_constant() {
            Some(c @ 0..=63) => {
                let lo = self.lower << c;
                let hi = self.upper << c;
                if lo >> c == self.lower && hi >> c == self.upper {
                    IntBound::new(lo, hi)
                } else {
                    IntBound::unbounded()
                }
            }
            _ => IntBound::unbounded(),
        }
    }

    /// Arithmetic right shift.
    pub fn rshift(&self, other: &IntBound) -> IntBound {
        if other.lower < 0 || other.upper > 63 {
            return IntBound::unbounded();
        }
        let (s0, s1) = (other.lower, other.upper);
        let lo = (self.lower >> s0).min(self.lower >> s1);
        let hi = (self.upper >> s0).max(self.upper >> s1);
        IntBound::new(lo, hi)
    }

    /// Logical right shift.
    pub fn uint_rshift(&self, other: &IntBound) -> IntBound {
        if self.known_nonnegative() {
            return self.rshift(other);
        }
        match other.get_constant() {
            Some(c @ 1..=63) => IntBound::new(0, (u64::MAX >> c) as i64),
            _ => IntBound::unbounded(),
        }
    }

    /// Truncating division.
    pub fn floordiv(&self, other: &IntBound) -> IntBound {
        match other.get_constant() {
            Some(c) if c > 0 => IntBound::new(self.lower / c, self.upper / c),
            _ => IntBound::unbounded(),
        }
    }

    /// Truncating remainder.
    pub fn modulo(&self, other: &IntBound) -> IntBound {
        match other.get_constant() {
            Some(c) if c > 0 && self.known_nonnegative() => IntBound::new(0, self.upper.min(c - 1)),
            Some(c) if c > 0 => IntBound::new(-(c - 1), c - 1),
            _ => IntBound::unbounded(),
        }
    }

    /// Sign extension from `bytes` bytes.
    pub fn signext(&self, bytes: &IntBound) -> IntBound {
        match bytes.get_constant() {
            Some(b @ 1..=7) => {
                let ext = IntBound::of_item(b as usize, true);
                if self.is_within(&ext) {
                    *self
                } else {
                    ext
                }
            }
            _ => IntBound::unbounded(),
        }
    }
}

/// Smallest `2^k - 1` that is `>= value`, for nonnegative `value`.
fn fill_low_bits(value: i64) -> i64 {
    if value <= 0 {
        0
    } else {
        (u64::MAX >> value.leading_zeros()) as i64
    }
}

fn empty(bound: &IntBound, with: &str) -> OptError {
    OptError::invalid_loop(format!(
        "integer bound {} narrowed to nothing by {}",
        bound, with
    ))
}

impl fmt::Display for IntBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (i64::MIN, i64::MAX) => write!(f, "(-inf, inf)"),
            (i64::MIN, hi) => write!(f, "(-inf, {}]", hi),
            (lo, i64::MAX) => write!(f, "[{}, inf)", lo),
            (lo, hi) => write!(f, "[{}, {}]", lo, hi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    #[test]
    fn test_constant() {
        let b = IntBound::from_constant(5);
        assert!(b.is_constant());
        assert_eq!(b.get_constant(), Some(5));
        assert!(b.equal(5));
        assert!(!IntBound::unbounded().is_constant());
    }

    #[test]
    fn test_known_relations() {
        let a = IntBound::new(0, 5);
        let b = IntBound::new(6, 10);
        assert!(a.known_lt(&b));
        assert!(b.known_gt(&a));
        assert!(!b.known_lt(&a));
        assert!(IntBound::new(0, 6).known_le(&b));
    }

    #[test]
    fn test_of_item() {
        assert_eq!(IntBound::of_item(1, false), IntBound::new(0, 255));
        assert_eq!(IntBound::of_item(2, true), IntBound::new(-32768, 32767));
        assert!(IntBound::of_item(8, true).is_unbounded());
    }

    // -------------------------------------------------------------------------
    // Narrowing
    // -------------------------------------------------------------------------

    #[test]
    fn test_make_lt() {
        let mut a = IntBound::unbounded();
        assert!(a.make_lt(&IntBound::from_constant(10)).unwrap());
        assert_eq!(a.upper, 9);
        assert!(!a.make_lt(&IntBound::from_constant(100)).unwrap());
    }

    #[test]
    fn test_make_ge() {
        let mut a = IntBound::new(-5, 5);
        assert!(a.make_ge(&IntBound::new(0, 3)).unwrap());
        assert_eq!(a, IntBound::new(0, 5));
    }

    #[test]
    fn test_empty_intersection_is_invalid_loop() {
        let mut a = IntBound::new(0, 5);
        let err = a.intersect(&IntBound::new(10, 20)).unwrap_err();
        assert!(err.is_invalid_loop());
    }

    #[test]
    fn test_make_lt_min_is_empty() {
        let mut a = IntBound::unbounded();
        assert!(a.make_lt(&IntBound::from_constant(i64::MIN)).is_err());
    }

    #[test]
    fn test_make_nonzero() {
        let mut a = IntBound::new(0, 7);
        assert!(a.make_nonzero().unwrap());
        assert_eq!(a.lower, 1);
        let mut b = IntBound::new(-3, 3);
        assert!(!b.make_nonzero().unwrap());
    }

    // -------------------------------------------------------------------------
    // Transfer Functions
    // -------------------------------------------------------------------------

    #[test]
    fn test_add_overflow_is_unbounded() {
        let a = IntBound::new(0, i64::MAX);
        assert!(a.add(&IntBound::from_constant(1)).is_unbounded());
        assert_eq!(
            IntBound::new(1, 2).add(&IntBound::new(10, 20)),
            IntBound::new(11, 22)
        );
    }

    #[test]
    fn test_sub() {
        assert_eq!(
            IntBound::new(10, 20).sub(&IntBound::new(1, 2)),
            IntBound::new(8, 19)
        );
    }

    #[test]
    fn test_mul_signs() {
        assert_eq!(
            IntBound::new(-2, 3).mul(&IntBound::new(-5, 4)),
            IntBound::new(-15, 12)
        );
    }

    #[test]
    fn test_and_mask() {
        let byte = IntBound::new(0, 255);
        assert_eq!(byte.and(&IntBound::from_constant(0xff)), IntBound::new(0, 255));
        assert_eq!(
            IntBound::unbounded().and(&IntBound::from_constant(15)),
            IntBound::new(0, 15)
        );
    }

    #[test]
    fn test_or_xor() {
        let a = IntBound::new(0, 5);
        let b = IntBound::new(2, 8);
        assert_eq!(a.or(&b), IntBound::new(2, 15));
        assert_eq!(a.xor(&b), IntBound::new(0, 15));
    }

    #[test]
    fn test_shifts() {
        let a = IntBound::new(1, 4);
        assert_eq!(a.lshift(&IntBound::from_constant(2)), IntBound::new(4, 16));
        assert!(IntBound::new(1, i64::MAX).lshift(&IntBound::from_constant(1)).is_unbounded());
        assert_eq!(IntBound::new(-8, 8).rshift(&IntBound::from_constant(2)), IntBound::new(-2, 2));
        assert_eq!(
            IntBound::new(-8, 8).uint_rshift(&IntBound::from_constant(60)),
            IntBound::new(0, 15)
        );
    }

    #[test]
    fn test_floordiv_and_mod() {
        assert_eq!(IntBound::new(-9, 9).floordiv(&IntBound::from_constant(2)), IntBound::new(-4, 4));
        assert_eq!(IntBound::new(0, 100).modulo(&IntBound::from_constant(8)), IntBound::new(0, 7));
    }

    #[test]
    fn test_display() {
        assert_eq!(IntBound::unbounded().to_string(), "(-inf, inf)");
        assert_eq!(IntBound::new(0, 3).to_string(), "[0, 3]");
        assert_eq!(IntBound::nonnegative().to_string(), "[0, inf)");
    }
}
