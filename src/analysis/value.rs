//! The abstract value lattice.
//!
//! An [`AbstractValue`] approximates one register-sized runtime value. The lattice is built
//! from a few sub-lattices glued together below [`AbstractValue::Top`]:
//!
//! ```text
//!                           Top
//!          /           /          |          \            \
//!   unknown int    Float(x)   Nullable(p)    ...        Pointer(q)
//!     /     \                   /    \
//!  ranges  masked        Integer(0)  Pointer(p)
//!     |
//!  Integer(c)
//!           \______________  Undefined  ______________/
//!                               |
//!                             Bottom
//! ```
//!
//! - Exact integers join into inclusive ranges whose bounds may be open.
//! - Known-bit masks only come from bitwise operations; they join bitwise with each other and
//!   meet the range family only at the unknown integer.
//! - `Integer(0)` joined with a pointer set is that set made nullable.
//! - `Undefined` joins as the identity of every value above it.
//!
//! Integers are stored sign-extended to 64 bits; booleans (`I1`) are stored as `0`/`1`.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::{
    analysis::{BoundedLattice, JoinSemiLattice, PointerSet},
    ir::{Constant, Type, UnaryOp},
};

/// Sign-extends the low `bits` of `value`. Width 1 zero-extends (booleans are `0`/`1`).
#[must_use]
pub fn canonical(value: i64, bits: u32) -> i64 {
    match bits {
        0 => 0,
        1 => value & 1,
        64.. => value,
        _ => {
            let shift = 64 - bits;
            (value << shift) >> shift
        }
    }
}

/// Zero-extends the low `bits` of `value`.
#[must_use]
pub fn zero_extend(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        value
    } else {
        ((value as u64) & ((1u64 << bits) - 1)) as i64
    }
}

/// Inclusive signed bounds of values of type `ty`.
#[must_use]
pub fn type_bounds(ty: Type) -> (i64, i64) {
    match ty.bits() {
        1 => (0, 1),
        64.. => (i64::MIN, i64::MAX),
        bits => (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1),
    }
}

/// An inclusive integer interval. `None` bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntRange {
    /// Lower bound, `None` for unbounded below
    pub lo: Option<i64>,
    /// Upper bound, `None` for unbounded above
    pub hi: Option<i64>,
}

impl IntRange {
    /// The interval of every integer.
    pub const FULL: IntRange = IntRange { lo: None, hi: None };

    /// Creates an interval.
    #[must_use]
    pub const fn new(lo: Option<i64>, hi: Option<i64>) -> Self {
        Self { lo, hi }
    }

    /// The single point `value`.
    #[must_use]
    pub const fn point(value: i64) -> Self {
        Self {
            lo: Some(value),
            hi: Some(value),
        }
    }

    /// Returns `true` if both bounds are open.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.lo.is_none() && self.hi.is_none()
    }

    /// Returns `true` if either bound is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.lo.is_none() || self.hi.is_none()
    }

    /// The value of a single-point interval.
    #[must_use]
    pub fn singleton(&self) -> Option<i64> {
        match (self.lo, self.hi) {
            (Some(lo), Some(hi)) if lo == hi => Some(lo),
            _ => None,
        }
    }

    /// Returns `true` if `value` lies within the interval.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.lo.is_none_or(|lo| lo <= value) && self.hi.is_none_or(|hi| value <= hi)
    }

    /// Returns `true` if every member is known to be non-negative.
    #[must_use]
    pub fn is_non_negative(&self) -> bool {
        self.lo.is_some_and(|lo| lo >= 0)
    }

    /// Smallest interval containing both.
    #[must_use]
    pub fn hull(&self, other: &Self) -> Self {
        Self {
            lo: self.lo.zip(other.lo).map(|(a, b)| a.min(b)),
            hi: self.hi.zip(other.hi).map(|(a, b)| a.max(b)),
        }
    }

    /// Hull of `self` and `next`, opening every bound that moved.
    #[must_use]
    pub fn widen(&self, next: &Self) -> Self {
        let hull = self.hull(next);
        Self {
            lo: if hull.lo == self.lo { hull.lo } else { None },
            hi: if hull.hi == self.hi { hull.hi } else { None },
        }
    }

    /// Returns `true` if the two intervals share no member.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        let below = self.hi.zip(other.lo).is_some_and(|(hi, lo)| hi < lo);
        let above = other.hi.zip(self.lo).is_some_and(|(hi, lo)| hi < lo);
        below || above
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lo {
            Some(lo) => write!(f, "[{lo}, ")?,
            None => write!(f, "[-inf, ")?,
        }
        match self.hi {
            Some(hi) => write!(f, "{hi}]"),
            None => write!(f, "+inf]"),
        }
    }
}

/// Partially known bits of a 64-bit integer.
///
/// Bits set in `mask` are known and equal to the corresponding bit of `bits`. A fully known
/// mask never appears here; it is an exact integer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KnownBits {
    mask: u64,
    bits: u64,
}

impl KnownBits {
    /// Nothing known.
    pub const UNKNOWN: KnownBits = KnownBits { mask: 0, bits: 0 };

    /// Creates a known-bit pattern. Bits of `bits` outside `mask` are ignored.
    #[must_use]
    pub const fn new(mask: u64, bits: u64) -> Self {
        Self {
            mask,
            bits: bits & mask,
        }
    }

    /// Every bit of `value` known.
    #[must_use]
    pub const fn exact(value: i64) -> Self {
        Self {
            mask: u64::MAX,
            bits: value as u64,
        }
    }

    /// Which bits are known.
    #[must_use]
    pub const fn mask(&self) -> u64 {
        self.mask
    }

    /// Values of the known bits.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Bits known to be one.
    #[must_use]
    pub const fn ones(&self) -> u64 {
        self.bits
    }

    /// Bits known to be zero.
    #[must_use]
    pub const fn zeros(&self) -> u64 {
        self.mask & !self.bits
    }

    /// Builds the pattern from known-one and known-zero bit sets.
    #[must_use]
    pub const fn from_parts(ones: u64, zeros: u64) -> Self {
        Self::new(ones | zeros, ones)
    }

    /// Returns `true` if `value` agrees with every known bit.
    #[must_use]
    pub const fn admits(&self, value: i64) -> bool {
        (value as u64) & self.mask == self.bits
    }

    /// Bits known in both patterns with equal values.
    #[must_use]
    pub const fn join(&self, other: &Self) -> Self {
        let mask = self.mask & other.mask & !(self.bits ^ other.bits);
        Self::new(mask, self.bits)
    }
}

impl fmt::Display for KnownBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bits({:#x}/{:#x})", self.bits, self.mask)
    }
}

/// Lattice approximation of one runtime value.
#[derive(Debug, Clone)]
pub enum AbstractValue {
    /// Unreachable; no runtime value
    Bottom,
    /// Uninitialized memory or an explicit undef
    Undefined,
    /// An exact integer
    Integer(i64),
    /// An integer within an interval, at least one bound not equal to the other
    IntegerRange(IntRange),
    /// An integer with some known bits
    IntegerMasked(KnownBits),
    /// An exact IEEE754 double
    Float(f64),
    /// A non-null pointer into one of the addresses
    Pointer(PointerSet),
    /// A pointer into one of the addresses, or null
    Nullable(PointerSet),
    /// Any value
    Top,
}

impl AbstractValue {
    /// The integer of unknown value.
    #[must_use]
    pub const fn unknown_int() -> Self {
        AbstractValue::IntegerRange(IntRange::FULL)
    }

    /// A boolean of unknown value.
    #[must_use]
    pub const fn unknown_bool() -> Self {
        AbstractValue::IntegerRange(IntRange::new(Some(0), Some(1)))
    }

    /// An exact boolean.
    #[must_use]
    pub const fn bool(value: bool) -> Self {
        AbstractValue::Integer(value as i64)
    }

    /// An integer interval, normalized: a point is an `Integer`, an empty interval is `Bottom`.
    #[must_use]
    pub fn range(lo: Option<i64>, hi: Option<i64>) -> Self {
        let range = IntRange::new(lo, hi);
        if let Some(value) = range.singleton() {
            return AbstractValue::Integer(value);
        }
        match (lo, hi) {
            (Some(lo), Some(hi)) if lo > hi => AbstractValue::Bottom,
            _ => AbstractValue::IntegerRange(range),
        }
    }

    /// An integer with known bits, normalized: a fully known pattern is an `Integer` and a
    /// pattern with nothing known is the unknown integer.
    #[must_use]
    pub fn masked(bits: KnownBits) -> Self {
        match bits.mask() {
            u64::MAX => AbstractValue::Integer(bits.bits() as i64),
            0 => Self::unknown_int(),
            _ => AbstractValue::IntegerMasked(bits),
        }
    }

    /// A non-null pointer, `Bottom` if the set is empty.
    #[must_use]
    pub fn pointer(set: PointerSet) -> Self {
        if set.is_empty() {
            AbstractValue::Bottom
        } else {
            AbstractValue::Pointer(set)
        }
    }

    /// A possibly-null pointer; the empty set is plain null.
    #[must_use]
    pub fn nullable(set: PointerSet) -> Self {
        if set.is_empty() {
            AbstractValue::Integer(0)
        } else {
            AbstractValue::Nullable(set)
        }
    }

    /// The abstraction of an IR constant of type `ty`.
    #[must_use]
    pub fn from_constant(constant: Constant, ty: Type) -> Self {
        match constant {
            Constant::Int(value) => AbstractValue::Integer(canonical(value, ty.bits())),
            Constant::Float(value) => AbstractValue::Float(value),
            Constant::Null => AbstractValue::Integer(0),
        }
    }

    /// The exact integer, if known.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            AbstractValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// The interval of an exact or ranged integer.
    #[must_use]
    pub const fn as_range(&self) -> Option<IntRange> {
        match self {
            AbstractValue::Integer(value) => Some(IntRange::point(*value)),
            AbstractValue::IntegerRange(range) => Some(*range),
            _ => None,
        }
    }

    /// Known bits of an integer-kind value.
    #[must_use]
    pub fn as_known_bits(&self) -> Option<KnownBits> {
        match self {
            AbstractValue::Integer(value) => Some(KnownBits::exact(*value)),
            AbstractValue::IntegerMasked(bits) => Some(*bits),
            AbstractValue::IntegerRange(range) => match (range.lo, range.hi) {
                (Some(lo), Some(hi)) if lo >= 0 => {
                    let width = 64 - hi.leading_zeros();
                    let zeros = if width >= 64 { 0 } else { !0u64 << width };
                    Some(KnownBits::from_parts(0, zeros))
                }
                _ => Some(KnownBits::UNKNOWN),
            },
            _ => None,
        }
    }

    /// The pointer set of a pointer or nullable pointer.
    #[must_use]
    pub const fn pointers(&self) -> Option<&PointerSet> {
        match self {
            AbstractValue::Pointer(set) | AbstractValue::Nullable(set) => Some(set),
            _ => None,
        }
    }

    /// Returns `true` for the integer kinds.
    #[must_use]
    pub const fn is_integer_kind(&self) -> bool {
        matches!(
            self,
            AbstractValue::Integer(_)
                | AbstractValue::IntegerRange(_)
                | AbstractValue::IntegerMasked(_)
        )
    }

    /// Returns `true` for pointer and nullable pointer values.
    #[must_use]
    pub const fn is_pointer_kind(&self) -> bool {
        matches!(self, AbstractValue::Pointer(_) | AbstractValue::Nullable(_))
    }

    /// Returns `true` if the value might be a pointer whose targets are not listed, which
    /// is the case for `Top` only.
    #[must_use]
    pub const fn may_hide_pointers(&self) -> bool {
        matches!(self, AbstractValue::Top)
    }

    /// Definite truth of the value used as a branch condition, `None` if unknown.
    #[must_use]
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            AbstractValue::Integer(value) => Some(*value != 0),
            AbstractValue::IntegerRange(range) => (!range.contains(0)).then_some(true),
            AbstractValue::IntegerMasked(bits) => (bits.ones() != 0).then_some(true),
            AbstractValue::Float(value) => Some(*value != 0.0),
            AbstractValue::Pointer(_) => Some(true),
            AbstractValue::Nullable(_)
            | AbstractValue::Undefined
            | AbstractValue::Bottom
            | AbstractValue::Top => None,
        }
    }

    /// Returns `true` if the value is definitely non-zero.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.truthiness() == Some(true)
    }

    /// Returns `true` if the value is definitely zero.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.truthiness() == Some(false)
    }

    /// Converts the value as the conversion `op` from `from` to `to` would.
    ///
    /// Pointer/integer conversions keep pointer sets when the integer is pointer-sized.
    /// Unrepresentable combinations produce `Top`; non-conversion operators return the value
    /// unchanged.
    #[must_use]
    pub fn cast(&self, op: UnaryOp, from: Type, to: Type) -> AbstractValue {
        use AbstractValue as V;

        match self {
            V::Bottom => return V::Bottom,
            V::Undefined => return V::Undefined,
            _ => {}
        }

        match op {
            UnaryOp::Trunc | UnaryOp::SExt | UnaryOp::ZExt => self.resize(op, from, to),
            UnaryOp::IntToFloat => match self {
                V::Integer(value) => V::Float(*value as f64),
                _ => V::Top,
            },
            UnaryOp::FloatToInt => match self {
                V::Float(value) if value.is_finite() => {
                    let truncated = value.trunc();
                    let (min, max) = type_bounds(to);
                    if truncated >= min as f64 && truncated <= max as f64 {
                        V::Integer(canonical(truncated as i64, to.bits()))
                    } else {
                        V::unknown_int()
                    }
                }
                V::Float(_) => V::unknown_int(),
                _ => V::Top,
            },
            UnaryOp::PtrToInt | UnaryOp::IntToPtr => {
                if to.bits() >= 64 {
                    self.clone()
                } else if self.is_pointer_kind() || matches!(self, V::Top) {
                    V::Top
                } else {
                    self.resize(UnaryOp::Trunc, from, to)
                }
            }
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::FNeg => self.clone(),
        }
    }

    /// The value as read back from memory with an access of type `ty`.
    ///
    /// Slots keep the value they were stored with; a load of a different kind at the same
    /// width only keeps what that kind can represent.
    #[must_use]
    pub fn reinterpret(&self, ty: Type) -> AbstractValue {
        use AbstractValue as V;

        match self {
            V::Bottom | V::Undefined | V::Top => self.clone(),
            V::Float(_) if ty.is_float() => self.clone(),
            V::Float(_) => V::Top,
            _ if ty.is_float() => V::Top,
            V::Pointer(_) | V::Nullable(_) if ty.bits() >= 64 => self.clone(),
            V::Pointer(_) | V::Nullable(_) => V::Top,
            V::Integer(value) => V::Integer(canonical(*value, ty.bits())),
            V::IntegerRange(range) => {
                let (min, max) = type_bounds(ty);
                let fits = range.lo.is_some_and(|lo| lo >= min) && range.hi.is_some_and(|hi| hi <= max);
                if fits || ty.bits() >= 64 {
                    self.clone()
                } else {
                    V::range(Some(min), Some(max))
                }
            }
            V::IntegerMasked(_) if ty.bits() == 1 => V::unknown_bool(),
            V::IntegerMasked(_) => self.clone(),
        }
    }

    fn resize(&self, op: UnaryOp, from: Type, to: Type) -> AbstractValue {
        use AbstractValue as V;

        let bits = to.bits();
        match (op, self) {
            (UnaryOp::Trunc | UnaryOp::SExt, V::Integer(value)) => V::Integer(canonical(*value, bits)),
            (UnaryOp::ZExt, V::Integer(value)) => V::Integer(zero_extend(*value, from.bits())),
            (_, V::Integer(_)) => self.clone(),
            (_, V::IntegerRange(range)) => {
                let (min, max) = type_bounds(if op == UnaryOp::Trunc { to } else { from });
                let fits = range.lo.is_some_and(|lo| lo >= min) && range.hi.is_some_and(|hi| hi <= max);
                match op {
                    UnaryOp::ZExt if range.is_non_negative() && fits => self.clone(),
                    UnaryOp::ZExt if from.bits() < 64 => {
                        V::range(Some(0), Some(zero_extend(-1, from.bits())))
                    }
                    UnaryOp::SExt | UnaryOp::Trunc if fits => self.clone(),
                    UnaryOp::Trunc => {
                        let (lo, hi) = type_bounds(to);
                        V::range(Some(lo), Some(hi))
                    }
                    _ => V::unknown_int(),
                }
            }
            (UnaryOp::SExt, V::IntegerMasked(_)) => self.clone(),
            (UnaryOp::ZExt, V::IntegerMasked(known)) if from.bits() < 64 => {
                let low = (1u64 << from.bits()) - 1;
                V::masked(KnownBits::from_parts(known.ones() & low, (known.zeros() & low) | !low))
            }
            (UnaryOp::Trunc, V::IntegerMasked(known)) if bits < 64 => {
                let low = (1u64 << bits) - 1;
                let sign = 1u64 << (bits - 1);
                if bits == 1 {
                    V::masked(KnownBits::from_parts(known.ones() & 1, (known.zeros() & 1) | !1))
                } else if known.mask() & sign != 0 {
                    let high = !low;
                    let ones = (known.ones() & low) | if known.ones() & sign != 0 { high } else { 0 };
                    let zeros = (known.zeros() & low) | if known.zeros() & sign != 0 { high } else { 0 };
                    V::masked(KnownBits::from_parts(ones, zeros))
                } else {
                    V::masked(KnownBits::from_parts(known.ones() & low & !sign, 0))
                        .join(&V::unknown_int())
                }
            }
            (_, V::IntegerMasked(_)) => self.clone(),
            (_, V::Pointer(_) | V::Nullable(_)) if bits >= 64 => self.clone(),
            (_, V::Float(_) | V::Pointer(_) | V::Nullable(_) | V::Top) => V::Top,
            (_, V::Bottom) => V::Bottom,
            (_, V::Undefined) => V::Undefined,
        }
    }
}

impl PartialEq for AbstractValue {
    fn eq(&self, other: &Self) -> bool {
        use AbstractValue as V;
        match (self, other) {
            (V::Bottom, V::Bottom) | (V::Undefined, V::Undefined) | (V::Top, V::Top) => true,
            (V::Integer(a), V::Integer(b)) => a == b,
            (V::IntegerRange(a), V::IntegerRange(b)) => a == b,
            (V::IntegerMasked(a), V::IntegerMasked(b)) => a == b,
            (V::Float(a), V::Float(b)) => a.to_bits() == b.to_bits(),
            (V::Pointer(a), V::Pointer(b)) | (V::Nullable(a), V::Nullable(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AbstractValue {}

impl Hash for AbstractValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AbstractValue::Integer(value) => value.hash(state),
            AbstractValue::IntegerRange(range) => range.hash(state),
            AbstractValue::IntegerMasked(bits) => bits.hash(state),
            AbstractValue::Float(value) => value.to_bits().hash(state),
            AbstractValue::Pointer(set) | AbstractValue::Nullable(set) => set.hash(state),
            AbstractValue::Bottom | AbstractValue::Undefined | AbstractValue::Top => {}
        }
    }
}

impl JoinSemiLattice for AbstractValue {
    fn join(&self, other: &Self) -> Self {
        use AbstractValue as V;

        match (self, other) {
            (V::Bottom, x) | (x, V::Bottom) => x.clone(),
            (V::Top, _) | (_, V::Top) => V::Top,
            (V::Undefined, x) | (x, V::Undefined) => x.clone(),

            (V::Integer(a), V::Integer(b)) if a == b => V::Integer(*a),
            (V::IntegerMasked(a), V::IntegerMasked(b)) => V::masked(a.join(b)),
            (V::IntegerMasked(_), x) | (x, V::IntegerMasked(_)) if x.is_integer_kind() => {
                V::unknown_int()
            }
            (a, b) if a.is_integer_kind() && b.is_integer_kind() => {
                match (a.as_range(), b.as_range()) {
                    (Some(x), Some(y)) => {
                        let hull = x.hull(&y);
                        V::range(hull.lo, hull.hi)
                    }
                    _ => V::unknown_int(),
                }
            }

            (V::Float(a), V::Float(b)) if a.to_bits() == b.to_bits() => V::Float(*a),

            (V::Pointer(a), V::Pointer(b)) => V::Pointer(a.join(b)),
            (V::Pointer(a) | V::Nullable(a), V::Pointer(b) | V::Nullable(b)) => {
                V::Nullable(a.join(b))
            }
            (V::Integer(0), V::Pointer(p) | V::Nullable(p))
            | (V::Pointer(p) | V::Nullable(p), V::Integer(0)) => V::Nullable(p.clone()),

            _ => V::Top,
        }
    }

    fn is_top(&self) -> bool {
        matches!(self, AbstractValue::Top)
    }

    fn is_bottom(&self) -> bool {
        matches!(self, AbstractValue::Bottom)
    }

    fn widen(&self, next: &Self) -> Self {
        let joined = self.join(next);
        match (self.as_range(), joined.as_range()) {
            (Some(previous), Some(current)) => {
                let widened = previous.widen(&current);
                AbstractValue::range(widened.lo, widened.hi)
            }
            _ => joined,
        }
    }
}

impl BoundedLattice for AbstractValue {
    fn top() -> Self {
        AbstractValue::Top
    }

    fn bottom() -> Self {
        AbstractValue::Bottom
    }
}

impl Default for AbstractValue {
    fn default() -> Self {
        AbstractValue::Bottom
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Bottom => write!(f, "bottom"),
            AbstractValue::Undefined => write!(f, "undef"),
            AbstractValue::Integer(value) => write!(f, "{value}"),
            AbstractValue::IntegerRange(range) => write!(f, "{range}"),
            AbstractValue::IntegerMasked(bits) => write!(f, "{bits}"),
            AbstractValue::Float(value) => write!(f, "{value:?}f"),
            AbstractValue::Pointer(set) => write!(f, "ptr{set}"),
            AbstractValue::Nullable(set) => write!(f, "ptr?{set}"),
            AbstractValue::Top => write!(f, "top"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Address, ObjectId};

    fn ptr(id: u32, offset: i64) -> AbstractValue {
        AbstractValue::Pointer(PointerSet::single(Address::Object {
            id: ObjectId(id),
            offset,
        }))
    }

    #[test]
    fn test_integers_join_to_range() {
        let joined = AbstractValue::Integer(1).join(&AbstractValue::Integer(5));
        assert_eq!(joined, AbstractValue::range(Some(1), Some(5)));
        assert_eq!(
            joined.join(&AbstractValue::Integer(-2)),
            AbstractValue::range(Some(-2), Some(5))
        );
    }

    #[test]
    fn test_point_range_normalizes() {
        assert_eq!(AbstractValue::range(Some(3), Some(3)), AbstractValue::Integer(3));
        assert_eq!(AbstractValue::range(Some(4), Some(3)), AbstractValue::Bottom);
        assert_eq!(
            AbstractValue::masked(KnownBits::exact(9)),
            AbstractValue::Integer(9)
        );
    }

    #[test]
    fn test_mixed_kinds_join_to_top() {
        assert_eq!(
            AbstractValue::Integer(1).join(&AbstractValue::Float(1.0)),
            AbstractValue::Top
        );
        assert_eq!(AbstractValue::Integer(3).join(&ptr(1, 0)), AbstractValue::Top);
        assert_eq!(
            AbstractValue::Float(1.0).join(&AbstractValue::Float(2.0)),
            AbstractValue::Top
        );
    }

    #[test]
    fn test_null_joins_into_nullable() {
        let joined = AbstractValue::Integer(0).join(&ptr(1, 0));
        assert!(matches!(joined, AbstractValue::Nullable(_)));
        assert_eq!(joined.truthiness(), None);
        assert_eq!(ptr(1, 0).truthiness(), Some(true));
    }

    #[test]
    fn test_masked_meets_ranges_at_unknown_int() {
        let masked = AbstractValue::masked(KnownBits::new(0xff, 0x10));
        assert_eq!(
            masked.join(&AbstractValue::Integer(0x10)),
            AbstractValue::unknown_int()
        );
        let other = AbstractValue::masked(KnownBits::new(0xff, 0x11));
        assert_eq!(
            masked.join(&other),
            AbstractValue::masked(KnownBits::new(0xfe, 0x10))
        );
    }

    #[test]
    fn test_undefined_is_below_defined_values() {
        assert_eq!(
            AbstractValue::Undefined.join(&AbstractValue::Integer(7)),
            AbstractValue::Integer(7)
        );
        assert_eq!(
            AbstractValue::Undefined.join(&AbstractValue::Bottom),
            AbstractValue::Undefined
        );
        assert_eq!(AbstractValue::Undefined.join(&AbstractValue::Top), AbstractValue::Top);
    }

    #[test]
    fn test_nan_is_idempotent() {
        let nan = AbstractValue::Float(f64::NAN);
        assert_eq!(nan.join(&nan), nan);
    }

    #[test]
    fn test_widen_opens_growing_bounds() {
        let first = AbstractValue::Integer(0);
        let second = first.widen(&AbstractValue::Integer(1));
        assert_eq!(second, AbstractValue::range(Some(0), None));
        let third = second.widen(&AbstractValue::range(Some(0), Some(7)));
        assert_eq!(third, second);

        let shrinking = AbstractValue::range(Some(0), Some(10)).widen(&AbstractValue::Integer(-1));
        assert_eq!(shrinking, AbstractValue::range(None, Some(10)));
    }

    #[test]
    fn test_truthiness_of_ranges() {
        assert!(AbstractValue::range(Some(1), None).is_true());
        assert!(AbstractValue::Integer(0).is_false());
        assert_eq!(AbstractValue::unknown_bool().truthiness(), None);
        assert_eq!(AbstractValue::Top.truthiness(), None);
    }

    #[test]
    fn test_cast_truncates_and_extends() {
        use UnaryOp::*;
        let v = AbstractValue::Integer(0x1ff);
        assert_eq!(v.cast(Trunc, Type::I32, Type::I8), AbstractValue::Integer(-1));
        assert_eq!(
            AbstractValue::Integer(-1).cast(ZExt, Type::I8, Type::I32),
            AbstractValue::Integer(255)
        );
        assert_eq!(
            AbstractValue::Integer(-1).cast(SExt, Type::I8, Type::I64),
            AbstractValue::Integer(-1)
        );
        assert_eq!(
            AbstractValue::range(Some(-1000), Some(1000)).cast(Trunc, Type::I32, Type::I8),
            AbstractValue::range(Some(-128), Some(127))
        );
        assert_eq!(
            AbstractValue::Integer(3).cast(IntToFloat, Type::I64, Type::F64),
            AbstractValue::Float(3.0)
        );
        assert_eq!(
            AbstractValue::Float(-2.75).cast(FloatToInt, Type::F64, Type::I32),
            AbstractValue::Integer(-2)
        );
    }

    #[test]
    fn test_cast_pointer_shapes() {
        let p = ptr(1, 8);
        assert_eq!(p.cast(UnaryOp::PtrToInt, Type::Ptr, Type::I64), p);
        assert_eq!(p.cast(UnaryOp::PtrToInt, Type::Ptr, Type::I32), AbstractValue::Top);
        assert_eq!(p.cast(UnaryOp::IntToFloat, Type::I64, Type::F64), AbstractValue::Top);
        assert_eq!(
            AbstractValue::Integer(0x1_0000_0005).cast(UnaryOp::PtrToInt, Type::Ptr, Type::I32),
            AbstractValue::Integer(5)
        );
    }
}
