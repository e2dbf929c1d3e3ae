//! Table-driven evaluation rules for unary, binary, compare and select operations.
//!
//! Each rule maps abstract operands to an abstract result, covering scalar × scalar folding,
//! scalar × pointer arithmetic and pointer × pointer comparison. Combinations without a rule
//! degrade to [`AbstractValue::Top`]. Rules never fail.

use crate::{
    analysis::{
        value::{canonical, type_bounds, zero_extend, IntRange, KnownBits},
        AbstractValue, JoinSemiLattice, PointerSet,
    },
    ir::{BinaryOp, CmpOp, Type, UnaryOp},
};

use AbstractValue as V;

/// Evaluates a unary operation whose operand has type `from` and result type `to`.
#[must_use]
pub fn unary(op: UnaryOp, from: Type, to: Type, value: &AbstractValue) -> AbstractValue {
    match value {
        V::Bottom => return V::Bottom,
        V::Undefined => return V::Undefined,
        _ => {}
    }

    let bits = to.bits();
    match op {
        UnaryOp::Neg => match value {
            V::Integer(a) => V::Integer(canonical(a.wrapping_neg(), bits)),
            V::IntegerRange(range) => {
                let negated = IntRange::new(
                    range.hi.and_then(i64::checked_neg),
                    range.lo.and_then(i64::checked_neg),
                );
                let overflow = range.lo == Some(i64::MIN)
                    || negated.lo.is_some_and(|lo| lo < type_bounds(to).0)
                    || negated.hi.is_some_and(|hi| hi > type_bounds(to).1);
                if overflow || range.is_open() {
                    V::unknown_int()
                } else {
                    V::range(negated.lo, negated.hi)
                }
            }
            V::IntegerMasked(_) => V::unknown_int(),
            _ => V::Top,
        },
        UnaryOp::Not => match value {
            V::Integer(a) => V::Integer(canonical(!a, bits)),
            V::IntegerMasked(known) if bits > 1 => {
                V::masked(KnownBits::new(known.mask(), !known.bits()))
            }
            V::IntegerRange(_) if bits == 1 => V::unknown_bool(),
            V::IntegerRange(range) => V::range(range.hi.map(|hi| !hi), range.lo.map(|lo| !lo)),
            V::IntegerMasked(_) => V::unknown_bool(),
            _ => V::Top,
        },
        UnaryOp::FNeg => match value {
            V::Float(a) => V::Float(-a),
            _ => V::Top,
        },
        _ => value.cast(op, from, to),
    }
}

/// Evaluates a binary operation producing a value of type `ty`.
#[must_use]
pub fn binary(op: BinaryOp, ty: Type, lhs: &AbstractValue, rhs: &AbstractValue) -> AbstractValue {
    match (lhs, rhs) {
        (V::Bottom, _) | (_, V::Bottom) => return V::Bottom,
        (V::Undefined, _) | (_, V::Undefined) => return V::Undefined,
        _ => {}
    }

    if is_float_op(op) {
        return match (lhs, rhs) {
            (V::Float(a), V::Float(b)) => V::Float(fold_float(op, *a, *b)),
            _ => V::Top,
        };
    }

    if let Some(absorbed) = absorb(op, lhs, rhs) {
        return absorbed;
    }

    match (lhs, rhs) {
        (V::Integer(a), V::Integer(b)) => match fold(op, ty, *a, *b) {
            Some(value) => V::Integer(value),
            None => V::unknown_int(),
        },
        (a, b) if a.is_pointer_kind() || b.is_pointer_kind() => pointer_binary(op, ty, a, b),
        (a, b) if a.is_integer_kind() && b.is_integer_kind() => integer_binary(op, ty, a, b),
        (V::Top, b) | (b, V::Top) if b.is_integer_kind() || b.is_top() => {
            // Narrow results cannot be pointers.
            if ty.bits() < 64 {
                V::unknown_int()
            } else {
                V::Top
            }
        }
        _ => V::Top,
    }
}

/// Evaluates a comparison. The result is `Integer(0)`, `Integer(1)`, or the unknown boolean.
#[must_use]
pub fn compare(op: CmpOp, lhs: &AbstractValue, rhs: &AbstractValue) -> AbstractValue {
    match (lhs, rhs) {
        (V::Bottom, _) | (_, V::Bottom) => return V::Bottom,
        (V::Undefined, _) | (_, V::Undefined) => return V::unknown_bool(),
        _ => {}
    }

    let decided = match (lhs, rhs) {
        (V::Float(a), V::Float(b)) => Some(compare_floats(op, *a, *b)),
        (a, b) if a.is_integer_kind() && b.is_integer_kind() => compare_ints(op, a, b),
        (a, b) if a.is_pointer_kind() && b.is_pointer_kind() => compare_pointers(op, a, b),
        (V::Pointer(_), V::Integer(0)) | (V::Integer(0), V::Pointer(_)) => match op {
            CmpOp::Eq => Some(false),
            CmpOp::Ne => Some(true),
            _ => None,
        },
        _ => None,
    };

    match decided {
        Some(result) => V::bool(result),
        None => V::unknown_bool(),
    }
}

/// Chooses between two values on an abstract condition.
#[must_use]
pub fn select(cond: &AbstractValue, if_true: &AbstractValue, if_false: &AbstractValue) -> AbstractValue {
    if cond.is_bottom() {
        return V::Bottom;
    }
    match cond.truthiness() {
        Some(true) => if_true.clone(),
        Some(false) => if_false.clone(),
        None => if_true.join(if_false),
    }
}

fn is_float_op(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv
    )
}

fn fold_float(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::FAdd => a + b,
        BinaryOp::FSub => a - b,
        BinaryOp::FMul => a * b,
        _ => a / b,
    }
}

/// Results fixed by one operand alone, whatever the other is.
fn absorb(op: BinaryOp, lhs: &AbstractValue, rhs: &AbstractValue) -> Option<AbstractValue> {
    let either = |value: i64| lhs.as_integer() == Some(value) || rhs.as_integer() == Some(value);
    let has_float = matches!(lhs, V::Float(_)) || matches!(rhs, V::Float(_));
    if has_float {
        return None;
    }
    match op {
        BinaryOp::And | BinaryOp::Mul if either(0) => Some(V::Integer(0)),
        BinaryOp::Or if either(-1) => Some(V::Integer(-1)),
        _ => None,
    }
}

/// Folds two exact integers. `None` for division by zero and out-of-range shifts.
fn fold(op: BinaryOp, ty: Type, a: i64, b: i64) -> Option<i64> {
    let bits = ty.bits();
    let ua = zero_extend(a, bits) as u64;
    let ub = zero_extend(b, bits) as u64;
    let shift = u32::try_from(b).ok().filter(|&s| s < bits);

    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::UDiv => (ua.checked_div(ub)?) as i64,
        BinaryOp::URem => (ua.checked_rem(ub)?) as i64,
        BinaryOp::SDiv if b == 0 => return None,
        BinaryOp::SDiv => a.wrapping_div(b),
        BinaryOp::SRem if b == 0 => return None,
        BinaryOp::SRem => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a << shift?,
        BinaryOp::LShr => (ua >> shift?) as i64,
        BinaryOp::AShr => a >> shift?,
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => return None,
    };
    Some(canonical(result, bits))
}

fn integer_binary(op: BinaryOp, ty: Type, lhs: &AbstractValue, rhs: &AbstractValue) -> AbstractValue {
    let constant = rhs.as_integer();
    match op {
        BinaryOp::Add | BinaryOp::Sub => match (lhs.as_range(), rhs.as_range()) {
            (Some(a), Some(b)) => add_ranges(ty, a, b, op == BinaryOp::Sub),
            _ => V::unknown_int(),
        },
        BinaryOp::Mul => match (lhs.as_range(), rhs.as_range()) {
            (Some(a), Some(b)) => mul_ranges(ty, a, b),
            _ => V::unknown_int(),
        },
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
            match (lhs.as_known_bits(), rhs.as_known_bits()) {
                (Some(a), Some(b)) => from_known_bits(bitwise(op, a, b)),
                _ => V::unknown_int(),
            }
        }
        BinaryOp::Shl => match (lhs.as_range(), shift_amount(ty, constant)) {
            (Some(a), Some(k)) => mul_ranges(ty, a, IntRange::point(1i64 << k)),
            _ => V::unknown_int(),
        },
        BinaryOp::AShr => match (lhs.as_range(), shift_amount(ty, constant)) {
            (Some(a), Some(k)) => V::range(a.lo.map(|lo| lo >> k), a.hi.map(|hi| hi >> k)),
            _ => V::unknown_int(),
        },
        BinaryOp::LShr => match (lhs.as_range(), shift_amount(ty, constant)) {
            (Some(a), Some(k)) if a.is_non_negative() => {
                V::range(a.lo.map(|lo| lo >> k), a.hi.map(|hi| hi >> k))
            }
            (_, Some(k)) if k > 0 => {
                let all = zero_extend(-1, ty.bits()) as u64;
                V::range(Some(0), Some((all >> k) as i64))
            }
            _ => V::unknown_int(),
        },
        BinaryOp::SDiv | BinaryOp::UDiv => match (lhs.as_range(), constant) {
            (Some(a), Some(c)) if c > 0 && (op == BinaryOp::SDiv || a.is_non_negative()) => {
                V::range(a.lo.map(|lo| lo / c), a.hi.map(|hi| hi / c))
            }
            _ => V::unknown_int(),
        },
        BinaryOp::URem => match constant {
            Some(c) if c > 0 => match lhs.as_range() {
                Some(a) if a.is_non_negative() && a.hi.is_some_and(|hi| hi < c) => lhs.clone(),
                _ => V::range(Some(0), Some(c - 1)),
            },
            _ => V::unknown_int(),
        },
        BinaryOp::SRem => match constant {
            Some(c) if c > 0 => match lhs.as_range() {
                Some(a) if a.is_non_negative() => {
                    V::range(Some(0), Some(a.hi.map_or(c - 1, |hi| hi.min(c - 1))))
                }
                _ => V::range(Some(-(c - 1)), Some(c - 1)),
            },
            _ => V::unknown_int(),
        },
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => V::Top,
    }
}

fn shift_amount(ty: Type, amount: Option<i64>) -> Option<u32> {
    amount
        .and_then(|k| u32::try_from(k).ok())
        .filter(|&k| k < ty.bits())
}

/// Interval sum or difference, giving up when the result may wrap.
fn add_ranges(ty: Type, a: IntRange, b: IntRange, subtract: bool) -> AbstractValue {
    let widen = |bound: Option<i64>| bound.map(i128::from);
    let (a_lo, a_hi) = (widen(a.lo), widen(a.hi));
    let (b_lo, b_hi) = if subtract {
        (widen(b.hi).map(|hi| -hi), widen(b.lo).map(|lo| -lo))
    } else {
        (widen(b.lo), widen(b.hi))
    };

    // An open bound may already sit at the type limit, so any push past it can wrap.
    let may_be_negative = |lo: Option<i128>| lo.is_none_or(|lo| lo < 0);
    let may_be_positive = |hi: Option<i128>| hi.is_none_or(|hi| hi > 0);
    if (a_lo.is_none() && may_be_negative(b_lo))
        || (b_lo.is_none() && may_be_negative(a_lo))
        || (a_hi.is_none() && may_be_positive(b_hi))
        || (b_hi.is_none() && may_be_positive(a_hi))
    {
        return V::unknown_int();
    }

    let lo = a_lo.zip(b_lo).map(|(x, y)| x + y);
    let hi = a_hi.zip(b_hi).map(|(x, y)| x + y);
    narrow(ty, lo, hi)
}

fn mul_ranges(ty: Type, a: IntRange, b: IntRange) -> AbstractValue {
    let (Some(a_lo), Some(a_hi), Some(b_lo), Some(b_hi)) = (a.lo, a.hi, b.lo, b.hi) else {
        return V::unknown_int();
    };
    let products = [
        i128::from(a_lo) * i128::from(b_lo),
        i128::from(a_lo) * i128::from(b_hi),
        i128::from(a_hi) * i128::from(b_lo),
        i128::from(a_hi) * i128::from(b_hi),
    ];
    let lo = products.iter().copied().min();
    let hi = products.iter().copied().max();
    narrow(ty, lo, hi)
}

/// Builds a range from wide bounds, or the unknown integer if a bound leaves the type.
fn narrow(ty: Type, lo: Option<i128>, hi: Option<i128>) -> AbstractValue {
    let (min, max) = type_bounds(ty);
    let out_of_range = lo.is_some_and(|lo| lo < i128::from(min))
        || hi.is_some_and(|hi| hi > i128::from(max));
    if out_of_range {
        return V::unknown_int();
    }
    V::range(
        lo.and_then(|lo| i64::try_from(lo).ok()),
        hi.and_then(|hi| i64::try_from(hi).ok()),
    )
}

fn bitwise(op: BinaryOp, a: KnownBits, b: KnownBits) -> KnownBits {
    match op {
        BinaryOp::And => KnownBits::from_parts(a.ones() & b.ones(), a.zeros() | b.zeros()),
        BinaryOp::Or => KnownBits::from_parts(a.ones() | b.ones(), a.zeros() & b.zeros()),
        _ => {
            let mask = a.mask() & b.mask();
            KnownBits::new(mask, a.bits() ^ b.bits())
        }
    }
}

/// Known bits whose only information is "the high bits are zero" read better as a range.
fn from_known_bits(known: KnownBits) -> AbstractValue {
    let unknown = !known.mask();
    let low_run = unknown.wrapping_add(1) & unknown == 0;
    if known.ones() == 0 && unknown != 0 && unknown != u64::MAX && low_run {
        V::range(Some(0), Some(unknown as i64))
    } else {
        V::masked(known)
    }
}

fn pointer_binary(op: BinaryOp, ty: Type, lhs: &AbstractValue, rhs: &AbstractValue) -> AbstractValue {
    if ty.bits() < 64 {
        return V::Top;
    }

    let rewrap = |original: &AbstractValue, set: Option<PointerSet>| match (original, set) {
        (V::Pointer(_), Some(set)) => V::pointer(set),
        (V::Nullable(_), Some(set)) => V::nullable(set),
        _ => V::Top,
    };

    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (p, V::Integer(c)) | (V::Integer(c), p) if p.is_pointer_kind() => match p {
                V::Nullable(_) if *c != 0 => V::Top,
                _ => rewrap(p, p.pointers().and_then(|set| set.offset(*c))),
            },
            (p @ V::Pointer(set), i) | (i, p @ V::Pointer(set)) if i.is_integer_kind() => {
                rewrap(p, set.decay())
            }
            _ => V::Top,
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (p, V::Integer(c)) if p.is_pointer_kind() => match (p, c.checked_neg()) {
                (V::Nullable(_), _) if *c != 0 => V::Top,
                (_, Some(delta)) => rewrap(p, p.pointers().and_then(|set| set.offset(delta))),
                (_, None) => rewrap(p, p.pointers().and_then(|set| set.decay())),
            },
            (p @ V::Pointer(set), i) if i.is_integer_kind() => rewrap(p, set.decay()),
            (V::Pointer(a), V::Pointer(b)) => match a.distance(b) {
                Some(distance) => V::Integer(distance),
                None => V::unknown_int(),
            },
            (a, b) if a.is_pointer_kind() && b.is_pointer_kind() => V::unknown_int(),
            _ => V::Top,
        },
        BinaryOp::And => match (lhs, rhs) {
            (p, i) | (i, p) if p.is_pointer_kind() && i.is_integer_kind() => {
                rewrap(p, p.pointers().and_then(|set| set.decay()))
            }
            _ => V::Top,
        },
        BinaryOp::Or => match (lhs, rhs) {
            (p @ V::Pointer(set), i) | (i, p @ V::Pointer(set)) if i.is_integer_kind() => {
                rewrap(p, set.decay())
            }
            _ => V::Top,
        },
        _ => V::Top,
    }
}

fn compare_floats(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::SLt | CmpOp::ULt => a < b,
        CmpOp::SLe | CmpOp::ULe => a <= b,
        CmpOp::SGt | CmpOp::UGt => a > b,
        CmpOp::SGe | CmpOp::UGe => a >= b,
    }
}

fn compare_ints(op: CmpOp, lhs: &AbstractValue, rhs: &AbstractValue) -> Option<bool> {
    let (Some(a), Some(b)) = (lhs.as_range(), rhs.as_range()) else {
        // At least one side only has known bits.
        let (a, b) = (lhs.as_known_bits()?, rhs.as_known_bits()?);
        let conflict = a.mask() & b.mask() & (a.bits() ^ b.bits()) != 0;
        return match op {
            CmpOp::Eq if conflict => Some(false),
            CmpOp::Ne if conflict => Some(true),
            _ => None,
        };
    };

    if op.is_unsigned() && !(a.is_non_negative() && b.is_non_negative()) {
        let (x, y) = (a.singleton()? as u64, b.singleton()? as u64);
        return Some(match op {
            CmpOp::ULt => x < y,
            CmpOp::ULe => x <= y,
            CmpOp::UGt => x > y,
            _ => x >= y,
        });
    }

    match op {
        CmpOp::Eq => equal_ranges(a, b),
        CmpOp::Ne => equal_ranges(a, b).map(|equal| !equal),
        CmpOp::SLt | CmpOp::ULt => less(a, b, true),
        CmpOp::SLe | CmpOp::ULe => less(a, b, false),
        CmpOp::SGt | CmpOp::UGt => less(b, a, true),
        CmpOp::SGe | CmpOp::UGe => less(b, a, false),
    }
}

fn equal_ranges(a: IntRange, b: IntRange) -> Option<bool> {
    match (a.singleton(), b.singleton()) {
        (Some(x), Some(y)) => Some(x == y),
        _ if a.is_disjoint(&b) => Some(false),
        _ => None,
    }
}

/// Decides `a < b` (or `a <= b` when not `strict`) for every member pair.
fn less(a: IntRange, b: IntRange, strict: bool) -> Option<bool> {
    let always = a.hi.zip(b.lo).is_some_and(|(hi, lo)| if strict { hi < lo } else { hi <= lo });
    let never = a.lo.zip(b.hi).is_some_and(|(lo, hi)| if strict { lo >= hi } else { lo > hi });
    match (always, never) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn compare_pointers(op: CmpOp, lhs: &AbstractValue, rhs: &AbstractValue) -> Option<bool> {
    let (a, b) = (lhs.pointers()?, rhs.pointers()?);
    let both_non_null = matches!((lhs, rhs), (V::Pointer(_), V::Pointer(_)));

    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match (a.precise(), b.precise()) {
                (Some(x), Some(y)) if both_non_null => Some(x == y),
                _ if both_non_null && a.is_disjoint(b) => Some(false),
                _ => None,
            }?;
            Some(if op == CmpOp::Eq { equal } else { !equal })
        }
        _ if both_non_null => {
            let distance = a.distance(b)?;
            Some(match op {
                CmpOp::SLt | CmpOp::ULt => distance < 0,
                CmpOp::SLe | CmpOp::ULe => distance <= 0,
                CmpOp::SGt | CmpOp::UGt => distance > 0,
                _ => distance >= 0,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Address, ObjectId};

    fn ptr(id: u32, offset: i64) -> AbstractValue {
        V::Pointer(PointerSet::single(Address::Object {
            id: ObjectId(id),
            offset,
        }))
    }

    #[test]
    fn test_exact_folding_wraps_to_width() {
        let a = V::Integer(127);
        assert_eq!(binary(BinaryOp::Add, Type::I8, &a, &V::Integer(1)), V::Integer(-128));
        assert_eq!(
            binary(BinaryOp::Mul, Type::I64, &V::Integer(6), &V::Integer(7)),
            V::Integer(42)
        );
        assert_eq!(
            binary(BinaryOp::LShr, Type::I8, &V::Integer(-1), &V::Integer(4)),
            V::Integer(15)
        );
        assert_eq!(
            binary(BinaryOp::UDiv, Type::I32, &V::Integer(-2), &V::Integer(2)),
            V::Integer(0x7fff_ffff)
        );
    }

    #[test]
    fn test_division_by_zero_is_unknown() {
        assert_eq!(
            binary(BinaryOp::SDiv, Type::I32, &V::Integer(1), &V::Integer(0)),
            V::unknown_int()
        );
        assert_eq!(
            binary(BinaryOp::Shl, Type::I32, &V::Integer(1), &V::Integer(40)),
            V::unknown_int()
        );
    }

    #[test]
    fn test_range_arithmetic() {
        let r = V::range(Some(0), Some(10));
        assert_eq!(
            binary(BinaryOp::Add, Type::I32, &r, &V::Integer(5)),
            V::range(Some(5), Some(15))
        );
        assert_eq!(
            binary(BinaryOp::Sub, Type::I32, &r, &V::Integer(5)),
            V::range(Some(-5), Some(5))
        );
        assert_eq!(
            binary(BinaryOp::Mul, Type::I32, &r, &V::Integer(-2)),
            V::range(Some(-20), Some(0))
        );
        assert_eq!(
            binary(BinaryOp::URem, Type::I32, &V::unknown_int(), &V::Integer(8)),
            V::range(Some(0), Some(7))
        );
    }

    #[test]
    fn test_open_range_increment_may_wrap() {
        let counter = V::range(Some(0), None);
        assert_eq!(
            binary(BinaryOp::Add, Type::I32, &counter, &V::Integer(1)),
            V::unknown_int()
        );
        assert_eq!(
            binary(BinaryOp::Add, Type::I32, &counter, &V::Integer(-1)),
            V::range(Some(-1), None)
        );
    }

    #[test]
    fn test_bitwise_known_bits() {
        let masked = binary(BinaryOp::And, Type::I64, &V::unknown_int(), &V::Integer(0xf0));
        assert_eq!(masked, V::masked(KnownBits::from_parts(0, !0xf0)));
        let low = binary(BinaryOp::And, Type::I64, &V::unknown_int(), &V::Integer(0xff));
        assert_eq!(low, V::range(Some(0), Some(255)));
        let set = binary(BinaryOp::Or, Type::I64, &masked, &V::Integer(1));
        assert!(set.is_true());
    }

    #[test]
    fn test_absorbing_operands() {
        assert_eq!(
            binary(BinaryOp::And, Type::I64, &V::Top, &V::Integer(0)),
            V::Integer(0)
        );
        assert_eq!(
            binary(BinaryOp::Mul, Type::I64, &V::Integer(0), &V::unknown_int()),
            V::Integer(0)
        );
    }

    #[test]
    fn test_pointer_arithmetic() {
        assert_eq!(binary(BinaryOp::Add, Type::Ptr, &ptr(1, 8), &V::Integer(8)), ptr(1, 16));
        assert_eq!(binary(BinaryOp::Sub, Type::Ptr, &ptr(1, 8), &V::Integer(8)), ptr(1, 0));
        assert_eq!(
            binary(BinaryOp::Sub, Type::I64, &ptr(1, 24), &ptr(1, 8)),
            V::Integer(16)
        );
        let decayed = binary(BinaryOp::Add, Type::Ptr, &ptr(1, 0), &V::unknown_int());
        assert_eq!(
            decayed,
            V::Pointer(PointerSet::single(Address::ObjectRange(ObjectId(1))))
        );
        assert_eq!(binary(BinaryOp::Add, Type::Ptr, &ptr(1, 0), &ptr(2, 0)), V::Top);
        assert_eq!(binary(BinaryOp::Add, Type::I32, &ptr(1, 0), &V::Integer(1)), V::Top);
    }

    #[test]
    fn test_integer_comparisons() {
        let r = V::range(Some(0), Some(9));
        assert_eq!(compare(CmpOp::SLt, &r, &V::Integer(10)), V::Integer(1));
        assert_eq!(compare(CmpOp::SGe, &r, &V::Integer(10)), V::Integer(0));
        assert_eq!(compare(CmpOp::SLt, &r, &V::Integer(5)), V::unknown_bool());
        assert_eq!(compare(CmpOp::Eq, &r, &V::Integer(20)), V::Integer(0));
        assert_eq!(compare(CmpOp::ULt, &V::Integer(-1), &V::Integer(1)), V::Integer(0));
        assert_eq!(compare(CmpOp::Eq, &V::Undefined, &V::Integer(1)), V::unknown_bool());
    }

    #[test]
    fn test_pointer_comparisons() {
        assert_eq!(compare(CmpOp::Eq, &ptr(1, 0), &ptr(1, 0)), V::Integer(1));
        assert_eq!(compare(CmpOp::Eq, &ptr(1, 0), &ptr(1, 8)), V::Integer(0));
        assert_eq!(compare(CmpOp::Ne, &ptr(1, 0), &ptr(2, 0)), V::Integer(1));
        assert_eq!(compare(CmpOp::Eq, &ptr(1, 0), &V::Integer(0)), V::Integer(0));
        assert_eq!(compare(CmpOp::SLt, &ptr(1, 0), &ptr(1, 8)), V::Integer(1));

        let nullable = ptr(1, 0).join(&V::Integer(0));
        assert_eq!(compare(CmpOp::Eq, &nullable, &V::Integer(0)), V::unknown_bool());
    }

    #[test]
    fn test_unary_rules() {
        assert_eq!(
            unary(UnaryOp::Neg, Type::I32, Type::I32, &V::range(Some(1), Some(5))),
            V::range(Some(-5), Some(-1))
        );
        assert_eq!(unary(UnaryOp::Not, Type::I1, Type::I1, &V::Integer(1)), V::Integer(0));
        assert_eq!(
            unary(UnaryOp::FNeg, Type::F64, Type::F64, &V::Float(2.0)),
            V::Float(-2.0)
        );
        assert_eq!(
            unary(UnaryOp::Trunc, Type::I32, Type::I8, &V::Integer(256)),
            V::Integer(0)
        );
    }

    #[test]
    fn test_select_on_unknown_joins() {
        let joined = select(&V::unknown_bool(), &V::Integer(1), &V::Integer(3));
        assert_eq!(joined, V::range(Some(1), Some(3)));
        assert_eq!(select(&V::Integer(0), &V::Integer(1), &V::Integer(3)), V::Integer(3));
    }
}
