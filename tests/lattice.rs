//! Lattice laws of the abstract value domain.

use preeval::{
    analysis::{AbstractValue, Address, JoinSemiLattice, KnownBits, ObjectId, PointerSet},
    ir::{FuncId, GlobalId},
};
use proptest::prelude::*;

fn address_strategy() -> impl Strategy<Value = Address> {
    prop_oneof![
        (0..4usize, prop::sample::select(vec![0i64, 8, 16])).prop_map(|(global, offset)| {
            Address::Object {
                id: ObjectId::of_global(GlobalId::new(global)),
                offset,
            }
        }),
        (0..4usize).prop_map(|global| Address::ObjectRange(ObjectId::of_global(GlobalId::new(global)))),
        (0..3usize).prop_map(|func| Address::Func(FuncId::new(func))),
    ]
}

fn pointer_strategy() -> impl Strategy<Value = PointerSet> {
    prop::collection::vec(address_strategy(), 1..4).prop_map(|addresses| addresses.into_iter().collect())
}

fn value_strategy() -> impl Strategy<Value = AbstractValue> {
    prop_oneof![
        Just(AbstractValue::Bottom),
        Just(AbstractValue::Undefined),
        Just(AbstractValue::Top),
        (-4..4i64).prop_map(AbstractValue::Integer),
        any::<i64>().prop_map(AbstractValue::Integer),
        (-100..100i64, 0..50i64).prop_map(|(lo, width)| AbstractValue::range(Some(lo), Some(lo + width))),
        (-100..100i64).prop_map(|lo| AbstractValue::range(Some(lo), None)),
        (-100..100i64).prop_map(|hi| AbstractValue::range(None, Some(hi))),
        (1..=0xffu64, any::<u64>()).prop_map(|(mask, bits)| AbstractValue::masked(KnownBits::new(mask, bits))),
        prop::sample::select(vec![0.0f64, 1.5, -2.0]).prop_map(AbstractValue::Float),
        pointer_strategy().prop_map(AbstractValue::pointer),
        pointer_strategy().prop_map(AbstractValue::Nullable),
    ]
}

proptest! {
    #[test]
    fn join_is_commutative(a in value_strategy(), b in value_strategy()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn join_is_associative(a in value_strategy(), b in value_strategy(), c in value_strategy()) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn join_is_idempotent(a in value_strategy()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn bottom_is_the_identity(a in value_strategy()) {
        prop_assert_eq!(AbstractValue::Bottom.join(&a), a.clone());
        prop_assert!(AbstractValue::Bottom.leq(&a));
    }

    #[test]
    fn top_absorbs_everything(a in value_strategy()) {
        prop_assert_eq!(AbstractValue::Top.join(&a), AbstractValue::Top);
        prop_assert!(a.leq(&AbstractValue::Top));
    }

    #[test]
    fn join_is_an_upper_bound(a in value_strategy(), b in value_strategy()) {
        let joined = a.join(&b);
        prop_assert!(a.leq(&joined), "{} not below {}", a, joined);
        prop_assert!(b.leq(&joined), "{} not below {}", b, joined);
    }

    #[test]
    fn widening_covers_the_join(a in value_strategy(), b in value_strategy()) {
        let widened = a.widen(&b);
        prop_assert!(a.join(&b).leq(&widened), "{} widened with {} to {}", a, b, widened);
    }

    #[test]
    fn repeated_widening_stabilizes(start in -10..10i64, step in 1..5i64) {
        // Widening an increasing chain reaches a fixpoint after bounded steps.
        let mut current = AbstractValue::Integer(start);
        let mut changes = 0;
        for k in 1..100i64 {
            let next = current.widen(&AbstractValue::Integer(start + k * step));
            if next != current {
                changes += 1;
            }
            current = next;
        }
        prop_assert!(changes <= 3, "{} changes ending at {}", changes, current);
    }
}

#[test]
fn test_undefined_yields_to_defined_values() {
    let pointer = AbstractValue::pointer(PointerSet::single(Address::Func(FuncId::new(0))));
    assert_eq!(AbstractValue::Undefined.join(&AbstractValue::Integer(3)), AbstractValue::Integer(3));
    assert_eq!(AbstractValue::Undefined.join(&pointer), pointer);
    assert!(AbstractValue::Bottom.leq(&AbstractValue::Undefined));
}

#[test]
fn test_null_and_pointer_are_nullable() {
    let set = PointerSet::single(Address::Func(FuncId::new(1)));
    let joined = AbstractValue::Integer(0).join(&AbstractValue::pointer(set.clone()));
    assert_eq!(joined, AbstractValue::Nullable(set));
    assert_eq!(joined.join(&AbstractValue::Integer(1)), AbstractValue::Top);
}
