//! Lattice traits for the evaluator's abstract domains.
//!
//! Every abstract quantity the evaluator keeps, from a single register value up to a whole
//! heap snapshot, combines at control-flow joins through a least upper bound.
//!
//! # Lattice Theory Background
//!
//! - **Partial Order**: `x ⊑ y` when `y` describes at least every runtime state `x` does
//! - **Join (⊔)**: Least upper bound of two elements
//! - **Top (⊤)**: Greatest element (no information)
//! - **Bottom (⊥)**: Least element (unreachable)
//! - **Widening (∇)**: An upper bound that forces ascending chains to stabilize
//!
//! Fixpoint iteration over loops only terminates because every chain built with [`widen`]
//! is finite; the iteration cap in the driver is a second, independent guarantee.
//!
//! [`widen`]: JoinSemiLattice::widen

use std::fmt::Debug;

use crate::utils::BitSet;

/// A join semi-lattice with a join (least upper bound) operation.
///
/// It must satisfy:
///
/// - **Idempotent**: `x.join(x) = x`
/// - **Commutative**: `x.join(y) = y.join(x)`
/// - **Associative**: `x.join(y.join(z)) = (x.join(y)).join(z)`
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::analysis::{AbstractValue, JoinSemiLattice};
///
/// let joined = AbstractValue::Integer(1).join(&AbstractValue::Integer(3));
/// assert!(AbstractValue::Integer(1).leq(&joined));
/// ```
pub trait JoinSemiLattice: Clone + Debug + PartialEq {
    /// Computes the join (least upper bound) of two lattice elements.
    #[must_use]
    fn join(&self, other: &Self) -> Self;

    /// Returns `true` if this is the top element.
    fn is_top(&self) -> bool;

    /// Returns `true` if this is the bottom element.
    fn is_bottom(&self) -> bool;

    /// Widens `self` (the previous iterate) by `next`.
    ///
    /// The result is an upper bound of both. The default is plain join, which is only correct
    /// for domains without infinite ascending chains.
    #[must_use]
    fn widen(&self, next: &Self) -> Self {
        self.join(next)
    }

    /// Lattice ordering derived from join: `x ⊑ y` iff `x ⊔ y = y`.
    fn leq(&self, other: &Self) -> bool {
        self.join(other) == *other
    }

    /// Joins `other` into `self` in place, returning `true` if `self` changed.
    fn join_assign(&mut self, other: &Self) -> bool {
        let joined = self.join(other);
        if joined == *self {
            false
        } else {
            *self = joined;
            true
        }
    }
}

/// A join semi-lattice with distinguished top and bottom elements.
pub trait BoundedLattice: JoinSemiLattice {
    /// Returns the top (⊤) element of the lattice.
    fn top() -> Self;

    /// Returns the bottom (⊥) element of the lattice.
    fn bottom() -> Self;
}

/// Sets of block or node indices, ordered by inclusion.
impl JoinSemiLattice for BitSet {
    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }

    fn is_top(&self) -> bool {
        self.count() == self.len()
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_join_is_union() {
        let mut a = BitSet::new(4);
        let mut b = BitSet::new(4);
        a.insert(0);
        b.insert(3);

        let joined = a.join(&b);
        assert_eq!(joined.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert!(a.leq(&joined));
        assert!(!joined.leq(&a));
    }

    #[test]
    fn test_join_assign_reports_change() {
        let mut a = BitSet::new(4);
        let mut b = BitSet::new(4);
        b.insert(1);

        assert!(a.join_assign(&b));
        assert!(!a.join_assign(&b));
        assert!(BitSet::new(4).is_bottom());
    }
}
