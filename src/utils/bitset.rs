//! A dense bit vector over small integer ids.
//!
//! The evaluator tracks several sets whose members are block or node indices of one function:
//! which blocks a frame has reached, which SCC nodes were bypassed, which blocks belong to a
//! loop. Those universes are small and fixed per function, so one bit per member is enough.
//!
//! # Example
//!
//! ```rust,ignore
//! use preeval::utils::BitSet;
//!
//! let mut reached = BitSet::new(8);
//! assert!(reached.insert(3));
//! assert!(!reached.insert(3));
//! assert_eq!(reached.iter().collect::<Vec<_>>(), vec![3]);
//! ```

/// A fixed-capacity set of `usize` indices stored as 64-bit words.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns the capacity of the set (not the number of members).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no index is a member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Adds `index` to the set, returning `true` if it was not already present.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the capacity of the set.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let word = &mut self.words[index / 64];
        let bit = 1u64 << (index % 64);
        let added = *word & bit == 0;
        *word |= bit;
        added
    }

    /// Removes `index` from the set, returning `true` if it was present.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let word = &mut self.words[index / 64];
        let bit = 1u64 << (index % 64);
        let present = *word & bit != 0;
        *word &= !bit;
        present
    }

    /// Returns `true` if `index` is a member. Indices beyond the capacity are never members.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Number of members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Adds every member of `other`, returning `true` if the set grew.
    ///
    /// # Panics
    ///
    /// Panics if the two sets have different capacities.
    pub fn union_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Iterates over members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * 64 + bit)
            })
        })
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
