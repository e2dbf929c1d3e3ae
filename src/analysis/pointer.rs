//! Abstract addresses and pointer sets.
//!
//! A pointer value is a finite union of places it may denote. Each place has a *base* (a heap
//! object, an external symbol, a function, a block, or a whole call frame) and, for bases
//! that span bytes, an offset which is either exact or unknown ("range").
//!
//! The set keeps at most one offset per base. Joining two different exact offsets on the same
//! base yields the range of that base, so the per-base domain is a flat lattice and the whole
//! set is a true join-semilattice.

use std::{collections::BTreeMap, fmt};

use crate::{
    analysis::{JoinSemiLattice, ObjectId},
    ir::{BlockId, ExternId, FuncId},
};

/// Depth of a call frame on the frame stack; the root activation has depth 0.
pub type FrameIndex = usize;

/// The thing an address points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Base {
    /// A heap, stack or global object of the heap context
    Object(ObjectId),
    /// Memory of an external symbol
    Extern(ExternId),
    /// Code address of a function
    Func(FuncId),
    /// Label of a block, for computed jumps
    Block(FuncId, BlockId),
    /// A whole call frame (every stack object of that activation)
    Frame(FrameIndex),
}

impl Base {
    /// Returns `true` for bases that span addressable bytes.
    #[must_use]
    pub const fn is_offsetable(self) -> bool {
        matches!(self, Base::Object(_) | Base::Extern(_))
    }
}

/// Offset of an address within its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// A known byte offset
    Exact(i64),
    /// Any offset within the base
    Any,
}

impl Offset {
    fn join(self, other: Offset) -> Offset {
        match (self, other) {
            (Offset::Exact(a), Offset::Exact(b)) if a == b => Offset::Exact(a),
            _ => Offset::Any,
        }
    }
}

/// One abstract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// `(object, byte offset)`, precise
    Object {
        /// Target object
        id: ObjectId,
        /// Byte offset
        offset: i64,
    },
    /// Somewhere within an object
    ObjectRange(ObjectId),
    /// `(external symbol, byte offset)`
    Extern {
        /// Target symbol
        symbol: ExternId,
        /// Byte offset
        offset: i64,
    },
    /// Somewhere within an external symbol
    ExternRange(ExternId),
    /// Code pointer
    Func(FuncId),
    /// Block label
    Block(FuncId, BlockId),
    /// Pointer to a caller's stack frame
    Frame(FrameIndex),
}

impl Address {
    fn split(self) -> (Base, Offset) {
        match self {
            Address::Object { id, offset } => (Base::Object(id), Offset::Exact(offset)),
            Address::ObjectRange(id) => (Base::Object(id), Offset::Any),
            Address::Extern { symbol, offset } => (Base::Extern(symbol), Offset::Exact(offset)),
            Address::ExternRange(symbol) => (Base::Extern(symbol), Offset::Any),
            Address::Func(func) => (Base::Func(func), Offset::Exact(0)),
            Address::Block(func, block) => (Base::Block(func, block), Offset::Exact(0)),
            Address::Frame(frame) => (Base::Frame(frame), Offset::Any),
        }
    }

    fn assemble(base: Base, offset: Offset) -> Address {
        match (base, offset) {
            (Base::Object(id), Offset::Exact(offset)) => Address::Object { id, offset },
            (Base::Object(id), Offset::Any) => Address::ObjectRange(id),
            (Base::Extern(symbol), Offset::Exact(offset)) => Address::Extern { symbol, offset },
            (Base::Extern(symbol), Offset::Any) => Address::ExternRange(symbol),
            (Base::Func(func), _) => Address::Func(func),
            (Base::Block(func, block), _) => Address::Block(func, block),
            (Base::Frame(frame), _) => Address::Frame(frame),
        }
    }

    /// The base this address points into.
    #[must_use]
    pub fn base(self) -> Base {
        self.split().0
    }

    /// Returns `true` if the address denotes exactly one location.
    #[must_use]
    pub const fn is_precise(self) -> bool {
        matches!(
            self,
            Address::Object { .. } | Address::Extern { .. } | Address::Func(_) | Address::Block(..)
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Object { id, offset } => write!(f, "{id}+{offset}"),
            Address::ObjectRange(id) => write!(f, "{id}+?"),
            Address::Extern { symbol, offset } => write!(f, "{symbol}+{offset}"),
            Address::ExternRange(symbol) => write!(f, "{symbol}+?"),
            Address::Func(func) => write!(f, "&{func}"),
            Address::Block(func, block) => write!(f, "&{func}:{block}"),
            Address::Frame(frame) => write!(f, "frame#{frame}"),
        }
    }
}

/// A finite set of abstract addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PointerSet {
    targets: BTreeMap<Base, Offset>,
}

impl PointerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding one address.
    #[must_use]
    pub fn single(address: Address) -> Self {
        let mut set = Self::new();
        set.insert(address);
        set
    }

    /// Adds an address, joining with any address already present on the same base.
    pub fn insert(&mut self, address: Address) {
        let (base, offset) = address.split();
        self.targets
            .entry(base)
            .and_modify(|existing| *existing = existing.join(offset))
            .or_insert(offset);
    }

    /// Number of bases in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if the set denotes no location.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterates over the addresses in base order.
    pub fn iter(&self) -> impl Iterator<Item = Address> + '_ {
        self.targets
            .iter()
            .map(|(&base, &offset)| Address::assemble(base, offset))
    }

    /// Returns `true` iff the set has exactly one element and that element is precise.
    #[must_use]
    pub fn is_precise(&self) -> bool {
        self.precise().is_some()
    }

    /// The single precise address, if the set is precise.
    #[must_use]
    pub fn precise(&self) -> Option<Address> {
        match self.targets.len() {
            1 => self.iter().next().filter(|a| a.is_precise()),
            _ => None,
        }
    }

    /// Object ids referenced by the set, in id order.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.targets.keys().filter_map(|base| match base {
            Base::Object(id) => Some(*id),
            _ => None,
        })
    }

    /// Frames referenced by the set.
    pub fn frames(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.targets.keys().filter_map(|base| match base {
            Base::Frame(frame) => Some(*frame),
            _ => None,
        })
    }

    /// Functions referenced by the set.
    pub fn funcs(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.targets.keys().filter_map(|base| match base {
            Base::Func(func) => Some(*func),
            _ => None,
        })
    }

    /// Blocks referenced by the set.
    pub fn blocks(&self) -> impl Iterator<Item = (FuncId, BlockId)> + '_ {
        self.targets.keys().filter_map(|base| match base {
            Base::Block(func, block) => Some((*func, *block)),
            _ => None,
        })
    }

    /// Returns `true` if every address is a code address.
    #[must_use]
    pub fn only_code(&self) -> bool {
        self.targets
            .keys()
            .all(|base| matches!(base, Base::Func(_) | Base::Block(..)))
    }

    /// Returns `true` if the two sets share no base.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.targets.keys().all(|base| !other.targets.contains_key(base))
    }

    /// Shifts every exact offset by `delta`.
    ///
    /// Returns `None` if the set holds a code address and `delta` is not zero; code
    /// addresses have no meaningful neighbours.
    #[must_use]
    pub fn offset(&self, delta: i64) -> Option<Self> {
        let mut targets = BTreeMap::new();
        for (&base, &offset) in &self.targets {
            let shifted = match (base, offset) {
                (Base::Func(_) | Base::Block(..), _) if delta != 0 => return None,
                (b, Offset::Exact(o)) if b.is_offsetable() => match o.checked_add(delta) {
                    Some(o) => Offset::Exact(o),
                    None => Offset::Any,
                },
                _ => offset,
            };
            targets.insert(base, shifted);
        }
        Some(Self { targets })
    }

    /// Turns every offsetable address into the range of its base.
    ///
    /// Returns `None` if the set holds a code address, see [`PointerSet::offset`].
    #[must_use]
    pub fn decay(&self) -> Option<Self> {
        if self
            .targets
            .keys()
            .any(|base| matches!(base, Base::Func(_) | Base::Block(..)))
        {
            return None;
        }
        Some(self.decay_data())
    }

    /// Like [`PointerSet::decay`] but leaves code addresses in place.
    #[must_use]
    pub fn decay_data(&self) -> Self {
        let targets = self
            .targets
            .iter()
            .map(|(&base, &offset)| {
                if base.is_offsetable() {
                    (base, Offset::Any)
                } else {
                    (base, offset)
                }
            })
            .collect();
        Self { targets }
    }

    /// Exact byte distance `self - other` if both are precise addresses into the same base.
    #[must_use]
    pub fn distance(&self, other: &Self) -> Option<i64> {
        match (self.precise()?, other.precise()?) {
            (Address::Object { id: a, offset: x }, Address::Object { id: b, offset: y })
                if a == b =>
            {
                x.checked_sub(y)
            }
            (
                Address::Extern {
                    symbol: a,
                    offset: x,
                },
                Address::Extern {
                    symbol: b,
                    offset: y,
                },
            ) if a == b => x.checked_sub(y),
            _ => None,
        }
    }

    /// Replaces references to `frame` by ranges over `objects`.
    #[must_use]
    pub fn rewrite_frame(&self, frame: FrameIndex, objects: &[ObjectId]) -> Self {
        if !self.targets.contains_key(&Base::Frame(frame)) {
            return self.clone();
        }
        let mut rewritten = self.clone();
        rewritten.targets.remove(&Base::Frame(frame));
        for &id in objects {
            rewritten.insert(Address::ObjectRange(id));
        }
        rewritten
    }

    /// Keeps only the addresses accepted by `keep`.
    #[must_use]
    pub fn filter(&self, keep: impl Fn(Address) -> bool) -> Self {
        let targets = self
            .targets
            .iter()
            .filter(|(base, offset)| keep(Address::assemble(**base, **offset)))
            .map(|(&base, &offset)| (base, offset))
            .collect();
        Self { targets }
    }
}

impl FromIterator<Address> for PointerSet {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        let mut set = Self::new();
        for address in iter {
            set.insert(address);
        }
        set
    }
}

impl JoinSemiLattice for PointerSet {
    fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        for (&base, &offset) in &other.targets {
            joined
                .targets
                .entry(base)
                .and_modify(|existing| *existing = existing.join(offset))
                .or_insert(offset);
        }
        joined
    }

    fn is_top(&self) -> bool {
        false
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }
}

impl fmt::Display for PointerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, address) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{address}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: u32, offset: i64) -> Address {
        Address::Object {
            id: ObjectId(id),
            offset,
        }
    }

    #[test]
    fn test_single_precise_pointer() {
        let set = PointerSet::single(obj(1, 8));
        assert!(set.is_precise());
        assert_eq!(set.precise(), Some(obj(1, 8)));
        assert!(!PointerSet::single(Address::ObjectRange(ObjectId(1))).is_precise());
        assert!(!PointerSet::single(Address::Frame(0)).is_precise());
        assert!(PointerSet::single(Address::Func(FuncId::new(0))).is_precise());
    }

    #[test]
    fn test_differing_offsets_join_to_range() {
        let a = PointerSet::single(obj(1, 0));
        let b = PointerSet::single(obj(1, 8));
        let joined = a.join(&b);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.iter().next(), Some(Address::ObjectRange(ObjectId(1))));
        assert!(!joined.is_precise());
    }

    #[test]
    fn test_distinct_objects_union() {
        let a = PointerSet::single(obj(1, 0));
        let b = PointerSet::single(obj(2, 0));
        let joined = a.join(&b);
        assert_eq!(joined.len(), 2);
        assert!(!joined.is_precise());
        assert_eq!(joined.objects().collect::<Vec<_>>(), vec![ObjectId(1), ObjectId(2)]);
    }

    #[test]
    fn test_offset_and_decay() {
        let set = PointerSet::single(obj(3, 4));
        assert_eq!(set.offset(4).unwrap().precise(), Some(obj(3, 8)));
        assert_eq!(
            set.decay().unwrap().iter().next(),
            Some(Address::ObjectRange(ObjectId(3)))
        );

        let code = PointerSet::single(Address::Func(FuncId::new(1)));
        assert!(code.offset(0).is_some());
        assert!(code.offset(8).is_none());
        assert!(code.decay().is_none());
    }

    #[test]
    fn test_distance_same_base_only() {
        let a = PointerSet::single(obj(1, 24));
        let b = PointerSet::single(obj(1, 8));
        let c = PointerSet::single(obj(2, 8));
        assert_eq!(a.distance(&b), Some(16));
        assert_eq!(a.distance(&c), None);
    }

    #[test]
    fn test_rewrite_frame_reference() {
        let set = PointerSet::single(Address::Frame(2));
        let rewritten = set.rewrite_frame(2, &[ObjectId(7), ObjectId(8)]);
        assert_eq!(rewritten.frames().count(), 0);
        assert_eq!(rewritten.objects().collect::<Vec<_>>(), vec![ObjectId(7), ObjectId(8)]);
        assert_eq!(set.rewrite_frame(1, &[ObjectId(7)]), set);
    }
}
