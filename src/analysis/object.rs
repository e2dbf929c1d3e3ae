//! Abstract heap objects.
//!
//! A [`HeapObject`] models the contents of one allocation, global or stack slot as a map from
//! byte offset to `(value, width)` plus an *overflow* value. The overflow absorbs every store
//! whose offset is unknown, and every store past the per-object offset tracking threshold.
//! Once it is set, every load joins it in.

use std::fmt;

use bitflags::bitflags;
use imbl::OrdMap;

use crate::{
    analysis::{value::canonical, AbstractValue, Address, JoinSemiLattice, PointerSet},
    ir::{FuncId, GlobalData, GlobalId, InitValue, InstId, SlotId},
};

/// Widest access any IR type performs, in bytes.
const MAX_ACCESS: i64 = 8;

/// Identity of an abstract object within one analysis run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    /// The reserved id of a global's object.
    #[must_use]
    pub const fn of_global(global: GlobalId) -> Self {
        ObjectId(global.0)
    }

    /// Dense index of the id.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// A static allocation site, the unit escape flags are reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocSite {
    /// A heap allocation instruction
    Heap(FuncId, InstId),
    /// A stack slot of a function
    Stack(FuncId, SlotId),
}

impl fmt::Display for AllocSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocSite::Heap(func, inst) => write!(f, "heap {func}:{inst}"),
            AllocSite::Stack(func, slot) => write!(f, "stack {func}:{slot}"),
        }
    }
}

/// What an object models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A global data object
    Global(GlobalId),
    /// Memory from a heap allocation site
    Heap(FuncId, InstId),
    /// A stack slot of one activation
    Stack(FuncId, SlotId),
}

impl ObjectKind {
    /// The allocation site, `None` for globals.
    #[must_use]
    pub const fn site(self) -> Option<AllocSite> {
        match self {
            ObjectKind::Global(_) => None,
            ObjectKind::Heap(func, inst) => Some(AllocSite::Heap(func, inst)),
            ObjectKind::Stack(func, slot) => Some(AllocSite::Stack(func, slot)),
        }
    }
}

bitflags! {
    /// Attributes of an abstract object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u8 {
        /// Stores are ignored
        const READ_ONLY = 0x01;
        /// Untracked bytes within the size read as zero
        const ZEROED = 0x02;
        /// Stands for several runtime objects; every store is weak
        const SUMMARY = 0x04;
    }
}

/// A tracked value and the width in bytes it was stored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Stored value
    pub value: AbstractValue,
    /// Access width in bytes
    pub width: u64,
}

/// The abstract contents of one memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapObject {
    kind: ObjectKind,
    size: Option<u64>,
    align: u32,
    flags: ObjectFlags,
    slots: OrdMap<i64, Slot>,
    overflow: Option<AbstractValue>,
}

impl HeapObject {
    /// Creates an object with no tracked contents.
    #[must_use]
    pub fn new(kind: ObjectKind, size: Option<u64>, align: u32, flags: ObjectFlags) -> Self {
        Self {
            kind,
            size,
            align,
            flags,
            slots: OrdMap::new(),
            overflow: None,
        }
    }

    /// Materializes a global from its declared initial contents.
    ///
    /// Initializers are trusted as written by the program; they are not subject to the
    /// offset tracking threshold.
    #[must_use]
    pub fn from_global(id: GlobalId, data: &GlobalData) -> Self {
        let mut flags = ObjectFlags::empty();
        flags.set(ObjectFlags::READ_ONLY, data.read_only);
        flags.set(ObjectFlags::ZEROED, data.zeroed);

        let mut object = Self::new(ObjectKind::Global(id), Some(data.size), data.align, flags);
        for (offset, init) in &data.init {
            let Ok(offset) = i64::try_from(*offset) else {
                continue;
            };
            object.slots.insert(
                offset,
                Slot {
                    value: init_value(*init),
                    width: init.size(),
                },
            );
        }
        object
    }

    /// What the object models.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Size in bytes, `None` if unknown.
    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        self.size
    }

    /// Alignment in bytes.
    #[must_use]
    pub const fn align(&self) -> u32 {
        self.align
    }

    /// Attribute flags.
    #[must_use]
    pub const fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// Returns `true` if stores are ignored.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.flags.contains(ObjectFlags::READ_ONLY)
    }

    /// Returns `true` if the object stands for several runtime objects.
    #[must_use]
    pub const fn is_summary(&self) -> bool {
        self.flags.contains(ObjectFlags::SUMMARY)
    }

    /// The overflow value, if any store was imprecise.
    #[must_use]
    pub fn overflow(&self) -> Option<&AbstractValue> {
        self.overflow.as_ref()
    }

    /// Number of tracked offsets.
    #[must_use]
    pub fn tracked_offsets(&self) -> usize {
        self.slots.len()
    }

    /// Tracked `(offset, slot)` pairs in offset order.
    pub fn slots(&self) -> impl Iterator<Item = (i64, &Slot)> + '_ {
        self.slots.iter().map(|(offset, slot)| (*offset, slot))
    }

    /// Every value the object holds, overflow included.
    pub fn values(&self) -> impl Iterator<Item = &AbstractValue> + '_ {
        self.slots
            .iter()
            .map(|(_, slot)| &slot.value)
            .chain(self.overflow.iter())
    }

    /// Union of the pointer sets held anywhere in the object.
    #[must_use]
    pub fn pointers(&self) -> PointerSet {
        self.values()
            .filter_map(AbstractValue::pointers)
            .fold(PointerSet::new(), |acc, set| acc.join(set))
    }

    /// Loads `width` bytes at `offset`.
    #[must_use]
    pub fn load(&self, offset: i64, width: u64) -> AbstractValue {
        let value = self.load_raw(offset, width);
        match &self.overflow {
            Some(overflow) => value.join(overflow),
            None => value,
        }
    }

    /// Loads from an unknown offset: the join of everything the object may hold there.
    #[must_use]
    pub fn load_any(&self) -> AbstractValue {
        let mut value = match (self.size, self.flags.contains(ObjectFlags::ZEROED)) {
            (Some(_), true) => AbstractValue::Integer(0),
            (Some(_), false) => AbstractValue::Undefined,
            (None, _) => AbstractValue::Top,
        };
        for slot in self.values() {
            value = value.join(slot);
        }
        value
    }

    /// Stores `value` of `width` bytes at `offset`.
    ///
    /// Summary objects receive a weak update. A store that is out of bounds, or that would
    /// track more than `max_tracked` distinct offsets, degrades to
    /// [`HeapObject::store_imprecise`].
    pub fn store(&mut self, offset: i64, width: u64, value: AbstractValue, max_tracked: usize) {
        if !self.in_bounds(offset, width) {
            self.store_imprecise(value);
            return;
        }
        if self.is_summary() {
            self.store_weak(offset, width, value, max_tracked);
            return;
        }
        if !self.slots.contains_key(&offset) && self.slots.len() >= max_tracked {
            self.store_imprecise(value);
            return;
        }
        self.clobber_overlaps(offset, width);
        self.slots.insert(offset, Slot { value, width });
    }

    /// Joins `value` into the location: the store may or may not have happened.
    pub fn store_weak(&mut self, offset: i64, width: u64, value: AbstractValue, max_tracked: usize) {
        if !self.in_bounds(offset, width) {
            self.store_imprecise(value);
            return;
        }
        if !self.slots.contains_key(&offset) && self.slots.len() >= max_tracked {
            self.store_imprecise(value);
            return;
        }
        let previous = self.load_raw(offset, width);
        self.clobber_overlaps(offset, width);
        self.slots.insert(
            offset,
            Slot {
                value: previous.join(&value),
                width,
            },
        );
    }

    /// Stores `value` at an unknown offset.
    ///
    /// Every tracked slot is cleared and its value folded into the overflow together with
    /// `value`, so later loads at any offset see a superset of what they saw before.
    pub fn store_imprecise(&mut self, value: AbstractValue) {
        let mut overflow = self.overflow.take().unwrap_or(AbstractValue::Bottom);
        for (_, slot) in self.slots.iter() {
            overflow = overflow.join(&slot.value);
        }
        overflow = overflow.join(&value);
        self.slots.clear();
        self.overflow = Some(overflow);
    }

    /// Marks the object as standing for several runtime objects after its allocation
    /// site executed again. Tracked slots are joined with fresh contents.
    pub fn mark_summary(&mut self) {
        if self.is_summary() {
            return;
        }
        self.flags.insert(ObjectFlags::SUMMARY);
        let fresh: Vec<(i64, Slot)> = self
            .slots
            .iter()
            .map(|(offset, slot)| {
                let value = slot.value.join(&self.untracked(*offset, slot.width));
                (
                    *offset,
                    Slot {
                        value,
                        width: slot.width,
                    },
                )
            })
            .collect();
        for (offset, slot) in fresh {
            self.slots.insert(offset, slot);
        }
    }

    /// Forgets the size when an allocation site executes again with a different one.
    pub fn join_size(&mut self, size: Option<u64>) {
        if self.size != size {
            self.size = None;
        }
    }

    /// Applies `f` to every held value.
    pub fn map_values(&mut self, mut f: impl FnMut(&AbstractValue) -> AbstractValue) {
        let mapped: Vec<(i64, Slot)> = self
            .slots
            .iter()
            .map(|(offset, slot)| {
                (
                    *offset,
                    Slot {
                        value: f(&slot.value),
                        width: slot.width,
                    },
                )
            })
            .collect();
        for (offset, slot) in mapped {
            self.slots.insert(offset, slot);
        }
        if let Some(overflow) = self.overflow.take() {
            self.overflow = Some(f(&overflow));
        }
    }

    /// Least upper bound of two states of the same object.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        self.combine(other, AbstractValue::join)
    }

    /// Widens `self` (the previous state) by `next`.
    #[must_use]
    pub fn widen(&self, next: &Self) -> Self {
        self.combine(next, AbstractValue::widen)
    }

    fn combine(
        &self,
        other: &Self,
        f: impl Fn(&AbstractValue, &AbstractValue) -> AbstractValue,
    ) -> Self {
        let mut slots = OrdMap::new();
        let offsets = self.slots.keys().chain(other.slots.keys()).copied();
        for offset in offsets {
            if slots.contains_key(&offset) {
                continue;
            }
            let slot = match (self.slots.get(&offset), other.slots.get(&offset)) {
                (Some(a), Some(b)) if a.width == b.width => Slot {
                    value: f(&a.value, &b.value),
                    width: a.width,
                },
                (Some(a), Some(b)) => Slot {
                    value: AbstractValue::Top,
                    width: a.width.max(b.width),
                },
                (Some(a), None) => Slot {
                    value: f(&a.value, &other.load_raw(offset, a.width)),
                    width: a.width,
                },
                (None, Some(b)) => Slot {
                    value: f(&self.load_raw(offset, b.width), &b.value),
                    width: b.width,
                },
                (None, None) => continue,
            };
            slots.insert(offset, slot);
        }

        let overflow = match (&self.overflow, &other.overflow) {
            (Some(a), Some(b)) => Some(f(a, b)),
            (Some(a), None) => Some(f(a, &AbstractValue::Bottom)),
            (None, Some(b)) => Some(f(&AbstractValue::Bottom, b)),
            (None, None) => None,
        };

        let size = if self.size == other.size { self.size } else { None };
        let summary = (self.flags | other.flags) & ObjectFlags::SUMMARY;

        Self {
            kind: self.kind,
            size,
            align: self.align.max(other.align),
            flags: self.flags | summary,
            slots,
            overflow,
        }
    }

    fn in_bounds(&self, offset: i64, width: u64) -> bool {
        let Ok(start) = u64::try_from(offset) else {
            return false;
        };
        match self.size {
            Some(size) => start.checked_add(width).is_some_and(|end| end <= size),
            None => true,
        }
    }

    /// Contents of fresh memory at a location nothing tracks.
    fn untracked(&self, offset: i64, width: u64) -> AbstractValue {
        match self.size {
            Some(_) if self.in_bounds(offset, width) => {
                if self.flags.contains(ObjectFlags::ZEROED) {
                    AbstractValue::Integer(0)
                } else {
                    AbstractValue::Undefined
                }
            }
            _ => AbstractValue::Top,
        }
    }

    /// Value at a location ignoring the overflow.
    fn load_raw(&self, offset: i64, width: u64) -> AbstractValue {
        if let Some(slot) = self.slots.get(&offset) {
            return if slot.width == width {
                slot.value.clone()
            } else {
                AbstractValue::Top
            };
        }
        if self.overlapping(offset, width).next().is_some() {
            return AbstractValue::Top;
        }
        self.untracked(offset, width)
    }

    fn overlapping(&self, offset: i64, width: u64) -> impl Iterator<Item = i64> + '_ {
        let width = i64::try_from(width).unwrap_or(MAX_ACCESS);
        let end = offset.saturating_add(width);
        self.slots
            .range(offset.saturating_sub(MAX_ACCESS - 1)..end)
            .filter(move |(start, slot)| {
                let slot_end = start.saturating_add(i64::try_from(slot.width).unwrap_or(MAX_ACCESS));
                **start < end && offset < slot_end
            })
            .map(|(start, _)| *start)
    }

    /// Replaces slots partially overwritten by a store at `(offset, width)` with `Top`.
    fn clobber_overlaps(&mut self, offset: i64, width: u64) {
        let clobbered: Vec<i64> = self
            .overlapping(offset, width)
            .filter(|&start| {
                start != offset || self.slots.get(&start).is_some_and(|s| s.width != width)
            })
            .collect();
        for start in clobbered {
            if let Some(slot) = self.slots.get_mut(&start) {
                slot.value = AbstractValue::Top;
            }
        }
    }
}

fn init_value(init: InitValue) -> AbstractValue {
    let pointer = |address| AbstractValue::Pointer(PointerSet::single(address));
    match init {
        InitValue::Int { value, ty } => AbstractValue::Integer(canonical(value, ty.bits())),
        InitValue::Float(value) => AbstractValue::Float(value),
        InitValue::Global { global, offset } => pointer(Address::Object {
            id: ObjectId::of_global(global),
            offset,
        }),
        InitValue::Extern { symbol, offset } => pointer(Address::Extern { symbol, offset }),
        InitValue::Func(func) => pointer(Address::Func(func)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    fn heap(size: Option<u64>, zeroed: bool) -> HeapObject {
        let flags = if zeroed {
            ObjectFlags::ZEROED
        } else {
            ObjectFlags::empty()
        };
        HeapObject::new(ObjectKind::Heap(FuncId::new(0), InstId::new(0)), size, 8, flags)
    }

    #[test]
    fn test_store_load_round_trip() {
        let mut object = heap(Some(16), false);
        object.store(0, 8, AbstractValue::Integer(42), 256);
        assert_eq!(object.load(0, 8), AbstractValue::Integer(42));
        object.store(0, 8, AbstractValue::Integer(7), 256);
        assert_eq!(object.load(0, 8), AbstractValue::Integer(7));
    }

    #[test]
    fn test_untracked_loads() {
        assert_eq!(heap(Some(16), true).load(8, 8), AbstractValue::Integer(0));
        assert_eq!(heap(Some(16), false).load(8, 8), AbstractValue::Undefined);
        assert_eq!(heap(Some(16), true).load(12, 8), AbstractValue::Top);
        assert_eq!(heap(None, true).load(0, 8), AbstractValue::Top);
    }

    #[test]
    fn test_partial_overlap_is_top() {
        let mut object = heap(Some(16), true);
        object.store(0, 8, AbstractValue::Integer(1), 256);
        assert_eq!(object.load(4, 4), AbstractValue::Top);
        assert_eq!(object.load(0, 4), AbstractValue::Top);

        object.store(4, 4, AbstractValue::Integer(2), 256);
        assert_eq!(object.load(4, 4), AbstractValue::Integer(2));
        assert_eq!(object.load(0, 8), AbstractValue::Top);
    }

    #[test]
    fn test_imprecise_store_is_monotone() {
        let mut object = heap(Some(32), false);
        object.store(0, 8, AbstractValue::Integer(1), 256);
        object.store(8, 8, AbstractValue::Integer(2), 256);
        let before = [object.load(0, 8), object.load(8, 8)];

        object.store_imprecise(AbstractValue::Integer(3));
        assert_eq!(object.tracked_offsets(), 0);
        assert!(before[0].leq(&object.load(0, 8)));
        assert!(before[1].leq(&object.load(8, 8)));
        assert!(AbstractValue::Integer(3).leq(&object.load(16, 8)));

        object.store(0, 8, AbstractValue::Integer(9), 256);
        assert_eq!(
            object.load(0, 8),
            AbstractValue::range(Some(1), Some(9))
        );
    }

    #[test]
    fn test_tracking_threshold_boundary() {
        let mut object = heap(Some(64), true);
        for i in 0..4 {
            object.store(i * 8, 8, AbstractValue::Integer(i), 4);
        }
        assert_eq!(object.tracked_offsets(), 4);
        assert!(object.overflow().is_none());
        assert_eq!(object.load(24, 8), AbstractValue::Integer(3));

        // Rewriting a tracked offset stays precise at the threshold.
        object.store(24, 8, AbstractValue::Integer(30), 4);
        assert!(object.overflow().is_none());

        object.store(32, 8, AbstractValue::Integer(4), 4);
        assert_eq!(object.tracked_offsets(), 0);
        assert!(object.overflow().is_some());
        assert!(AbstractValue::Integer(30).leq(&object.load(24, 8)));
    }

    #[test]
    fn test_out_of_bounds_store_is_imprecise() {
        let mut object = heap(Some(8), true);
        object.store(8, 8, AbstractValue::Integer(1), 256);
        assert_eq!(object.tracked_offsets(), 0);
        assert!(AbstractValue::Integer(1).leq(&object.load(0, 8)));
    }

    #[test]
    fn test_summary_stores_are_weak() {
        let mut object = heap(Some(16), true);
        object.store(0, 8, AbstractValue::Integer(5), 256);
        object.mark_summary();
        assert_eq!(object.load(0, 8), AbstractValue::range(Some(0), Some(5)));
        object.store(0, 8, AbstractValue::Integer(6), 256);
        assert_eq!(object.load(0, 8), AbstractValue::range(Some(0), Some(6)));
    }

    #[test]
    fn test_join_uses_defaults_for_missing_slots() {
        let mut a = heap(Some(16), true);
        let mut b = heap(Some(16), true);
        a.store(0, 8, AbstractValue::Integer(4), 256);
        b.store(8, 8, AbstractValue::Integer(2), 256);

        let joined = a.join(&b);
        assert_eq!(joined.load(0, 8), AbstractValue::range(Some(0), Some(4)));
        assert_eq!(joined.load(8, 8), AbstractValue::range(Some(0), Some(2)));
        assert_eq!(joined, b.join(&a));
        assert_eq!(joined.join(&joined), joined);
    }

    #[test]
    fn test_join_overflow_with_absent_side() {
        let mut a = heap(Some(16), false);
        let b = heap(Some(16), false);
        a.store_imprecise(AbstractValue::Integer(1));
        let joined = a.join(&b);
        assert_eq!(joined.overflow(), Some(&AbstractValue::Integer(1)));
    }

    #[test]
    fn test_global_materialization() {
        let data = GlobalData::new("table", 16)
            .with_init(0, InitValue::Int { value: 300, ty: Type::I8 })
            .with_init(8, InitValue::Func(FuncId::new(2)))
            .read_only();
        let object = HeapObject::from_global(GlobalId::new(0), &data);
        assert!(object.is_read_only());
        assert_eq!(object.load(0, 1), AbstractValue::Integer(44));
        assert_eq!(
            object.load(8, 8),
            AbstractValue::Pointer(PointerSet::single(Address::Func(FuncId::new(2))))
        );
        assert_eq!(object.load(1, 1), AbstractValue::Integer(0));
    }
}
