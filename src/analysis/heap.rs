//! The heap context: every abstract object plus the simulated call-frame stack.
//!
//! A [`HeapContext`] is the whole abstract machine state at one program point. It is
//! persistent: cloning it is cheap and shares structure, so the driver can fork a state at
//! every branch and join the forks back at merge points.
//!
//! # Object Identity
//!
//! Objects are kept in an arena keyed by [`ObjectId`]; every cross-reference (from a pointer
//! set, a frame, another object) is an id. Ids come from a counter shared by all states forked
//! from one root context, so an id is never reused within an analysis run:
//!
//! - `0..globals` are reserved for the program's globals, materialized on first touch
//! - later ids are handed out to stack slots on frame entry and to heap allocations
//!
//! A site gets its id once per [`CallChain`]: every activation entered through the same calls
//! sees the same ids for its slots and allocations. An id whose object died with an earlier
//! activation is reused for a fresh object; one whose object is still live becomes a summary.
//!
//! # Frames
//!
//! [`HeapContext::enter_frame`] pushes an activation and creates its stack objects.
//! [`HeapContext::leave_frame`] pops it: addresses of the popped frame are rewritten into
//! ranges over its stack objects, objects the activation owned that are still reachable move
//! to the caller and are flagged as escaped, and everything else the activation owned is
//! dropped.

use std::{
    borrow::Cow,
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

use imbl::{OrdMap, OrdSet};
use log::{debug, trace};

use crate::{
    analysis::{
        AbstractValue, Address, AllocSite, CallChain, CallFrame, FrameIndex, HeapObject, JoinSemiLattice,
        ObjectFlags, ObjectId, ObjectKind, OracleTarget, PointerSet,
    },
    ir::{FuncId, GlobalId, InstId, Program, SlotId, Type},
    Result,
};

/// Alignment assumed for heap allocations.
const HEAP_ALIGN: u32 = 16;

/// Id counters shared by every state forked from one root context.
#[derive(Debug)]
struct IdSource {
    next_object: AtomicU32,
    next_activation: AtomicU64,
}

impl IdSource {
    fn object(&self) -> Result<ObjectId> {
        self.next_object
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| id.checked_add(1))
            .map(ObjectId)
            .map_err(|_| consistency_error!("object id space exhausted"))
    }

    fn activation(&self) -> u64 {
        self.next_activation.fetch_add(1, Ordering::AcqRel)
    }
}

/// Abstract machine state: objects, frames and escape bookkeeping.
#[derive(Debug, Clone)]
pub struct HeapContext<'p> {
    program: &'p Program,
    ids: Arc<IdSource>,
    max_tracked: usize,
    objects: OrdMap<ObjectId, HeapObject>,
    frames: Vec<CallFrame>,
    /// Object ids of stack and heap sites, per call chain
    sites: OrdMap<(CallChain, AllocSite), ObjectId>,
    allocated: OrdSet<AllocSite>,
    escaped: OrdSet<AllocSite>,
    /// Objects external code may hold pointers to
    exposed: OrdSet<ObjectId>,
}

impl PartialEq for HeapContext<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.objects == other.objects
            && self.frames == other.frames
            && self.sites == other.sites
            && self.allocated == other.allocated
            && self.escaped == other.escaped
            && self.exposed == other.exposed
    }
}

impl<'p> HeapContext<'p> {
    /// Creates an empty context for `program`. Stores track at most `max_tracked` distinct
    /// offsets per object.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the program has more globals than object ids.
    pub fn new(program: &'p Program, max_tracked: usize) -> Result<Self> {
        let globals = u32::try_from(program.global_count())
            .map_err(|_| consistency_error!("{} globals exceed the object id space", program.global_count()))?;
        Ok(Self {
            program,
            ids: Arc::new(IdSource {
                next_object: AtomicU32::new(globals),
                next_activation: AtomicU64::new(0),
            }),
            max_tracked,
            objects: OrdMap::new(),
            frames: Vec::new(),
            sites: OrdMap::new(),
            allocated: OrdSet::new(),
            escaped: OrdSet::new(),
            exposed: OrdSet::new(),
        })
    }

    /// The program being analyzed.
    #[must_use]
    pub fn program(&self) -> &'p Program {
        self.program
    }

    /// Offset tracking threshold per object.
    #[must_use]
    pub const fn max_tracked(&self) -> usize {
        self.max_tracked
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Number of live frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Live frames, outermost first.
    #[must_use]
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// The frame at depth `index`.
    #[must_use]
    pub fn frame_at(&self, index: FrameIndex) -> Option<&CallFrame> {
        self.frames.get(index)
    }

    /// The active frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn frame(&self) -> Result<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| consistency_error!("no active frame"))
    }

    /// The active frame, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn frame_mut(&mut self) -> Result<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| consistency_error!("no active frame"))
    }

    /// Value previously computed for `inst` by the active frame.
    #[must_use]
    pub fn find(&self, inst: InstId) -> Option<&AbstractValue> {
        self.frames.last().and_then(|frame| frame.find(inst))
    }

    /// Records the value of `inst` in the active frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn define(&mut self, inst: InstId, value: AbstractValue) -> Result<()> {
        self.frame_mut()?.define(inst, value);
        Ok(())
    }

    /// Pushes an activation of `func` called with `args` that no call instruction of the
    /// active frame accounts for, and creates its stack objects.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFunction`] for a function outside the program.
    pub fn enter_frame(&mut self, func: FuncId, args: Vec<AbstractValue>) -> Result<FrameIndex> {
        self.enter_call(None, func, args)
    }

    /// Pushes an activation of `func` entered through call instruction `call` of the active
    /// frame, and creates its stack objects.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFunction`] for a function outside the program.
    pub fn enter_call(
        &mut self,
        call: Option<InstId>,
        func: FuncId,
        args: Vec<AbstractValue>,
    ) -> Result<FrameIndex> {
        let function = self.program.func(func)?;
        let chain: CallChain = match self.frames.last() {
            Some(caller) => caller
                .chain()
                .iter()
                .copied()
                .chain(std::iter::once((caller.func(), call)))
                .collect(),
            None => Arc::from(Vec::new()),
        };

        let mut slots = Vec::with_capacity(function.slots().len());
        for (index, slot) in function.slots().iter().enumerate() {
            let slot_id = SlotId::new(index);
            let site = AllocSite::Stack(func, slot_id);
            let (id, live) = self.site_id(&chain, site)?;
            if live {
                self.object_mut(id)?.mark_summary();
            } else {
                self.objects.insert(
                    id,
                    HeapObject::new(
                        ObjectKind::Stack(func, slot_id),
                        Some(slot.size),
                        slot.align,
                        ObjectFlags::empty(),
                    ),
                );
            }
            self.allocated.insert(site);
            slots.push(id);
        }

        let index = self.frames.len();
        let activation = self.ids.activation();
        trace!("enter {} at depth {index}", function.name());
        self.frames.push(CallFrame::new(index, activation, chain, func, args, slots));
        Ok(index)
    }

    /// Pops the active frame. Returns the return value and the popped frame, both rewritten
    /// so that they no longer mention the popped activation's frame address.
    ///
    /// Owned objects reachable from the return value, from objects the frame does not own,
    /// from the remaining frames or from external code are handed to the caller and their
    /// sites flagged as escaped. The rest of the owned objects are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live or a reference dangles.
    pub fn leave_frame(&mut self, ret: AbstractValue) -> Result<(AbstractValue, CallFrame)> {
        let mut frame = self
            .frames
            .pop()
            .ok_or_else(|| consistency_error!("frame stack underflow"))?;
        let depth = frame.index();
        let locals = frame.stack_objects().to_vec();

        let rewrite = |value: &AbstractValue| rewrite_frame(value, depth, &locals);
        let ret = rewrite(&ret);
        frame.map_values(rewrite);
        let touched: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, object)| object.pointers().frames().any(|f| f == depth))
            .map(|(id, _)| *id)
            .collect();
        for id in touched {
            if let Some(object) = self.objects.get_mut(&id) {
                object.map_values(rewrite);
            }
        }
        for caller in &mut self.frames {
            if caller.pointers().frames().any(|f| f == depth) {
                caller.map_values(rewrite);
            }
        }

        let mut roots = ret.pointers().cloned().unwrap_or_default();
        for (id, object) in self.objects.iter() {
            if !frame.owns(*id) {
                roots = roots.join(&object.pointers());
            }
        }
        for caller in &self.frames {
            roots = roots.join(&caller.pointers());
        }
        for id in self.exposed.iter() {
            roots.insert(Address::ObjectRange(*id));
        }
        let live = self.closure(&roots)?;

        let mut escaped = Vec::new();
        for id in frame.objects() {
            if live.contains(&id) {
                escaped.push(id);
                if let Some(caller) = self.frames.last_mut() {
                    caller.adopt(id);
                }
            } else {
                self.objects.remove(&id);
                self.exposed.remove(&id);
            }
        }
        self.mark_escaped(escaped.iter().copied())?;

        trace!(
            "leave depth {depth}: {} objects escaped, {} live objects",
            escaped.len(),
            self.objects.len()
        );
        Ok((ret, frame))
    }

    /// Address of the active frame itself.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn frame_address(&self) -> Result<AbstractValue> {
        let frame = self.frame()?;
        Ok(AbstractValue::Pointer(PointerSet::single(Address::Frame(
            frame.index(),
        ))))
    }

    /// Address `offset` bytes into stack slot `slot` of the active frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live or the slot does not exist.
    pub fn slot_address(&self, slot: SlotId, offset: i64) -> Result<AbstractValue> {
        let frame = self.frame()?;
        let id = frame
            .slot_object(slot)
            .ok_or_else(|| consistency_error!("{} has no stack slot {}", frame.func(), slot))?;
        Ok(AbstractValue::Pointer(PointerSet::single(Address::Object {
            id,
            offset,
        })))
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Returns an object. Untouched globals are materialized from their initial contents.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] for an id that names no live object.
    pub fn object(&self, id: ObjectId) -> Result<Cow<'_, HeapObject>> {
        if let Some(object) = self.objects.get(&id) {
            return Ok(Cow::Borrowed(object));
        }
        self.initial_global(id)
            .map(Cow::Owned)
            .ok_or_else(|| consistency_error!("dangling object id {}", id))
    }

    /// Returns an object for modification, materializing untouched globals.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] for an id that names no live object.
    pub fn object_mut(&mut self, id: ObjectId) -> Result<&mut HeapObject> {
        if !self.objects.contains_key(&id) {
            let initial = self
                .initial_global(id)
                .ok_or_else(|| consistency_error!("dangling object id {}", id))?;
            self.objects.insert(id, initial);
        }
        self.objects
            .get_mut(&id)
            .ok_or_else(|| consistency_error!("dangling object id {}", id))
    }

    fn initial_global(&self, id: ObjectId) -> Option<HeapObject> {
        let global = GlobalId::new(id.index());
        (id.index() < self.program.global_count())
            .then(|| self.program.global(global))
            .flatten()
            .map(|data| HeapObject::from_global(global, data))
    }

    /// Materialized objects in id order. Globals appear once touched.
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &HeapObject)> + '_ {
        self.objects.iter().map(|(id, object)| (*id, object))
    }

    /// Number of materialized objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Ids of every global of the program, touched or not.
    pub fn global_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.program.global_count()).map(|i| ObjectId::of_global(GlobalId::new(i)))
    }

    /// Materializes every global.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if a global cannot be materialized.
    pub fn materialize_globals(&mut self) -> Result<()> {
        for index in 0..self.program.global_count() {
            self.object_mut(ObjectId::of_global(GlobalId::new(index)))?;
        }
        Ok(())
    }

    /// Allocates the object of heap allocation site `inst` in the active frame.
    ///
    /// Executing the same site again while its object is live, in the same activation or
    /// in a later one entered through the same calls, returns the same object, now a summary
    /// of every allocation made there.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn allocate(&mut self, inst: InstId, size: Option<u64>, zeroed: bool) -> Result<ObjectId> {
        let (chain, func) = {
            let frame = self.frame()?;
            (frame.chain().clone(), frame.func())
        };
        let (id, live) = self.site_id(&chain, AllocSite::Heap(func, inst))?;
        if live {
            let object = self.object_mut(id)?;
            object.join_size(size);
            object.mark_summary();
            return Ok(id);
        }

        let flags = if zeroed {
            ObjectFlags::ZEROED
        } else {
            ObjectFlags::empty()
        };
        self.create(id, func, inst, size, flags)
    }

    /// A summary object standing for every allocation `func`'s site `inst` may make on
    /// behalf of the active frame. Reuses the site's object if the active frame already
    /// allocated there.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn allocate_summary(&mut self, func: FuncId, inst: InstId) -> Result<ObjectId> {
        let chain = self.frame()?.chain().clone();
        let (id, live) = self.site_id(&chain, AllocSite::Heap(func, inst))?;
        if live {
            self.object_mut(id)?.mark_summary();
            return Ok(id);
        }
        self.create(id, func, inst, None, ObjectFlags::SUMMARY)
    }

    /// The id of `site` under `chain`, and whether its object is live.
    fn site_id(&mut self, chain: &CallChain, site: AllocSite) -> Result<(ObjectId, bool)> {
        let key = (chain.clone(), site);
        if let Some(id) = self.sites.get(&key).copied() {
            return Ok((id, self.objects.contains_key(&id)));
        }
        let id = self.ids.object()?;
        self.sites.insert(key, id);
        Ok((id, false))
    }

    fn create(
        &mut self,
        id: ObjectId,
        func: FuncId,
        inst: InstId,
        size: Option<u64>,
        flags: ObjectFlags,
    ) -> Result<ObjectId> {
        self.frame_mut()?.adopt(id);
        self.objects.insert(
            id,
            HeapObject::new(ObjectKind::Heap(func, inst), size, HEAP_ALIGN, flags),
        );
        self.allocated.insert(AllocSite::Heap(func, inst));
        Ok(id)
    }

    // ========================================================================
    // Memory access
    // ========================================================================

    /// Loads a value of type `ty` through an address value.
    ///
    /// Values without a usable pointer set load as `Top`; a null-only value as `Bottom`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the address references a dead object or frame.
    pub fn load(&self, addr: &AbstractValue, ty: Type) -> Result<AbstractValue> {
        match addr {
            AbstractValue::Bottom => Ok(AbstractValue::Bottom),
            AbstractValue::Pointer(set) | AbstractValue::Nullable(set) => self.load_from(set, ty),
            _ => Ok(AbstractValue::Top),
        }
    }

    /// Loads a value of type `ty` from every address of `set` and joins the results.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the set references a dead object or frame.
    pub fn load_from(&self, set: &PointerSet, ty: Type) -> Result<AbstractValue> {
        let width = ty.size();
        let mut value = AbstractValue::Bottom;
        for address in set.iter() {
            let loaded = match address {
                Address::Object { id, offset } => self.object(id)?.load(offset, width),
                Address::ObjectRange(id) => self.object(id)?.load_any(),
                Address::Frame(index) => {
                    let mut joined = AbstractValue::Bottom;
                    for id in self.frame_objects(index)? {
                        joined = joined.join(&self.object(id)?.load_any());
                    }
                    joined
                }
                Address::Extern { .. }
                | Address::ExternRange(_)
                | Address::Func(_)
                | Address::Block(..) => AbstractValue::Top,
            };
            value = value.join(&loaded.reinterpret(ty));
            if value.is_top() {
                break;
            }
        }
        Ok(value)
    }

    /// Stores `value` of type `ty` through an address value.
    ///
    /// Values without a usable pointer set are unknown addresses, see
    /// [`HeapContext::store_unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the address references a dead object or frame.
    pub fn store(&mut self, addr: &AbstractValue, value: AbstractValue, ty: Type) -> Result<()> {
        match addr {
            AbstractValue::Bottom => Ok(()),
            AbstractValue::Pointer(set) | AbstractValue::Nullable(set) => {
                self.store_to(set, value, ty)
            }
            _ => self.store_unknown(value),
        }
    }

    /// Stores `value` of type `ty` to the addresses of `set`: a strong update if the set is
    /// precise, weak updates otherwise. Read-only objects and code addresses are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the set references a dead object or frame.
    pub fn store_to(&mut self, set: &PointerSet, value: AbstractValue, ty: Type) -> Result<()> {
        let width = ty.size();
        let strong = set.is_precise();
        let max_tracked = self.max_tracked;
        for address in set.iter() {
            match address {
                Address::Object { id, offset } => {
                    let object = self.object_mut(id)?;
                    if object.is_read_only() {
                        debug!("ignoring store to read-only {id}");
                    } else if strong {
                        object.store(offset, width, value.clone(), max_tracked);
                    } else {
                        object.store_weak(offset, width, value.clone(), max_tracked);
                    }
                }
                Address::ObjectRange(id) => self.store_imprecise(id, value.clone())?,
                Address::Frame(index) => {
                    for id in self.frame_objects(index)? {
                        self.store_imprecise(id, value.clone())?;
                    }
                }
                Address::Extern { .. } | Address::ExternRange(_) => self.expose(&value)?,
                Address::Func(_) | Address::Block(..) => {
                    debug!("ignoring store to code address {address}");
                }
            }
        }
        Ok(())
    }

    /// Stores `value` at an address nothing is known about: every writable object may
    /// receive it and external code may see it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if a global cannot be materialized.
    pub fn store_unknown(&mut self, value: AbstractValue) -> Result<()> {
        debug!("store through an unknown address widens every writable object");
        self.materialize_globals()?;
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            self.store_imprecise(id, value.clone())?;
        }
        self.expose(&value)
    }

    /// Stores `value` at an unknown offset of object `id`, unless it is read-only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] for a dead object.
    pub fn store_imprecise(&mut self, id: ObjectId, value: AbstractValue) -> Result<()> {
        let object = self.object_mut(id)?;
        if object.is_read_only() {
            debug!("ignoring store to read-only {id}");
        } else {
            object.store_imprecise(value);
        }
        Ok(())
    }

    fn frame_objects(&self, index: FrameIndex) -> Result<Vec<ObjectId>> {
        self.frames
            .get(index)
            .map(|frame| frame.stack_objects().to_vec())
            .ok_or_else(|| consistency_error!("address references popped frame {}", index))
    }

    // ========================================================================
    // Reachability and escapes
    // ========================================================================

    /// Every object reachable from `roots` through stored pointers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if a reference dangles.
    pub fn closure(&self, roots: &PointerSet) -> Result<BTreeSet<ObjectId>> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<ObjectId> = Vec::new();
        self.push_targets(roots, &mut pending)?;
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            let pointers = self.object(id)?.pointers();
            self.push_targets(&pointers, &mut pending)?;
        }
        Ok(seen)
    }

    fn push_targets(&self, set: &PointerSet, pending: &mut Vec<ObjectId>) -> Result<()> {
        pending.extend(set.objects());
        for index in set.frames() {
            pending.extend(self.frame_objects(index)?);
        }
        Ok(())
    }

    /// Makes everything reachable from `value` visible to external code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if a reference dangles.
    pub fn expose(&mut self, value: &AbstractValue) -> Result<()> {
        let Some(set) = value.pointers() else {
            return Ok(());
        };
        let reached = self.closure(set)?;
        self.expose_objects(reached)
    }

    /// Makes the given objects visible to external code and flags them as escaped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] for a dead object.
    pub fn expose_objects(&mut self, ids: impl IntoIterator<Item = ObjectId>) -> Result<()> {
        let ids: Vec<ObjectId> = ids.into_iter().collect();
        for id in &ids {
            self.exposed.insert(*id);
        }
        self.mark_escaped(ids)
    }

    /// Objects external code may hold pointers to.
    pub fn exposed(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.exposed.iter().copied()
    }

    /// Flags the allocation sites of `ids` as escaping.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] for a dead object.
    pub fn mark_escaped(&mut self, ids: impl IntoIterator<Item = ObjectId>) -> Result<()> {
        for id in ids {
            if id.index() < self.program.global_count() {
                continue;
            }
            if let Some(site) = self.object(id)?.kind().site() {
                self.escaped.insert(site);
            }
        }
        Ok(())
    }

    /// Allocation sites executed so far.
    pub fn allocated_sites(&self) -> impl Iterator<Item = AllocSite> + '_ {
        self.allocated.iter().copied()
    }

    /// Allocation sites found to escape so far.
    pub fn escaped_sites(&self) -> impl Iterator<Item = AllocSite> + '_ {
        self.escaped.iter().copied()
    }

    // ========================================================================
    // Oracle answers
    // ========================================================================

    /// Turns oracle targets into a pointer set.
    ///
    /// A heap site resolves to every live object of that site plus a summary object for
    /// allocations this context has not seen.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if no frame is live.
    pub fn resolve(&mut self, targets: &[OracleTarget]) -> Result<PointerSet> {
        let mut set = PointerSet::new();
        for target in targets {
            match *target {
                OracleTarget::Global(global) => {
                    set.insert(Address::ObjectRange(ObjectId::of_global(global)));
                }
                OracleTarget::Extern(symbol) => set.insert(Address::ExternRange(symbol)),
                OracleTarget::Func(func) => set.insert(Address::Func(func)),
                OracleTarget::Heap(func, inst) => {
                    let existing: Vec<ObjectId> = self
                        .objects
                        .iter()
                        .filter(|(_, object)| object.kind() == ObjectKind::Heap(func, inst))
                        .map(|(id, _)| *id)
                        .collect();
                    for id in existing {
                        set.insert(Address::ObjectRange(id));
                    }
                    let summary = self.allocate_summary(func, inst)?;
                    set.insert(Address::ObjectRange(summary));
                }
                OracleTarget::Stack(func, slot) => {
                    for frame in self.frames.iter().filter(|frame| frame.func() == func) {
                        if let Some(id) = frame.slot_object(slot) {
                            set.insert(Address::ObjectRange(id));
                        }
                    }
                }
            }
        }
        Ok(set)
    }

    // ========================================================================
    // Lattice operations
    // ========================================================================

    /// Joins `other` into this context. Returns `true` if this context changed.
    ///
    /// A global materialized on one side only is joined with its initial contents, which
    /// is what the other side would read.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the frame stacks differ in depth or in the
    /// activation at some level.
    pub fn merge(&mut self, other: &Self) -> Result<bool> {
        self.combine(other, false)
    }

    /// Widens this context (the previous iterate) by `next`. Returns `true` if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] under the same conditions as
    /// [`HeapContext::merge`].
    pub fn widen_with(&mut self, next: &Self) -> Result<bool> {
        self.combine(next, true)
    }

    fn combine(&mut self, other: &Self, widen: bool) -> Result<bool> {
        if self.frames.len() != other.frames.len() {
            return Err(consistency_error!(
                "merging frame stacks of depth {} and {}",
                self.frames.len(),
                other.frames.len()
            ));
        }
        if let Some((mine, theirs)) = self
            .frames
            .iter()
            .zip(&other.frames)
            .find(|(mine, theirs)| !mine.same_activation(theirs))
        {
            return Err(consistency_error!(
                "merging frame stacks of different activations at depth {}: {} and {}",
                mine.index(),
                mine.func(),
                theirs.func()
            ));
        }

        let before = self.clone();
        let pick = |a: &HeapObject, b: &HeapObject| if widen { a.widen(b) } else { a.join(b) };

        self.frames = self
            .frames
            .iter()
            .zip(&other.frames)
            .map(|(a, b)| if widen { a.widen(b) } else { a.join(b) })
            .collect();

        for (id, theirs) in other.objects.iter() {
            let combined = match self.objects.get(id) {
                Some(mine) => pick(mine, theirs),
                None => match self.initial_global(*id) {
                    Some(initial) => pick(&initial, theirs),
                    None => theirs.clone(),
                },
            };
            self.objects.insert(*id, combined);
        }
        let only_mine: Vec<ObjectId> = self
            .objects
            .keys()
            .filter(|id| !other.objects.contains_key(id))
            .copied()
            .collect();
        for id in only_mine {
            if let Some(initial) = self.initial_global(id) {
                if let Some(mine) = self.objects.get(&id) {
                    let combined = pick(mine, &initial);
                    self.objects.insert(id, combined);
                }
            }
        }

        for (key, id) in other.sites.iter() {
            if !self.sites.contains_key(key) {
                self.sites.insert(key.clone(), *id);
            }
        }
        self.allocated = self.allocated.clone().union(other.allocated.clone());
        self.escaped = self.escaped.clone().union(other.escaped.clone());
        self.exposed = self.exposed.clone().union(other.exposed.clone());

        Ok(*self != before)
    }

    /// Returns `true` if this context is at most `other` in the lattice order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Inconsistent`] if the frame stacks are incompatible.
    pub fn leq(&self, other: &Self) -> Result<bool> {
        let mut joined = other.clone();
        Ok(!joined.merge(self)?)
    }
}

fn rewrite_frame(value: &AbstractValue, depth: FrameIndex, locals: &[ObjectId]) -> AbstractValue {
    match value {
        AbstractValue::Pointer(set) if set.frames().any(|f| f == depth) => {
            AbstractValue::Pointer(set.rewrite_frame(depth, locals))
        }
        AbstractValue::Nullable(set) if set.frames().any(|f| f == depth) => {
            AbstractValue::nullable(set.rewrite_frame(depth, locals))
        }
        _ => value.clone(),
    }
}
