//! Simulated function activations.

use std::sync::Arc;

use imbl::{OrdMap, OrdSet};

use crate::{
    analysis::{AbstractValue, FrameIndex, JoinSemiLattice, ObjectId, PointerSet},
    ir::{BlockId, FuncId, InstId, SlotId},
};

/// The calls that led from the root activation to a frame, outermost first: each caller
/// and the call instruction it entered the next frame through, `None` for an entry not
/// made by a call instruction.
pub type CallChain = Arc<[(FuncId, Option<InstId>)]>;

/// One simulated activation of a function.
///
/// Frames are identified by their depth on the frame stack together with an activation
/// serial that is unique within the run, so two recursive activations of one function never
/// compare equal even when their contents do. The [`CallChain`] is stable instead: it is the
/// same for every activation entered through the same calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    index: FrameIndex,
    activation: u64,
    chain: CallChain,
    func: FuncId,
    args: Vec<AbstractValue>,
    /// Objects allocated by this activation that are still owned by it
    objects: OrdSet<ObjectId>,
    /// Stack slot objects, indexed by slot
    slots: Vec<ObjectId>,
    /// Values computed so far, the per-instruction cache
    values: OrdMap<InstId, AbstractValue>,
    position: Option<BlockId>,
    /// Evaluation-graph nodes whose effect was approximated in this activation
    bypassed: OrdSet<usize>,
}

impl CallFrame {
    /// Creates a frame for an activation of `func`.
    ///
    /// `slots` are the ids of the stack slot objects already allocated for it; they are
    /// owned by the frame.
    #[must_use]
    pub fn new(
        index: FrameIndex,
        activation: u64,
        chain: CallChain,
        func: FuncId,
        args: Vec<AbstractValue>,
        slots: Vec<ObjectId>,
    ) -> Self {
        Self {
            index,
            activation,
            chain,
            func,
            args,
            objects: slots.iter().copied().collect(),
            slots,
            values: OrdMap::new(),
            position: None,
            bypassed: OrdSet::new(),
        }
    }

    /// Depth on the frame stack.
    #[must_use]
    pub const fn index(&self) -> FrameIndex {
        self.index
    }

    /// Activation serial, unique within the run.
    #[must_use]
    pub const fn activation(&self) -> u64 {
        self.activation
    }

    /// The calls this activation was entered through.
    #[must_use]
    pub fn chain(&self) -> &CallChain {
        &self.chain
    }

    /// The function being executed.
    #[must_use]
    pub const fn func(&self) -> FuncId {
        self.func
    }

    /// Argument values in order.
    #[must_use]
    pub fn args(&self) -> &[AbstractValue] {
        &self.args
    }

    /// The `index`th argument, `Top` if the call passed fewer.
    #[must_use]
    pub fn arg(&self, index: usize) -> AbstractValue {
        self.args.get(index).cloned().unwrap_or(AbstractValue::Top)
    }

    /// Object ids owned by this activation.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.iter().copied()
    }

    /// Returns `true` if the activation owns `id`.
    #[must_use]
    pub fn owns(&self, id: ObjectId) -> bool {
        self.objects.contains(&id)
    }

    /// Takes ownership of `id`.
    pub fn adopt(&mut self, id: ObjectId) {
        self.objects.insert(id);
    }

    /// The object of a stack slot.
    #[must_use]
    pub fn slot_object(&self, slot: SlotId) -> Option<ObjectId> {
        self.slots.get(slot.index()).copied()
    }

    /// Every stack slot object, in slot order.
    #[must_use]
    pub fn stack_objects(&self) -> &[ObjectId] {
        &self.slots
    }

    /// Previously computed value of `inst` in this activation.
    #[must_use]
    pub fn find(&self, inst: InstId) -> Option<&AbstractValue> {
        self.values.get(&inst)
    }

    /// Records the value of `inst`.
    pub fn define(&mut self, inst: InstId, value: AbstractValue) {
        self.values.insert(inst, value);
    }

    /// Computed `(instruction, value)` pairs in instruction order.
    pub fn values(&self) -> impl Iterator<Item = (InstId, &AbstractValue)> + '_ {
        self.values.iter().map(|(inst, value)| (*inst, value))
    }

    /// The block being executed.
    #[must_use]
    pub const fn position(&self) -> Option<BlockId> {
        self.position
    }

    /// Moves the activation to `block`.
    pub fn enter_block(&mut self, block: BlockId) {
        self.position = Some(block);
    }

    /// Records that evaluation-graph node `node` was approximated.
    pub fn mark_bypassed(&mut self, node: usize) {
        self.bypassed.insert(node);
    }

    /// Nodes approximated so far, in index order.
    pub fn bypassed(&self) -> impl Iterator<Item = usize> + '_ {
        self.bypassed.iter().copied()
    }

    /// Pointer sets held by the arguments and computed values.
    #[must_use]
    pub fn pointers(&self) -> PointerSet {
        self.args
            .iter()
            .chain(self.values.iter().map(|(_, value)| value))
            .filter_map(AbstractValue::pointers)
            .fold(PointerSet::new(), |acc, set| acc.join(set))
    }

    /// Applies `f` to every argument and computed value.
    pub fn map_values(&mut self, mut f: impl FnMut(&AbstractValue) -> AbstractValue) {
        for arg in &mut self.args {
            *arg = f(arg);
        }
        let mapped: Vec<(InstId, AbstractValue)> =
            self.values.iter().map(|(inst, value)| (*inst, f(value))).collect();
        for (inst, value) in mapped {
            self.values.insert(inst, value);
        }
    }

    /// Returns `true` if `other` is a state of the same activation.
    #[must_use]
    pub fn same_activation(&self, other: &Self) -> bool {
        self.index == other.index && self.func == other.func && self.activation == other.activation
    }

    /// Joins another state of the same activation into this one.
    ///
    /// Values missing on one side were not computed on that path and count as `Bottom`.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        self.combine(other, AbstractValue::join)
    }

    /// Widens this state by a later state of the same activation.
    #[must_use]
    pub fn widen(&self, next: &Self) -> Self {
        self.combine(next, AbstractValue::widen)
    }

    fn combine(
        &self,
        other: &Self,
        f: impl Fn(&AbstractValue, &AbstractValue) -> AbstractValue,
    ) -> Self {
        let mut joined = self.clone();
        joined.args = self
            .args
            .iter()
            .zip(&other.args)
            .map(|(a, b)| f(a, b))
            .collect();
        for (inst, value) in other.values.iter() {
            let merged = match self.values.get(inst) {
                Some(mine) => f(mine, value),
                None => f(&AbstractValue::Bottom, value),
            };
            joined.values.insert(*inst, merged);
        }
        joined.objects = self.objects.clone().union(other.objects.clone());
        joined.bypassed = self.bypassed.clone().union(other.bypassed.clone());
        if self.position != other.position {
            joined.position = None;
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> CallFrame {
        CallFrame::new(
            0,
            1,
            Arc::from(Vec::new()),
            FuncId::new(0),
            vec![AbstractValue::Integer(1)],
            vec![ObjectId(4)],
        )
    }

    #[test]
    fn test_find_values_and_position() {
        let mut frame = frame();
        assert!(frame.find(InstId::new(0)).is_none());
        frame.define(InstId::new(0), AbstractValue::Integer(9));
        assert_eq!(frame.find(InstId::new(0)), Some(&AbstractValue::Integer(9)));

        frame.enter_block(BlockId::new(1));
        assert_eq!(frame.position(), Some(BlockId::new(1)));
    }

    #[test]
    fn test_slots_are_owned() {
        let frame = frame();
        assert!(frame.owns(ObjectId(4)));
        assert_eq!(frame.slot_object(SlotId::new(0)), Some(ObjectId(4)));
        assert_eq!(frame.arg(3), AbstractValue::Top);
    }

    #[test]
    fn test_join_unions_values() {
        let mut a = frame();
        let mut b = frame();
        a.define(InstId::new(0), AbstractValue::Integer(1));
        b.define(InstId::new(0), AbstractValue::Integer(2));
        b.define(InstId::new(1), AbstractValue::Integer(5));
        b.adopt(ObjectId(9));

        let joined = a.join(&b);
        assert_eq!(
            joined.find(InstId::new(0)),
            Some(&AbstractValue::range(Some(1), Some(2)))
        );
        assert_eq!(joined.find(InstId::new(1)), Some(&AbstractValue::Integer(5)));
        assert!(joined.owns(ObjectId(9)));
        assert!(joined.same_activation(&a));
    }

    #[test]
    fn test_join_unions_bypassed_nodes() {
        let mut a = frame();
        let mut b = frame();
        a.mark_bypassed(2);
        b.mark_bypassed(0);
        b.mark_bypassed(2);
        assert_eq!(a.join(&b).bypassed().collect::<Vec<_>>(), vec![0, 2]);
    }
}
