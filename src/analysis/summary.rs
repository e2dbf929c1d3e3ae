//! What an analysis produces for its consumers.
//!
//! - [`FunctionSummary`] - the objects reachable when a function returns, per argument shape
//! - [`InstValues`] - the joined value of every evaluated instruction, for constant folding
//! - [`EscapeInfo`] - whether each allocation site outlives its defining frame
//! - [`Analysis`] - all of the above for one root function, plus node reports and counters

use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

use crate::{
    analysis::{
        driver::{EvalStats, NodeState},
        AbstractValue, Address, AllocSite, HeapObject, JoinSemiLattice, ObjectId, PointerSet,
    },
    ir::{FuncId, InstId, Type},
};

/// The state in which a function returns, for one argument shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSummary {
    func: FuncId,
    args: Vec<AbstractValue>,
    return_value: AbstractValue,
    objects: BTreeMap<ObjectId, HeapObject>,
    /// Nodes of the function approximated on some path to the return
    bypassed: BTreeSet<usize>,
}

impl FunctionSummary {
    /// Creates a summary from the objects reachable at return.
    #[must_use]
    pub fn new(
        func: FuncId,
        args: Vec<AbstractValue>,
        return_value: AbstractValue,
        objects: BTreeMap<ObjectId, HeapObject>,
    ) -> Self {
        Self {
            func,
            args,
            return_value,
            objects,
            bypassed: BTreeSet::new(),
        }
    }

    /// Records the evaluation-graph nodes that were approximated rather than simulated.
    #[must_use]
    pub fn with_bypassed(mut self, nodes: impl IntoIterator<Item = usize>) -> Self {
        self.bypassed.extend(nodes);
        self
    }

    /// Nodes of the function approximated on some path to the return. Empty when every
    /// node on the way was simulated.
    #[must_use]
    pub fn bypassed_nodes(&self) -> &BTreeSet<usize> {
        &self.bypassed
    }

    /// The summarized function.
    #[must_use]
    pub const fn func(&self) -> FuncId {
        self.func
    }

    /// Argument values the function was analyzed under.
    #[must_use]
    pub fn args(&self) -> &[AbstractValue] {
        &self.args
    }

    /// Join of every value the function may return. `Bottom` if it returns no value.
    #[must_use]
    pub fn return_value(&self) -> &AbstractValue {
        &self.return_value
    }

    /// Objects reachable from the return value, the arguments and the globals at return.
    #[must_use]
    pub fn objects(&self) -> &BTreeMap<ObjectId, HeapObject> {
        &self.objects
    }

    /// One object of the summary.
    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(&id)
    }

    /// Loads a value of type `ty` through `addr` in the returned state.
    ///
    /// Addresses outside the summary load as `Top`.
    #[must_use]
    pub fn load(&self, addr: &AbstractValue, ty: Type) -> AbstractValue {
        match addr {
            AbstractValue::Bottom => AbstractValue::Bottom,
            AbstractValue::Pointer(set) | AbstractValue::Nullable(set) => self.load_from(set, ty),
            _ => AbstractValue::Top,
        }
    }

    fn load_from(&self, set: &PointerSet, ty: Type) -> AbstractValue {
        let mut value = AbstractValue::Bottom;
        for address in set.iter() {
            let loaded = match address {
                Address::Object { id, offset } => self
                    .objects
                    .get(&id)
                    .map_or(AbstractValue::Top, |object| object.load(offset, ty.size())),
                Address::ObjectRange(id) => self
                    .objects
                    .get(&id)
                    .map_or(AbstractValue::Top, HeapObject::load_any),
                _ => AbstractValue::Top,
            };
            value.join_assign(&loaded.reinterpret(ty));
        }
        value
    }

    /// Joins another summary of the same function and arguments into this one.
    pub fn absorb(&mut self, other: &Self) {
        self.return_value.join_assign(&other.return_value);
        self.bypassed.extend(other.bypassed.iter().copied());
        for (id, theirs) in &other.objects {
            match self.objects.entry(*id) {
                Entry::Occupied(mut mine) => {
                    let joined = mine.get().join(theirs);
                    mine.insert(joined);
                }
                Entry::Vacant(slot) => {
                    slot.insert(theirs.clone());
                }
            }
        }
    }
}

/// Summaries keyed by function and argument shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    summaries: Vec<FunctionSummary>,
}

impl SummaryTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a summary, joining it with an existing one for the same function and arguments.
    pub fn insert(&mut self, summary: FunctionSummary) {
        match self
            .summaries
            .iter_mut()
            .find(|known| known.func == summary.func && known.args == summary.args)
        {
            Some(known) => known.absorb(&summary),
            None => self.summaries.push(summary),
        }
    }

    /// Every summary of `func`.
    pub fn of(&self, func: FuncId) -> impl Iterator<Item = &FunctionSummary> + '_ {
        self.summaries.iter().filter(move |summary| summary.func == func)
    }

    /// The summary of `func` under exactly `args`.
    #[must_use]
    pub fn get(&self, func: FuncId, args: &[AbstractValue]) -> Option<&FunctionSummary> {
        self.summaries
            .iter()
            .find(|summary| summary.func == func && summary.args == args)
    }

    /// All summaries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionSummary> + '_ {
        self.summaries.iter()
    }

    /// Number of summaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    /// Returns `true` if no summary was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Joined value of every instruction evaluated, over every activation.
///
/// An instruction without an entry was never reached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstValues {
    values: BTreeMap<(FuncId, InstId), AbstractValue>,
}

impl InstValues {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `value` into the entry of `inst` in `func`.
    pub fn record(&mut self, func: FuncId, inst: InstId, value: &AbstractValue) {
        self.values
            .entry((func, inst))
            .and_modify(|known| {
                known.join_assign(value);
            })
            .or_insert_with(|| value.clone());
    }

    /// Value of `inst` in `func`, if it was ever evaluated.
    #[must_use]
    pub fn get(&self, func: FuncId, inst: InstId) -> Option<&AbstractValue> {
        self.values.get(&(func, inst))
    }

    /// Entries in `(function, instruction)` order.
    pub fn iter(&self) -> impl Iterator<Item = (FuncId, InstId, &AbstractValue)> + '_ {
        self.values
            .iter()
            .map(|((func, inst), value)| (*func, *inst, value))
    }

    /// Values of `func`'s instructions.
    pub fn of(&self, func: FuncId) -> impl Iterator<Item = (InstId, &AbstractValue)> + '_ {
        self.values
            .range((func, InstId::new(0))..)
            .take_while(move |((f, _), _)| *f == func)
            .map(|((_, inst), value)| (*inst, value))
    }

    /// Joins every entry of `other` into this table.
    pub fn union_with(&mut self, other: &Self) {
        for (func, inst, value) in other.iter() {
            self.record(func, inst, value);
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no instruction was evaluated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Escape flags per allocation site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscapeInfo {
    escaped: BTreeSet<AllocSite>,
    seen: BTreeSet<AllocSite>,
}

impl EscapeInfo {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records executed sites and sites found to escape.
    pub fn record(
        &mut self,
        seen: impl IntoIterator<Item = AllocSite>,
        escaped: impl IntoIterator<Item = AllocSite>,
    ) {
        self.seen.extend(seen);
        for site in escaped {
            self.seen.insert(site);
            self.escaped.insert(site);
        }
    }

    /// Whether `site` may outlive its defining frame. `None` if the site was never executed.
    #[must_use]
    pub fn escapes(&self, site: AllocSite) -> Option<bool> {
        self.seen
            .contains(&site)
            .then(|| self.escaped.contains(&site))
    }

    /// Sites that may escape.
    pub fn escaped(&self) -> impl Iterator<Item = AllocSite> + '_ {
        self.escaped.iter().copied()
    }

    /// Every executed site.
    pub fn sites(&self) -> impl Iterator<Item = AllocSite> + '_ {
        self.seen.iter().copied()
    }

    /// Merges another record, taking the union of both flags.
    pub fn union_with(&mut self, other: &Self) {
        self.record(other.sites(), other.escaped());
    }
}

/// Everything one analysis of a root function produced.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub(crate) root: FuncId,
    pub(crate) summaries: SummaryTable,
    pub(crate) values: InstValues,
    pub(crate) escapes: EscapeInfo,
    pub(crate) nodes: Vec<NodeState>,
    pub(crate) stats: EvalStats,
    pub(crate) failed: BTreeSet<FuncId>,
}

impl Analysis {
    /// An analysis that produced nothing for `root`.
    #[must_use]
    pub fn empty(root: FuncId) -> Self {
        Self {
            root,
            summaries: SummaryTable::new(),
            values: InstValues::new(),
            escapes: EscapeInfo::new(),
            nodes: Vec::new(),
            stats: EvalStats::default(),
            failed: BTreeSet::new(),
        }
    }

    /// The analyzed root function.
    #[must_use]
    pub const fn root(&self) -> FuncId {
        self.root
    }

    /// Summary of the root activation. `None` if the root never returns or its analysis
    /// failed.
    #[must_use]
    pub fn root_summary(&self) -> Option<&FunctionSummary> {
        self.summaries.of(self.root).next()
    }

    /// Summaries of every function activation evaluated.
    #[must_use]
    pub fn summaries(&self) -> &SummaryTable {
        &self.summaries
    }

    /// Per-instruction values.
    #[must_use]
    pub fn values(&self) -> &InstValues {
        &self.values
    }

    /// Escape flags.
    #[must_use]
    pub fn escapes(&self) -> &EscapeInfo {
        &self.escapes
    }

    /// Final state of every evaluation-graph node of the root activation.
    #[must_use]
    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    /// Counters of the run.
    #[must_use]
    pub const fn stats(&self) -> &EvalStats {
        &self.stats
    }

    /// Functions whose evaluation hit an internal consistency violation.
    #[must_use]
    pub fn failed(&self) -> &BTreeSet<FuncId> {
        &self.failed
    }

    /// Returns `true` if the root function itself failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.contains(&self.root)
    }
}
