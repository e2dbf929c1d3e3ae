//! The evaluation graph: a function's blocks collapsed into SCC nodes.
//!
//! Loops present as single cyclic nodes with explicit entry blocks and exit edges; acyclic
//! nodes hold one block. Nodes are stored in topological order, so a forward walk over them
//! sees every node after all of its predecessors.
//!
//! Each node also carries its static [`RegionEffects`], computed once per function. The
//! approximator relies on them to leave objects a region cannot touch unchanged.

use std::collections::BTreeSet;

use bitflags::bitflags;

use crate::{
    ir::{BlockId, Callee, FuncId, Function, InstId, Op, Type},
    utils::{
        graph::{algorithms::{is_cyclic, strongly_connected_components}, NodeId},
        BitSet,
    },
};

bitflags! {
    /// Kinds of values a region may store to memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StoredKinds: u8 {
        /// Integers of any width
        const INT = 0x01;
        /// Floats
        const FLOAT = 0x02;
        /// Pointers
        const PTR = 0x04;
    }
}

/// Memory-relevant behavior of a set of instructions, known without evaluating them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionEffects {
    /// The region contains a store
    pub stores: bool,
    /// Types of the stored values
    pub stored: StoredKinds,
    /// Calls an external symbol or through a pointer
    pub calls_out: bool,
    /// Functions called directly
    pub callees: BTreeSet<FuncId>,
    /// Heap allocation sites
    pub allocs: Vec<InstId>,
}

impl RegionEffects {
    fn record(&mut self, function: &Function, inst: InstId, op: &Op) {
        match op {
            Op::Store { value, .. } => {
                self.stores = true;
                self.stored |= stored_kind(function, *value);
            }
            Op::Call { callee, .. } => match callee {
                Callee::Direct(func) => {
                    self.callees.insert(*func);
                }
                Callee::Extern(_) | Callee::Indirect(_) => self.calls_out = true,
            },
            Op::Alloc { .. } => self.allocs.push(inst),
            _ => {}
        }
    }
}

fn stored_kind(function: &Function, value: InstId) -> StoredKinds {
    match function.inst(value).and_then(|inst| inst.ty) {
        Some(Type::Ptr) => StoredKinds::PTR,
        Some(Type::F64) => StoredKinds::FLOAT,
        Some(_) => StoredKinds::INT,
        None => StoredKinds::all(),
    }
}

/// One SCC node of the evaluation graph.
#[derive(Debug, Clone)]
pub struct EvalNode {
    index: usize,
    blocks: Vec<BlockId>,
    members: BitSet,
    cyclic: bool,
    entries: Vec<BlockId>,
    exits: Vec<(BlockId, BlockId)>,
    insts: Vec<InstId>,
    defined: BitSet,
    returns: bool,
    effects: RegionEffects,
}

impl EvalNode {
    /// Position of the node in the graph.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Member blocks in id order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Returns `true` if `block` belongs to the node.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.members.contains(block.index())
    }

    /// Returns `true` for loops.
    #[must_use]
    pub const fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Blocks entered from outside the node, or the function entry.
    #[must_use]
    pub fn entries(&self) -> &[BlockId] {
        &self.entries
    }

    /// Edges `(from, to)` leaving the node.
    #[must_use]
    pub fn exits(&self) -> &[(BlockId, BlockId)] {
        &self.exits
    }

    /// Instructions of the member blocks, block by block.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// Returns `true` if `inst` is defined inside the node.
    #[must_use]
    pub fn defines(&self, inst: InstId) -> bool {
        self.defined.contains(inst.index())
    }

    /// Returns `true` if a member block returns from the function.
    #[must_use]
    pub const fn returns(&self) -> bool {
        self.returns
    }

    /// Static effects of the member blocks.
    #[must_use]
    pub fn effects(&self) -> &RegionEffects {
        &self.effects
    }
}

/// The SCC-collapsed control-flow graph of one function.
#[derive(Debug, Clone)]
pub struct EvalGraph {
    func: FuncId,
    nodes: Vec<EvalNode>,
    node_of: Vec<usize>,
}

impl EvalGraph {
    /// Builds the graph of `function`.
    #[must_use]
    pub fn build(function: &Function) -> Self {
        let block_count = function.block_count();
        let mut sccs = strongly_connected_components(function);
        // Tarjan emits components sinks first.
        sccs.reverse();

        let mut node_of = vec![0; block_count];
        for (index, scc) in sccs.iter().enumerate() {
            for block in scc {
                node_of[block.index()] = index;
            }
        }

        let nodes = sccs
            .iter()
            .enumerate()
            .map(|(index, scc)| build_node(function, index, scc, &node_of))
            .collect();

        Self {
            func: function.id(),
            nodes,
            node_of,
        }
    }

    /// The function this graph belongs to.
    #[must_use]
    pub const fn func(&self) -> FuncId {
        self.func
    }

    /// Nodes in topological order.
    #[must_use]
    pub fn nodes(&self) -> &[EvalNode] {
        &self.nodes
    }

    /// Returns a node by index.
    #[must_use]
    pub fn node(&self, index: usize) -> Option<&EvalNode> {
        self.nodes.get(index)
    }

    /// Index of the node containing `block`.
    #[must_use]
    pub fn node_of(&self, block: BlockId) -> Option<usize> {
        self.node_of.get(block.index()).copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` for a function without blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn build_node(function: &Function, index: usize, scc: &[NodeId], node_of: &[usize]) -> EvalNode {
    let mut members = BitSet::new(function.block_count());
    let blocks: Vec<BlockId> = scc.iter().map(|n| BlockId::new(n.index())).collect();
    for block in &blocks {
        members.insert(block.index());
    }

    let entries = blocks
        .iter()
        .copied()
        .filter(|&block| {
            block.index() == 0
                || function
                    .block_predecessors(block)
                    .iter()
                    .any(|pred| node_of[pred.index()] != index)
        })
        .collect();

    let exits = blocks
        .iter()
        .flat_map(|&block| {
            function
                .block_successors(block)
                .iter()
                .filter(|succ| node_of[succ.index()] != index)
                .map(move |&succ| (block, succ))
        })
        .collect();

    let mut insts = Vec::new();
    let mut defined = BitSet::new(function.inst_count());
    let mut effects = RegionEffects::default();
    let mut returns = false;
    for block in &blocks {
        let Some(data) = function.block(*block) else {
            continue;
        };
        for &inst in data.insts() {
            insts.push(inst);
            defined.insert(inst.index());
            if let Some(op) = function.inst(inst).map(|i| &i.op) {
                effects.record(function, inst, op);
                returns |= matches!(op, Op::Return { .. });
            }
        }
    }

    EvalNode {
        index,
        cyclic: is_cyclic(function, scc),
        blocks,
        members,
        entries,
        exits,
        insts,
        defined,
        returns,
        effects,
    }
}
