//! Functions, blocks and instructions.

use crate::{
    ir::{BlockId, FuncId, InstId, Op, SlotId, Type},
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
};

/// One instruction: an operation and the type of the value it defines.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    /// Operation performed
    pub op: Op,
    /// Result type, `None` for instructions without a result
    pub ty: Option<Type>,
}

/// A basic block: instruction ids in execution order. The last one is the terminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    insts: Vec<InstId>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instructions in execution order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// The terminating instruction, if the block has one yet.
    #[must_use]
    pub fn terminator(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    pub(crate) fn push(&mut self, inst: InstId) {
        self.insts.push(inst);
    }
}

/// A fixed-size stack allocation of a function, materialized as an object per activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    /// Size in bytes
    pub size: u64,
    /// Alignment in bytes
    pub align: u32,
}

/// A function of the program in SSA form.
///
/// Blocks and instructions live in per-function arenas addressed by [`BlockId`] and
/// [`InstId`]. Block 0 is the entry block. The function implements the graph traits over its
/// blocks so the generic SCC and traversal algorithms can run on it directly.
#[derive(Debug, Clone)]
pub struct Function {
    id: FuncId,
    name: String,
    params: Vec<Type>,
    ret: Option<Type>,
    slots: Vec<StackSlot>,
    blocks: Vec<Block>,
    insts: Vec<Inst>,
    /// Cached successor lists, indexed by block
    succs: Vec<Vec<BlockId>>,
    /// Cached predecessor lists, indexed by block
    preds: Vec<Vec<BlockId>>,
}

impl Function {
    pub(crate) fn new(id: FuncId, name: String, params: Vec<Type>, ret: Option<Type>) -> Self {
        Self {
            id,
            name,
            params,
            ret,
            slots: Vec::new(),
            blocks: Vec::new(),
            insts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        }
    }

    /// The id of this function within its program.
    #[must_use]
    pub fn id(&self) -> FuncId {
        self.id
    }

    /// Symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter types in order.
    #[must_use]
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Return type, `None` for functions returning nothing.
    #[must_use]
    pub fn ret(&self) -> Option<Type> {
        self.ret
    }

    /// Stack slots allocated on every activation.
    #[must_use]
    pub fn slots(&self) -> &[StackSlot] {
        &self.slots
    }

    /// Returns a stack slot by id.
    #[must_use]
    pub fn slot(&self, slot: SlotId) -> Option<&StackSlot> {
        self.slots.get(slot.index())
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns a block by id.
    #[must_use]
    pub fn block(&self, block: BlockId) -> Option<&Block> {
        self.blocks.get(block.index())
    }

    /// Iterates over `(id, block)` pairs in id order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (BlockId::new(i), block))
    }

    /// Returns an instruction by id.
    #[must_use]
    pub fn inst(&self, inst: InstId) -> Option<&Inst> {
        self.insts.get(inst.index())
    }

    /// Number of instructions.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Iterates over `(id, instruction)` pairs in id order.
    pub fn insts(&self) -> impl Iterator<Item = (InstId, &Inst)> + '_ {
        self.insts
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstId::new(i), inst))
    }

    /// Successor blocks of `block`, empty for unknown blocks.
    #[must_use]
    pub fn block_successors(&self, block: BlockId) -> &[BlockId] {
        self.succs.get(block.index()).map_or(&[], Vec::as_slice)
    }

    /// Predecessor blocks of `block`, empty for unknown blocks.
    #[must_use]
    pub fn block_predecessors(&self, block: BlockId) -> &[BlockId] {
        self.preds.get(block.index()).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn add_slot(&mut self, slot: StackSlot) -> SlotId {
        self.slots.push(slot);
        SlotId::new(self.slots.len() - 1)
    }

    pub(crate) fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block::new());
        BlockId::new(self.blocks.len() - 1)
    }

    pub(crate) fn add_inst(&mut self, inst: Inst) -> InstId {
        self.insts.push(inst);
        InstId::new(self.insts.len() - 1)
    }

    pub(crate) fn block_mut(&mut self, block: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(block.index())
    }

    pub(crate) fn inst_mut(&mut self, inst: InstId) -> Option<&mut Inst> {
        self.insts.get_mut(inst.index())
    }

    /// Recomputes the cached edge lists from the block terminators.
    pub(crate) fn rebuild_edges(&mut self) {
        let count = self.blocks.len();
        self.succs = vec![Vec::new(); count];
        self.preds = vec![Vec::new(); count];
        for (index, block) in self.blocks.iter().enumerate() {
            let Some(term) = block.terminator().and_then(|t| self.insts.get(t.index())) else {
                continue;
            };
            for succ in term.op.successors() {
                if succ.index() < count {
                    self.succs[index].push(succ);
                    self.preds[succ.index()].push(BlockId::new(index));
                }
            }
        }
    }
}

impl GraphBase for Function {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Successors for Function {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.block_successors(BlockId::new(node.index()))
            .iter()
            .map(|b| NodeId::new(b.index()))
    }
}

impl Predecessors for Function {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.block_predecessors(BlockId::new(node.index()))
            .iter()
            .map(|b| NodeId::new(b.index()))
    }
}

impl RootedGraph for Function {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}
