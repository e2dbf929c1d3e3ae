//! The evaluation driver.
//!
//! [`Evaluator`] simulates a function over the abstract machine of [`HeapContext`]. Each
//! function body is walked as its [`EvalGraph`]: nodes in topological order, each node
//! entered with the join of the states flowing into it. Every node moves through a small
//! state machine:
//!
//! ```text
//! Unvisited --> InProgress --> Converged
//!     |             |
//!     |             +--------> Bypassed
//!     +----------------------> Bypassed
//! ```
//!
//! - An acyclic node is evaluated once and converges, unless the budget is gone, in which
//!   case it is bypassed.
//! - A loop node is iterated pass by pass over its blocks in reverse postorder, joining states
//!   on internal edges and widening back edges after `widen_after` passes. A pass that changes
//!   no block entry state means the node converged, and its exits are taken from that pass.
//!   Hitting the iteration cap or running out of budget bypasses the node: the approximator
//!   applies its effect in one step and every static exit edge becomes executable.
//!
//! Nodes nothing flows into stay `Unvisited`.
//!
//! # Calls
//!
//! Direct calls push a frame and evaluate the callee in place, as long as the call depth and
//! the budget allow it; otherwise the callee's reference summary bounds its effect. Indirect
//! calls evaluate every candidate on a fork of the context and join the results. External
//! calls are opaque.
//!
//! # Failures
//!
//! Expected imprecision never fails. An internal consistency violation inside a callee marks
//! the callee as failed, logs it, and turns the call into an opaque call. A violation in
//! the root discards the whole result.

use std::{
    collections::{hash_map::Entry, BTreeMap, BTreeSet},
    mem,
    sync::Arc,
};

use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use strum::Display;

use crate::{
    analysis::{
        approx::{approximate_region, fixed_value, opaque_call, summarized_call},
        budget::AnalysisBudget,
        config::{EvalConfig, MAX_SUPPORTED_CALL_DEPTH},
        flow::{EvalGraph, EvalNode},
        oracle::{OracleTarget, PointsToOracle},
        refs::ProgramRefs,
        rules,
        summary::{Analysis, EscapeInfo, FunctionSummary, InstValues, SummaryTable},
        AbstractValue, Address, HeapContext, JoinSemiLattice, PointerSet,
    },
    ir::{BlockId, Callee, FuncId, Function, InstId, Op, Program, Type},
    utils::graph::{algorithms::reverse_postorder_within, NodeId},
    Error, Result,
};

/// State of one evaluation-graph node within one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum NodeState {
    /// Nothing flowed into the node yet
    Unvisited,
    /// The node is being evaluated
    InProgress,
    /// Evaluated to a fixpoint
    Converged,
    /// Its effect was approximated instead of simulated
    Bypassed,
}

impl NodeState {
    /// Returns `true` for [`NodeState::Converged`] and [`NodeState::Bypassed`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, NodeState::Converged | NodeState::Bypassed)
    }
}

/// Counters of one analysis run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Nodes entered, over every activation
    pub nodes_visited: u64,
    /// Nodes that reached a fixpoint
    pub nodes_converged: u64,
    /// Nodes whose effect was approximated
    pub nodes_bypassed: u64,
    /// Frames pushed, the root included
    pub frames_pushed: u64,
    /// Calls approximated instead of entered
    pub calls_approximated: u64,
    /// Calls answered from the call memo
    pub memo_hits: u64,
    /// Whether the budget ran out
    pub budget_exhausted: bool,
}

impl EvalStats {
    /// Adds the counters of another run.
    pub fn absorb(&mut self, other: &Self) {
        self.nodes_visited += other.nodes_visited;
        self.nodes_converged += other.nodes_converged;
        self.nodes_bypassed += other.nodes_bypassed;
        self.frames_pushed += other.frames_pushed;
        self.calls_approximated += other.calls_approximated;
        self.memo_hits += other.memo_hits;
        self.budget_exhausted |= other.budget_exhausted;
    }
}

/// Per-program facts computed once and shared by every evaluator of the program.
#[derive(Debug, Clone)]
pub struct ProgramFacts {
    refs: ProgramRefs,
    graphs: Vec<EvalGraph>,
}

impl ProgramFacts {
    /// Computes the reference summaries and evaluation graphs of every function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if the call graph cannot be built.
    pub fn compute(program: &Program) -> Result<Self> {
        Ok(Self {
            refs: ProgramRefs::compute(program)?,
            graphs: program.funcs().map(EvalGraph::build).collect(),
        })
    }

    /// Transitive reference summaries.
    #[must_use]
    pub fn refs(&self) -> &ProgramRefs {
        &self.refs
    }

    /// Evaluation graph of `func`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFunction`] for a function outside the program.
    pub fn graph(&self, func: FuncId) -> Result<&EvalGraph> {
        self.graphs
            .get(func.index())
            .ok_or(Error::UnknownFunction(func))
    }

    /// Number of functions covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Returns `true` for an empty program.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

/// A previous evaluation of a call: the context it started from and how it returned.
#[derive(Debug)]
struct MemoEntry<'p> {
    input: HeapContext<'p>,
    output: Option<(HeapContext<'p>, AbstractValue)>,
}

/// How control leaves a block.
enum Outcome {
    /// To these successors
    Next(Vec<BlockId>),
    /// Out of the function with a value
    Return(AbstractValue),
    /// Nowhere
    Dead,
}

/// The result of evaluating one node.
struct NodeRun<'p> {
    state: NodeState,
    edges: Vec<(BlockId, HeapContext<'p>)>,
    returns: Vec<(HeapContext<'p>, AbstractValue)>,
}

impl NodeRun<'_> {
    fn new(state: NodeState) -> Self {
        Self {
            state,
            edges: Vec::new(),
            returns: Vec::new(),
        }
    }
}

/// The result of evaluating a function body.
struct Body<'p> {
    exit: Option<(HeapContext<'p>, AbstractValue)>,
    nodes: Vec<NodeState>,
}

/// The abstract interpreter.
///
/// One evaluator analyzes one program. Its budget spans every [`Evaluator::analyze`] call;
/// call memos and outputs are reset per call.
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::prelude::*;
///
/// let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default())?;
/// let analysis = evaluator.analyze(main, vec![])?;
/// if let Some(summary) = analysis.root_summary() {
///     println!("main returns {}", summary.return_value());
/// }
/// ```
pub struct Evaluator<'p, 'o> {
    program: &'p Program,
    oracle: &'o dyn PointsToOracle,
    config: EvalConfig,
    facts: Arc<ProgramFacts>,
    budget: AnalysisBudget,
    memo: FxHashMap<(FuncId, Vec<AbstractValue>), Vec<MemoEntry<'p>>>,
    failed: BTreeSet<FuncId>,
    summaries: SummaryTable,
    values: InstValues,
    escapes: EscapeInfo,
    stats: EvalStats,
}

impl<'p, 'o> Evaluator<'p, 'o> {
    /// Creates an evaluator, computing the program facts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] or [`Error::RecursionLimit`] if the configuration or
    /// the oracle is rejected.
    pub fn new(
        program: &'p Program,
        oracle: &'o dyn PointsToOracle,
        config: EvalConfig,
    ) -> Result<Self> {
        config.validate()?;
        let facts = Arc::new(ProgramFacts::compute(program)?);
        Self::with_facts(program, oracle, config, facts)
    }

    /// Creates an evaluator sharing precomputed program facts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration or the oracle is rejected, or if
    /// the facts were computed for a different program.
    pub fn with_facts(
        program: &'p Program,
        oracle: &'o dyn PointsToOracle,
        config: EvalConfig,
        facts: Arc<ProgramFacts>,
    ) -> Result<Self> {
        config.validate()?;
        oracle.validate(program)?;
        if facts.len() != program.func_count() {
            return Err(Error::InvalidConfig(format!(
                "program facts cover {} functions, the program has {}",
                facts.len(),
                program.func_count()
            )));
        }
        let budget = AnalysisBudget::new(config.step_budget, config.time_budget);
        Ok(Self {
            program,
            oracle,
            config,
            facts,
            budget,
            memo: FxHashMap::default(),
            failed: BTreeSet::new(),
            summaries: SummaryTable::new(),
            values: InstValues::new(),
            escapes: EscapeInfo::new(),
            stats: EvalStats::default(),
        })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// The budget of this evaluator. Exhausting it from another thread makes running
    /// analyses finish conservatively.
    #[must_use]
    pub fn budget(&self) -> &AnalysisBudget {
        &self.budget
    }

    /// Functions found to violate internal consistency so far.
    #[must_use]
    pub fn failed(&self) -> &BTreeSet<FuncId> {
        &self.failed
    }

    /// Analyzes `root` called with `args`.
    ///
    /// An internal consistency violation in `root` does not fail the call: it is logged and
    /// the returned analysis has no summaries and lists `root` as failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFunction`] if `root` is not a function of the program.
    pub fn analyze(&mut self, root: FuncId, args: Vec<AbstractValue>) -> Result<Analysis> {
        let function = self.program.func(root)?;
        self.memo.clear();
        self.summaries = SummaryTable::new();
        self.values = InstValues::new();
        self.escapes = EscapeInfo::new();
        self.stats = EvalStats::default();

        let mut ctx = HeapContext::new(self.program, self.config.max_tracked_offsets)?;
        let nodes = match self.call_function(&mut ctx, None, root, args) {
            Ok((_, nodes)) => nodes,
            Err(err @ Error::Inconsistent { .. }) => {
                warn!("discarding the analysis of {}: {err}", function.name());
                self.failed.insert(root);
                let mut analysis = Analysis::empty(root);
                analysis.stats = self.stats;
                analysis.stats.budget_exhausted = self.budget.is_exhausted();
                analysis.failed = self.failed.clone();
                return Ok(analysis);
            }
            Err(err) => return Err(err),
        };

        self.stats.budget_exhausted = self.budget.is_exhausted();
        debug!(
            "analyzed {}: {} nodes visited, {} bypassed, {} frames, {} calls approximated",
            function.name(),
            self.stats.nodes_visited,
            self.stats.nodes_bypassed,
            self.stats.frames_pushed,
            self.stats.calls_approximated
        );
        Ok(Analysis {
            root,
            summaries: mem::take(&mut self.summaries),
            values: mem::take(&mut self.values),
            escapes: mem::take(&mut self.escapes),
            nodes,
            stats: self.stats,
            failed: self.failed.clone(),
        })
    }

    // ========================================================================
    // Activations
    // ========================================================================

    /// Pushes a frame for `func`, entered through call instruction `call` of the active
    /// frame, evaluates its body and pops the frame again. Returns the return value, `None`
    /// if the function never returns, and the node states.
    fn call_function(
        &mut self,
        ctx: &mut HeapContext<'p>,
        call: Option<InstId>,
        func: FuncId,
        args: Vec<AbstractValue>,
    ) -> Result<(Option<AbstractValue>, Vec<NodeState>)> {
        if ctx.depth() >= MAX_SUPPORTED_CALL_DEPTH {
            return Err(Error::RecursionLimit(ctx.depth()));
        }
        let program = self.program;
        let function = program.func(func)?;
        let facts = Arc::clone(&self.facts);
        let graph = facts.graph(func)?;

        ctx.enter_call(call, func, args.clone())?;
        self.stats.frames_pushed += 1;
        trace!(
            "evaluating {} at depth {}{}",
            function.name(),
            ctx.depth(),
            if call.is_none() { " as root" } else { "" }
        );

        let body = self.run_body(ctx.clone(), function, graph)?;
        let Some((state, ret)) = body.exit else {
            trace!("{} never returns", function.name());
            return Ok((None, body.nodes));
        };

        *ctx = state;
        let (ret, frame) = ctx.leave_frame(ret)?;
        self.note_sites(ctx);
        let summary = self
            .summarize(ctx, func, args, &ret)?
            .with_bypassed(frame.bypassed());
        self.summaries.insert(summary);
        Ok((Some(ret), body.nodes))
    }

    /// The objects reachable from `ret`, `args` and the touched globals.
    fn summarize(
        &self,
        ctx: &HeapContext<'p>,
        func: FuncId,
        args: Vec<AbstractValue>,
        ret: &AbstractValue,
    ) -> Result<FunctionSummary> {
        let mut roots = ret.pointers().cloned().unwrap_or_default();
        for arg in &args {
            if let Some(set) = arg.pointers() {
                roots = roots.join(set);
            }
        }
        let globals = self.program.global_count();
        for (id, _) in ctx.objects().filter(|(id, _)| id.index() < globals) {
            roots.insert(Address::ObjectRange(id));
        }

        let mut objects = BTreeMap::new();
        for id in ctx.closure(&roots)? {
            objects.insert(id, ctx.object(id)?.into_owned());
        }
        Ok(FunctionSummary::new(func, args, ret.clone(), objects))
    }

    fn note_sites(&mut self, ctx: &HeapContext<'p>) {
        self.escapes
            .record(ctx.allocated_sites(), ctx.escaped_sites());
    }

    // ========================================================================
    // Function bodies
    // ========================================================================

    fn run_body(
        &mut self,
        entry: HeapContext<'p>,
        function: &'p Function,
        graph: &EvalGraph,
    ) -> Result<Body<'p>> {
        let mut states = vec![NodeState::Unvisited; graph.len()];
        let mut pending: FxHashMap<BlockId, HeapContext<'p>> = FxHashMap::default();
        pending.insert(BlockId::new(0), entry);
        let mut exit = None;

        for node in graph.nodes() {
            let inputs: Vec<(BlockId, HeapContext<'p>)> = node
                .blocks()
                .iter()
                .filter_map(|block| pending.remove(block).map(|state| (*block, state)))
                .collect();
            if inputs.is_empty() {
                continue;
            }

            states[node.index()] = NodeState::InProgress;
            self.stats.nodes_visited += 1;
            trace!("{}: node {} in progress", function.name(), node.index());

            let run = if node.is_cyclic() {
                self.run_loop(function, node, inputs)?
            } else {
                self.run_acyclic(function, node, inputs)?
            };

            states[node.index()] = run.state;
            match run.state {
                NodeState::Converged => self.stats.nodes_converged += 1,
                NodeState::Bypassed => self.stats.nodes_bypassed += 1,
                NodeState::Unvisited | NodeState::InProgress => {}
            }
            trace!("{}: node {} {}", function.name(), node.index(), run.state);

            for (target, state) in run.edges {
                merge_into(&mut pending, target, state, false)?;
            }
            for (state, value) in run.returns {
                join_exit(&mut exit, state, value)?;
            }
        }

        Ok(Body {
            exit,
            nodes: states,
        })
    }

    fn run_acyclic(
        &mut self,
        function: &'p Function,
        node: &EvalNode,
        inputs: Vec<(BlockId, HeapContext<'p>)>,
    ) -> Result<NodeRun<'p>> {
        let Some(entry) = join_states(inputs.iter().map(|(_, state)| state))? else {
            return Ok(NodeRun::new(NodeState::Unvisited));
        };
        if !self.budget.try_consume(1) {
            debug!(
                "budget exhausted, bypassing node {} of {}",
                node.index(),
                function.name()
            );
            return self.bypass(function, node, entry);
        }

        let mut run = NodeRun::new(NodeState::Converged);
        for &block in node.blocks() {
            let mut state = entry.clone();
            let outcome = self.eval_block(&mut state, function, block)?;
            self.collect(&mut run, function, block, state, outcome)?;
        }
        Ok(run)
    }

    fn run_loop(
        &mut self,
        function: &'p Function,
        node: &EvalNode,
        inputs: Vec<(BlockId, HeapContext<'p>)>,
    ) -> Result<NodeRun<'p>> {
        let Some(entry) = join_states(inputs.iter().map(|(_, state)| state))? else {
            return Ok(NodeRun::new(NodeState::Unvisited));
        };

        let starts: Vec<NodeId> = node
            .entries()
            .iter()
            .map(|block| NodeId::new(block.index()))
            .collect();
        let order: Vec<BlockId> = reverse_postorder_within(function, &starts, |n| {
            node.contains(BlockId::new(n.index()))
        })
        .into_iter()
        .map(|n| BlockId::new(n.index()))
        .collect();
        let position: FxHashMap<BlockId, usize> = order
            .iter()
            .enumerate()
            .map(|(index, block)| (*block, index))
            .collect();

        let mut block_in: FxHashMap<BlockId, HeapContext<'p>> = inputs.into_iter().collect();
        for pass in 1..=self.config.loop_iteration_cap {
            let widen = pass > self.config.widen_after;
            let mut changed = false;
            let mut run = NodeRun::new(NodeState::Converged);

            for &block in &order {
                let Some(input) = block_in.get(&block) else {
                    continue;
                };
                if !self.budget.try_consume(1) {
                    debug!(
                        "budget exhausted in pass {pass}, bypassing loop node {} of {}",
                        node.index(),
                        function.name()
                    );
                    return self.bypass(function, node, entry);
                }

                let mut state = input.clone();
                let outcome = self.eval_block(&mut state, function, block)?;
                let here = position.get(&block).copied().unwrap_or(usize::MAX);
                let mut local = NodeRun::new(NodeState::InProgress);
                self.collect(&mut local, function, block, state, outcome)?;
                run.returns.append(&mut local.returns);
                let (internal, leaving): (Vec<_>, Vec<_>) = local
                    .edges
                    .into_iter()
                    .partition(|(target, _)| node.contains(*target));
                run.edges.extend(leaving);
                for (target, state) in internal {
                    let back = position
                        .get(&target)
                        .is_some_and(|&there| there <= here);
                    changed |= merge_into(&mut block_in, target, state, widen && back)?;
                }
            }

            if !changed {
                trace!(
                    "loop node {} of {} converged after {pass} passes",
                    node.index(),
                    function.name()
                );
                return Ok(run);
            }
        }

        debug!(
            "loop node {} of {} reached the iteration cap of {}",
            node.index(),
            function.name(),
            self.config.loop_iteration_cap
        );
        self.bypass(function, node, entry)
    }

    /// Applies the node's effect to its joined entry state without simulating it.
    fn bypass(
        &mut self,
        function: &'p Function,
        node: &EvalNode,
        mut state: HeapContext<'p>,
    ) -> Result<NodeRun<'p>> {
        let facts = Arc::clone(&self.facts);
        approximate_region(&mut state, function, node, facts.refs())?;
        state.frame_mut()?.mark_bypassed(node.index());
        for &inst in node.insts() {
            if let Some(value) = state.find(inst) {
                self.values.record(function.id(), inst, value);
            }
        }

        let mut run = NodeRun::new(NodeState::Bypassed);
        for &(from, to) in node.exits() {
            let edge = self.flow_edge(&state, function, from, to)?;
            run.edges.push((to, edge));
        }
        if node.returns() {
            for &block in node.blocks() {
                let Some(Op::Return { value }) = function
                    .block(block)
                    .and_then(|data| data.terminator())
                    .and_then(|inst| function.inst(inst))
                    .map(|inst| &inst.op)
                else {
                    continue;
                };
                let value = value.map_or(AbstractValue::Bottom, |v| {
                    state.find(v).cloned().unwrap_or(AbstractValue::Top)
                });
                run.returns.push((state.clone(), value));
            }
        }
        self.note_sites(&state);
        Ok(run)
    }

    /// Routes the outcome of a block into `run`.
    fn collect(
        &mut self,
        run: &mut NodeRun<'p>,
        function: &'p Function,
        block: BlockId,
        state: HeapContext<'p>,
        outcome: Outcome,
    ) -> Result<()> {
        match outcome {
            Outcome::Next(targets) => {
                for target in targets {
                    let edge = self.flow_edge(&state, function, block, target)?;
                    run.edges.push((target, edge));
                }
            }
            Outcome::Return(value) => run.returns.push((state, value)),
            Outcome::Dead => self.note_sites(&state),
        }
        Ok(())
    }

    /// The state on edge `from -> to`: `state` with the phis of `to` bound to the values
    /// incoming from `from`.
    fn flow_edge(
        &mut self,
        state: &HeapContext<'p>,
        function: &'p Function,
        from: BlockId,
        to: BlockId,
    ) -> Result<HeapContext<'p>> {
        let block = function
            .block(to)
            .ok_or_else(|| consistency_error!("edge {from} -> {to} leaves {}", function.name()))?;

        let mut bound = Vec::new();
        for &inst in block.insts() {
            let Some(Op::Phi { incoming }) = function.inst(inst).map(|data| &data.op) else {
                continue;
            };
            let value = incoming
                .iter()
                .filter(|(pred, _)| *pred == from)
                .map(|(_, value)| operand(state, *value))
                .reduce(|a, b| a.join(&b))
                .unwrap_or(AbstractValue::Top);
            bound.push((inst, value));
        }

        let mut next = state.clone();
        for (inst, value) in bound {
            self.values.record(function.id(), inst, &value);
            next.define(inst, value)?;
        }
        Ok(next)
    }

    // ========================================================================
    // Blocks and instructions
    // ========================================================================

    fn eval_block(
        &mut self,
        ctx: &mut HeapContext<'p>,
        function: &'p Function,
        block: BlockId,
    ) -> Result<Outcome> {
        ctx.frame_mut()?.enter_block(block);
        let data = function
            .block(block)
            .ok_or_else(|| consistency_error!("{} has no block {block}", function.name()))?;

        for &inst in data.insts() {
            let Some(instruction) = function.inst(inst) else {
                return Err(consistency_error!(
                    "{} has no instruction {inst}",
                    function.name()
                ));
            };
            if instruction.op.is_terminator() {
                return eval_terminator(ctx, function, &instruction.op);
            }
            if !self.eval_inst(ctx, function, inst, &instruction.op, instruction.ty)? {
                return Ok(Outcome::Dead);
            }
        }
        Err(consistency_error!(
            "block {block} of {} has no terminator",
            function.name()
        ))
    }

    /// Evaluates one non-terminator instruction. Returns `false` if control never gets past
    /// it.
    fn eval_inst(
        &mut self,
        ctx: &mut HeapContext<'p>,
        function: &'p Function,
        inst: InstId,
        op: &Op,
        ty: Option<Type>,
    ) -> Result<bool> {
        let value = if let Some(value) = fixed_value(ctx, function, op, ty)? {
            value
        } else {
            match op {
                Op::Unary { op: unary, operand: x } => {
                    let from = type_of(function, *x);
                    rules::unary(*unary, from, ty.unwrap_or(from), &operand(ctx, *x))
                }
                Op::Binary { op: binary, lhs, rhs } => rules::binary(
                    *binary,
                    ty.unwrap_or(Type::I64),
                    &operand(ctx, *lhs),
                    &operand(ctx, *rhs),
                ),
                Op::Cmp { op: cmp, lhs, rhs } => {
                    rules::compare(*cmp, &operand(ctx, *lhs), &operand(ctx, *rhs))
                }
                Op::Select {
                    cond,
                    if_true,
                    if_false,
                } => rules::select(
                    &operand(ctx, *cond),
                    &operand(ctx, *if_true),
                    &operand(ctx, *if_false),
                ),
                // Bound on the incoming edge.
                Op::Phi { .. } => return Ok(true),
                Op::Load { addr } => self.load(ctx, function, *addr, ty.unwrap_or(Type::I64))?,
                Op::Store { addr, value } => {
                    self.store(ctx, function, *addr, *value)?;
                    return Ok(true);
                }
                Op::Alloc { size, zeroed } => {
                    let size = size.and_then(|size| {
                        operand(ctx, size)
                            .as_integer()
                            .and_then(|bytes| u64::try_from(bytes).ok())
                    });
                    let id = ctx.allocate(inst, size, *zeroed)?;
                    AbstractValue::Pointer(PointerSet::single(Address::Object { id, offset: 0 }))
                }
                Op::Free { .. } => return Ok(true),
                Op::Call { callee, args } => {
                    match self.eval_call(ctx, function, inst, callee, args, ty)? {
                        Some(value) => value,
                        None => return Ok(false),
                    }
                }
                _ => {
                    return Err(consistency_error!(
                        "{inst} of {} cannot be evaluated as {op:?}",
                        function.name()
                    ))
                }
            }
        };

        if ty.is_some() {
            self.values.record(function.id(), inst, &value);
            ctx.define(inst, value)?;
        }
        Ok(true)
    }

    fn load(
        &mut self,
        ctx: &mut HeapContext<'p>,
        function: &'p Function,
        addr: InstId,
        ty: Type,
    ) -> Result<AbstractValue> {
        let address = operand(ctx, addr);
        if address.pointers().is_some() || address.is_bottom() {
            return ctx.load(&address, ty);
        }
        match self.oracle.resolve(function.id(), addr) {
            Some(targets) => {
                let set = ctx.resolve(&targets)?;
                trace!("oracle resolved load address {addr} of {} to {set}", function.name());
                ctx.load_from(&set, ty)
            }
            None => {
                debug!(
                    "load through unresolved {addr} of {} is unknown",
                    function.name()
                );
                Ok(AbstractValue::Top)
            }
        }
    }

    fn store(
        &mut self,
        ctx: &mut HeapContext<'p>,
        function: &'p Function,
        addr: InstId,
        value: InstId,
    ) -> Result<()> {
        let address = operand(ctx, addr);
        let stored = operand(ctx, value);
        let ty = type_of(function, value);
        if address.pointers().is_some() || address.is_bottom() {
            return ctx.store(&address, stored, ty);
        }
        match self.oracle.resolve(function.id(), addr) {
            Some(targets) => {
                let set = ctx.resolve(&targets)?;
                trace!("oracle resolved store address {addr} of {} to {set}", function.name());
                ctx.store_to(&set, stored, ty)
            }
            None => {
                debug!(
                    "store through unresolved {addr} of {} widens memory",
                    function.name()
                );
                ctx.store_unknown(stored)
            }
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Evaluates a call. `None` means the call never returns.
    fn eval_call(
        &mut self,
        ctx: &mut HeapContext<'p>,
        function: &'p Function,
        call: InstId,
        callee: &Callee,
        args: &[InstId],
        ret: Option<Type>,
    ) -> Result<Option<AbstractValue>> {
        let values: Vec<AbstractValue> = args.iter().map(|arg| operand(ctx, *arg)).collect();
        match callee {
            Callee::Direct(func) => self.call_direct(ctx, call, *func, values, ret),
            Callee::Extern(symbol) => {
                trace!("external call to {symbol} from {}", function.name());
                self.stats.calls_approximated += 1;
                opaque_call(ctx, &values, ret).map(Some)
            }
            Callee::Indirect(target) => {
                self.call_indirect(ctx, function, call, *target, values, ret)
            }
        }
    }

    fn call_direct(
        &mut self,
        ctx: &mut HeapContext<'p>,
        call: InstId,
        func: FuncId,
        args: Vec<AbstractValue>,
        ret: Option<Type>,
    ) -> Result<Option<AbstractValue>> {
        if self.failed.contains(&func) {
            trace!("call to failed {func} is opaque");
            self.stats.calls_approximated += 1;
            return opaque_call(ctx, &args, ret).map(Some);
        }

        let facts = Arc::clone(&self.facts);
        let refs = facts
            .refs()
            .get(func)
            .ok_or(Error::UnknownFunction(func))?;
        if ctx.depth() >= self.config.max_call_depth || !self.budget.try_consume(1) {
            debug!(
                "approximating call to {func} at depth {} ({} steps left)",
                ctx.depth(),
                self.budget.remaining()
            );
            self.stats.calls_approximated += 1;
            return summarized_call(ctx, refs, &args, ret).map(Some);
        }

        let key = (func, args);
        let cached = self
            .memo
            .get(&key)
            .and_then(|entries| entries.iter().find(|entry| entry.input == *ctx))
            .map(|entry| entry.output.clone());
        if let Some(output) = cached {
            self.stats.memo_hits += 1;
            return Ok(output.map(|(state, value)| {
                *ctx = state;
                value
            }));
        }

        let input = ctx.clone();
        match self.call_function(ctx, Some(call), func, key.1.clone()) {
            Ok((value, _)) => {
                let output = value.clone().map(|value| (ctx.clone(), value));
                self.memo
                    .entry(key)
                    .or_default()
                    .push(MemoEntry { input, output });
                Ok(value)
            }
            Err(err @ Error::Inconsistent { .. }) => {
                warn!("evaluation of {func} failed, treating it as opaque: {err}");
                self.failed.insert(func);
                *ctx = input;
                self.stats.calls_approximated += 1;
                opaque_call(ctx, &key.1, ret).map(Some)
            }
            Err(err) => Err(err),
        }
    }

    fn call_indirect(
        &mut self,
        ctx: &mut HeapContext<'p>,
        function: &'p Function,
        call: InstId,
        target: InstId,
        args: Vec<AbstractValue>,
        ret: Option<Type>,
    ) -> Result<Option<AbstractValue>> {
        let callee = operand(ctx, target);
        if callee.is_bottom() {
            return Ok(None);
        }

        let mut candidates: Vec<FuncId> = Vec::new();
        let mut external = false;
        match callee.pointers() {
            Some(set) => {
                candidates.extend(set.funcs());
                external = set.iter().any(|address| !matches!(address, Address::Func(_)));
            }
            None => match self.oracle.resolve(function.id(), target) {
                Some(targets) => {
                    for target in targets {
                        match target {
                            OracleTarget::Func(func) => candidates.push(func),
                            _ => external = true,
                        }
                    }
                }
                None => external = true,
            },
        }
        candidates.sort_unstable();
        candidates.dedup();

        if candidates.is_empty()
            || (self.config.eager_indirect_bypass
                && candidates.len() > self.config.max_indirect_candidates)
        {
            debug!(
                "indirect call through {target} of {} with {} candidates is opaque",
                function.name(),
                candidates.len()
            );
            self.stats.calls_approximated += 1;
            return opaque_call(ctx, &args, ret).map(Some);
        }

        let mut joined = None;
        for func in candidates {
            let mut fork = ctx.clone();
            if let Some(value) = self.call_direct(&mut fork, call, func, args.clone(), ret)? {
                join_exit(&mut joined, fork, value)?;
            }
        }
        if external {
            let mut fork = ctx.clone();
            self.stats.calls_approximated += 1;
            let value = opaque_call(&mut fork, &args, ret)?;
            join_exit(&mut joined, fork, value)?;
        }

        Ok(joined.map(|(state, value)| {
            *ctx = state;
            value
        }))
    }
}

fn eval_terminator(ctx: &HeapContext<'_>, function: &Function, op: &Op) -> Result<Outcome> {
    let outcome = match op {
        Op::Jump { target } => Outcome::Next(vec![*target]),
        Op::Branch {
            cond,
            if_true,
            if_false,
        } => {
            let cond = operand(ctx, *cond);
            if cond.is_bottom() {
                Outcome::Dead
            } else {
                match cond.truthiness() {
                    Some(true) => Outcome::Next(vec![*if_true]),
                    Some(false) => Outcome::Next(vec![*if_false]),
                    None => Outcome::Next(vec![*if_true, *if_false]),
                }
            }
        }
        Op::Switch {
            value,
            cases,
            default,
        } => Outcome::Next(switch_targets(&operand(ctx, *value), cases, *default)),
        Op::JumpIndirect { addr, targets } => {
            let addr = operand(ctx, *addr);
            let chosen = match addr.pointers() {
                Some(set) if set.only_code() => targets
                    .iter()
                    .copied()
                    .filter(|target| {
                        set.blocks()
                            .any(|(func, block)| func == function.id() && block == *target)
                    })
                    .collect(),
                _ if addr.is_bottom() => Vec::new(),
                _ => targets.clone(),
            };
            Outcome::Next(chosen)
        }
        Op::Return { value } => Outcome::Return(
            value.map_or(AbstractValue::Bottom, |value| operand(ctx, value)),
        ),
        Op::Trap => Outcome::Dead,
        _ => {
            return Err(consistency_error!(
                "{op:?} in {} is not a terminator",
                function.name()
            ))
        }
    };
    Ok(outcome)
}

fn switch_targets(value: &AbstractValue, cases: &[(i64, BlockId)], default: BlockId) -> Vec<BlockId> {
    match value {
        AbstractValue::Bottom => Vec::new(),
        AbstractValue::Integer(n) => vec![cases
            .iter()
            .find(|(case, _)| case == n)
            .map_or(default, |(_, block)| *block)],
        AbstractValue::IntegerRange(range) => admitted(cases, default, |case| range.contains(case)),
        AbstractValue::IntegerMasked(bits) => admitted(cases, default, |case| bits.admits(case)),
        _ => admitted(cases, default, |_| true),
    }
}

fn admitted(cases: &[(i64, BlockId)], default: BlockId, keep: impl Fn(i64) -> bool) -> Vec<BlockId> {
    let mut targets: Vec<BlockId> = cases
        .iter()
        .filter(|(case, _)| keep(*case))
        .map(|(_, block)| *block)
        .collect();
    targets.push(default);
    targets
}

/// Value of `inst` in the active frame. Values never computed are `Bottom`.
fn operand(ctx: &HeapContext<'_>, inst: InstId) -> AbstractValue {
    ctx.find(inst).cloned().unwrap_or(AbstractValue::Bottom)
}

fn type_of(function: &Function, inst: InstId) -> Type {
    function
        .inst(inst)
        .and_then(|data| data.ty)
        .unwrap_or(Type::I64)
}

fn join_states<'a, 'p: 'a>(
    mut states: impl Iterator<Item = &'a HeapContext<'p>>,
) -> Result<Option<HeapContext<'p>>> {
    let Some(first) = states.next() else {
        return Ok(None);
    };
    let mut joined = first.clone();
    for state in states {
        joined.merge(state)?;
    }
    Ok(Some(joined))
}

/// Joins `state` into the entry state of `block`. Returns `true` if it changed.
fn merge_into<'p>(
    states: &mut FxHashMap<BlockId, HeapContext<'p>>,
    block: BlockId,
    state: HeapContext<'p>,
    widen: bool,
) -> Result<bool> {
    match states.entry(block) {
        Entry::Vacant(slot) => {
            slot.insert(state);
            Ok(true)
        }
        Entry::Occupied(mut known) => {
            if widen {
                known.get_mut().widen_with(&state)
            } else {
                known.get_mut().merge(&state)
            }
        }
    }
}

fn join_exit<'p>(
    exit: &mut Option<(HeapContext<'p>, AbstractValue)>,
    state: HeapContext<'p>,
    value: AbstractValue,
) -> Result<()> {
    match exit {
        None => *exit = Some((state, value)),
        Some((known, joined)) => {
            known.merge(&state)?;
            joined.join_assign(&value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{AllocSite, NoOracle, ObjectId, StaticOracle},
        ir::{BinaryOp, CmpOp, GlobalData, ProgramBuilder},
    };

    fn global_ptr(global: crate::ir::GlobalId) -> AbstractValue {
        AbstractValue::Pointer(PointerSet::single(Address::Object {
            id: ObjectId::of_global(global),
            offset: 0,
        }))
    }

    #[test]
    fn test_straight_line_function() {
        let mut pb = ProgramBuilder::new();
        let f = pb.declare("answer", &[], Some(Type::I64));
        let mut fb = pb.function(f).unwrap();
        let a = fb.iconst(Type::I64, 40);
        let b = fb.iconst(Type::I64, 2);
        let sum = fb.add(Type::I64, a, b);
        fb.ret(Some(sum));
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(f, vec![]).unwrap();
        let summary = analysis.root_summary().unwrap();
        assert_eq!(summary.return_value(), &AbstractValue::Integer(42));
        assert_eq!(
            analysis.values().get(f, sum),
            Some(&AbstractValue::Integer(42))
        );
        assert_eq!(analysis.nodes(), &[NodeState::Converged]);
        assert_eq!(analysis.stats().frames_pushed, 1);
    }

    #[test]
    fn test_folded_branch_skips_dead_block() {
        let mut pb = ProgramBuilder::new();
        let f = pb.declare("pick", &[], Some(Type::I64));
        let mut fb = pb.function(f).unwrap();
        let yes = fb.block();
        let no = fb.block();
        let one = fb.iconst(Type::I64, 1);
        let zero = fb.iconst(Type::I64, 0);
        let c = fb.cmp(CmpOp::SGt, one, zero);
        fb.branch(c, yes, no);
        fb.position_at(yes);
        let seven = fb.iconst(Type::I64, 7);
        fb.ret(Some(seven));
        fb.position_at(no);
        let nine = fb.iconst(Type::I64, 9);
        fb.ret(Some(nine));
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(f, vec![]).unwrap();
        assert_eq!(
            analysis.root_summary().unwrap().return_value(),
            &AbstractValue::Integer(7)
        );
        assert!(analysis.values().get(f, nine).is_none());
        assert!(analysis.nodes().contains(&NodeState::Unvisited));
    }

    #[test]
    fn test_counted_loop_converges() {
        // i = 0; while i < 10 { i = i + 1 }; return i
        let mut pb = ProgramBuilder::new();
        let f = pb.declare("count", &[], Some(Type::I64));
        let mut fb = pb.function(f).unwrap();
        let entry = fb.entry();
        let header = fb.block();
        let body = fb.block();
        let exit = fb.block();
        let zero = fb.iconst(Type::I64, 0);
        fb.jump(header);

        fb.position_at(header);
        let i = fb.phi(Type::I64);
        let ten = fb.iconst(Type::I64, 10);
        let c = fb.cmp(CmpOp::SLt, i, ten);
        fb.branch(c, body, exit);

        fb.position_at(body);
        let one = fb.iconst(Type::I64, 1);
        let next = fb.binary(BinaryOp::Add, Type::I64, i, one);
        fb.jump(header);

        fb.position_at(exit);
        fb.ret(Some(i));
        fb.add_incoming(i, entry, zero);
        fb.add_incoming(i, body, next);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(f, vec![]).unwrap();
        let ret = analysis.root_summary().unwrap().return_value().clone();
        assert!(AbstractValue::Integer(10).leq(&ret));
        assert!(!matches!(ret, AbstractValue::Integer(_)));
        assert!(analysis.nodes().iter().all(|state| state.is_terminal()));
    }

    #[test]
    fn test_direct_call_is_entered() {
        let mut pb = ProgramBuilder::new();
        let g = pb.add_global(GlobalData::new("g", 8));
        let set = pb.declare("set", &[Type::I64], None);
        let main = pb.declare("main", &[], None);

        let mut fb = pb.function(set).unwrap();
        let v = fb.arg(0);
        let p = fb.global_addr(g, 0);
        fb.store(p, v);
        fb.ret(None);
        pb.define(fb).unwrap();

        let mut fb = pb.function(main).unwrap();
        let five = fb.iconst(Type::I64, 5);
        fb.call(Callee::Direct(set), &[five], None);
        fb.ret(None);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(main, vec![]).unwrap();
        let summary = analysis.root_summary().unwrap();
        assert_eq!(
            summary.load(&global_ptr(g), Type::I64),
            AbstractValue::Integer(5)
        );
        assert_eq!(analysis.stats().frames_pushed, 2);
        assert_eq!(analysis.stats().calls_approximated, 0);
        assert!(analysis.summaries().of(set).next().is_some());
    }

    #[test]
    fn test_converging_pass_reuses_call_results() {
        // i = 0; while i < 10 { seven(); i = i + 1 }; return i
        let mut pb = ProgramBuilder::new();
        let seven = pb.declare("seven", &[], Some(Type::I64));
        let f = pb.declare("count", &[], Some(Type::I64));

        let mut fb = pb.function(seven).unwrap();
        let c = fb.iconst(Type::I64, 7);
        fb.ret(Some(c));
        pb.define(fb).unwrap();

        let mut fb = pb.function(f).unwrap();
        let entry = fb.entry();
        let header = fb.block();
        let body = fb.block();
        let exit = fb.block();
        let zero = fb.iconst(Type::I64, 0);
        fb.jump(header);

        fb.position_at(header);
        let i = fb.phi(Type::I64);
        let ten = fb.iconst(Type::I64, 10);
        let c = fb.cmp(CmpOp::SLt, i, ten);
        fb.branch(c, body, exit);

        fb.position_at(body);
        let r = fb.call(Callee::Direct(seven), &[], Some(Type::I64));
        let one = fb.iconst(Type::I64, 1);
        let next = fb.binary(BinaryOp::Add, Type::I64, i, one);
        fb.jump(header);

        fb.position_at(exit);
        fb.ret(Some(i));
        fb.add_incoming(i, entry, zero);
        fb.add_incoming(i, body, next);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(f, vec![]).unwrap();
        assert!(analysis.nodes().contains(&NodeState::Converged));
        assert!(analysis.stats().memo_hits >= 1);
        assert_eq!(analysis.values().get(f, r), Some(&AbstractValue::Integer(7)));
    }

    #[test]
    fn test_call_depth_limit_approximates() {
        let mut pb = ProgramBuilder::new();
        let g = pb.add_global(GlobalData::new("g", 8));
        let rec = pb.declare("rec", &[], None);
        let mut fb = pb.function(rec).unwrap();
        let p = fb.global_addr(g, 0);
        let one = fb.iconst(Type::I64, 1);
        fb.store(p, one);
        fb.call(Callee::Direct(rec), &[], None);
        fb.ret(None);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let config = EvalConfig::default().with_max_call_depth(3);
        let mut evaluator = Evaluator::new(&program, &NoOracle, config).unwrap();
        let analysis = evaluator.analyze(rec, vec![]).unwrap();
        assert!(analysis.stats().calls_approximated >= 1);
        let value = analysis
            .root_summary()
            .unwrap()
            .load(&global_ptr(g), Type::I64);
        assert!(AbstractValue::Integer(1).leq(&value));
    }

    #[test]
    fn test_non_escaping_allocation() {
        let mut pb = ProgramBuilder::new();
        let f = pb.declare("local", &[], Some(Type::I64));
        let main = pb.declare("main", &[], Some(Type::I64));

        let mut fb = pb.function(f).unwrap();
        let obj = fb.alloc(None, true);
        let v = fb.iconst(Type::I64, 3);
        fb.store(obj, v);
        let back = fb.load(Type::I64, obj);
        fb.ret(Some(back));
        pb.define(fb).unwrap();

        let mut fb = pb.function(main).unwrap();
        let r = fb.call(Callee::Direct(f), &[], Some(Type::I64));
        fb.ret(Some(r));
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(main, vec![]).unwrap();
        assert_eq!(
            analysis.root_summary().unwrap().return_value(),
            &AbstractValue::Integer(3)
        );
        assert_eq!(
            analysis.escapes().escapes(AllocSite::Heap(f, obj)),
            Some(false)
        );
    }

    #[test]
    fn test_indirect_call_through_oracle() {
        let mut pb = ProgramBuilder::new();
        let one = pb.declare("one", &[], Some(Type::I64));
        let two = pb.declare("two", &[], Some(Type::I64));
        let main = pb.declare("main", &[Type::Ptr], Some(Type::I64));
        for (func, value) in [(one, 1), (two, 2)] {
            let mut fb = pb.function(func).unwrap();
            let c = fb.iconst(Type::I64, value);
            fb.ret(Some(c));
            pb.define(fb).unwrap();
        }
        let mut fb = pb.function(main).unwrap();
        let fptr = fb.arg(0);
        let r = fb.call(Callee::Indirect(fptr), &[], Some(Type::I64));
        fb.ret(Some(r));
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let oracle = StaticOracle::new().with(
            main,
            fptr,
            vec![OracleTarget::Func(one), OracleTarget::Func(two)],
        );
        let mut evaluator = Evaluator::new(&program, &oracle, EvalConfig::default()).unwrap();
        let analysis = evaluator.analyze(main, vec![AbstractValue::Top]).unwrap();
        assert_eq!(
            analysis.root_summary().unwrap().return_value(),
            &AbstractValue::range(Some(1), Some(2))
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let program = ProgramBuilder::new().build().unwrap();
        let config = EvalConfig::default().with_step_budget(0);
        assert!(matches!(
            Evaluator::new(&program, &NoOracle, config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_root_is_an_error() {
        let program = ProgramBuilder::new().build().unwrap();
        let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        assert!(matches!(
            evaluator.analyze(FuncId::new(3), vec![]),
            Err(Error::UnknownFunction(_))
        ));
    }
}
