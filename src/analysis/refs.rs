//! Transitive reference summaries over the call graph.
//!
//! For every function this collects what it, or anything it calls directly, may touch:
//! referenced globals, heap allocation sites, and whether it stores or leaves the program.
//! Call-graph SCCs share one summary, so mutually recursive functions see each other's facts.
//! The approximator uses these facts to bound the effect of a call without entering it.

use std::collections::BTreeSet;

use crate::{
    ir::{Callee, ExternId, FuncId, GlobalId, InstId, Op, Program},
    utils::graph::{algorithms::strongly_connected_components, DirectedGraph, NodeId, Successors},
    Result,
};

/// What one function may reach, directly or through its direct callees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionRefs {
    /// Globals whose address is formed
    pub globals: BTreeSet<GlobalId>,
    /// Functions whose address is formed
    pub funcs: BTreeSet<FuncId>,
    /// External symbols whose address is formed
    pub externs: BTreeSet<ExternId>,
    /// Heap allocation sites that may execute
    pub alloc_sites: BTreeSet<(FuncId, InstId)>,
    /// Some reached function stores to memory
    pub has_stores: bool,
    /// Some reached function calls an external symbol
    pub has_extern_calls: bool,
    /// Some reached function calls through a pointer
    pub has_indirect_calls: bool,
    /// The function is part of a call-graph cycle
    pub recursive: bool,
}

impl FunctionRefs {
    /// Returns `true` if calling the function may run code outside the program graph.
    #[must_use]
    pub fn calls_out(&self) -> bool {
        self.has_extern_calls || self.has_indirect_calls
    }

    /// Combines the facts of another function into these.
    pub fn union_with(&mut self, other: &Self) {
        self.globals.extend(other.globals.iter().copied());
        self.funcs.extend(other.funcs.iter().copied());
        self.externs.extend(other.externs.iter().copied());
        self.alloc_sites.extend(other.alloc_sites.iter().copied());
        self.has_stores |= other.has_stores;
        self.has_extern_calls |= other.has_extern_calls;
        self.has_indirect_calls |= other.has_indirect_calls;
    }

    /// Returns `true` if calling the function cannot change memory.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        !self.has_stores && !self.calls_out()
    }
}

/// Reference summaries of every function of a program.
#[derive(Debug, Clone, Default)]
pub struct ProgramRefs {
    refs: Vec<FunctionRefs>,
}

impl ProgramRefs {
    /// Computes the summaries of `program`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if a direct call names a function outside the
    /// program, which the builder's verifier rejects.
    pub fn compute(program: &Program) -> Result<Self> {
        let count = program.func_count();
        let mut graph: DirectedGraph<FuncId, ()> = DirectedGraph::with_capacity(count);
        let mut local = Vec::with_capacity(count);

        for function in program.funcs() {
            graph.add_node(function.id());
        }
        for function in program.funcs() {
            let mut refs = FunctionRefs::default();
            for (id, inst) in function.insts() {
                match &inst.op {
                    Op::GlobalAddr { global, .. } => {
                        refs.globals.insert(*global);
                    }
                    Op::FuncAddr { func } => {
                        refs.funcs.insert(*func);
                    }
                    Op::ExternAddr { symbol, .. } => {
                        refs.externs.insert(*symbol);
                    }
                    Op::Store { .. } => refs.has_stores = true,
                    Op::Alloc { .. } => {
                        refs.alloc_sites.insert((function.id(), id));
                    }
                    Op::Call { callee, .. } => match callee {
                        Callee::Direct(target) => {
                            graph.add_edge(
                                NodeId::new(function.id().index()),
                                NodeId::new(target.index()),
                                (),
                            )?;
                        }
                        Callee::Extern(_) => refs.has_extern_calls = true,
                        Callee::Indirect(_) => refs.has_indirect_calls = true,
                    },
                    _ => {}
                }
            }
            local.push(refs);
        }

        let mut refs = vec![FunctionRefs::default(); count];
        // Callee components come out first, so their summaries are final when read.
        for scc in strongly_connected_components(&graph) {
            let recursive = scc.len() > 1
                || scc
                    .iter()
                    .any(|node| graph.successors(*node).any(|succ| succ == *node));

            let mut merged = FunctionRefs::default();
            for node in &scc {
                merged.union_with(&local[node.index()]);
            }
            for (from, to, _) in graph.edges() {
                if scc.contains(&from) && !scc.contains(&to) {
                    let callee = refs[to.index()].clone();
                    merged.union_with(&callee);
                }
            }
            merged.recursive = recursive;
            for node in &scc {
                refs[node.index()] = merged.clone();
            }
        }

        Ok(Self { refs })
    }

    /// Summary of `func`, `None` for ids outside the program.
    #[must_use]
    pub fn get(&self, func: FuncId) -> Option<&FunctionRefs> {
        self.refs.get(func.index())
    }

    /// Number of summarized functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` for an empty program.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
