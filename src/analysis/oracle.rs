//! The points-to oracle consulted for pointers the evaluator cannot resolve itself.
//!
//! Whenever a load, store or indirect call goes through a value whose abstract value carries
//! no usable pointer set (`Top`, an integer cast to a pointer), the driver asks the oracle for
//! candidate targets. The oracle answers in terms of program entities; the heap context turns
//! them into abstract addresses.
//!
//! # Key Components
//!
//! - [`PointsToOracle`] - The trait the driver depends on
//! - [`OracleTarget`] - A candidate target named by program entity
//! - [`NoOracle`] - Never answers
//! - [`StaticOracle`] - Answers from a prepared table

use rustc_hash::FxHashMap;

use crate::{
    ir::{ExternId, FuncId, GlobalId, InstId, Op, Program, SlotId},
    Error, Result,
};

/// A candidate target of a pointer, named by program entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleTarget {
    /// Anywhere within a global
    Global(GlobalId),
    /// Anywhere within an external symbol
    Extern(ExternId),
    /// A function, for indirect calls
    Func(FuncId),
    /// Any object allocated by the heap allocation site `(function, instruction)`
    Heap(FuncId, InstId),
    /// A stack slot of any live activation of the function
    Stack(FuncId, SlotId),
}

/// Supplies candidate targets for pointer values.
///
/// Implementations are shared read-only between analysis threads.
pub trait PointsToOracle: Send + Sync {
    /// Candidate targets of the value defined by `value` in `func`.
    ///
    /// `None` means the oracle knows nothing about the value; the evaluator then falls back
    /// to the most conservative treatment. An empty list claims the value never points
    /// anywhere.
    fn resolve(&self, func: FuncId, value: InstId) -> Option<Vec<OracleTarget>>;

    /// Checks the oracle against the program before an analysis starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the oracle refers to entities the program does not
    /// have.
    fn validate(&self, _program: &Program) -> Result<()> {
        Ok(())
    }
}

/// An oracle without any knowledge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

impl PointsToOracle for NoOracle {
    fn resolve(&self, _func: FuncId, _value: InstId) -> Option<Vec<OracleTarget>> {
        None
    }
}

/// An oracle answering from a table prepared ahead of time, typically by a cheaper
/// flow-insensitive analysis.
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::analysis::{OracleTarget, StaticOracle};
///
/// let oracle = StaticOracle::new()
///     .with(caller, fptr, vec![OracleTarget::Func(first), OracleTarget::Func(second)]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    answers: FxHashMap<(FuncId, InstId), Vec<OracleTarget>>,
}

impl StaticOracle {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the candidates of a value, replacing earlier ones.
    pub fn insert(&mut self, func: FuncId, value: InstId, targets: Vec<OracleTarget>) {
        self.answers.insert((func, value), targets);
    }

    /// Builder form of [`StaticOracle::insert`].
    #[must_use]
    pub fn with(mut self, func: FuncId, value: InstId, targets: Vec<OracleTarget>) -> Self {
        self.insert(func, value, targets);
        self
    }

    /// Number of values with an answer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    /// Returns `true` if the oracle has no answers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

impl PointsToOracle for StaticOracle {
    fn resolve(&self, func: FuncId, value: InstId) -> Option<Vec<OracleTarget>> {
        self.answers.get(&(func, value)).cloned()
    }

    fn validate(&self, program: &Program) -> Result<()> {
        for ((func, value), targets) in &self.answers {
            let function = program
                .func(*func)
                .map_err(|_| Error::InvalidConfig(format!("oracle names unknown function {func}")))?;
            if value.index() >= function.inst_count() {
                return Err(Error::InvalidConfig(format!(
                    "oracle names unknown value {value} of {}",
                    function.name()
                )));
            }
            for target in targets {
                if !target_exists(program, *target) {
                    return Err(Error::InvalidConfig(format!(
                        "oracle answer for {value} of {} names a missing {target:?}",
                        function.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn target_exists(program: &Program, target: OracleTarget) -> bool {
    match target {
        OracleTarget::Global(global) => global.index() < program.global_count(),
        OracleTarget::Extern(symbol) => symbol.index() < program.extern_count(),
        OracleTarget::Func(func) => func.index() < program.func_count(),
        OracleTarget::Heap(func, inst) => program
            .func(func)
            .ok()
            .and_then(|f| f.inst(inst))
            .is_some_and(|i| matches!(i.op, Op::Alloc { .. })),
        OracleTarget::Stack(func, slot) => program
            .func(func)
            .is_ok_and(|f| f.slot(slot).is_some()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ProgramBuilder, Type};

    fn program() -> (Program, FuncId, InstId) {
        let mut pb = ProgramBuilder::new();
        let f = pb.declare("f", &[Type::Ptr], None);
        let mut fb = pb.function(f).unwrap();
        let p = fb.arg(0);
        fb.ret(None);
        pb.define(fb).unwrap();
        (pb.build().unwrap(), f, p)
    }

    #[test]
    fn test_static_answers() {
        let (program, f, p) = program();
        let oracle = StaticOracle::new().with(f, p, vec![OracleTarget::Func(f)]);
        assert_eq!(oracle.resolve(f, p), Some(vec![OracleTarget::Func(f)]));
        assert_eq!(oracle.resolve(f, InstId::new(1)), None);
        assert!(oracle.validate(&program).is_ok());
        assert!(NoOracle.resolve(f, p).is_none());
    }

    #[test]
    fn test_malformed_answers_rejected() {
        let (program, f, p) = program();
        let oracle = StaticOracle::new().with(f, p, vec![OracleTarget::Global(GlobalId::new(3))]);
        assert!(matches!(
            oracle.validate(&program),
            Err(Error::InvalidConfig(_))
        ));

        let oracle = StaticOracle::new().with(FuncId::new(9), p, vec![]);
        assert!(matches!(
            oracle.validate(&program),
            Err(Error::InvalidConfig(_))
        ));

        let oracle = StaticOracle::new().with(f, p, vec![OracleTarget::Heap(f, p)]);
        assert!(matches!(
            oracle.validate(&program),
            Err(Error::InvalidConfig(_))
        ));
    }
}
