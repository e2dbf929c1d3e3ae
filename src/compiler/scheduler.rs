//! Parallel analysis of several root functions.
//!
//! The `AnalysisScheduler` runs one [`Evaluator`] per root function on the rayon thread
//! pool. Evaluators share the read-only program, oracle and [`ProgramFacts`]; each owns its
//! heap context and budget, so no locking happens inside an analysis. Finished analyses are
//! published into a [`DashMap`] keyed by root.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    analysis::{
        AbstractValue, Analysis, EscapeInfo, EvalConfig, EvalStats, Evaluator, PointsToOracle,
        ProgramFacts,
    },
    ir::{FuncId, Program, Type},
    Result,
};

/// Runs analyses of independent root functions in parallel.
pub struct AnalysisScheduler<'p, 'o> {
    program: &'p Program,
    oracle: &'o dyn PointsToOracle,
    config: EvalConfig,
    facts: Arc<ProgramFacts>,
}

impl<'p, 'o> AnalysisScheduler<'p, 'o> {
    /// Creates a scheduler, computing the shared program facts once.
    ///
    /// # Arguments
    ///
    /// * `program` - The program to analyze.
    /// * `oracle` - Points-to answers for addresses the evaluator cannot track.
    /// * `config` - Configuration of every evaluator. Each gets its own budget.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if the configuration or the oracle is
    /// rejected.
    pub fn new(
        program: &'p Program,
        oracle: &'o dyn PointsToOracle,
        config: EvalConfig,
    ) -> Result<Self> {
        config.validate()?;
        oracle.validate(program)?;
        let facts = Arc::new(ProgramFacts::compute(program)?);
        Ok(Self {
            program,
            oracle,
            config,
            facts,
        })
    }

    /// The facts shared by every evaluator.
    #[must_use]
    pub fn facts(&self) -> &Arc<ProgramFacts> {
        &self.facts
    }

    /// Analyzes each root with the given arguments.
    ///
    /// A root whose analysis fails is logged and recorded as an empty analysis listing it as
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns an error only if an evaluator cannot be created.
    pub fn run(&self, roots: &[(FuncId, Vec<AbstractValue>)]) -> Result<ScheduledAnalyses> {
        let analyses = DashMap::with_capacity(roots.len());

        roots.par_iter().try_for_each(|(root, args)| -> Result<()> {
            let mut evaluator = Evaluator::with_facts(
                self.program,
                self.oracle,
                self.config.clone(),
                Arc::clone(&self.facts),
            )?;
            let analysis = match evaluator.analyze(*root, args.clone()) {
                Ok(analysis) => analysis,
                Err(err) => {
                    warn!("analysis of {root} failed: {err}");
                    let mut analysis = Analysis::empty(*root);
                    analysis.failed.insert(*root);
                    analysis
                }
            };
            debug!(
                "{root}: {} summaries, {} nodes visited",
                analysis.summaries().len(),
                analysis.stats().nodes_visited
            );
            analyses.insert(*root, analysis);
            Ok(())
        })?;

        Ok(ScheduledAnalyses::new(analyses))
    }

    /// Analyzes every function of the program under unknown arguments.
    ///
    /// # Errors
    ///
    /// Returns an error only if an evaluator cannot be created.
    pub fn run_all(&self) -> Result<ScheduledAnalyses> {
        let roots: Vec<(FuncId, Vec<AbstractValue>)> = self
            .program
            .funcs()
            .map(|function| {
                let args = function.params().iter().map(|ty| unknown(*ty)).collect();
                (function.id(), args)
            })
            .collect();
        self.run(&roots)
    }
}

fn unknown(ty: Type) -> AbstractValue {
    match ty {
        Type::I1 => AbstractValue::unknown_bool(),
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => AbstractValue::unknown_int(),
        Type::F64 | Type::Ptr => AbstractValue::Top,
    }
}

/// Analyses published by [`AnalysisScheduler::run`].
#[derive(Debug)]
pub struct ScheduledAnalyses {
    analyses: DashMap<FuncId, Analysis>,
    escapes: EscapeInfo,
    stats: EvalStats,
}

impl ScheduledAnalyses {
    fn new(analyses: DashMap<FuncId, Analysis>) -> Self {
        let mut escapes = EscapeInfo::new();
        let mut stats = EvalStats::default();
        for entry in &analyses {
            escapes.union_with(entry.value().escapes());
            stats.absorb(entry.value().stats());
        }
        Self {
            analyses,
            escapes,
            stats,
        }
    }

    /// The analysis of `root`, if it was scheduled.
    #[must_use]
    pub fn get(&self, root: FuncId) -> Option<dashmap::mapref::one::Ref<'_, FuncId, Analysis>> {
        self.analyses.get(&root)
    }

    /// Number of analyses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    /// Returns `true` if nothing was scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    /// Escape flags of every analysis. A site escapes if it escapes in any of them.
    #[must_use]
    pub fn escapes(&self) -> &EscapeInfo {
        &self.escapes
    }

    /// Summed counters of every analysis.
    #[must_use]
    pub fn stats(&self) -> &EvalStats {
        &self.stats
    }

    /// Roots whose analysis failed.
    #[must_use]
    pub fn failed(&self) -> Vec<FuncId> {
        let mut failed: Vec<FuncId> = self
            .analyses
            .iter()
            .filter(|entry| entry.value().is_failed())
            .map(|entry| *entry.key())
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Consumes the results into their map.
    #[must_use]
    pub fn into_inner(self) -> DashMap<FuncId, Analysis> {
        self.analyses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{AllocSite, NoOracle},
        ir::{Callee, GlobalData, ProgramBuilder},
    };

    fn program() -> (Program, FuncId, FuncId, crate::ir::InstId) {
        let mut pb = ProgramBuilder::new();
        let g = pb.add_global(GlobalData::new("g", 8));
        let leak = pb.declare("leak", &[], None);
        let keep = pb.declare("keep", &[Type::I64], Some(Type::I64));

        let mut fb = pb.function(leak).unwrap();
        let obj = fb.alloc(None, true);
        let p = fb.global_addr(g, 0);
        fb.store(p, obj);
        fb.ret(None);
        pb.define(fb).unwrap();

        let mut fb = pb.function(keep).unwrap();
        let x = fb.arg(0);
        fb.call(Callee::Direct(leak), &[], None);
        fb.ret(Some(x));
        pb.define(fb).unwrap();

        (pb.build().unwrap(), leak, keep, obj)
    }

    #[test]
    fn test_run_all_publishes_every_root() {
        let (program, leak, keep, alloc) = program();
        let scheduler = AnalysisScheduler::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let results = scheduler.run_all().unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.failed().is_empty());
        assert!(results.get(leak).is_some());
        let keep_analysis = results.get(keep).unwrap();
        assert_eq!(
            keep_analysis.root_summary().unwrap().return_value(),
            &AbstractValue::unknown_int()
        );
        assert_eq!(
            results.escapes().escapes(AllocSite::Heap(leak, alloc)),
            Some(true)
        );
        assert_eq!(results.stats().frames_pushed, 3);
    }

    #[test]
    fn test_unknown_root_is_recorded_as_failed() {
        let (program, _, _, _) = program();
        let scheduler = AnalysisScheduler::new(&program, &NoOracle, EvalConfig::default()).unwrap();
        let missing = FuncId::new(9);
        let results = scheduler.run(&[(missing, vec![])]).unwrap();
        assert_eq!(results.failed(), vec![missing]);
        assert!(results.get(missing).unwrap().summaries().is_empty());
    }
}
