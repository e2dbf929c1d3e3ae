//! Configuration for the evaluator.
//!
//! | Field                     | Default     |
//! |---------------------------|-------------|
//! | `loop_iteration_cap`      | 64          |
//! | `widen_after`             | 8           |
//! | `step_budget`             | 1_000_000   |
//! | `time_budget`             | none        |
//! | `max_call_depth`          | 32          |
//! | `max_indirect_candidates` | 8           |
//! | `eager_indirect_bypass`   | true        |
//! | `max_tracked_offsets`     | 256         |

use std::time::Duration;

use crate::{Error, Result};

/// Deepest call nesting the evaluator will simulate, whatever the configuration asks for.
pub const MAX_SUPPORTED_CALL_DEPTH: usize = 256;

/// Configuration for one evaluator run.
///
/// Controls how hard the evaluator tries before it falls back to approximation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalConfig {
    /// Maximum passes over a loop node before it is bypassed (default: 64).
    pub loop_iteration_cap: usize,

    /// Passes over a loop node after which entry states are widened instead of joined
    /// (default: 8).
    pub widen_after: usize,

    /// Steps available to the whole run. One step is one block evaluation or one frame
    /// push (default: 1_000_000).
    pub step_budget: u64,

    /// Wall-clock limit of the whole run (default: none).
    pub time_budget: Option<Duration>,

    /// Maximum simulated call depth; deeper calls are approximated (default: 32).
    pub max_call_depth: usize,

    /// Indirect call candidate count above which the call may be approximated (default: 8).
    pub max_indirect_candidates: usize,

    /// Approximate indirect calls with more than `max_indirect_candidates` candidates
    /// instead of evaluating each one (default: true).
    pub eager_indirect_bypass: bool,

    /// Distinct offsets tracked per object before stores degrade to imprecise stores
    /// (default: 256).
    pub max_tracked_offsets: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            loop_iteration_cap: 64,
            widen_after: 8,
            step_budget: 1_000_000,
            time_budget: None,
            max_call_depth: 32,
            max_indirect_candidates: 8,
            eager_indirect_bypass: true,
            max_tracked_offsets: 256,
        }
    }
}

impl EvalConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration favoring precision over speed.
    ///
    /// - Loops iterate up to 256 times and widen late
    /// - Calls nest up to 64 deep
    /// - Indirect calls are always evaluated per candidate
    #[must_use]
    pub fn precise() -> Self {
        Self {
            loop_iteration_cap: 256,
            widen_after: 32,
            step_budget: 10_000_000,
            max_call_depth: 64,
            eager_indirect_bypass: false,
            max_tracked_offsets: 1024,
            ..Self::default()
        }
    }

    /// A configuration for quick, coarse results.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            loop_iteration_cap: 8,
            widen_after: 2,
            step_budget: 50_000,
            max_call_depth: 8,
            max_indirect_candidates: 4,
            max_tracked_offsets: 64,
            ..Self::default()
        }
    }

    /// The smallest configuration that still passes [`EvalConfig::validate`]: one step, one
    /// loop pass, no nested calls beyond the root.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            loop_iteration_cap: 1,
            widen_after: 0,
            step_budget: 1,
            time_budget: None,
            max_call_depth: 1,
            max_indirect_candidates: 1,
            eager_indirect_bypass: true,
            max_tracked_offsets: 1,
        }
    }

    /// Sets the loop iteration cap.
    #[must_use]
    pub fn with_loop_iteration_cap(mut self, cap: usize) -> Self {
        self.loop_iteration_cap = cap;
        self
    }

    /// Sets the pass after which loop entry states are widened.
    #[must_use]
    pub fn with_widen_after(mut self, passes: usize) -> Self {
        self.widen_after = passes;
        self
    }

    /// Sets the step budget.
    #[must_use]
    pub fn with_step_budget(mut self, steps: u64) -> Self {
        self.step_budget = steps;
        self
    }

    /// Sets the wall-clock budget.
    #[must_use]
    pub fn with_time_budget(mut self, limit: Duration) -> Self {
        self.time_budget = Some(limit);
        self
    }

    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the indirect call policy.
    ///
    /// # Arguments
    ///
    /// * `max_candidates` - Candidate count above which `eager` applies.
    /// * `eager` - Whether calls above the limit are approximated.
    #[must_use]
    pub fn with_indirect_calls(mut self, max_candidates: usize, eager: bool) -> Self {
        self.max_indirect_candidates = max_candidates;
        self.eager_indirect_bypass = eager;
        self
    }

    /// Sets the per-object offset tracking threshold.
    #[must_use]
    pub fn with_max_tracked_offsets(mut self, offsets: usize) -> Self {
        self.max_tracked_offsets = offsets;
        self
    }

    /// Checks the configuration before an analysis starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero step or time budget, a zero loop
    /// iteration cap, a zero call depth or a zero offset tracking threshold, and
    /// [`Error::RecursionLimit`] for a call depth above [`MAX_SUPPORTED_CALL_DEPTH`].
    pub fn validate(&self) -> Result<()> {
        if self.step_budget == 0 {
            return Err(Error::InvalidConfig("step budget must be positive".into()));
        }
        if self.time_budget.is_some_and(|limit| limit.is_zero()) {
            return Err(Error::InvalidConfig("time budget must be positive".into()));
        }
        if self.loop_iteration_cap == 0 {
            return Err(Error::InvalidConfig(
                "loop iteration cap must be positive".into(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(Error::InvalidConfig("call depth must be positive".into()));
        }
        if self.max_call_depth > MAX_SUPPORTED_CALL_DEPTH {
            return Err(Error::RecursionLimit(self.max_call_depth));
        }
        if self.max_tracked_offsets == 0 {
            return Err(Error::InvalidConfig(
                "offset tracking threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for config in [
            EvalConfig::default(),
            EvalConfig::precise(),
            EvalConfig::fast(),
            EvalConfig::minimal(),
        ] {
            assert!(config.validate().is_ok(), "{config:?}");
        }
    }

    #[test]
    fn test_defaults() {
        let config = EvalConfig::new();
        assert_eq!(config.loop_iteration_cap, 64);
        assert_eq!(config.widen_after, 8);
        assert_eq!(config.step_budget, 1_000_000);
        assert_eq!(config.time_budget, None);
        assert_eq!(config.max_call_depth, 32);
        assert_eq!(config.max_indirect_candidates, 8);
        assert!(config.eager_indirect_bypass);
        assert_eq!(config.max_tracked_offsets, 256);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let bad = [
            EvalConfig::new().with_step_budget(0),
            EvalConfig::new().with_time_budget(Duration::ZERO),
            EvalConfig::new().with_loop_iteration_cap(0),
            EvalConfig::new().with_max_call_depth(0),
            EvalConfig::new().with_max_tracked_offsets(0),
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
        assert!(matches!(
            EvalConfig::new().with_max_call_depth(100_000).validate(),
            Err(Error::RecursionLimit(100_000))
        ));
    }
}
