//! The analysis budget: a step counter with an optional deadline.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// How many steps pass between two deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 64;

#[derive(Debug)]
struct BudgetState {
    remaining: AtomicU64,
    consumed: AtomicU64,
    exhausted: AtomicBool,
}

/// Bounds the total work of one analysis run.
///
/// Every node visit and every frame push consumes steps. Once the budget is exhausted,
/// further requests fail and the driver approximates instead of simulating, which
/// guarantees termination. Exhaustion is a normal outcome, not an error.
///
/// Clones share the same counters, so a handle kept by another thread can cancel a running
/// analysis with [`AnalysisBudget::exhaust`].
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::analysis::AnalysisBudget;
///
/// let budget = AnalysisBudget::new(2, None);
/// assert!(budget.try_consume(1));
/// assert!(budget.try_consume(1));
/// assert!(!budget.try_consume(1));
/// assert!(budget.is_exhausted());
/// ```
#[derive(Debug, Clone)]
pub struct AnalysisBudget {
    state: Arc<BudgetState>,
    deadline: Option<Instant>,
}

impl AnalysisBudget {
    /// Creates a budget of `steps` steps, optionally also bounded by wall-clock `time`
    /// measured from now.
    #[must_use]
    pub fn new(steps: u64, time: Option<Duration>) -> Self {
        Self {
            state: Arc::new(BudgetState {
                remaining: AtomicU64::new(steps),
                consumed: AtomicU64::new(0),
                exhausted: AtomicBool::new(steps == 0),
            }),
            deadline: time.map(|t| Instant::now() + t),
        }
    }

    /// Consumes `steps` steps. Returns `false`, consuming nothing, if fewer remain or the
    /// deadline passed.
    pub fn try_consume(&self, steps: u64) -> bool {
        if self.state.exhausted.load(Ordering::Acquire) {
            return false;
        }

        let taken = self
            .state
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                left.checked_sub(steps)
            })
            .is_ok();
        if !taken {
            self.exhaust();
            return false;
        }

        let before = self.state.consumed.fetch_add(steps, Ordering::AcqRel);
        if let Some(deadline) = self.deadline {
            let crossed = before / DEADLINE_CHECK_INTERVAL
                != (before + steps) / DEADLINE_CHECK_INTERVAL;
            if (crossed || before == 0) && Instant::now() >= deadline {
                self.exhaust();
                return false;
            }
        }
        true
    }

    /// Drops every remaining step. Running analyses sharing this budget finish
    /// conservatively.
    pub fn exhaust(&self) {
        self.state.remaining.store(0, Ordering::Release);
        self.state.exhausted.store(true, Ordering::Release);
    }

    /// Steps still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.state.remaining.load(Ordering::Acquire)
    }

    /// Steps consumed so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.state.consumed.load(Ordering::Acquire)
    }

    /// Returns `true` once a request was refused or the budget was exhausted explicitly.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state.exhausted.load(Ordering::Acquire)
    }
}
