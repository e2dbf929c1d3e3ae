//! Drivers that run the evaluator over a whole program.
//!
//! - [`AnalysisScheduler`] - analyzes independent root functions in parallel and
//!   publishes the results as [`ScheduledAnalyses`]

mod scheduler;

pub use scheduler::{AnalysisScheduler, ScheduledAnalyses};
