//! Heap and value pre-evaluation.
//!
//! This module simulates programs of the [`crate::ir`] over an abstract machine whose
//! memory is a set of [`HeapObject`]s addressed by [`PointerSet`]s and whose registers hold
//! [`AbstractValue`]s. The results feed allocation-sensitive optimizations: which
//! allocations never escape, which instructions always produce the same value, and what a
//! function does to memory under given arguments.
//!
//! # Architecture
//!
//! - [`lattice`] - the [`JoinSemiLattice`] trait every abstract domain implements
//! - [`value`] - the value domain and its [`rules`] for arithmetic, comparisons and casts
//! - `pointer`, `object`, `frame`, `heap` - addresses, heap objects, call frames and the
//!   [`HeapContext`] that ties them together
//! - `flow` - per-function [`EvalGraph`]s of strongly connected block regions
//! - `refs` - transitive reference summaries used when calls are not entered
//! - `driver` - the [`Evaluator`] and its node state machine
//! - `summary` - results: [`Analysis`], [`FunctionSummary`], [`InstValues`],
//!   [`EscapeInfo`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use preeval::analysis::{EvalConfig, Evaluator, NoOracle};
//!
//! let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::default())?;
//! let analysis = evaluator.analyze(main, vec![])?;
//!
//! for site in analysis.escapes().sites() {
//!     if analysis.escapes().escapes(site) == Some(false) {
//!         println!("{site} can live on the stack");
//!     }
//! }
//! ```

pub mod lattice;
pub mod rules;
pub mod value;

mod approx;
mod budget;
mod config;
mod driver;
mod flow;
mod frame;
mod heap;
mod object;
mod oracle;
mod pointer;
mod refs;
mod summary;

pub use approx::{approximate_region, opaque_call, summarized_call};
pub use budget::AnalysisBudget;
pub use config::{EvalConfig, MAX_SUPPORTED_CALL_DEPTH};
pub use driver::{EvalStats, Evaluator, NodeState, ProgramFacts};
pub use flow::{EvalGraph, EvalNode, RegionEffects, StoredKinds};
pub use frame::{CallChain, CallFrame};
pub use heap::HeapContext;
pub use lattice::{BoundedLattice, JoinSemiLattice};
pub use object::{AllocSite, HeapObject, ObjectFlags, ObjectId, ObjectKind, Slot};
pub use oracle::{NoOracle, OracleTarget, PointsToOracle, StaticOracle};
pub use pointer::{Address, Base, FrameIndex, Offset, PointerSet};
pub use refs::{FunctionRefs, ProgramRefs};
pub use summary::{Analysis, EscapeInfo, FunctionSummary, InstValues, SummaryTable};
pub use value::{AbstractValue, IntRange, KnownBits};
