//! # preeval Prelude
//!
//! The most commonly used types for building programs and analyzing them.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all preeval operations
pub use crate::Error;

/// The result type used throughout preeval
pub use crate::Result;

// ================================================================================================
// Program Graph
// ================================================================================================

/// Program construction
pub use crate::ir::{FunctionBuilder, ProgramBuilder};

/// Program graph types
pub use crate::ir::{
    BinaryOp, BlockId, Callee, CmpOp, Constant, ExternId, FuncId, Function, GlobalData, GlobalId,
    InitValue, InstId, Op, Program, SlotId, Type, UnaryOp,
};

// ================================================================================================
// Evaluation
// ================================================================================================

/// The evaluator and its configuration
pub use crate::analysis::{AnalysisBudget, EvalConfig, Evaluator, NodeState};

/// Points-to oracles
pub use crate::analysis::{NoOracle, OracleTarget, PointsToOracle, StaticOracle};

/// Abstract domains
pub use crate::analysis::{AbstractValue, Address, JoinSemiLattice, PointerSet};

/// Results
pub use crate::analysis::{
    AllocSite, Analysis, EscapeInfo, EvalStats, FunctionSummary, InstValues, SummaryTable,
};

/// Parallel analysis of several roots
pub use crate::compiler::{AnalysisScheduler, ScheduledAnalyses};
