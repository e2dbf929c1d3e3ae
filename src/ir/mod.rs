//! The program graph consumed by the evaluator.
//!
//! A small SSA IR: a [`Program`] owns [`Function`]s, [`GlobalData`] objects and
//! [`ExternSymbol`] declarations. Each function owns its blocks and an instruction arena; an
//! instruction id doubles as the SSA value it defines. Everything is immutable after
//! [`ProgramBuilder::build`] verified it, so one program can be shared by reference between
//! analysis threads.
//!
//! # Key Components
//!
//! - [`Program`] / [`Function`] / [`Block`] / [`Inst`] - The graph itself
//! - [`Op`] - Instruction operations, including terminators
//! - [`Type`] - Value and access types
//! - [`ProgramBuilder`] / [`FunctionBuilder`] - Construction with verification

mod builder;
mod function;
mod ids;
mod ops;
mod program;
mod types;

pub use builder::{FunctionBuilder, ProgramBuilder};
pub use function::{Block, Function, Inst, StackSlot};
pub use ids::{BlockId, ExternId, FuncId, GlobalId, InstId, SlotId};
pub use ops::{BinaryOp, Callee, CmpOp, Constant, Op, UnaryOp};
pub use program::{ExternSymbol, GlobalData, InitValue, Program};
pub use types::Type;
