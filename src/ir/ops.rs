//! Instruction operations.
//!
//! Every instruction is `result = op(operands)` where operands are the [`InstId`]s of earlier
//! SSA definitions. Constants are materialized by [`Op::Const`] so that every operand is an
//! instruction.
//!
//! # Operation Categories
//!
//! - **Values**: arguments, constants, undef
//! - **Addresses**: globals, externs, functions, blocks, stack slots, the frame itself
//! - **Arithmetic**: unary, binary, compare, select
//! - **SSA**: phi nodes
//! - **Memory**: load, store, heap allocation, free
//! - **Calls**: direct, external, indirect
//! - **Control flow**: the block terminators
//!
//! # Field Documentation
//!
//! - `lhs`, `rhs`: Binary operands
//! - `operand`: Unary operand
//! - `addr`: Address operand of a memory access
//! - `value`: A value being stored or returned
//! - `offset`: Constant byte offset folded into an address constant

#![allow(missing_docs)]

use strum::Display;

use super::{BlockId, ExternId, FuncId, GlobalId, InstId, SlotId, Type};

/// A constant materialized by [`Op::Const`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    /// Integer constant, interpreted at the instruction's type
    Int(i64),
    /// IEEE754 double constant
    Float(f64),
    /// The null pointer
    Null,
}

/// Single-operand operations, including every conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
    FNeg,
    /// Truncate to the result type
    Trunc,
    /// Zero-extend to the result type
    ZExt,
    /// Sign-extend to the result type
    SExt,
    /// Signed integer to float
    IntToFloat,
    /// Float to signed integer, truncating toward zero
    FloatToInt,
    PtrToInt,
    IntToPtr,
}

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

/// Comparison predicates. Result type is always [`Type::I1`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl CmpOp {
    /// Returns `true` for the predicates that interpret operands as unsigned.
    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, CmpOp::ULt | CmpOp::ULe | CmpOp::UGt | CmpOp::UGe)
    }
}

/// The target of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// A function defined in this program
    Direct(FuncId),
    /// An external symbol whose body is unknown
    Extern(ExternId),
    /// A computed function pointer
    Indirect(InstId),
}

/// An IR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // ========================================================================
    // Values
    // ========================================================================
    /// The `index`th argument of the enclosing function
    Arg { index: usize },
    Const { value: Constant },
    /// An undefined value
    Undef,

    // ========================================================================
    // Addresses
    // ========================================================================
    GlobalAddr { global: GlobalId, offset: i64 },
    ExternAddr { symbol: ExternId, offset: i64 },
    FuncAddr { func: FuncId },
    /// Address of a block of the enclosing function
    BlockAddr { block: BlockId },
    StackAddr { slot: SlotId, offset: i64 },
    /// Address of the enclosing activation's whole frame
    FrameAddr,

    // ========================================================================
    // Arithmetic
    // ========================================================================
    Unary { op: UnaryOp, operand: InstId },
    Binary { op: BinaryOp, lhs: InstId, rhs: InstId },
    Cmp { op: CmpOp, lhs: InstId, rhs: InstId },
    Select { cond: InstId, if_true: InstId, if_false: InstId },

    // ========================================================================
    // SSA
    // ========================================================================
    /// `(predecessor block, value)` pairs
    Phi { incoming: Vec<(BlockId, InstId)> },

    // ========================================================================
    // Memory
    // ========================================================================
    /// Load a value of the instruction's type
    Load { addr: InstId },
    /// Store `value`, using the value's type as the access width
    Store { addr: InstId, value: InstId },
    /// Heap allocation site. `size` is a byte count operand, `None` for unknown sizes.
    Alloc { size: Option<InstId>, zeroed: bool },
    Free { addr: InstId },

    // ========================================================================
    // Calls
    // ========================================================================
    Call { callee: Callee, args: Vec<InstId> },

    // ========================================================================
    // Terminators
    // ========================================================================
    Jump { target: BlockId },
    Branch { cond: InstId, if_true: BlockId, if_false: BlockId },
    /// Multi-way branch on an integer
    Switch { value: InstId, cases: Vec<(i64, BlockId)>, default: BlockId },
    /// Computed jump through a block address; `targets` lists every possible destination
    JumpIndirect { addr: InstId, targets: Vec<BlockId> },
    Return { value: Option<InstId> },
    /// Unreachable or aborting terminator
    Trap,
}

impl Op {
    /// Returns `true` if the operation ends a block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Jump { .. }
                | Op::Branch { .. }
                | Op::Switch { .. }
                | Op::JumpIndirect { .. }
                | Op::Return { .. }
                | Op::Trap
        )
    }

    /// Returns `true` if the operation writes memory or may do so through a callee.
    #[must_use]
    pub const fn writes_memory(&self) -> bool {
        matches!(self, Op::Store { .. } | Op::Call { .. } | Op::Free { .. })
    }

    /// The SSA values read by this operation, in operand order.
    #[must_use]
    pub fn operands(&self) -> Vec<InstId> {
        match self {
            Op::Arg { .. }
            | Op::Const { .. }
            | Op::Undef
            | Op::GlobalAddr { .. }
            | Op::ExternAddr { .. }
            | Op::FuncAddr { .. }
            | Op::BlockAddr { .. }
            | Op::StackAddr { .. }
            | Op::FrameAddr
            | Op::Jump { .. }
            | Op::Trap => vec![],

            Op::Unary { operand, .. } => vec![*operand],
            Op::Binary { lhs, rhs, .. } | Op::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Select {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],
            Op::Phi { incoming } => incoming.iter().map(|(_, value)| *value).collect(),
            Op::Load { addr } | Op::Free { addr } | Op::JumpIndirect { addr, .. } => vec![*addr],
            Op::Store { addr, value } => vec![*addr, *value],
            Op::Alloc { size, .. } => size.iter().copied().collect(),
            Op::Call { callee, args } => {
                let mut operands = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    operands.push(*target);
                }
                operands.extend(args.iter().copied());
                operands
            }
            Op::Branch { cond, .. } => vec![*cond],
            Op::Switch { value, .. } => vec![*value],
            Op::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Successor blocks of a terminator, in a stable order without duplicates.
    /// Non-terminators have none.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        let mut targets = match self {
            Op::Jump { target } => vec![*target],
            Op::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Op::Switch { cases, default, .. } => {
                let mut targets: Vec<BlockId> = cases.iter().map(|(_, block)| *block).collect();
                targets.push(*default);
                targets
            }
            Op::JumpIndirect { targets, .. } => targets.clone(),
            _ => vec![],
        };
        let mut seen = Vec::with_capacity(targets.len());
        targets.retain(|block| {
            if seen.contains(block) {
                false
            } else {
                seen.push(*block);
                true
            }
        });
        targets
    }

    /// Returns the statically known result type for operations whose type does not depend on
    /// the builder's choice.
    #[must_use]
    pub const fn fixed_type(&self) -> Option<Type> {
        match self {
            Op::Cmp { .. } => Some(Type::I1),
            Op::GlobalAddr { .. }
            | Op::ExternAddr { .. }
            | Op::FuncAddr { .. }
            | Op::BlockAddr { .. }
            | Op::StackAddr { .. }
            | Op::FrameAddr
            | Op::Alloc { .. } => Some(Type::Ptr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_operands_include_indirect_target() {
        let op = Op::Call {
            callee: Callee::Indirect(InstId::new(3)),
            args: vec![InstId::new(1), InstId::new(2)],
        };
        assert_eq!(
            op.operands(),
            vec![InstId::new(3), InstId::new(1), InstId::new(2)]
        );
        assert!(op.writes_memory());
        assert!(!op.is_terminator());
    }

    #[test]
    fn test_switch_successors_are_deduplicated() {
        let op = Op::Switch {
            value: InstId::new(0),
            cases: vec![(1, BlockId::new(2)), (2, BlockId::new(2))],
            default: BlockId::new(3),
        };
        assert_eq!(op.successors(), vec![BlockId::new(2), BlockId::new(3)]);
        assert!(op.is_terminator());
    }

    #[test]
    fn test_operator_names() {
        assert_eq!(BinaryOp::Add.to_string(), "add");
        assert_eq!(CmpOp::Eq.to_string(), "eq");
        assert!(CmpOp::UGe.is_unsigned());
        assert!(!CmpOp::SLt.is_unsigned());
    }
}
