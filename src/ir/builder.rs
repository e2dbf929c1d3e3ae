//! Incremental construction and verification of programs.
//!
//! # Examples
//!
//! ```rust,ignore
//! use preeval::ir::{ProgramBuilder, Type};
//!
//! let mut program = ProgramBuilder::new();
//! let answer = program.declare("answer", &[], Some(Type::I64));
//!
//! let mut f = program.function(answer)?;
//! let c = f.iconst(Type::I64, 42);
//! f.ret(Some(c));
//! program.define(f)?;
//!
//! let program = program.build()?;
//! ```

use crate::{
    ir::{
        BinaryOp, BlockId, Callee, CmpOp, Constant, ExternId, ExternSymbol, FuncId, Function,
        GlobalData, GlobalId, InitValue, Inst, InstId, Op, Program, SlotId, StackSlot, Type,
        UnaryOp,
    },
    Error, Result,
};

/// Builds a [`Program`] from declared functions, globals and external symbols.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    funcs: Vec<Option<Function>>,
    signatures: Vec<(String, Vec<Type>, Option<Type>)>,
    globals: Vec<GlobalData>,
    externs: Vec<ExternSymbol>,
}

impl ProgramBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a global data object.
    pub fn add_global(&mut self, global: GlobalData) -> GlobalId {
        self.globals.push(global);
        GlobalId::new(self.globals.len() - 1)
    }

    /// Declares an external symbol.
    pub fn add_extern(&mut self, name: impl Into<String>) -> ExternId {
        self.externs.push(ExternSymbol { name: name.into() });
        ExternId::new(self.externs.len() - 1)
    }

    /// Declares a function so it can be referenced before its body is built.
    pub fn declare(&mut self, name: impl Into<String>, params: &[Type], ret: Option<Type>) -> FuncId {
        self.signatures.push((name.into(), params.to_vec(), ret));
        self.funcs.push(None);
        FuncId::new(self.funcs.len() - 1)
    }

    /// Starts building the body of a declared function. The entry block is created and
    /// selected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFunction`] if `id` was not declared by this builder.
    pub fn function(&self, id: FuncId) -> Result<FunctionBuilder> {
        let (name, params, ret) = self
            .signatures
            .get(id.index())
            .ok_or(Error::UnknownFunction(id))?;
        let mut func = Function::new(id, name.clone(), params.clone(), *ret);
        let entry = func.add_block();
        Ok(FunctionBuilder {
            func,
            current: entry,
        })
    }

    /// Installs a finished function body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistent`] if the function is already defined.
    pub fn define(&mut self, builder: FunctionBuilder) -> Result<()> {
        let id = builder.func.id();
        let slot = self
            .funcs
            .get_mut(id.index())
            .ok_or(Error::UnknownFunction(id))?;
        if slot.is_some() {
            return Err(consistency_error!("function {} defined twice", id));
        }
        *slot = Some(builder.func);
        Ok(())
    }

    /// Verifies every function and returns the finished program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistent`] for undefined functions, blocks without a trailing
    /// terminator, dangling ids, or constants that do not fit their type.
    pub fn build(self) -> Result<Program> {
        let mut funcs = Vec::with_capacity(self.funcs.len());
        for (index, func) in self.funcs.into_iter().enumerate() {
            let Some(func) = func else {
                return Err(consistency_error!(
                    "function {} declared but never defined",
                    FuncId::new(index)
                ));
            };
            funcs.push(func);
        }

        let mut program = Program {
            funcs,
            globals: self.globals,
            externs: self.externs,
        };
        for func in &mut program.funcs {
            func.rebuild_edges();
        }
        for func in &program.funcs {
            verify_function(&program, func)?;
        }
        for (index, global) in program.globals.iter().enumerate() {
            verify_global(&program, GlobalId::new(index), global)?;
        }
        Ok(program)
    }
}

/// Appends instructions to one function body.
///
/// Instructions go to the current block, selected with [`FunctionBuilder::position_at`].
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
}

impl FunctionBuilder {
    /// The function being built.
    #[must_use]
    pub fn id(&self) -> FuncId {
        self.func.id()
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    /// The block instructions are currently appended to.
    #[must_use]
    pub fn current(&self) -> BlockId {
        self.current
    }

    /// Creates a new, empty block without selecting it.
    pub fn block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Selects the block subsequent instructions are appended to.
    pub fn position_at(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Adds a stack slot allocated on every activation.
    pub fn add_slot(&mut self, size: u64, align: u32) -> SlotId {
        self.func.add_slot(StackSlot { size, align })
    }

    /// Appends a raw instruction to the current block.
    pub fn push(&mut self, op: Op, ty: Option<Type>) -> InstId {
        let ty = op.fixed_type().or(ty);
        let id = self.func.add_inst(Inst { op, ty });
        if let Some(block) = self.func.block_mut(self.current) {
            block.push(id);
        }
        id
    }

    /// The `index`th argument, typed from the signature.
    pub fn arg(&mut self, index: usize) -> InstId {
        let ty = self.func.params().get(index).copied();
        self.push(Op::Arg { index }, ty)
    }

    /// Integer constant of type `ty`.
    pub fn iconst(&mut self, ty: Type, value: i64) -> InstId {
        self.push(
            Op::Const {
                value: Constant::Int(value),
            },
            Some(ty),
        )
    }

    /// Float constant.
    pub fn fconst(&mut self, value: f64) -> InstId {
        self.push(
            Op::Const {
                value: Constant::Float(value),
            },
            Some(Type::F64),
        )
    }

    /// The null pointer.
    pub fn null(&mut self) -> InstId {
        self.push(
            Op::Const {
                value: Constant::Null,
            },
            Some(Type::Ptr),
        )
    }

    /// An undefined value of type `ty`.
    pub fn undef(&mut self, ty: Type) -> InstId {
        self.push(Op::Undef, Some(ty))
    }

    /// Address of `global` plus `offset`.
    pub fn global_addr(&mut self, global: GlobalId, offset: i64) -> InstId {
        self.push(Op::GlobalAddr { global, offset }, None)
    }

    /// Address of `symbol` plus `offset`.
    pub fn extern_addr(&mut self, symbol: ExternId, offset: i64) -> InstId {
        self.push(Op::ExternAddr { symbol, offset }, None)
    }

    /// Address of a function.
    pub fn func_addr(&mut self, func: FuncId) -> InstId {
        self.push(Op::FuncAddr { func }, None)
    }

    /// Address of a block of this function.
    pub fn block_addr(&mut self, block: BlockId) -> InstId {
        self.push(Op::BlockAddr { block }, None)
    }

    /// Address of a stack slot plus `offset`.
    pub fn stack_addr(&mut self, slot: SlotId, offset: i64) -> InstId {
        self.push(Op::StackAddr { slot, offset }, None)
    }

    /// Address of the current frame.
    pub fn frame_addr(&mut self) -> InstId {
        self.push(Op::FrameAddr, None)
    }

    /// Unary operation producing `ty`.
    pub fn unary(&mut self, op: UnaryOp, ty: Type, operand: InstId) -> InstId {
        self.push(Op::Unary { op, operand }, Some(ty))
    }

    /// Binary operation producing `ty`.
    pub fn binary(&mut self, op: BinaryOp, ty: Type, lhs: InstId, rhs: InstId) -> InstId {
        self.push(Op::Binary { op, lhs, rhs }, Some(ty))
    }

    /// Shorthand for an integer or pointer addition.
    pub fn add(&mut self, ty: Type, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(BinaryOp::Add, ty, lhs, rhs)
    }

    /// Comparison producing an `I1`.
    pub fn cmp(&mut self, op: CmpOp, lhs: InstId, rhs: InstId) -> InstId {
        self.push(Op::Cmp { op, lhs, rhs }, None)
    }

    /// `cond ? if_true : if_false`.
    pub fn select(&mut self, ty: Type, cond: InstId, if_true: InstId, if_false: InstId) -> InstId {
        self.push(
            Op::Select {
                cond,
                if_true,
                if_false,
            },
            Some(ty),
        )
    }

    /// A phi with no incoming values yet, see [`FunctionBuilder::add_incoming`].
    pub fn phi(&mut self, ty: Type) -> InstId {
        self.push(
            Op::Phi {
                incoming: Vec::new(),
            },
            Some(ty),
        )
    }

    /// Adds an incoming `(pred, value)` pair to `phi`. Ignored if `phi` is not a phi.
    pub fn add_incoming(&mut self, phi: InstId, pred: BlockId, value: InstId) {
        if let Some(Inst {
            op: Op::Phi { incoming },
            ..
        }) = self.func.inst_mut(phi)
        {
            incoming.push((pred, value));
        }
    }

    /// Load a value of type `ty` from `addr`.
    pub fn load(&mut self, ty: Type, addr: InstId) -> InstId {
        self.push(Op::Load { addr }, Some(ty))
    }

    /// Store `value` to `addr`.
    pub fn store(&mut self, addr: InstId, value: InstId) -> InstId {
        self.push(Op::Store { addr, value }, None)
    }

    /// Heap allocation of `size` bytes (`None` for an unknown size).
    pub fn alloc(&mut self, size: Option<InstId>, zeroed: bool) -> InstId {
        self.push(Op::Alloc { size, zeroed }, None)
    }

    /// Release a heap allocation.
    pub fn free(&mut self, addr: InstId) -> InstId {
        self.push(Op::Free { addr }, None)
    }

    /// Call `callee` with `args`. `ret` is the result type, if any.
    pub fn call(&mut self, callee: Callee, args: &[InstId], ret: Option<Type>) -> InstId {
        self.push(
            Op::Call {
                callee,
                args: args.to_vec(),
            },
            ret,
        )
    }

    /// Unconditional jump.
    pub fn jump(&mut self, target: BlockId) -> InstId {
        self.push(Op::Jump { target }, None)
    }

    /// Two-way conditional branch.
    pub fn branch(&mut self, cond: InstId, if_true: BlockId, if_false: BlockId) -> InstId {
        self.push(
            Op::Branch {
                cond,
                if_true,
                if_false,
            },
            None,
        )
    }

    /// Multi-way branch.
    pub fn switch(&mut self, value: InstId, cases: &[(i64, BlockId)], default: BlockId) -> InstId {
        self.push(
            Op::Switch {
                value,
                cases: cases.to_vec(),
                default,
            },
            None,
        )
    }

    /// Computed jump to one of `targets`.
    pub fn jump_indirect(&mut self, addr: InstId, targets: &[BlockId]) -> InstId {
        self.push(
            Op::JumpIndirect {
                addr,
                targets: targets.to_vec(),
            },
            None,
        )
    }

    /// Return from the function.
    pub fn ret(&mut self, value: Option<InstId>) -> InstId {
        self.push(Op::Return { value }, None)
    }

    /// Unreachable terminator.
    pub fn trap(&mut self) -> InstId {
        self.push(Op::Trap, None)
    }
}

fn verify_function(program: &Program, func: &Function) -> Result<()> {
    let name = func.name();
    let mut owner = vec![None; func.inst_count()];

    for (block_id, block) in func.blocks() {
        let insts = block.insts();
        let Some((&last, body)) = insts.split_last() else {
            return Err(consistency_error!("{}: block {} is empty", name, block_id));
        };
        for &inst in insts {
            let slot = owner
                .get_mut(inst.index())
                .ok_or_else(|| consistency_error!("{}: dangling instruction {}", name, inst))?;
            if slot.replace(block_id).is_some() {
                return Err(consistency_error!("{}: {} placed twice", name, inst));
            }
        }
        if body
            .iter()
            .any(|i| func.inst(*i).is_some_and(|inst| inst.op.is_terminator()))
        {
            return Err(consistency_error!(
                "{}: block {} has a terminator before its end",
                name,
                block_id
            ));
        }
        if !func.inst(last).is_some_and(|inst| inst.op.is_terminator()) {
            return Err(consistency_error!(
                "{}: block {} does not end in a terminator",
                name,
                block_id
            ));
        }
    }

    for (id, inst) in func.insts() {
        verify_inst(program, func, id, inst)?;
    }
    Ok(())
}

fn verify_inst(program: &Program, func: &Function, id: InstId, inst: &Inst) -> Result<()> {
    let name = func.name();
    for operand in inst.op.operands() {
        let defines_value = func
            .inst(operand)
            .is_some_and(|def| def.ty.is_some());
        if !defines_value {
            return Err(consistency_error!(
                "{}: {} uses {} which defines no value",
                name,
                id,
                operand
            ));
        }
    }

    let block_ok = |block: &BlockId| block.index() < func.block_count();
    let bad_block = inst.op.successors().iter().any(|b| !block_ok(b))
        || matches!(&inst.op, Op::BlockAddr { block } if !block_ok(block))
        || matches!(&inst.op, Op::Phi { incoming } if incoming.iter().any(|(b, _)| !block_ok(b)));
    if bad_block {
        return Err(consistency_error!("{}: {} targets a dangling block", name, id));
    }

    match &inst.op {
        Op::Arg { index } if *index >= func.params().len() => Err(consistency_error!(
            "{}: {} reads argument {} of {}",
            name,
            id,
            index,
            func.params().len()
        )),
        Op::Const { value } => {
            let fits = match (value, inst.ty) {
                (Constant::Int(_), Some(ty)) => ty.is_integer() || ty.is_pointer(),
                (Constant::Float(_), Some(ty)) => ty.is_float(),
                (Constant::Null, Some(ty)) => ty.is_pointer(),
                (_, None) => false,
            };
            if fits {
                Ok(())
            } else {
                Err(consistency_error!("{}: {} constant does not fit its type", name, id))
            }
        }
        Op::GlobalAddr { global, .. } if global.index() >= program.global_count() => {
            Err(consistency_error!("{}: {} references {}", name, id, global))
        }
        Op::ExternAddr { symbol, .. } if symbol.index() >= program.extern_count() => {
            Err(consistency_error!("{}: {} references {}", name, id, symbol))
        }
        Op::FuncAddr { func: target } if target.index() >= program.func_count() => {
            Err(consistency_error!("{}: {} references {}", name, id, target))
        }
        Op::StackAddr { slot, .. } if func.slot(*slot).is_none() => {
            Err(consistency_error!("{}: {} references {}", name, id, slot))
        }
        Op::Call { callee, args } => match callee {
            Callee::Direct(target) => {
                let callee = program.func(*target)?;
                if callee.params().len() == args.len() {
                    Ok(())
                } else {
                    Err(consistency_error!(
                        "{}: {} passes {} arguments to {} expecting {}",
                        name,
                        id,
                        args.len(),
                        callee.name(),
                        callee.params().len()
                    ))
                }
            }
            Callee::Extern(symbol) if symbol.index() >= program.extern_count() => {
                Err(consistency_error!("{}: {} calls {}", name, id, symbol))
            }
            _ => Ok(()),
        },
        Op::Return { value } if value.is_some() != func.ret().is_some() => Err(consistency_error!(
            "{}: {} return value does not match the signature",
            name,
            id
        )),
        _ => Ok(()),
    }
}

fn verify_global(program: &Program, id: GlobalId, global: &GlobalData) -> Result<()> {
    for (offset, value) in &global.init {
        if offset + value.size() > global.size {
            return Err(consistency_error!(
                "global {} initializer at {} exceeds its size {}",
                id,
                offset,
                global.size
            ));
        }
        let dangling = match value {
            InitValue::Global { global, .. } => global.index() >= program.global_count(),
            InitValue::Extern { symbol, .. } => symbol.index() >= program.extern_count(),
            InitValue::Func(func) => func.index() >= program.func_count(),
            InitValue::Int { .. } | InitValue::Float(_) => false,
        };
        if dangling {
            return Err(consistency_error!("global {} initializer is dangling", id));
        }
    }
    Ok(())
}
