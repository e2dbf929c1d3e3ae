//! The loop/call approximator.
//!
//! When a loop cannot be iterated to a fixpoint, or a call cannot be entered, the driver
//! replaces the precise simulation by one conservative step computed here:
//!
//! 1. collect the *roots*: pointers flowing into the region, addresses formed inside it,
//!    globals its callees reference, and everything external code can see if it calls out;
//! 2. close the roots over the heap to get the *taint*, every object the region may touch;
//! 3. fold every tainted object's slots into its overflow together with whatever the region
//!    may store (skipped when the region provably stores nothing);
//! 4. assign region-defined values their least informative value of the right type.
//!
//! Objects outside the taint are left exactly as they were.

use std::collections::BTreeMap;

use log::debug;

use crate::{
    analysis::{
        flow::{EvalNode, StoredKinds},
        refs::{FunctionRefs, ProgramRefs},
        AbstractValue, Address, HeapContext, JoinSemiLattice, ObjectId, PointerSet,
    },
    ir::{Function, Op, Type},
    Result,
};

/// Value of the operations whose result depends on nothing but the active frame:
/// constants, address constants and arguments. `None` for every other operation.
///
/// # Errors
///
/// Returns [`crate::Error::Inconsistent`] if no frame is live or a stack slot is missing.
pub fn fixed_value(
    ctx: &HeapContext<'_>,
    function: &Function,
    op: &Op,
    ty: Option<Type>,
) -> Result<Option<AbstractValue>> {
    let pointer = |address| AbstractValue::Pointer(PointerSet::single(address));
    let value = match op {
        Op::Const { value } => AbstractValue::from_constant(*value, ty.unwrap_or(Type::I64)),
        Op::Undef => AbstractValue::Undefined,
        Op::Arg { index } => ctx.frame()?.arg(*index),
        Op::GlobalAddr { global, offset } => pointer(Address::Object {
            id: ObjectId::of_global(*global),
            offset: *offset,
        }),
        Op::ExternAddr { symbol, offset } => pointer(Address::Extern {
            symbol: *symbol,
            offset: *offset,
        }),
        Op::FuncAddr { func } => pointer(Address::Func(*func)),
        Op::BlockAddr { block } => pointer(Address::Block(function.id(), *block)),
        Op::StackAddr { slot, offset } => ctx.slot_address(*slot, *offset)?,
        Op::FrameAddr => ctx.frame_address()?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// The least informative value of an instruction result of type `ty`.
fn unknown_of(ty: Type, taint: Option<&PointerSet>) -> AbstractValue {
    match ty {
        Type::Ptr => taint.map_or(AbstractValue::Top, |set| AbstractValue::nullable(set.clone())),
        Type::I1 => AbstractValue::unknown_bool(),
        Type::F64 => AbstractValue::Top,
        _ => AbstractValue::unknown_int(),
    }
}

/// Every object, materializing the globals first.
fn everything(ctx: &mut HeapContext<'_>) -> Result<Vec<ObjectId>> {
    ctx.materialize_globals()?;
    Ok(ctx.objects().map(|(id, _)| id).collect())
}

fn ranges(ids: &[ObjectId]) -> PointerSet {
    ids.iter().map(|&id| Address::ObjectRange(id)).collect()
}

/// Applies a call into code the evaluator knows nothing about.
///
/// Everything reachable from the arguments, the globals and previously exposed objects may
/// be read, overwritten with anything, and retained by the callee.
///
/// # Errors
///
/// Returns [`crate::Error::Inconsistent`] if a reference dangles.
pub fn opaque_call(
    ctx: &mut HeapContext<'_>,
    args: &[AbstractValue],
    ret: Option<Type>,
) -> Result<AbstractValue> {
    let touched = if args.iter().any(AbstractValue::may_hide_pointers) {
        everything(ctx)?
    } else {
        let mut roots: PointerSet = ctx.global_ids().map(Address::ObjectRange).collect();
        for id in ctx.exposed() {
            roots.insert(Address::ObjectRange(id));
        }
        for arg in args {
            if let Some(set) = arg.pointers() {
                roots = roots.join(set);
            }
        }
        ctx.closure(&roots)?.into_iter().collect()
    };

    debug!("opaque call widens {} objects", touched.len());
    ctx.expose_objects(touched.iter().copied())?;
    for id in &touched {
        ctx.store_imprecise(*id, AbstractValue::Top)?;
    }
    Ok(ret.map_or(AbstractValue::Bottom, |ty| unknown_of(ty, None)))
}

/// Applies a call to a function of the program without entering it, bounded by the
/// callee's transitive reference summary.
///
/// # Errors
///
/// Returns [`crate::Error::Inconsistent`] if a reference dangles.
pub fn summarized_call(
    ctx: &mut HeapContext<'_>,
    refs: &FunctionRefs,
    args: &[AbstractValue],
    ret: Option<Type>,
) -> Result<AbstractValue> {
    if refs.calls_out() || args.iter().any(AbstractValue::may_hide_pointers) {
        return opaque_call(ctx, args, ret);
    }

    let mut created = Vec::with_capacity(refs.alloc_sites.len());
    for &(func, inst) in &refs.alloc_sites {
        created.push(ctx.allocate_summary(func, inst)?);
    }

    let mut roots = ranges(&created);
    for global in &refs.globals {
        roots.insert(Address::ObjectRange(ObjectId::of_global(*global)));
    }
    for arg in args {
        if let Some(set) = arg.pointers() {
            roots = roots.join(set);
        }
    }
    let touched: Vec<ObjectId> = ctx.closure(&roots)?.into_iter().collect();

    if refs.has_stores {
        debug!("summarized call widens {} objects", touched.len());
        for id in &touched {
            ctx.store_imprecise(*id, AbstractValue::Top)?;
        }
    }
    // Whatever the callee allocated and left reachable outlived its frame.
    ctx.mark_escaped(created.iter().copied())?;

    let Some(ty) = ret else {
        return Ok(AbstractValue::Bottom);
    };
    let mut taint = ranges(&touched).join(&roots.decay_data());
    for &func in &refs.funcs {
        taint.insert(Address::Func(func));
    }
    for &symbol in &refs.externs {
        taint.insert(Address::ExternRange(symbol));
    }
    for (_, object) in ctx.objects().filter(|(id, _)| touched.contains(id)) {
        taint = taint.join(&object.pointers().decay_data());
    }
    Ok(unknown_of(ty, Some(&taint)))
}

/// Applies the effect of an evaluation-graph node without simulating it.
///
/// `ctx` is the joined state on entry to the node. On return every value the node defines
/// has a conservative value in the active frame, and every object the node may touch has
/// been weakened.
///
/// # Errors
///
/// Returns [`crate::Error::Inconsistent`] if a reference dangles or no frame is live.
pub fn approximate_region(
    ctx: &mut HeapContext<'_>,
    function: &Function,
    node: &EvalNode,
    facts: &ProgramRefs,
) -> Result<()> {
    let effects = node.effects();
    let mut callees = FunctionRefs::default();
    for callee in &effects.callees {
        if let Some(refs) = facts.get(*callee) {
            callees.union_with(refs);
        }
    }
    let calls_out = effects.calls_out || callees.calls_out();
    let stores = effects.stores || callees.has_stores;

    let mut sites = BTreeMap::new();
    for &inst in &effects.allocs {
        sites.insert(inst, ctx.allocate_summary(function.id(), inst)?);
    }
    let created: Vec<ObjectId> = sites.values().copied().collect();
    let mut foreign = Vec::new();
    for &(func, inst) in &callees.alloc_sites {
        foreign.push(ctx.allocate_summary(func, inst)?);
    }

    let mut roots = ranges(&created).join(&ranges(&foreign));
    let mut unknown = false;
    for &inst in node.insts() {
        let Some(data) = function.inst(inst) else {
            continue;
        };
        let mut flowing: Vec<AbstractValue> = Vec::new();
        if let Some(value) = fixed_value(ctx, function, &data.op, data.ty)? {
            flowing.push(value);
        }
        for operand in data.op.operands() {
            if !node.defines(operand) {
                flowing.push(ctx.find(operand).cloned().unwrap_or(AbstractValue::Bottom));
            }
        }
        for value in flowing {
            unknown |= value.may_hide_pointers();
            if let Some(set) = value.pointers() {
                roots = roots.join(set);
            }
        }
    }
    for global in &callees.globals {
        roots.insert(Address::ObjectRange(ObjectId::of_global(*global)));
    }
    for &func in &callees.funcs {
        roots.insert(Address::Func(func));
    }
    for &symbol in &callees.externs {
        roots.insert(Address::ExternRange(symbol));
    }
    if calls_out {
        for id in ctx.global_ids().collect::<Vec<_>>() {
            roots.insert(Address::ObjectRange(id));
        }
        for id in ctx.exposed().collect::<Vec<_>>() {
            roots.insert(Address::ObjectRange(id));
        }
    }

    let touches_memory = stores || calls_out;
    let touched: Vec<ObjectId> = if unknown && touches_memory {
        everything(ctx)?
    } else {
        ctx.closure(&roots)?.into_iter().collect()
    };

    let mut taint = ranges(&touched).join(&roots.decay_data());
    for (_, object) in ctx.objects().filter(|(id, _)| touched.contains(id)) {
        taint = taint.join(&object.pointers().decay_data());
    }

    if touches_memory {
        let stored = if calls_out || callees.has_stores {
            AbstractValue::Top
        } else if effects.stored == StoredKinds::PTR {
            AbstractValue::nullable(taint.clone())
        } else if effects.stored == StoredKinds::INT {
            AbstractValue::unknown_int()
        } else {
            AbstractValue::Top
        };
        debug!(
            "bypassing node {} of {} widens {} objects with {}",
            node.index(),
            function.name(),
            touched.len(),
            stored
        );
        for id in &touched {
            ctx.store_imprecise(*id, stored.clone())?;
        }
        if calls_out {
            ctx.expose_objects(touched.iter().copied())?;
        }
    }
    ctx.mark_escaped(foreign.iter().copied())?;

    let opaque_results = calls_out || unknown;
    for &inst in node.insts() {
        let Some(data) = function.inst(inst) else {
            continue;
        };
        let Some(ty) = data.ty else {
            continue;
        };
        let value = match (fixed_value(ctx, function, &data.op, data.ty)?, sites.get(&inst)) {
            (Some(value), _) => value,
            (None, Some(&id)) => {
                AbstractValue::Pointer(PointerSet::single(Address::Object { id, offset: 0 }))
            }
            (None, None) if opaque_results && ty == Type::Ptr => AbstractValue::Top,
            (None, None) => unknown_of(ty, Some(&taint)),
        };
        ctx.define(inst, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::flow::EvalGraph,
        ir::{Callee, GlobalData, InstId, ProgramBuilder},
    };

    fn ptr(id: ObjectId, offset: i64) -> AbstractValue {
        AbstractValue::Pointer(PointerSet::single(Address::Object { id, offset }))
    }

    #[test]
    fn test_opaque_call_widens_reachable_objects() {
        let mut pb = ProgramBuilder::new();
        let g = pb.add_global(GlobalData::new("g", 8));
        let f = pb.declare("f", &[], None);
        let mut fb = pb.function(f).unwrap();
        fb.alloc(None, true);
        fb.alloc(None, true);
        fb.ret(None);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut ctx = HeapContext::new(&program, 256).unwrap();
        ctx.enter_frame(f, vec![]).unwrap();
        let passed = ctx.allocate(InstId::new(0), Some(8), true).unwrap();
        let private = ctx.allocate(InstId::new(1), Some(8), true).unwrap();
        ctx.store(&ptr(private, 0), AbstractValue::Integer(7), Type::I64)
            .unwrap();

        let result = opaque_call(&mut ctx, &[ptr(passed, 0)], Some(Type::I32)).unwrap();
        assert_eq!(result, AbstractValue::unknown_int());
        assert_eq!(
            ctx.load(&ptr(passed, 0), Type::I64).unwrap(),
            AbstractValue::Top
        );
        assert_eq!(
            ctx.load(&ptr(private, 0), Type::I64).unwrap(),
            AbstractValue::Integer(7)
        );
        let global = ObjectId::of_global(g);
        assert_eq!(
            ctx.load(&ptr(global, 0), Type::I64).unwrap(),
            AbstractValue::Top
        );
        assert!(ctx.exposed().any(|id| id == passed));
    }

    #[test]
    fn test_pure_callee_leaves_memory_alone() {
        let mut pb = ProgramBuilder::new();
        let f = pb.declare("f", &[], None);
        let mut fb = pb.function(f).unwrap();
        fb.alloc(None, true);
        fb.ret(None);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();

        let mut ctx = HeapContext::new(&program, 256).unwrap();
        ctx.enter_frame(f, vec![]).unwrap();
        let a = ctx.allocate(InstId::new(0), Some(8), true).unwrap();
        ctx.store(&ptr(a, 0), AbstractValue::Integer(3), Type::I64)
            .unwrap();

        let refs = FunctionRefs::default();
        let result = summarized_call(&mut ctx, &refs, &[ptr(a, 0)], Some(Type::I64)).unwrap();
        assert_eq!(result, AbstractValue::unknown_int());
        assert_eq!(
            ctx.load(&ptr(a, 0), Type::I64).unwrap(),
            AbstractValue::Integer(3)
        );
    }

    #[test]
    fn test_bypassed_loop_keeps_untouched_objects() {
        let mut pb = ProgramBuilder::new();
        let ext = pb.add_extern("sink");
        let f = pb.declare("f", &[Type::Ptr, Type::Ptr], None);
        let mut fb = pb.function(f).unwrap();
        let body = fb.block();
        let exit = fb.block();
        let written = fb.arg(0);
        fb.arg(1);
        fb.jump(body);

        fb.position_at(body);
        let seven = fb.iconst(Type::I64, 7);
        fb.store(written, seven);
        let c = fb.load(Type::I1, written);
        fb.branch(c, body, exit);

        fb.position_at(exit);
        fb.call(Callee::Extern(ext), &[], None);
        fb.ret(None);
        pb.define(fb).unwrap();
        let program = pb.build().unwrap();
        let function = program.func(f).unwrap();
        let graph = EvalGraph::build(function);
        let facts = ProgramRefs::compute(&program).unwrap();

        let mut ctx = HeapContext::new(&program, 256).unwrap();
        ctx.enter_frame(f, vec![]).unwrap();
        let a = ctx.allocate(InstId::new(0), Some(8), true).unwrap();
        let b = ctx.allocate(InstId::new(1), Some(8), true).unwrap();
        ctx.store(&ptr(a, 0), AbstractValue::Integer(1), Type::I64)
            .unwrap();
        ctx.store(&ptr(b, 0), AbstractValue::Integer(2), Type::I64)
            .unwrap();
        ctx.define(written, ptr(a, 0)).unwrap();

        let node = &graph.nodes()[1];
        assert!(node.is_cyclic());
        approximate_region(&mut ctx, function, node, &facts).unwrap();

        assert_eq!(
            ctx.load(&ptr(a, 0), Type::I64).unwrap(),
            AbstractValue::unknown_int()
        );
        assert_eq!(
            ctx.load(&ptr(b, 0), Type::I64).unwrap(),
            AbstractValue::Integer(2)
        );
        assert_eq!(ctx.find(seven), Some(&AbstractValue::Integer(7)));
        assert_eq!(ctx.find(c), Some(&AbstractValue::unknown_bool()));
    }
}
