//! The evaluator terminates on every program under every budget.
//!
//! Runs end through widening, the loop iteration cap, the call depth limit or the budget.
//! Whichever applies, every visited node must end converged or bypassed.

use std::time::Duration;

use preeval::{
    analysis::{AbstractValue, JoinSemiLattice, NodeState},
    ir::{BinaryOp, Callee, CmpOp, FuncId, GlobalData, Program, ProgramBuilder, Type},
    Analysis, EvalConfig, Evaluator, NoOracle, Result,
};

const BUDGETS: [u64; 4] = [1, 10, 1000, 1_000_000];

fn settled(analysis: &Analysis) {
    assert!(
        analysis
            .nodes()
            .iter()
            .all(|state| state.is_terminal() || *state == NodeState::Unvisited),
        "{:?}",
        analysis.nodes()
    );
    assert!(!analysis.is_failed());
}

fn run(program: &Program, root: FuncId, args: Vec<AbstractValue>, config: EvalConfig) -> Result<Analysis> {
    let mut evaluator = Evaluator::new(program, &NoOracle, config)?;
    evaluator.analyze(root, args)
}

/// `loop { x = x + 1; *g = x }` with no exit.
fn infinite_loop() -> Result<(Program, FuncId)> {
    let mut pb = ProgramBuilder::new();
    let g = pb.add_global(GlobalData::new("g", 8));
    let spin = pb.declare("spin", &[], Some(Type::I64));
    let mut fb = pb.function(spin)?;
    let entry = fb.entry();
    let header = fb.block();
    let zero = fb.iconst(Type::I64, 0);
    fb.jump(header);

    fb.position_at(header);
    let x = fb.phi(Type::I64);
    let one = fb.iconst(Type::I64, 1);
    let next = fb.add(Type::I64, x, one);
    let p = fb.global_addr(g, 0);
    fb.store(p, next);
    fb.jump(header);
    fb.add_incoming(x, entry, zero);
    fb.add_incoming(x, header, next);
    pb.define(fb)?;
    Ok((pb.build()?, spin))
}

/// `for i in 0..n { for j in 0..i { acc = acc + j } }; return acc`
fn nested_loops() -> Result<(Program, FuncId)> {
    let mut pb = ProgramBuilder::new();
    let sum = pb.declare("sum", &[Type::I64], Some(Type::I64));
    let mut fb = pb.function(sum)?;
    let entry = fb.entry();
    let outer = fb.block();
    let inner = fb.block();
    let inner_body = fb.block();
    let outer_latch = fb.block();
    let exit = fb.block();
    let n = fb.arg(0);
    let zero = fb.iconst(Type::I64, 0);
    fb.jump(outer);

    fb.position_at(outer);
    let i = fb.phi(Type::I64);
    let acc = fb.phi(Type::I64);
    let more = fb.cmp(CmpOp::SLt, i, n);
    fb.branch(more, inner, exit);

    fb.position_at(inner);
    let j = fb.phi(Type::I64);
    let inner_acc = fb.phi(Type::I64);
    let inner_more = fb.cmp(CmpOp::SLt, j, i);
    fb.branch(inner_more, inner_body, outer_latch);

    fb.position_at(inner_body);
    let one = fb.iconst(Type::I64, 1);
    let bumped = fb.add(Type::I64, inner_acc, j);
    let next_j = fb.add(Type::I64, j, one);
    fb.jump(inner);

    fb.position_at(outer_latch);
    let step = fb.iconst(Type::I64, 1);
    let next_i = fb.add(Type::I64, i, step);
    fb.jump(outer);

    fb.position_at(exit);
    fb.ret(Some(acc));

    fb.add_incoming(i, entry, zero);
    fb.add_incoming(i, outer_latch, next_i);
    fb.add_incoming(acc, entry, zero);
    fb.add_incoming(acc, outer_latch, inner_acc);
    fb.add_incoming(j, outer, zero);
    fb.add_incoming(j, inner_body, next_j);
    fb.add_incoming(inner_acc, outer, acc);
    fb.add_incoming(inner_acc, inner_body, bumped);
    pb.define(fb)?;
    Ok((pb.build()?, sum))
}

/// `fib(n) = if n < 2 { n } else { fib(n - 1) + fib(n - 2) }`
fn fibonacci() -> Result<(Program, FuncId)> {
    let mut pb = ProgramBuilder::new();
    let fib = pb.declare("fib", &[Type::I64], Some(Type::I64));
    let mut fb = pb.function(fib)?;
    let base = fb.block();
    let recurse = fb.block();
    let n = fb.arg(0);
    let two = fb.iconst(Type::I64, 2);
    let small = fb.cmp(CmpOp::SLt, n, two);
    fb.branch(small, base, recurse);

    fb.position_at(base);
    fb.ret(Some(n));

    fb.position_at(recurse);
    let one = fb.iconst(Type::I64, 1);
    let n1 = fb.binary(BinaryOp::Sub, Type::I64, n, one);
    let n2 = fb.binary(BinaryOp::Sub, Type::I64, n, two);
    let a = fb.call(Callee::Direct(fib), &[n1], Some(Type::I64));
    let b = fb.call(Callee::Direct(fib), &[n2], Some(Type::I64));
    let total = fb.add(Type::I64, a, b);
    fb.ret(Some(total));
    pb.define(fb)?;
    Ok((pb.build()?, fib))
}

/// `ping(n) = pong(n + 1)` and `pong(n) = ping(n * 2)`, with no base case.
fn mutual_recursion() -> Result<(Program, FuncId)> {
    let mut pb = ProgramBuilder::new();
    let ping = pb.declare("ping", &[Type::I64], Some(Type::I64));
    let pong = pb.declare("pong", &[Type::I64], Some(Type::I64));

    let mut fb = pb.function(ping)?;
    let n = fb.arg(0);
    let one = fb.iconst(Type::I64, 1);
    let next = fb.add(Type::I64, n, one);
    let r = fb.call(Callee::Direct(pong), &[next], Some(Type::I64));
    fb.ret(Some(r));
    pb.define(fb)?;

    let mut fb = pb.function(pong)?;
    let n = fb.arg(0);
    let two = fb.iconst(Type::I64, 2);
    let next = fb.binary(BinaryOp::Mul, Type::I64, n, two);
    let r = fb.call(Callee::Direct(ping), &[next], Some(Type::I64));
    fb.ret(Some(r));
    pb.define(fb)?;
    Ok((pb.build()?, ping))
}

#[test]
fn test_infinite_loop_under_every_budget() -> Result<()> {
    let (program, spin) = infinite_loop()?;
    for steps in BUDGETS {
        let analysis = run(&program, spin, vec![], EvalConfig::default().with_step_budget(steps))?;
        settled(&analysis);
        assert!(analysis.root_summary().is_none(), "spin never returns");
        assert!(analysis.nodes().iter().any(|state| *state != NodeState::Unvisited));
    }
    Ok(())
}

#[test]
fn test_nested_loops_under_every_budget() -> Result<()> {
    let (program, sum) = nested_loops()?;
    for steps in BUDGETS {
        let config = EvalConfig::default().with_step_budget(steps);
        let analysis = run(&program, sum, vec![AbstractValue::unknown_int()], config)?;
        settled(&analysis);
        let ret = analysis.root_summary().expect("sum returns").return_value().clone();
        assert!(AbstractValue::Integer(0).leq(&ret), "budget {steps}: {ret}");
    }
    Ok(())
}

#[test]
fn test_nested_loops_with_known_bound() -> Result<()> {
    let (program, sum) = nested_loops()?;
    let analysis = run(&program, sum, vec![AbstractValue::Integer(4)], EvalConfig::precise())?;
    settled(&analysis);
    let ret = analysis.root_summary().expect("sum returns").return_value().clone();
    // 0 + (0) + (0 + 1) + (0 + 1 + 2)
    assert!(AbstractValue::Integer(4).leq(&ret), "{ret}");
    Ok(())
}

#[test]
fn test_single_loop_pass() -> Result<()> {
    let (program, sum) = nested_loops()?;
    let config = EvalConfig::default()
        .with_loop_iteration_cap(1)
        .with_widen_after(0);
    let analysis = run(&program, sum, vec![AbstractValue::unknown_int()], config)?;
    settled(&analysis);
    assert!(analysis.nodes().contains(&NodeState::Bypassed));
    assert!(analysis.stats().nodes_bypassed >= 1);

    let summary = analysis.root_summary().expect("sum returns");
    assert!(!summary.bypassed_nodes().is_empty());
    for &node in summary.bypassed_nodes() {
        assert_eq!(analysis.nodes()[node], NodeState::Bypassed);
    }
    Ok(())
}

#[test]
fn test_binary_recursion_under_every_budget() -> Result<()> {
    let (program, fib) = fibonacci()?;
    for steps in BUDGETS {
        let config = EvalConfig::default()
            .with_step_budget(steps)
            .with_max_call_depth(10);
        let analysis = run(&program, fib, vec![AbstractValue::unknown_int()], config)?;
        settled(&analysis);
        assert!(analysis.stats().frames_pushed <= steps + 1);
    }
    Ok(())
}

#[test]
fn test_recursion_with_known_argument() -> Result<()> {
    let (program, fib) = fibonacci()?;
    let analysis = run(&program, fib, vec![AbstractValue::Integer(10)], EvalConfig::default())?;
    settled(&analysis);
    let ret = analysis.root_summary().expect("fib returns").return_value().clone();
    assert!(AbstractValue::Integer(55).leq(&ret), "{ret}");
    Ok(())
}

#[test]
fn test_mutual_recursion_hits_the_depth_limit() -> Result<()> {
    let (program, ping) = mutual_recursion()?;
    for depth in [1, 4, 32] {
        let config = EvalConfig::default().with_max_call_depth(depth);
        let analysis = run(&program, ping, vec![AbstractValue::Integer(1)], config)?;
        settled(&analysis);
        assert!(analysis.stats().calls_approximated >= 1);
        assert!(analysis.stats().frames_pushed <= depth as u64 + 1);
    }
    Ok(())
}

#[test]
fn test_time_budget_ends_the_run() -> Result<()> {
    let (program, fib) = fibonacci()?;
    let config = EvalConfig::precise()
        .with_step_budget(u64::MAX)
        .with_time_budget(Duration::from_millis(50));
    let analysis = run(&program, fib, vec![AbstractValue::unknown_int()], config)?;
    settled(&analysis);
    Ok(())
}

#[test]
fn test_one_evaluator_survives_exhaustion() -> Result<()> {
    let (program, sum) = nested_loops()?;
    let mut evaluator = Evaluator::new(&program, &NoOracle, EvalConfig::minimal())?;
    for _ in 0..3 {
        let analysis = evaluator.analyze(sum, vec![AbstractValue::unknown_int()])?;
        settled(&analysis);
        assert!(analysis.stats().budget_exhausted);
    }
    assert!(evaluator.budget().is_exhausted());
    Ok(())
}
