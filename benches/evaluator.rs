#![allow(unused)]
extern crate preeval;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use preeval::prelude::*;
use std::hint::black_box;

/// `loops` consecutive counted loops, each storing its counter into a fresh allocation.
fn loop_program(loops: usize) -> (Program, FuncId) {
    let mut pb = ProgramBuilder::new();
    let root = pb.declare("loops", &[Type::I64], Some(Type::I64));
    let mut fb = pb.function(root).unwrap();
    let n = fb.arg(0);
    let zero = fb.iconst(Type::I64, 0);
    let mut acc = zero;
    let mut pred = fb.entry();

    for _ in 0..loops {
        let header = fb.block();
        let body = fb.block();
        let next_block = fb.block();
        let obj = fb.alloc(None, true);
        fb.jump(header);

        fb.position_at(header);
        let i = fb.phi(Type::I64);
        let more = fb.cmp(CmpOp::SLt, i, n);
        fb.branch(more, body, next_block);

        fb.position_at(body);
        fb.store(obj, i);
        let one = fb.iconst(Type::I64, 1);
        let next = fb.add(Type::I64, i, one);
        fb.jump(header);
        fb.add_incoming(i, pred, acc);
        fb.add_incoming(i, body, next);

        fb.position_at(next_block);
        acc = fb.load(Type::I64, obj);
        pred = next_block;
    }
    fb.ret(Some(acc));
    pb.define(fb).unwrap();
    (pb.build().unwrap(), root)
}

/// A chain of `depth` functions, each calling the next one twice.
fn call_program(depth: usize) -> (Program, FuncId) {
    let mut pb = ProgramBuilder::new();
    let g = pb.add_global(GlobalData::new("g", 8));
    let funcs: Vec<FuncId> = (0..depth)
        .map(|level| pb.declare(format!("level{level}"), &[Type::I64], Some(Type::I64)))
        .collect();

    for (level, func) in funcs.iter().enumerate() {
        let mut fb = pb.function(*func).unwrap();
        let x = fb.arg(0);
        let ret = match funcs.get(level + 1) {
            Some(next) => {
                let one = fb.iconst(Type::I64, 1);
                let left = fb.call(Callee::Direct(*next), &[x], Some(Type::I64));
                let bumped = fb.add(Type::I64, x, one);
                let right = fb.call(Callee::Direct(*next), &[bumped], Some(Type::I64));
                fb.add(Type::I64, left, right)
            }
            None => {
                let p = fb.global_addr(g, 0);
                fb.store(p, x);
                x
            }
        };
        fb.ret(Some(ret));
        pb.define(fb).unwrap();
    }
    (pb.build().unwrap(), funcs[0])
}

fn bench_loops(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator_loops");
    for loops in [4, 16, 64] {
        let (program, root) = loop_program(loops);
        group.throughput(Throughput::Elements(loops as u64));
        for (name, value) in [
            ("known", AbstractValue::Integer(100)),
            ("unknown", AbstractValue::unknown_int()),
        ] {
            group.bench_with_input(BenchmarkId::new(name, loops), &value, |b, value| {
                b.iter(|| {
                    let mut evaluator =
                        Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
                    black_box(evaluator.analyze(root, vec![value.clone()]).unwrap())
                });
            });
        }
    }
    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator_calls");
    for depth in [4, 8, 12] {
        let (program, root) = call_program(depth);
        group.throughput(Throughput::Elements(1 << depth));
        group.bench_function(BenchmarkId::from_parameter(depth), |b| {
            b.iter(|| {
                let mut evaluator =
                    Evaluator::new(&program, &NoOracle, EvalConfig::default()).unwrap();
                black_box(
                    evaluator
                        .analyze(root, vec![AbstractValue::Integer(0)])
                        .unwrap(),
                )
            });
        });
    }
    group.finish();
}

fn bench_scheduler(c: &mut Criterion) {
    let (program, _) = call_program(10);
    c.bench_function("scheduler_run_all", |b| {
        b.iter(|| {
            let scheduler =
                AnalysisScheduler::new(&program, &NoOracle, EvalConfig::fast()).unwrap();
            black_box(scheduler.run_all().unwrap())
        });
    });
}

criterion_group!(benches, bench_loops, bench_calls, bench_scheduler);
criterion_main!(benches);
