// benches/spawn_bench.rs
//! Spawn latency and throughput

use agent_weave::{from_fn, AgentContext, AgentRuntime, RuntimeConfig, Step};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn started_runtime() -> AgentRuntime {
    let runtime = AgentRuntime::new(RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();
    runtime
}

fn spawn_single_agent(c: &mut Criterion) {
    let runtime = started_runtime();

    c.bench_function("spawn_single_agent", |b| {
        b.iter(|| {
            let handle = runtime
                .spawn(from_fn(|_: &mut AgentContext<'_, u64>| Ok(Step::Done)))
                .unwrap();
            black_box(handle);
        });
    });

    runtime.stop();
}

fn spawn_and_complete(c: &mut Criterion) {
    let runtime = started_runtime();
    let mut group = c.benchmark_group("spawn_and_complete");

    for count in [100usize, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let done = Arc::new(AtomicUsize::new(0));
                for _ in 0..count {
                    let done = Arc::clone(&done);
                    runtime
                        .spawn(from_fn(move |_: &mut AgentContext<'_, u64>| {
                            done.fetch_add(1, Ordering::Relaxed);
                            Ok(Step::Done)
                        }))
                        .unwrap();
                }
                while done.load(Ordering::Relaxed) < count {
                    std::hint::spin_loop();
                }
            });
        });
    }

    group.finish();
    runtime.stop();
}

criterion_group!(benches, spawn_single_agent, spawn_and_complete);
criterion_main!(benches);
