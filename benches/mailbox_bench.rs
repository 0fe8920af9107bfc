// benches/mailbox_bench.rs
//! Mailbox, channel and signal throughput

use agent_weave::capability::Envelope;
use agent_weave::utils::config::MailboxConfig;
use agent_weave::{channel, from_fn, AgentContext, AgentRuntime, Mailbox, RuntimeConfig, Step};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn mailbox_enqueue_dequeue(c: &mut Criterion) {
    let mailbox: Mailbox<u64> = Mailbox::new(MailboxConfig::default()).unwrap();

    c.bench_function("mailbox_enqueue_dequeue", |b| {
        b.iter(|| {
            let envelope = Envelope::seal(black_box(42u64), None).unwrap();
            mailbox.enqueue(envelope).unwrap();
            black_box(mailbox.dequeue());
        });
    });
}

fn channel_send_recv(c: &mut Criterion) {
    let (tx, rx) = channel::<u64>(MailboxConfig::with_capacity(1024)).unwrap();
    let mut group = c.benchmark_group("channel");
    group.throughput(Throughput::Elements(512));

    group.bench_function("send_recv_512", |b| {
        b.iter(|| {
            for i in 0..512u64 {
                tx.send(i).unwrap();
            }
            while let Some(envelope) = rx.try_recv() {
                black_box(envelope);
            }
        });
    });

    group.finish();
}

fn signal_to_agent(c: &mut Criterion) {
    let runtime = AgentRuntime::new(RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let handle = runtime
        .spawn(from_fn(move |ctx: &mut AgentContext<'_, u64>| {
            while ctx.recv_message().is_some() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Step::Wait)
        }))
        .unwrap();

    let mut group = c.benchmark_group("signal");
    group.throughput(Throughput::Elements(256));
    group.bench_function("signal_256", |b| {
        b.iter(|| {
            let target = received.load(Ordering::Relaxed) + 256;
            for i in 0..256u64 {
                while handle.signal(i).is_err() {
                    std::hint::spin_loop();
                }
            }
            while received.load(Ordering::Relaxed) < target {
                std::hint::spin_loop();
            }
        });
    });
    group.finish();

    runtime.stop();
}

criterion_group!(
    benches,
    mailbox_enqueue_dequeue,
    channel_send_recv,
    signal_to_agent
);
criterion_main!(benches);
