//! Benchmarks for topic matching and message publishing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stagegate::bus::{MessageBus, TopicPattern};
use stagegate::core::{Message, MessageKind};

fn topic_matching_benchmark(c: &mut Criterion) {
    let patterns = [
        ("exact", "status.update.pipeline-42"),
        ("single", "status.*.pipeline-42"),
        ("multi", "status.#"),
    ];

    let mut group = c.benchmark_group("topic_match");
    for (name, raw) in patterns {
        let pattern = TopicPattern::parse(raw).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(pattern.matches(black_box("status.update.pipeline-42"))));
        });
    }
    group.finish();
}

fn publish_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let mut group = c.benchmark_group("publish");
    for subscribers in [1usize, 10, 100] {
        let bus = MessageBus::new();
        bus.register("bench");
        for i in 0..subscribers {
            let pattern = if i % 2 == 0 { "status.#" } else { "error.#" };
            bus.subscribe_fn("bench", pattern, |_| {}).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &bus, |b, bus| {
            b.iter(|| {
                let message = Message::new("status.update.pipeline-42", MessageKind::StatusUpdate, "bench");
                black_box(bus.publish(message))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, topic_matching_benchmark, publish_benchmark);
criterion_main!(benches);
