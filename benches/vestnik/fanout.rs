use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use vestnik::{
    async_subscriber, sync_subscriber, Channel, ChannelRegistry, FanoutMode, Message,
    PubSubConfig,
};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_sync_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("sync_fanout");
    for subscribers in [0usize, 1, 10, 100] {
        let channel = Channel::new("bench", 100, FanoutMode::Sequential);
        for _ in 0..subscribers {
            channel.subscribe(sync_subscriber(|msg| {
                black_box(msg);
                Ok(())
            }));
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &channel,
            |b, channel| {
                b.to_async(&rt)
                    .iter(|| channel.publish(Message::from("payload")))
            },
        );
    }
    group.finish();
}

fn bench_async_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("async_fanout_10");
    for mode in [FanoutMode::Sequential, FanoutMode::Concurrent] {
        let channel = Channel::new("bench", 100, mode);
        for _ in 0..10 {
            channel.subscribe_async(async_subscriber(|msg| async move {
                black_box(msg);
                Ok(())
            }));
        }
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{mode:?}")),
            &channel,
            |b, channel| {
                b.to_async(&rt)
                    .iter(|| channel.publish(Message::from("payload")))
            },
        );
    }
    group.finish();
}

fn bench_structured_publish(c: &mut Criterion) {
    let rt = runtime();
    let channel = Channel::new("bench", 1000, FanoutMode::Sequential);
    let value = serde_json::json!({"type": "progress", "step": 3, "total": 10});
    c.bench_function("publish_structured_history_1000", |b| {
        b.to_async(&rt)
            .iter(|| channel.publish(Message::structured(value.clone())))
    });
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = ChannelRegistry::local(PubSubConfig::default());
    for i in 0..1000 {
        registry.get_or_create(&format!("topic-{i}"));
    }
    c.bench_function("registry_get_or_create_hit", |b| {
        b.iter(|| black_box(registry.get_or_create("topic-500")))
    });
}

criterion_group!(
    benches,
    bench_sync_fanout,
    bench_async_fanout,
    bench_structured_publish,
    bench_registry_lookup
);
criterion_main!(benches);
