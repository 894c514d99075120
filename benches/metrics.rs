//! Benchmarks for the metric sink and the live hub.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pos_relay::broadcast::{Broadcaster, LiveHub};
use pos_relay::config::DEFAULT_LATENCY_BUCKETS;
use pos_relay::metrics::{names, MetricState};

fn bench_observe_histogram(c: &mut Criterion) {
    let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
    let sink = state.sink();

    c.bench_function("observe_histogram", |b| {
        let mut value = 0.0;
        b.iter(|| {
            value = (value + 7.0) % 600.0;
            sink.observe_histogram(black_box(names::TOTAL_LATENCY), black_box(value));
        });
    });
}

fn bench_set_gauge(c: &mut Criterion) {
    let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
    let sink = state.sink();

    c.bench_function("set_gauge", |b| {
        b.iter(|| {
            sink.set_gauge(black_box(names::API_LATENCY), black_box(42.0));
        });
    });
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");

    for observations in [0, 100, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(observations),
            observations,
            |b, &observations| {
                let state = MetricState::new(&DEFAULT_LATENCY_BUCKETS).unwrap();
                for i in 0..observations {
                    state
                        .sink()
                        .observe_histogram(names::PUB_SUB_LATENCY, (i % 600) as f64);
                }

                b.iter(|| {
                    black_box(state.render());
                });
            },
        );
    }

    group.finish();
}

fn bench_hub_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_send");

    for subscribers in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            subscribers,
            |b, &subscribers| {
                let hub = LiveHub::new();
                let mut receivers: Vec<_> = (0..subscribers).map(|_| hub.register().1).collect();

                b.iter(|| {
                    black_box(hub.send(black_box(r#"{"message":"Updated price for Big Mac to 6.49"}"#)));
                    for rx in receivers.iter_mut() {
                        let _ = rx.try_recv();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_observe_histogram,
    bench_set_gauge,
    bench_render,
    bench_hub_send
);
criterion_main!(benches);
