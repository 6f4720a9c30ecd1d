//! Throughput of `Pipeline::value_add`, the hot per-sample accumulation
//! path: a lock-free `compare_exchange` loop over an `AtomicU64` bit
//! pattern, keyed by `(Thread, Context, Metric)`.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use hpa_core::metric::{AccumulateExpr, Combine, MetricScope, MetricSettings};
use hpa_core::scope::{Relation, Scope};
use hpa_core::Pipeline;

fn setup() -> (Pipeline, hpa_core::MetricId, hpa_core::ContextId) {
    let pipeline = Pipeline::new();
    let mid = pipeline.metric_add(MetricSettings {
        name: "cycles".to_string(),
        description: String::new(),
        scopes: vec![MetricScope::Point, MetricScope::Execution],
        visible: true,
        order: None,
    });
    pipeline
        .metrics()
        .write()
        .get_mut(mid)
        .expect("metric just registered")
        .add_partial(AccumulateExpr::Identity, Combine::Sum);
    let root = pipeline.root();
    let ctx = pipeline.context_insert(root, Relation::Call, Scope::Function(1));
    (pipeline, mid, ctx)
}

fn bench_value_add(c: &mut Criterion) {
    c.bench_function("value_add/single_context_repeated", |b| {
        let (pipeline, mid, ctx) = setup();
        let (_tid, mut temp) = pipeline.thread_add(hpa_core::id_tuple::ThreadId::summary());
        b.iter(|| pipeline.value_add(&mut temp, ctx, mid, 1.0));
    });

    c.bench_function("value_add/thousand_contexts_same_thread", |b| {
        b.iter_batched(
            || {
                let (pipeline, mid, _root_ctx) = setup();
                let root = pipeline.root();
                let contexts: Vec<_> = (0..1000)
                    .map(|i| pipeline.context_insert(root, Relation::Call, Scope::Function(i + 2)))
                    .collect();
                let (_tid, temp) = pipeline.thread_add(hpa_core::id_tuple::ThreadId::summary());
                (pipeline, mid, contexts, temp)
            },
            |(pipeline, mid, contexts, mut temp)| {
                for ctx in &contexts {
                    pipeline.value_add(&mut temp, *ctx, mid, 1.0);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_value_add);
criterion_main!(benches);
