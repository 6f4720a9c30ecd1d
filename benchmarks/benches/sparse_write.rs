//! Throughput of writing `meta.db`/`profile.db` for a finalized pipeline,
//! the hot path once per-thread finalization has completed and the sink
//! is draining the global state to disk.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use hpa_core::metric::{AccumulateExpr, Combine, MetricScope, MetricSettings};
use hpa_core::scope::{Relation, Scope};
use hpa_core::Pipeline;
use hpa_db::meta::write_meta_db;
use hpa_db::profile::write_profile_db;

fn build_finalized_pipeline(n_threads: u64, n_contexts: u32) -> Pipeline {
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
    let contexts: Vec<_> = (0..n_contexts)
        .map(|i| pipeline.context_insert(root, Relation::Call, Scope::Function(i)))
        .collect();

    for rank in 0..n_threads {
        let tid = hpa_core::id_tuple::ThreadId::new([hpa_core::id_tuple::IdTupleElement {
            kind: hpa_core::id_tuple::IdTupleKind::Rank,
            physical_index: rank,
            logical_index: rank,
        }]);
        let (_tid, mut temp) = pipeline.thread_add(tid);
        for ctx in &contexts {
            pipeline.value_add(&mut temp, *ctx, mid, 1.0);
        }
        pipeline.notify_thread_final(&mut temp).expect("reconstruction is non-empty");
        pipeline.thread_store(temp);
    }
    pipeline.finalize_identifiers();
    pipeline
}

fn bench_sparse_write(c: &mut Criterion) {
    c.bench_function("sparse_write/32_threads_256_contexts", |b| {
        b.iter_batched(
            || (tempfile::tempdir().expect("tempdir"), build_finalized_pipeline(32, 256)),
            |(dir, pipeline)| {
                write_meta_db(dir.path(), &pipeline).expect("write meta.db");
                write_profile_db(dir.path(), &pipeline).expect("write profile.db");
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_sparse_write);
criterion_main!(benches);
