//! Full database round trip: build a small pipeline with two threads, two
//! contexts and one metric, write every section through [`DatabaseSink`],
//! then read each file back independently and check the values agree.

use hpa_core::id_tuple::{IdTupleElement, IdTupleKind, ThreadId};
use hpa_core::metric::{AccumulateExpr, Combine, MetricScope, MetricSettings};
use hpa_core::scope::{Relation, Scope};
use hpa_core::Pipeline;
use hpa_db::sink::DatabaseSink;
use hpa_db::{cct, meta, profile, trace, xml};
use hpa_engine::node::Sink;

fn rank_thread(rank: u64) -> ThreadId {
    ThreadId::new([IdTupleElement {
        kind: IdTupleKind::Rank,
        physical_index: rank,
        logical_index: rank,
    }])
}

#[test]
fn writes_and_reads_back_a_two_thread_two_context_pipeline() {
    let pipeline = Pipeline::new();

    let mid = pipeline.metric_add(MetricSettings {
        name: "cycles".into(),
        description: "CPU cycles".into(),
        scopes: vec![MetricScope::Point, MetricScope::Execution],
        visible: true,
        order: None,
    });
    pipeline
        .metrics()
        .write()
        .get_mut(mid)
        .unwrap()
        .add_partial(AccumulateExpr::Identity, Combine::Sum);

    let root = pipeline.root();
    let main = pipeline.context_insert(root, Relation::Call, Scope::Function(1));
    let leaf = pipeline.context_insert(main, Relation::Call, Scope::Function(2));

    for rank in 0..2 {
        let (_tid, mut temp) = pipeline.thread_add(rank_thread(rank));
        pipeline.value_add(&mut temp, leaf, mid, 10.0 + rank as f64);
        pipeline.ctx_timepoint_add(&mut temp, 1_000 + rank, leaf);
        pipeline.notify_thread_final(&mut temp).unwrap();
        pipeline.thread_store(temp);
    }
    pipeline.finalize_identifiers();

    let dir = tempfile::tempdir().unwrap();
    let mut sink = DatabaseSink::new(dir.path());
    sink.write(&pipeline).unwrap();

    let meta_db = meta::read_meta_db(&dir.path().join("meta.db")).unwrap();
    assert_eq!(meta_db.metrics.len(), 1);
    assert_eq!(meta_db.metrics[0].name, "cycles");
    // root + main + leaf
    assert_eq!(meta_db.contexts.len(), 3);

    let profile_db = profile::read_profile_db(&dir.path().join("profile.db")).unwrap();
    assert_eq!(profile_db.profiles.len(), 2);
    let total: f64 = profile_db.profiles.iter().flat_map(|p| p.values.iter()).map(|v| v.value).sum();
    assert!((total - 21.0).abs() < 1e-9, "expected 10.0 + 11.0, got {total}");

    let cct_db = cct::read_cct_db(&dir.path().join("cct.db")).unwrap();
    let transposed_total: f64 = cct_db.contexts.iter().flat_map(|c| c.values.iter()).map(|v| v.value).sum();
    assert!((transposed_total - total).abs() < 1e-9, "cct.db must sum to the same total as profile.db");

    let trace_db = trace::read_trace_db(&dir.path().join("trace.db")).unwrap();
    assert_eq!(trace_db.directory.len(), 2);
    let nanos: Vec<u64> = trace_db.streams.iter().flatten().map(|r| r.nanos).collect();
    assert_eq!(nanos, vec![1_000, 1_001]);

    let xml_text = std::fs::read_to_string(dir.path().join("experiment.xml")).unwrap();
    assert!(xml_text.contains("cycles"));
}
