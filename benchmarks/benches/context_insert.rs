//! Throughput of `Pipeline::context_insert` under the per-parent
//! fine-grained locking scheme, at a branching factor typical of a
//! moderately deep call stack fanning out across siblings.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use hpa_core::scope::{Relation, Scope};
use hpa_core::Pipeline;

fn insert_balanced_tree(pipeline: &Pipeline, depth: u32, fanout: u32) {
    fn insert_children(pipeline: &Pipeline, parent: hpa_core::ContextId, depth: u32, fanout: u32, next_id: &mut u32) {
        if depth == 0 {
            return;
        }
        for _ in 0..fanout {
            let id = *next_id;
            *next_id += 1;
            let child = pipeline.context_insert(parent, Relation::Call, Scope::Function(id));
            insert_children(pipeline, child, depth - 1, fanout, next_id);
        }
    }
    let mut next_id = 0;
    insert_children(pipeline, pipeline.root(), depth, fanout, &mut next_id);
}

fn bench_context_insert(c: &mut Criterion) {
    c.bench_function("context_insert/depth6_fanout4", |b| {
        b.iter_batched(
            Pipeline::new,
            |pipeline| insert_balanced_tree(&pipeline, 6, 4),
            BatchSize::SmallInput,
        );
    });

    c.bench_function("context_insert/repeated_lookup", |b| {
        let pipeline = Pipeline::new();
        let root = pipeline.root();
        b.iter(|| {
            // Re-inserting an already-seen (parent, relation, scope) only
            // takes the arena's read lock plus the parent's own child-map
            // lock, never the arena write lock.
            pipeline.context_insert(root, Relation::Call, Scope::Function(1))
        });
    });
}

criterion_group!(benches, bench_context_insert);
criterion_main!(benches);
