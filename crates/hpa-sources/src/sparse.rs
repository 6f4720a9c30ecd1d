//! Sparse `merge` source: replays a pre-existing `meta.db`/`profile.db`
//! pair — the sparse columnar output of a prior run — as pipeline events,
//! so a later aggregation pass can fold it in alongside fresh measurement
//! sources.
//!
//! Two identifier spaces must be remapped onto the fresh [`Pipeline`]'s own:
//!
//! - Context ids. [`hpa_db::meta::MetaContext::id`]/`parent` are the
//!   *finalized* ids from the predecessor run. `meta.db` was written by
//!   walking the context arena in insertion order (`write_meta_db` iterates
//!   the arena, not the final-id order), and arena insertion always places a
//!   parent before its children, so a single left-to-right pass can build a
//!   `HashMap<u32, ContextId>` as it goes; the one entry with `parent ==
//!   None` is the predecessor's root and maps directly onto this pipeline's
//!   own [`Pipeline::root`] rather than being re-inserted.
//! - Metric ids. [`hpa_db::value_block::MetricIndexEntry::metric_id`] and
//!   [`hpa_db::value_block::ValueEntry::index`] (context id) both use the
//!   predecessor's plain registration-order index — for metrics, that index
//!   is exactly the position of the corresponding entry in
//!   [`hpa_db::meta::MetaDb::metrics`], since a `MetricId` is nothing more
//!   than a registry `Vec` index. No separate mapping table is stored; a
//!   parallel `Vec<MetricId>` built in the same order suffices.

use std::collections::HashMap;
use std::path::PathBuf;

use hpa_core::metric::MetricSettings;
use hpa_core::{ContextId, Pipeline};
use hpa_engine::{Class, DataClass, Source};

use crate::error::Error;

/// Replays a `meta.db`/`profile.db` pair produced by a prior run.
pub struct SparseSource {
    dir: PathBuf,
}

impl SparseSource {
    /// Creates a source that reads `meta.db` and `profile.db` from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn run_inner(&mut self, pipeline: &Pipeline) -> Result<(), Error> {
        let meta_path = self.dir.join("meta.db");
        let meta = hpa_db::meta::read_meta_db(&meta_path)?;

        let mut metric_map = Vec::with_capacity(meta.metrics.len());
        for m in &meta.metrics {
            let mid = pipeline.metric_add(MetricSettings {
                name: m.name.clone(),
                description: m.description.clone(),
                scopes: m.scopes.clone(),
                visible: m.visible,
                order: None,
            });
            {
                let mut reg = pipeline.metrics().write();
                let metric = reg.get_mut(mid).expect("metric just registered");
                for (accumulate, combine) in &m.partials {
                    metric.add_partial(*accumulate, *combine);
                }
            }
            metric_map.push(mid);
        }

        let mut ctx_map: HashMap<u32, ContextId> = HashMap::with_capacity(meta.contexts.len());
        for c in &meta.contexts {
            match c.parent {
                None => {
                    ctx_map.insert(c.id, pipeline.root());
                }
                Some(parent_id) => {
                    let parent = *ctx_map.get(&parent_id).ok_or_else(|| Error::Malformed {
                        path: meta_path.clone(),
                        reason: format!("context {} referenced parent {} before it was defined", c.id, parent_id),
                    })?;
                    let ctx = pipeline.context_insert(parent, c.relation, c.scope);
                    ctx_map.insert(c.id, ctx);
                }
            }
        }

        let profile_path = self.dir.join("profile.db");
        let profile = hpa_db::profile::read_profile_db(&profile_path)?;

        for entry in profile.profiles {
            let (_thread, mut temp) = pipeline.thread_add(entry.thread);

            for (run_index, run) in entry.metric_indices.iter().enumerate() {
                let start = run.start_index as usize;
                let end = entry
                    .metric_indices
                    .get(run_index + 1)
                    .map(|next| next.start_index as usize)
                    .unwrap_or(entry.values.len());

                let mid = *metric_map.get(run.metric_id as usize).ok_or(Error::UnknownMetric {
                    path: profile_path.clone(),
                    index: u32::from(run.metric_id),
                })?;

                for value in &entry.values[start..end] {
                    let ctx = *ctx_map.get(&value.index).ok_or_else(|| Error::Malformed {
                        path: profile_path.clone(),
                        reason: format!("value referenced undefined context {}", value.index),
                    })?;
                    pipeline.value_add(&mut temp, ctx, mid, value.value);
                }
            }

            pipeline.notify_thread_final(&mut temp)?;
            pipeline.thread_store(temp);
        }

        Ok(())
    }
}

impl Source for SparseSource {
    fn provides(&self) -> DataClass {
        DataClass::of(Class::Contexts) | DataClass::of(Class::Metrics) | DataClass::of(Class::Threads)
    }

    fn run(&mut self, pipeline: &Pipeline) -> Result<(), hpa_core::Error> {
        self.run_inner(pipeline).map_err(Error::into_core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpa_core::metric::{AccumulateExpr, Combine, MetricScope};
    use hpa_core::scope::{Relation, Scope};

    #[test]
    fn replays_a_predecessor_run_into_a_fresh_pipeline() {
        let original = Pipeline::new();
        let mid = original.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point, MetricScope::Execution],
            visible: true,
            order: None,
        });
        original
            .metrics()
            .write()
            .get_mut(mid)
            .unwrap()
            .add_partial(AccumulateExpr::Identity, Combine::Sum);

        let root = original.root();
        let main = original.context_insert(root, Relation::Call, Scope::Function(1));
        let (_tid, mut temp) = original.thread_add(hpa_core::id_tuple::ThreadId::summary());
        original.value_add(&mut temp, main, mid, 7.0);
        original.notify_thread_final(&mut temp).unwrap();
        original.thread_store(temp);
        original.finalize_identifiers();

        let dir = tempfile::tempdir().unwrap();
        hpa_db::meta::write_meta_db(dir.path(), &original).unwrap();
        hpa_db::profile::write_profile_db(dir.path(), &original).unwrap();

        let fresh = Pipeline::new();
        let mut source = SparseSource::new(dir.path());
        source.run(&fresh).unwrap();
        fresh.finalize_identifiers();

        assert_eq!(fresh.contexts().len(), 2);
        assert_eq!(fresh.thread_count(), 1);
        assert_eq!(fresh.metrics().read().len(), 1);
    }
}
