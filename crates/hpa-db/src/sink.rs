//! The database sink: orchestrates every section writer into one
//! [`hpa_engine::node::Sink`] implementation.

use std::path::PathBuf;

use hpa_core::Pipeline;
use hpa_engine::dataclass::{Class, DataClass};
use hpa_engine::node::Sink;

use crate::cct::write_cct_db;
use crate::meta::write_meta_db;
use crate::profile::write_profile_db;
use crate::trace::write_trace_db;
use crate::xml::write_experiment_xml;

fn wrap(e: crate::error::Error) -> hpa_core::Error {
    hpa_core::Error::SinkWrite { message: e.to_string() }
}

/// Writes the four sparse database files plus `experiment.xml` into a
/// target directory, once the `threads`, `contexts`, and `metrics`
/// wavefronts have all fired.
pub struct DatabaseSink {
    dir: PathBuf,
    segment_size: Option<u64>,
}

impl DatabaseSink {
    /// Creates a sink that writes into `dir`, creating it if necessary.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), segment_size: None }
    }

    /// Caps the byte size of a single trace-stream write before it is
    /// split into multiple directory segments.
    #[must_use]
    pub fn with_segment_size(mut self, segment_size: Option<u64>) -> Self {
        self.segment_size = segment_size;
        self
    }
}

impl Sink for DatabaseSink {
    fn accepts(&self) -> DataClass {
        DataClass::of(Class::Contexts) | DataClass::of(Class::Metrics) | DataClass::of(Class::Threads)
    }

    fn demands(&self) -> DataClass {
        self.accepts()
    }

    fn write(&mut self, pipeline: &Pipeline) -> Result<(), hpa_core::Error> {
        std::fs::create_dir_all(&self.dir).map_err(|e| hpa_core::Error::SinkWrite { message: e.to_string() })?;

        write_meta_db(&self.dir, pipeline).map_err(wrap)?;
        write_profile_db(&self.dir, pipeline).map_err(wrap)?;
        write_cct_db(&self.dir, pipeline).map_err(wrap)?;
        write_trace_db(&self.dir, pipeline, self.segment_size).map_err(wrap)?;
        write_experiment_xml(&self.dir, pipeline).map_err(wrap)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpa_core::metric::{AccumulateExpr, Combine, MetricScope, MetricSettings};
    use hpa_core::scope::{Relation, Scope};

    #[test]
    fn writes_every_section_file() {
        let pipeline = Pipeline::new();
        let mid = pipeline.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
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
        let (_tid, mut temp) = pipeline.thread_add(hpa_core::ThreadId::summary());
        pipeline.value_add(&mut temp, main, mid, 1.0);
        pipeline.notify_thread_final(&mut temp).unwrap();
        pipeline.thread_store(temp);
        pipeline.finalize_identifiers();

        let dir = tempfile::tempdir().unwrap();
        let mut sink = DatabaseSink::new(dir.path().join("db"));
        sink.write(&pipeline).unwrap();

        for name in ["meta.db", "profile.db", "cct.db", "trace.db", "experiment.xml"] {
            assert!(dir.path().join("db").join(name).exists(), "missing {name}");
        }
    }
}
