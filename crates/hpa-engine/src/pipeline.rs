//! The pipeline driver: schedules sources as concurrent workers, one OS
//! thread per source pinned to a distinct CPU core (a thread-per-core
//! deployment model for CPU-bound hot paths), materializes wavefronts, and
//! dispatches sinks once their demands are satisfied.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use hpa_core::Pipeline as CorePipeline;

use crate::control::{ControlMsg, ControlSenders};
use crate::dataclass::DataClass;
use crate::error::Error;
use crate::node::{NodeId, NodeRegistry, Sink, Source};
use crate::wavefront::WavefrontSet;

/// Whether worker threads are pinned one-per-core. Pinning requires one
/// free core per source; disabled automatically if the host has fewer
/// cores than sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Pin each source's worker thread to a distinct core.
    PinnedPerCore,
    /// Let the OS scheduler place worker threads freely.
    Unpinned,
}

/// Builds and runs one aggregation pipeline: a set of sources, a set of
/// sinks, and the shared [`CorePipeline`] state they operate on.
pub struct PipelineDriver {
    pipeline: Arc<CorePipeline>,
    sources: NodeRegistry<Box<dyn Source>>,
    sinks: NodeRegistry<Box<dyn Sink>>,
    affinity: Affinity,
    wavefront_timeout: Option<Duration>,
}

impl Default for PipelineDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineDriver {
    /// Creates an empty driver around a fresh [`CorePipeline`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            pipeline: Arc::new(CorePipeline::new()),
            sources: NodeRegistry::new(),
            sinks: NodeRegistry::new(),
            affinity: Affinity::PinnedPerCore,
            wavefront_timeout: None,
        }
    }

    /// Overrides the default thread-pinning policy (tests and
    /// single-core/containerized environments may want `Unpinned`).
    #[must_use]
    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Caps how long a sink may block on a wavefront before the run is
    /// aborted as stalled. `None` (the default) waits indefinitely.
    #[must_use]
    pub fn with_wavefront_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wavefront_timeout = timeout;
        self
    }

    /// The shared pipeline state, for inspection after [`Self::run`]
    /// completes.
    #[must_use]
    pub fn core(&self) -> &Arc<CorePipeline> {
        &self.pipeline
    }

    /// Registers a source.
    ///
    /// # Errors
    /// See [`NodeRegistry::register`].
    pub fn add_source(&mut self, name: impl Into<String>, source: Box<dyn Source>) -> Result<NodeId, Error> {
        self.sources.register(name, source)
    }

    /// Registers a sink.
    ///
    /// # Errors
    /// See [`NodeRegistry::register`].
    pub fn add_sink(&mut self, name: impl Into<String>, sink: Box<dyn Sink>) -> Result<NodeId, Error> {
        self.sinks.register(name, sink)
    }

    /// Validates that every sink's demand is met by the union of all
    /// sources' `provides` sets, then runs the pipeline to completion.
    ///
    /// Sources run concurrently, one thread per source. Sinks block on
    /// their demanded wavefronts and run once released. Returns the first
    /// source or sink error encountered, after every worker has had a
    /// chance to run (source failures do not stop other sources); fatal
    /// errors trigger a best-effort shutdown broadcast to remaining
    /// workers.
    ///
    /// # Errors
    /// [`Error::UnmetDemand`] if validation fails; otherwise the first
    /// worker error observed.
    pub fn run(self) -> Result<(), Error> {
        let provides_list: Vec<DataClass> = self.sources.iter().map(|(_, s)| s.provides()).collect();
        let union_provides = provides_list.iter().fold(DataClass::empty(), |acc, &p| acc | p);

        for (id, sink) in self.sinks.iter() {
            let unmet = sink.demands().unmet(union_provides);
            if !unmet.is_empty() {
                return Err(Error::UnmetDemand {
                    unmet: format!("{unmet} (sink '{id}')"),
                });
            }
        }

        let wavefronts = Arc::new(WavefrontSet::new(&provides_list));
        let cores = if matches!(self.affinity, Affinity::PinnedPerCore) {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let remaining_sources = Arc::new(AtomicUsize::new(self.sources.len()));
        let mut control = ControlSenders::new();
        let (err_tx, err_rx) = mpsc::channel::<Error>();

        let mut source_handles = Vec::new();
        for (slot, (id, mut source)) in self.sources.into_entries().into_iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let wavefronts = Arc::clone(&wavefronts);
            let remaining = Arc::clone(&remaining_sources);
            let err_tx = err_tx.clone();
            let provides = source.provides();
            let core_id = cores.get(slot % cores.len().max(1)).copied();
            let (tx, _rx) = mpsc::channel::<ControlMsg>();
            control.register(id.clone(), tx);
            let id_for_thread = id.clone();

            let handle = thread::Builder::new()
                .name(format!("hpa-source-{}", id.name()))
                .spawn(move || {
                    if let Some(core_id) = core_id {
                        let _ = core_affinity::set_for_current(core_id);
                    }
                    if let Err(error) = source.run(&pipeline) {
                        tracing::warn!(source = %id_for_thread, %error, "source failed");
                        let _ = err_tx.send(Error::SourceFailed {
                            source_name: id_for_thread.to_string(),
                            error,
                        });
                    }
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        // Last source to finish: finalize global
                        // identifiers before releasing any wavefront a
                        // sink might be blocked on.
                        pipeline.finalize_identifiers();
                    }
                    wavefronts.source_complete(provides);
                })
                .expect("failed to spawn source worker thread");
            source_handles.push(handle);
        }
        drop(err_tx);

        let mut sink_handles = Vec::new();
        for (id, mut sink) in self.sinks.into_entries() {
            let pipeline = Arc::clone(&self.pipeline);
            let wavefronts = Arc::clone(&wavefronts);
            let demands = sink.demands();
            let wavefront_timeout = self.wavefront_timeout;
            let handle = thread::Builder::new()
                .name(format!("hpa-sink-{}", id.name()))
                .spawn(move || {
                    if !wavefronts.wait_for(demands, wavefront_timeout) {
                        return Err(Error::WavefrontStalled {
                            sink_name: id.to_string(),
                            timeout: wavefront_timeout.unwrap_or_default(),
                        });
                    }
                    sink.write(&pipeline).map_err(|error| Error::SinkFailed {
                        sink_name: id.to_string(),
                        message: error.to_string(),
                    })
                })
                .expect("failed to spawn sink worker thread");
            sink_handles.push(handle);
        }

        for handle in source_handles {
            handle.join().expect("source worker thread panicked");
        }

        let mut first_error: Option<Error> = None;
        for error in err_rx.try_iter() {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        for handle in sink_handles {
            if let Err(error) = handle.join().expect("sink worker thread panicked") {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        if let Some(error) = &first_error {
            control.shutdown_all(&error.to_string());
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataclass::Class;

    struct SlowSource(Duration);

    impl Source for SlowSource {
        fn provides(&self) -> DataClass {
            DataClass::of(Class::Contexts)
        }
        fn run(&mut self, _pipeline: &CorePipeline) -> Result<(), hpa_core::Error> {
            thread::sleep(self.0);
            Ok(())
        }
    }

    struct NoopSink;

    impl Sink for NoopSink {
        fn accepts(&self) -> DataClass {
            DataClass::of(Class::Contexts)
        }
        fn demands(&self) -> DataClass {
            DataClass::of(Class::Contexts)
        }
        fn write(&mut self, _pipeline: &CorePipeline) -> Result<(), hpa_core::Error> {
            Ok(())
        }
    }

    #[test]
    fn wavefront_timeout_aborts_a_stalled_sink() {
        let mut driver = PipelineDriver::new()
            .with_affinity(Affinity::Unpinned)
            .with_wavefront_timeout(Some(Duration::from_millis(10)));
        driver.add_source("slow", Box::new(SlowSource(Duration::from_millis(500)))).unwrap();
        driver.add_sink("noop", Box::new(NoopSink)).unwrap();

        let error = driver.run().expect_err("sink must time out before the source completes");
        assert!(matches!(error, Error::WavefrontStalled { .. }));
    }

    #[test]
    fn without_a_timeout_the_sink_waits_for_the_slow_source() {
        let mut driver = PipelineDriver::new().with_affinity(Affinity::Unpinned);
        driver.add_source("slow", Box::new(SlowSource(Duration::from_millis(20)))).unwrap();
        driver.add_sink("noop", Box::new(NoopSink)).unwrap();

        driver.run().unwrap();
    }
}
