//! The shared, globally-uniqued pipeline state: the owner of every Metric,
//! Module, File, Function, Context, and Thread, plus the uniqued-insert and
//! finalization operations exposed to sources.
//!
//! Wavefront scheduling and the source/sink worker-thread model live in
//! `hpa-engine`, which drives sources against this state; this module only
//! owns the data and the uniqued-insert operations themselves.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::accumulator::MetricAccumulator;
use crate::context::{ContextArena, ContextId};
use crate::error::Error;
use crate::id_tuple::ThreadId;
use crate::metric::{MetricId, MetricRegistry, MetricSettings};
use crate::module::{LoadModule, LoadModuleId, LoadModuleRegistry};
use crate::perthread::PerThreadTemporary;
use crate::scope::{FileId, FunctionId, Relation, Scope};
use crate::stats::StatisticStore;

/// Profile-level attributes merged via [`Pipeline::attributes_add`] (job id,
/// environment, time base).
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    /// Arbitrary string key/value pairs.
    pub fields: HashMap<String, String>,
}

impl Attributes {
    /// Merges `other` into this set, with `other` winning on key conflicts.
    pub fn merge(&mut self, other: Attributes) {
        self.fields.extend(other.fields);
    }
}

/// A reference kind a source may insert via [`Pipeline::reference_insert`].
pub enum Reference {
    /// A load module, uniqued by `(path, content_hash)`.
    LoadModule {
        /// Normalized file path.
        path: String,
        /// Content hash.
        content_hash: [u8; 32],
    },
    /// A source file, uniqued by path.
    File(String),
    /// A function, uniqued by `(name, file)`.
    Function {
        /// Mangled or display name.
        name: String,
        /// Declaring file, if known.
        file: Option<FileId>,
    },
}

/// A uniqued-insert handle returned by [`Pipeline::reference_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceId {
    /// A load module id.
    LoadModule(LoadModuleId),
    /// A file id.
    File(FileId),
    /// A function id.
    Function(FunctionId),
}

/// Insert-or-get registry for source files and functions, uniqued by name
/// (and, for functions, declaring file).
#[derive(Default)]
struct NameRegistry {
    files: Vec<String>,
    files_by_path: HashMap<String, FileId>,
    functions: Vec<(String, Option<FileId>)>,
    functions_by_key: HashMap<(String, Option<FileId>), FunctionId>,
}

impl NameRegistry {
    fn files(&self) -> &[String] {
        &self.files
    }

    fn functions(&self) -> &[(String, Option<FileId>)] {
        &self.functions
    }

    fn file_insert(&mut self, path: String) -> FileId {
        if let Some(&id) = self.files_by_path.get(&path) {
            return id;
        }
        let id = self.files.len() as FileId;
        self.files.push(path.clone());
        let _ = self.files_by_path.insert(path, id);
        id
    }

    fn function_insert(&mut self, name: String, file: Option<FileId>) -> FunctionId {
        let key = (name.clone(), file);
        if let Some(&id) = self.functions_by_key.get(&key) {
            return id;
        }
        let id = self.functions.len() as FunctionId;
        self.functions.push((name, file));
        let _ = self.functions_by_key.insert(key, id);
        id
    }
}

/// Owns every globally-uniqued entity and exposes the insert/finalize
/// operations sources call against.
pub struct Pipeline {
    attributes: Mutex<Attributes>,
    modules: Mutex<LoadModuleRegistry>,
    names: Mutex<NameRegistry>,
    contexts: ContextArena,
    metrics: RwLock<MetricRegistry>,
    stats: StatisticStore,
    threads: Mutex<Vec<ThreadId>>,
    finalized_threads: Mutex<Vec<PerThreadTemporary>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline state: one root context, the reserved
    /// placeholder module, no metrics, no threads.
    #[must_use]
    pub fn new() -> Self {
        Self {
            attributes: Mutex::new(Attributes::default()),
            modules: Mutex::new(LoadModuleRegistry::new()),
            names: Mutex::new(NameRegistry::default()),
            contexts: ContextArena::new(),
            metrics: RwLock::new(MetricRegistry::new()),
            stats: StatisticStore::new(),
            threads: Mutex::new(Vec::new()),
            finalized_threads: Mutex::new(Vec::new()),
        }
    }

    /// The calling-context tree arena.
    #[must_use]
    pub fn contexts(&self) -> &ContextArena {
        &self.contexts
    }

    /// The metric registry.
    #[must_use]
    pub fn metrics(&self) -> &RwLock<MetricRegistry> {
        &self.metrics
    }

    /// The global statistic-accumulator store.
    #[must_use]
    pub fn stats(&self) -> &StatisticStore {
        &self.stats
    }

    /// Merges profile-level attributes.
    pub fn attributes_add(&self, attrs: Attributes) {
        self.attributes.lock().merge(attrs);
    }

    /// A snapshot of the current attribute set.
    #[must_use]
    pub fn attributes(&self) -> Attributes {
        self.attributes.lock().clone()
    }

    /// Inserts or returns an existing uniqued handle for `reference`.
    pub fn reference_insert(&self, reference: Reference) -> ReferenceId {
        match reference {
            Reference::LoadModule { path, content_hash } => {
                ReferenceId::LoadModule(self.modules.lock().insert_or_get(path, content_hash))
            }
            Reference::File(path) => ReferenceId::File(self.names.lock().file_insert(path)),
            Reference::Function { name, file } => {
                ReferenceId::Function(self.names.lock().function_insert(name, file))
            }
        }
    }

    /// Inserts or returns the existing child of `parent` for `(relation,
    /// scope)`.
    #[must_use]
    pub fn context_insert(&self, parent: ContextId, relation: Relation, scope: Scope) -> ContextId {
        self.contexts.context_insert(parent, relation, scope)
    }

    /// The unique CCT root.
    #[must_use]
    pub fn root(&self) -> ContextId {
        self.contexts.root()
    }

    /// Registers a new thread and opens its accumulator buffer.
    #[must_use]
    pub fn thread_add(&self, id_tuple: ThreadId) -> (ThreadId, PerThreadTemporary) {
        self.threads.lock().push(id_tuple.clone());
        let temp = PerThreadTemporary::new(id_tuple.clone());
        (id_tuple, temp)
    }

    /// Number of registered threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Uniques a metric by name, registering it on first reference.
    pub fn metric_add(&self, settings: MetricSettings) -> MetricId {
        self.metrics.write().metric_add(settings)
    }

    /// Adds a point-scope value at `(context, metric)` within `temp`'s
    /// buffer. Lock-free on the hot path.
    pub fn value_add(&self, temp: &mut PerThreadTemporary, context: ContextId, metric: MetricId, value: f64) {
        temp.value_add(context, metric, value);
    }

    /// Records a sample instant for `temp`.
    pub fn ctx_timepoint_add(&self, temp: &mut PerThreadTemporary, nanos: u64, context: ContextId) {
        temp.ctx_timepoint_add(nanos, context);
    }

    /// Triggers metric scope propagation for `temp`'s thread. Idempotent.
    ///
    /// # Errors
    /// Propagates [`Error::EmptyReconstruction`] from the underlying
    /// finalize algorithm.
    pub fn notify_thread_final(&self, temp: &mut PerThreadTemporary) -> Result<(), Error> {
        temp.finalize(&self.contexts, &self.metrics.read(), &self.stats)
    }

    /// Assigns final, contiguous context identifiers and disjoint metric
    /// identifier-table ranges. Must run once, after every source has
    /// completed and every thread has been finalized (the pipeline's
    /// `contexts` and `metrics` wavefronts).
    pub fn finalize_identifiers(&self) {
        self.contexts.finalize_identifiers();
        self.metrics.read().finalize_identifiers();
    }

    /// Hands a thread's finalized accumulator buffer back to the pipeline
    /// for sinks to read once the `threads` wavefront fires. Call after
    /// [`Self::notify_thread_final`] returns successfully.
    pub fn thread_store(&self, temp: PerThreadTemporary) {
        self.finalized_threads.lock().push(temp);
    }

    /// Runs `f` over every finalized thread buffer handed back via
    /// [`Self::thread_store`]. Used by the sparse database writer, which
    /// needs to read every thread's sparse cells after the `threads`
    /// wavefront has fired.
    pub fn with_finalized_threads<R>(&self, f: impl FnOnce(&[PerThreadTemporary]) -> R) -> R {
        f(&self.finalized_threads.lock())
    }

    /// A snapshot of every registered load module, in assignment order.
    #[must_use]
    pub fn load_modules_snapshot(&self) -> Vec<LoadModule> {
        self.modules.lock().iter().cloned().collect()
    }

    /// A snapshot of every registered source file path, in assignment
    /// order (index is the [`FileId`]).
    #[must_use]
    pub fn files_snapshot(&self) -> Vec<String> {
        self.names.lock().files().to_vec()
    }

    /// A snapshot of every registered `(name, declaring file)` function
    /// entry, in assignment order (index is the [`FunctionId`]).
    #[must_use]
    pub fn functions_snapshot(&self) -> Vec<(String, Option<FileId>)> {
        self.names.lock().functions().to_vec()
    }
}

/// Convenience accessor bundling a thread's accumulated cell alongside the
/// shared statistic accumulator for the same `(context, metric)`, used by
/// `hpa-db` when emitting sparse values.
#[must_use]
pub fn cell_snapshot<'a>(
    temp: &'a PerThreadTemporary,
    context: ContextId,
    metric: MetricId,
) -> Option<&'a MetricAccumulator> {
    temp.cell(context, metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricScope;

    #[test]
    fn end_to_end_scenario_one_single_thread_one_metric() {
        let pipeline = Pipeline::new();
        let mid = pipeline.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point, MetricScope::Function, MetricScope::Execution],
            visible: true,
            order: None,
        });
        pipeline
            .metrics
            .write()
            .get_mut(mid)
            .unwrap()
            .add_partial(crate::metric::AccumulateExpr::Identity, crate::metric::Combine::Sum);

        let root = pipeline.root();
        let main = pipeline.context_insert(root, Relation::Call, Scope::Function(1));
        let foo = pipeline.context_insert(main, Relation::Call, Scope::Function(2));
        let bar = pipeline.context_insert(foo, Relation::Call, Scope::Function(3));

        let (_tid, mut temp) = pipeline.thread_add(ThreadId::summary());
        pipeline.value_add(&mut temp, foo, mid, 1.0);
        pipeline.value_add(&mut temp, bar, mid, 1.0);
        pipeline.notify_thread_final(&mut temp).unwrap();
        pipeline.finalize_identifiers();

        // 4 contexts: root, main, foo, bar
        assert_eq!(pipeline.contexts().len(), 4);
        assert_eq!(temp.cell(foo, mid).unwrap().point(), 1.0);
        assert_eq!(temp.cell(foo, mid).unwrap().function(), 2.0);
        assert_eq!(temp.cell(foo, mid).unwrap().execution(), 2.0);
        assert_eq!(temp.cell(bar, mid).unwrap().point(), 1.0);
        assert_eq!(temp.cell(bar, mid).unwrap().function(), 1.0);
        assert_eq!(temp.cell(bar, mid).unwrap().execution(), 1.0);

        let sum_at_foo = pipeline.stats().get(foo, mid).unwrap().value(0, MetricScope::Point);
        assert_eq!(sum_at_foo, 1.0);
    }
}
