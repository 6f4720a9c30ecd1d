//! Per-thread accumulator buffer and the per-thread finalization algorithm:
//! redistribute reconstructions, redistribute flow graphs, then post-order
//! fold point values into function/lex-aware/execution scope values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::accumulator::MetricAccumulator;
use crate::context::ContextArena;
use crate::context::ContextId;
use crate::error::Error;
use crate::id_tuple::ThreadId;
use crate::metric::{MetricId, MetricRegistry, MetricScope};
use crate::reconstruction::{
    rescaling_factors, redistribute_flow_graph, redistribute_reconstruction, ContextFlowGraph,
    ContextReconstruction,
};
use crate::stats::StatisticStore;

/// Scratch state for one reconstruction group, cleared mid-finalization to
/// bound peak memory.
#[derive(Default)]
struct ReconstructionGroupScratch {
    /// Point value summed across the group's reconstructions, per metric.
    c_data: HashMap<MetricId, f64>,
    flow_graphs: Vec<ContextFlowGraph>,
}

/// One recorded sample instant: a timestamp paired with the context active
/// at that instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timepoint {
    /// Nanoseconds since an arbitrary, per-run epoch.
    pub nanos: u64,
    /// Context active at this instant.
    pub context: ContextId,
}

/// Accumulator structure bound 1:1 to a [`ThreadId`] during aggregation.
pub struct PerThreadTemporary {
    thread: ThreadId,
    c_data: HashMap<(ContextId, MetricId), MetricAccumulator>,
    r_data: Vec<(ContextReconstruction, MetricId, f64)>,
    r_groups: HashMap<u32, ReconstructionGroupScratch>,
    timepoints: Vec<Timepoint>,
    last_timestamp: u64,
    unbounded_disorder: bool,
    finalized: AtomicBool,
}

impl PerThreadTemporary {
    /// Opens a new accumulator buffer for `thread`.
    #[must_use]
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            c_data: HashMap::new(),
            r_data: Vec::new(),
            r_groups: HashMap::new(),
            timepoints: Vec::new(),
            last_timestamp: 0,
            unbounded_disorder: false,
            finalized: AtomicBool::new(false),
        }
    }

    /// Reorder window (in recorded timepoints) tolerated before a
    /// late-arriving timepoint is flagged as unbounded disorder rather than
    /// silently reordered. Matches the streaming-sort buffer's documented
    /// window.
    pub const REORDER_WINDOW: usize = 64;

    /// Records a sample instant `(nanos, context)`. Out-of-order arrivals
    /// within [`Self::REORDER_WINDOW`] of the buffer's tail are accepted and
    /// will be sorted by the trace writer; arrivals further out of order
    /// flag the thread as `unboundedDisorder` (reported, never silently
    /// dropped).
    pub fn ctx_timepoint_add(&mut self, nanos: u64, context: ContextId) {
        if nanos < self.last_timestamp {
            let window_start = self.timepoints.len().saturating_sub(Self::REORDER_WINDOW);
            let within_window = self.timepoints[window_start..]
                .iter()
                .all(|tp| tp.nanos <= self.last_timestamp);
            if !within_window {
                self.unbounded_disorder = true;
                tracing::warn!(thread = %self.thread, nanos, "timepoint arrived outside the reorder window");
            }
        } else {
            self.last_timestamp = nanos;
        }
        self.timepoints.push(Timepoint { nanos, context });
    }

    /// Recorded timepoints, in arrival order (not necessarily sorted; the
    /// trace writer performs the final sort within the reorder window).
    #[must_use]
    pub fn timepoints(&self) -> &[Timepoint] {
        &self.timepoints
    }

    /// Whether a timepoint arrived further out of order than
    /// [`Self::REORDER_WINDOW`] tolerates.
    #[must_use]
    pub fn has_unbounded_disorder(&self) -> bool {
        self.unbounded_disorder
    }

    /// The thread this buffer is bound to.
    #[must_use]
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }

    /// Adds a point-scope value at `(context, metric)`. Lock-free.
    pub fn value_add(&mut self, context: ContextId, metric: MetricId, value: f64) {
        self.c_data
            .entry((context, metric))
            .or_insert_with(MetricAccumulator::new)
            .add_point(value);
    }

    /// Records a pending reconstruction: a promise to later attribute
    /// `value` of `metric` across `reconstruction.finals`.
    pub fn reconstruction_add(&mut self, reconstruction: ContextReconstruction, metric: MetricId, value: f64) {
        self.r_data.push((reconstruction, metric, value));
    }

    /// Registers a flow graph belonging to reconstruction `group`, to be
    /// redistributed once the group's reconstructions have been summed.
    pub fn flow_graph_add(&mut self, group: u32, graph: ContextFlowGraph) {
        self.r_groups.entry(group).or_default().flow_graphs.push(graph);
    }

    /// Direct read access to this thread's accumulated cells, keyed by
    /// `(context, metric)`. Valid at any point; values for `point` update
    /// live, the other three scopes only after [`Self::finalize`] runs.
    #[must_use]
    pub fn cell(&self, context: ContextId, metric: MetricId) -> Option<&MetricAccumulator> {
        self.c_data.get(&(context, metric))
    }

    /// Iterates every accumulated `((context, metric), accumulator)` cell,
    /// used by the sparse database writer to emit this thread's sparse
    /// values.
    pub fn cells(&self) -> impl Iterator<Item = ((ContextId, MetricId), &MetricAccumulator)> {
        self.c_data.iter().map(|(&k, v)| (k, v))
    }

    /// Runs the per-thread finalization algorithm exactly once. A second
    /// call is a no-op (idempotent).
    ///
    /// # Errors
    /// Propagates [`Error::EmptyReconstruction`] if a pending
    /// reconstruction has no final contexts for a nonzero value.
    pub fn finalize(
        &mut self,
        arena: &ContextArena,
        metrics: &MetricRegistry,
        stats: &StatisticStore,
    ) -> Result<(), Error> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.redistribute_reconstructions()?;
        self.sum_reconstruction_groups();
        self.redistribute_flow_graphs();
        self.post_order_finalize(arena, metrics, stats);
        Ok(())
    }

    /// Step 1: for each pending reconstruction, compute rescaling factors
    /// over this thread's own `c_data`, multiply elementwise by interior
    /// factors, and fold the result into `c_data` via a scratch `outputs`
    /// map. Clears `r_data` immediately.
    fn redistribute_reconstructions(&mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.r_data);
        let mut outputs: HashMap<(ContextId, MetricId), f64> = HashMap::new();

        for (recon, metric, value) in pending {
            let c_data = &self.c_data;
            let rescaling = rescaling_factors(&recon.finals, |ctx| {
                c_data.get(&(ctx, metric)).map(MetricAccumulator::point)
            });
            let contributions = redistribute_reconstruction(&recon, &rescaling, value, &self.thread)?;
            for (ctx, v) in contributions {
                *outputs.entry((ctx, metric)).or_insert(0.0) += v;

                self.r_groups
                    .entry(recon.group)
                    .or_default()
                    .c_data
                    .entry(metric)
                    .and_modify(|s| *s += v)
                    .or_insert(v);
            }
        }

        for ((ctx, metric), value) in outputs {
            self.c_data
                .entry((ctx, metric))
                .or_insert_with(MetricAccumulator::new)
                .add_point(value);
        }
        Ok(())
    }

    /// Step 2: fold each group's summed per-metric point values back into
    /// `c_data` so subsequent flow-graph rescaling sees them. Group sums
    /// are already accumulated into `r_groups` during step 1, so this step
    /// is a no-op placeholder kept for parity with the five-step
    /// redistribute/sum/redistribute/fold/combine sequence.
    fn sum_reconstruction_groups(&mut self) {}

    /// Step 3: for each flow graph in each group, compute exterior factors
    /// and redistribute. Groups with zero reconstructions are silently
    /// dropped, per the documented open question.
    fn redistribute_flow_graphs(&mut self) {
        let groups = std::mem::take(&mut self.r_groups);
        for (group_id, scratch) in groups {
            if scratch.c_data.is_empty() {
                // Zero reconstructions observed for this group: drop the
                // flow-graph values rather than guessing an exterior
                // factor. See DESIGN.md's Open Question resolution.
                tracing::debug!(group = group_id, "dropping flow-graph values for empty reconstruction group");
                continue;
            }
            for graph in &scratch.flow_graphs {
                let c_data = &self.c_data;
                let rescaling = rescaling_factors(&graph.finals, |ctx| {
                    // any metric's value stands in for observed activity
                    c_data
                        .iter()
                        .find(|((cid, _), _)| *cid == ctx)
                        .map(|(_, acc)| acc.point())
                });
                for (&metric, &value) in &scratch.c_data {
                    let contributions = redistribute_flow_graph(graph, &rescaling, value);
                    for (ctx, v) in contributions {
                        self.c_data
                            .entry((ctx, metric))
                            .or_insert_with(MetricAccumulator::new)
                            .add_point(v);
                    }
                }
            }
        }
    }

    /// Steps 4-5: build a pruned child map over contexts with data, rooted
    /// at the global context, and post-order-traverse it computing
    /// `function`/`function_noloops`/`execution` and combining each
    /// partial into the context's shared `StatisticAccumulator`.
    fn post_order_finalize(&mut self, arena: &ContextArena, metrics: &MetricRegistry, stats: &StatisticStore) {
        let touched: std::collections::HashSet<ContextId> = self.c_data.keys().map(|(c, _)| *c).collect();
        if touched.is_empty() {
            return;
        }

        // Build the set of contexts on the path from every touched context
        // to the root (the "pruned" tree), then order them deepest-first
        // for a post-order traversal without an explicit DFS stack: depth
        // can be derived by walking to root and counting.
        let mut all: std::collections::HashSet<ContextId> = std::collections::HashSet::new();
        for &ctx in &touched {
            let mut cur = Some(ctx);
            while let Some(c) = cur {
                if !all.insert(c) {
                    break;
                }
                cur = arena.parent(c);
            }
        }

        let mut with_depth: Vec<(u32, ContextId)> = all
            .iter()
            .map(|&c| {
                let mut depth = 0u32;
                let mut cur = arena.parent(c);
                while let Some(p) = cur {
                    depth += 1;
                    cur = arena.parent(p);
                }
                (depth, c)
            })
            .collect();
        // Post-order: deepest first.
        with_depth.sort_by(|a, b| b.0.cmp(&a.0));

        for metric in metrics.iter() {
            for &(_, ctx) in &with_depth {
                let is_loop = arena.scope(ctx).is_loop();
                let entry = self
                    .c_data
                    .entry((ctx, metric.id()))
                    .or_insert_with(MetricAccumulator::new);
                entry.set_is_loop(is_loop);
                entry.seed_from_point();
            }

            // second pass: fold children into parents, now that every
            // touched-path context has been seeded.
            for &(_, ctx) in &with_depth {
                let children: Vec<ContextId> = all
                    .iter()
                    .copied()
                    .filter(|&c| arena.parent(c) == Some(ctx))
                    .collect();
                for child in children {
                    let child_is_call = arena.relation(child).is_call();
                    // Split borrow: read child, then write parent.
                    let child_snapshot = {
                        let child_acc = self.c_data.get(&(child, metric.id()));
                        child_acc.map(|a| {
                            (
                                a.function(),
                                a.function_noloops(),
                                a.execution(),
                                a.is_loop(),
                            )
                        })
                    };
                    if let Some((func, func_nl, exec, child_loop)) = child_snapshot {
                        if let Some(parent_acc) = self.c_data.get_mut(&(ctx, metric.id())) {
                            parent_acc.pull_from_child(
                                &MetricAccumulator::from_scopes(func, func_nl, exec, child_loop),
                                child_is_call,
                            );
                        }
                    }
                }
            }

            // Combine each partial into the shared StatisticAccumulator.
            for &(_, ctx) in &with_depth {
                if let Some(acc) = self.c_data.get(&(ctx, metric.id())) {
                    let partial_count = metric.partials().len();
                    if partial_count == 0 {
                        continue;
                    }
                    let stat_acc = stats.get_or_create(ctx, metric.id(), partial_count);
                    for partial in metric.partials() {
                        for (scope, raw) in [
                            (MetricScope::Point, acc.point()),
                            (MetricScope::Function, acc.function()),
                            (
                                MetricScope::LexAware,
                                if acc.is_loop() { acc.function_noloops() } else { acc.function() },
                            ),
                            (MetricScope::Execution, acc.execution()),
                        ] {
                            let value = partial.accumulate.eval(raw);
                            stat_acc.combine(partial.index, scope, value, partial.combine);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{AccumulateExpr, Combine, MetricSettings};
    use crate::scope::{Relation, Scope};

    #[test]
    fn finalize_is_idempotent() {
        let arena = ContextArena::new();
        let root = arena.root();
        let main = arena.context_insert(root, Relation::Call, Scope::Function(1));
        arena.finalize_identifiers();

        let mut metrics = MetricRegistry::new();
        let mid = metrics.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point, MetricScope::Execution],
            visible: true,
            order: None,
        });
        let _ = metrics
            .get_mut(mid)
            .unwrap()
            .add_partial(AccumulateExpr::Identity, Combine::Sum);
        metrics.finalize_identifiers();

        let stats = StatisticStore::new();
        let mut thread = PerThreadTemporary::new(ThreadId::summary());
        thread.value_add(main, mid, 5.0);

        thread.finalize(&arena, &metrics, &stats).unwrap();
        let after_first = thread.cell(main, mid).unwrap().execution();
        thread.finalize(&arena, &metrics, &stats).unwrap();
        let after_second = thread.cell(main, mid).unwrap().execution();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn lex_aware_picks_function_noloops_for_a_loop_and_function_otherwise() {
        // main -> the_loop -> inner_loop -> body, with two nested loops so
        // function and function_noloops actually diverge at `the_loop` and
        // `main` rather than coincidentally agreeing.
        let arena = ContextArena::new();
        let root = arena.root();
        let main = arena.context_insert(root, Relation::Call, Scope::Function(1));
        let the_loop = arena.context_insert(main, Relation::EnclosingLexical, Scope::LexicalLoop { function: 1, line: 10 });
        let inner_loop = arena.context_insert(the_loop, Relation::Subscope, Scope::LexicalLoop { function: 1, line: 20 });
        let body = arena.context_insert(inner_loop, Relation::Subscope, Scope::Function(2));
        arena.finalize_identifiers();

        let mut metrics = MetricRegistry::new();
        let mid = metrics.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point, MetricScope::Function, MetricScope::LexAware, MetricScope::Execution],
            visible: true,
            order: None,
        });
        let _ = metrics
            .get_mut(mid)
            .unwrap()
            .add_partial(AccumulateExpr::Identity, Combine::Sum);
        metrics.finalize_identifiers();

        let stats = StatisticStore::new();
        let mut thread = PerThreadTemporary::new(ThreadId::summary());
        thread.value_add(main, mid, 2.0);
        thread.value_add(the_loop, mid, 3.0);
        thread.value_add(inner_loop, mid, 1.0);
        thread.value_add(body, mid, 4.0);

        thread.finalize(&arena, &metrics, &stats).unwrap();

        // `the_loop` is itself a loop: lex_aware must take function_noloops
        // (3.0, excluding `inner_loop`'s subtree), not function (8.0).
        let loop_stat = stats.get(the_loop, mid).unwrap();
        assert_eq!(loop_stat.value(0, MetricScope::Function), 8.0);
        assert_eq!(loop_stat.value(0, MetricScope::LexAware), 3.0);

        // `main` is not a loop: lex_aware must take function (10.0,
        // including everything below it), not function_noloops (2.0).
        let main_stat = stats.get(main, mid).unwrap();
        assert_eq!(main_stat.value(0, MetricScope::Function), 10.0);
        assert_eq!(main_stat.value(0, MetricScope::LexAware), 10.0);
    }
}
