//! Per-cell metric accumulators and cross-thread statistic accumulators.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::atomic_f64::AtomicF64;
use crate::metric::{Combine, MetricScope, SCOPE_COUNT};

/// Holds the four scope values for one `(thread, context, metric)` cell.
///
/// `point` is written concurrently via atomic fetch-add; the remaining
/// three fields are written single-threadedly during per-thread
/// finalization's post-order traversal.
#[derive(Debug, Default)]
pub struct MetricAccumulator {
    point: AtomicF64,
    function: f64,
    function_noloops: f64,
    execution: f64,
    is_loop: bool,
}

impl MetricAccumulator {
    /// A fresh, zeroed accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the `point` scope. Lock-free; safe to call
    /// concurrently from any thread holding this cell's `PerThreadTemporary`.
    pub fn add_point(&self, value: f64) {
        let _ = self.point.fetch_add(value);
    }

    /// Current `point` value.
    #[must_use]
    pub fn point(&self) -> f64 {
        self.point.load(Ordering::Relaxed)
    }

    /// Current `function` value (valid after finalization's post-order
    /// traversal reaches this cell).
    #[must_use]
    pub fn function(&self) -> f64 {
        self.function
    }

    /// Current `function_noloops` value.
    #[must_use]
    pub fn function_noloops(&self) -> f64 {
        self.function_noloops
    }

    /// Current `execution` value.
    #[must_use]
    pub fn execution(&self) -> f64 {
        self.execution
    }

    /// Whether the owning context is a lexical/binary loop.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.is_loop
    }

    /// Sets the loop flag (propagated from the context's scope at
    /// finalization time).
    pub fn set_is_loop(&mut self, is_loop: bool) {
        self.is_loop = is_loop;
    }

    /// Initializes `function`, `function_noloops`, and `execution` from
    /// `point`, per step 5 of the finalization post-order traversal.
    pub fn seed_from_point(&mut self) {
        let p = self.point();
        self.function = p;
        self.function_noloops = p;
        self.execution = p;
    }

    /// Builds a read-only snapshot accumulator from already-computed scope
    /// values, used to fold a child's finalized values into its parent
    /// without re-borrowing the child's live cell.
    #[must_use]
    pub(crate) fn from_scopes(function: f64, function_noloops: f64, execution: f64, is_loop: bool) -> Self {
        Self {
            point: AtomicF64::new(0.0),
            function,
            function_noloops,
            execution,
            is_loop,
        }
    }

    /// Folds a child's scope values into this accumulator per the
    /// function/lex-aware/execution propagation rule.
    pub fn pull_from_child(&mut self, child: &MetricAccumulator, child_relation_is_call: bool) {
        let pull_func = !child_relation_is_call;
        let pull_no_loops = !child.is_loop;
        if pull_func {
            self.function += child.function;
            if pull_no_loops {
                self.function_noloops += child.function_noloops;
            }
        }
        self.execution += child.execution;
    }
}

/// One `(accumulate, combine)` partial's per-scope storage, bound to a
/// single `(Context, Metric)` pair.
#[derive(Debug)]
pub struct PartialAccumulator {
    scopes: [AtomicF64; 4],
    is_loop: AtomicBool,
}

impl Default for PartialAccumulator {
    fn default() -> Self {
        Self {
            scopes: [
                AtomicF64::new(0.0),
                AtomicF64::new(0.0),
                AtomicF64::new(0.0),
                AtomicF64::new(0.0),
            ],
            is_loop: AtomicBool::new(false),
        }
    }
}

impl PartialAccumulator {
    /// Combines `value` into this partial's `scope` slot per `rule`.
    pub fn combine(&self, scope: MetricScope, value: f64, rule: Combine) {
        let cell = &self.scopes[scope.ordinal() as usize];
        match rule {
            Combine::Sum => {
                let _ = cell.fetch_add(value);
            }
            Combine::Min => cell.combine_min_max(value, true),
            Combine::Max => cell.combine_min_max(value, false),
        }
    }

    /// Reads the combined value for `scope`.
    #[must_use]
    pub fn value(&self, scope: MetricScope) -> f64 {
        self.scopes[scope.ordinal() as usize].load(Ordering::Relaxed)
    }

    /// Records whether the owning context is a loop.
    pub fn set_is_loop(&self, is_loop: bool) {
        self.is_loop.store(is_loop, Ordering::Relaxed);
    }
}

/// Cross-thread statistic state for one `(Context, Metric)` pair, owned by
/// the context. Stores one [`PartialAccumulator`] per
/// [`crate::metric::StatisticPartial`] registered on the metric.
#[derive(Debug)]
pub struct StatisticAccumulator {
    partials: Vec<PartialAccumulator>,
}

impl StatisticAccumulator {
    /// Creates storage for `partial_count` partials (at least 1, matching
    /// the identifier-table stride).
    #[must_use]
    pub fn new(partial_count: usize) -> Self {
        let count = partial_count.max(1);
        Self {
            partials: (0..count).map(|_| PartialAccumulator::default()).collect(),
        }
    }

    /// Combines `value` into partial `partial_index`'s `scope` slot.
    pub fn combine(&self, partial_index: u32, scope: MetricScope, value: f64, rule: Combine) {
        self.partials[partial_index as usize].combine(scope, value, rule);
    }

    /// Reads partial `partial_index`'s combined value for `scope`.
    #[must_use]
    pub fn value(&self, partial_index: u32, scope: MetricScope) -> f64 {
        self.partials[partial_index as usize].value(scope)
    }

    /// Number of identifier-table slots this accumulator spans
    /// (`partials.len() * SCOPE_COUNT`).
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.partials.len() as u32 * SCOPE_COUNT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_one_single_thread_one_metric() {
        // c1 = main->foo (point=1), c2 = main->foo->bar (point=1)
        let mut c2 = MetricAccumulator::new();
        c2.add_point(1.0);
        c2.seed_from_point();

        let mut c1 = MetricAccumulator::new();
        c1.add_point(1.0);
        c1.seed_from_point();
        c1.pull_from_child(&c2, false);

        assert_eq!(c1.point(), 1.0);
        assert_eq!(c1.function(), 2.0);
        assert_eq!(c1.execution(), 2.0);
        assert_eq!(c2.point(), 1.0);
        assert_eq!(c2.function(), 1.0);
        assert_eq!(c2.execution(), 1.0);
    }

    #[test]
    fn scenario_two_call_edge_boundary() {
        // c1=main->foo, c3=main->foo->[call]->baz with point=5
        let mut baz = MetricAccumulator::new();
        baz.add_point(5.0);
        baz.seed_from_point();

        let mut bar = MetricAccumulator::new();
        bar.add_point(1.0);
        bar.seed_from_point();

        let mut c1 = MetricAccumulator::new();
        c1.add_point(1.0);
        c1.seed_from_point();
        c1.pull_from_child(&bar, false);
        c1.pull_from_child(&baz, true); // call edge: function stops here

        assert_eq!(c1.execution(), 1.0 + 1.0 + 5.0);
        assert_eq!(c1.function(), 1.0 + 1.0); // does not cross the call
    }

    #[test]
    fn scenario_three_loop_awareness() {
        // loop (point=3, is_loop), child body (point=4)
        let mut body = MetricAccumulator::new();
        body.add_point(4.0);
        body.seed_from_point();

        let mut loop_acc = MetricAccumulator::new();
        loop_acc.add_point(3.0);
        loop_acc.seed_from_point();
        loop_acc.set_is_loop(true);
        loop_acc.pull_from_child(&body, false);

        assert_eq!(loop_acc.function(), 7.0);
        assert_eq!(loop_acc.execution(), 7.0);
        // `body` is not itself a loop, so it is still folded into
        // `function_noloops` here; the exclusion only kicks in one level
        // further up, when a loop's *parent* pulls from it. See
        // `perthread::tests::lex_aware_picks_function_noloops_for_a_loop_and_function_otherwise`
        // for the scope-selection rule this accumulator feeds.
        assert_eq!(loop_acc.function_noloops(), 7.0);
    }

    #[test]
    fn statistic_accumulator_sum_min_max() {
        let stat = StatisticAccumulator::new(1);
        stat.combine(0, MetricScope::Point, 4.0, Combine::Sum);
        stat.combine(0, MetricScope::Point, 6.0, Combine::Sum);
        assert_eq!(stat.value(0, MetricScope::Point), 10.0);

        let min_stat = StatisticAccumulator::new(1);
        min_stat.combine(0, MetricScope::Point, 4.0, Combine::Min);
        min_stat.combine(0, MetricScope::Point, 6.0, Combine::Min);
        assert_eq!(min_stat.value(0, MetricScope::Point), 4.0);
    }
}
