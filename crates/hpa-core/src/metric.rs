//! Metrics, statistic partials, and the identifier-table scheme used to
//! address every `(metric, partial, scope)` triple uniquely in the sparse
//! database.

use std::collections::HashMap;

use crate::error::Error;

/// Stable integer id for a [`Metric`], assigned at registration (uniqued by
/// name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricId(pub u32);

/// The four projection modes a metric value can be read under.
///
/// Ordinal order matches the identifier-table layout: `id(metric, part,
/// scope) = v + part.index * SCOPE_COUNT + scope.ordinal()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetricScope {
    /// Value attributed exactly at one context (single sample).
    Point = 0,
    /// Point plus descendants reached without crossing a call edge.
    Function = 1,
    /// `Function`, excluding descendants below child loops.
    LexAware = 2,
    /// Point plus all descendants (inclusive value).
    Execution = 3,
}

/// Number of [`MetricScope`] variants; the stride used by the identifier
/// table.
pub const SCOPE_COUNT: u32 = 4;

impl MetricScope {
    /// The ordinal used in the identifier-table formula.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self as u32
    }
}

/// The combine rule used to fold a [`StatisticPartial`]'s per-thread values
/// across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    /// Arithmetic sum.
    Sum,
    /// Minimum, with the 0-as-unset convention: zero is treated as
    /// "unset", so the first nonzero value observed wins ties against it.
    Min,
    /// Maximum, with the same 0-as-unset convention as [`Combine::Min`].
    Max,
}

/// Which derived statistics the CLI's `--metric` flag asks every metric to
/// carry, from least to most detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatisticRequestMode {
    /// No cross-thread statistics; only the raw per-thread partial values.
    Thread,
    /// Only the `sum` statistic.
    Sum,
    /// `sum`, `min`, `max`, and (where the metric's partials support it)
    /// `mean`, `stddev`, and `cv`.
    #[default]
    Stats,
}

/// The per-thread-value transform applied before combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AccumulateExpr {
    /// Forward the raw value unchanged.
    Identity,
    /// Square the value (used to accumulate a sum-of-squares for variance).
    Square,
    /// Always contributes `1.0` (used to accumulate a sample count).
    Count,
}

impl AccumulateExpr {
    /// Evaluates the expression on a thread-local metric value.
    #[must_use]
    pub fn eval(self, value: f64) -> f64 {
        match self {
            AccumulateExpr::Identity => value,
            AccumulateExpr::Square => value * value,
            AccumulateExpr::Count => 1.0,
        }
    }
}

/// A two-function composition `(accumulate, combine)`, plus the index used
/// by the identifier table and by [`crate::accumulator::StatisticAccumulator`]
/// to locate its slot.
#[derive(Debug, Clone, Copy)]
pub struct StatisticPartial {
    /// Index of this partial within its metric's partial list.
    pub index: u32,
    /// Per-thread-value transform.
    pub accumulate: AccumulateExpr,
    /// Cross-thread combine rule.
    pub combine: Combine,
}

/// A finalize expression evaluated over one or more partials' combined
/// values to produce a final statistic value.
#[derive(Debug, Clone)]
pub enum FinalizeExpr {
    /// Forward a single partial's value unchanged.
    Direct {
        /// Partial to forward.
        partial: u32,
    },
    /// `sum / count`.
    Mean {
        /// Partial holding the sum.
        sum: u32,
        /// Partial holding the count.
        count: u32,
    },
    /// Population standard deviation from sum, sum-of-squares, and count.
    StdDev {
        /// Partial holding the sum.
        sum: u32,
        /// Partial holding the sum of squares.
        sum_sq: u32,
        /// Partial holding the count.
        count: u32,
    },
    /// Coefficient of variation: `stddev / mean`.
    Cv {
        /// Partial holding the sum.
        sum: u32,
        /// Partial holding the sum of squares.
        sum_sq: u32,
        /// Partial holding the count.
        count: u32,
    },
}

impl FinalizeExpr {
    /// Evaluates the expression given each referenced partial's combined
    /// value, looked up by partial index.
    #[must_use]
    pub fn eval(&self, partial_value: impl Fn(u32) -> f64) -> f64 {
        match self {
            FinalizeExpr::Direct { partial } => partial_value(*partial),
            FinalizeExpr::Mean { sum, count } => {
                let c = partial_value(*count);
                if c == 0.0 { 0.0 } else { partial_value(*sum) / c }
            }
            FinalizeExpr::StdDev { sum, sum_sq, count } => {
                let c = partial_value(*count);
                if c == 0.0 {
                    return 0.0;
                }
                let mean = partial_value(*sum) / c;
                let mean_sq = partial_value(*sum_sq) / c;
                (mean_sq - mean * mean).max(0.0).sqrt()
            }
            FinalizeExpr::Cv { sum, sum_sq, count } => {
                let c = partial_value(*count);
                if c == 0.0 {
                    return 0.0;
                }
                let mean = partial_value(*sum) / c;
                if mean == 0.0 {
                    return 0.0;
                }
                let mean_sq = partial_value(*sum_sq) / c;
                let stddev = (mean_sq - mean * mean).max(0.0).sqrt();
                stddev / mean
            }
        }
    }
}

/// A named, composed statistic over one or more [`StatisticPartial`]s.
#[derive(Debug, Clone)]
pub struct Statistic {
    /// Display name (e.g. `"sum"`, `"mean"`, `"stddev"`).
    pub name: String,
    /// The finalize expression combining this statistic's partials.
    pub finalize: FinalizeExpr,
}

/// A measured quantity (e.g. cycles, cache misses, idle nanoseconds).
pub struct Metric {
    id: MetricId,
    name: String,
    description: String,
    scopes: Vec<MetricScope>,
    visible: bool,
    order: Option<u32>,
    statistics: Vec<Statistic>,
    partials: Vec<StatisticPartial>,
    frozen: bool,
    base_index: std::sync::OnceLock<u32>,
}

impl Metric {
    /// This metric's stable id.
    #[must_use]
    pub fn id(&self) -> MetricId {
        self.id
    }

    /// This metric's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scopes this metric has values on.
    #[must_use]
    pub fn scopes(&self) -> &[MetricScope] {
        &self.scopes
    }

    /// Whether the metric is shown in interactive views.
    #[must_use]
    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Presentation order, if assigned.
    #[must_use]
    pub fn order(&self) -> Option<u32> {
        self.order
    }

    /// Registered statistics.
    #[must_use]
    pub fn statistics(&self) -> &[Statistic] {
        &self.statistics
    }

    /// Registered partials.
    #[must_use]
    pub fn partials(&self) -> &[StatisticPartial] {
        &self.partials
    }

    /// Adds a statistic partial, freezing the metric against future
    /// statistic changes from this point (a `Metric` is *frozen* after any
    /// statistic or partial request).
    pub fn add_partial(&mut self, accumulate: AccumulateExpr, combine: Combine) -> u32 {
        let index = self.partials.len() as u32;
        self.partials.push(StatisticPartial {
            index,
            accumulate,
            combine,
        });
        self.frozen = true;
        index
    }

    /// Adds a finalized statistic referencing already-added partials.
    ///
    /// # Errors
    /// Returns [`Error::MetricFrozen`] only in the degenerate case where a
    /// caller attempts to mutate scopes after freezing; adding statistics
    /// itself never fails once partials exist.
    pub fn add_statistic(&mut self, name: impl Into<String>, finalize: FinalizeExpr) -> Result<(), Error> {
        self.frozen = true;
        self.statistics.push(Statistic {
            name: name.into(),
            finalize,
        });
        Ok(())
    }

    /// Whether this metric has been frozen by a prior statistic/partial
    /// request.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Requests the named statistics the CLI's `--metric` mode names,
    /// derived from whichever of this metric's partials are present.
    /// `thread` requests none; `sum` requests `sum` alone; `stats`
    /// additionally requests `min`, `max`, and — when the metric also
    /// carries a sample-count and sum-of-squares partial — `mean`,
    /// `stddev`, and `cv`.
    pub fn request_statistics(&mut self, mode: StatisticRequestMode) {
        if mode == StatisticRequestMode::Thread {
            return;
        }
        let partial = |accumulate: AccumulateExpr, combine: Combine| {
            self.partials
                .iter()
                .find(|p| p.accumulate == accumulate && p.combine == combine)
                .map(|p| p.index)
        };
        let sum = partial(AccumulateExpr::Identity, Combine::Sum);
        let min = partial(AccumulateExpr::Identity, Combine::Min);
        let max = partial(AccumulateExpr::Identity, Combine::Max);
        let count = partial(AccumulateExpr::Count, Combine::Sum);
        let sum_sq = partial(AccumulateExpr::Square, Combine::Sum);
        if let Some(sum) = sum {
            let _ = self.add_statistic("sum", FinalizeExpr::Direct { partial: sum });
        }
        if mode == StatisticRequestMode::Sum {
            return;
        }
        if let Some(min) = min {
            let _ = self.add_statistic("min", FinalizeExpr::Direct { partial: min });
        }
        if let Some(max) = max {
            let _ = self.add_statistic("max", FinalizeExpr::Direct { partial: max });
        }
        let (Some(sum), Some(count)) = (sum, count) else {
            return;
        };
        let _ = self.add_statistic("mean", FinalizeExpr::Mean { sum, count });
        if let Some(sum_sq) = sum_sq {
            let _ = self.add_statistic("stddev", FinalizeExpr::StdDev { sum, sum_sq, count });
            let _ = self.add_statistic("cv", FinalizeExpr::Cv { sum, sum_sq, count });
        }
    }

    /// The identifier-table base index `v`, once assigned at finalization.
    #[must_use]
    pub fn base_index(&self) -> Option<u32> {
        self.base_index.get().copied()
    }

    /// Assigns the identifier-table base index. Called once per metric
    /// during pipeline finalization, in a disjoint-range assignment order.
    pub fn set_base_index(&self, v: u32) {
        let _ = self.base_index.set(v);
    }

    /// `id(metric, part)`, once `base_index` has been assigned.
    #[must_use]
    pub fn partial_id(&self, part_index: u32) -> Option<u32> {
        self.base_index().map(|v| v + part_index * SCOPE_COUNT)
    }

    /// `id(metric, part, scope)`, once `base_index` has been assigned.
    #[must_use]
    pub fn partial_scope_id(&self, part_index: u32, scope: MetricScope) -> Option<u32> {
        self.base_index()
            .map(|v| v + part_index * SCOPE_COUNT + scope.ordinal())
    }
}

/// Settings used to register a new [`Metric`].
pub struct MetricSettings {
    /// Metric name, used as the uniqueness key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Scopes this metric will carry values on.
    pub scopes: Vec<MetricScope>,
    /// Whether the metric is shown in interactive views.
    pub visible: bool,
    /// Presentation order, if any.
    pub order: Option<u32>,
}

/// Insert-or-get registry for [`Metric`]s, uniqued by name.
#[derive(Default)]
pub struct MetricRegistry {
    metrics: Vec<Metric>,
    by_name: HashMap<String, MetricId>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new metric, or returns the id of an existing metric with
    /// the same name (settings of the existing metric are left unchanged).
    pub fn metric_add(&mut self, settings: MetricSettings) -> MetricId {
        if let Some(&id) = self.by_name.get(&settings.name) {
            return id;
        }
        let id = MetricId(self.metrics.len() as u32);
        self.metrics.push(Metric {
            id,
            name: settings.name.clone(),
            description: settings.description,
            scopes: settings.scopes,
            visible: settings.visible,
            order: settings.order,
            statistics: Vec::new(),
            partials: Vec::new(),
            frozen: false,
            base_index: std::sync::OnceLock::new(),
        });
        let _ = self.by_name.insert(settings.name, id);
        id
    }

    /// Looks up a metric by id.
    #[must_use]
    pub fn get(&self, id: MetricId) -> Option<&Metric> {
        self.metrics.get(id.0 as usize)
    }

    /// Mutable lookup, used to add statistics/partials after registration.
    pub fn get_mut(&mut self, id: MetricId) -> Option<&mut Metric> {
        self.metrics.get_mut(id.0 as usize)
    }

    /// Iterates all registered metrics in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    /// Iterates all registered metrics mutably, e.g. to apply the CLI's
    /// `--metric` statistic-request mode once every source has registered
    /// its metrics and their partials.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Metric> {
        self.metrics.iter_mut()
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether no metric has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Assigns disjoint identifier-table base indices to every metric, in
    /// registration order. Must run once, after all metrics and their
    /// partials are registered.
    pub fn finalize_identifiers(&self) {
        let mut next = 0u32;
        for metric in &self.metrics {
            metric.set_base_index(next);
            let partial_count = metric.partials.len().max(1) as u32;
            next += partial_count * SCOPE_COUNT;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_stddev_metric() -> Metric {
        let mut reg = MetricRegistry::new();
        let id = reg.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point, MetricScope::Execution],
            visible: true,
            order: None,
        });
        let metric = reg.get_mut(id).unwrap();
        let sum = metric.add_partial(AccumulateExpr::Identity, Combine::Sum);
        let sq = metric.add_partial(AccumulateExpr::Square, Combine::Sum);
        let count = metric.add_partial(AccumulateExpr::Count, Combine::Sum);
        metric
            .add_statistic("mean", FinalizeExpr::Mean { sum, count })
            .unwrap();
        metric
            .add_statistic(
                "stddev",
                FinalizeExpr::StdDev {
                    sum,
                    sum_sq: sq,
                    count,
                },
            )
            .unwrap();
        reg.finalize_identifiers();
        // return an owned copy by re-fetching through into_iter since Metric isn't Clone
        let mut metrics = Vec::new();
        for m in reg.metrics.drain(..) {
            metrics.push(m);
        }
        metrics.into_iter().next().unwrap()
    }

    #[test]
    fn scenario_two_threads_cross_thread_statistics() {
        // Thread A contributes point=4, Thread B contributes point=6.
        let metric = mean_stddev_metric();
        let a = 4.0_f64;
        let b = 6.0_f64;

        let sum = AccumulateExpr::Identity.eval(a) + AccumulateExpr::Identity.eval(b);
        let sum_sq = AccumulateExpr::Square.eval(a) + AccumulateExpr::Square.eval(b);
        let count = AccumulateExpr::Count.eval(a) + AccumulateExpr::Count.eval(b);

        assert_eq!(sum, 10.0);
        assert_eq!(count, 2.0);

        let values = |idx: u32| -> f64 {
            match idx {
                0 => sum,
                1 => sum_sq,
                2 => count,
                _ => unreachable!(),
            }
        };

        let mean_stat = metric.statistics().iter().find(|s| s.name == "mean").unwrap();
        let stddev_stat = metric.statistics().iter().find(|s| s.name == "stddev").unwrap();
        assert_eq!(mean_stat.finalize.eval(values), 5.0);
        assert_eq!(stddev_stat.finalize.eval(values), 1.0);
    }

    #[test]
    fn statistic_request_mode_thread_requests_nothing() {
        let mut reg = MetricRegistry::new();
        let id = reg.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let metric = reg.get_mut(id).unwrap();
        metric.add_partial(AccumulateExpr::Identity, Combine::Sum);
        metric.request_statistics(StatisticRequestMode::Thread);
        assert!(metric.statistics().is_empty());
    }

    #[test]
    fn statistic_request_mode_sum_requests_only_sum() {
        let mut reg = MetricRegistry::new();
        let id = reg.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let metric = reg.get_mut(id).unwrap();
        metric.add_partial(AccumulateExpr::Identity, Combine::Sum);
        metric.add_partial(AccumulateExpr::Identity, Combine::Min);
        metric.request_statistics(StatisticRequestMode::Sum);
        let names: Vec<&str> = metric.statistics().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["sum"]);
    }

    #[test]
    fn statistic_request_mode_stats_requests_every_available_derived_statistic() {
        let mut reg = MetricRegistry::new();
        let id = reg.metric_add(MetricSettings {
            name: "cycles".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let metric = reg.get_mut(id).unwrap();
        metric.add_partial(AccumulateExpr::Identity, Combine::Sum);
        metric.add_partial(AccumulateExpr::Identity, Combine::Min);
        metric.add_partial(AccumulateExpr::Identity, Combine::Max);
        metric.add_partial(AccumulateExpr::Square, Combine::Sum);
        metric.add_partial(AccumulateExpr::Count, Combine::Sum);
        metric.request_statistics(StatisticRequestMode::Stats);
        let names: Vec<&str> = metric.statistics().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["sum", "min", "max", "mean", "stddev", "cv"]);
    }

    #[test]
    fn identifier_table_ranges_are_disjoint() {
        let mut reg = MetricRegistry::new();
        let a = reg.metric_add(MetricSettings {
            name: "a".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let b = reg.metric_add(MetricSettings {
            name: "b".into(),
            description: String::new(),
            scopes: vec![MetricScope::Point],
            visible: true,
            order: None,
        });
        let _ = reg.get_mut(a).unwrap().add_partial(AccumulateExpr::Identity, Combine::Sum);
        let _ = reg.get_mut(a).unwrap().add_partial(AccumulateExpr::Square, Combine::Sum);
        reg.finalize_identifiers();

        let metric_a = reg.get(a).unwrap();
        let metric_b = reg.get(b).unwrap();
        assert_eq!(metric_a.base_index(), Some(0));
        // a has 2 partials * 4 scopes = 8 slots
        assert_eq!(metric_b.base_index(), Some(8));
        assert_eq!(metric_a.partial_id(0), Some(0));
        assert_eq!(metric_a.partial_id(1), Some(4));
        assert_eq!(metric_a.partial_scope_id(1, MetricScope::Execution), Some(4 + 3));
    }
}
