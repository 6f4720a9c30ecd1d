//! Global, insert-or-get storage for [`StatisticAccumulator`]s, one per
//! `(Context, Metric)` pair actually touched by any thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::accumulator::StatisticAccumulator;
use crate::context::ContextId;
use crate::metric::MetricId;

/// Insert-or-get registry for [`StatisticAccumulator`]s.
#[derive(Default)]
pub struct StatisticStore {
    cells: Mutex<HashMap<(ContextId, MetricId), Arc<StatisticAccumulator>>>,
}

impl StatisticStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulator for `(context, metric)`, creating it with
    /// `partial_count` slots on first access.
    pub fn get_or_create(&self, context: ContextId, metric: MetricId, partial_count: usize) -> Arc<StatisticAccumulator> {
        let mut cells = self.cells.lock();
        Arc::clone(
            cells
                .entry((context, metric))
                .or_insert_with(|| Arc::new(StatisticAccumulator::new(partial_count))),
        )
    }

    /// Looks up an existing accumulator without creating one.
    #[must_use]
    pub fn get(&self, context: ContextId, metric: MetricId) -> Option<Arc<StatisticAccumulator>> {
        self.cells.lock().get(&(context, metric)).cloned()
    }

    /// Iterates every `(context, metric)` cell currently stored.
    pub fn keys(&self) -> Vec<(ContextId, MetricId)> {
        self.cells.lock().keys().copied().collect()
    }
}
