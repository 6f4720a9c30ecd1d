//! A lock-free `f64` cell supporting atomic fetch-add and CAS-based
//! min/max, built on [`std::sync::atomic::AtomicU64`] over the value's bit
//! pattern.

use std::sync::atomic::{AtomicU64, Ordering};

/// An atomically-updatable `f64`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Creates a new cell initialized to `value`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Loads the current value.
    #[must_use]
    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    /// Stores `value`.
    pub fn store(&self, value: f64, order: Ordering) {
        self.0.store(value.to_bits(), order);
    }

    /// Atomically adds `value` to the cell with relaxed ordering, matching
    /// the point-scope write rule: an atomic floating-point fetch-add with
    /// relaxed ordering.
    pub fn fetch_add(&self, value: f64) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let current_f = f64::from_bits(current);
            let new_f = current_f + value;
            match self.0.compare_exchange_weak(
                current,
                new_f.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current_f,
                Err(observed) => current = observed,
            }
        }
    }

    /// CAS-based combine with the `min`/`max` 0-as-unset convention: zero
    /// is treated as "unset", so the first nonzero value observed wins
    /// ties against it.
    pub fn combine_min_max(&self, candidate: f64, take_min: bool) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let current_f = f64::from_bits(current);
            let should_replace = if current_f == 0.0 {
                candidate != 0.0
            } else if candidate == 0.0 {
                false
            } else if take_min {
                candidate < current_f
            } else {
                candidate > current_f
            };
            if !should_replace {
                return;
            }
            match self.0.compare_exchange_weak(
                current,
                candidate.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.load(Ordering::Relaxed))
    }
}
