//! Wavefront synchronization barriers: one `Mutex`/`Condvar` pair per
//! [`Class`](crate::dataclass::Class), broadcast when the last source still
//! providing that class completes.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::dataclass::{Class, DataClass, CLASS_COUNT};

struct State {
    /// Number of not-yet-complete sources whose `provides` set still
    /// includes each class.
    remaining_providers: [usize; CLASS_COUNT],
    /// Whether each class's wavefront has fired.
    fired: [bool; CLASS_COUNT],
}

/// Tracks, per [`Class`], how many still-running sources could yet produce
/// it, and fires a barrier the moment that count reaches zero.
pub struct WavefrontSet {
    state: Mutex<State>,
    condvar: Condvar,
}

impl WavefrontSet {
    /// Builds a wavefront tracker from every source's declared `provides`
    /// set.
    #[must_use]
    pub fn new(source_provides: &[DataClass]) -> Self {
        let mut remaining_providers = [0usize; CLASS_COUNT];
        for &provides in source_provides {
            for class in provides.iter() {
                remaining_providers[class as usize] += 1;
            }
        }
        Self {
            state: Mutex::new(State {
                remaining_providers,
                fired: [false; CLASS_COUNT],
            }),
            condvar: Condvar::new(),
        }
    }

    /// Marks one source as complete, decrementing the remaining-provider
    /// count for every class it declared, firing any wavefront whose count
    /// reaches zero.
    pub fn source_complete(&self, provides: DataClass) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for class in provides.iter() {
            let idx = class as usize;
            debug_assert!(state.remaining_providers[idx] > 0);
            state.remaining_providers[idx] = state.remaining_providers[idx].saturating_sub(1);
            if state.remaining_providers[idx] == 0 && !state.fired[idx] {
                state.fired[idx] = true;
                tracing::debug!(class = ?class, "wavefront fired");
            }
        }
        self.condvar.notify_all();
    }

    /// Blocks the calling thread until every class in `demand` has fired,
    /// or until `timeout` elapses. Returns `false` if `timeout` elapses
    /// first, leaving one or more demanded classes unfired; `None` waits
    /// indefinitely and always returns `true`.
    ///
    /// Sinks waiting on the same class are released in the same
    /// `notify_all` broadcast; the order sinks subsequently observe the
    /// release is their own registration order, established by the
    /// pipeline driver before spawning sink threads.
    pub fn wait_for(&self, demand: DataClass, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(timeout) = timeout else {
            while !demand.iter().all(|c| state.fired[c as usize]) {
                state = self
                    .condvar
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !demand.iter().all(|c| state.fired[c as usize]) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next_state, result) = self
                .condvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = next_state;
            if result.timed_out() && !demand.iter().all(|c| state.fired[c as usize]) {
                return false;
            }
        }
        true
    }

    /// Whether `class` has already fired.
    #[must_use]
    pub fn has_fired(&self, class: Class) -> bool {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .fired[class as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fires_when_last_provider_completes() {
        let provides = vec![
            DataClass::of(Class::Contexts),
            DataClass::of(Class::Contexts) | DataClass::of(Class::Metrics),
        ];
        let wf = Arc::new(WavefrontSet::new(&provides));
        assert!(!wf.has_fired(Class::Contexts));

        wf.source_complete(provides[0]);
        assert!(!wf.has_fired(Class::Contexts));

        wf.source_complete(provides[1]);
        assert!(wf.has_fired(Class::Contexts));
        assert!(wf.has_fired(Class::Metrics));
    }

    #[test]
    fn wait_for_blocks_until_fired() {
        let provides = vec![DataClass::of(Class::Contexts)];
        let wf = Arc::new(WavefrontSet::new(&provides));
        let wf2 = Arc::clone(&wf);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            wf2.source_complete(DataClass::of(Class::Contexts));
        });

        assert!(wf.wait_for(DataClass::of(Class::Contexts), None));
        assert!(wf.has_fired(Class::Contexts));
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_times_out_when_demand_never_fires() {
        let provides = vec![DataClass::of(Class::Contexts)];
        let wf = WavefrontSet::new(&provides);
        assert!(!wf.wait_for(DataClass::of(Class::Contexts), Some(Duration::from_millis(20))));
    }
}
