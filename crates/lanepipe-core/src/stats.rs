use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-sub-step timing, shared between worker threads and the scheduler.
///
/// `original_source/src/LaneBase.cpp` guards a `(name, start)`/`(name, end)`
/// log behind a recursive mutex and prints per-step averages at shutdown
/// (`PrintAvgDurations`). A plain `Mutex` is the idiomatic stand-in here:
/// each worker only ever holds the lock for the duration of one `push`.
#[derive(Clone, Default)]
pub struct DurationLog {
    inner: Arc<Mutex<HashMap<&'static str, Vec<Duration>>>>,
}

impl DurationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sub_step_name: &'static str, elapsed: Duration) {
        let mut guard = self.inner.lock().unwrap();
        guard.entry(sub_step_name).or_default().push(elapsed);
    }

    /// One average per sub-step name, sorted by name for stable output.
    pub fn averages(&self) -> Vec<(&'static str, Duration)> {
        let guard = self.inner.lock().unwrap();
        let mut out: Vec<_> = guard
            .iter()
            .map(|(name, samples)| {
                let total: Duration = samples.iter().sum();
                (*name, total / samples.len() as u32)
            })
            .collect();
        out.sort_by_key(|(name, _)| *name);
        out
    }
}
