use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One successful acquisition: how many probes it took and how long it slept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireSample {
    pub probes: u32,
    pub wait: Duration,
}

/// Append-only sample log, kept only when `gatherStats` is on.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    enabled: bool,
    samples: Mutex<Vec<AcquireSample>>,
}

impl Stats {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            samples: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record(&self, sample: AcquireSample) {
        if !self.enabled {
            return;
        }
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }

    pub(crate) fn snapshot(&self) -> Vec<AcquireSample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
