use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::error;

/// Process-wide write-through counter registry. Components increment named
/// counters; the orchestrator snapshots them into the run report. Histograms
/// are recorded as `<name>.sum` / `<name>.count` pairs.
#[derive(Debug, Default)]
pub struct MetricsSink {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, n: u64) {
        let mut counters = self.counters.lock().expect("metrics lock poisoned");
        *counters.entry(name.to_string()).or_insert(0) += n;
    }

    /// Record one observation of a duration-like value.
    pub fn observe(&self, name: &str, value: u64) {
        let mut counters = self.counters.lock().expect("metrics lock poisoned");
        *counters.entry(format!("{name}.sum")).or_insert(0) += value;
        *counters.entry(format!("{name}.count")).or_insert(0) += 1;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters.lock().expect("metrics lock poisoned").clone()
    }

    /// Alerts are loud: an error log with a stable code plus a counter.
    /// Everything else in the pipeline is statistical and observed via rates.
    pub fn alert(&self, code: &str, message: &str) {
        error!(alert = code, "{message}");
        self.incr(&format!("alert.{code}"));
    }
}
