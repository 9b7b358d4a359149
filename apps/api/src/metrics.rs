//! Best-effort operational counters.
//!
//! Recording a metric must never fail an evaluation: `incr` swallows lock
//! poisoning and carries on. Callers get no error channel here on purpose.

use std::collections::HashMap;
use std::sync::Mutex;

/// Named monotonic counters, shared across workers via `Arc<Metrics>`.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<HashMap<String, u64>>,
}

/// Counter incremented when a provider's whole evaluation sequence fails.
pub fn provider_failures(provider: &str) -> String {
    format!("llm.{provider}.failures")
}

/// Counter incremented when an evaluation restarts on the fallback provider.
pub fn provider_fallbacks(provider: &str) -> String {
    format!("llm.{provider}.fallbacks")
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a named counter. Best-effort: a poisoned lock is ignored
    /// rather than propagated.
    pub fn incr(&self, name: &str) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    /// Current value of a counter; 0 if it was never incremented.
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|counters| counters.get(name).copied())
            .unwrap_or(0)
    }

    /// Copy of all counters, for the read-only metrics endpoint.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .lock()
            .map(|counters| counters.clone())
            .unwrap_or_default()
    }
}
