//! Pipeline metrics: totals, per-intent counts, rolling average execution
//! time. Updated exactly once per terminal command.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::CommandStatus;
use crate::intent::IntentKind;

#[derive(Debug, Clone)]
struct Counters {
    total: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    cancelled: u64,
    per_intent: HashMap<IntentKind, u64>,
    avg_execution_time: f64,
    last_reset: DateTime<Utc>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            cancelled: 0,
            per_intent: HashMap::new(),
            avg_execution_time: 0.0,
            last_reset: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct CommandMetrics {
    counters: Mutex<Counters>,
}

impl CommandMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        intent: IntentKind,
        status: CommandStatus,
        success: bool,
        execution_time: f64,
    ) {
        let mut counters = self.counters.lock().expect("metrics lock");
        counters.total += 1;
        match status {
            CommandStatus::Timeout => counters.timeouts += 1,
            CommandStatus::Cancelled => counters.cancelled += 1,
            _ if success => counters.successes += 1,
            _ => counters.failures += 1,
        }
        *counters.per_intent.entry(intent).or_insert(0) += 1;
        let total = counters.total as f64;
        counters.avg_execution_time =
            (counters.avg_execution_time * (total - 1.0) + execution_time) / total;
    }

    pub fn total(&self) -> u64 {
        self.counters.lock().expect("metrics lock").total
    }

    pub fn snapshot(&self) -> Value {
        let counters = self.counters.lock().expect("metrics lock");
        let per_intent: HashMap<&'static str, u64> = counters
            .per_intent
            .iter()
            .map(|(intent, count)| (intent.as_str(), *count))
            .collect();
        json!({
            "total_commands": counters.total,
            "successful_commands": counters.successes,
            "failed_commands": counters.failures,
            "timeout_commands": counters.timeouts,
            "cancelled_commands": counters.cancelled,
            "per_intent": per_intent,
            "average_execution_time": counters.avg_execution_time,
            "last_reset": counters.last_reset,
        })
    }

    pub fn reset(&self) {
        *self.counters.lock().expect("metrics lock") = Counters::default();
    }

    /// Reset once the total crosses `threshold`; true when it happened.
    pub fn reset_if_large(&self, threshold: u64) -> bool {
        let should = self.total() > threshold;
        if should {
            self.reset();
        }
        should
    }
}
