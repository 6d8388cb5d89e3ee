//! Context-window budget monitor.
//!
//! Tracks a synthetic token count (characters as the proxy) and gates
//! consolidation safety. Readers run concurrently; usage updates take the
//! write lock. Cost estimation is monotonic in total content length.

use std::sync::RwLock;

use serde::Serialize;

use crate::config::ConsolidationConfig;
use crate::memory::MemoryEntry;

/// Snapshot returned by [`ContextMonitor::state`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    pub window_size: u64,
    pub current_usage: u64,
    /// Cost of the most recent estimate, zero before any estimate.
    pub estimated_cost: u64,
    pub can_proceed: bool,
}

struct MonitorState {
    current_tokens: u64,
    last_estimate: u64,
}

pub struct ContextMonitor {
    max_tokens: u64,
    safety_margin: f64,
    overhead: u64,
    usage_threshold: f64,
    state: RwLock<MonitorState>,
}

impl ContextMonitor {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            safety_margin: config.safety_margin,
            overhead: config.estimate_overhead,
            usage_threshold: config.context_usage_threshold,
            state: RwLock::new(MonitorState {
                current_tokens: 0,
                last_estimate: 0,
            }),
        }
    }

    /// Externally reported usage; replaces the current figure.
    pub fn update_usage(&self, current_tokens: u64) {
        let mut state = self.state.write().expect("context monitor poisoned");
        state.current_tokens = current_tokens;
    }

    pub fn current_usage(&self) -> u64 {
        self.state
            .read()
            .expect("context monitor poisoned")
            .current_tokens
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    /// `sum(len(content)) + overhead`, characters as the token proxy. A real
    /// tokenizer may replace this without changing the contract.
    pub fn estimate_consolidation_cost(&self, entries: &[MemoryEntry]) -> u64 {
        let estimate = entries
            .iter()
            .map(|entry| entry.content.len() as u64)
            .sum::<u64>()
            + self.overhead;
        self.state
            .write()
            .expect("context monitor poisoned")
            .last_estimate = estimate;
        estimate
    }

    /// Whether consolidating `entries` keeps usage under the safety margin.
    pub fn can_safely_consolidate(&self, entries: &[MemoryEntry]) -> bool {
        let estimate = self.estimate_consolidation_cost(entries);
        let current = self.current_usage();
        let ceiling = (self.max_tokens as f64 * self.safety_margin) as u64;
        current.saturating_add(estimate) < ceiling
    }

    /// Whether usage crossed the `ThresholdReached` trigger line.
    pub fn usage_above_threshold(&self) -> bool {
        self.current_usage() as f64 >= self.max_tokens as f64 * self.usage_threshold
    }

    pub fn state(&self) -> ContextState {
        let state = self.state.read().expect("context monitor poisoned");
        let ceiling = (self.max_tokens as f64 * self.safety_margin) as u64;
        ContextState {
            window_size: self.max_tokens,
            current_usage: state.current_tokens,
            estimated_cost: state.last_estimate,
            can_proceed: state.current_tokens.saturating_add(state.last_estimate) < ceiling,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
