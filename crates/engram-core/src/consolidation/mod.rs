//! Event-driven consolidation engine.
//!
//! A bounded queue feeds a single consumer that selects high-scoring
//! episodic memories and asks the journal to transform them, under the
//! context monitor's budget. Producers never block: a full queue returns
//! `queue_full` and is counted.

mod engine;

pub use engine::{ConsolidationEngine, QUEUE_CAPACITY};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{EngramError, Result};
use crate::metrics::EngineCounters;

// ============================================================================
// TRIGGERS AND EVENTS
// ============================================================================

/// What woke the engine up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationTrigger {
    /// Session/process start.
    ContextInit,
    /// External "new conversation" signal.
    NewContext,
    /// Context usage crossed the configured fraction of the window.
    ThresholdReached,
    /// External end-of-conversation signal.
    ConversationEnd,
}

impl ConsolidationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationTrigger::ContextInit => "context_init",
            ConsolidationTrigger::NewContext => "new_context",
            ConsolidationTrigger::ThresholdReached => "threshold_reached",
            ConsolidationTrigger::ConversationEnd => "conversation_end",
        }
    }
}

impl std::fmt::Display for ConsolidationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One queued engine event.
#[derive(Debug, Clone)]
pub struct ConsolidationEvent {
    pub trigger: ConsolidationTrigger,
    pub occurred_at: DateTime<Utc>,
}

impl ConsolidationEvent {
    pub fn new(trigger: ConsolidationTrigger) -> Self {
        Self {
            trigger,
            occurred_at: Utc::now(),
        }
    }
}

// ============================================================================
// PRODUCER HANDLE
// ============================================================================

/// Cloneable producer side of the engine queue.
#[derive(Clone)]
pub struct ConsolidationHandle {
    tx: mpsc::Sender<ConsolidationEvent>,
    counters: Arc<EngineCounters>,
}

impl ConsolidationHandle {
    pub(crate) fn new(tx: mpsc::Sender<ConsolidationEvent>, counters: Arc<EngineCounters>) -> Self {
        Self { tx, counters }
    }

    /// Enqueue a trigger without blocking. Overflow is logged, counted, and
    /// surfaced as `queue_full` so producers may shed load.
    pub fn notify(&self, trigger: ConsolidationTrigger) -> Result<()> {
        match self.tx.try_send(ConsolidationEvent::new(trigger)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                crate::metrics::PipelineMetrics::incr(&self.counters.queue_overflow);
                tracing::warn!(trigger = %trigger, "consolidation queue full, event dropped");
                Err(EngramError::QueueFull("consolidation"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngramError::Internal(
                "consolidation engine stopped".to_string(),
            )),
        }
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// `Stopped -> Starting -> Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl EngineState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Starting,
            2 => EngineState::Running,
            3 => EngineState::Draining,
            _ => EngineState::Stopped,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            EngineState::Stopped => 0,
            EngineState::Starting => 1,
            EngineState::Running => 2,
            EngineState::Draining => 3,
        }
    }
}
