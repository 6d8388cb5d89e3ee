//! Capture events - transient input to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::Metadata;

// ============================================================================
// EVENT TYPES
// ============================================================================

/// What the agent host observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileRead,
    FileWrite,
    FileDelete,
    CommandRun,
    CommandOutput,
    SearchQuery,
    SearchResults,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FileRead => "file_read",
            EventType::FileWrite => "file_write",
            EventType::FileDelete => "file_delete",
            EventType::CommandRun => "command_run",
            EventType::CommandOutput => "command_output",
            EventType::SearchQuery => "search_query",
            EventType::SearchResults => "search_results",
        }
    }

    /// File-family events share debounce and size rules.
    pub fn is_file(&self) -> bool {
        matches!(self, EventType::FileRead | EventType::FileWrite | EventType::FileDelete)
    }

    pub fn is_command(&self) -> bool {
        matches!(self, EventType::CommandRun | EventType::CommandOutput)
    }

    pub fn is_search(&self) -> bool {
        matches!(self, EventType::SearchQuery | EventType::SearchResults)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PRIORITY
// ============================================================================

/// Capture priority, assigned by the filter (never by the producer).
///
/// Ordering is by urgency: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Dense index used by the priority queue lanes (0 = critical).
    pub fn lane(&self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// Normalized urgency weight used by profile capture thresholds.
    pub fn weight(&self) -> f64 {
        match self {
            Priority::Low => 0.25,
            Priority::Medium => 0.5,
            Priority::High => 0.75,
            Priority::Critical => 1.0,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CAPTURE EVENT
// ============================================================================

/// A raw context-capture event from the agent host.
///
/// Owned by the pipeline until hand-off to the journal; dropped events never
/// leave the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Producer-side origin: a path, a command line, a search scope.
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    /// Assigned by the filter; producers submit with the default.
    #[serde(default)]
    pub priority: Priority,
}

impl CaptureEvent {
    pub fn new(event_type: EventType, source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            event_type,
            source: source.into(),
            content: content.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            priority: Priority::default(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Numeric metadata field read defensively.
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(serde_json::Value::as_u64)
    }
}

// ============================================================================
// TESTS
// ============================================================================
