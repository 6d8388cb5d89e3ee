//! Memory entry - the atomic unit of the journal.
//!
//! Each entry carries content, an embedding of the collection's fixed
//! dimension (or none while pending), an open metadata map, and a strength
//! value used as the semantic-relevance proxy by the scorer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Open key-value metadata attached to entries and events.
pub type Metadata = HashMap<String, Value>;

/// Well-known metadata keys.
pub mod keys {
    /// Number of times the entry was fetched or cited. Defaults to 1.
    pub const ACCESS_COUNT: &str = "access_count";
    /// RFC 3339 timestamp of the last consolidation that cited this entry.
    pub const LAST_CONSOLIDATION: &str = "last_consolidation";
    /// Ids of the episodic sources a derived entry was built from.
    pub const CONSOLIDATION_SOURCES: &str = "consolidation_sources";
    /// Deterministic fingerprint of the source cluster of a derived entry.
    pub const CLUSTER_FINGERPRINT: &str = "cluster_fingerprint";
    /// Which consolidation trigger produced a derived entry.
    pub const CONSOLIDATION_TRIGGER: &str = "consolidation_trigger";
    /// Originating capture-event type (`file_write`, `command_run`, ...).
    pub const EVENT_TYPE: &str = "event_type";
    /// Capture priority assigned by the filter.
    pub const PRIORITY: &str = "priority";
}

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// Memory type, one logical collection per variant.
///
/// Episodic entries come straight from captures; the other three are only
/// ever produced by consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A specific, time-anchored event derived directly from a capture.
    #[default]
    Episodic,
    /// Distilled, generalized knowledge derived from multiple episodes.
    Semantic,
    /// A sequence-oriented pattern derived from action-bearing episodes.
    Procedural,
    /// A self-referential observation derived from reflective episodes.
    Metacognitive,
}

impl MemoryType {
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Procedural,
        MemoryType::Metacognitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::Metacognitive => "metacognitive",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "episodic" => Some(MemoryType::Episodic),
            "semantic" => Some(MemoryType::Semantic),
            "procedural" => Some(MemoryType::Procedural),
            "metacognitive" => Some(MemoryType::Metacognitive),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY ENTRY
// ============================================================================

/// A single stored memory.
///
/// An entry never changes type after creation; consolidation produces *new*
/// entries linked back to their sources via metadata and `derived_from`
/// associations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Unique identifier (UUID v4), assigned at creation.
    pub id: Uuid,
    /// Memory type; fixed for the lifetime of the entry.
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// UTF-8 content.
    pub content: String,
    /// Dense vector of the collection's dimension; empty while pending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Open metadata map (source, tags, access counters, derivation links).
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// Always >= `created_at`.
    pub accessed_at: DateTime<Utc>,
    /// Semantic-relevance proxy in [0, 1].
    pub strength: f32,
}

impl MemoryEntry {
    /// Create a fresh episodic entry from a capture.
    pub fn new(source: impl Into<String>, content: impl Into<String>, metadata: Metadata) -> Self {
        let now = Utc::now();
        let mut metadata = metadata;
        metadata.insert("source".to_string(), Value::String(source.into()));
        Self {
            id: Uuid::new_v4(),
            memory_type: MemoryType::Episodic,
            content: content.into(),
            embedding: Vec::new(),
            metadata,
            created_at: now,
            accessed_at: now,
            strength: 0.5,
        }
    }

    /// An entry without an embedding is pending: stored, but invisible to
    /// similarity search until a later store refreshes it.
    pub fn is_pending(&self) -> bool {
        self.embedding.is_empty()
    }

    /// Source tag from metadata, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    /// Access count read defensively with the domain default of 1.
    pub fn access_count(&self) -> u64 {
        self.metadata
            .get(keys::ACCESS_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .max(1)
    }

    /// Record a read: bump `accessed_at` and the access counter.
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.accessed_at = self.accessed_at.max(now);
        let next = self.access_count() + 1;
        self.metadata
            .insert(keys::ACCESS_COUNT.to_string(), Value::from(next));
    }

    /// Rough word count used by enrichment (`len/5` character proxy).
    pub fn word_count(&self) -> usize {
        self.content.len() / 5
    }
}

// ============================================================================
// ASSOCIATIONS
// ============================================================================

/// Kind of a directed association between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    Temporal,
    Semantic,
    Causal,
    Contextual,
    /// Only ever emitted by consolidation, pointing new -> source.
    DerivedFrom,
}

impl AssociationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationKind::Temporal => "temporal",
            AssociationKind::Semantic => "semantic",
            AssociationKind::Causal => "causal",
            AssociationKind::Contextual => "contextual",
            AssociationKind::DerivedFrom => "derived_from",
        }
    }
}

impl std::fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed, typed edge between two memory ids.
///
/// Edges are first-class records keyed by endpoints; they are never mutated
/// after creation and are only removed by cascade when an endpoint is
/// pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAssociation {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: AssociationKind,
    /// Edge weight in [0, 1]; cosine similarity for store-time edges.
    pub weight: f32,
    pub created_at: DateTime<Utc>,
}

impl MemoryAssociation {
    pub fn new(source_id: Uuid, target_id: Uuid, kind: AssociationKind, weight: f32) -> Self {
        Self {
            source_id,
            target_id,
            kind,
            weight: weight.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Journal-wide statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_memories: u64,
    /// Count per memory type, keyed by type name.
    pub per_type_counts: HashMap<String, u64>,
    pub total_associations: u64,
    pub avg_strength: f64,
    pub last_consolidation_at: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_roundtrip() {
        for memory_type in MemoryType::ALL {
            assert_eq!(MemoryType::parse_name(memory_type.as_str()), Some(memory_type));
        }
        assert_eq!(MemoryType::parse_name("reflex"), None);
    }

    #[test]
    fn new_entry_is_pending_episodic() {
        let entry = MemoryEntry::new("a.txt", "hello world", Metadata::new());
        assert_eq!(entry.memory_type, MemoryType::Episodic);
        assert!(entry.is_pending());
        assert_eq!(entry.source(), Some("a.txt"));
        assert_eq!(entry.created_at, entry.accessed_at);
        assert_eq!(entry.access_count(), 1);
    }

    #[test]
    fn mark_accessed_is_monotonic() {
        let mut entry = MemoryEntry::new("a.txt", "hello", Metadata::new());
        let before = entry.accessed_at;
        entry.mark_accessed(Utc::now());
        assert!(entry.accessed_at >= before);
        assert_eq!(entry.access_count(), 2);

        // A stale clock never moves accessed_at backwards.
        entry.mark_accessed(before - chrono::Duration::hours(1));
        assert!(entry.accessed_at >= before);
        assert_eq!(entry.access_count(), 3);
    }

    #[test]
    fn access_count_reads_defensively() {
        let mut entry = MemoryEntry::new("a.txt", "hello", Metadata::new());
        entry
            .metadata
            .insert(keys::ACCESS_COUNT.into(), Value::String("garbage".into()));
        assert_eq!(entry.access_count(), 1);
        entry.metadata.insert(keys::ACCESS_COUNT.into(), Value::from(0u64));
        assert_eq!(entry.access_count(), 1);
    }

    #[test]
    fn word_count_uses_character_proxy() {
        let entry = MemoryEntry::new("a.txt", "0123456789", Metadata::new());
        assert_eq!(entry.word_count(), 2);
    }

    #[test]
    fn association_weight_is_clamped() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let edge = MemoryAssociation::new(a, b, AssociationKind::Semantic, 1.7);
        assert_eq!(edge.weight, 1.0);
        assert_eq!(edge.kind.as_str(), "semantic");
        assert_eq!(AssociationKind::DerivedFrom.as_str(), "derived_from");
    }
}
