//! Composite importance scoring.
//!
//! `total = (access_count * access_weight + strength * relevance_weight) * decay`
//! where decay is hyperbolic in hours since last access. Scores are derived
//! on demand and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::MemoryEntry;

// ============================================================================
// WEIGHTS
// ============================================================================

/// Scoring knobs, shared with the consolidation config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Hyperbolic decay rate per hour since last access.
    pub decay_rate: f64,
    pub access_weight: f64,
    pub relevance_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            decay_rate: 0.01,
            access_weight: 0.6,
            relevance_weight: 0.4,
        }
    }
}

// ============================================================================
// SCORE
// ============================================================================

/// Derived, non-persistent score for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryScore {
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub semantic_relevance: f64,
    pub decay_factor: f64,
    pub total_score: f64,
}

/// Hyperbolic decay in (0, 1]; 1.0 at zero elapsed time.
pub fn decay_factor(hours_since_access: f64, decay_rate: f64) -> f64 {
    1.0 / (1.0 + hours_since_access.max(0.0) * decay_rate)
}

/// Score a single entry at `now`.
pub fn score_entry(entry: &MemoryEntry, now: DateTime<Utc>, weights: &ScoreWeights) -> MemoryScore {
    let access_count = entry.access_count();
    let elapsed = now.signed_duration_since(entry.accessed_at);
    let hours = (elapsed.num_milliseconds() as f64 / 3_600_000.0).max(0.0);
    let decay = decay_factor(hours, weights.decay_rate);
    let relevance = f64::from(entry.strength);
    let total =
        (access_count as f64 * weights.access_weight + relevance * weights.relevance_weight) * decay;
    MemoryScore {
        access_count,
        last_accessed: entry.accessed_at,
        semantic_relevance: relevance,
        decay_factor: decay,
        total_score: total,
    }
}

/// Select up to `limit` entries, highest composite score first.
///
/// Ties break by more recent `accessed_at`, then higher access count, then
/// lexicographic id, so selection is fully deterministic.
pub fn select_top(
    entries: Vec<MemoryEntry>,
    limit: usize,
    now: DateTime<Utc>,
    weights: &ScoreWeights,
) -> Vec<MemoryEntry> {
    let mut scored: Vec<(MemoryScore, MemoryEntry)> = entries
        .into_iter()
        .map(|entry| (score_entry(&entry, now, weights), entry))
        .collect();
    scored.sort_by(|(a, ea), (b, eb)| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_accessed.cmp(&a.last_accessed))
            .then_with(|| b.access_count.cmp(&a.access_count))
            .then_with(|| ea.id.to_string().cmp(&eb.id.to_string()))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(_, entry)| entry).collect()
}

// ============================================================================
// TESTS
// ============================================================================
