//! Consolidation transform - cluster, reduce, link, and update sources.
//!
//! Lives on the journal so the new entry, its `derived_from` edges, and the
//! source metadata updates stay transactionally coupled to storage. Lossy by
//! design: the reducer is the learned summarizer when available, otherwise
//! deterministic concatenation-with-deduplication.

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::cluster::single_linkage;
use super::VectorJournal;
use crate::cancel::Cancellation;
use crate::error::Result;
use crate::memory::{keys, AssociationKind, MemoryAssociation, MemoryEntry, MemoryType, Metadata};

/// Result of one consolidation run.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationOutcome {
    /// Source entries that were cited by a new higher-type entry.
    pub processed: usize,
    /// Ids of the new higher-type entries.
    pub created: Vec<Uuid>,
}

impl VectorJournal {
    /// Transform groups of related episodic entries into higher-type
    /// entries. Empty input is a no-op. Re-running on the same sources
    /// produces nothing new: the cluster fingerprint is remembered.
    pub async fn consolidate_memories(
        &self,
        entries: Vec<MemoryEntry>,
        trigger: &str,
        cancel: &Cancellation,
    ) -> Result<ConsolidationOutcome> {
        if entries.is_empty() {
            return Ok(ConsolidationOutcome::default());
        }
        cancel.checkpoint()?;

        let vectors: Vec<&[f32]> = entries.iter().map(|e| e.embedding.as_slice()).collect();
        let clusters = single_linkage(&vectors, self.consolidation_config().linkage_threshold);

        let mut outcome = ConsolidationOutcome::default();
        let now = Utc::now();

        for cluster in clusters {
            if cluster.len() < 2 {
                continue;
            }
            cancel.checkpoint()?;
            let members: Vec<&MemoryEntry> = cluster.iter().map(|&i| &entries[i]).collect();

            let fingerprint = cluster_fingerprint(&members);
            {
                let mut seen = self.fingerprint_map().lock().await;
                if seen.contains_key(&fingerprint) {
                    tracing::debug!(fingerprint = %fingerprint,
                        "cluster already consolidated, skipping");
                    continue;
                }
                // Reserve before the async work below so a concurrent run of
                // the same sources cannot double-create.
                seen.insert(fingerprint.clone(), Uuid::nil());
            }

            let memory_type = derived_type(&members);
            let content = self.reduce(&members, cancel).await;
            let strength = (members.iter().map(|m| f64::from(m.strength)).sum::<f64>()
                / members.len() as f64) as f32;

            let mut metadata = Metadata::new();
            metadata.insert("source".to_string(), Value::from("consolidation"));
            metadata.insert(
                keys::CONSOLIDATION_SOURCES.to_string(),
                Value::from(
                    members
                        .iter()
                        .map(|m| m.id.to_string())
                        .collect::<Vec<_>>(),
                ),
            );
            metadata.insert(
                keys::CLUSTER_FINGERPRINT.to_string(),
                Value::from(fingerprint.clone()),
            );
            metadata.insert(
                keys::CONSOLIDATION_TRIGGER.to_string(),
                Value::from(trigger),
            );

            let mut derived = MemoryEntry::new("consolidation", content, metadata);
            derived.memory_type = memory_type;
            derived.strength = strength.clamp(0.0, 1.0);

            let derived = match self.store_entry(derived, cancel).await {
                Ok(entry) => entry,
                Err(err) => {
                    // Release the reservation so a later run may retry.
                    self.fingerprint_map().lock().await.remove(&fingerprint);
                    return Err(err);
                }
            };
            self.fingerprint_map()
                .lock()
                .await
                .insert(fingerprint, derived.id);

            for member in &members {
                self.association_graph().insert(MemoryAssociation::new(
                    derived.id,
                    member.id,
                    AssociationKind::DerivedFrom,
                    1.0,
                ));
            }

            // Sources record the citation: bumped access count, refreshed
            // access time, and the consolidation stamp.
            for member in &members {
                let mut source = (*member).clone();
                source.mark_accessed(now);
                source.metadata.insert(
                    keys::LAST_CONSOLIDATION.to_string(),
                    Value::from(now.to_rfc3339()),
                );
                self.persist_entry_metadata(&source).await?;
            }

            tracing::info!(derived = %derived.id, memory_type = %derived.memory_type,
                sources = members.len(), trigger, "consolidated cluster");
            outcome.processed += members.len();
            outcome.created.push(derived.id);
        }

        if !outcome.created.is_empty() {
            self.record_consolidation(now).await;
        }
        Ok(outcome)
    }

    /// Reduce cluster contents to one text: learned summarizer when the
    /// provider has one, deterministic concatenation-with-deduplication
    /// otherwise.
    async fn reduce(&self, members: &[&MemoryEntry], cancel: &Cancellation) -> String {
        let contents: Vec<String> = members.iter().map(|m| m.content.clone()).collect();
        match self.embeddings().summarize(&contents, cancel).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) | Err(_) => concat_dedup(&contents),
        }
    }
}

/// Deterministic fingerprint of a source set: order-independent hash of the
/// member ids.
fn cluster_fingerprint(members: &[&MemoryEntry]) -> String {
    let mut ids: Vec<String> = members.iter().map(|m| m.id.to_string()).collect();
    ids.sort();
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0]);
    }
    format!("{:x}", hasher.finalize())
}

/// Pick the derived type: procedural when command/action episodes dominate,
/// metacognitive when reflective tags dominate, semantic otherwise.
fn derived_type(members: &[&MemoryEntry]) -> MemoryType {
    let half = members.len().div_ceil(2);
    let action = members.iter().filter(|m| is_action(m)).count();
    if action >= half {
        return MemoryType::Procedural;
    }
    let reflective = members.iter().filter(|m| is_reflective(m)).count();
    if reflective >= half {
        return MemoryType::Metacognitive;
    }
    MemoryType::Semantic
}

fn is_action(entry: &MemoryEntry) -> bool {
    entry
        .metadata
        .get(keys::EVENT_TYPE)
        .and_then(Value::as_str)
        .map(|t| t.starts_with("command"))
        .unwrap_or(false)
}

fn is_reflective(entry: &MemoryEntry) -> bool {
    entry
        .metadata
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter().any(|tag| {
                tag.as_str()
                    .map(|t| matches!(t, "reflection" | "insight" | "self"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Concatenate contents, dropping repeated lines while preserving first-seen
/// order.
fn concat_dedup(contents: &[String]) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut lines = Vec::new();
    for content in contents {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen.insert(trimmed.to_string()) {
                lines.push(trimmed.to_string());
            }
        }
    }
    lines.join("\n")
}

// ============================================================================
// TESTS
// ============================================================================
