//! Vector journal - typed storage of memories over the index boundary.
//!
//! Owns persistence of entries and associations exclusively. One logical
//! collection per memory type, all sharing the dimension fixed at init.
//! Failed embedding acquisition stores the entry *pending* (no vector);
//! similarity search never sees pending entries.

mod associations;
mod cluster;
mod consolidate;

pub use associations::AssociationGraph;
pub use consolidate::ConsolidationOutcome;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::cancel::Cancellation;
use crate::config::{ConsolidationConfig, JournalConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::index::{IndexPoint, VectorIndex};
use crate::memory::{
    decay_factor, AssociationKind, MemoryAssociation, MemoryEntry, MemoryStats, MemoryType,
    Metadata, ScoreWeights,
};

const BACKOFF_BASE: Duration = Duration::from_secs(1);

// ============================================================================
// RESULT SHAPES
// ============================================================================

/// A similarity hit with its raw and decay-adjusted scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    pub entry: MemoryEntry,
    pub similarity: f32,
    /// `similarity * decay(now - accessed_at)`, the query-time ordering key.
    pub composite: f64,
}

/// Entry plus its association neighbourhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWithAssociations {
    pub entry: MemoryEntry,
    pub outbound: Vec<MemoryAssociation>,
    pub inbound: Vec<MemoryAssociation>,
    /// Entries on the far end of the edges above, deduplicated.
    pub neighbors: Vec<MemoryEntry>,
}

/// Per-entry outcome of a best-effort batch store.
#[derive(Debug, Default)]
pub struct BatchStoreOutcome {
    pub stored: Vec<Uuid>,
    pub errors: BTreeMap<Uuid, EngramError>,
}

// ============================================================================
// JOURNAL
// ============================================================================

pub struct VectorJournal {
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: JournalConfig,
    consolidation: ConsolidationConfig,
    associations: AssociationGraph,
    /// Serializes read-modify-write metadata bumps so access counters never
    /// lose increments.
    access_lock: Mutex<()>,
    /// Cluster fingerprint -> derived entry id, for idempotent consolidation.
    fingerprints: Mutex<HashMap<String, Uuid>>,
    last_consolidation: RwLock<Option<DateTime<Utc>>>,
    /// Running strength sum for cheap stats.
    strength_sum: Mutex<f64>,
}

impl VectorJournal {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: JournalConfig,
        consolidation: ConsolidationConfig,
    ) -> Self {
        Self {
            index,
            embeddings,
            config,
            consolidation,
            associations: AssociationGraph::new(),
            access_lock: Mutex::new(()),
            fingerprints: Mutex::new(HashMap::new()),
            last_consolidation: RwLock::new(None),
            strength_sum: Mutex::new(0.0),
        }
    }

    /// Create the per-type collections and probe the backend.
    pub async fn init(&self) -> Result<()> {
        self.index.health().await?;
        for memory_type in MemoryType::ALL {
            self.index
                .ensure_collection(self.collection(memory_type), self.config.vector_dimension)
                .await?;
        }
        Ok(())
    }

    pub fn collection(&self, memory_type: MemoryType) -> &str {
        match memory_type {
            MemoryType::Episodic => &self.config.collection_names.episodic,
            MemoryType::Semantic => &self.config.collection_names.semantic,
            MemoryType::Procedural => &self.config.collection_names.procedural,
            MemoryType::Metacognitive => &self.config.collection_names.metacognitive,
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.vector_dimension
    }

    pub(crate) fn score_weights(&self) -> ScoreWeights {
        self.consolidation.score_weights()
    }

    pub(crate) fn consolidation_config(&self) -> &ConsolidationConfig {
        &self.consolidation
    }

    pub(crate) fn embeddings(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embeddings
    }

    pub(crate) fn association_graph(&self) -> &AssociationGraph {
        &self.associations
    }

    pub(crate) fn fingerprint_map(&self) -> &Mutex<HashMap<String, Uuid>> {
        &self.fingerprints
    }

    pub async fn health(&self) -> Result<()> {
        self.index.health().await
    }

    // ------------------------------------------------------------------
    // store path
    // ------------------------------------------------------------------

    /// Capture one context snippet as a new episodic entry: assign identity,
    /// acquire the embedding, store, and open associations to the nearest
    /// neighbours.
    pub async fn capture_context(
        &self,
        source: &str,
        content: &str,
        metadata: Metadata,
        cancel: &Cancellation,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::new(source, content, metadata);
        self.store_entry(entry, cancel).await
    }

    /// Store a prepared entry. Either commits and returns the stored entry
    /// (possibly pending) or fails without partial persistence.
    pub async fn store_entry(
        &self,
        mut entry: MemoryEntry,
        cancel: &Cancellation,
    ) -> Result<MemoryEntry> {
        cancel.checkpoint()?;
        if entry.content.trim().is_empty() {
            return Err(EngramError::InvalidInput("entry content is empty".to_string()));
        }
        if entry.id.is_nil() {
            return Err(EngramError::InvalidInput("entry id is nil".to_string()));
        }
        if !(0.0..=1.0).contains(&entry.strength) {
            return Err(EngramError::InvalidInput(format!(
                "strength {} outside [0, 1]",
                entry.strength
            )));
        }

        let collection = self.collection(entry.memory_type).to_string();
        if self
            .with_backoff(cancel, || self.index.fetch(&collection, entry.id))
            .await?
            .is_some()
        {
            return Err(EngramError::DuplicateId(entry.id));
        }

        // Acquire the embedding; a transient provider outage stores the
        // entry pending rather than losing it.
        if entry.embedding.is_empty() {
            match self.embeddings.embed(&entry.content, cancel).await {
                Ok(vector) => entry.embedding = vector,
                Err(err) if err.is_retryable() => {
                    tracing::warn!(id = %entry.id, error = %err,
                        "embedding unavailable, storing entry pending");
                }
                Err(err) => return Err(err),
            }
        }
        if !entry.embedding.is_empty() && entry.embedding.len() != self.config.vector_dimension {
            return Err(EngramError::DimensionMismatch {
                expected: self.config.vector_dimension,
                actual: entry.embedding.len(),
            });
        }

        // Neighbourhood lookup happens before the insert so the entry never
        // associates with itself.
        let neighbours = if entry.embedding.is_empty() {
            Vec::new()
        } else {
            self.with_backoff(cancel, || {
                self.index
                    .search(&collection, &entry.embedding, self.config.assoc_k)
            })
            .await
            .unwrap_or_default()
        };

        let point = entry_to_point(&entry);
        self.with_backoff(cancel, || self.index.insert(&collection, point.clone()))
            .await?;
        *self.strength_sum.lock().await += f64::from(entry.strength);

        for hit in neighbours {
            if hit.point.id == entry.id || hit.score < self.config.assoc_similarity_floor {
                continue;
            }
            self.associations.insert(MemoryAssociation::new(
                entry.id,
                hit.point.id,
                AssociationKind::Semantic,
                hit.score,
            ));
        }

        tracing::debug!(id = %entry.id, memory_type = %entry.memory_type,
            pending = entry.is_pending(), "entry stored");
        Ok(entry)
    }

    /// Best-effort batch store; each entry commits or fails independently.
    pub async fn batch_store(
        &self,
        entries: Vec<MemoryEntry>,
        cancel: &Cancellation,
    ) -> Result<BatchStoreOutcome> {
        let mut outcome = BatchStoreOutcome::default();
        for entry in entries {
            cancel.checkpoint()?;
            let id = entry.id;
            match self.store_entry(entry, cancel).await {
                Ok(stored) => outcome.stored.push(stored.id),
                Err(err) => {
                    outcome.errors.insert(id, err);
                }
            }
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // read path
    // ------------------------------------------------------------------

    /// Most recent entries across all collections, newest first. Does not
    /// touch `accessed_at`.
    pub async fn get_memories(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        for memory_type in MemoryType::ALL {
            let points = self
                .index
                .recent(self.collection(memory_type), limit)
                .await?;
            for point in points {
                entries.push(point_to_entry(&point, memory_type)?);
            }
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Most recent entries of one type, newest first.
    pub async fn recent_of_type(
        &self,
        memory_type: MemoryType,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let points = self.index.recent(self.collection(memory_type), limit).await?;
        points
            .iter()
            .map(|point| point_to_entry(point, memory_type))
            .collect()
    }

    /// Fetch one entry by id; records the access (bumps `accessed_at` and
    /// the access counter atomically with respect to other bumps).
    pub async fn get_memory_by_id(&self, id: Uuid) -> Result<MemoryEntry> {
        let _guard = self.access_lock.lock().await;
        let (mut entry, collection) = self.find_entry(id).await?;
        entry.mark_accessed(Utc::now());
        self.index
            .update_payload(&collection, id, entry_payload(&entry))
            .await?;
        Ok(entry)
    }

    /// Entry plus both edge directions and the neighbour entries.
    pub async fn get_memory_with_associations(&self, id: Uuid) -> Result<MemoryWithAssociations> {
        let entry = self.get_memory_by_id(id).await?;
        let outbound = self.associations.outbound(id);
        let inbound = self.associations.inbound(id);

        let mut neighbor_ids: Vec<Uuid> = outbound
            .iter()
            .map(|e| e.target_id)
            .chain(inbound.iter().map(|e| e.source_id))
            .collect();
        neighbor_ids.sort();
        neighbor_ids.dedup();

        let mut neighbors = Vec::with_capacity(neighbor_ids.len());
        for neighbor_id in neighbor_ids {
            if let Ok((neighbor, _)) = self.find_entry(neighbor_id).await {
                neighbors.push(neighbor);
            }
        }

        Ok(MemoryWithAssociations {
            entry,
            outbound,
            inbound,
            neighbors,
        })
    }

    /// Similarity query within one type's collection, reordered at query
    /// time by `similarity * decay(now - accessed_at)`. Pending entries are
    /// invisible; nothing is mutated.
    pub async fn query_similar(
        &self,
        text: &str,
        memory_type: MemoryType,
        limit: usize,
        cancel: &Cancellation,
    ) -> Result<Vec<ScoredMemory>> {
        if text.trim().is_empty() {
            return Err(EngramError::InvalidInput("query text is empty".to_string()));
        }
        let vector = self.embeddings.embed(text, cancel).await?;
        if vector.len() != self.config.vector_dimension {
            return Err(EngramError::DimensionMismatch {
                expected: self.config.vector_dimension,
                actual: vector.len(),
            });
        }

        // Overfetch so decay reordering has slack to work with.
        let overfetch = limit.saturating_mul(4).max(limit);
        let hits = self
            .with_backoff(cancel, || {
                self.index
                    .search(self.collection(memory_type), &vector, overfetch)
            })
            .await?;

        let now = Utc::now();
        let weights = self.score_weights();
        let mut scored = Vec::with_capacity(hits.len());
        for hit in hits {
            let entry = point_to_entry(&hit.point, memory_type)?;
            let hours = (now.signed_duration_since(entry.accessed_at).num_milliseconds() as f64
                / 3_600_000.0)
                .max(0.0);
            let decay = decay_factor(hours, weights.decay_rate);
            scored.push(ScoredMemory {
                composite: f64::from(hit.score) * decay,
                similarity: hit.score,
                entry,
            });
        }
        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Journal-wide statistics.
    pub async fn stats(&self) -> Result<MemoryStats> {
        let mut per_type_counts = HashMap::new();
        let mut total = 0_u64;
        for memory_type in MemoryType::ALL {
            let count = self.index.count(self.collection(memory_type)).await?;
            per_type_counts.insert(memory_type.as_str().to_string(), count);
            total += count;
        }
        let strength_sum = *self.strength_sum.lock().await;
        Ok(MemoryStats {
            total_memories: total,
            per_type_counts,
            total_associations: self.associations.len(),
            avg_strength: if total == 0 { 0.0 } else { strength_sum / total as f64 },
            last_consolidation_at: *self.last_consolidation.read().await,
        })
    }

    /// Explicit retention action: remove one entry and cascade its edges.
    pub async fn prune_memory(&self, id: Uuid) -> Result<()> {
        let (entry, collection) = self.find_entry(id).await?;
        self.index.delete(&collection, id).await?;
        let swept = self.associations.remove_endpoint(id);
        *self.strength_sum.lock().await -= f64::from(entry.strength);
        tracing::info!(id = %id, edges_swept = swept, "memory pruned");
        Ok(())
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Locate an entry in whichever collection holds it.
    pub(crate) async fn find_entry(&self, id: Uuid) -> Result<(MemoryEntry, String)> {
        for memory_type in MemoryType::ALL {
            let collection = self.collection(memory_type);
            if let Some(point) = self.index.fetch(collection, id).await? {
                return Ok((point_to_entry(&point, memory_type)?, collection.to_string()));
            }
        }
        Err(EngramError::NotFound(id.to_string()))
    }

    /// Persist refreshed source metadata under the access lock.
    pub(crate) async fn persist_entry_metadata(&self, entry: &MemoryEntry) -> Result<()> {
        let _guard = self.access_lock.lock().await;
        let collection = self.collection(entry.memory_type).to_string();
        self.index
            .update_payload(&collection, entry.id, entry_payload(entry))
            .await
    }

    pub(crate) async fn record_consolidation(&self, at: DateTime<Utc>) {
        *self.last_consolidation.write().await = Some(at);
    }

    /// Bounded retry for transient index failures: base one second,
    /// doubling, capped by `max_retries` and the cancellation deadline.
    pub(crate) async fn with_backoff<T, F, Fut>(
        &self,
        cancel: &Cancellation,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = BACKOFF_BASE;
        let mut last = EngramError::BackendUnavailable("no attempts made".to_string());
        for attempt in 0..=self.config.max_retries {
            cancel.checkpoint()?;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                        "index operation failed, backing off");
                    let sleep = match cancel.remaining() {
                        Some(remaining) => delay.min(remaining),
                        None => delay,
                    };
                    tokio::time::sleep(sleep).await;
                    delay *= 2;
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }
}

// ============================================================================
// PAYLOAD MAPPING
// ============================================================================

pub(crate) fn entry_payload(entry: &MemoryEntry) -> Value {
    json!({
        "content": entry.content,
        "type": entry.memory_type.as_str(),
        "created_at": entry.created_at.to_rfc3339(),
        "accessed_at": entry.accessed_at.to_rfc3339(),
        "strength": entry.strength,
        "metadata": entry.metadata,
    })
}

pub(crate) fn entry_to_point(entry: &MemoryEntry) -> IndexPoint {
    IndexPoint {
        id: entry.id,
        vector: entry.embedding.clone(),
        payload: entry_payload(entry),
    }
}

pub(crate) fn point_to_entry(point: &IndexPoint, memory_type: MemoryType) -> Result<MemoryEntry> {
    let payload = &point.payload;
    let content = payload["content"]
        .as_str()
        .ok_or_else(|| EngramError::Internal(format!("point {} has no content", point.id)))?
        .to_string();
    let created_at = parse_time(payload, "created_at", point.id)?;
    let accessed_at = parse_time(payload, "accessed_at", point.id)?;
    let metadata: Metadata = payload
        .get("metadata")
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default();
    Ok(MemoryEntry {
        id: point.id,
        memory_type,
        content,
        embedding: point.vector.clone(),
        metadata,
        created_at,
        accessed_at: accessed_at.max(created_at),
        strength: payload["strength"].as_f64().unwrap_or(0.5) as f32,
    })
}

fn parse_time(payload: &Value, key: &str, id: Uuid) -> Result<DateTime<Utc>> {
    payload[key]
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| EngramError::Internal(format!("point {id} has malformed {key}")))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embeddings::testing::StaticEmbeddingProvider;
    use crate::index::MemoryIndex;
    use std::sync::atomic::Ordering;

    pub(crate) const DIM: usize = 64;

    pub(crate) async fn journal() -> VectorJournal {
        journal_with_provider(Arc::new(StaticEmbeddingProvider::new(DIM))).await
    }

    pub(crate) async fn journal_with_provider(
        provider: Arc<StaticEmbeddingProvider>,
    ) -> VectorJournal {
        let config = JournalConfig {
            vector_dimension: DIM,
            ..Default::default()
        };
        let journal = VectorJournal::new(
            Arc::new(MemoryIndex::default()),
            provider,
            config,
            ConsolidationConfig::default(),
        );
        journal.init().await.unwrap();
        journal
    }

    #[tokio::test]
    async fn capture_then_get_roundtrips() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let stored = journal
            .capture_context("a.txt", "hello world", Metadata::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(stored.memory_type, MemoryType::Episodic);
        assert!(!stored.is_pending());
        assert_eq!(stored.embedding.len(), DIM);

        let fetched = journal.get_memory_by_id(stored.id).await.unwrap();
        assert_eq!(fetched.content, stored.content);
        assert_eq!(fetched.created_at, stored.created_at);
        // The fetch recorded an access.
        assert_eq!(fetched.access_count(), 2);
        assert!(fetched.accessed_at >= stored.accessed_at);
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let journal = journal().await;
        let err = journal
            .capture_context("a.txt", "   ", Metadata::new(), &Cancellation::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert_eq!(journal.stats().await.unwrap().total_memories, 0);
    }

    #[tokio::test]
    async fn duplicate_id_is_fatal_per_entry() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let entry = journal
            .capture_context("a.txt", "original", Metadata::new(), &cancel)
            .await
            .unwrap();

        let mut clone = MemoryEntry::new("a.txt", "imposter", Metadata::new());
        clone.id = entry.id;
        let err = journal.store_entry(clone, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "duplicate_id");
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let journal = journal().await;
        let mut entry = MemoryEntry::new("a.txt", "content", Metadata::new());
        entry.embedding = vec![0.5; DIM - 1];
        let err = journal
            .store_entry(entry, &Cancellation::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dimension_mismatch");
    }

    #[tokio::test]
    async fn embedding_outage_stores_pending_and_search_skips_it() {
        let provider = Arc::new(StaticEmbeddingProvider::new(DIM));
        let journal = journal_with_provider(Arc::clone(&provider)).await;
        let cancel = Cancellation::new();

        provider.unavailable.store(true, Ordering::Relaxed);
        let pending = journal
            .capture_context("a.txt", "hello world", Metadata::new(), &cancel)
            .await
            .unwrap();
        assert!(pending.is_pending());

        provider.unavailable.store(false, Ordering::Relaxed);
        journal
            .capture_context("b.txt", "hello again", Metadata::new(), &cancel)
            .await
            .unwrap();

        let hits = journal
            .query_similar("hello", MemoryType::Episodic, 10, &cancel)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_ne!(hits[0].entry.id, pending.id);
        // The pending entry is still fetchable and counted.
        assert_eq!(journal.stats().await.unwrap().total_memories, 2);
        journal.get_memory_by_id(pending.id).await.unwrap();
    }

    #[tokio::test]
    async fn search_returns_similar_entry_with_high_similarity() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let stored = journal
            .capture_context("a.txt", "hello world", Metadata::new(), &cancel)
            .await
            .unwrap();
        journal
            .capture_context("b.txt", "quarterly revenue spreadsheet", Metadata::new(), &cancel)
            .await
            .unwrap();

        let hits = journal
            .query_similar("hello", MemoryType::Episodic, 5, &cancel)
            .await
            .unwrap();
        assert_eq!(hits[0].entry.id, stored.id);
        assert!(hits[0].similarity >= 0.5);
        assert!(hits[0].composite <= f64::from(hits[0].similarity));
    }

    #[tokio::test]
    async fn store_time_association_linking() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let first = journal
            .capture_context("a", "deploy failed with timeout", Metadata::new(), &cancel)
            .await
            .unwrap();
        let second = journal
            .capture_context("b", "deploy failed with timeout again", Metadata::new(), &cancel)
            .await
            .unwrap();

        let edges = journal.association_graph().between(second.id, first.id);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, AssociationKind::Semantic);
        assert!(edges[0].weight >= 0.7);

        let with_assoc = journal.get_memory_with_associations(first.id).await.unwrap();
        assert_eq!(with_assoc.inbound.len(), 1);
        assert_eq!(with_assoc.neighbors.len(), 1);
        assert_eq!(with_assoc.neighbors[0].id, second.id);
    }

    #[tokio::test]
    async fn get_memories_is_recency_ordered_and_readonly() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let entry = journal
                .capture_context(
                    &format!("file-{i}"),
                    &format!("unrelated topic number {i}"),
                    Metadata::new(),
                    &cancel,
                )
                .await
                .unwrap();
            ids.push(entry.id);
        }

        let recent = journal.get_memories(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, ids[4]);
        // Listing does not count as access.
        assert_eq!(recent[0].access_count(), 1);
    }

    #[tokio::test]
    async fn batch_store_reports_per_entry_errors() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let good = MemoryEntry::new("a", "alpha content", Metadata::new());
        let bad = MemoryEntry::new("b", "", Metadata::new());
        let bad_id = bad.id;

        let outcome = journal.batch_store(vec![good, bad], &cancel).await.unwrap();
        assert_eq!(outcome.stored.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[&bad_id].kind(), "invalid_input");
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let journal = journal().await;
        let err = journal.get_memory_by_id(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn prune_cascades_associations() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        let first = journal
            .capture_context("a", "shared failure signature", Metadata::new(), &cancel)
            .await
            .unwrap();
        journal
            .capture_context("b", "shared failure signature two", Metadata::new(), &cancel)
            .await
            .unwrap();
        assert!(journal.stats().await.unwrap().total_associations > 0);

        journal.prune_memory(first.id).await.unwrap();
        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.total_memories, 1);
        assert_eq!(stats.total_associations, 0);
        assert!(journal.get_memory_by_id(first.id).await.is_err());
    }

    #[tokio::test]
    async fn stats_track_types_and_strength() {
        let journal = journal().await;
        let cancel = Cancellation::new();
        journal
            .capture_context("a", "first entry", Metadata::new(), &cancel)
            .await
            .unwrap();
        journal
            .capture_context("b", "second entry", Metadata::new(), &cancel)
            .await
            .unwrap();

        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.per_type_counts["episodic"], 2);
        assert_eq!(stats.per_type_counts["semantic"], 0);
        assert!((stats.avg_strength - 0.5).abs() < 1e-6);
        assert!(stats.last_consolidation_at.is_none());
    }
}
