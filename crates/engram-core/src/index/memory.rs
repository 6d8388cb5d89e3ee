//! In-process reference backend for [`VectorIndex`].
//!
//! Collections are guarded by one RwLock; readers take consistent snapshots
//! and the linear-scan search is acceptable at reference scale. A networked
//! index replaces this without journal changes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DistanceMetric, IndexPoint, ScoredPoint, VectorIndex};
use crate::embeddings::{cosine_similarity, dot_product, euclidean_distance};
use crate::error::{EngramError, Result};

struct Collection {
    dimension: usize,
    points: HashMap<Uuid, IndexPoint>,
    /// Insertion sequence -> id, newest last. Upserts keep the original
    /// sequence so `recent` reflects creation order, not refreshes.
    recency: BTreeMap<u64, Uuid>,
    seq_by_id: HashMap<Uuid, u64>,
    next_seq: u64,
}

impl Collection {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: HashMap::new(),
            recency: BTreeMap::new(),
            seq_by_id: HashMap::new(),
            next_seq: 0,
        }
    }

    fn check_dimension(&self, point: &IndexPoint) -> Result<()> {
        if !point.vector.is_empty() && point.vector.len() != self.dimension {
            return Err(EngramError::DimensionMismatch {
                expected: self.dimension,
                actual: point.vector.len(),
            });
        }
        Ok(())
    }

    fn put(&mut self, point: IndexPoint) {
        let id = point.id;
        if !self.seq_by_id.contains_key(&id) {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.recency.insert(seq, id);
            self.seq_by_id.insert(id, seq);
        }
        self.points.insert(id, point);
    }
}

/// In-memory vector index.
pub struct MemoryIndex {
    metric: DistanceMetric,
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Higher is better for every metric; euclidean scores are negated
    /// distances.
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => dot_product(a, b),
            DistanceMetric::Euclidean => -euclidean_distance(a, b),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => {
                Err(EngramError::DimensionMismatch {
                    expected: existing.dimension,
                    actual: dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(name.to_string(), Collection::new(dimension));
                Ok(())
            }
        }
    }

    async fn insert(&self, collection: &str, point: IndexPoint) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        coll.check_dimension(&point)?;
        if coll.points.contains_key(&point.id) {
            return Err(EngramError::DuplicateId(point.id));
        }
        coll.put(point);
        Ok(())
    }

    async fn upsert(&self, collection: &str, point: IndexPoint) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        coll.check_dimension(&point)?;
        coll.put(point);
        Ok(())
    }

    async fn fetch(&self, collection: &str, id: Uuid) -> Result<Option<IndexPoint>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        Ok(coll.points.get(&id).cloned())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        if vector.len() != coll.dimension {
            return Err(EngramError::DimensionMismatch {
                expected: coll.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = coll
            .points
            .values()
            .filter(|point| !point.vector.is_empty())
            .map(|point| ScoredPoint {
                score: self.score(vector, &point.vector),
                point: point.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.point.id.cmp(&b.point.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn recent(&self, collection: &str, limit: usize) -> Result<Vec<IndexPoint>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        Ok(coll
            .recency
            .values()
            .rev()
            .take(limit)
            .filter_map(|id| coll.points.get(id).cloned())
            .collect())
    }

    async fn update_payload(&self, collection: &str, id: Uuid, payload: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        match coll.points.get_mut(&id) {
            Some(point) => {
                point.payload = payload;
                Ok(())
            }
            None => Err(EngramError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        let removed = coll.points.remove(&id).is_some();
        if let Some(seq) = coll.seq_by_id.remove(&id) {
            coll.recency.remove(&seq);
        }
        Ok(removed)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| EngramError::NotFound(format!("collection {collection}")))?;
        Ok(coll.points.len() as u64)
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: Uuid, vector: Vec<f32>) -> IndexPoint {
        IndexPoint {
            id,
            vector,
            payload: json!({"content": "x"}),
        }
    }

    async fn index_with_collection() -> MemoryIndex {
        let index = MemoryIndex::default();
        index.ensure_collection("mem", 3).await.unwrap();
        index
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_bad_dimensions() {
        let index = index_with_collection().await;
        let id = Uuid::new_v4();
        index.insert("mem", point(id, vec![1.0, 0.0, 0.0])).await.unwrap();

        let dup = index.insert("mem", point(id, vec![0.0, 1.0, 0.0])).await;
        assert_eq!(dup.unwrap_err().kind(), "duplicate_id");

        // Off by one dimension is rejected.
        let short = index
            .insert("mem", point(Uuid::new_v4(), vec![1.0, 0.0]))
            .await;
        assert_eq!(short.unwrap_err().kind(), "dimension_mismatch");
    }

    #[tokio::test]
    async fn pending_points_are_stored_but_unsearchable() {
        let index = index_with_collection().await;
        let pending = Uuid::new_v4();
        index.insert("mem", point(pending, vec![])).await.unwrap();
        index
            .insert("mem", point(Uuid::new_v4(), vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();

        assert_eq!(index.count("mem").await.unwrap(), 2);
        let hits = index.search("mem", &[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_ne!(hits[0].point.id, pending);
        // The pending point is still fetchable.
        assert!(index.fetch("mem", pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let index = index_with_collection().await;
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.insert("mem", point(near, vec![1.0, 0.1, 0.0])).await.unwrap();
        index.insert("mem", point(far, vec![0.0, 1.0, 0.0])).await.unwrap();

        let hits = index.search("mem", &[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].point.id, near);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_upsert_keeps_order() {
        let index = index_with_collection().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        index.insert("mem", point(first, vec![1.0, 0.0, 0.0])).await.unwrap();
        index.insert("mem", point(second, vec![0.0, 1.0, 0.0])).await.unwrap();

        // Refreshing the first point does not make it "newer".
        index.upsert("mem", point(first, vec![0.0, 0.0, 1.0])).await.unwrap();

        let recent = index.recent("mem", 10).await.unwrap();
        assert_eq!(recent[0].id, second);
        assert_eq!(recent[1].id, first);

        let limited = index.recent("mem", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn payload_update_and_delete() {
        let index = index_with_collection().await;
        let id = Uuid::new_v4();
        index.insert("mem", point(id, vec![1.0, 0.0, 0.0])).await.unwrap();

        index
            .update_payload("mem", id, json!({"content": "updated"}))
            .await
            .unwrap();
        let fetched = index.fetch("mem", id).await.unwrap().unwrap();
        assert_eq!(fetched.payload["content"], "updated");

        assert!(index.delete("mem", id).await.unwrap());
        assert!(!index.delete("mem", id).await.unwrap());
        assert_eq!(index.count("mem").await.unwrap(), 0);

        let missing = index.update_payload("mem", id, json!({})).await;
        assert_eq!(missing.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn unknown_collection_is_not_found() {
        let index = MemoryIndex::default();
        let err = index.count("absent").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent_but_dimension_fixed() {
        let index = index_with_collection().await;
        index.ensure_collection("mem", 3).await.unwrap();
        let err = index.ensure_collection("mem", 4).await.unwrap_err();
        assert_eq!(err.kind(), "dimension_mismatch");
    }
}
