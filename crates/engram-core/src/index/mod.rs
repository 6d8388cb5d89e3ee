//! Vector index boundary.
//!
//! The journal talks to its backend exclusively through [`VectorIndex`]:
//! typed collections of points carrying a vector plus a JSON payload. A
//! networked backend plugs in behind this trait; [`MemoryIndex`] is the
//! in-process reference implementation.

mod memory;

pub use memory::MemoryIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Similarity metric, fixed per index at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

/// One stored point: id, vector (empty while the entry is pending), and the
/// entry payload `{content, type, created_at, accessed_at, strength,
/// metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A search hit with its raw similarity score.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub point: IndexPoint,
    pub score: f32,
}

/// Contract between the journal and its storage backend.
///
/// Lookups are O(log n) or better per point for the reference backend;
/// `search` cost is backend-defined.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent; re-creating with a different
    /// dimension is a `dimension_mismatch`.
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Insert a point. `duplicate_id` if the id exists; `dimension_mismatch`
    /// if a non-empty vector disagrees with the collection dimension.
    async fn insert(&self, collection: &str, point: IndexPoint) -> Result<()>;

    /// Insert-or-replace, used when refreshing pending embeddings.
    async fn upsert(&self, collection: &str, point: IndexPoint) -> Result<()>;

    async fn fetch(&self, collection: &str, id: Uuid) -> Result<Option<IndexPoint>>;

    /// Nearest neighbours among non-pending points, best score first.
    async fn search(&self, collection: &str, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredPoint>>;

    /// Most recently created points, newest first.
    async fn recent(&self, collection: &str, limit: usize) -> Result<Vec<IndexPoint>>;

    /// Replace a point's payload, leaving the vector untouched.
    async fn update_payload(&self, collection: &str, id: Uuid, payload: Value) -> Result<()>;

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool>;

    async fn count(&self, collection: &str) -> Result<u64>;

    /// Backend liveness, surfaced through the service registry.
    async fn health(&self) -> Result<()>;
}
