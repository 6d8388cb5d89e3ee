//! Association multigraph over memory ids.
//!
//! Edges are first-class records held in three indices so both directions
//! and exact pairs resolve without scans. Multiple kinds between the same
//! pair are allowed; edges never mutate, and deleting an endpoint cascades
//! through all three indices.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::memory::MemoryAssociation;

#[derive(Default)]
struct Indices {
    by_source: HashMap<Uuid, Vec<Arc<MemoryAssociation>>>,
    by_target: HashMap<Uuid, Vec<Arc<MemoryAssociation>>>,
    by_pair: HashMap<(Uuid, Uuid), Vec<Arc<MemoryAssociation>>>,
    count: u64,
}

/// Thread-safe association store. Writers take the lock exclusively; readers
/// copy out snapshots.
#[derive(Default)]
pub struct AssociationGraph {
    inner: RwLock<Indices>,
}

impl AssociationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one edge into all three indices.
    pub fn insert(&self, association: MemoryAssociation) {
        let edge = Arc::new(association);
        let mut inner = self.inner.write().expect("association graph poisoned");
        inner
            .by_source
            .entry(edge.source_id)
            .or_default()
            .push(Arc::clone(&edge));
        inner
            .by_target
            .entry(edge.target_id)
            .or_default()
            .push(Arc::clone(&edge));
        inner
            .by_pair
            .entry((edge.source_id, edge.target_id))
            .or_default()
            .push(edge);
        inner.count += 1;
    }

    /// Edges leaving `id`.
    pub fn outbound(&self, id: Uuid) -> Vec<MemoryAssociation> {
        let inner = self.inner.read().expect("association graph poisoned");
        inner
            .by_source
            .get(&id)
            .map(|edges| edges.iter().map(|e| (**e).clone()).collect())
            .unwrap_or_default()
    }

    /// Edges arriving at `id`.
    pub fn inbound(&self, id: Uuid) -> Vec<MemoryAssociation> {
        let inner = self.inner.read().expect("association graph poisoned");
        inner
            .by_target
            .get(&id)
            .map(|edges| edges.iter().map(|e| (**e).clone()).collect())
            .unwrap_or_default()
    }

    /// All edges from `source` to `target`, any kind.
    pub fn between(&self, source: Uuid, target: Uuid) -> Vec<MemoryAssociation> {
        let inner = self.inner.read().expect("association graph poisoned");
        inner
            .by_pair
            .get(&(source, target))
            .map(|edges| edges.iter().map(|e| (**e).clone()).collect())
            .unwrap_or_default()
    }

    /// Cascade-remove every edge touching `id`. Returns how many edges were
    /// swept.
    pub fn remove_endpoint(&self, id: Uuid) -> u64 {
        let mut inner = self.inner.write().expect("association graph poisoned");
        let mut removed = 0_u64;

        let outgoing = inner.by_source.remove(&id).unwrap_or_default();
        let incoming = inner.by_target.remove(&id).unwrap_or_default();

        for edge in outgoing.iter() {
            if let Some(edges) = inner.by_target.get_mut(&edge.target_id) {
                edges.retain(|e| e.source_id != id);
                if edges.is_empty() {
                    inner.by_target.remove(&edge.target_id);
                }
            }
            inner.by_pair.remove(&(id, edge.target_id));
            removed += 1;
        }
        for edge in incoming.iter() {
            if let Some(edges) = inner.by_source.get_mut(&edge.source_id) {
                edges.retain(|e| e.target_id != id);
                if edges.is_empty() {
                    inner.by_source.remove(&edge.source_id);
                }
            }
            inner.by_pair.remove(&(edge.source_id, id));
            removed += 1;
        }

        inner.count = inner.count.saturating_sub(removed);
        removed
    }

    pub fn len(&self) -> u64 {
        self.inner.read().expect("association graph poisoned").count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// TESTS
// ============================================================================
