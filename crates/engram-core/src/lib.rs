//! # Engram Core
//!
//! Associative memory engine for LLM agents:
//!
//! - **Capture pipeline**: filter, prioritize, batch, and enrich raw
//!   context-capture events into memory entries
//! - **Vector journal**: typed collections over a pluggable vector index,
//!   similarity retrieval with query-time decay, and a typed association
//!   multigraph
//! - **Consolidation engine**: event-driven, budget-aware transformation of
//!   related episodic memories into semantic, procedural, or metacognitive
//!   ones
//! - **Lifecycle fabric**: dependency-ordered service registry with health
//!   aggregation and graceful reverse-order shutdown
//!
//! The embedding model and the vector index are external collaborators
//! behind [`embeddings::EmbeddingProvider`] and [`index::VectorIndex`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::prelude::*;
//!
//! let config = EngramConfig::load_from("engram.toml")?;
//! let index = Arc::new(MemoryIndex::default());
//! let provider = Arc::new(HttpEmbeddingProvider::new(config.embedding.clone())?);
//! let journal = Arc::new(VectorJournal::new(
//!     index, provider, config.journal.clone(), config.consolidation.clone(),
//! ));
//! journal.init().await?;
//!
//! let entry = journal
//!     .capture_context("notes.md", "the deploy failed at midnight", Metadata::new(), &Cancellation::new())
//!     .await?;
//! let hits = journal
//!     .query_similar("deploy failure", MemoryType::Episodic, 5, &Cancellation::new())
//!     .await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod cancel;
pub mod config;
pub mod consolidation;
pub mod embeddings;
pub mod error;
pub mod filter;
pub mod index;
pub mod journal;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod pipeline;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use cancel::Cancellation;
pub use config::{
    CollectionNames, CommandFilterConfig, ConsolidationConfig, EmbeddingConfig, EngramConfig,
    FileFilterConfig, FilterConfig, FilterStrictness, HttpConfig, JournalConfig, PipelineConfig,
    Profile, SearchFilterConfig,
};
pub use consolidation::{
    ConsolidationEngine, ConsolidationEvent, ConsolidationHandle, ConsolidationTrigger,
    EngineState, QUEUE_CAPACITY,
};
pub use embeddings::{
    cosine_similarity, dot_product, euclidean_distance, EmbeddingProvider, HttpEmbeddingProvider,
};
pub use error::{EngramError, Result};
pub use filter::{CaptureDecision, EventFilter};
pub use index::{DistanceMetric, IndexPoint, MemoryIndex, ScoredPoint, VectorIndex};
pub use journal::{
    AssociationGraph, BatchStoreOutcome, ConsolidationOutcome, MemoryWithAssociations,
    ScoredMemory, VectorJournal,
};
pub use lifecycle::{HealthStatus, Service, ServiceRegistry};
pub use memory::{
    keys, AssociationKind, CaptureEvent, EventType, MemoryAssociation, MemoryEntry, MemoryScore,
    MemoryStats, MemoryType, Metadata, Priority, ScoreWeights,
};
pub use metrics::{EngineCountersSnapshot, PipelineMetricsSnapshot};
pub use monitor::{ContextMonitor, ContextState};
pub use pipeline::CapturePipeline;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        Cancellation, CaptureEvent, CapturePipeline, ConsolidationEngine, ConsolidationTrigger,
        ContextMonitor, EmbeddingProvider, EngramConfig, EngramError, EventFilter, EventType,
        HttpEmbeddingProvider, MemoryEntry, MemoryIndex, MemoryStats, MemoryType, Metadata,
        Priority, Result, Service, ServiceRegistry, VectorIndex, VectorJournal,
    };
}
