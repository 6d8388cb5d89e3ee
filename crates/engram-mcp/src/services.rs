//! Thin lifecycle adapters wrapping the engine components.
//!
//! Each adapter declares its dependencies so the registry starts the stack
//! as `embedding, vector-index -> journal -> consolidation -> pipeline ->
//! surfaces` and stops it in reverse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use engram_core::{
    CapturePipeline, ConsolidationEngine, EmbeddingProvider, EngineState, EngramError, Result,
    Service, VectorIndex, VectorJournal,
};

// ── embedding ───────────────────────────────────────────────────────────────

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Service for EmbeddingService {
    fn name(&self) -> &'static str {
        "embedding"
    }

    async fn health_check(&self) -> Result<()> {
        self.provider.health().await
    }
}

// ── vector index ────────────────────────────────────────────────────────────

pub struct VectorIndexService {
    index: Arc<dyn VectorIndex>,
}

impl VectorIndexService {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Service for VectorIndexService {
    fn name(&self) -> &'static str {
        "vector-index"
    }

    async fn health_check(&self) -> Result<()> {
        self.index.health().await
    }
}

// ── journal ─────────────────────────────────────────────────────────────────

pub struct JournalService {
    journal: Arc<VectorJournal>,
}

impl JournalService {
    pub fn new(journal: Arc<VectorJournal>) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl Service for JournalService {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec!["embedding", "vector-index"]
    }

    async fn initialize(&self) -> Result<()> {
        self.journal.init().await
    }

    async fn health_check(&self) -> Result<()> {
        self.journal.health().await
    }
}

// ── consolidation ───────────────────────────────────────────────────────────

pub struct ConsolidationService {
    engine: Arc<ConsolidationEngine>,
    stop_deadline: Duration,
}

impl ConsolidationService {
    pub fn new(engine: Arc<ConsolidationEngine>, stop_deadline: Duration) -> Self {
        Self {
            engine,
            stop_deadline,
        }
    }
}

#[async_trait]
impl Service for ConsolidationService {
    fn name(&self) -> &'static str {
        "consolidation"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec!["journal"]
    }

    async fn start(&self) -> Result<()> {
        self.engine.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.engine.stop(self.stop_deadline).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        match self.engine.state() {
            EngineState::Running | EngineState::Draining => Ok(()),
            state => Err(EngramError::Internal(format!(
                "consolidation engine is {state:?}"
            ))),
        }
    }
}

// ── pipeline ────────────────────────────────────────────────────────────────

pub struct PipelineService {
    pipeline: Arc<CapturePipeline>,
    stop_deadline: Duration,
}

impl PipelineService {
    pub fn new(pipeline: Arc<CapturePipeline>, stop_deadline: Duration) -> Self {
        Self {
            pipeline,
            stop_deadline,
        }
    }
}

#[async_trait]
impl Service for PipelineService {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec!["consolidation"]
    }

    async fn start(&self) -> Result<()> {
        self.pipeline.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.pipeline.stop(self.stop_deadline).await;
        Ok(())
    }
}

// ── surfaces ────────────────────────────────────────────────────────────────

/// Owns nothing but the shutdown signal: stopping this service tells the
/// HTTP server and the stdio transport to wind down first.
pub struct SurfacesService {
    shutdown: watch::Sender<bool>,
}

impl SurfacesService {
    pub fn new(shutdown: watch::Sender<bool>) -> Self {
        Self { shutdown }
    }
}

#[async_trait]
impl Service for SurfacesService {
    fn name(&self) -> &'static str {
        "surfaces"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec!["pipeline"]
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        Ok(())
    }
}
