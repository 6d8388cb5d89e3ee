//! Shared application state and stack wiring.
//!
//! Builds the whole engine from config - embedding provider, vector index,
//! journal, monitor, consolidation engine, filter, pipeline - and registers
//! every component with the lifecycle registry in dependency order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use engram_core::{
    CapturePipeline, ConsolidationEngine, ConsolidationHandle, ContextMonitor, EmbeddingProvider,
    EngramConfig, EventFilter, HttpEmbeddingProvider, MemoryIndex, Result, ServiceRegistry,
    VectorIndex, VectorJournal,
};

use crate::services::{
    ConsolidationService, EmbeddingService, JournalService, PipelineService, SurfacesService,
    VectorIndexService,
};

/// Everything the surfaces need, plus the registry that owns lifecycle.
pub struct AppContext {
    pub config: EngramConfig,
    pub journal: Arc<VectorJournal>,
    pub monitor: Arc<ContextMonitor>,
    pub engine: Arc<ConsolidationEngine>,
    pub consolidation: ConsolidationHandle,
    pub pipeline: Arc<CapturePipeline>,
    pub registry: Arc<ServiceRegistry>,
    /// Flipping this tells the HTTP server and stdio transport to stop.
    pub shutdown: watch::Sender<bool>,
}

impl AppContext {
    /// Wire the full stack. The registry is initialized (dependency order
    /// resolved, collections created) but not yet started.
    pub async fn build(config: EngramConfig) -> Result<Arc<AppContext>> {
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(HttpEmbeddingProvider::new(config.embedding.clone())?);
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::default());
        Self::build_with(config, provider, index).await
    }

    /// Wiring entry point that lets tests substitute the collaborators.
    pub async fn build_with(
        config: EngramConfig,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Arc<AppContext>> {
        let journal = Arc::new(VectorJournal::new(
            Arc::clone(&index),
            Arc::clone(&provider),
            config.journal.clone(),
            config.consolidation.clone(),
        ));
        let monitor = Arc::new(ContextMonitor::new(&config.consolidation));
        let engine = Arc::new(ConsolidationEngine::new(
            Arc::clone(&journal),
            Arc::clone(&monitor),
            config.consolidation.clone(),
        ));
        let consolidation = engine.handle();

        let filter = Arc::new(EventFilter::new(&config.filter)?);
        let pipeline = Arc::new(CapturePipeline::new(
            filter,
            Arc::clone(&journal),
            Arc::clone(&monitor),
            consolidation.clone(),
            config.pipeline.clone(),
        ));

        let (shutdown, _) = watch::channel(false);
        let stop_deadline = Duration::from_secs(config.http.shutdown_timeout_secs);

        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(EmbeddingService::new(Arc::clone(&provider))))?;
        registry.register(Arc::new(VectorIndexService::new(Arc::clone(&index))))?;
        registry.register(Arc::new(JournalService::new(Arc::clone(&journal))))?;
        registry.register(Arc::new(ConsolidationService::new(
            Arc::clone(&engine),
            stop_deadline,
        )))?;
        registry.register(Arc::new(PipelineService::new(
            Arc::clone(&pipeline),
            stop_deadline,
        )))?;
        registry.register(Arc::new(SurfacesService::new(shutdown.clone())))?;
        registry.initialize_all().await?;

        Ok(Arc::new(AppContext {
            config,
            journal,
            monitor,
            engine,
            consolidation,
            pipeline,
            registry: Arc::new(registry),
            shutdown,
        }))
    }

    /// Start every service in dependency order.
    pub async fn start(&self) -> Result<()> {
        self.registry.start_all().await
    }

    /// Reverse-order shutdown under the configured deadline.
    pub async fn shutdown(&self) {
        let deadline = Duration::from_secs(self.config.http.shutdown_timeout_secs);
        self.registry.shutdown(deadline).await;
    }
}
