//! Middleware stages.
//!
//! Each stage observes and mutates the shared [`MemoryContext`]; a failure
//! aborts the chain and is reported under the stage's tag. The notify stage
//! runs after persistence so the trigger only fires once downstream has
//! succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::cancel::Cancellation;
use crate::consolidation::{ConsolidationHandle, ConsolidationTrigger};
use crate::error::{EngramError, Result};
use crate::journal::VectorJournal;
use crate::memory::{MemoryEntry, MemoryType, Metadata};
use crate::monitor::ContextMonitor;

/// Stage names in execution order; the metrics histograms key off these.
pub const STAGE_NAMES: [&str; 5] = [
    "validation",
    "enrichment",
    "routing",
    "persistence",
    "consolidation_notify",
];

/// Mutable per-event state threaded through the chain.
pub struct MemoryContext {
    pub entry: MemoryEntry,
    /// Middleware-scoped scratch metadata, copied onto the entry by
    /// enrichment under a `pipeline_` prefix.
    pub metadata: Metadata,
    pub source_tag: String,
    pub stage: &'static str,
}

impl MemoryContext {
    pub fn new(entry: MemoryEntry, source_tag: impl Into<String>) -> Self {
        Self {
            entry,
            metadata: Metadata::new(),
            source_tag: source_tag.into(),
            stage: "",
        }
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, ctx: &mut MemoryContext, cancel: &Cancellation) -> Result<()>;
}

// ============================================================================
// VALIDATION
// ============================================================================

pub struct ValidationStage;

#[async_trait]
impl PipelineStage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn handle(&self, ctx: &mut MemoryContext, _cancel: &Cancellation) -> Result<()> {
        if ctx.entry.id.is_nil() {
            return Err(EngramError::InvalidInput("entry id is nil".to_string()));
        }
        if ctx.entry.content.trim().is_empty() {
            return Err(EngramError::InvalidInput("entry content is empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// ENRICHMENT
// ============================================================================

pub struct EnrichmentStage;

#[async_trait]
impl PipelineStage for EnrichmentStage {
    fn name(&self) -> &'static str {
        "enrichment"
    }

    async fn handle(&self, ctx: &mut MemoryContext, _cancel: &Cancellation) -> Result<()> {
        let word_count = ctx.entry.word_count();
        ctx.entry.metadata.insert(
            "processed_at".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        ctx.entry
            .metadata
            .insert("pipeline_source".to_string(), Value::from(ctx.source_tag.clone()));
        ctx.entry
            .metadata
            .insert("word_count".to_string(), Value::from(word_count as u64));

        // Middleware scratch metadata lands on the entry under a prefix.
        for (key, value) in ctx.metadata.iter() {
            ctx.entry
                .metadata
                .insert(format!("pipeline_{key}"), value.clone());
        }
        Ok(())
    }
}

// ============================================================================
// ROUTING
// ============================================================================

/// Per-type routing handler; mutates the context (e.g. to tag the target
/// collection).
pub trait RouteHandler: Send + Sync {
    fn route(&self, ctx: &mut MemoryContext) -> Result<()>;
}

struct CollectionTagger;

impl RouteHandler for CollectionTagger {
    fn route(&self, ctx: &mut MemoryContext) -> Result<()> {
        ctx.entry.metadata.insert(
            "route".to_string(),
            Value::from(ctx.entry.memory_type.as_str()),
        );
        Ok(())
    }
}

/// Dispatch table keyed by memory type; unknown types pass through.
pub struct RoutingStage {
    handlers: HashMap<MemoryType, Arc<dyn RouteHandler>>,
}

impl Default for RoutingStage {
    fn default() -> Self {
        let tagger: Arc<dyn RouteHandler> = Arc::new(CollectionTagger);
        let mut handlers: HashMap<MemoryType, Arc<dyn RouteHandler>> = HashMap::new();
        for memory_type in MemoryType::ALL {
            handlers.insert(memory_type, Arc::clone(&tagger));
        }
        Self { handlers }
    }
}

impl RoutingStage {
    pub fn with_handler(mut self, memory_type: MemoryType, handler: Arc<dyn RouteHandler>) -> Self {
        self.handlers.insert(memory_type, handler);
        self
    }
}

#[async_trait]
impl PipelineStage for RoutingStage {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn handle(&self, ctx: &mut MemoryContext, _cancel: &Cancellation) -> Result<()> {
        match self.handlers.get(&ctx.entry.memory_type) {
            Some(handler) => handler.route(ctx),
            None => Ok(()),
        }
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub struct PersistenceStage {
    journal: Arc<VectorJournal>,
}

impl PersistenceStage {
    pub fn new(journal: Arc<VectorJournal>) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl PipelineStage for PersistenceStage {
    fn name(&self) -> &'static str {
        "persistence"
    }

    async fn handle(&self, ctx: &mut MemoryContext, cancel: &Cancellation) -> Result<()> {
        let stored = self.journal.store_entry(ctx.entry.clone(), cancel).await?;
        ctx.entry = stored;
        Ok(())
    }
}

// ============================================================================
// CONSOLIDATION NOTIFY
// ============================================================================

/// Emits a `ThresholdReached` trigger once context usage crosses the line;
/// runs after persistence so only stored entries count. Queue overflow is
/// counted by the handle and never fails the event.
pub struct NotifyStage {
    handle: ConsolidationHandle,
    monitor: Arc<ContextMonitor>,
}

impl NotifyStage {
    pub fn new(handle: ConsolidationHandle, monitor: Arc<ContextMonitor>) -> Self {
        Self { handle, monitor }
    }
}

#[async_trait]
impl PipelineStage for NotifyStage {
    fn name(&self) -> &'static str {
        "consolidation_notify"
    }

    async fn handle(&self, _ctx: &mut MemoryContext, _cancel: &Cancellation) -> Result<()> {
        if self.monitor.usage_above_threshold() {
            // Producers must not block, and a full queue is not this
            // event's failure.
            let _ = self.handle.notify(ConsolidationTrigger::ThresholdReached);
        }
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

    fn ctx(content: &str) -> MemoryContext {
        MemoryContext::new(
            MemoryEntry::new("a.txt", content, Metadata::new()),
            "capture-pipeline",
        )
    }

    #[tokio::test]
    async fn validation_rejects_empty_content() {
        let cancel = Cancellation::new();
        let mut bad = ctx("  ");
        let err = ValidationStage.handle(&mut bad, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        let mut good = ctx("fine");
        ValidationStage.handle(&mut good, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn validation_rejects_nil_id() {
        let cancel = Cancellation::new();
        let mut context = ctx("fine");
        context.entry.id = uuid::Uuid::nil();
        let err = ValidationStage.handle(&mut context, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn enrichment_stamps_and_prefixes() {
        let cancel = Cancellation::new();
        let mut context = ctx("0123456789");
        context.metadata.insert("batch_size".to_string(), json!(3));

        EnrichmentStage.handle(&mut context, &cancel).await.unwrap();

        assert!(context.entry.metadata.contains_key("processed_at"));
        assert_eq!(
            context.entry.metadata["pipeline_source"],
            json!("capture-pipeline")
        );
        assert_eq!(context.entry.metadata["word_count"], json!(2));
        assert_eq!(context.entry.metadata["pipeline_batch_size"], json!(3));
    }

    #[tokio::test]
    async fn routing_tags_by_type_and_passes_unknown() {
        let cancel = Cancellation::new();
        let mut context = ctx("content");
        RoutingStage::default().handle(&mut context, &cancel).await.unwrap();
        assert_eq!(context.entry.metadata["route"], json!("episodic"));

        // An empty dispatch table passes events through untouched.
        let bare = RoutingStage { handlers: HashMap::new() };
        let mut context = ctx("content");
        bare.handle(&mut context, &cancel).await.unwrap();
        assert!(!context.entry.metadata.contains_key("route"));
    }
}
