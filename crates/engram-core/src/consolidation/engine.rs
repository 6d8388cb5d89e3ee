//! The consolidation consumer loop and per-trigger handlers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::{ConsolidationEvent, ConsolidationHandle, ConsolidationTrigger, EngineState};
use crate::cancel::Cancellation;
use crate::config::ConsolidationConfig;
use crate::error::{EngramError, Result};
use crate::journal::VectorJournal;
use crate::memory::{select_top, MemoryEntry, MemoryType};
use crate::metrics::{EngineCounters, EngineCountersSnapshot, PipelineMetrics};
use crate::monitor::ContextMonitor;

/// Bounded engine queue capacity.
pub const QUEUE_CAPACITY: usize = 100;

pub struct ConsolidationEngine {
    journal: Arc<VectorJournal>,
    monitor: Arc<ContextMonitor>,
    config: ConsolidationConfig,
    counters: Arc<EngineCounters>,
    state: Arc<AtomicU8>,
    tx: mpsc::Sender<ConsolidationEvent>,
    /// Taken by the consumer at start.
    rx: Mutex<Option<mpsc::Receiver<ConsolidationEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsolidationEngine {
    pub fn new(
        journal: Arc<VectorJournal>,
        monitor: Arc<ContextMonitor>,
        config: ConsolidationConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            journal,
            monitor,
            config,
            counters: Arc::new(EngineCounters::default()),
            state: Arc::new(AtomicU8::new(EngineState::Stopped.as_u8())),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> ConsolidationHandle {
        ConsolidationHandle::new(self.tx.clone(), Arc::clone(&self.counters))
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn counters(&self) -> EngineCountersSnapshot {
        self.counters.snapshot()
    }

    /// Spawn the single consumer. Starting twice is an error.
    pub async fn start(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                EngineState::Stopped.as_u8(),
                EngineState::Starting.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(EngramError::Internal(
                "consolidation engine already started".to_string(),
            ));
        }

        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| EngramError::Internal("engine queue already consumed".to_string()))?;

        let worker = Worker {
            journal: Arc::clone(&self.journal),
            monitor: Arc::clone(&self.monitor),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
        };
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let task = tokio::spawn(async move {
            state.store(EngineState::Running.as_u8(), Ordering::SeqCst);
            tracing::info!("consolidation engine running");
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => worker.process(event).await,
                        None => break,
                    },
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            // Drain whatever is already queued; the stop
                            // deadline bounds how long this may run.
                            state.store(EngineState::Draining.as_u8(), Ordering::SeqCst);
                            while let Ok(event) = rx.try_recv() {
                                worker.process(event).await;
                            }
                            break;
                        }
                    }
                }
            }
            state.store(EngineState::Stopped.as_u8(), Ordering::SeqCst);
            tracing::info!("consolidation engine stopped");
        });
        *self.task.lock().await = Some(task);
        Ok(())
    }

    /// Signal shutdown and wait up to `deadline` for the drain; past the
    /// deadline pending events are abandoned.
    pub async fn stop(&self, deadline: Duration) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if tokio::time::timeout(deadline, task).await.is_err() {
                tracing::warn!("consolidation engine drain ran past deadline, abandoning");
            }
        }
        self.state
            .store(EngineState::Stopped.as_u8(), Ordering::SeqCst);
    }
}

// ============================================================================
// CONSUMER
// ============================================================================

struct Worker {
    journal: Arc<VectorJournal>,
    monitor: Arc<ContextMonitor>,
    config: ConsolidationConfig,
    counters: Arc<EngineCounters>,
}

impl Worker {
    /// Handle one event. Errors never stop the engine; budget refusals are
    /// counted and returned silently.
    async fn process(&self, event: ConsolidationEvent) {
        if !self.config.enabled {
            return;
        }
        let cancel = Cancellation::new();
        let result = match event.trigger {
            ConsolidationTrigger::ContextInit => self.on_context_init(&cancel).await,
            ConsolidationTrigger::NewContext => self.on_new_context(&cancel).await,
            ConsolidationTrigger::ThresholdReached => self.on_threshold_reached(&cancel).await,
            ConsolidationTrigger::ConversationEnd => self.on_conversation_end(&cancel).await,
        };
        match result {
            Ok(()) => PipelineMetrics::incr(&self.counters.events_processed),
            Err(EngramError::BudgetRefused) => {
                PipelineMetrics::incr(&self.counters.budget_refused);
                tracing::debug!(trigger = %event.trigger, "consolidation refused by budget");
            }
            Err(err) => {
                PipelineMetrics::incr(&self.counters.events_failed);
                tracing::error!(trigger = %event.trigger, error = %err,
                    "consolidation event failed");
            }
        }
    }

    fn threshold(&self) -> usize {
        self.config.memory_count_threshold
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.journal.recent_of_type(MemoryType::Episodic, limit).await
    }

    fn select(&self, entries: Vec<MemoryEntry>, limit: usize) -> Vec<MemoryEntry> {
        select_top(entries, limit, chrono::Utc::now(), &self.config.score_weights())
    }

    async fn consolidate(
        &self,
        selected: Vec<MemoryEntry>,
        trigger: ConsolidationTrigger,
        cancel: &Cancellation,
    ) -> Result<()> {
        let outcome = self
            .journal
            .consolidate_memories(selected, trigger.as_str(), cancel)
            .await?;
        if !outcome.created.is_empty() {
            self.counters
                .entries_consolidated
                .fetch_add(outcome.processed as u64, Ordering::Relaxed);
            tracing::info!(trigger = %trigger, created = outcome.created.len(),
                processed = outcome.processed, "consolidation complete");
        }
        Ok(())
    }

    /// Session start: up to N most-recent episodic entries, budget
    /// permitting.
    async fn on_context_init(&self, cancel: &Cancellation) -> Result<()> {
        let recent = self.fetch_recent(self.threshold()).await?;
        if recent.is_empty() {
            return Ok(());
        }
        if !self.monitor.can_safely_consolidate(&recent) {
            return Err(EngramError::BudgetRefused);
        }
        let selected = self.select(recent, self.threshold());
        self.consolidate(selected, ConsolidationTrigger::ContextInit, cancel)
            .await
    }

    /// New conversation: fetch up to 2N; below N entries there is nothing
    /// worth distilling yet.
    async fn on_new_context(&self, cancel: &Cancellation) -> Result<()> {
        let recent = self.fetch_recent(self.threshold() * 2).await?;
        if recent.len() < self.threshold() {
            return Ok(());
        }
        if !self.monitor.can_safely_consolidate(&recent) {
            return Err(EngramError::BudgetRefused);
        }
        let selected = self.select(recent, self.threshold());
        self.consolidate(selected, ConsolidationTrigger::NewContext, cancel)
            .await
    }

    /// Saturation: try the normal batch; if the budget refuses, fall back
    /// to a scheduled early consolidation of N/2 entries reduced to the top
    /// N/3.
    async fn on_threshold_reached(&self, cancel: &Cancellation) -> Result<()> {
        let recent = self.fetch_recent(self.threshold()).await?;
        if recent.is_empty() {
            return Ok(());
        }
        if self.monitor.can_safely_consolidate(&recent) {
            let selected = self.select(recent, self.threshold());
            return self
                .consolidate(selected, ConsolidationTrigger::ThresholdReached, cancel)
                .await;
        }

        let reduced = self.fetch_recent((self.threshold() / 2).max(1)).await?;
        if !self.monitor.can_safely_consolidate(&reduced) {
            return Err(EngramError::BudgetRefused);
        }
        let selected = self.select(reduced, (self.threshold() / 3).max(1));
        self.consolidate(selected, ConsolidationTrigger::ThresholdReached, cancel)
            .await
    }

    /// Conversation end: widest fetch (3N); the budget check is bypassed
    /// only once usage has dropped to zero.
    async fn on_conversation_end(&self, cancel: &Cancellation) -> Result<()> {
        let recent = self.fetch_recent(self.threshold() * 3).await?;
        if recent.is_empty() {
            return Ok(());
        }
        if self.monitor.current_usage() != 0 && !self.monitor.can_safely_consolidate(&recent) {
            return Err(EngramError::BudgetRefused);
        }
        let selected = self.select(recent, self.threshold());
        self.consolidate(selected, ConsolidationTrigger::ConversationEnd, cancel)
            .await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::embeddings::testing::StaticEmbeddingProvider;
    use crate::index::MemoryIndex;
    use crate::memory::Metadata;

    const DIM: usize = 64;

    async fn setup(config: ConsolidationConfig) -> (Arc<VectorJournal>, Arc<ContextMonitor>, ConsolidationEngine) {
        let journal = Arc::new(VectorJournal::new(
            Arc::new(MemoryIndex::default()),
            Arc::new(StaticEmbeddingProvider::new(DIM)),
            JournalConfig {
                vector_dimension: DIM,
                ..Default::default()
            },
            config.clone(),
        ));
        journal.init().await.unwrap();
        let monitor = Arc::new(ContextMonitor::new(&config));
        let engine = ConsolidationEngine::new(Arc::clone(&journal), Arc::clone(&monitor), config);
        (journal, monitor, engine)
    }

    async fn seed_similar(journal: &VectorJournal, count: usize) {
        let cancel = Cancellation::new();
        for i in 0..count {
            journal
                .capture_context(
                    &format!("src-{i}"),
                    &format!("deploy pipeline failed with timeout variant{i}"),
                    Metadata::new(),
                    &cancel,
                )
                .await
                .unwrap();
        }
    }

    async fn drain(engine: &ConsolidationEngine) {
        // Give the single consumer time to pull everything queued.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let counters = engine.counters();
            if counters.events_processed + counters.events_failed + counters.budget_refused > 0 {
                break;
            }
        }
    }

    #[tokio::test]
    async fn queue_capacity_is_exact() {
        let (_journal, _monitor, engine) = setup(ConsolidationConfig::default()).await;
        let handle = engine.handle();
        // Consumer not started: events pile up to exactly QUEUE_CAPACITY.
        for _ in 0..QUEUE_CAPACITY {
            handle.notify(ConsolidationTrigger::NewContext).unwrap();
        }
        let err = handle.notify(ConsolidationTrigger::NewContext).unwrap_err();
        assert_eq!(err.kind(), "queue_full");
        assert_eq!(engine.counters().queue_overflow, 1);
    }

    #[tokio::test]
    async fn budget_refusal_counts_and_creates_nothing() {
        let config = ConsolidationConfig {
            max_tokens: 1000,
            safety_margin: 0.8,
            ..Default::default()
        };
        let (journal, monitor, engine) = setup(config).await;
        seed_similar(&journal, 10).await;
        monitor.update_usage(900);

        engine.start().await.unwrap();
        engine.handle().notify(ConsolidationTrigger::ThresholdReached).unwrap();
        drain(&engine).await;
        engine.stop(Duration::from_secs(1)).await;

        assert_eq!(engine.counters().budget_refused, 1);
        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.per_type_counts["semantic"], 0);
    }

    #[tokio::test]
    async fn conversation_end_consolidates_similar_entries() {
        let (journal, monitor, engine) = setup(ConsolidationConfig::default()).await;
        seed_similar(&journal, 5).await;
        monitor.update_usage(0);

        engine.start().await.unwrap();
        engine.handle().notify(ConsolidationTrigger::ConversationEnd).unwrap();
        drain(&engine).await;
        engine.stop(Duration::from_secs(1)).await;

        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.per_type_counts["semantic"], 1);
        assert_eq!(engine.counters().events_processed, 1);
        assert!(engine.counters().entries_consolidated >= 5);
    }

    #[tokio::test]
    async fn new_context_skips_below_threshold() {
        let config = ConsolidationConfig {
            memory_count_threshold: 10,
            ..Default::default()
        };
        let (journal, _monitor, engine) = setup(config).await;
        seed_similar(&journal, 3).await;

        engine.start().await.unwrap();
        engine.handle().notify(ConsolidationTrigger::NewContext).unwrap();
        drain(&engine).await;
        engine.stop(Duration::from_secs(1)).await;

        // Processed without error, but nothing was created.
        assert_eq!(engine.counters().events_processed, 1);
        let stats = journal.stats().await.unwrap();
        assert_eq!(stats.per_type_counts["semantic"], 0);
    }

    #[tokio::test]
    async fn state_machine_walks_through_lifecycle() {
        let (_journal, _monitor, engine) = setup(ConsolidationConfig::default()).await;
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.start().await.unwrap();
        // The consumer flips to Running almost immediately.
        for _ in 0..50 {
            if engine.state() == EngineState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.state(), EngineState::Running);

        // Double start is refused.
        assert!(engine.start().await.is_err());

        engine.stop(Duration::from_secs(1)).await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn per_event_errors_do_not_stop_the_engine() {
        let (journal, _monitor, engine) = setup(ConsolidationConfig::default()).await;
        seed_similar(&journal, 5).await;

        engine.start().await.unwrap();
        let handle = engine.handle();
        // Both events are processed even though the first creates work and
        // the second finds the same fingerprint (a silent no-op, not a
        // failure).
        handle.notify(ConsolidationTrigger::ConversationEnd).unwrap();
        handle.notify(ConsolidationTrigger::ConversationEnd).unwrap();

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if engine.counters().events_processed >= 2 {
                break;
            }
        }
        engine.stop(Duration::from_secs(1)).await;
        assert_eq!(engine.counters().events_processed, 2);
        assert_eq!(engine.counters().events_failed, 0);
    }
}
