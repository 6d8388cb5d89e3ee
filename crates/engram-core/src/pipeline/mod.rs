//! Capture pipeline - filter, batch, queue, and process events into the
//! journal.
//!
//! Accepted events enter a bounded priority queue. A dispatcher pops in
//! strict priority order and routes each event onto a worker lane chosen by
//! hashing `source`, so one source never reorders even with a pool of
//! workers. Each worker runs the middleware chain per event.

mod queue;
mod stages;

pub use queue::PriorityQueue;
pub use stages::{
    MemoryContext, NotifyStage, PersistenceStage, PipelineStage, RouteHandler, RoutingStage,
    EnrichmentStage, ValidationStage, STAGE_NAMES,
};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::cancel::Cancellation;
use crate::config::PipelineConfig;
use crate::consolidation::ConsolidationHandle;
use crate::error::{EngramError, Result};
use crate::filter::EventFilter;
use crate::journal::VectorJournal;
use crate::memory::{keys, CaptureEvent, MemoryEntry, Priority};
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::monitor::ContextMonitor;

type Batcher = Arc<StdMutex<HashMap<String, Vec<CaptureEvent>>>>;

pub struct CapturePipeline {
    filter: Arc<EventFilter>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    queue: Arc<PriorityQueue<CaptureEvent>>,
    stages: Arc<Vec<Box<dyn PipelineStage>>>,
    batcher: Batcher,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl CapturePipeline {
    pub fn new(
        filter: Arc<EventFilter>,
        journal: Arc<VectorJournal>,
        monitor: Arc<ContextMonitor>,
        consolidation: ConsolidationHandle,
        config: PipelineConfig,
    ) -> Self {
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(ValidationStage),
            Box::new(EnrichmentStage),
            Box::new(RoutingStage::default()),
            Box::new(PersistenceStage::new(journal)),
            Box::new(NotifyStage::new(consolidation, monitor)),
        ];
        Self {
            filter,
            metrics: Arc::new(PipelineMetrics::new(&STAGE_NAMES)),
            queue: Arc::new(PriorityQueue::new(config.priority_queue_size)),
            stages: Arc::new(stages),
            batcher: Arc::new(StdMutex::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
            config,
            started: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Submit one raw event. `Ok(true)` when accepted (queued or batched),
    /// `Ok(false)` when the filter dropped it, `queue_full` when saturated
    /// so the producer can shed load.
    pub fn submit(&self, event: CaptureEvent) -> Result<bool> {
        PipelineMetrics::incr(&self.metrics.total_events);

        let decision = self.filter.should_capture(&event);
        if !decision.capture {
            PipelineMetrics::incr(&self.metrics.filtered_events);
            tracing::trace!(source = %event.source, event_type = %event.event_type,
                "event filtered");
            return Ok(false);
        }
        let event = self.filter.shape_event(event, decision.priority);

        if event.event_type.is_search() {
            self.submit_batched(event);
            return Ok(true);
        }
        self.enqueue(event)?;
        Ok(true)
    }

    fn enqueue(&self, event: CaptureEvent) -> Result<()> {
        let priority = event.priority;
        self.queue.try_push(priority, event).inspect_err(|err| {
            if matches!(err, EngramError::QueueFull(_)) {
                PipelineMetrics::incr(&self.metrics.rejected_events);
                tracing::warn!("pipeline queue full, event rejected");
            }
        })
    }

    /// Coalesce a burst of searches from one source into one event within
    /// the batch window.
    fn submit_batched(&self, event: CaptureEvent) {
        let source = event.source.clone();
        let (first_for_source, over_cap) = {
            let mut pending = self.batcher.lock().expect("batcher poisoned");
            let bucket = pending.entry(source.clone()).or_default();
            bucket.push(event);
            (bucket.len() == 1, bucket.len() >= self.config.max_batch_size)
        };

        if over_cap {
            Self::flush_source(&self.batcher, &self.queue, &self.metrics, &source);
            return;
        }
        if first_for_source {
            let batcher = Arc::clone(&self.batcher);
            let queue = Arc::clone(&self.queue);
            let metrics = Arc::clone(&self.metrics);
            let window = Duration::from_millis(
                self.config
                    .batch_window_ms
                    .max(self.filter.search_batch_window_ms()),
            );
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                Self::flush_source(&batcher, &queue, &metrics, &source);
            });
        }
    }

    fn flush_source(
        batcher: &Batcher,
        queue: &Arc<PriorityQueue<CaptureEvent>>,
        metrics: &Arc<PipelineMetrics>,
        source: &str,
    ) {
        let events = batcher
            .lock()
            .expect("batcher poisoned")
            .remove(source)
            .unwrap_or_default();
        if events.is_empty() {
            return;
        }
        let merged = merge_search_events(events);
        let priority = merged.priority;
        if queue.try_push(priority, merged).is_err() {
            PipelineMetrics::incr(&metrics.rejected_events);
            tracing::warn!(source, "pipeline queue full, search batch rejected");
        }
    }

    /// Spawn the dispatcher and the worker lanes.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngramError::Internal("pipeline already started".to_string()));
        }

        let worker_count = self.config.worker_count.max(1);
        let mut lane_txs = Vec::with_capacity(worker_count);
        let mut tasks = self.tasks.lock().await;

        for worker_id in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<CaptureEvent>(self.config.buffer_size.max(1));
            lane_txs.push(tx);

            let stages = Arc::clone(&self.stages);
            let metrics = Arc::clone(&self.metrics);
            let timeout = Duration::from_secs(self.config.timeout_secs);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    process_event(&stages, &metrics, event, timeout).await;
                }
                tracing::debug!(worker_id, "pipeline worker drained");
            }));
        }

        let queue = Arc::clone(&self.queue);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = queue.pop().await {
                let lane = lane_for(&event.source, lane_txs.len());
                // Lane backpressure is internal: the dispatcher waits for
                // the worker, the bounded submit queue protects producers.
                if lane_txs[lane].send(event).await.is_err() {
                    break;
                }
            }
            // Dropping the senders lets the workers drain and exit.
            tracing::debug!("pipeline dispatcher stopped");
        }));

        tracing::info!(workers = worker_count, "capture pipeline started");
        Ok(())
    }

    /// Flush pending batches, close the queue, and wait for in-flight work
    /// up to `deadline`.
    pub async fn stop(&self, deadline: Duration) {
        let sources: Vec<String> = {
            let pending = self.batcher.lock().expect("batcher poisoned");
            pending.keys().cloned().collect()
        };
        for source in sources {
            Self::flush_source(&self.batcher, &self.queue, &self.metrics, &source);
        }

        self.queue.close();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if tokio::time::timeout(deadline, task).await.is_err() {
                tracing::warn!("pipeline worker ran past shutdown deadline, abandoning");
            }
        }
        tracing::info!("capture pipeline stopped");
    }
}

// ============================================================================
// EVENT PROCESSING
// ============================================================================

/// Run the chain for one event, recording per-stage latency and outcome.
async fn process_event(
    stages: &Arc<Vec<Box<dyn PipelineStage>>>,
    metrics: &Arc<PipelineMetrics>,
    event: CaptureEvent,
    timeout: Duration,
) {
    let cancel = Cancellation::with_timeout(timeout);
    let mut ctx = MemoryContext::new(entry_from_event(&event), "capture-pipeline");

    for stage in stages.iter() {
        if let Err(err) = cancel.checkpoint() {
            PipelineMetrics::incr(&metrics.failed_events);
            tracing::warn!(stage = ctx.stage, error = %err, "event processing cancelled");
            return;
        }
        ctx.stage = stage.name();
        let start = std::time::Instant::now();
        let result = stage.handle(&mut ctx, &cancel).await;
        metrics.record_stage(stage.name(), start.elapsed());

        if let Err(err) = result {
            PipelineMetrics::incr(&metrics.failed_events);
            tracing::warn!(stage = ctx.stage, id = %ctx.entry.id, error = %err,
                "pipeline stage failed");
            return;
        }
    }
    PipelineMetrics::incr(&metrics.processed_events);
}

/// Map an accepted event into a pending episodic entry. Strength starts
/// from the capture priority.
fn entry_from_event(event: &CaptureEvent) -> MemoryEntry {
    let mut metadata = event.metadata.clone();
    metadata.insert(
        keys::EVENT_TYPE.to_string(),
        Value::from(event.event_type.as_str()),
    );
    metadata.insert(
        keys::PRIORITY.to_string(),
        Value::from(event.priority.as_str()),
    );

    let mut entry = MemoryEntry::new(event.source.clone(), event.content.clone(), metadata);
    entry.strength = match event.priority {
        Priority::Critical => 0.9,
        Priority::High => 0.75,
        Priority::Medium => 0.5,
        Priority::Low => 0.3,
    };
    entry
}

/// Merge a burst of search events from one source into a single event with
/// aggregated metadata.
fn merge_search_events(mut events: Vec<CaptureEvent>) -> CaptureEvent {
    if events.len() == 1 {
        return events.pop().expect("non-empty batch");
    }
    let total_results: u64 = events
        .iter()
        .filter_map(|e| e.metadata_u64("result_count"))
        .sum();
    let priority = events
        .iter()
        .map(|e| e.priority)
        .max()
        .unwrap_or(Priority::Medium);
    let timestamp = events
        .iter()
        .map(|e| e.timestamp)
        .max()
        .expect("non-empty batch");

    let mut merged = events.remove(0);
    let mut contents = vec![merged.content.clone()];
    for event in &events {
        contents.push(event.content.clone());
    }
    merged.content = contents.join("\n");
    merged.priority = priority;
    merged.timestamp = timestamp;
    merged
        .metadata
        .insert("result_count".to_string(), Value::from(total_results));
    merged
        .metadata
        .insert("batch_size".to_string(), Value::from(events.len() as u64 + 1));
    merged
}

fn lane_for(source: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}

// ============================================================================
// TESTS
// ============================================================================
