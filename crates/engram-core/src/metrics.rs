//! Pipeline and engine metrics.
//!
//! Plain atomic counters and fixed-bucket latency histograms; snapshots
//! serialize straight into the stats surfaces.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

// ============================================================================
// LATENCY HISTOGRAM
// ============================================================================

/// Upper bucket bounds in microseconds; the last bucket is unbounded.
const BUCKET_BOUNDS_US: [u64; 8] = [100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000];

/// Fixed-bucket latency histogram.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKET_BOUNDS_US.len() + 1],
    count: AtomicU64,
    total_us: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        let idx = BUCKET_BOUNDS_US
            .iter()
            .position(|bound| us <= *bound)
            .unwrap_or(BUCKET_BOUNDS_US.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut buckets = Vec::with_capacity(BUCKET_BOUNDS_US.len() + 1);
        for (idx, bucket) in self.buckets.iter().enumerate() {
            let label = if idx < BUCKET_BOUNDS_US.len() {
                format!("<= {}us", BUCKET_BOUNDS_US[idx])
            } else {
                "inf".to_string()
            };
            buckets.push((label, bucket.load(Ordering::Relaxed)));
        }
        let count = self.count.load(Ordering::Relaxed);
        let total_us = self.total_us.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            mean_us: if count == 0 { 0.0 } else { total_us as f64 / count as f64 },
            buckets,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramSnapshot {
    pub count: u64,
    pub mean_us: f64,
    pub buckets: Vec<(String, u64)>,
}

// ============================================================================
// PIPELINE METRICS
// ============================================================================

/// Counters required of the capture pipeline, plus per-stage latencies.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub total_events: AtomicU64,
    pub processed_events: AtomicU64,
    pub filtered_events: AtomicU64,
    pub failed_events: AtomicU64,
    /// Events rejected at the filter's output because the queue was full.
    pub rejected_events: AtomicU64,
    stage_latency: BTreeMap<&'static str, LatencyHistogram>,
}

impl PipelineMetrics {
    pub fn new(stages: &[&'static str]) -> Self {
        let mut stage_latency = BTreeMap::new();
        for stage in stages {
            stage_latency.insert(*stage, LatencyHistogram::new());
        }
        Self {
            stage_latency,
            ..Default::default()
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: &'static str, elapsed: Duration) {
        if let Some(histogram) = self.stage_latency.get(stage) {
            histogram.record(elapsed);
        }
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            total_events: self.total_events.load(Ordering::Relaxed),
            processed_events: self.processed_events.load(Ordering::Relaxed),
            filtered_events: self.filtered_events.load(Ordering::Relaxed),
            failed_events: self.failed_events.load(Ordering::Relaxed),
            rejected_events: self.rejected_events.load(Ordering::Relaxed),
            stage_latency: self
                .stage_latency
                .iter()
                .map(|(stage, histogram)| (stage.to_string(), histogram.snapshot()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetricsSnapshot {
    pub total_events: u64,
    pub processed_events: u64,
    pub filtered_events: u64,
    pub failed_events: u64,
    pub rejected_events: u64,
    pub stage_latency: BTreeMap<String, HistogramSnapshot>,
}

// ============================================================================
// CONSOLIDATION AUDIT COUNTERS
// ============================================================================

/// Engine audit counters; budget refusals are not errors, only counted.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub events_processed: AtomicU64,
    pub events_failed: AtomicU64,
    pub budget_refused: AtomicU64,
    pub queue_overflow: AtomicU64,
    pub entries_consolidated: AtomicU64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> EngineCountersSnapshot {
        EngineCountersSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            budget_refused: self.budget_refused.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            entries_consolidated: self.entries_consolidated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCountersSnapshot {
    pub events_processed: u64,
    pub events_failed: u64,
    pub budget_refused: u64,
    pub queue_overflow: u64,
    pub entries_consolidated: u64,
}

// ============================================================================
// TESTS
// ============================================================================
