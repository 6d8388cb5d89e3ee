//! Capture filter - decides whether a raw event becomes a memory and with
//! what priority.
//!
//! Three rule families (file, command, search) plus a profile that modulates
//! thresholds. Decisions are deterministic given rules, profile, event, and
//! the per-source debounce ledger; no I/O and no wall-clock reads happen
//! here - all timing comes from event timestamps.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::config::{FilterConfig, Profile};
use crate::error::{EngramError, Result};
use crate::memory::{CaptureEvent, Priority};

// ============================================================================
// DECISION
// ============================================================================

/// Outcome of filtering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDecision {
    pub capture: bool,
    pub priority: Priority,
}

impl CaptureDecision {
    fn rejected() -> Self {
        Self {
            capture: false,
            priority: Priority::Low,
        }
    }

    fn captured(priority: Priority) -> Self {
        Self {
            capture: true,
            priority,
        }
    }
}

// ============================================================================
// COMPILED RULES
// ============================================================================

struct FileRules {
    min_change_size: u64,
    debounce_ms: u64,
    ignore: GlobSet,
    include: GlobSet,
    include_empty: bool,
    max_file_size: u64,
}

struct CommandRules {
    capture_errors: bool,
    capture: Vec<Regex>,
    ignore: Vec<Regex>,
    max_output_lines: usize,
}

struct SearchRules {
    min_results: u64,
    max_results: u64,
    batch_window_ms: u64,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| EngramError::InvalidInput(format!("glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngramError::InvalidInput(format!("glob set: {e}")))
}

fn build_regexes(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| EngramError::InvalidInput(format!("regex {pattern:?}: {e}")))
        })
        .collect()
}

// ============================================================================
// EVENT FILTER
// ============================================================================

/// Compiled capture filter. Profile selection is static per process.
pub struct EventFilter {
    file: FileRules,
    command: CommandRules,
    search: SearchRules,
    profile: Profile,
    /// Last *captured* event timestamp per source, for debouncing and the
    /// novelty component of the capture threshold.
    last_captured: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl EventFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let profile = config.active_profile()?;
        Ok(Self {
            file: FileRules {
                min_change_size: config.file.min_change_size,
                debounce_ms: config.file.debounce_ms,
                ignore: build_globset(&config.file.ignore_patterns)?,
                include: build_globset(&config.file.include_patterns)?,
                include_empty: config.file.include_patterns.is_empty(),
                max_file_size: config.file.max_file_size,
            },
            command: CommandRules {
                capture_errors: config.command.capture_errors,
                capture: build_regexes(&config.command.capture_patterns)?,
                ignore: build_regexes(&config.command.ignore_patterns)?,
                max_output_lines: config.command.max_output_lines,
            },
            search: SearchRules {
                min_results: config.search.min_results,
                max_results: config.search.max_results,
                batch_window_ms: config.search.batch_window_ms,
            },
            profile,
            last_captured: Mutex::new(HashMap::new()),
        })
    }

    /// Search-burst coalescing window for the pipeline's batcher.
    pub fn search_batch_window_ms(&self) -> u64 {
        self.search.batch_window_ms
    }

    /// Decide capture and priority for one event.
    pub fn should_capture(&self, event: &CaptureEvent) -> CaptureDecision {
        let decision = match event.event_type {
            t if t.is_file() => self.decide_file(event),
            t if t.is_command() => self.decide_command(event),
            _ => self.decide_search(event),
        };

        let decision = self.apply_capture_threshold(event, decision);

        // The ledger backs file debounce and novelty; command and search
        // events have their own repeat handling (error gating, batching).
        if decision.capture && event.event_type.is_file() {
            self.last_captured
                .lock()
                .expect("debounce ledger poisoned")
                .insert(event.source.clone(), event.timestamp);
        }
        decision
    }

    /// Shape an accepted event before it enters the chain: stamp the decided
    /// priority and truncate command output to the configured line cap.
    pub fn shape_event(&self, mut event: CaptureEvent, priority: Priority) -> CaptureEvent {
        event.priority = priority;
        if event.event_type.is_command() {
            let cap = self.command.max_output_lines;
            if event.content.lines().count() > cap {
                event.content = event
                    .content
                    .lines()
                    .take(cap)
                    .collect::<Vec<_>>()
                    .join("\n");
            }
        }
        event
    }

    // ------------------------------------------------------------------
    // rule families
    // ------------------------------------------------------------------

    fn effective_min_change(&self) -> u64 {
        scale(self.file.min_change_size, self.profile.filter_strictness.threshold_factor())
    }

    fn decide_file(&self, event: &CaptureEvent) -> CaptureDecision {
        if self.file.ignore.is_match(&event.source) {
            return CaptureDecision::rejected();
        }
        if !self.file.include_empty && !self.file.include.is_match(&event.source) {
            return CaptureDecision::rejected();
        }

        let change_size = event.metadata_u64("change_size").unwrap_or(0);
        let threshold = self.effective_min_change();
        if change_size < threshold {
            return CaptureDecision::rejected();
        }

        if let Some(size) = event.metadata_u64("file_size") {
            if size > self.file.max_file_size {
                return CaptureDecision::rejected();
            }
        }

        if self.debounced(event) {
            return CaptureDecision::rejected();
        }

        // Inclusive multiples of the effective threshold.
        let priority = if threshold > 0 && change_size >= threshold * 10 {
            Priority::Critical
        } else if threshold > 0 && change_size >= threshold * 5 {
            Priority::High
        } else {
            Priority::Medium
        };
        CaptureDecision::captured(priority)
    }

    fn decide_command(&self, event: &CaptureEvent) -> CaptureDecision {
        if self.command.capture_errors && command_failed(event) {
            return CaptureDecision::captured(Priority::Critical);
        }
        if self.command.ignore.iter().any(|re| re.is_match(&event.content)) {
            return CaptureDecision::rejected();
        }
        if self.command.capture.iter().any(|re| re.is_match(&event.content)) {
            return CaptureDecision::captured(Priority::High);
        }
        CaptureDecision::rejected()
    }

    fn decide_search(&self, event: &CaptureEvent) -> CaptureDecision {
        let count = event.metadata_u64("result_count").unwrap_or(0);
        let min = scale(self.search.min_results, self.profile.filter_strictness.threshold_factor());
        if count < min || count > self.search.max_results {
            return CaptureDecision::rejected();
        }
        // Priority scales with how much of the result window is filled.
        let ratio = count as f64 / self.search.max_results.max(1) as f64;
        let priority = if ratio >= 0.5 {
            Priority::High
        } else {
            Priority::Medium
        };
        CaptureDecision::captured(priority)
    }

    // ------------------------------------------------------------------
    // profile modulation
    // ------------------------------------------------------------------

    fn debounced(&self, event: &CaptureEvent) -> bool {
        let window_ms =
            (self.file.debounce_ms as f64 * self.profile.debounce_multiplier).round() as i64;
        let ledger = self.last_captured.lock().expect("debounce ledger poisoned");
        match ledger.get(&event.source) {
            Some(last) => {
                let elapsed = event.timestamp.signed_duration_since(*last);
                elapsed.num_milliseconds() < window_ms
            }
            None => false,
        }
    }

    /// Blend priority urgency with per-source novelty and compare against
    /// the profile floor. Novelty saturates at one (profile-scaled) debounce
    /// window since the last capture; a first-time source is fully novel.
    fn apply_capture_threshold(
        &self,
        event: &CaptureEvent,
        decision: CaptureDecision,
    ) -> CaptureDecision {
        if !decision.capture {
            return decision;
        }
        let novelty = if !event.event_type.is_file() {
            // Non-file events carry no debounce history; they are judged on
            // priority alone.
            1.0
        } else {
            let ledger = self.last_captured.lock().expect("debounce ledger poisoned");
            match ledger.get(&event.source) {
                None => 1.0,
                Some(last) => {
                    let elapsed = event
                        .timestamp
                        .signed_duration_since(*last)
                        .num_milliseconds()
                        .max(0) as f64;
                    let horizon = (self.file.debounce_ms.max(1) as f64
                        * self.profile.debounce_multiplier.max(0.001))
                    .max(1.0);
                    (elapsed / horizon).min(1.0)
                }
            }
        };
        let score = 0.7 * decision.priority.weight() + 0.3 * novelty;
        if score >= self.profile.capture_threshold {
            decision
        } else {
            CaptureDecision::rejected()
        }
    }
}

fn scale(value: u64, factor: f64) -> u64 {
    (value as f64 * factor).round() as u64
}

/// A command event is an error when the host reports a non-zero exit code or
/// an explicit error flag.
fn command_failed(event: &CaptureEvent) -> bool {
    if let Some(code) = event.metadata.get("exit_code").and_then(serde_json::Value::as_i64) {
        if code != 0 {
            return true;
        }
    }
    event
        .metadata
        .get("error")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

// ============================================================================
// TESTS
// ============================================================================
