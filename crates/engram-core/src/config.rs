//! Typed configuration records.
//!
//! Loaded from a TOML file with environment overrides; a missing file yields
//! pure defaults, a malformed file is a configuration error. Every record is
//! `#[serde(default)]` so partial files stay valid.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};
use crate::memory::ScoreWeights;

// ============================================================================
// JOURNAL
// ============================================================================

/// Vector journal and index backend options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Index backend: `memory` (in-process reference backend) or the name of
    /// an external provider wired in by the host.
    pub provider: String,
    pub url: String,
    pub insecure: bool,
    pub vector_dimension: usize,
    pub on_disk_payload: bool,
    pub collection_names: CollectionNames,
    /// Neighbours linked at store time.
    pub assoc_k: usize,
    /// Cosine floor below which store-time edges are not opened.
    pub assoc_similarity_floor: f32,
    /// Bounded retries for transient index failures (base 1 s, doubling).
    pub max_retries: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            url: "http://localhost:6333".to_string(),
            insecure: false,
            vector_dimension: 384,
            on_disk_payload: true,
            collection_names: CollectionNames::default(),
            assoc_k: 5,
            assoc_similarity_floor: 0.70,
            max_retries: 3,
        }
    }
}

/// One logical collection per memory type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionNames {
    pub episodic: String,
    pub semantic: String,
    pub procedural: String,
    pub metacognitive: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            episodic: "memories_episodic".to_string(),
            semantic: "memories_semantic".to_string(),
            procedural: "memories_procedural".to_string(),
            metacognitive: "memories_metacognitive".to_string(),
        }
    }
}

// ============================================================================
// EMBEDDING
// ============================================================================

/// External embedding/summarization provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub url: String,
    /// Sent as a bearer token when non-empty. Overridden by
    /// `ENGRAM_EMBEDDING_API_KEY`.
    pub api_key: String,
    pub embedding_model: String,
    /// Model used for consolidation summaries; empty disables the learned
    /// summarizer and consolidation falls back to the deterministic reducer.
    pub consolidation_model: String,
    pub cache_enabled: bool,
    /// Entries kept in the embedding response cache.
    pub cache_size: usize,
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            url: "http://localhost:11434".to_string(),
            api_key: String::new(),
            embedding_model: "nomic-embed-text".to_string(),
            consolidation_model: String::new(),
            cache_enabled: true,
            cache_size: 1024,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

// ============================================================================
// CONSOLIDATION
// ============================================================================

/// Consolidation engine and context budget options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    /// Synthetic context window size, in character-proxy tokens.
    pub max_tokens: u64,
    /// Fraction of the window that consolidation may not push usage past.
    pub safety_margin: f64,
    /// N: selection cap and the fetch baseline for triggers.
    pub memory_count_threshold: usize,
    /// Usage fraction at which `ThresholdReached` fires.
    pub context_usage_threshold: f64,
    pub decay_factor: f64,
    pub access_weight: f64,
    pub relevance_weight: f64,
    /// Single-linkage cosine-distance cut for clustering.
    pub linkage_threshold: f32,
    /// Fixed cost overhead added to every consolidation estimate.
    pub estimate_overhead: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: 100_000,
            safety_margin: 0.8,
            memory_count_threshold: 10,
            context_usage_threshold: 0.8,
            decay_factor: 0.01,
            access_weight: 0.6,
            relevance_weight: 0.4,
            linkage_threshold: 0.3,
            estimate_overhead: 1000,
        }
    }
}

impl ConsolidationConfig {
    pub fn score_weights(&self) -> ScoreWeights {
        ScoreWeights {
            decay_rate: self.decay_factor,
            access_weight: self.access_weight,
            relevance_weight: self.relevance_weight,
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub worker_count: usize,
    /// Per-worker lane buffer.
    pub buffer_size: usize,
    pub priority_queue_size: usize,
    /// Search-burst coalescing window.
    pub batch_window_ms: u64,
    pub max_batch_size: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Per-event processing deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            buffer_size: 64,
            priority_queue_size: 256,
            batch_window_ms: 500,
            max_batch_size: 16,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// File-operation capture rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilterConfig {
    pub min_change_size: u64,
    pub debounce_ms: u64,
    pub ignore_patterns: Vec<String>,
    pub include_patterns: Vec<String>,
    pub max_file_size: u64,
}

impl Default for FileFilterConfig {
    fn default() -> Self {
        Self {
            min_change_size: 50,
            debounce_ms: 2000,
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/*.lock".to_string(),
            ],
            include_patterns: Vec::new(),
            max_file_size: 1_048_576,
        }
    }
}

/// Command-execution capture rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandFilterConfig {
    pub capture_errors: bool,
    pub capture_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub max_output_lines: usize,
}

impl Default for CommandFilterConfig {
    fn default() -> Self {
        Self {
            capture_errors: true,
            capture_patterns: vec![
                r"(?i)\berror\b".to_string(),
                r"(?i)\bwarn(ing)?\b".to_string(),
                r"(?i)\bfail(ed|ure)?\b".to_string(),
            ],
            ignore_patterns: vec![r"^\s*$".to_string()],
            max_output_lines: 100,
        }
    }
}

/// Search-operation capture rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilterConfig {
    pub min_results: u64,
    pub max_results: u64,
    pub batch_window_ms: u64,
}

impl Default for SearchFilterConfig {
    fn default() -> Self {
        Self {
            min_results: 1,
            max_results: 100,
            batch_window_ms: 500,
        }
    }
}

/// Filter strictness: raises or relaxes numeric thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterStrictness {
    Low,
    #[default]
    Medium,
    High,
}

impl FilterStrictness {
    /// Multiplier applied to size/result thresholds.
    pub fn threshold_factor(&self) -> f64 {
        match self {
            FilterStrictness::Low => 0.5,
            FilterStrictness::Medium => 1.0,
            FilterStrictness::High => 2.0,
        }
    }
}

/// A named modulation of the filter rules. Selection is static per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub debounce_multiplier: f64,
    pub filter_strictness: FilterStrictness,
    /// Normalized capture score floor in [0, 1].
    pub capture_threshold: f64,
}

impl Default for Profile {
    fn default() -> Self {
        Self::balanced()
    }
}

impl Profile {
    pub fn conservative() -> Self {
        Self {
            debounce_multiplier: 2.0,
            filter_strictness: FilterStrictness::High,
            capture_threshold: 0.7,
        }
    }

    pub fn balanced() -> Self {
        Self {
            debounce_multiplier: 1.0,
            filter_strictness: FilterStrictness::Medium,
            capture_threshold: 0.5,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            debounce_multiplier: 0.5,
            filter_strictness: FilterStrictness::Low,
            capture_threshold: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub file: FileFilterConfig,
    pub command: CommandFilterConfig,
    pub search: SearchFilterConfig,
    /// Named profiles; the three built-ins are always available.
    pub profiles: HashMap<String, Profile>,
    /// Active profile name.
    pub capture_mode: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            file: FileFilterConfig::default(),
            command: CommandFilterConfig::default(),
            search: SearchFilterConfig::default(),
            profiles: HashMap::new(),
            capture_mode: "balanced".to_string(),
        }
    }
}

impl FilterConfig {
    /// Resolve the active profile: explicit map entry first, then the three
    /// built-in names.
    pub fn active_profile(&self) -> Result<Profile> {
        if let Some(profile) = self.profiles.get(&self.capture_mode) {
            return Ok(profile.clone());
        }
        match self.capture_mode.as_str() {
            "conservative" => Ok(Profile::conservative()),
            "balanced" => Ok(Profile::balanced()),
            "aggressive" => Ok(Profile::aggressive()),
            other => Err(EngramError::InvalidInput(format!(
                "unknown capture mode: {other}"
            ))),
        }
    }
}

// ============================================================================
// SURFACES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_addr: String,
    /// Shared shutdown deadline for service stops, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8420".to_string(),
            shutdown_timeout_secs: 10,
        }
    }
}

// ============================================================================
// TOP-LEVEL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngramConfig {
    pub journal: JournalConfig,
    pub embedding: EmbeddingConfig,
    pub consolidation: ConsolidationConfig,
    pub pipeline: PipelineConfig,
    pub filter: FilterConfig,
    pub http: HttpConfig,
}

impl EngramConfig {
    /// Load from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields defaults; unparseable content is an
    /// `invalid_input` configuration error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = match fs::read_to_string(path.as_ref()) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| {
                EngramError::InvalidInput(format!(
                    "config {}: {e}",
                    path.as_ref().display()
                ))
            })?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("ENGRAM_JOURNAL_URL") {
            if !url.is_empty() {
                self.journal.url = url;
            }
        }
        if let Ok(url) = env::var("ENGRAM_EMBEDDING_URL") {
            if !url.is_empty() {
                self.embedding.url = url;
            }
        }
        if let Ok(key) = env::var("ENGRAM_EMBEDDING_API_KEY") {
            if !key.is_empty() {
                self.embedding.api_key = key;
            }
        }
        if let Ok(addr) = env::var("ENGRAM_HTTP_ADDR") {
            if !addr.is_empty() {
                self.http.listen_addr = addr;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngramConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.journal.vector_dimension, 384);
        assert_eq!(config.filter.capture_mode, "balanced");
        assert_eq!(config.consolidation.memory_count_threshold, 10);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[journal]\nvector_dimension = 768\n\n[filter]\ncapture_mode = \"aggressive\"\n"
        )
        .unwrap();

        let config = EngramConfig::load_from(&path).unwrap();
        assert_eq!(config.journal.vector_dimension, 768);
        assert_eq!(config.filter.capture_mode, "aggressive");
        // Untouched sections keep defaults.
        assert_eq!(config.pipeline.worker_count, 4);
        assert!((config.consolidation.safety_margin - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.toml");
        std::fs::write(&path, "journal = 3").unwrap();
        let err = EngramConfig::load_from(&path).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn builtin_profiles_resolve() {
        let mut config = FilterConfig::default();
        for mode in ["conservative", "balanced", "aggressive"] {
            config.capture_mode = mode.to_string();
            config.active_profile().unwrap();
        }
        config.capture_mode = "bespoke".to_string();
        assert!(config.active_profile().is_err());

        config.profiles.insert(
            "bespoke".to_string(),
            Profile {
                debounce_multiplier: 3.0,
                filter_strictness: FilterStrictness::High,
                capture_threshold: 0.9,
            },
        );
        let profile = config.active_profile().unwrap();
        assert!((profile.debounce_multiplier - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn strictness_scales_thresholds() {
        assert!(FilterStrictness::High.threshold_factor() > FilterStrictness::Low.threshold_factor());
        assert!((FilterStrictness::Medium.threshold_factor() - 1.0).abs() < f64::EPSILON);
    }
}
