//! Error types shared across the engine.
//!
//! One enum covers every failure class the components surface. Adapters at
//! the boundary (HTTP, stdio) map these onto their own status vocabulary.

use uuid::Uuid;

/// Engine error kinds.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngramError {
    /// Malformed event or entry; rejected at the boundary, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transient vector-index or embedding outage; retried with backoff.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored vector length disagrees with the collection dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An entry with this id already exists.
    #[error("duplicate id: {0}")]
    DuplicateId(Uuid),

    /// The context monitor declined a consolidation. Not an error to
    /// callers; counted in the engine's audit counters.
    #[error("consolidation refused by context budget")]
    BudgetRefused,

    /// A bounded queue is at capacity; the caller may shed load.
    #[error("queue full: {0}")]
    QueueFull(&'static str),

    /// Missing id on fetch or consolidate-by-id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was cancelled or ran past its deadline.
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngramError {
    /// Whether a bounded local retry is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngramError::BackendUnavailable(_))
    }

    /// Stable machine-readable kind tag, used by boundary adapters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngramError::InvalidInput(_) => "invalid_input",
            EngramError::BackendUnavailable(_) => "backend_unavailable",
            EngramError::DimensionMismatch { .. } => "dimension_mismatch",
            EngramError::DuplicateId(_) => "duplicate_id",
            EngramError::BudgetRefused => "budget_refused",
            EngramError::QueueFull(_) => "queue_full",
            EngramError::NotFound(_) => "not_found",
            EngramError::Cancelled => "cancelled",
            EngramError::Internal(_) => "internal",
        }
    }
}

/// Crate result type.
pub type Result<T> = std::result::Result<T, EngramError>;
