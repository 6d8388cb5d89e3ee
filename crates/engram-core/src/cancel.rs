//! Cooperative cancellation token.
//!
//! Every cross-component call takes a [`Cancellation`]; long-running loops
//! check it at stage boundaries and between retries. A token carries an
//! optional deadline; children inherit the tighter of the parent deadline
//! and their own timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EngramError, Result};

/// Cancellation token wrapping an `AtomicBool` plus an inherited deadline.
#[derive(Debug, Clone)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A token that never expires (cancel-only).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// A token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive a child sharing this token's cancel flag, with a deadline no
    /// later than the parent's.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => Some(parent.min(candidate)),
            None => Some(candidate),
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline,
        }
    }

    /// Request cancellation. All clones and children observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Error out if cancelled; used as a checkpoint inside loops.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngramError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time remaining until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_propagates_to_clones() {
        let token = Cancellation::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.checkpoint().is_err());
    }

    #[test]
    fn child_inherits_tighter_deadline() {
        let parent = Cancellation::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        // The child's deadline cannot extend past the parent's.
        assert!(child.remaining().unwrap() <= Duration::from_millis(10));
    }

    #[test]
    fn expired_deadline_counts_as_cancelled() {
        let token = Cancellation::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelling_child_cancels_parent_flag() {
        let parent = Cancellation::new();
        let child = parent.child_with_timeout(Duration::from_secs(1));
        child.cancel();
        assert!(parent.is_cancelled());
    }
}
