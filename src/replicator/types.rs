//! Replicator state types.
//!
//! # State Transitions
//!
//! ```text
//!              start()
//! Created ─────────────────→ Running
//!    │                          │
//!    │ clean_up()               │ clean_up()
//!    ↓                          ↓
//!    └──────────────────→ Draining ──(idle or drain timeout)──→ Stopped
//! ```
//!
//! - **Created**: after `Replicator::new()`. Submissions are queued but
//!   nothing executes.
//! - **Running**: the dispatcher task is executing requests.
//! - **Draining**: `clean_up()` is waiting for the queues to empty. New
//!   submissions are rejected.
//! - **Stopped**: the dispatcher has exited or been aborted.

/// State of the replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl ReplicatorState {
    /// Whether new sync requests are accepted.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

impl std::fmt::Display for ReplicatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicatorState::Created => write!(f, "Created"),
            ReplicatorState::Running => write!(f, "Running"),
            ReplicatorState::Draining => write!(f, "Draining"),
            ReplicatorState::Stopped => write!(f, "Stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicator_state_display() {
        assert_eq!(ReplicatorState::Created.to_string(), "Created");
        assert_eq!(ReplicatorState::Running.to_string(), "Running");
        assert_eq!(ReplicatorState::Draining.to_string(), "Draining");
        assert_eq!(ReplicatorState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_accepts_requests() {
        assert!(ReplicatorState::Created.accepts_requests());
        assert!(ReplicatorState::Running.accepts_requests());
        assert!(!ReplicatorState::Draining.accepts_requests());
        assert!(!ReplicatorState::Stopped.accepts_requests());
    }
}
