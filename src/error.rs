// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication core.
//!
//! Two layers of errors exist:
//!
//! - [`AdapterError`] is what a [`NodeAdapter`](crate::adapter::NodeAdapter)
//!   returns. It is a tagged enum so callers match on the discriminant instead
//!   of guessing from a message.
//! - [`ReplicationError`] is what the dispatcher, the syncer and the runner
//!   propagate. Adapter errors convert into it with `?`.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Adapter(Transport)` | Yes | Remote call failed (network, non-2xx, malformed reply) |
//! | `Adapter(Interrupted)` | Yes | Transfer cancelled, carries partial byte count |
//! | `Adapter(NotFound)` | No | Remote record or endpoint does not exist |
//! | `Unavailable` | Yes | Site did not answer its availability probe |
//! | `ConnectionLost` | Yes | Adapter went away mid-job |
//! | `Persistence` | Yes | Site/filter/item collaborator failed |
//! | `NotFound` | No | Referenced site or filter no longer exists |
//! | `UnsupportedSiteType` | No | No adapter factory for the site's type |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Lifecycle method called in the wrong state |
//! | `Shutdown` | No | Replicator is draining or stopped |
//! | `Internal` | No | Unexpected internal error (including caught panics) |

use crate::site::SiteType;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Result type alias for node adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors reported by a node adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The remote call failed.
    ///
    /// Recovered at the item or request level; never fatal to the dispatcher.
    #[error("Transport error ({operation}): {message}")]
    Transport { operation: String, message: String },

    /// An in-flight transfer was cancelled.
    ///
    /// `bytes_transferred` holds how much was sent before cancellation when
    /// the adapter knows it.
    #[error("Transfer interrupted ({operation}) after {} bytes", .bytes_transferred.map(|b| b.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Interrupted {
        operation: String,
        bytes_transferred: Option<u64>,
    },

    /// The requested record or endpoint does not exist on the remote side.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    /// Create a transport error.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an interruption error.
    pub fn interrupted(operation: impl Into<String>, bytes_transferred: Option<u64>) -> Self {
        Self::Interrupted {
            operation: operation.into(),
            bytes_transferred,
        }
    }

    /// Bytes moved before the failure, if known.
    pub fn bytes_transferred(&self) -> Option<u64> {
        match self {
            Self::Interrupted {
                bytes_transferred, ..
            } => *bytes_transferred,
            _ => None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Interrupted { .. } => true,
            Self::NotFound(_) => false,
        }
    }
}

/// Errors that can occur while scheduling or executing replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A node adapter operation failed.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// A referenced site or filter no longer exists.
    ///
    /// Treated as "skip this unit of work".
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A persistence collaborator failed to read or write.
    #[error("Persistence error ({operation}): {message}")]
    Persistence { operation: String, message: String },

    /// A site's adapter reported itself unavailable.
    #[error("Site {site} at {url} is currently unavailable")]
    Unavailable { site: String, url: String },

    /// An adapter stopped answering while a job was transferring records.
    ///
    /// Aborts the job; the affected item is recorded as connection-lost.
    #[error("Connection to {system} lost during transfer")]
    ConnectionLost { system: String },

    /// No adapter factory is registered for the site's type.
    #[error("No node adapter factory registered for site type {0}")]
    UnsupportedSiteType(SiteType),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle violation, e.g. starting an already-running replicator.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The replicator is draining or stopped and accepts no more work.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a not-found error for a site.
    pub fn site_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Site",
            id: id.into(),
        }
    }

    /// Create a not-found error for a filter.
    pub fn filter_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Filter",
            id: id.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error means the referenced unit of work is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Adapter(AdapterError::NotFound(_))
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter(e) => e.is_retryable(),
            Self::Unavailable { .. } => true,
            Self::ConnectionLost { .. } => true,
            Self::Persistence { .. } => true,
            Self::NotFound { .. } => false,
            Self::UnsupportedSiteType(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        let err = AdapterError::transport("query", "connection reset");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("query"));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(err.bytes_transferred(), None);
    }

    #[test]
    fn test_interrupted_carries_bytes() {
        let err = AdapterError::interrupted("create_resource", Some(4096));
        assert!(err.is_retryable());
        assert_eq!(err.bytes_transferred(), Some(4096));
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_interrupted_unknown_bytes() {
        let err = AdapterError::interrupted("read_resource", None);
        assert_eq!(err.bytes_transferred(), None);
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_adapter_not_found_not_retryable() {
        let err = AdapterError::NotFound("metacard-1".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_adapter_error_converts() {
        let err: ReplicationError = AdapterError::transport("exists", "timeout").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Adapter error"));
    }

    #[test]
    fn test_not_found_helpers() {
        let err = ReplicationError::site_not_found("site-1");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Site not found: site-1");

        let err = ReplicationError::filter_not_found("filter-1");
        assert_eq!(err.to_string(), "Filter not found: filter-1");

        let err: ReplicationError = AdapterError::NotFound("x".into()).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let err = ReplicationError::Unavailable {
            site: "regional".to_string(),
            url: "https://regional:8993".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("https://regional:8993"));

        let err = ReplicationError::ConnectionLost {
            system: "regional".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_persistence_is_retryable() {
        let err = ReplicationError::persistence("save_item", "disk full");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("save_item"));
    }

    #[test]
    fn test_not_retryable_variants() {
        assert!(!ReplicationError::UnsupportedSiteType(SiteType::Unknown).is_retryable());
        assert!(!ReplicationError::Config("bad period".into()).is_retryable());
        assert!(!ReplicationError::Shutdown.is_retryable());
        assert!(!ReplicationError::Internal("panic".into()).is_retryable());
        let err = ReplicationError::InvalidState {
            expected: "Created".into(),
            actual: "Running".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Running"));
    }
}
