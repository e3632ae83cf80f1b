//! Per-record replication outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a sync request or of one item transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    PushInProgress,
    PullInProgress,
    Success,
    Failure,
    Canceled,
    /// An adapter became unavailable mid-transfer.
    ConnectionLost,
    /// Retries are exhausted; skipped until the source record changes.
    PermanentFailure,
}

impl Status {
    /// A failure that the next run should retry.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::ConnectionLost)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failure | Self::ConnectionLost | Self::PermanentFailure | Self::Canceled
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::PushInProgress => "PUSH_IN_PROGRESS",
            Self::PullInProgress => "PULL_IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Canceled => "CANCELED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::PermanentFailure => "PERMANENT_FAILURE",
        };
        f.write_str(s)
    }
}

/// What a job did, or tried to do, with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Durable outcome record for one metadata id under one filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationItem {
    pub metadata_id: String,
    pub config_id: String,
    /// Source system name.
    pub source: String,
    /// Destination system name.
    pub destination: String,
    pub action: Action,
    pub status: Status,
    pub resource_size: u64,
    pub metadata_size: u64,
    pub resource_modified: Option<DateTime<Utc>>,
    pub metadata_modified: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub done_time: DateTime<Utc>,
    /// Failed retries since the last success.
    pub failure_count: u32,
    pub bytes_transferred: u64,
}

impl ReplicationItem {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_failures() {
        assert!(Status::Failure.is_retryable_failure());
        assert!(Status::ConnectionLost.is_retryable_failure());
        assert!(!Status::PermanentFailure.is_retryable_failure());
        assert!(!Status::Success.is_retryable_failure());
        assert!(Status::PermanentFailure.is_failure());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&Status::ConnectionLost).unwrap();
        assert_eq!(json, "\"CONNECTION_LOST\"");
        assert_eq!(Status::PushInProgress.to_string(), "PUSH_IN_PROGRESS");
    }
}
