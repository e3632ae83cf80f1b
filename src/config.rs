//! Configuration for the replication core.
//!
//! Configuration is passed to [`Replicator::new()`](crate::replicator::Replicator::new)
//! and [`ReplicatorRunner::new()`](crate::runner::ReplicatorRunner::new). It can be
//! built programmatically or deserialized from YAML/JSON by the embedding process.
//!
//! # Quick Start
//!
//! ```rust
//! use catalog_replication::config::ReplicatorSettings;
//!
//! let settings = ReplicatorSettings {
//!     local_site_id: "site-local".into(),
//!     ..Default::default()
//! };
//! assert_eq!(settings.runner.period().as_secs(), 300);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorSettings
//! ├── local_site_id: String           # Site this process runs on
//! ├── runner: RunnerConfig            # Scheduling period, site subset
//! ├── dispatcher: DispatcherConfig    # Drain-on-shutdown backoff
//! └── query: QueryConfig              # Pagination of source queries
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_site_id: "site-local"
//! runner:
//!   period: "5m"
//!   sites: []            # empty = all known sites
//! dispatcher:
//!   drain_timeout: "30s"
//! query:
//!   page_size: 100
//! ```

use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings shared by the replicator and its runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorSettings {
    /// Id of the site record describing this process's own catalog.
    /// Used to tell the remote end of a filter from the local one.
    pub local_site_id: String,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            local_site_id: "local".to_string(),
            runner: RunnerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl ReplicatorSettings {
    /// Settings with short timers for tests.
    pub fn for_testing(local_site_id: &str) -> Self {
        Self {
            local_site_id: local_site_id.to_string(),
            runner: RunnerConfig {
                period: "50ms".to_string(),
                sites: Vec::new(),
            },
            dispatcher: DispatcherConfig {
                drain_timeout: "2s".to_string(),
                drain_initial_delay: "5ms".to_string(),
                drain_max_delay: "50ms".to_string(),
                drain_backoff_factor: 2.0,
            },
            query: QueryConfig::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RunnerConfig: periodic scheduling
// ═══════════════════════════════════════════════════════════════════════════════

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Time between scheduling cycles as a duration string (e.g. "5m").
    #[serde(default = "default_period")]
    pub period: String,

    /// Site ids to schedule. Empty means every known site.
    #[serde(default)]
    pub sites: Vec<String>,
}

fn default_period() -> String {
    "5m".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            sites: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Parse the period. Unparsable or zero values fall back to 5 minutes.
    pub fn period(&self) -> Duration {
        match humantime::parse_duration(&self.period) {
            Ok(d) if !d.is_zero() => d,
            _ => Duration::from_secs(300),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DispatcherConfig: drain on shutdown
// ═══════════════════════════════════════════════════════════════════════════════

/// Dispatcher shutdown configuration.
///
/// `clean_up` polls the queues with exponential backoff between
/// `drain_initial_delay` and `drain_max_delay`, giving up after
/// `drain_timeout` and force-stopping the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,

    #[serde(default = "default_drain_initial_delay")]
    pub drain_initial_delay: String,

    #[serde(default = "default_drain_max_delay")]
    pub drain_max_delay: String,

    #[serde(default = "default_drain_backoff_factor")]
    pub drain_backoff_factor: f64,
}

fn default_drain_timeout() -> String {
    "30s".to_string()
}

fn default_drain_initial_delay() -> String {
    "100ms".to_string()
}

fn default_drain_max_delay() -> String {
    "5s".to_string()
}

fn default_drain_backoff_factor() -> f64 {
    2.0
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
            drain_initial_delay: default_drain_initial_delay(),
            drain_max_delay: default_drain_max_delay(),
            drain_backoff_factor: default_drain_backoff_factor(),
        }
    }
}

impl DispatcherConfig {
    pub fn drain_timeout(&self) -> Duration {
        humantime::parse_duration(&self.drain_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Backoff schedule used while draining.
    pub fn drain_retry(&self) -> RetryConfig {
        let factor = if self.drain_backoff_factor >= 1.0 {
            self.drain_backoff_factor
        } else {
            1.0
        };
        RetryConfig {
            initial_delay: humantime::parse_duration(&self.drain_initial_delay)
                .unwrap_or(Duration::from_millis(100)),
            max_delay: humantime::parse_duration(&self.drain_max_delay)
                .unwrap_or(Duration::from_secs(5)),
            backoff_factor: factor,
            max_duration: self.drain_timeout(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QueryConfig: source query pagination
// ═══════════════════════════════════════════════════════════════════════════════

/// Pagination of the queries a job issues against its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_start_index")]
    pub start_index: usize,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Cap on records examined per job. `None` means unbounded; `Some(0)` examines nothing.
    #[serde(default)]
    pub max_results: Option<usize>,
}

fn default_start_index() -> usize {
    crate::query::DEFAULT_START_INDEX
}

fn default_page_size() -> usize {
    crate::query::DEFAULT_PAGE_SIZE
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            start_index: default_start_index(),
            page_size: default_page_size(),
            max_results: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
