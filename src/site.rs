//! Sites: the systems that act as replication sources or destinations.
//!
//! A site's [`SiteType`] selects the adapter protocol used to reach it and
//! its [`SiteKind`] governs the direction of transfer (see
//! [`TransferPlan`](crate::replicator::TransferPlan)). Both tags are
//! forward-compatible: any unrecognized tag deserializes to `Unknown`, and the
//! core skips work that involves an unknown tag instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter protocol family of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteType {
    /// Query-capable catalog that supports pulling and pushing.
    Ddf,
    /// Ingest-only endpoint; records can only be pushed to it.
    Ion,
    /// Not yet discovered, or a tag this build does not recognize.
    #[default]
    #[serde(other)]
    Unknown,
}

impl SiteType {
    /// Whether sites of this type have to be polled for changes.
    pub fn must_be_polled(&self) -> bool {
        match self {
            Self::Ddf => true,
            Self::Ion => false,
            Self::Unknown => false,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ddf => write!(f, "DDF"),
            Self::Ion => write!(f, "ION"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Deployment kind of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteKind {
    /// Edge deployment, replicated in both directions.
    Tactical,
    /// Aggregating deployment, only pulled from.
    Regional,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SiteKind {
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tactical => write!(f, "TACTICAL"),
            Self::Regional => write!(f, "REGIONAL"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A replication site.
///
/// Owned by the external site manager. The core only writes back a
/// discovered [`SiteType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    /// Base URL handed to the adapter factory.
    pub url: String,
    #[serde(rename = "type", default)]
    pub site_type: SiteType,
    #[serde(default)]
    pub kind: SiteKind,
    /// When set, another process owns replication for filters touching this site.
    #[serde(default)]
    pub remote_managed: bool,
}

impl Site {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        site_type: SiteType,
        kind: SiteKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            site_type,
            kind,
            remote_managed: false,
        }
    }

    pub fn with_remote_managed(mut self, remote_managed: bool) -> Self {
        self.remote_managed = remote_managed;
        self
    }

    /// A site the scheduler may run filters for.
    ///
    /// Both tags must be known and the site must not be managed elsewhere.
    pub fn is_schedulable(&self) -> bool {
        self.site_type.is_known() && self.kind.is_known() && !self.remote_managed
    }
}
