//! Site-pair transfer policy.
//!
//! The remote site of a filter decides which directions run:
//!
//! | Site type | Site kind | Plan |
//! |-----------|-----------|------|
//! | DDF | TACTICAL | push local→remote, then pull remote→local |
//! | DDF | REGIONAL | pull remote→local |
//! | ION | TACTICAL / REGIONAL | push local→remote |
//! | UNKNOWN | any | skip |
//! | any | UNKNOWN | skip |
//!
//! Remote-managed sites are skipped too; another process replicates them.

use crate::item::Status;
use crate::site::{Site, SiteKind, SiteType};
use std::fmt;

/// Direction of one job relative to the local site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// local → remote
    Push,
    /// remote → local
    Pull,
}

impl Direction {
    /// Request status while a job in this direction runs.
    pub fn status(&self) -> Status {
        match self {
            Self::Push => Status::PushInProgress,
            Self::Pull => Status::PullInProgress,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which jobs to run for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    Bidirectional,
    Pull,
    Push,
    Skip(&'static str),
}

impl TransferPlan {
    /// Plan for a filter whose remote end is `remote`.
    pub fn for_site(remote: &Site) -> Self {
        if remote.remote_managed {
            return Self::Skip("remote managed site");
        }
        match (remote.site_type, remote.kind) {
            (SiteType::Unknown, _) => Self::Skip("unknown site type"),
            (_, SiteKind::Unknown) => Self::Skip("unknown site kind"),
            (SiteType::Ddf, SiteKind::Tactical) => Self::Bidirectional,
            (SiteType::Ddf, SiteKind::Regional) => Self::Pull,
            (SiteType::Ion, _) => Self::Push,
        }
    }

    /// Jobs to run, in order.
    pub fn directions(&self) -> &'static [Direction] {
        match self {
            Self::Bidirectional => &[Direction::Push, Direction::Pull],
            Self::Pull => &[Direction::Pull],
            Self::Push => &[Direction::Push],
            Self::Skip(_) => &[],
        }
    }
}
