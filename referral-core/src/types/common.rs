//! Basic Types
//!
//! Naming conventions:
//! - `_id` suffix: Primary key identifiers
//! - `_at` suffix: UTC timestamps
//! - `_status` suffix: Tri-state processing markers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Member identifier (node of the referral forest)
    MemberId
);
define_id!(
    /// Order identifier
    OrderId
);
define_id!(
    /// Earning ledger row identifier
    EarningId
);
define_id!(
    /// Pool entry identifier
    PoolEntryId
);
define_id!(
    /// Badge token identifier
    TokenId
);
define_id!(
    /// General ledger transaction identifier
    TransactionId
);
define_id!(
    /// Rank snapshot identifier
    SnapshotId
);
define_id!(
    /// Package identifier
    PackageId
);

/// Timestamp type (UTC)
pub type Timestamp = DateTime<Utc>;

/// Money movement direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    /// Sign applied when folding amounts into a balance
    pub fn signum(&self) -> i64 {
        match self {
            Direction::Credit => 1,
            Direction::Debit => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => write!(f, "credit"),
            Direction::Debit => write!(f, "debit"),
        }
    }
}

/// Processing status of a batch candidate
///
/// ```text
/// pending ──claim──→ in_progress ──commit──→ done
///    ↑                    │
///    └──────release───────┘
/// ```
///
/// An in-progress claim older than the configured claim timeout is
/// treated as abandoned and may be claimed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl ProcessingStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, ProcessingStatus::Done)
    }

    /// Whether a candidate in this status may be claimed.
    ///
    /// `claimed_at` is when the current claim was taken; claims taken
    /// before `stale_before` are considered abandoned.
    pub fn is_claimable(&self, claimed_at: Option<Timestamp>, stale_before: Timestamp) -> bool {
        match self {
            ProcessingStatus::Pending => true,
            ProcessingStatus::InProgress => claimed_at.map_or(true, |at| at < stale_before),
            ProcessingStatus::Done => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::InProgress => write!(f, "in_progress"),
            ProcessingStatus::Done => write!(f, "done"),
        }
    }
}
