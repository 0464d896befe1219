//! Referral forest nodes and rank snapshots

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::badge::BadgeTier;
use super::common::*;

/// Membership tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberTier {
    #[default]
    Free,
    Paid,
}

impl fmt::Display for MemberTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberTier::Free => write!(f, "free"),
            MemberTier::Paid => write!(f, "paid"),
        }
    }
}

/// Member - node of the referral forest
///
/// `parent_id` is a plain id reference; the forest is walked by
/// looking ids up in storage, never through owned links.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Referrer, `None` for forest roots
    pub parent_id: Option<MemberId>,
    pub tier: MemberTier,
    pub active: bool,
    /// Set once this member's referral slot has been consumed into a 3★ token of its parent
    pub referral_consumed: bool,
    /// Rank snapshot and activation accounting written
    pub rank_snapshot_done: bool,
    /// Promotion cascade run for this member's upline
    pub promotion_run_done: bool,
    /// Activation claim state
    pub activation_status: ProcessingStatus,
    /// When the current activation claim was taken
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Member {
    /// Create a free, inactive member as written at signup
    pub fn new(id: MemberId, parent_id: Option<MemberId>) -> Self {
        Self {
            id,
            parent_id,
            tier: MemberTier::Free,
            active: false,
            referral_consumed: false,
            rank_snapshot_done: false,
            promotion_run_done: false,
            activation_status: ProcessingStatus::Pending,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Create an already activated member (used when seeding existing organisations)
    pub fn paid(id: MemberId, parent_id: Option<MemberId>) -> Self {
        Self {
            tier: MemberTier::Paid,
            active: true,
            rank_snapshot_done: true,
            promotion_run_done: true,
            activation_status: ProcessingStatus::Done,
            ..Self::new(id, parent_id)
        }
    }

    pub fn is_paid(&self) -> bool {
        self.tier == MemberTier::Paid
    }

    /// Paid and active, i.e. eligible to receive promotions
    pub fn is_eligible(&self) -> bool {
        self.is_paid() && self.active
    }
}

/// Rank snapshot - the member's nearest badge-holding ancestors at activation time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankSnapshot {
    pub id: SnapshotId,
    pub member_id: MemberId,
    pub referrer_id: Option<MemberId>,
    pub tier3_ancestor: Option<MemberId>,
    pub tier5_ancestor: Option<MemberId>,
    pub tier7_ancestor: Option<MemberId>,
    pub mega_ancestor: Option<MemberId>,
    pub giga_ancestor: Option<MemberId>,
    pub created_at: Timestamp,
}

impl RankSnapshot {
    /// Ancestor recorded for a badge tier
    pub fn ancestor_for(&self, tier: BadgeTier) -> Option<MemberId> {
        match tier {
            BadgeTier::ThreeStar => self.tier3_ancestor,
            BadgeTier::FiveStar => self.tier5_ancestor,
            BadgeTier::SevenStar => self.tier7_ancestor,
            BadgeTier::Mega => self.mega_ancestor,
            BadgeTier::Giga => self.giga_ancestor,
        }
    }

    pub fn set_ancestor(&mut self, tier: BadgeTier, ancestor: Option<MemberId>) {
        match tier {
            BadgeTier::ThreeStar => self.tier3_ancestor = ancestor,
            BadgeTier::FiveStar => self.tier5_ancestor = ancestor,
            BadgeTier::SevenStar => self.tier7_ancestor = ancestor,
            BadgeTier::Mega => self.mega_ancestor = ancestor,
            BadgeTier::Giga => self.giga_ancestor = ancestor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_member_is_free() {
        let m = Member::new(MemberId(5), Some(MemberId(1)));
        assert!(!m.is_paid());
        assert!(!m.is_eligible());
        assert_eq!(m.activation_status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_snapshot_tier_accessors() {
        let mut snapshot = RankSnapshot {
            id: SnapshotId(1),
            member_id: MemberId(9),
            referrer_id: Some(MemberId(8)),
            tier3_ancestor: None,
            tier5_ancestor: None,
            tier7_ancestor: None,
            mega_ancestor: None,
            giga_ancestor: None,
            created_at: Utc::now(),
        };
        snapshot.set_ancestor(BadgeTier::Mega, Some(MemberId(2)));
        assert_eq!(snapshot.ancestor_for(BadgeTier::Mega), Some(MemberId(2)));
        assert_eq!(snapshot.ancestor_for(BadgeTier::Giga), None);
    }
}
