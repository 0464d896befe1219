//! Rank snapshots
//!
//! A member's nearest badge-holding ancestor per tier, computed once (at
//! activation, or lazily by the first order that needs it) and immutable
//! afterwards.

use chrono::Utc;

use crate::error::{EngineError, EngineResult};
use crate::storage::LedgerStorage;
use crate::types::{BadgeTier, MemberId, RankSnapshot, SnapshotId};
use crate::upline::{UplinePredicate, UplineResolver};

/// Whether a snapshot was loaded or freshly computed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Already persisted
    Stored(RankSnapshot),
    /// Computed now; the caller persists it inside its own batch
    Computed(RankSnapshot),
}

impl SnapshotSource {
    pub fn snapshot(&self) -> &RankSnapshot {
        match self {
            SnapshotSource::Stored(s) | SnapshotSource::Computed(s) => s,
        }
    }

    pub fn into_snapshot(self) -> RankSnapshot {
        match self {
            SnapshotSource::Stored(s) | SnapshotSource::Computed(s) => s,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, SnapshotSource::Computed(_))
    }
}

/// Compute a fresh snapshot by walking the upline once per tier
pub async fn compute_rank_snapshot<S: LedgerStorage + ?Sized>(
    storage: &S,
    member_id: MemberId,
    iteration_cap: usize,
) -> EngineResult<RankSnapshot> {
    let member = storage
        .get_member(member_id)
        .await?
        .ok_or_else(|| EngineError::not_found("member", member_id))?;

    let resolver = UplineResolver::new(storage, iteration_cap);
    let mut snapshot = RankSnapshot {
        id: SnapshotId(storage.next_id().await?),
        member_id,
        referrer_id: member.parent_id,
        tier3_ancestor: None,
        tier5_ancestor: None,
        tier7_ancestor: None,
        mega_ancestor: None,
        giga_ancestor: None,
        created_at: Utc::now(),
    };

    for tier in BadgeTier::all() {
        let ancestor = resolver
            .find_ancestor(member_id, UplinePredicate::HoldsBadge(tier), usize::MAX)
            .await?;
        snapshot.set_ancestor(tier, ancestor.map(|m| m.id));
    }

    Ok(snapshot)
}

/// Load the member's snapshot, computing one if none is stored yet
pub async fn load_or_compute<S: LedgerStorage + ?Sized>(
    storage: &S,
    member_id: MemberId,
    iteration_cap: usize,
) -> EngineResult<SnapshotSource> {
    match storage.get_rank_snapshot(member_id).await? {
        Some(snapshot) => Ok(SnapshotSource::Stored(snapshot)),
        None => Ok(SnapshotSource::Computed(
            compute_rank_snapshot(storage, member_id, iteration_cap).await?,
        )),
    }
}
