//! Badge Promotion Cascade
//!
//! For every paid and active ancestor of a newly eligible member, consume
//! source tokens in fixed batches (oldest first) and mint at most one token
//! per tier, bottom-up:
//!
//! ```text
//! referral slots ─2→ 3★ ─5→ 5★ ─7→ 7★ ─10→ Mega ─10→ Giga
//! ```
//!
//! A token minted at one tier counts as a source for the next tier within the
//! same pass. Leftover sources stay unconsumed for the next run.

use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::storage::{LedgerBatch, LedgerStorage, LedgerWrite};
use crate::types::{BadgeTier, BadgeToken, Member, MemberId, TokenId};
use crate::upline::UplineResolver;

/// A source that can be consumed toward a mint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    /// Unconsumed referral slot of a direct child
    Slot(MemberId),
    /// Stored unconsumed token of the tier below
    Stored(TokenId),
    /// Token minted earlier in the same pass (index into the mint list)
    Fresh(usize),
}

impl Source {
    fn payload_id(&self, minted: &[BadgeToken]) -> u64 {
        match self {
            Source::Slot(id) => id.0,
            Source::Stored(id) => id.0,
            Source::Fresh(idx) => minted[*idx].id.0,
        }
    }
}

/// Outcome of the cascade for one ancestor
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AncestorPromotion {
    pub ancestor: MemberId,
    /// Tokens minted (consumed ones included)
    pub minted: Vec<BadgeToken>,
}

/// Outcome of one cascade run
#[derive(Clone, Debug, Default)]
pub struct CascadeOutcome {
    pub ancestors_visited: usize,
    pub ancestors_skipped: usize,
    pub promotions: Vec<AncestorPromotion>,
    /// Ancestors whose promotion failed, with the error message
    pub failures: Vec<(MemberId, String)>,
}

impl CascadeOutcome {
    /// Tokens minted per tier
    pub fn minted_by_tier(&self) -> BTreeMap<BadgeTier, u64> {
        let mut counts = BTreeMap::new();
        for token in self.promotions.iter().flat_map(|p| p.minted.iter()) {
            *counts.entry(token.tier).or_insert(0) += 1;
        }
        counts
    }

    pub fn total_minted(&self) -> usize {
        self.promotions.iter().map(|p| p.minted.len()).sum()
    }
}

/// Badge promotion cascade
pub struct PromotionCascade<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: LedgerStorage + ?Sized> PromotionCascade<'a, S> {
    pub fn new(storage: &'a S, config: &'a EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Run the cascade over the whole upline of `member`.
    ///
    /// `member`'s own referral slot counts for its referrer even before the
    /// member is flipped to paid. A failing ancestor is recorded and the walk
    /// continues; only fatal storage errors end the run.
    pub async fn run(&self, member: &Member) -> EngineResult<CascadeOutcome> {
        let resolver = UplineResolver::from_config(self.storage, self.config);
        let upline = resolver
            .walk_to_root(member.id, self.config.root_member)
            .await?;

        let mut outcome = CascadeOutcome::default();
        for ancestor in upline {
            if !ancestor.is_eligible() {
                debug!(
                    member = %member.id,
                    ancestor = %ancestor.id,
                    "Skipping ineligible ancestor"
                );
                outcome.ancestors_skipped += 1;
                continue;
            }
            outcome.ancestors_visited += 1;

            match self.promote_ancestor(&ancestor, Some(member.id)).await {
                Ok(promotion) => {
                    if !promotion.minted.is_empty() {
                        info!(
                            member = %member.id,
                            ancestor = %ancestor.id,
                            minted = promotion.minted.len(),
                            "Ancestor promoted"
                        );
                        outcome.promotions.push(promotion);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(
                        member = %member.id,
                        ancestor = %ancestor.id,
                        error = %e,
                        "Promotion failed for ancestor, continuing"
                    );
                    outcome.failures.push((ancestor.id, e.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// Evaluate every tier for one ancestor and write the mints as one batch
    pub async fn promote_ancestor(
        &self,
        ancestor: &Member,
        activating: Option<MemberId>,
    ) -> EngineResult<AncestorPromotion> {
        let slots: Vec<MemberId> = self
            .storage
            .list_children(ancestor.id)
            .await?
            .into_iter()
            .filter(|child| {
                !child.referral_consumed && (child.is_paid() || Some(child.id) == activating)
            })
            .map(|child| child.id)
            .collect();

        let mut batch = LedgerBatch::new(format!("promotion:{}", ancestor.id));
        let mut minted: Vec<BadgeToken> = Vec::new();
        let mut fresh: Option<usize> = None;

        for tier in BadgeTier::all() {
            let mut sources: Vec<Source> = match tier.source() {
                None => slots.iter().copied().map(Source::Slot).collect(),
                Some(source_tier) => self
                    .storage
                    .list_unconsumed_tokens(source_tier, ancestor.id)
                    .await?
                    .into_iter()
                    .map(|t| Source::Stored(t.id))
                    .collect(),
            };
            // freshly minted ids are newer than anything stored
            if let Some(idx) = fresh.take() {
                sources.push(Source::Fresh(idx));
            }

            let size = tier.batch_size();
            if sources.len() < size {
                continue;
            }

            let chosen = &sources[..size];
            let payload: Vec<u64> = chosen.iter().map(|s| s.payload_id(&minted)).collect();
            for source in chosen {
                match *source {
                    Source::Slot(id) => batch.push(LedgerWrite::ConsumeReferralSlot(id)),
                    Source::Stored(id) => batch.push(LedgerWrite::ConsumeBadgeToken(id)),
                    Source::Fresh(idx) => minted[idx].consumed = true,
                }
            }

            let id = TokenId(self.storage.next_id().await?);
            debug!(ancestor = %ancestor.id, tier = %tier, token = %id, "Minting badge token");
            minted.push(BadgeToken::new(id, tier, ancestor.id, payload));
            fresh = Some(minted.len() - 1);
        }

        if !minted.is_empty() {
            batch.extend(minted.iter().cloned().map(LedgerWrite::InsertBadgeToken));
            self.storage.apply(batch).await?;
        }

        Ok(AncestorPromotion {
            ancestor: ancestor.id,
            minted,
        })
    }
}
