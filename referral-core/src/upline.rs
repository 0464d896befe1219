//! Upline Resolver
//!
//! Walks `parent_id` references upward through the referral forest. Every
//! walk is a bounded loop over id lookups; the iteration cap turns a cycle
//! in corrupted data into an error instead of an endless walk.

use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::storage::LedgerStorage;
use crate::types::{BadgeTier, Member, MemberId};

/// Predicate tested against each ancestor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UplinePredicate {
    /// Ancestor is a paid member
    IsPaid,
    /// Ancestor is paid and active
    IsEligible,
    /// Ancestor holds an unconsumed badge token of the tier
    HoldsBadge(BadgeTier),
}

/// Ancestor found by a lookup with house-account fallback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UplineMatch {
    /// Nearest ancestor matching the search predicate
    pub candidate: Member,
    /// Whether the candidate also met the requirement
    pub qualified: bool,
    /// The candidate when qualified, the house account otherwise
    pub recipient: MemberId,
}

/// Upline resolver over a ledger storage
pub struct UplineResolver<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    iteration_cap: usize,
    house_account: Option<MemberId>,
}

impl<'a, S: LedgerStorage + ?Sized> UplineResolver<'a, S> {
    pub fn new(storage: &'a S, iteration_cap: usize) -> Self {
        Self {
            storage,
            iteration_cap,
            house_account: None,
        }
    }

    /// Resolver using the engine's iteration cap and house account
    pub fn from_config(storage: &'a S, config: &EngineConfig) -> Self {
        Self::new(storage, config.upline_iteration_cap).with_house_account(config.house_account)
    }

    pub fn with_house_account(mut self, house: MemberId) -> Self {
        self.house_account = Some(house);
        self
    }

    /// Nearest ancestor of `start` matching `predicate`, at most `max_depth` hops up.
    ///
    /// The walk begins at `start`'s parent. `None` when the chain ends or the
    /// depth is exhausted without a match.
    pub async fn find_ancestor(
        &self,
        start: MemberId,
        predicate: UplinePredicate,
        max_depth: usize,
    ) -> EngineResult<Option<Member>> {
        let mut current = match self.storage.get_member(start).await? {
            Some(member) => member,
            None => return Ok(None),
        };

        let mut hops = 0usize;
        while hops < max_depth {
            let Some(parent) = self.parent_of(&current, start, hops).await? else {
                return Ok(None);
            };
            hops += 1;
            if self.matches(&parent, predicate).await? {
                return Ok(Some(parent));
            }
            current = parent;
        }
        Ok(None)
    }

    /// Nearest ancestor matching `search`, paid out only if it also meets `require`.
    ///
    /// A candidate failing `require` is replaced by the house account as
    /// recipient. `None` when no candidate exists at all.
    pub async fn find_ancestor_or_house(
        &self,
        start: MemberId,
        search: UplinePredicate,
        require: UplinePredicate,
        max_depth: usize,
    ) -> EngineResult<Option<UplineMatch>> {
        let house = self.house_account.ok_or_else(|| {
            EngineError::InvalidConfig("upline fallback needs a house account".to_string())
        })?;
        let Some(candidate) = self.find_ancestor(start, search, max_depth).await? else {
            return Ok(None);
        };

        let qualified = self.matches(&candidate, require).await?;
        let recipient = if qualified { candidate.id } else { house };
        Ok(Some(UplineMatch {
            candidate,
            qualified,
            recipient,
        }))
    }

    /// Ancestor chain of `start`, nearest first, at most `max_depth` entries
    pub async fn chain(&self, start: MemberId, max_depth: usize) -> EngineResult<Vec<Member>> {
        let mut chain = Vec::new();
        let mut current = match self.storage.get_member(start).await? {
            Some(member) => member,
            None => return Ok(chain),
        };

        while chain.len() < max_depth {
            let Some(parent) = self.parent_of(&current, start, chain.len()).await? else {
                break;
            };
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain)
    }

    /// Every ancestor of `start` up to and including `root`, nearest first.
    ///
    /// Without a designated root the walk runs until a parentless member.
    pub async fn walk_to_root(
        &self,
        start: MemberId,
        root: Option<MemberId>,
    ) -> EngineResult<Vec<Member>> {
        let mut chain = Vec::new();
        if Some(start) == root {
            return Ok(chain);
        }
        let mut current = match self.storage.get_member(start).await? {
            Some(member) => member,
            None => return Ok(chain),
        };

        loop {
            let Some(parent) = self.parent_of(&current, start, chain.len()).await? else {
                break;
            };
            let reached_root = Some(parent.id) == root;
            chain.push(parent.clone());
            if reached_root {
                break;
            }
            current = parent;
        }
        Ok(chain)
    }

    /// Load the parent of `member`, enforcing the iteration cap
    async fn parent_of(
        &self,
        member: &Member,
        start: MemberId,
        hops: usize,
    ) -> EngineResult<Option<Member>> {
        let Some(parent_id) = member.parent_id else {
            return Ok(None);
        };
        if hops >= self.iteration_cap {
            return Err(EngineError::UplineCapExceeded {
                start: start.to_string(),
                cap: self.iteration_cap,
            });
        }

        let parent = self.storage.get_member(parent_id).await?;
        if parent.is_none() {
            warn!(
                member = %member.id,
                parent = %parent_id,
                "Parent member missing, upline ends here"
            );
        }
        Ok(parent)
    }

    async fn matches(&self, member: &Member, predicate: UplinePredicate) -> EngineResult<bool> {
        Ok(match predicate {
            UplinePredicate::IsPaid => member.is_paid(),
            UplinePredicate::IsEligible => member.is_eligible(),
            UplinePredicate::HoldsBadge(tier) => {
                self.storage.has_unconsumed_token(tier, member.id).await?
            }
        })
    }
}
