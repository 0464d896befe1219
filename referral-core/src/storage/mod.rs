//! Ledger Storage
//!
//! Persistence interface for the referral forest and the money ledger.
//!
//! # Design
//!
//! - Ledger rows are append-only; only status flags move, and only forward
//! - Candidates (orders, members) are claimed with an atomic conditional update
//!   before any ledger write is attempted for them
//! - Every candidate's writes go through [`LedgerStorage::apply`] as one
//!   [`LedgerBatch`]: all preconditions are checked and all writes applied
//!   atomically, or nothing is written

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::types::{
    BadgeTier, BadgeToken, Earning, Member, MemberId, Order, OrderId, Package, PoolEntry,
    PoolEntryId, RankSnapshot, Timestamp, TokenId, Transaction,
};

/// A single conditional write inside a [`LedgerBatch`]
///
/// Each variant documents the precondition checked when the batch is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerWrite {
    /// Earning id must be unused
    InsertEarning(Earning),
    /// Pool entry id must be unused
    InsertPoolEntry(PoolEntry),
    /// Transaction id must be unused
    InsertTransaction(Transaction),
    /// Token id must be unused
    InsertBadgeToken(BadgeToken),
    /// No snapshot may exist yet for the member
    InsertRankSnapshot(RankSnapshot),
    /// Token must exist and be unconsumed
    ConsumeBadgeToken(TokenId),
    /// Member's referral slot must be unconsumed
    ConsumeReferralSlot(MemberId),
    /// Pool entry must exist and still be inactive
    ActivatePoolEntry(PoolEntryId),
    /// Order's leadership status must be in progress
    CompleteOrder(OrderId),
    /// Member's rank snapshot flag must be unset
    MarkRankSnapshotDone(MemberId),
    /// Member's promotion flag must be unset
    MarkPromotionRunDone(MemberId),
    /// Member's activation status must be in progress
    CompleteActivation(MemberId),
}

impl LedgerWrite {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerWrite::InsertEarning(_) => "insert_earning",
            LedgerWrite::InsertPoolEntry(_) => "insert_pool_entry",
            LedgerWrite::InsertTransaction(_) => "insert_transaction",
            LedgerWrite::InsertBadgeToken(_) => "insert_badge_token",
            LedgerWrite::InsertRankSnapshot(_) => "insert_rank_snapshot",
            LedgerWrite::ConsumeBadgeToken(_) => "consume_badge_token",
            LedgerWrite::ConsumeReferralSlot(_) => "consume_referral_slot",
            LedgerWrite::ActivatePoolEntry(_) => "activate_pool_entry",
            LedgerWrite::CompleteOrder(_) => "complete_order",
            LedgerWrite::MarkRankSnapshotDone(_) => "mark_rank_snapshot_done",
            LedgerWrite::MarkPromotionRunDone(_) => "mark_promotion_run_done",
            LedgerWrite::CompleteActivation(_) => "complete_activation",
        }
    }
}

/// All-or-nothing unit of ledger writes for one candidate
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    /// What the batch is for, e.g. `order:42`
    pub label: String,
    pub writes: Vec<LedgerWrite>,
}

impl LedgerBatch {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            writes: Vec::new(),
        }
    }

    pub fn push(&mut self, write: LedgerWrite) {
        self.writes.push(write);
    }

    pub fn extend(&mut self, writes: impl IntoIterator<Item = LedgerWrite>) {
        self.writes.extend(writes);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Write kinds in order, e.g. `insert_earning,complete_order`
    pub fn summary(&self) -> String {
        self.writes
            .iter()
            .map(LedgerWrite::kind)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Earnings inserted by this batch
    pub fn earnings(&self) -> impl Iterator<Item = &Earning> {
        self.writes.iter().filter_map(|w| match w {
            LedgerWrite::InsertEarning(e) => Some(e),
            _ => None,
        })
    }
}

/// Ledger storage interface
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    // ==================== Ids ====================

    /// Allocate a fresh id for a ledger row
    async fn next_id(&self) -> EngineResult<u64>;

    // ==================== Member ====================

    /// Save a member (signup / seeding by collaborators)
    async fn save_member(&self, member: &Member) -> EngineResult<()>;

    async fn get_member(&self, id: MemberId) -> EngineResult<Option<Member>>;

    /// Direct referrals of a member, ascending by id
    async fn list_children(&self, parent: MemberId) -> EngineResult<Vec<Member>>;

    /// Free members, ascending by id
    async fn list_free_members(&self) -> EngineResult<Vec<Member>>;

    /// Claim a member for activation; `false` if another run holds a live claim
    async fn claim_member(
        &self,
        id: MemberId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool>;

    /// Return an in-progress activation claim to pending
    async fn release_member(&self, id: MemberId) -> EngineResult<()>;

    // ==================== Order ====================

    async fn save_order(&self, order: &Order) -> EngineResult<()>;

    async fn get_order(&self, id: OrderId) -> EngineResult<Option<Order>>;

    /// Orders eligible for leadership distribution, ascending by id
    async fn list_distribution_candidates(
        &self,
        stale_before: Timestamp,
    ) -> EngineResult<Vec<Order>>;

    /// Claim an order for distribution; `false` if it is no longer claimable
    async fn claim_order(
        &self,
        id: OrderId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool>;

    /// Return an in-progress order claim to pending
    async fn release_order(&self, id: OrderId) -> EngineResult<()>;

    // ==================== Badge ====================

    /// Unconsumed tokens of a tier held by a member, ascending by id
    async fn list_unconsumed_tokens(
        &self,
        tier: BadgeTier,
        user: MemberId,
    ) -> EngineResult<Vec<BadgeToken>>;

    async fn has_unconsumed_token(&self, tier: BadgeTier, user: MemberId) -> EngineResult<bool> {
        Ok(!self.list_unconsumed_tokens(tier, user).await?.is_empty())
    }

    /// Members currently holding an unconsumed token of a tier, ascending by id
    async fn list_badge_holders(&self, tier: BadgeTier) -> EngineResult<Vec<MemberId>>;

    /// All tokens (consumed or not) held by a member
    async fn list_tokens_for(&self, user: MemberId) -> EngineResult<Vec<BadgeToken>>;

    // ==================== Snapshot ====================

    async fn get_rank_snapshot(&self, member: MemberId) -> EngineResult<Option<RankSnapshot>>;

    // ==================== Ledger ====================

    /// Save an earning written by a collaborator (e.g. wallet withdrawals)
    async fn save_earning(&self, earning: &Earning) -> EngineResult<()>;

    async fn list_earnings_for(&self, user: MemberId) -> EngineResult<Vec<Earning>>;

    async fn list_earnings_for_order(&self, order: OrderId) -> EngineResult<Vec<Earning>>;

    /// Live redistribution-category earnings still pending, ascending by id
    async fn list_pending_redistributions(&self) -> EngineResult<Vec<Earning>>;

    /// Inactive pool entries created within `[from, to]`, ascending by id
    async fn list_inactive_pool_entries(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> EngineResult<Vec<PoolEntry>>;

    /// Save a transaction written by a collaborator (top-ups, payments)
    async fn save_transaction(&self, transaction: &Transaction) -> EngineResult<()>;

    /// Transactions addressed to a member
    async fn list_transactions_to(&self, member: MemberId) -> EngineResult<Vec<Transaction>>;

    async fn save_package(&self, package: &Package) -> EngineResult<()>;

    /// Most recently created package valid on `day`
    async fn current_package(&self, day: NaiveDate) -> EngineResult<Option<Package>>;

    // ==================== Batch ====================

    /// Apply a batch atomically: every precondition holds and every write lands, or nothing does
    async fn apply(&self, batch: LedgerBatch) -> EngineResult<()>;

    // ==================== Stats ====================

    async fn get_stats(&self) -> EngineResult<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub total_members: u64,
    pub free_members: u64,
    pub paid_members: u64,
    pub total_orders: u64,
    pub pending_orders: u64,
    pub distributed_orders: u64,
    pub total_earnings: u64,
    pub total_pool_entries: u64,
    pub inactive_pool_entries: u64,
    pub total_transactions: u64,
    pub rank_snapshots: u64,
    /// Unconsumed tokens per tier
    pub unconsumed_tokens: BTreeMap<BadgeTier, u64>,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: String,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Flush to disk after every applied batch
    pub flush_on_apply: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./referral_data".to_string(),
            cache_size: 64 * 1024 * 1024, // 64MB
            flush_on_apply: true,
        }
    }
}

impl StorageConfig {
    /// Development configuration
    pub fn development() -> Self {
        Self {
            data_dir: "./referral_dev_data".to_string(),
            cache_size: 16 * 1024 * 1024, // 16MB
            flush_on_apply: false,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

pub use self::sled::SledStorage;
pub use memory::MemoryStorage;
