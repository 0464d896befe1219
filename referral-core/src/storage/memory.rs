//! In-memory storage
//!
//! Mainly used for tests and development. All maps live behind a single
//! lock so that claims and batches are atomic with respect to each other.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::{LedgerBatch, LedgerStorage, LedgerWrite, StorageStats};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    BadgeTier, BadgeToken, Earning, EarningCategory, EarningId, Member, MemberId, MemberTier,
    Order, OrderId, Package, PackageId, PoolEntry, PoolEntryId, ProcessingStatus,
    RankSnapshot, RedistributionState, Timestamp, TokenId, Transaction, TransactionId,
};

#[derive(Debug, Default)]
struct LedgerState {
    members: BTreeMap<MemberId, Member>,
    orders: BTreeMap<OrderId, Order>,
    tokens: BTreeMap<TokenId, BadgeToken>,
    snapshots: BTreeMap<MemberId, RankSnapshot>,
    earnings: BTreeMap<EarningId, Earning>,
    pool_entries: BTreeMap<PoolEntryId, PoolEntry>,
    transactions: BTreeMap<TransactionId, Transaction>,
    packages: BTreeMap<PackageId, Package>,
}

impl LedgerState {
    /// Check every precondition of a batch without writing anything
    fn check(&self, writes: &[LedgerWrite]) -> EngineResult<()> {
        // keys already claimed by earlier writes of the same batch
        let mut staged: HashSet<(&'static str, u64)> = HashSet::new();
        let mut stage = |kind: &'static str, id: u64| staged.insert((kind, id));

        for write in writes {
            match write {
                LedgerWrite::InsertEarning(e) => {
                    if self.earnings.contains_key(&e.id) || !stage("earning", e.id.0) {
                        return Err(EngineError::conflict("earning", e.id, "duplicate id"));
                    }
                }
                LedgerWrite::InsertPoolEntry(p) => {
                    if self.pool_entries.contains_key(&p.id) || !stage("pool_entry", p.id.0) {
                        return Err(EngineError::conflict("pool_entry", p.id, "duplicate id"));
                    }
                }
                LedgerWrite::InsertTransaction(t) => {
                    if self.transactions.contains_key(&t.id) || !stage("transaction", t.id.0) {
                        return Err(EngineError::conflict("transaction", t.id, "duplicate id"));
                    }
                }
                LedgerWrite::InsertBadgeToken(t) => {
                    if self.tokens.contains_key(&t.id) || !stage("token", t.id.0) {
                        return Err(EngineError::conflict("badge_token", t.id, "duplicate id"));
                    }
                }
                LedgerWrite::InsertRankSnapshot(s) => {
                    if self.snapshots.contains_key(&s.member_id)
                        || !stage("snapshot", s.member_id.0)
                    {
                        return Err(EngineError::conflict(
                            "rank_snapshot",
                            s.member_id,
                            "snapshot already exists",
                        ));
                    }
                }
                LedgerWrite::ConsumeBadgeToken(id) => {
                    let token = self
                        .tokens
                        .get(id)
                        .ok_or_else(|| EngineError::not_found("badge_token", id))?;
                    if token.consumed || !stage("consume_token", id.0) {
                        return Err(EngineError::conflict("badge_token", id, "already consumed"));
                    }
                }
                LedgerWrite::ConsumeReferralSlot(id) => {
                    let member = self.member(*id)?;
                    if member.referral_consumed || !stage("consume_slot", id.0) {
                        return Err(EngineError::conflict(
                            "member",
                            id,
                            "referral slot already consumed",
                        ));
                    }
                }
                LedgerWrite::ActivatePoolEntry(id) => {
                    let entry = self
                        .pool_entries
                        .get(id)
                        .ok_or_else(|| EngineError::not_found("pool_entry", id))?;
                    if entry.active || !stage("activate_entry", id.0) {
                        return Err(EngineError::conflict("pool_entry", id, "already active"));
                    }
                }
                LedgerWrite::CompleteOrder(id) => {
                    let order = self
                        .orders
                        .get(id)
                        .ok_or_else(|| EngineError::not_found("order", id))?;
                    if order.leadership_status != ProcessingStatus::InProgress
                        || !stage("complete_order", id.0)
                    {
                        return Err(EngineError::conflict("order", id, "order is not claimed"));
                    }
                }
                LedgerWrite::MarkRankSnapshotDone(id) => {
                    if self.member(*id)?.rank_snapshot_done || !stage("snapshot_done", id.0) {
                        return Err(EngineError::conflict(
                            "member",
                            id,
                            "rank snapshot already done",
                        ));
                    }
                }
                LedgerWrite::MarkPromotionRunDone(id) => {
                    if self.member(*id)?.promotion_run_done || !stage("promotion_done", id.0) {
                        return Err(EngineError::conflict("member", id, "promotion already run"));
                    }
                }
                LedgerWrite::CompleteActivation(id) => {
                    if self.member(*id)?.activation_status != ProcessingStatus::InProgress
                        || !stage("activation_done", id.0)
                    {
                        return Err(EngineError::conflict("member", id, "member is not claimed"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a batch whose preconditions have been checked
    fn commit(&mut self, writes: Vec<LedgerWrite>) {
        for write in writes {
            match write {
                LedgerWrite::InsertEarning(e) => {
                    self.earnings.insert(e.id, e);
                }
                LedgerWrite::InsertPoolEntry(p) => {
                    self.pool_entries.insert(p.id, p);
                }
                LedgerWrite::InsertTransaction(t) => {
                    self.transactions.insert(t.id, t);
                }
                LedgerWrite::InsertBadgeToken(t) => {
                    self.tokens.insert(t.id, t);
                }
                LedgerWrite::InsertRankSnapshot(s) => {
                    self.snapshots.insert(s.member_id, s);
                }
                LedgerWrite::ConsumeBadgeToken(id) => {
                    if let Some(token) = self.tokens.get_mut(&id) {
                        token.consumed = true;
                    }
                }
                LedgerWrite::ConsumeReferralSlot(id) => {
                    if let Some(member) = self.members.get_mut(&id) {
                        member.referral_consumed = true;
                    }
                }
                LedgerWrite::ActivatePoolEntry(id) => {
                    if let Some(entry) = self.pool_entries.get_mut(&id) {
                        entry.active = true;
                    }
                }
                LedgerWrite::CompleteOrder(id) => {
                    if let Some(order) = self.orders.get_mut(&id) {
                        order.leadership_status = ProcessingStatus::Done;
                        order.chaque_match_status = ProcessingStatus::Done;
                        order.commission_distributed = true;
                        order.claimed_at = None;
                    }
                }
                LedgerWrite::MarkRankSnapshotDone(id) => {
                    if let Some(member) = self.members.get_mut(&id) {
                        member.rank_snapshot_done = true;
                    }
                }
                LedgerWrite::MarkPromotionRunDone(id) => {
                    if let Some(member) = self.members.get_mut(&id) {
                        member.promotion_run_done = true;
                    }
                }
                LedgerWrite::CompleteActivation(id) => {
                    if let Some(member) = self.members.get_mut(&id) {
                        member.tier = MemberTier::Paid;
                        member.active = true;
                        member.activation_status = ProcessingStatus::Done;
                        member.claimed_at = None;
                    }
                }
            }
        }
    }

    fn member(&self, id: MemberId) -> EngineResult<&Member> {
        self.members
            .get(&id)
            .ok_or_else(|| EngineError::not_found("member", id))
    }
}

/// In-memory ledger storage
#[derive(Debug)]
pub struct MemoryStorage {
    state: RwLock<LedgerState>,
    next_id: AtomicU64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Clear all data
    pub async fn clear(&self) {
        *self.state.write().await = LedgerState::default();
        self.next_id.store(1, Ordering::SeqCst);
    }

    /// Keep generated ids clear of ids written by collaborators
    fn bump_id(&self, id: u64) {
        self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    // ==================== Ids ====================

    async fn next_id(&self) -> EngineResult<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    // ==================== Member ====================

    async fn save_member(&self, member: &Member) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.members.insert(member.id, member.clone());
        Ok(())
    }

    async fn get_member(&self, id: MemberId) -> EngineResult<Option<Member>> {
        let state = self.state.read().await;
        Ok(state.members.get(&id).cloned())
    }

    async fn list_children(&self, parent: MemberId) -> EngineResult<Vec<Member>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .filter(|m| m.parent_id == Some(parent))
            .cloned()
            .collect())
    }

    async fn list_free_members(&self) -> EngineResult<Vec<Member>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .filter(|m| m.tier == MemberTier::Free)
            .cloned()
            .collect())
    }

    async fn claim_member(
        &self,
        id: MemberId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool> {
        let mut state = self.state.write().await;
        let member = state
            .members
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("member", id))?;

        if member.tier != MemberTier::Free
            || !member
                .activation_status
                .is_claimable(member.claimed_at, stale_before)
        {
            return Ok(false);
        }

        member.activation_status = ProcessingStatus::InProgress;
        member.claimed_at = Some(now);
        Ok(true)
    }

    async fn release_member(&self, id: MemberId) -> EngineResult<()> {
        let mut state = self.state.write().await;
        if let Some(member) = state.members.get_mut(&id) {
            if member.activation_status == ProcessingStatus::InProgress {
                member.activation_status = ProcessingStatus::Pending;
                member.claimed_at = None;
            }
        }
        Ok(())
    }

    // ==================== Order ====================

    async fn save_order(&self, order: &Order) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> EngineResult<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn list_distribution_candidates(
        &self,
        stale_before: Timestamp,
    ) -> EngineResult<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.is_distribution_candidate(stale_before))
            .cloned()
            .collect())
    }

    async fn claim_order(
        &self,
        id: OrderId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("order", id))?;

        if !order.is_distribution_candidate(stale_before) {
            return Ok(false);
        }

        order.leadership_status = ProcessingStatus::InProgress;
        order.claimed_at = Some(now);
        Ok(true)
    }

    async fn release_order(&self, id: OrderId) -> EngineResult<()> {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(&id) {
            if order.leadership_status == ProcessingStatus::InProgress {
                order.leadership_status = ProcessingStatus::Pending;
                order.claimed_at = None;
            }
        }
        Ok(())
    }

    // ==================== Badge ====================

    async fn list_unconsumed_tokens(
        &self,
        tier: BadgeTier,
        user: MemberId,
    ) -> EngineResult<Vec<BadgeToken>> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .values()
            .filter(|t| t.tier == tier && t.user_id == user && !t.consumed)
            .cloned()
            .collect())
    }

    async fn list_badge_holders(&self, tier: BadgeTier) -> EngineResult<Vec<MemberId>> {
        let state = self.state.read().await;
        let holders: BTreeSet<MemberId> = state
            .tokens
            .values()
            .filter(|t| t.tier == tier && !t.consumed)
            .map(|t| t.user_id)
            .collect();
        Ok(holders.into_iter().collect())
    }

    async fn list_tokens_for(&self, user: MemberId) -> EngineResult<Vec<BadgeToken>> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .values()
            .filter(|t| t.user_id == user)
            .cloned()
            .collect())
    }

    // ==================== Snapshot ====================

    async fn get_rank_snapshot(&self, member: MemberId) -> EngineResult<Option<RankSnapshot>> {
        let state = self.state.read().await;
        Ok(state.snapshots.get(&member).cloned())
    }

    // ==================== Ledger ====================

    async fn save_earning(&self, earning: &Earning) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.earnings.insert(earning.id, earning.clone());
        self.bump_id(earning.id.0);
        Ok(())
    }

    async fn list_earnings_for(&self, user: MemberId) -> EngineResult<Vec<Earning>> {
        let state = self.state.read().await;
        Ok(state
            .earnings
            .values()
            .filter(|e| e.user_id == user)
            .cloned()
            .collect())
    }

    async fn list_earnings_for_order(&self, order: OrderId) -> EngineResult<Vec<Earning>> {
        let state = self.state.read().await;
        Ok(state
            .earnings
            .values()
            .filter(|e| e.order_id == Some(order))
            .cloned()
            .collect())
    }

    async fn list_pending_redistributions(&self) -> EngineResult<Vec<Earning>> {
        let state = self.state.read().await;
        Ok(state
            .earnings
            .values()
            .filter(|e| {
                e.category == EarningCategory::Redistribution
                    && e.redistribution_state == RedistributionState::Pending
                    && e.is_live()
            })
            .cloned()
            .collect())
    }

    async fn list_inactive_pool_entries(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> EngineResult<Vec<PoolEntry>> {
        let state = self.state.read().await;
        Ok(state
            .pool_entries
            .values()
            .filter(|p| !p.active && p.created_at >= from && p.created_at <= to)
            .cloned()
            .collect())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.transactions.insert(transaction.id, transaction.clone());
        self.bump_id(transaction.id.0);
        Ok(())
    }

    async fn list_transactions_to(&self, member: MemberId) -> EngineResult<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.to_user_id == member)
            .cloned()
            .collect())
    }

    async fn save_package(&self, package: &Package) -> EngineResult<()> {
        let mut state = self.state.write().await;
        state.packages.insert(package.id, package.clone());
        Ok(())
    }

    async fn current_package(&self, day: NaiveDate) -> EngineResult<Option<Package>> {
        let state = self.state.read().await;
        Ok(state
            .packages
            .values()
            .filter(|p| p.is_valid_on(day))
            .max_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    // ==================== Batch ====================

    async fn apply(&self, batch: LedgerBatch) -> EngineResult<()> {
        let mut state = self.state.write().await;
        if let Err(e) = state.check(&batch.writes) {
            debug!(
                batch = %batch.label,
                writes = %batch.summary(),
                error = %e,
                "Ledger batch rejected"
            );
            return Err(e);
        }

        for write in &batch.writes {
            let id = match write {
                LedgerWrite::InsertEarning(e) => e.id.0,
                LedgerWrite::InsertPoolEntry(p) => p.id.0,
                LedgerWrite::InsertTransaction(t) => t.id.0,
                LedgerWrite::InsertBadgeToken(t) => t.id.0,
                LedgerWrite::InsertRankSnapshot(s) => s.id.0,
                _ => continue,
            };
            self.bump_id(id);
        }

        trace!(batch = %batch.label, writes = batch.len(), "Ledger batch applied");
        state.commit(batch.writes);
        Ok(())
    }

    // ==================== Stats ====================

    async fn get_stats(&self) -> EngineResult<StorageStats> {
        let state = self.state.read().await;
        let mut stats = StorageStats {
            total_members: state.members.len() as u64,
            total_orders: state.orders.len() as u64,
            total_earnings: state.earnings.len() as u64,
            total_pool_entries: state.pool_entries.len() as u64,
            total_transactions: state.transactions.len() as u64,
            rank_snapshots: state.snapshots.len() as u64,
            ..Default::default()
        };

        for member in state.members.values() {
            match member.tier {
                MemberTier::Free => stats.free_members += 1,
                MemberTier::Paid => stats.paid_members += 1,
            }
        }
        for order in state.orders.values() {
            if order.commission_distributed {
                stats.distributed_orders += 1;
            } else if !order.leadership_done() {
                stats.pending_orders += 1;
            }
        }
        stats.inactive_pool_entries =
            state.pool_entries.values().filter(|p| !p.active).count() as u64;
        for token in state.tokens.values().filter(|t| !t.consumed) {
            *stats.unconsumed_tokens.entry(token.tier).or_insert(0) += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_member_claim_is_exclusive() {
        let storage = MemoryStorage::new();
        storage.save_member(&Member::new(MemberId(2), Some(MemberId(1)))).await.unwrap();

        let now = Utc::now();
        let stale_before = now - Duration::minutes(30);
        assert!(storage.claim_member(MemberId(2), now, stale_before).await.unwrap());
        assert!(!storage.claim_member(MemberId(2), now, stale_before).await.unwrap());

        storage.release_member(MemberId(2)).await.unwrap();
        assert!(storage.claim_member(MemberId(2), now, stale_before).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_order_claim_is_reclaimable() {
        let storage = MemoryStorage::new();
        storage
            .save_order(&Order::confirmed(OrderId(7), MemberId(3), Decimal::new(100, 0)))
            .await
            .unwrap();

        let long_ago = Utc::now() - Duration::hours(3);
        let stale_before = Utc::now() - Duration::minutes(30);
        assert!(storage.claim_order(OrderId(7), long_ago, stale_before).await.unwrap());
        assert!(storage.claim_order(OrderId(7), Utc::now(), stale_before).await.unwrap());
        assert!(!storage.claim_order(OrderId(7), Utc::now(), stale_before).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_precondition_writes_nothing() {
        let storage = MemoryStorage::new();
        let token = BadgeToken::new(TokenId(10), BadgeTier::ThreeStar, MemberId(1), vec![2, 3]);

        let mut first = LedgerBatch::new("first");
        first.push(LedgerWrite::InsertBadgeToken(token));
        storage.apply(first).await.unwrap();

        let mut second = LedgerBatch::new("second");
        second.push(LedgerWrite::InsertEarning(Earning::credit(
            EarningId(20),
            MemberId(1),
            "x",
            Decimal::new(5, 0),
        )));
        second.push(LedgerWrite::ConsumeBadgeToken(TokenId(10)));
        second.push(LedgerWrite::ConsumeBadgeToken(TokenId(10)));
        assert_eq!(
            second.summary(),
            "insert_earning,consume_badge_token,consume_badge_token"
        );
        assert_eq!(second.earnings().count(), 1);

        let err = storage.apply(second).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(storage.list_earnings_for(MemberId(1)).await.unwrap().is_empty());
        assert!(storage
            .has_unconsumed_token(BadgeTier::ThreeStar, MemberId(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_generated_ids_skip_saved_rows() {
        let storage = MemoryStorage::new();
        let earning = Earning::credit(EarningId(50), MemberId(1), "x", Decimal::ONE);
        storage.save_earning(&earning).await.unwrap();
        assert_eq!(storage.next_id().await.unwrap(), 51);
    }

    #[tokio::test]
    async fn test_badge_holders_are_distinct() {
        let storage = MemoryStorage::new();
        let mut batch = LedgerBatch::new("seed");
        batch.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
            TokenId(1),
            BadgeTier::Mega,
            MemberId(4),
            vec![],
        )));
        batch.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
            TokenId(2),
            BadgeTier::Mega,
            MemberId(4),
            vec![],
        )));
        batch.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
            TokenId(3),
            BadgeTier::Mega,
            MemberId(2),
            vec![],
        )));
        storage.apply(batch).await.unwrap();

        let holders = storage.list_badge_holders(BadgeTier::Mega).await.unwrap();
        assert_eq!(holders, vec![MemberId(2), MemberId(4)]);

        let stats = storage.get_stats().await.unwrap();
        assert_eq!(stats.unconsumed_tokens.get(&BadgeTier::Mega), Some(&3));
    }
}
