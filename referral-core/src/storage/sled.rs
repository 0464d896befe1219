//! Sled persistent storage
//!
//! One tree per entity, keyed by big-endian ids so that iteration is
//! ascending. Batches run as a single multi-tree sled transaction.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::Transactional;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, trace};

use super::{LedgerBatch, LedgerStorage, LedgerWrite, StorageConfig, StorageStats};
use crate::error::{EngineError, EngineResult};
use crate::types::{
    BadgeTier, BadgeToken, Earning, EarningCategory, Member, MemberId, MemberTier, Order,
    OrderId, Package, PoolEntry, ProcessingStatus, RankSnapshot, RedistributionState,
    Timestamp, Transaction,
};

/// Tree names
const MEMBERS_TREE: &str = "members";
const ORDERS_TREE: &str = "orders";
const TOKENS_TREE: &str = "badge_tokens";
const SNAPSHOTS_TREE: &str = "rank_snapshots";
const EARNINGS_TREE: &str = "earnings";
const POOL_ENTRIES_TREE: &str = "pool_entries";
const TRANSACTIONS_TREE: &str = "transactions";
const PACKAGES_TREE: &str = "packages";
const META_TREE: &str = "meta";

const NEXT_ID_KEY: &[u8] = b"next_id";

type TxResult<T> = Result<T, ConflictableTransactionError<EngineError>>;

/// Sled persistent storage
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
    members: sled::Tree,
    orders: sled::Tree,
    tokens: sled::Tree,
    snapshots: sled::Tree,
    earnings: sled::Tree,
    pool_entries: sled::Tree,
    transactions: sled::Tree,
    packages: sled::Tree,
    meta: sled::Tree,
    flush_on_apply: bool,
}

impl SledStorage {
    /// Create from a storage configuration
    pub fn new(config: &StorageConfig) -> EngineResult<Self> {
        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_size)
            .open()
            .map_err(|e| EngineError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db, config.flush_on_apply)
    }

    /// Open or create a database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let db = sled::open(path)
            .map_err(|e| EngineError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db, true)
    }

    fn from_db(db: sled::Db, flush_on_apply: bool) -> EngineResult<Self> {
        let tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| EngineError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };

        Ok(Self {
            members: tree(MEMBERS_TREE)?,
            orders: tree(ORDERS_TREE)?,
            tokens: tree(TOKENS_TREE)?,
            snapshots: tree(SNAPSHOTS_TREE)?,
            earnings: tree(EARNINGS_TREE)?,
            pool_entries: tree(POOL_ENTRIES_TREE)?,
            transactions: tree(TRANSACTIONS_TREE)?,
            packages: tree(PACKAGES_TREE)?,
            meta: tree(META_TREE)?,
            flush_on_apply,
            db,
        })
    }

    /// Flush to disk
    pub fn flush(&self) -> EngineResult<()> {
        self.db
            .flush()
            .map_err(|e| EngineError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    // ==================== Helpers ====================

    fn serialize<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
        serde_json::from_slice(bytes).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, id: u64) -> EngineResult<Option<T>> {
        match tree.get(Self::key(id))? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(tree: &sled::Tree, id: u64, value: &T) -> EngineResult<()> {
        tree.insert(Self::key(id), Self::serialize(value)?)?;
        Ok(())
    }

    /// Scan a tree in key order, keeping values that match `filter`
    fn scan<T, F>(tree: &sled::Tree, filter: F) -> EngineResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let mut result = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item?;
            let value: T = Self::deserialize(&bytes)?;
            if filter(&value) {
                result.push(value);
            }
        }
        Ok(result)
    }

    fn bump_id(&self, id: u64) -> EngineResult<()> {
        self.meta.fetch_and_update(NEXT_ID_KEY, |old| {
            let current = old.map(decode_counter).unwrap_or(1);
            Some(current.max(id.saturating_add(1)).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn map_tx_error(err: TransactionError<EngineError>) -> EngineError {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => EngineError::Storage(e.to_string()),
        }
    }
}

fn decode_counter(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    if bytes.len() == 8 {
        buf.copy_from_slice(bytes);
    }
    u64::from_be_bytes(buf)
}

// ==================== Transactional helpers ====================

fn abort<T>(err: EngineError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn tx_get<T: DeserializeOwned>(tree: &TransactionalTree, id: u64) -> TxResult<Option<T>> {
    match tree.get(&id.to_be_bytes()[..])? {
        Some(bytes) => SledStorage::deserialize(&bytes)
            .map(Some)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

fn tx_put<T: Serialize>(tree: &TransactionalTree, id: u64, value: &T) -> TxResult<()> {
    let bytes = SledStorage::serialize(value).map_err(ConflictableTransactionError::Abort)?;
    tree.insert(&id.to_be_bytes()[..], bytes)?;
    Ok(())
}

/// Insert a row whose id must not exist yet
fn tx_insert_new<T: Serialize>(
    tree: &TransactionalTree,
    entity: &str,
    id: u64,
    value: &T,
) -> TxResult<()> {
    if tree.get(&id.to_be_bytes()[..])?.is_some() {
        return abort(EngineError::conflict(entity, id, "duplicate id"));
    }
    tx_put(tree, id, value)
}

/// Load a row that must exist
fn tx_load<T: DeserializeOwned>(tree: &TransactionalTree, entity: &str, id: u64) -> TxResult<T> {
    match tx_get(tree, id)? {
        Some(value) => Ok(value),
        None => abort(EngineError::not_found(entity, id)),
    }
}

#[async_trait]
impl LedgerStorage for SledStorage {
    // ==================== Ids ====================

    async fn next_id(&self) -> EngineResult<u64> {
        let previous = self.meta.fetch_and_update(NEXT_ID_KEY, |old| {
            let current = old.map(decode_counter).unwrap_or(1);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        Ok(previous.map(|v| decode_counter(&v)).unwrap_or(1))
    }

    // ==================== Member ====================

    async fn save_member(&self, member: &Member) -> EngineResult<()> {
        Self::put(&self.members, member.id.0, member)
    }

    async fn get_member(&self, id: MemberId) -> EngineResult<Option<Member>> {
        Self::get(&self.members, id.0)
    }

    async fn list_children(&self, parent: MemberId) -> EngineResult<Vec<Member>> {
        Self::scan(&self.members, |m: &Member| m.parent_id == Some(parent))
    }

    async fn list_free_members(&self) -> EngineResult<Vec<Member>> {
        Self::scan(&self.members, |m: &Member| m.tier == MemberTier::Free)
    }

    async fn claim_member(
        &self,
        id: MemberId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool> {
        self.members
            .transaction(|tx| {
                let mut member: Member = tx_load(tx, "member", id.0)?;
                if member.tier != MemberTier::Free
                    || !member
                        .activation_status
                        .is_claimable(member.claimed_at, stale_before)
                {
                    return Ok(false);
                }
                member.activation_status = ProcessingStatus::InProgress;
                member.claimed_at = Some(now);
                tx_put(tx, id.0, &member)?;
                Ok(true)
            })
            .map_err(Self::map_tx_error)
    }

    async fn release_member(&self, id: MemberId) -> EngineResult<()> {
        self.members
            .transaction(|tx| {
                if let Some(mut member) = tx_get::<Member>(tx, id.0)? {
                    if member.activation_status == ProcessingStatus::InProgress {
                        member.activation_status = ProcessingStatus::Pending;
                        member.claimed_at = None;
                        tx_put(tx, id.0, &member)?;
                    }
                }
                Ok(())
            })
            .map_err(Self::map_tx_error)
    }

    // ==================== Order ====================

    async fn save_order(&self, order: &Order) -> EngineResult<()> {
        Self::put(&self.orders, order.id.0, order)
    }

    async fn get_order(&self, id: OrderId) -> EngineResult<Option<Order>> {
        Self::get(&self.orders, id.0)
    }

    async fn list_distribution_candidates(
        &self,
        stale_before: Timestamp,
    ) -> EngineResult<Vec<Order>> {
        Self::scan(&self.orders, |o: &Order| o.is_distribution_candidate(stale_before))
    }

    async fn claim_order(
        &self,
        id: OrderId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool> {
        self.orders
            .transaction(|tx| {
                let mut order: Order = tx_load(tx, "order", id.0)?;
                if !order.is_distribution_candidate(stale_before) {
                    return Ok(false);
                }
                order.leadership_status = ProcessingStatus::InProgress;
                order.claimed_at = Some(now);
                tx_put(tx, id.0, &order)?;
                Ok(true)
            })
            .map_err(Self::map_tx_error)
    }

    async fn release_order(&self, id: OrderId) -> EngineResult<()> {
        self.orders
            .transaction(|tx| {
                if let Some(mut order) = tx_get::<Order>(tx, id.0)? {
                    if order.leadership_status == ProcessingStatus::InProgress {
                        order.leadership_status = ProcessingStatus::Pending;
                        order.claimed_at = None;
                        tx_put(tx, id.0, &order)?;
                    }
                }
                Ok(())
            })
            .map_err(Self::map_tx_error)
    }

    // ==================== Badge ====================

    async fn list_unconsumed_tokens(
        &self,
        tier: BadgeTier,
        user: MemberId,
    ) -> EngineResult<Vec<BadgeToken>> {
        Self::scan(&self.tokens, |t: &BadgeToken| {
            t.tier == tier && t.user_id == user && !t.consumed
        })
    }

    async fn list_badge_holders(&self, tier: BadgeTier) -> EngineResult<Vec<MemberId>> {
        let tokens = Self::scan(&self.tokens, |t: &BadgeToken| t.tier == tier && !t.consumed)?;
        let holders: BTreeSet<MemberId> = tokens.into_iter().map(|t| t.user_id).collect();
        Ok(holders.into_iter().collect())
    }

    async fn list_tokens_for(&self, user: MemberId) -> EngineResult<Vec<BadgeToken>> {
        Self::scan(&self.tokens, |t: &BadgeToken| t.user_id == user)
    }

    // ==================== Snapshot ====================

    async fn get_rank_snapshot(&self, member: MemberId) -> EngineResult<Option<RankSnapshot>> {
        Self::get(&self.snapshots, member.0)
    }

    // ==================== Ledger ====================

    async fn save_earning(&self, earning: &Earning) -> EngineResult<()> {
        Self::put(&self.earnings, earning.id.0, earning)?;
        self.bump_id(earning.id.0)
    }

    async fn list_earnings_for(&self, user: MemberId) -> EngineResult<Vec<Earning>> {
        Self::scan(&self.earnings, |e: &Earning| e.user_id == user)
    }

    async fn list_earnings_for_order(&self, order: OrderId) -> EngineResult<Vec<Earning>> {
        Self::scan(&self.earnings, |e: &Earning| e.order_id == Some(order))
    }

    async fn list_pending_redistributions(&self) -> EngineResult<Vec<Earning>> {
        Self::scan(&self.earnings, |e: &Earning| {
            e.category == EarningCategory::Redistribution
                && e.redistribution_state == RedistributionState::Pending
                && e.is_live()
        })
    }

    async fn list_inactive_pool_entries(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> EngineResult<Vec<PoolEntry>> {
        Self::scan(&self.pool_entries, |p: &PoolEntry| {
            !p.active && p.created_at >= from && p.created_at <= to
        })
    }

    async fn save_transaction(&self, transaction: &Transaction) -> EngineResult<()> {
        Self::put(&self.transactions, transaction.id.0, transaction)?;
        self.bump_id(transaction.id.0)
    }

    async fn list_transactions_to(&self, member: MemberId) -> EngineResult<Vec<Transaction>> {
        Self::scan(&self.transactions, |t: &Transaction| t.to_user_id == member)
    }

    async fn save_package(&self, package: &Package) -> EngineResult<()> {
        Self::put(&self.packages, package.id.0, package)
    }

    async fn current_package(&self, day: NaiveDate) -> EngineResult<Option<Package>> {
        let packages = Self::scan(&self.packages, |p: &Package| p.is_valid_on(day))?;
        Ok(packages.into_iter().max_by_key(|p| (p.created_at, p.id)))
    }

    // ==================== Batch ====================

    async fn apply(&self, batch: LedgerBatch) -> EngineResult<()> {
        let trees = (
            &self.members,
            &self.orders,
            &self.tokens,
            &self.snapshots,
            &self.earnings,
            &self.pool_entries,
            &self.transactions,
        );

        // Reads inside the transaction observe its own writes, so a second
        // consume of the same row within one batch fails its precondition.
        trees
            .transaction(
                |(members, orders, tokens, snapshots, earnings, pool_entries, transactions)| {
                    for write in &batch.writes {
                        match write {
                            LedgerWrite::InsertEarning(e) => {
                                tx_insert_new(earnings, "earning", e.id.0, e)?;
                            }
                            LedgerWrite::InsertPoolEntry(p) => {
                                tx_insert_new(pool_entries, "pool_entry", p.id.0, p)?;
                            }
                            LedgerWrite::InsertTransaction(t) => {
                                tx_insert_new(transactions, "transaction", t.id.0, t)?;
                            }
                            LedgerWrite::InsertBadgeToken(t) => {
                                tx_insert_new(tokens, "badge_token", t.id.0, t)?;
                            }
                            LedgerWrite::InsertRankSnapshot(s) => {
                                if snapshots.get(&s.member_id.0.to_be_bytes()[..])?.is_some() {
                                    return abort(EngineError::conflict(
                                        "rank_snapshot",
                                        s.member_id,
                                        "snapshot already exists",
                                    ));
                                }
                                tx_put(snapshots, s.member_id.0, s)?;
                            }
                            LedgerWrite::ConsumeBadgeToken(id) => {
                                let mut token: BadgeToken = tx_load(tokens, "badge_token", id.0)?;
                                if token.consumed {
                                    return abort(EngineError::conflict(
                                        "badge_token",
                                        id,
                                        "already consumed",
                                    ));
                                }
                                token.consumed = true;
                                tx_put(tokens, id.0, &token)?;
                            }
                            LedgerWrite::ConsumeReferralSlot(id) => {
                                let mut member: Member = tx_load(members, "member", id.0)?;
                                if member.referral_consumed {
                                    return abort(EngineError::conflict(
                                        "member",
                                        id,
                                        "referral slot already consumed",
                                    ));
                                }
                                member.referral_consumed = true;
                                tx_put(members, id.0, &member)?;
                            }
                            LedgerWrite::ActivatePoolEntry(id) => {
                                let mut entry: PoolEntry =
                                    tx_load(pool_entries, "pool_entry", id.0)?;
                                if entry.active {
                                    return abort(EngineError::conflict(
                                        "pool_entry",
                                        id,
                                        "already active",
                                    ));
                                }
                                entry.active = true;
                                tx_put(pool_entries, id.0, &entry)?;
                            }
                            LedgerWrite::CompleteOrder(id) => {
                                let mut order: Order = tx_load(orders, "order", id.0)?;
                                if order.leadership_status != ProcessingStatus::InProgress {
                                    return abort(EngineError::conflict(
                                        "order",
                                        id,
                                        "order is not claimed",
                                    ));
                                }
                                order.leadership_status = ProcessingStatus::Done;
                                order.chaque_match_status = ProcessingStatus::Done;
                                order.commission_distributed = true;
                                order.claimed_at = None;
                                tx_put(orders, id.0, &order)?;
                            }
                            LedgerWrite::MarkRankSnapshotDone(id) => {
                                let mut member: Member = tx_load(members, "member", id.0)?;
                                if member.rank_snapshot_done {
                                    return abort(EngineError::conflict(
                                        "member",
                                        id,
                                        "rank snapshot already done",
                                    ));
                                }
                                member.rank_snapshot_done = true;
                                tx_put(members, id.0, &member)?;
                            }
                            LedgerWrite::MarkPromotionRunDone(id) => {
                                let mut member: Member = tx_load(members, "member", id.0)?;
                                if member.promotion_run_done {
                                    return abort(EngineError::conflict(
                                        "member",
                                        id,
                                        "promotion already run",
                                    ));
                                }
                                member.promotion_run_done = true;
                                tx_put(members, id.0, &member)?;
                            }
                            LedgerWrite::CompleteActivation(id) => {
                                let mut member: Member = tx_load(members, "member", id.0)?;
                                if member.activation_status != ProcessingStatus::InProgress {
                                    return abort(EngineError::conflict(
                                        "member",
                                        id,
                                        "member is not claimed",
                                    ));
                                }
                                member.tier = MemberTier::Paid;
                                member.active = true;
                                member.activation_status = ProcessingStatus::Done;
                                member.claimed_at = None;
                                tx_put(members, id.0, &member)?;
                            }
                        }
                    }
                    Ok(())
                },
            )
            .map_err(|e| {
                let err = Self::map_tx_error(e);
                debug!(
                    batch = %batch.label,
                    writes = %batch.summary(),
                    error = %err,
                    "Ledger batch rejected"
                );
                err
            })?;
        trace!(batch = %batch.label, writes = batch.len(), "Ledger batch applied");

        for write in &batch.writes {
            match write {
                LedgerWrite::InsertEarning(e) => self.bump_id(e.id.0)?,
                LedgerWrite::InsertPoolEntry(p) => self.bump_id(p.id.0)?,
                LedgerWrite::InsertTransaction(t) => self.bump_id(t.id.0)?,
                LedgerWrite::InsertBadgeToken(t) => self.bump_id(t.id.0)?,
                LedgerWrite::InsertRankSnapshot(s) => self.bump_id(s.id.0)?,
                _ => {}
            }
        }

        if self.flush_on_apply {
            self.db.flush_async().await?;
        }
        Ok(())
    }

    // ==================== Stats ====================

    async fn get_stats(&self) -> EngineResult<StorageStats> {
        let mut stats = StorageStats {
            total_earnings: self.earnings.len() as u64,
            total_transactions: self.transactions.len() as u64,
            rank_snapshots: self.snapshots.len() as u64,
            ..Default::default()
        };

        for member in Self::scan(&self.members, |_: &Member| true)? {
            stats.total_members += 1;
            match member.tier {
                MemberTier::Free => stats.free_members += 1,
                MemberTier::Paid => stats.paid_members += 1,
            }
        }
        for order in Self::scan(&self.orders, |_: &Order| true)? {
            stats.total_orders += 1;
            if order.commission_distributed {
                stats.distributed_orders += 1;
            } else if !order.leadership_done() {
                stats.pending_orders += 1;
            }
        }
        for entry in Self::scan(&self.pool_entries, |_: &PoolEntry| true)? {
            stats.total_pool_entries += 1;
            if !entry.active {
                stats.inactive_pool_entries += 1;
            }
        }
        for token in Self::scan(&self.tokens, |t: &BadgeToken| !t.consumed)? {
            *stats.unconsumed_tokens.entry(token.tier).or_insert(0) += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EarningId, TokenId};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sled_member_roundtrip_and_children() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();

        storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
        storage.save_member(&Member::new(MemberId(2), Some(MemberId(1)))).await.unwrap();
        storage.save_member(&Member::new(MemberId(3), Some(MemberId(1)))).await.unwrap();

        let children = storage.list_children(MemberId(1)).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, MemberId(2));

        let free = storage.list_free_members().await.unwrap();
        assert_eq!(free.iter().map(|m| m.id).collect::<Vec<_>>(), vec![MemberId(2), MemberId(3)]);
    }

    #[tokio::test]
    async fn test_sled_claim_is_exclusive() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();
        storage
            .save_order(&Order::confirmed(OrderId(1), MemberId(2), Decimal::new(100, 0)))
            .await
            .unwrap();

        let now = Utc::now();
        let stale_before = now - Duration::minutes(30);
        assert!(storage.claim_order(OrderId(1), now, stale_before).await.unwrap());
        assert!(!storage.claim_order(OrderId(1), now, stale_before).await.unwrap());
        assert!(storage.list_distribution_candidates(stale_before).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sled_batch_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();

        let mut seed = LedgerBatch::new("seed");
        seed.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
            TokenId(5),
            BadgeTier::ThreeStar,
            MemberId(1),
            vec![2, 3],
        )));
        storage.apply(seed).await.unwrap();

        let mut batch = LedgerBatch::new("double consume");
        batch.push(LedgerWrite::InsertEarning(Earning::credit(
            EarningId(9),
            MemberId(1),
            "x",
            Decimal::new(3, 0),
        )));
        batch.push(LedgerWrite::ConsumeBadgeToken(TokenId(5)));
        batch.push(LedgerWrite::ConsumeBadgeToken(TokenId(5)));

        let err = storage.apply(batch).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(storage.list_earnings_for(MemberId(1)).await.unwrap().is_empty());
        assert_eq!(
            storage
                .list_unconsumed_tokens(BadgeTier::ThreeStar, MemberId(1))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_sled_ids_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let first = {
            let storage = SledStorage::open(dir.path()).unwrap();
            let id = storage.next_id().await.unwrap();
            storage.flush().unwrap();
            id
        };

        let storage = SledStorage::open(dir.path()).unwrap();
        let second = storage.next_id().await.unwrap();
        assert!(second > first);
    }
}
