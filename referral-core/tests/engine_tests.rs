//! Integration tests for the referral engine
//!
//! Whole job runs against in-memory and sled storage.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use referral_core::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

// ============ Fixtures ============

/// Paid chain 1 <- 2 <- ... <- n
async fn paid_chain(storage: &MemoryStorage, n: u64) {
    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    for id in 2..=n {
        storage
            .save_member(&Member::paid(MemberId(id), Some(MemberId(id - 1))))
            .await
            .unwrap();
    }
}

async fn grant<S: LedgerStorage>(storage: &S, id: u64, tier: BadgeTier, member: u64) {
    let mut batch = LedgerBatch::new("grant");
    batch.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
        TokenId(id),
        tier,
        MemberId(member),
        vec![],
    )));
    storage.apply(batch).await.unwrap();
}

async fn package<S: LedgerStorage>(storage: &S, price: i64) {
    storage
        .save_package(&Package {
            id: PackageId(1),
            amount: Decimal::new(price, 0),
            valid_from: None,
            valid_until: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn top_up<S: LedgerStorage>(storage: &S, id: u64, member: u64, amount: i64) {
    storage
        .save_transaction(&Transaction::new(
            TransactionId(id),
            MemberId(member),
            Decimal::new(amount, 0),
            Direction::Credit,
            "top-up",
        ))
        .await
        .unwrap();
}

fn engine<S: LedgerStorage>(storage: Arc<S>, config: EngineConfig) -> ReferralEngine<S> {
    ReferralEngine::new(storage, config).unwrap()
}

// ============ Leadership ============

/// Chain of 20 with one holder per tier right above the buyer (member 20)
async fn leadership_forest() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    paid_chain(&storage, 20).await;
    grant(storage.as_ref(), 1001, BadgeTier::ThreeStar, 18).await;
    grant(storage.as_ref(), 1002, BadgeTier::FiveStar, 17).await;
    grant(storage.as_ref(), 1003, BadgeTier::SevenStar, 16).await;
    grant(storage.as_ref(), 1004, BadgeTier::Mega, 15).await;
    grant(storage.as_ref(), 1005, BadgeTier::Giga, 14).await;
    storage
        .save_order(&Order::confirmed(OrderId(1), MemberId(20), Decimal::new(100, 0)))
        .await
        .unwrap();
    storage
}

#[tokio::test]
async fn test_full_order_reconciles_to_commission() {
    let storage = leadership_forest().await;
    let config = EngineConfig::default().with_residue_destination(ResidueDestination::HouseAccount);
    let engine = engine(storage.clone(), config);

    let report = engine.run_leadership().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.amount("pool"), Decimal::new(20, 0));
    assert_eq!(report.amount("unallocated"), Decimal::ZERO);

    let earnings = storage.list_earnings_for_order(OrderId(1)).await.unwrap();
    let paid: Decimal = earnings.iter().map(|e| e.amount).sum();
    assert_eq!(paid + report.amount("pool"), Decimal::new(100, 0));

    let snapshot = engine.rank_snapshot(MemberId(20)).await.unwrap().unwrap();
    assert_eq!(snapshot.referrer_id, Some(MemberId(19)));
    assert_eq!(snapshot.tier3_ancestor, Some(MemberId(18)));
    assert_eq!(snapshot.giga_ancestor, Some(MemberId(14)));
}

#[tokio::test]
async fn test_chaque_match_sums_to_trigger() {
    let storage = leadership_forest().await;
    let engine = engine(storage.clone(), EngineConfig::default());
    engine.run_leadership().await.unwrap();

    let earnings = storage.list_earnings_for_order(OrderId(1)).await.unwrap();
    let mut by_trigger: HashMap<EarningId, (usize, Decimal)> = HashMap::new();
    for e in &earnings {
        if let Some(trigger) = e.trigger_earning_id {
            let entry = by_trigger.entry(trigger).or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += e.amount;
        }
    }

    // 3★, 5★ and 7★ payouts each expand to seven levels
    assert_eq!(by_trigger.len(), 3);
    for (trigger_id, (levels, total)) in by_trigger {
        let trigger = earnings.iter().find(|e| e.id == trigger_id).unwrap();
        assert!(trigger.name.starts_with("leadership_"));
        assert_eq!(levels, CHAQUE_LEVELS);
        assert_eq!(total, trigger.amount);
    }
}

#[tokio::test]
async fn test_partial_slots_leave_residue_unwritten() {
    let storage = Arc::new(MemoryStorage::new());
    paid_chain(&storage, 3).await;
    storage
        .save_order(&Order::confirmed(OrderId(1), MemberId(3), Decimal::new(200, 0)))
        .await
        .unwrap();

    let engine = engine(storage.clone(), EngineConfig::default());
    let report = engine.run_leadership().await.unwrap();

    let earnings = storage.list_earnings_for_order(OrderId(1)).await.unwrap();
    let paid: Decimal = earnings.iter().map(|e| e.amount).sum();
    assert!(paid + report.amount("pool") < Decimal::new(200, 0));
    assert_eq!(report.amount("pool"), Decimal::new(40, 0));
}

#[tokio::test]
async fn test_rerun_skips_completed_order() {
    let storage = leadership_forest().await;
    let engine = engine(storage.clone(), EngineConfig::default());

    engine.run_leadership().await.unwrap();
    let before = storage.list_earnings_for_order(OrderId(1)).await.unwrap().len();

    let second = engine.run_leadership().await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(storage.list_earnings_for_order(OrderId(1)).await.unwrap().len(), before);

    let order = storage.get_order(OrderId(1)).await.unwrap().unwrap();
    assert!(order.leadership_done() && order.chaque_match_done());
}

#[tokio::test]
async fn test_orders_processed_oldest_first() {
    let storage = Arc::new(MemoryStorage::new());
    paid_chain(&storage, 3).await;
    for id in [30u64, 10, 20] {
        storage
            .save_order(&Order::confirmed(OrderId(id), MemberId(3), Decimal::new(10, 0)))
            .await
            .unwrap();
    }

    let report = engine(storage, EngineConfig::default()).run_leadership().await.unwrap();
    let ids: Vec<u64> = report.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![10, 20, 30]);
}

// ============ Activation & Promotion ============

#[tokio::test]
async fn test_activation_mints_three_star_and_leaves_third_slot_pending() {
    let storage = Arc::new(MemoryStorage::new());
    package(storage.as_ref(), 500).await;
    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    storage.save_member(&Member::paid(MemberId(2), Some(MemberId(1)))).await.unwrap();
    storage.save_member(&Member::new(MemberId(3), Some(MemberId(1)))).await.unwrap();
    top_up(storage.as_ref(), 9001, 3, 500).await;

    let engine = engine(storage.clone(), EngineConfig::default());
    let report = engine.run_activation().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.count("minted.three_star"), 1);

    let tokens = storage.list_unconsumed_tokens(BadgeTier::ThreeStar, MemberId(1)).await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].payload, vec![2, 3]);

    // a third referral activates later and waits for a partner
    storage.save_member(&Member::new(MemberId(4), Some(MemberId(1)))).await.unwrap();
    top_up(storage.as_ref(), 9101, 4, 600).await;
    let report = engine.run_activation().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.count("minted.three_star"), 0);

    let fourth = storage.get_member(MemberId(4)).await.unwrap().unwrap();
    assert!(fourth.is_eligible());
    assert!(!fourth.referral_consumed);
    assert_eq!(engine.badge_holders(BadgeTier::ThreeStar).await.unwrap(), vec![MemberId(1)]);
}

#[tokio::test]
async fn test_activation_is_exactly_once() {
    let storage = Arc::new(MemoryStorage::new());
    package(storage.as_ref(), 100).await;
    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    storage.save_member(&Member::new(MemberId(2), Some(MemberId(1)))).await.unwrap();
    top_up(storage.as_ref(), 9001, 2, 1_000).await;

    let engine = engine(storage.clone(), EngineConfig::default());
    engine.run_activation().await.unwrap();
    let second = engine.run_activation().await.unwrap();

    assert_eq!(second.candidates, 0);
    // top-up plus one offsetting pair
    assert_eq!(storage.list_transactions_to(MemberId(2)).await.unwrap().len(), 3);
    assert_eq!(engine.member_balance(MemberId(2)).await.unwrap(), Decimal::new(1_000, 0));
}

#[tokio::test]
async fn test_negative_balance_counts_as_zero() {
    let storage = Arc::new(MemoryStorage::new());
    package(storage.as_ref(), 0).await;
    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    storage.save_member(&Member::new(MemberId(2), Some(MemberId(1)))).await.unwrap();
    storage
        .save_transaction(&Transaction::new(
            TransactionId(9001),
            MemberId(2),
            Decimal::new(50, 0),
            Direction::Debit,
            "bill",
        ))
        .await
        .unwrap();

    // zero covers a free package even though the raw balance is negative
    let report = engine(storage, EngineConfig::default()).run_activation().await.unwrap();
    assert_eq!(report.processed, 1);
}

#[tokio::test]
async fn test_activation_reuses_lazily_computed_snapshot() {
    let storage = Arc::new(MemoryStorage::new());
    package(storage.as_ref(), 100).await;
    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    storage.save_member(&Member::new(MemberId(2), Some(MemberId(1)))).await.unwrap();
    top_up(storage.as_ref(), 9001, 2, 100).await;
    storage
        .save_order(&Order::confirmed(OrderId(1), MemberId(2), Decimal::new(10, 0)))
        .await
        .unwrap();

    let engine = engine(storage.clone(), EngineConfig::default());
    engine.run_leadership().await.unwrap();
    assert!(engine.rank_snapshot(MemberId(2)).await.unwrap().is_some());

    let report = engine.run_activation().await.unwrap();
    assert_eq!(report.processed, 1);
    assert!(storage.get_member(MemberId(2)).await.unwrap().unwrap().rank_snapshot_done);
}

// ============ Promotion failure isolation ============

/// Storage that fails child listing for one member
struct FailingChildren {
    inner: MemoryStorage,
    broken: MemberId,
}

#[async_trait]
impl LedgerStorage for FailingChildren {
    async fn next_id(&self) -> EngineResult<u64> {
        self.inner.next_id().await
    }
    async fn save_member(&self, member: &Member) -> EngineResult<()> {
        self.inner.save_member(member).await
    }
    async fn get_member(&self, id: MemberId) -> EngineResult<Option<Member>> {
        self.inner.get_member(id).await
    }
    async fn list_children(&self, parent: MemberId) -> EngineResult<Vec<Member>> {
        if parent == self.broken {
            return Err(EngineError::invalid_state("corrupted referral list"));
        }
        self.inner.list_children(parent).await
    }
    async fn list_free_members(&self) -> EngineResult<Vec<Member>> {
        self.inner.list_free_members().await
    }
    async fn claim_member(
        &self,
        id: MemberId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool> {
        self.inner.claim_member(id, now, stale_before).await
    }
    async fn release_member(&self, id: MemberId) -> EngineResult<()> {
        self.inner.release_member(id).await
    }
    async fn save_order(&self, order: &Order) -> EngineResult<()> {
        self.inner.save_order(order).await
    }
    async fn get_order(&self, id: OrderId) -> EngineResult<Option<Order>> {
        self.inner.get_order(id).await
    }
    async fn list_distribution_candidates(
        &self,
        stale_before: Timestamp,
    ) -> EngineResult<Vec<Order>> {
        self.inner.list_distribution_candidates(stale_before).await
    }
    async fn claim_order(
        &self,
        id: OrderId,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> EngineResult<bool> {
        self.inner.claim_order(id, now, stale_before).await
    }
    async fn release_order(&self, id: OrderId) -> EngineResult<()> {
        self.inner.release_order(id).await
    }
    async fn list_unconsumed_tokens(
        &self,
        tier: BadgeTier,
        user: MemberId,
    ) -> EngineResult<Vec<BadgeToken>> {
        self.inner.list_unconsumed_tokens(tier, user).await
    }
    async fn list_badge_holders(&self, tier: BadgeTier) -> EngineResult<Vec<MemberId>> {
        self.inner.list_badge_holders(tier).await
    }
    async fn list_tokens_for(&self, user: MemberId) -> EngineResult<Vec<BadgeToken>> {
        self.inner.list_tokens_for(user).await
    }
    async fn get_rank_snapshot(&self, member: MemberId) -> EngineResult<Option<RankSnapshot>> {
        self.inner.get_rank_snapshot(member).await
    }
    async fn save_earning(&self, earning: &Earning) -> EngineResult<()> {
        self.inner.save_earning(earning).await
    }
    async fn list_earnings_for(&self, user: MemberId) -> EngineResult<Vec<Earning>> {
        self.inner.list_earnings_for(user).await
    }
    async fn list_earnings_for_order(&self, order: OrderId) -> EngineResult<Vec<Earning>> {
        self.inner.list_earnings_for_order(order).await
    }
    async fn list_pending_redistributions(&self) -> EngineResult<Vec<Earning>> {
        self.inner.list_pending_redistributions().await
    }
    async fn list_inactive_pool_entries(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> EngineResult<Vec<PoolEntry>> {
        self.inner.list_inactive_pool_entries(from, to).await
    }
    async fn save_transaction(&self, transaction: &Transaction) -> EngineResult<()> {
        self.inner.save_transaction(transaction).await
    }
    async fn list_transactions_to(&self, member: MemberId) -> EngineResult<Vec<Transaction>> {
        self.inner.list_transactions_to(member).await
    }
    async fn save_package(&self, package: &Package) -> EngineResult<()> {
        self.inner.save_package(package).await
    }
    async fn current_package(&self, day: NaiveDate) -> EngineResult<Option<Package>> {
        self.inner.current_package(day).await
    }
    async fn apply(&self, batch: LedgerBatch) -> EngineResult<()> {
        self.inner.apply(batch).await
    }
    async fn get_stats(&self) -> EngineResult<StorageStats> {
        self.inner.get_stats().await
    }
}

#[tokio::test]
async fn test_failed_ancestor_does_not_block_upline() {
    // 1 <- 2 <- 3 <- 4 (activating); 2's children cannot be listed
    let storage = Arc::new(FailingChildren {
        inner: MemoryStorage::new(),
        broken: MemberId(2),
    });
    package(storage.as_ref(), 10).await;
    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    storage.save_member(&Member::paid(MemberId(2), Some(MemberId(1)))).await.unwrap();
    storage.save_member(&Member::paid(MemberId(3), Some(MemberId(2)))).await.unwrap();
    storage.save_member(&Member::new(MemberId(4), Some(MemberId(3)))).await.unwrap();
    storage.save_member(&Member::paid(MemberId(5), Some(MemberId(3)))).await.unwrap();
    for id in 2001..=2005 {
        grant(storage.as_ref(), id, BadgeTier::ThreeStar, 1).await;
    }
    top_up(storage.as_ref(), 9001, 4, 10).await;

    let engine = engine(storage.clone(), EngineConfig::default());
    let report = engine.run_activation().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.count("promotion.failed_ancestors"), 1);
    // 3 (below the failure) and 1 (above it) were both promoted
    assert_eq!(report.count("minted.three_star"), 1);
    assert_eq!(report.count("minted.five_star"), 1);
    assert_eq!(engine.badge_holders(BadgeTier::FiveStar).await.unwrap(), vec![MemberId(1)]);

    let member = storage.get_member(MemberId(4)).await.unwrap().unwrap();
    assert!(member.promotion_run_done && member.is_eligible());
}

// ============ Global Pool ============

async fn pool_entry<S: LedgerStorage>(storage: &S, id: u64, amount: i64, at: Timestamp) {
    let mut batch = LedgerBatch::new("entry");
    batch.push(LedgerWrite::InsertPoolEntry(PoolEntry {
        id: PoolEntryId(id),
        user_id: MemberId(9),
        order_id: OrderId(id),
        trigger_user_id: MemberId(9),
        amount: Decimal::new(amount, 0),
        active: false,
        consumed: false,
        created_at: at,
    }));
    storage.apply(batch).await.unwrap();
}

#[tokio::test]
async fn test_pool_thousand_split_and_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let now = Utc.with_ymd_and_hms(2026, 7, 15, 9, 0, 0).unwrap();
    pool_entry(storage.as_ref(), 1, 600, Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()).await;
    pool_entry(storage.as_ref(), 2, 400, Utc.with_ymd_and_hms(2026, 7, 14, 0, 0, 0).unwrap()).await;

    grant(storage.as_ref(), 3001, BadgeTier::SevenStar, 10).await;
    grant(storage.as_ref(), 3002, BadgeTier::SevenStar, 11).await;
    // the same member holding two tokens is one holder
    grant(storage.as_ref(), 3003, BadgeTier::SevenStar, 11).await;
    grant(storage.as_ref(), 3004, BadgeTier::Mega, 12).await;
    grant(storage.as_ref(), 3005, BadgeTier::Mega, 13).await;
    grant(storage.as_ref(), 3006, BadgeTier::Mega, 14).await;

    let engine = engine(storage.clone(), EngineConfig::default());
    let report = engine.run_global_pool_for(now).await.unwrap();

    assert_eq!(report.amount("pool_total"), Decimal::new(1000, 0));
    assert_eq!(report.count("seven_star.rows"), 2);
    assert_eq!(report.count("mega.rows"), 3);
    assert_eq!(report.count("giga.rows"), 0);
    assert_eq!(report.amount("undistributed"), Decimal::new(200, 0));

    let seven = storage.list_earnings_for(MemberId(11)).await.unwrap();
    assert_eq!(seven.len(), 1);
    assert_eq!(seven[0].amount, Decimal::new(250, 0));
    let mega = storage.list_earnings_for(MemberId(12)).await.unwrap();
    assert_eq!(mega[0].amount, Decimal::new(100, 0));

    let again = engine.run_global_pool_for(now).await.unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(storage.list_earnings_for(MemberId(11)).await.unwrap().len(), 1);
}

// ============ Queries ============

#[tokio::test]
async fn test_earning_balance_after_distribution() {
    let storage = leadership_forest().await;
    let engine = engine(storage.clone(), EngineConfig::default());
    engine.run_leadership().await.unwrap();

    let referrer = engine.earning_balance(MemberId(19)).await.unwrap();
    // 100 * 0.8 * 0.15
    assert_eq!(referrer.category(EarningCategory::Earning), Decimal::new(12, 0));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.distributed_orders, 1);
    assert_eq!(stats.inactive_pool_entries, 1);
}

// ============ Sled ============

#[tokio::test]
async fn test_sled_engine_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SledStorage::open(dir.path()).unwrap());

    storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
    storage.save_member(&Member::paid(MemberId(2), Some(MemberId(1)))).await.unwrap();
    storage.save_member(&Member::new(MemberId(3), Some(MemberId(1)))).await.unwrap();
    package(storage.as_ref(), 50).await;
    top_up(storage.as_ref(), 9001, 3, 50).await;
    storage
        .save_order(&Order::confirmed(OrderId(1), MemberId(2), Decimal::new(100, 0)))
        .await
        .unwrap();

    let engine = engine(storage.clone(), EngineConfig::default());
    let reports = engine.run_all().await.unwrap();
    assert_eq!(reports[0].job, JobKind::Activation);
    assert_eq!(reports[0].processed, 1);
    assert_eq!(reports[1].processed, 1);

    assert_eq!(engine.badge_holders(BadgeTier::ThreeStar).await.unwrap(), vec![MemberId(1)]);
    let order = storage.get_order(OrderId(1)).await.unwrap().unwrap();
    assert!(order.commission_distributed);
}
