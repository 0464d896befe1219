//! Leadership Distributor
//!
//! Splits each candidate order's commission:
//!
//! ```text
//! commission ─┬─ pool share (20%) ──────→ PoolEntry (inactive until the monthly run)
//!             └─ leadership share (80%) ─┬→ referrer / 3★ / 5★ / 7★ / Mega / Giga slots
//!                                        │    (3★, 5★, 7★ payouts → chaque-match)
//!                                        └→ residue less chaque-match (configured destination)
//! ```
//!
//! Orders are claimed one at a time, oldest first. All writes for an order,
//! including the terminal status change, go through one ledger batch.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::chaque::ChaqueMatch;
use crate::config::{EngineConfig, ResidueDestination};
use crate::error::{EngineError, EngineResult};
use crate::report::{BatchReport, ItemOutcome, JobKind};
use crate::snapshot;
use crate::storage::{LedgerBatch, LedgerStorage, LedgerWrite};
use crate::types::{
    BadgeTier, Earning, EarningId, MemberId, Order, PoolEntry, PoolEntryId, RankSnapshot,
    Timestamp,
};

/// Named leadership slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeadershipSlot {
    Referrer,
    Tier(BadgeTier),
}

impl LeadershipSlot {
    /// Slots in payout order
    pub fn all() -> [LeadershipSlot; 6] {
        [
            LeadershipSlot::Referrer,
            LeadershipSlot::Tier(BadgeTier::ThreeStar),
            LeadershipSlot::Tier(BadgeTier::FiveStar),
            LeadershipSlot::Tier(BadgeTier::SevenStar),
            LeadershipSlot::Tier(BadgeTier::Mega),
            LeadershipSlot::Tier(BadgeTier::Giga),
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            LeadershipSlot::Referrer => "referrer",
            LeadershipSlot::Tier(tier) => tier.name(),
        }
    }

    /// Payouts to the three middle tiers trigger a chaque-match
    pub fn triggers_chaque_match(&self) -> bool {
        matches!(
            self,
            LeadershipSlot::Tier(BadgeTier::ThreeStar)
                | LeadershipSlot::Tier(BadgeTier::FiveStar)
                | LeadershipSlot::Tier(BadgeTier::SevenStar)
        )
    }

    fn recipient(&self, snapshot: &RankSnapshot) -> Option<MemberId> {
        match self {
            LeadershipSlot::Referrer => snapshot.referrer_id,
            LeadershipSlot::Tier(tier) => snapshot.ancestor_for(*tier),
        }
    }

    fn ratio(&self, config: &EngineConfig) -> Decimal {
        match self {
            LeadershipSlot::Referrer => config.leadership.referrer,
            LeadershipSlot::Tier(tier) => config.leadership.for_tier(*tier),
        }
    }
}

/// Planned writes and totals for one order
#[derive(Clone, Debug, Default)]
pub struct OrderDistribution {
    pub batch: LedgerBatch,
    pub pool_amount: Decimal,
    /// Amount paid per slot name
    pub slot_amounts: Vec<(&'static str, Decimal)>,
    pub chaque_amount: Decimal,
    /// Chaque-match levels redirected to the house account
    pub chaque_redirects: u64,
    /// Residue written to the house account (after chaque-match payouts)
    pub residue_paid: Decimal,
    /// Leadership share left unwritten (missing slots plus unallocated residue)
    pub unallocated: Decimal,
}

impl OrderDistribution {
    /// Everything written to the ledger for the order
    pub fn written_total(&self) -> Decimal {
        self.pool_amount
            + self.slot_amounts.iter().map(|(_, a)| *a).sum::<Decimal>()
            + self.chaque_amount
            + self.residue_paid
    }
}

/// Leadership distributor
pub struct LeadershipDistributor<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: LedgerStorage + ?Sized> LeadershipDistributor<'a, S> {
    pub fn new(storage: &'a S, config: &'a EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Process every candidate order, oldest first
    pub async fn run(&self) -> EngineResult<BatchReport> {
        let mut report = BatchReport::new(JobKind::Leadership);
        let stale_before = self.stale_before();
        let mut candidates = self.storage.list_distribution_candidates(stale_before).await?;
        candidates.sort_by_key(|o| o.id);
        report.candidates = candidates.len();

        if candidates.is_empty() {
            info!("No orders awaiting leadership distribution");
            return Ok(report.finish());
        }
        info!(candidates = candidates.len(), "Leadership distribution started");

        for order in candidates {
            let outcome = self.process_order(&order, &mut report).await;
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e) if e.is_fatal() => {
                    error!(
                        order = %order.id,
                        error = %e,
                        "Storage failure, aborting leadership run"
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(order = %order.id, error = %e, "Order distribution failed");
                    report.record(ItemOutcome::failed(order.id.0, "distribute", &e));
                }
            }
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            total = %report.total_amount,
            "Leadership distribution finished"
        );
        Ok(report.finish())
    }

    /// Claim, plan and apply one order; the claim is released on failure
    async fn process_order(
        &self,
        order: &Order,
        report: &mut BatchReport,
    ) -> EngineResult<ItemOutcome> {
        let now = Utc::now();
        if !self
            .storage
            .claim_order(order.id, now, self.stale_before())
            .await?
        {
            debug!(order = %order.id, "Order already claimed elsewhere");
            return Ok(ItemOutcome::skipped(order.id.0, "claim", "already claimed"));
        }

        let distribution = match self.plan(order).await {
            Ok(d) => d,
            Err(e) => {
                self.release(order).await;
                return Err(e);
            }
        };

        if let Err(e) = self.storage.apply(distribution.batch.clone()).await {
            self.release(order).await;
            return Err(e);
        }

        report.add_amount("pool", distribution.pool_amount);
        for (slot, amount) in &distribution.slot_amounts {
            report.add_amount(*slot, *amount);
        }
        report.add_amount("chaque_match", distribution.chaque_amount);
        report.add_amount("residue_paid", distribution.residue_paid);
        report.add_amount("unallocated", distribution.unallocated);
        report.add_count("chaque_match.redirected", distribution.chaque_redirects);

        info!(
            order = %order.id,
            commission = %order.commission_amount,
            pool = %distribution.pool_amount,
            unallocated = %distribution.unallocated,
            "Order distributed"
        );
        Ok(ItemOutcome::processed(order.id.0, distribution.written_total()))
    }

    async fn release(&self, order: &Order) {
        if let Err(e) = self.storage.release_order(order.id).await {
            warn!(order = %order.id, error = %e, "Failed to release order claim");
        }
    }

    /// Plan every write for a claimed order
    pub async fn plan(&self, order: &Order) -> EngineResult<OrderDistribution> {
        let member_id = order.member_id.ok_or_else(|| {
            EngineError::invalid_state(format!("order {} has no member", order.id))
        })?;
        if order.commission_amount < Decimal::ZERO {
            return Err(EngineError::InvalidAmount {
                amount: order.commission_amount,
                reason: "negative commission".to_string(),
            });
        }

        let mut distribution = OrderDistribution {
            batch: LedgerBatch::new(format!("order:{}", order.id)),
            ..Default::default()
        };

        let source =
            snapshot::load_or_compute(self.storage, member_id, self.config.upline_iteration_cap)
                .await?;
        let computed = source.is_computed();
        let snapshot = source.into_snapshot();
        if computed {
            debug!(order = %order.id, member = %member_id, "Rank snapshot computed lazily");
            distribution
                .batch
                .push(LedgerWrite::InsertRankSnapshot(snapshot.clone()));
        }

        // Global pool share
        let pool_amount = order.commission_amount * self.config.leadership.pool_ratio;
        distribution.pool_amount = pool_amount;
        distribution.batch.push(LedgerWrite::InsertPoolEntry(PoolEntry {
            id: PoolEntryId(self.storage.next_id().await?),
            user_id: member_id,
            order_id: order.id,
            trigger_user_id: member_id,
            amount: pool_amount,
            active: false,
            consumed: false,
            created_at: Utc::now(),
        }));

        // Leadership slots
        let leadership_share = order.commission_amount - pool_amount;
        let chaque = ChaqueMatch::new(self.storage, self.config);
        let mut slots_paid = Decimal::ZERO;

        for slot in LeadershipSlot::all() {
            let amount = leadership_share * slot.ratio(self.config);
            let Some(recipient) = slot.recipient(&snapshot) else {
                debug!(order = %order.id, slot = slot.name(), "Slot has no ancestor, skipped");
                continue;
            };
            if amount <= Decimal::ZERO {
                continue;
            }

            let earning = Earning::credit(
                EarningId(self.storage.next_id().await?),
                recipient,
                format!("leadership_{}", slot.name()),
                amount,
            )
            .with_order(order.id)
            .with_trigger_user(member_id);

            if slot.triggers_chaque_match() {
                for level in chaque.plan(&earning).await? {
                    if !level.eligible {
                        distribution.chaque_redirects += 1;
                    }
                    distribution.chaque_amount += level.earning.amount;
                    distribution
                        .batch
                        .push(LedgerWrite::InsertEarning(level.earning));
                }
            }

            slots_paid += amount;
            distribution.slot_amounts.push((slot.name(), amount));
            distribution.batch.push(LedgerWrite::InsertEarning(earning));
        }

        // Residue of the leadership share; chaque-match payouts are carved out of it
        let residue_share = leadership_share * self.config.leadership.residue_ratio();
        let missing_slots = leadership_share - residue_share - slots_paid;
        let residue = (residue_share - distribution.chaque_amount).max(Decimal::ZERO);
        match self.config.residue_destination {
            ResidueDestination::HouseAccount if residue > Decimal::ZERO => {
                let earning = Earning::credit(
                    EarningId(self.storage.next_id().await?),
                    self.config.house_account,
                    "leadership_residue",
                    residue,
                )
                .with_order(order.id)
                .with_trigger_user(member_id);
                distribution.residue_paid = residue;
                distribution.unallocated = missing_slots;
                distribution.batch.push(LedgerWrite::InsertEarning(earning));
            }
            _ => {
                distribution.unallocated = missing_slots + residue;
            }
        }

        let written = distribution.pool_amount
            + distribution
                .batch
                .earnings()
                .map(|e| e.amount)
                .sum::<Decimal>();
        if written > order.commission_amount {
            return Err(EngineError::SplitMismatch {
                expected: order.commission_amount,
                actual: written,
            });
        }

        distribution.batch.push(LedgerWrite::CompleteOrder(order.id));
        Ok(distribution)
    }

    fn stale_before(&self) -> Timestamp {
        Utc::now() - Duration::seconds(self.config.claim_timeout_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{BadgeToken, Member, OrderId, ProcessingStatus, TokenId};

    async fn simple_forest() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
        storage.save_member(&Member::paid(MemberId(2), Some(MemberId(1)))).await.unwrap();
        storage.save_member(&Member::paid(MemberId(3), Some(MemberId(2)))).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_pool_share_is_exactly_twenty_percent() {
        let storage = simple_forest().await;
        storage
            .save_order(&Order::confirmed(OrderId(10), MemberId(3), Decimal::new(12345, 2)))
            .await
            .unwrap();

        let config = EngineConfig::default();
        let report = LeadershipDistributor::new(&storage, &config).run().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.amount("pool"), Decimal::new(12345, 2) * Decimal::new(20, 2));
        assert_eq!(
            report.amount("referrer"),
            Decimal::new(12345, 2) * Decimal::new(80, 2) * Decimal::new(15, 2)
        );
    }

    #[tokio::test]
    async fn test_order_completed_once() {
        let storage = simple_forest().await;
        storage
            .save_order(&Order::confirmed(OrderId(10), MemberId(3), Decimal::new(100, 0)))
            .await
            .unwrap();

        let config = EngineConfig::default();
        let distributor = LeadershipDistributor::new(&storage, &config);
        distributor.run().await.unwrap();

        let order = storage.get_order(OrderId(10)).await.unwrap().unwrap();
        assert_eq!(order.leadership_status, ProcessingStatus::Done);
        assert_eq!(order.chaque_match_status, ProcessingStatus::Done);
        assert!(order.commission_distributed);

        let again = distributor.run().await.unwrap();
        assert_eq!(again.candidates, 0);
        assert_eq!(storage.list_earnings_for_order(OrderId(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_residue_routed_to_house() {
        let storage = simple_forest().await;
        storage
            .save_order(&Order::confirmed(OrderId(10), MemberId(3), Decimal::new(100, 0)))
            .await
            .unwrap();

        let config = EngineConfig::default()
            .with_house_account(MemberId(1))
            .with_residue_destination(ResidueDestination::HouseAccount);
        let report = LeadershipDistributor::new(&storage, &config).run().await.unwrap();

        // 80 * 0.51
        assert_eq!(report.amount("residue_paid"), Decimal::new(408, 1));
        // only the referrer slot exists: 80 * (0.49 - 0.15)
        assert_eq!(report.amount("unallocated"), Decimal::new(272, 1));
    }

    #[tokio::test]
    async fn test_missing_member_fails_and_releases() {
        let storage = simple_forest().await;
        storage
            .save_order(&Order::confirmed(OrderId(11), MemberId(42), Decimal::new(100, 0)))
            .await
            .unwrap();

        let config = EngineConfig::default();
        let report = LeadershipDistributor::new(&storage, &config).run().await.unwrap();
        assert_eq!(report.failed, 1);

        let order = storage.get_order(OrderId(11)).await.unwrap().unwrap();
        assert_eq!(order.leadership_status, ProcessingStatus::Pending);
        assert!(storage.list_earnings_for_order(OrderId(11)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payout_beyond_commission_is_refused() {
        let storage = simple_forest().await;
        let mut grant = LedgerBatch::new("grant");
        grant.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
            TokenId(500),
            BadgeTier::ThreeStar,
            MemberId(2),
            vec![],
        )));
        storage.apply(grant).await.unwrap();
        storage
            .save_order(&Order::confirmed(OrderId(12), MemberId(3), Decimal::new(100, 0)))
            .await
            .unwrap();

        // whole leadership share on the 3★ slot leaves no residue for chaque-match
        let mut config = EngineConfig::default();
        config.leadership.referrer = Decimal::ZERO;
        config.leadership.tier3 = Decimal::ONE;
        config.leadership.tier5 = Decimal::ZERO;
        config.leadership.tier7 = Decimal::ZERO;
        config.leadership.mega = Decimal::ZERO;
        config.leadership.giga = Decimal::ZERO;
        assert!(config.validate().is_err());

        let distributor = LeadershipDistributor::new(&storage, &config);
        let order = storage.get_order(OrderId(12)).await.unwrap().unwrap();
        // 20 pool + 80 slot + 12 chaque-match level 1
        let err = distributor.plan(&order).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::SplitMismatch {
                expected: Decimal::new(100, 0),
                actual: Decimal::new(112, 0),
            }
        );

        let report = distributor.run().await.unwrap();
        assert_eq!(report.failed, 1);
        let order = storage.get_order(OrderId(12)).await.unwrap().unwrap();
        assert_eq!(order.leadership_status, ProcessingStatus::Pending);
        assert!(storage.list_earnings_for_order(OrderId(12)).await.unwrap().is_empty());
    }
}
