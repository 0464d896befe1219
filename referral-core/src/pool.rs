//! Global Pool Distributor
//!
//! Monthly job: sums the inactive pool entries of one calendar month, splits
//! the sum across the 7★ / Mega / Giga tiers and divides each tier's share
//! evenly among the members currently holding that badge. The scheduled run
//! closes the month that just ended; an on-demand run covers the current one.
//!
//! The earnings and the activation of every scoped entry are one batch, so a
//! second run over the same month finds nothing left to distribute.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::report::{BatchReport, ItemOutcome, JobKind};
use crate::storage::{LedgerBatch, LedgerStorage, LedgerWrite};
use crate::types::{BadgeTier, Earning, EarningId, MemberId, Timestamp};

/// Inclusive bounds of the calendar month containing `now`
pub fn month_bounds(now: Timestamp) -> EngineResult<(Timestamp, Timestamp)> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .ok_or_else(|| EngineError::invalid_state(format!("no month start for {}", now)))?;
    let next_first = if now.month() == 12 {
        NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(now.year(), now.month() + 1, 1)
    }
    .ok_or_else(|| EngineError::invalid_state(format!("no month end for {}", now)))?;

    let start = midnight(first)?;
    let end = midnight(next_first)? - Duration::nanoseconds(1);
    Ok((start, end))
}

/// Last instant of the calendar month before the one containing `now`
pub fn previous_month(now: Timestamp) -> EngineResult<Timestamp> {
    let (start, _) = month_bounds(now)?;
    Ok(start - Duration::nanoseconds(1))
}

fn midnight(day: NaiveDate) -> EngineResult<DateTime<Utc>> {
    let naive = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| EngineError::invalid_state(format!("no midnight on {}", day)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Per-tier division of the pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierShare {
    pub tier: BadgeTier,
    pub share: Decimal,
    pub holders: Vec<MemberId>,
    /// Amount credited to each holder (0 when nothing is paid)
    pub per_holder: Decimal,
}

impl TierShare {
    /// Amount actually written for the tier
    pub fn paid(&self) -> Decimal {
        if self.per_holder > Decimal::ZERO {
            self.per_holder * Decimal::from(self.holders.len() as u64)
        } else {
            Decimal::ZERO
        }
    }
}

/// Global pool distributor
pub struct PoolDistributor<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: LedgerStorage + ?Sized> PoolDistributor<'a, S> {
    pub fn new(storage: &'a S, config: &'a EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Distribute the current month's pool
    pub async fn run(&self) -> EngineResult<BatchReport> {
        self.run_for(Utc::now()).await
    }

    /// Distribute the pool of the month that ended before `now`
    pub async fn run_closed_month(&self, now: Timestamp) -> EngineResult<BatchReport> {
        self.run_for(previous_month(now)?).await
    }

    /// Distribute the pool of the month containing `now`
    pub async fn run_for(&self, now: Timestamp) -> EngineResult<BatchReport> {
        let mut report = BatchReport::new(JobKind::GlobalPool);
        let (from, to) = month_bounds(now)?;

        let entries = self.storage.list_inactive_pool_entries(from, to).await?;
        report.candidates = entries.len();
        let total: Decimal = entries.iter().map(|e| e.amount).sum();
        report.add_amount("pool_total", total);

        if total <= Decimal::ZERO {
            info!(
                from = %from,
                to = %to,
                entries = entries.len(),
                "Global pool empty, nothing to distribute"
            );
            return Ok(report.finish());
        }
        info!(
            from = %from,
            to = %to,
            entries = entries.len(),
            total = %total,
            "Global pool distribution started"
        );

        let shares = self.divide(total).await?;
        let mut batch = LedgerBatch::new(format!("pool:{}-{:02}", now.year(), now.month()));
        let mut earnings = Vec::new();

        for share in &shares {
            report.add_amount(share.tier.name(), share.share);
            let holders = share.holders.len() as u64;
            report.add_count(format!("{}.holders", share.tier.name()), holders);

            if share.holders.is_empty() {
                warn!(
                    tier = %share.tier,
                    share = %share.share,
                    "No badge holders, tier share not paid"
                );
                continue;
            }
            if share.per_holder <= Decimal::ZERO {
                warn!(
                    tier = %share.tier,
                    share = %share.share,
                    holders,
                    "Per-holder share rounds to zero"
                );
                continue;
            }

            for holder in &share.holders {
                let earning = Earning::credit(
                    EarningId(self.storage.next_id().await?),
                    *holder,
                    format!("global_pool_{}", share.tier.name()),
                    share.per_holder,
                );
                debug!(
                    tier = %share.tier,
                    holder = %holder,
                    amount = %share.per_holder,
                    "Pool share credited"
                );
                earnings.push((earning.id, earning.user_id, earning.amount));
                batch.push(LedgerWrite::InsertEarning(earning));
            }
            report.add_count(format!("{}.rows", share.tier.name()), holders);
        }

        let paid: Decimal = shares.iter().map(TierShare::paid).sum();
        report.add_amount("undistributed", total - paid);

        // entries are marked once, after every earning of the run
        batch.extend(entries.iter().map(|e| LedgerWrite::ActivatePoolEntry(e.id)));
        self.storage.apply(batch).await?;

        for (id, user, amount) in earnings {
            report.record(
                ItemOutcome::processed(id.0, amount).with_detail(format!("member {}", user)),
            );
        }

        info!(
            total = %total,
            paid = %paid,
            rows = report.processed,
            "Global pool distribution finished"
        );
        Ok(report.finish())
    }

    /// Split `total` across tiers and current holders
    pub async fn divide(&self, total: Decimal) -> EngineResult<Vec<TierShare>> {
        let mut shares = Vec::new();
        for (tier, ratio) in self.config.pool.tiers() {
            let share = total * ratio;
            let holders = self.storage.list_badge_holders(tier).await?;
            let per_holder = if holders.is_empty() {
                Decimal::ZERO
            } else {
                (share / Decimal::from(holders.len() as u64))
                    .round_dp_with_strategy(self.config.money_scale, RoundingStrategy::ToZero)
            };
            shares.push(TierShare {
                tier,
                share,
                holders,
                per_holder,
            });
        }
        Ok(shares)
    }
}
