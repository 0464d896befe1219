//! Member Activation Driver
//!
//! Upgrades free members whose spendable balance covers the current
//! package price:
//!
//! ```text
//! claim → balance ≥ price? → snapshot + offsetting transactions (once)
//!       → promotion cascade over the upline (once) → paid + active
//! ```
//!
//! The two one-shot stages are guarded by the member's flags, so a member
//! that failed half-way resumes at the first unfinished stage.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::balance::member_balance;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::promotion::PromotionCascade;
use crate::report::{BatchReport, ItemOutcome, ItemStatus, JobKind};
use crate::snapshot;
use crate::storage::{LedgerBatch, LedgerStorage, LedgerWrite};
use crate::types::{Direction, Member, MemberId, Package, Timestamp, Transaction, TransactionId};

/// Member activation driver
pub struct ActivationDriver<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: LedgerStorage + ?Sized> ActivationDriver<'a, S> {
    pub fn new(storage: &'a S, config: &'a EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Process every free member, oldest first
    pub async fn run(&self) -> EngineResult<BatchReport> {
        let mut report = BatchReport::new(JobKind::Activation);

        let today = Utc::now().date_naive();
        let Some(package) = self.storage.current_package(today).await? else {
            info!(day = %today, "No active package, activation skipped");
            return Ok(report.finish());
        };

        let mut members = self.storage.list_free_members().await?;
        members.sort_by_key(|m| m.id);
        report.candidates = members.len();
        info!(
            candidates = members.len(),
            package = %package.id,
            price = %package.amount,
            "Member activation started"
        );

        for member in members {
            match self.process_member(member.id, &package, &mut report).await {
                Ok(outcome) => report.record(outcome),
                Err(e) if e.is_fatal() => {
                    error!(
                        member = %member.id,
                        error = %e,
                        "Storage failure, aborting activation run"
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(member = %member.id, error = %e, "Member activation failed");
                    report.record(ItemOutcome::failed(member.id.0, "activate", &e));
                }
            }
        }

        info!(
            activated = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Member activation finished"
        );
        Ok(report.finish())
    }

    async fn process_member(
        &self,
        member_id: MemberId,
        package: &Package,
        report: &mut BatchReport,
    ) -> EngineResult<ItemOutcome> {
        let now = Utc::now();
        if !self
            .storage
            .claim_member(member_id, now, self.stale_before())
            .await?
        {
            debug!(member = %member_id, "Member already claimed elsewhere");
            return Ok(ItemOutcome::skipped(member_id.0, "claim", "already claimed"));
        }

        match self.activate(member_id, package, report).await {
            Ok(outcome) => {
                if outcome.status != ItemStatus::Processed {
                    self.release(member_id).await;
                }
                Ok(outcome)
            }
            Err(e) => {
                self.release(member_id).await;
                Err(e)
            }
        }
    }

    /// Activate a claimed member
    async fn activate(
        &self,
        member_id: MemberId,
        package: &Package,
        report: &mut BatchReport,
    ) -> EngineResult<ItemOutcome> {
        let balance = member_balance(self.storage, member_id).await?;
        let spendable = balance.max(Decimal::ZERO);
        if spendable < package.amount {
            debug!(
                member = %member_id,
                balance = %balance,
                price = %package.amount,
                "Balance below package price"
            );
            return Ok(ItemOutcome::skipped(
                member_id.0,
                "balance",
                format!("balance {} below price {}", spendable, package.amount),
            ));
        }

        let member = self.load(member_id).await?;
        if !member.rank_snapshot_done {
            self.write_snapshot(&member, package).await?;
            report.add_count("snapshots", 1);
        }

        let mut finish = LedgerBatch::new(format!("activation:{}", member_id));
        if !member.promotion_run_done {
            let outcome = PromotionCascade::new(self.storage, self.config)
                .run(&member)
                .await?;
            for (tier, count) in outcome.minted_by_tier() {
                report.add_count(format!("minted.{}", tier.name()), count);
            }
            if !outcome.failures.is_empty() {
                warn!(
                    member = %member_id,
                    failures = outcome.failures.len(),
                    "Promotion cascade finished with failed ancestors"
                );
                report.add_count("promotion.failed_ancestors", outcome.failures.len() as u64);
            }
            finish.push(LedgerWrite::MarkPromotionRunDone(member_id));
        }
        finish.push(LedgerWrite::CompleteActivation(member_id));
        self.storage.apply(finish).await?;

        report.add_amount("package_price", package.amount);
        info!(member = %member_id, price = %package.amount, "Member activated");
        Ok(ItemOutcome::processed(member_id.0, Decimal::ZERO))
    }

    /// Persist the snapshot, the offsetting activation transactions and the flag
    async fn write_snapshot(&self, member: &Member, package: &Package) -> EngineResult<()> {
        let mut batch = LedgerBatch::new(format!("snapshot:{}", member.id));

        let source =
            snapshot::load_or_compute(self.storage, member.id, self.config.upline_iteration_cap)
                .await?;
        if source.is_computed() {
            batch.push(LedgerWrite::InsertRankSnapshot(source.into_snapshot()));
        } else {
            debug!(member = %member.id, "Reusing rank snapshot stored by an earlier order");
        }

        let debit = Transaction::new(
            TransactionId(self.storage.next_id().await?),
            member.id,
            package.amount,
            Direction::Debit,
            "activation_fee",
        );
        let credit = Transaction::new(
            TransactionId(self.storage.next_id().await?),
            member.id,
            package.amount,
            Direction::Credit,
            "activation_refund",
        );
        batch.push(LedgerWrite::InsertTransaction(debit));
        batch.push(LedgerWrite::InsertTransaction(credit));
        batch.push(LedgerWrite::MarkRankSnapshotDone(member.id));

        self.storage.apply(batch).await?;
        debug!(member = %member.id, "Rank snapshot written");
        Ok(())
    }

    async fn load(&self, member_id: MemberId) -> EngineResult<Member> {
        self.storage
            .get_member(member_id)
            .await?
            .ok_or_else(|| EngineError::not_found("member", member_id))
    }

    async fn release(&self, member_id: MemberId) {
        if let Err(e) = self.storage.release_member(member_id).await {
            warn!(member = %member_id, error = %e, "Failed to release member claim");
        }
    }

    fn stale_before(&self) -> Timestamp {
        Utc::now() - Duration::seconds(self.config.claim_timeout_secs as i64)
    }
}
