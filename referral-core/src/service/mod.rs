//! Engine Service Layer
//!
//! Ties storage, configuration and the jobs together.
//!
//! # Usage
//!
//! ```rust,ignore
//! use referral_core::{EngineConfig, MemoryStorage, ReferralEngine};
//!
//! async fn example() {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let engine = ReferralEngine::new(storage, EngineConfig::default())?;
//!
//!     let report = engine.run_leadership().await?;
//!     println!("{}", report.to_json()?);
//!
//!     // or schedule every job in the background
//!     let handle = BackgroundRunner::new(Arc::new(engine)).start().await;
//! }
//! ```

mod runner;

pub use runner::{BackgroundRunner, MonthGate, RunnerHandle};

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::activation::ActivationDriver;
use crate::balance::{self, EarningBalance};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::leadership::LeadershipDistributor;
use crate::pool::PoolDistributor;
use crate::redistribution::{RedistributionChain, RedistributionSweep};
use crate::report::{BatchReport, JobKind};
use crate::storage::{LedgerStorage, StorageStats};
use crate::types::{BadgeTier, BadgeToken, MemberId, RankSnapshot, Timestamp};

/// Referral commission and rank engine
pub struct ReferralEngine<S: LedgerStorage> {
    storage: Arc<S>,
    config: EngineConfig,
}

impl<S: LedgerStorage> ReferralEngine<S> {
    /// Create an engine; the configuration is validated first
    pub fn new(storage: Arc<S>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        info!(
            house_account = %config.house_account,
            residue = ?config.residue_destination,
            "Referral engine initialized"
        );
        Ok(Self { storage, config })
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==================== Jobs ====================

    /// Distribute leadership commission for every candidate order
    pub async fn run_leadership(&self) -> EngineResult<BatchReport> {
        LeadershipDistributor::new(self.storage.as_ref(), &self.config)
            .run()
            .await
    }

    /// Distribute the current month's global pool
    pub async fn run_global_pool(&self) -> EngineResult<BatchReport> {
        PoolDistributor::new(self.storage.as_ref(), &self.config)
            .run()
            .await
    }

    /// Distribute the global pool of the month that ended before `now`
    pub async fn run_closed_global_pool(&self, now: Timestamp) -> EngineResult<BatchReport> {
        PoolDistributor::new(self.storage.as_ref(), &self.config)
            .run_closed_month(now)
            .await
    }

    /// Distribute the global pool of the month containing `now`
    pub async fn run_global_pool_for(&self, now: Timestamp) -> EngineResult<BatchReport> {
        PoolDistributor::new(self.storage.as_ref(), &self.config)
            .run_for(now)
            .await
    }

    /// Locate redistribution chains (locate-only)
    pub async fn run_redistribution_sweep(&self) -> EngineResult<BatchReport> {
        RedistributionSweep::new(self.storage.as_ref(), &self.config)
            .run()
            .await
    }

    /// Redistribution chains currently pending
    pub async fn redistribution_chains(&self) -> EngineResult<Vec<RedistributionChain>> {
        Ok(RedistributionSweep::new(self.storage.as_ref(), &self.config)
            .locate()
            .await?
            .0)
    }

    /// Activate free members whose balance covers the package price
    pub async fn run_activation(&self) -> EngineResult<BatchReport> {
        ActivationDriver::new(self.storage.as_ref(), &self.config)
            .run()
            .await
    }

    /// Run one job
    pub async fn run_job(&self, job: JobKind) -> EngineResult<BatchReport> {
        match job {
            JobKind::Leadership => self.run_leadership().await,
            JobKind::GlobalPool => self.run_global_pool().await,
            JobKind::Redistribution => self.run_redistribution_sweep().await,
            JobKind::Activation => self.run_activation().await,
        }
    }

    /// Run every job once: activation, leadership, global pool, redistribution
    pub async fn run_all(&self) -> EngineResult<Vec<BatchReport>> {
        let mut reports = Vec::new();
        for job in [
            JobKind::Activation,
            JobKind::Leadership,
            JobKind::GlobalPool,
            JobKind::Redistribution,
        ] {
            reports.push(self.run_job(job).await?);
        }
        Ok(reports)
    }

    // ==================== Queries ====================

    /// Members currently holding an unconsumed token of `tier`
    pub async fn badge_holders(&self, tier: BadgeTier) -> EngineResult<Vec<MemberId>> {
        self.storage.list_badge_holders(tier).await
    }

    /// Badge holders of every tier
    pub async fn all_badge_holders(&self) -> EngineResult<BTreeMap<BadgeTier, Vec<MemberId>>> {
        let mut holders = BTreeMap::new();
        for tier in BadgeTier::all() {
            holders.insert(tier, self.storage.list_badge_holders(tier).await?);
        }
        Ok(holders)
    }

    /// Tokens held by a member
    pub async fn member_badges(&self, member: MemberId) -> EngineResult<Vec<BadgeToken>> {
        self.storage.list_tokens_for(member).await
    }

    pub async fn rank_snapshot(&self, member: MemberId) -> EngineResult<Option<RankSnapshot>> {
        self.storage.get_rank_snapshot(member).await
    }

    pub async fn member_balance(&self, member: MemberId) -> EngineResult<Decimal> {
        balance::member_balance(self.storage.as_ref(), member).await
    }

    pub async fn earning_balance(&self, member: MemberId) -> EngineResult<EarningBalance> {
        balance::earning_balance(self.storage.as_ref(), member).await
    }

    pub async fn stats(&self) -> EngineResult<StorageStats> {
        self.storage.get_stats().await
    }
}
