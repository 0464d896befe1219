//! Referral Core - Commission and Rank Engine
//!
//! Batch engine that pays referral commission across a member forest and
//! promotes members through badge tiers.
//!
//! # Architecture
//!
//! - **Upline Resolver**: bounded walks up the referral forest
//! - **Badge Promotion Cascade**: consumes referral slots and lower-tier tokens in
//!   fixed batches to mint higher-tier badges
//! - **Leadership Distributor**: splits each order's commission into a pool share
//!   and six leadership slots, expanding middle-tier payouts with a chaque-match
//! - **Global Pool Distributor**: monthly split of pooled commission among badge holders
//! - **Redistribution Sweep**: locates upline chains of earnings flagged for redistribution
//! - **Member Activation Driver**: upgrades free members whose balance covers the package
//!
//! # Ledger Writes
//!
//! Every candidate (order, member, pool month) is first claimed with an atomic
//! conditional update, then all of its writes go through one [`LedgerBatch`]:
//!
//! ```text
//! pending ──claim──→ in_progress ──batch applied──→ done
//!    ↑                    │
//!    └──release on error──┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use referral_core::{EngineConfig, MemoryStorage, ReferralEngine};
//!
//! async fn example() {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let engine = ReferralEngine::new(storage, EngineConfig::default()).unwrap();
//!
//!     for report in engine.run_all().await.unwrap() {
//!         println!("{}: {} processed", report.job, report.processed);
//!     }
//! }
//! ```

pub mod activation;
pub mod balance;
pub mod chaque;
pub mod config;
pub mod error;
pub mod leadership;
pub mod pool;
pub mod promotion;
pub mod redistribution;
pub mod report;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod upline;

pub use activation::ActivationDriver;
pub use balance::{earning_balance, member_balance, EarningBalance};
pub use chaque::{ChaqueLevel, ChaqueMatch, CHAQUE_LEVELS};
pub use config::{EngineConfig, LeadershipSplit, PoolSplit, ResidueDestination, ScheduleConfig};
pub use error::{EngineError, EngineResult};
pub use leadership::{LeadershipDistributor, LeadershipSlot, OrderDistribution};
pub use pool::{month_bounds, previous_month, PoolDistributor, TierShare};
pub use promotion::{AncestorPromotion, CascadeOutcome, PromotionCascade};
pub use redistribution::{RedistributionChain, RedistributionSweep};
pub use report::{BatchReport, ItemOutcome, ItemStatus, JobKind};
pub use service::{BackgroundRunner, MonthGate, ReferralEngine, RunnerHandle};
pub use snapshot::{compute_rank_snapshot, SnapshotSource};
pub use storage::{
    LedgerBatch, LedgerStorage, LedgerWrite, MemoryStorage, SledStorage, StorageConfig,
    StorageStats,
};
pub use types::*;
pub use upline::{UplineMatch, UplinePredicate, UplineResolver};
