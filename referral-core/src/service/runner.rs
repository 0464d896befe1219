//! Background Runner
//!
//! Schedules every job on its own interval:
//! - leadership distribution
//! - member activation
//! - global pool distribution, once per calendar month for the month just closed
//! - redistribution sweep
//!
//! A failing run is logged and the loop keeps ticking.

use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::error::EngineResult;
use crate::report::{BatchReport, JobKind};
use crate::storage::LedgerStorage;
use crate::types::Timestamp;

use super::ReferralEngine;

/// Opens once per calendar month
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonthGate {
    last: Option<(i32, u32)>,
}

impl MonthGate {
    /// Whether no successful run has happened yet in `now`'s month
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.last != Some((now.year(), now.month()))
    }

    pub fn mark(&mut self, now: Timestamp) {
        self.last = Some((now.year(), now.month()));
    }
}

/// Background runner
pub struct BackgroundRunner<S: LedgerStorage + 'static> {
    engine: Arc<ReferralEngine<S>>,
}

impl<S: LedgerStorage + 'static> BackgroundRunner<S> {
    pub fn new(engine: Arc<ReferralEngine<S>>) -> Self {
        Self { engine }
    }

    /// Start the runner
    pub async fn start(self) -> RunnerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(RwLock::new(true));
        let running_clone = running.clone();

        let schedule = self.engine.config().schedule.clone();
        let leadership_interval = Duration::from_secs(schedule.leadership_interval_secs);
        let activation_interval = Duration::from_secs(schedule.activation_interval_secs);
        let pool_interval = Duration::from_secs(schedule.pool_interval_secs);
        let redistribution_interval = Duration::from_secs(schedule.redistribution_interval_secs);

        let engine = self.engine.clone();

        tokio::spawn(async move {
            let mut leadership_timer = interval(leadership_interval);
            let mut activation_timer = interval(activation_interval);
            let mut pool_timer = interval(pool_interval);
            let mut redistribution_timer = interval(redistribution_interval);
            let mut pool_gate = MonthGate::default();

            loop {
                let job = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Background runner received shutdown signal");
                        break;
                    }
                    _ = activation_timer.tick() => JobKind::Activation,
                    _ = leadership_timer.tick() => JobKind::Leadership,
                    _ = pool_timer.tick() => JobKind::GlobalPool,
                    _ = redistribution_timer.tick() => JobKind::Redistribution,
                };

                if !*running_clone.read().await {
                    debug!(job = %job, "Runner paused, tick ignored");
                    continue;
                }

                let result = match job {
                    JobKind::GlobalPool => {
                        let now = Utc::now();
                        if !pool_gate.is_due(now) {
                            debug!("Global pool already closed for this month");
                            continue;
                        }
                        let result = engine.run_closed_global_pool(now).await;
                        if result.is_ok() {
                            pool_gate.mark(now);
                        }
                        result
                    }
                    job => {
                        debug!(job = %job, "Running scheduled job");
                        engine.run_job(job).await
                    }
                };
                Self::log_result(job, result);
            }

            info!("Background runner stopped");
        });

        RunnerHandle {
            shutdown_tx,
            running,
        }
    }

    fn log_result(job: JobKind, result: EngineResult<BatchReport>) {
        match result {
            Ok(report) => {
                if report.candidates > 0 {
                    info!(
                        job = %job,
                        processed = report.processed,
                        skipped = report.skipped,
                        failed = report.failed,
                        total = %report.total_amount,
                        "Scheduled job finished"
                    );
                }
            }
            Err(e) => error!(job = %job, error = %e, "Scheduled job failed"),
        }
    }
}

/// Runner handle
pub struct RunnerHandle {
    shutdown_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl RunnerHandle {
    /// Stop the runner
    pub async fn stop(self) {
        *self.running.write().await = false;
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Pause the runner; ticks are ignored until resumed
    pub async fn pause(&self) {
        *self.running.write().await = false;
    }

    pub async fn resume(&self) {
        *self.running.write().await = true;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
