//! Redistribution Sweep
//!
//! Locates live earnings flagged for redistribution and resolves the
//! upline chain each would be spread across. Runs in locate-only mode:
//! the chains are reported and nothing is written.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::report::{BatchReport, ItemOutcome, JobKind};
use crate::storage::LedgerStorage;
use crate::types::{EarningId, MemberId};
use crate::upline::UplineResolver;

/// Upline located for one flagged earning
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RedistributionChain {
    pub earning_id: EarningId,
    pub user_id: MemberId,
    /// Ancestors, nearest first
    pub chain: Vec<MemberId>,
}

/// Redistribution sweep
pub struct RedistributionSweep<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: LedgerStorage + ?Sized> RedistributionSweep<'a, S> {
    pub fn new(storage: &'a S, config: &'a EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Locate the chain of every pending redistribution earning
    pub async fn locate(&self) -> EngineResult<(Vec<RedistributionChain>, BatchReport)> {
        let mut report = BatchReport::new(JobKind::Redistribution);
        let pending = self.storage.list_pending_redistributions().await?;
        report.candidates = pending.len();
        if pending.is_empty() {
            info!("No earnings pending redistribution");
            return Ok((Vec::new(), report.finish()));
        }

        let resolver = UplineResolver::from_config(self.storage, self.config);
        let depth = self.config.redistribution_depth;
        let mut chains = Vec::new();

        for earning in pending {
            match resolver.chain(earning.user_id, depth).await {
                Ok(members) => {
                    let chain: Vec<MemberId> = members.iter().map(|m| m.id).collect();
                    debug!(
                        earning = %earning.id,
                        user = %earning.user_id,
                        levels = chain.len(),
                        "Redistribution chain located"
                    );
                    report.add_count("levels_located", chain.len() as u64);
                    if chain.len() < depth {
                        report.add_count("short_chains", 1);
                    }
                    report.add_amount("flagged", earning.amount);

                    // nothing is paid out, so the item carries no amount
                    let listed: Vec<String> = chain.iter().map(|m| m.to_string()).collect();
                    report.record(
                        ItemOutcome::skipped(earning.id.0, "locate", "locate-only")
                            .with_detail(format!("chain [{}]", listed.join(","))),
                    );
                    chains.push(RedistributionChain {
                        earning_id: earning.id,
                        user_id: earning.user_id,
                        chain,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(
                        earning = %earning.id,
                        error = %e,
                        "Failed to locate redistribution chain"
                    );
                    report.record(ItemOutcome::failed(earning.id.0, "locate", &e));
                }
            }
        }

        info!(
            located = chains.len(),
            failed = report.failed,
            "Redistribution sweep finished"
        );
        Ok((chains, report.finish()))
    }

    /// Run the sweep, keeping only the report
    pub async fn run(&self) -> EngineResult<BatchReport> {
        Ok(self.locate().await?.1)
    }
}
