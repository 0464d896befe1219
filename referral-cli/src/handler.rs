//! Command Handlers
//!
//! Handler functions for CLI commands.

use referral_core::{
    BackgroundRunner, BadgeTier, EngineConfig, LedgerStorage, MemberId, ReferralEngine,
    SledStorage, StorageConfig,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::commands::{query::QueryCommands, Cli, Commands, JobArg, OutputFormat};
use crate::error::{CliError, CliResult};
use crate::output;
use crate::seed::LedgerSeed;

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> CliResult<()> {
    let config = EngineConfig::from_env();
    if let Commands::Config = cli.command {
        config.validate()?;
        output::print_config(&config, cli.format);
        return Ok(());
    }

    let storage_config = StorageConfig::default().with_data_dir(cli.data_dir.clone());
    let storage = Arc::new(SledStorage::new(&storage_config)?);
    info!(data_dir = %storage_config.data_dir, "Ledger opened");

    let engine = Arc::new(ReferralEngine::new(storage, config)?);
    dispatch(engine, cli.command, cli.format).await
}

/// Execute one command against an engine
pub async fn dispatch<S: LedgerStorage + 'static>(
    engine: Arc<ReferralEngine<S>>,
    command: Commands,
    format: OutputFormat,
) -> CliResult<()> {
    match command {
        Commands::Run { job } => handle_run(&engine, job, format).await,
        Commands::Serve => handle_serve(engine).await,
        Commands::Import { file } => handle_import(&engine, &file, format).await,
        Commands::Query(cmd) => handle_query(&engine, cmd, format).await,
        Commands::Stats => {
            let stats = engine.stats().await?;
            output::print_stats(&stats, format);
            Ok(())
        }
        Commands::Config => {
            output::print_config(engine.config(), format);
            Ok(())
        }
    }
}

/// Handle `run <job>`
async fn handle_run<S: LedgerStorage>(
    engine: &ReferralEngine<S>,
    job: JobArg,
    format: OutputFormat,
) -> CliResult<()> {
    match job.job() {
        Some(kind) => {
            let report = engine.run_job(kind).await?;
            output::print_report(&report, format);
        }
        None => {
            let reports = engine.run_all().await?;
            output::print_reports(&reports, format);
        }
    }
    Ok(())
}

/// Handle `serve`: schedule every job until Ctrl-C
async fn handle_serve<S: LedgerStorage + 'static>(engine: Arc<ReferralEngine<S>>) -> CliResult<()> {
    let schedule = engine.config().schedule.clone();
    output::print_info("Starting referral engine runner...");
    output::print_info(&format!(
        "  Intervals (s): leadership={} activation={} pool check={} redistribution={}",
        schedule.leadership_interval_secs,
        schedule.activation_interval_secs,
        schedule.pool_interval_secs,
        schedule.redistribution_interval_secs
    ));

    let handle = BackgroundRunner::new(engine).start().await;
    tokio::signal::ctrl_c().await?;

    output::print_info("Shutting down...");
    handle.stop().await;
    Ok(())
}

/// Handle `import --file`
async fn handle_import<S: LedgerStorage>(
    engine: &ReferralEngine<S>,
    file: &Path,
    format: OutputFormat,
) -> CliResult<()> {
    let seed = LedgerSeed::from_file(file)?;
    let summary = seed.import(engine.storage().as_ref()).await?;
    output::print_import(&summary, format);
    Ok(())
}

/// Handle query commands
async fn handle_query<S: LedgerStorage>(
    engine: &ReferralEngine<S>,
    cmd: QueryCommands,
    format: OutputFormat,
) -> CliResult<()> {
    match cmd {
        QueryCommands::Holders { tier } => {
            let holders = match tier {
                Some(name) => {
                    let tier = parse_tier(&name)?;
                    let mut holders = BTreeMap::new();
                    holders.insert(tier, engine.badge_holders(tier).await?);
                    holders
                }
                None => engine.all_badge_holders().await?,
            };
            output::print_holders(&holders, format);
        }
        QueryCommands::Badges { member } => {
            let member = MemberId(member);
            let tokens = engine.member_badges(member).await?;
            output::print_badges(member, &tokens, format);
        }
        QueryCommands::Snapshot { member } => {
            let snapshot = engine
                .rank_snapshot(MemberId(member))
                .await?
                .ok_or_else(|| CliError::not_found(format!("rank snapshot of member {}", member)))?;
            output::print_snapshot(&snapshot, format);
        }
        QueryCommands::Balance { member } => {
            let member = MemberId(member);
            let balance = engine.member_balance(member).await?;
            let earnings = engine.earning_balance(member).await?;
            output::print_balance(balance, &earnings, format);
        }
        QueryCommands::Chains => {
            let chains = engine.redistribution_chains().await?;
            output::print_chains(&chains, format);
        }
    }
    Ok(())
}

/// Parse a badge tier argument
pub fn parse_tier(name: &str) -> CliResult<BadgeTier> {
    BadgeTier::parse(name)
        .ok_or_else(|| CliError::invalid_arg(format!("unknown badge tier: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tier() {
        assert_eq!(parse_tier("7").unwrap(), BadgeTier::SevenStar);
        assert_eq!(parse_tier("mega").unwrap(), BadgeTier::Mega);
        assert_eq!(parse_tier("4").unwrap_err().exit_code(), 2);
    }
}
