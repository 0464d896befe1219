//! CLI Commands Module
//!
//! Command definitions for the referral CLI.

pub mod query;

use clap::{Parser, Subcommand, ValueEnum};
use referral_core::JobKind;
use std::path::PathBuf;

/// Referral Commission Engine CLI
#[derive(Parser, Debug)]
#[command(name = "referral")]
#[command(version)]
#[command(about = "Referral commission and rank engine")]
#[command(long_about = "Runs the referral engine jobs against a local ledger.\n\n\
    Use this tool to distribute leadership commission and the monthly global \
    pool, activate members, and inspect badges, snapshots and balances.")]
pub struct Cli {
    /// Ledger data directory (env: REFERRAL_DATA_DIR)
    #[arg(short, long, env = "REFERRAL_DATA_DIR", default_value = "./referral_data")]
    pub data_dir: String,

    /// Output format (json, table, plain)
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Table format (human-readable)
    #[default]
    Table,
    /// Plain text
    Plain,
}

/// Job selector for `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobArg {
    Leadership,
    Pool,
    Redistribution,
    Activation,
    /// Every job in dependency order
    All,
}

impl JobArg {
    /// The single job, `None` for `all`
    pub fn job(&self) -> Option<JobKind> {
        match self {
            JobArg::Leadership => Some(JobKind::Leadership),
            JobArg::Pool => Some(JobKind::GlobalPool),
            JobArg::Redistribution => Some(JobKind::Redistribution),
            JobArg::Activation => Some(JobKind::Activation),
            JobArg::All => None,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an engine job once and print its report
    Run {
        /// Job to run
        #[arg(value_enum)]
        job: JobArg,
    },

    /// Run every job on its configured schedule until interrupted
    Serve,

    /// Load members, orders, packages, transactions and tokens from a JSON file
    Import {
        /// Path to the ledger seed file
        #[arg(short = 'i', long)]
        file: PathBuf,
    },

    /// Query ledger state
    #[command(subcommand)]
    Query(query::QueryCommands),

    /// Show ledger statistics
    Stats,

    /// Print the effective engine configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_help() {
        let result = Cli::try_parse_from(["referral", "--help"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["referral", "-f", "json", "run", "pool"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run { job } => assert_eq!(job.job(), Some(JobKind::GlobalPool)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_all() {
        let cli = Cli::try_parse_from(["referral", "run", "all"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { job: JobArg::All }));
    }
}
