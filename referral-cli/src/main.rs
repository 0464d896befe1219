//! Referral CLI Entry Point
//!
//! Configuration is loaded from environment variables (via .env file).
//! Command-line arguments override environment variables.
//!
//! Usage:
//!   referral run <job>   - Run one job (or `all`) and print its report
//!   referral serve       - Run every job on its schedule
//!   referral import      - Load records from a JSON seed file
//!   referral query       - Inspect holders, badges, snapshots, balances
//!   referral stats       - Show ledger statistics

use clap::Parser;
use referral_cli::{handler, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.verbose {
        init_logging();
    }

    if let Err(e) = handler::run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Initialize logging with tracing
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "referral_cli=debug,referral_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
