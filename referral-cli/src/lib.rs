//! Referral CLI - Command Line Interface
//!
//! Runs the referral commission engine against a local sled ledger.
//!
//! # Usage
//!
//! ```text
//! referral [OPTIONS] <COMMAND>
//!
//! Commands:
//!   run      Run an engine job once and print its report
//!   serve    Run every job on its configured schedule until interrupted
//!   import   Load members, orders, packages, transactions and tokens from a JSON file
//!   query    Query ledger state
//!   stats    Show ledger statistics
//!   config   Print the effective engine configuration
//!
//! Options:
//!   -d, --data-dir <DIR>   Ledger data directory [default: ./referral_data]
//!   -f, --format <FORMAT>  Output format (json, table, plain) [default: table]
//!   -v, --verbose          Enable verbose output
//! ```
//!
//! # Examples
//!
//! ## Distribute pending orders
//! ```text
//! referral run leadership
//! ```
//!
//! ## Monthly pool as JSON
//! ```text
//! referral -f json run pool
//! ```
//!
//! ## Seven-star holders
//! ```text
//! referral query holders --tier 7
//! ```

pub mod commands;
pub mod error;
pub mod handler;
pub mod output;
pub mod seed;

pub use commands::{Cli, Commands, JobArg, OutputFormat};
pub use error::{CliError, CliResult};
pub use seed::{ImportSummary, LedgerSeed};

/// CLI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
