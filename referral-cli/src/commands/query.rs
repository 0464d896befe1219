//! Query Commands
//!
//! Read-only views of the ledger.

use clap::Subcommand;

/// Query subcommands
#[derive(Subcommand, Debug)]
pub enum QueryCommands {
    /// Members holding an unconsumed badge token
    Holders {
        /// Badge tier (3, 5, 7, mega, giga); every tier when omitted
        #[arg(short, long)]
        tier: Option<String>,
    },

    /// Badge tokens of a member
    Badges {
        /// Member ID
        #[arg(short, long)]
        member: u64,
    },

    /// Rank snapshot of a member
    Snapshot {
        /// Member ID
        #[arg(short, long)]
        member: u64,
    },

    /// Transaction balance and earning totals of a member
    Balance {
        /// Member ID
        #[arg(short, long)]
        member: u64,
    },

    /// Upline chains of earnings pending redistribution
    Chains,
}
