//! Output Formatting
//!
//! Utilities for formatting CLI output in various formats.

use referral_core::{
    BadgeTier, BadgeToken, BatchReport, EarningBalance, EngineConfig, ItemStatus, MemberId,
    RankSnapshot, RedistributionChain, StorageStats,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::commands::OutputFormat;
use crate::seed::ImportSummary;

/// Format and print data based on output format
pub fn print_output<T: Serialize>(data: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(data),
        OutputFormat::Table | OutputFormat::Plain => print_json(data),
    }
}

fn print_json<T: Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error formatting JSON: {}", e),
    }
}

/// Print a job report
pub fn print_report(report: &BatchReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Plain => {
            println!(
                "{} candidates={} processed={} skipped={} failed={} total={}",
                report.job,
                report.candidates,
                report.processed,
                report.skipped,
                report.failed,
                report.total_amount
            );
        }
        OutputFormat::Table => {
            let title = format!("Job: {}", report.job);
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
            print_row("Candidates", &report.candidates.to_string());
            print_row("Processed", &report.processed.to_string());
            print_row("Skipped", &report.skipped.to_string());
            print_row("Failed", &report.failed.to_string());
            print_row("Total amount", &report.total_amount.to_string());

            if !report.amounts.is_empty() {
                println!();
                println!("Amounts:");
                for (key, amount) in &report.amounts {
                    print_row(&format!("  {}", key), &amount.to_string());
                }
            }
            if !report.counts.is_empty() {
                println!();
                println!("Counts:");
                for (key, count) in &report.counts {
                    print_row(&format!("  {}", key), &count.to_string());
                }
            }

            let problems: Vec<_> = report
                .items
                .iter()
                .filter(|i| i.status == ItemStatus::Failed)
                .collect();
            if !problems.is_empty() {
                println!();
                println!("Failures:");
                for item in problems {
                    println!(
                        "  - {} [{}] {}",
                        item.id,
                        item.stage.as_deref().unwrap_or("-"),
                        item.detail.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }
}

/// Print several job reports
pub fn print_reports(reports: &[BatchReport], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&reports),
        OutputFormat::Table | OutputFormat::Plain => {
            for (i, report) in reports.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_report(report, format);
            }
        }
    }
}

/// Print ledger statistics
pub fn print_stats(stats: &StorageStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("Ledger Statistics");
            println!("=================");
            print_row("Members", &stats.total_members.to_string());
            print_row("  free", &stats.free_members.to_string());
            print_row("  paid", &stats.paid_members.to_string());
            print_row("Orders", &stats.total_orders.to_string());
            print_row("  pending", &stats.pending_orders.to_string());
            print_row("  distributed", &stats.distributed_orders.to_string());
            print_row("Earnings", &stats.total_earnings.to_string());
            print_row("Pool entries", &stats.total_pool_entries.to_string());
            print_row("  inactive", &stats.inactive_pool_entries.to_string());
            print_row("Transactions", &stats.total_transactions.to_string());
            print_row("Rank snapshots", &stats.rank_snapshots.to_string());
            println!();
            println!("Unconsumed tokens:");
            for tier in BadgeTier::all() {
                let count = stats.unconsumed_tokens.get(&tier).copied().unwrap_or(0);
                print_row(&format!("  {}", tier), &count.to_string());
            }
        }
    }
}

/// Print badge holders per tier
pub fn print_holders(holders: &BTreeMap<BadgeTier, Vec<MemberId>>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(holders),
        OutputFormat::Table => {
            println!("Badge Holders");
            println!("=============");
            for (tier, members) in holders {
                print_row(&tier.to_string(), &join_ids(members));
            }
        }
        OutputFormat::Plain => {
            for (tier, members) in holders {
                println!("{} {}", tier, join_ids(members));
            }
        }
    }
}

/// Print the badge tokens of a member
pub fn print_badges(member: MemberId, tokens: &[BadgeToken], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&tokens),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("Badges of member {}", member);
            print_separator();
            if tokens.is_empty() {
                println!("(none)");
            }
            for token in tokens {
                let state = if token.consumed { "consumed" } else { "held" };
                println!(
                    "{:<8} {:<12} {:<10} [{}]",
                    token.id.to_string(),
                    token.tier.to_string(),
                    state,
                    join(&token.payload)
                );
            }
        }
    }
}

/// Print a rank snapshot
pub fn print_snapshot(snapshot: &RankSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(snapshot),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("Rank snapshot of member {}", snapshot.member_id);
            print_separator();
            print_row("Referrer", &opt_id(snapshot.referrer_id));
            for tier in BadgeTier::all() {
                print_row(&tier.to_string(), &opt_id(snapshot.ancestor_for(tier)));
            }
            print_row("Taken at", &snapshot.created_at.to_rfc3339());
        }
    }
}

/// Print a member's balances
pub fn print_balance(balance: Decimal, earnings: &EarningBalance, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "member": earnings.member,
            "balance": balance,
            "earnings": earnings,
        })),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("Balance of member {}", earnings.member);
            print_separator();
            print_row("Transactions", &balance.to_string());
            print_row("Earnings", &earnings.total.to_string());
            for (category, amount) in &earnings.by_category {
                print_row(&format!("  {}", category), &amount.to_string());
            }
        }
    }
}

/// Print redistribution chains
pub fn print_chains(chains: &[RedistributionChain], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&chains),
        OutputFormat::Table | OutputFormat::Plain => {
            if chains.is_empty() {
                println!("No earnings pending redistribution");
            }
            for chain in chains {
                println!(
                    "earning {} (member {}): {}",
                    chain.earning_id,
                    chain.user_id,
                    join_ids(&chain.chain)
                );
            }
        }
    }
}

/// Print an import summary
pub fn print_import(summary: &ImportSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("Imported");
            print_separator();
            print_row("Members", &summary.members.to_string());
            print_row("Orders", &summary.orders.to_string());
            print_row("Packages", &summary.packages.to_string());
            print_row("Transactions", &summary.transactions.to_string());
            print_row("Badge tokens", &summary.badge_tokens.to_string());
        }
    }
}

/// Print the engine configuration
pub fn print_config(config: &EngineConfig, format: OutputFormat) {
    print_output(config, format);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{}", message);
}

/// Print a table row
pub fn print_row(key: &str, value: &str) {
    println!("{:<20} {}", key, value);
}

/// Print a separator line
pub fn print_separator() {
    println!("{}", "-".repeat(40));
}

fn opt_id(id: Option<MemberId>) -> String {
    id.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string())
}

fn join_ids(ids: &[MemberId]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", ")
}

fn join(ids: &[u64]) -> String {
    ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}
