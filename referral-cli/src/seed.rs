//! Ledger Seed Files
//!
//! JSON documents used by `referral import` to load existing records into
//! a ledger. Every section is optional.

use referral_core::{
    BadgeToken, LedgerBatch, LedgerStorage, LedgerWrite, Member, Order, Package, Transaction,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::CliResult;

/// Records to import
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSeed {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub badge_tokens: Vec<BadgeToken>,
}

/// Number of records imported per section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub members: usize,
    pub orders: usize,
    pub packages: usize,
    pub transactions: usize,
    pub badge_tokens: usize,
}

impl LedgerSeed {
    pub fn from_file(path: &Path) -> CliResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write every record; tokens go through one batch so a duplicate id
    /// rejects the whole token section.
    pub async fn import<S: LedgerStorage + ?Sized>(&self, storage: &S) -> CliResult<ImportSummary> {
        for member in &self.members {
            storage.save_member(member).await?;
        }
        for order in &self.orders {
            storage.save_order(order).await?;
        }
        for package in &self.packages {
            storage.save_package(package).await?;
        }
        for transaction in &self.transactions {
            storage.save_transaction(transaction).await?;
        }
        if !self.badge_tokens.is_empty() {
            let mut batch = LedgerBatch::new("import:badge_tokens");
            batch.extend(
                self.badge_tokens
                    .iter()
                    .cloned()
                    .map(LedgerWrite::InsertBadgeToken),
            );
            storage.apply(batch).await?;
        }

        let summary = ImportSummary {
            members: self.members.len(),
            orders: self.orders.len(),
            packages: self.packages.len(),
            transactions: self.transactions.len(),
            badge_tokens: self.badge_tokens.len(),
        };
        info!(?summary, "Ledger seed imported");
        Ok(summary)
    }
}
