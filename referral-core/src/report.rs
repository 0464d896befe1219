//! Run Reports
//!
//! Every job run produces a [`BatchReport`]: one [`ItemOutcome`] per
//! candidate plus totals and named breakdowns. A failing candidate is
//! recorded here instead of aborting the run.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::EngineError;
use crate::types::Timestamp;

/// Scheduled job kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Leadership,
    GlobalPool,
    Redistribution,
    Activation,
}

impl JobKind {
    pub fn all() -> [JobKind; 4] {
        [
            JobKind::Leadership,
            JobKind::GlobalPool,
            JobKind::Redistribution,
            JobKind::Activation,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Leadership => "leadership",
            JobKind::GlobalPool => "global_pool",
            JobKind::Redistribution => "redistribution",
            JobKind::Activation => "activation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "leadership" => Some(JobKind::Leadership),
            "pool" | "global_pool" => Some(JobKind::GlobalPool),
            "redistribution" => Some(JobKind::Redistribution),
            "activation" => Some(JobKind::Activation),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// All writes for the candidate landed
    Processed,
    /// Nothing to do (already claimed, below threshold, ...)
    Skipped,
    /// Caught failure; the candidate is left for a later run
    Failed,
}

/// Per-candidate record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemOutcome {
    /// Candidate id (order, member, earning)
    pub id: u64,
    pub status: ItemStatus,
    /// Stage reached when the candidate was skipped or failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Amount written for this candidate
    pub amount: Decimal,
}

impl ItemOutcome {
    pub fn processed(id: u64, amount: Decimal) -> Self {
        Self {
            id,
            status: ItemStatus::Processed,
            stage: None,
            detail: None,
            amount,
        }
    }

    pub fn skipped(id: u64, stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id,
            status: ItemStatus::Skipped,
            stage: Some(stage.into()),
            detail: Some(detail.into()),
            amount: Decimal::ZERO,
        }
    }

    pub fn failed(id: u64, stage: impl Into<String>, error: &EngineError) -> Self {
        Self {
            id,
            status: ItemStatus::Failed,
            stage: Some(stage.into()),
            detail: Some(error.to_string()),
            amount: Decimal::ZERO,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// JSON-shaped summary of a job run
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub job: JobKind,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub candidates: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_amount: Decimal,
    /// Named amounts, e.g. per badge tier or per leadership slot
    pub amounts: BTreeMap<String, Decimal>,
    /// Named counters, e.g. tokens minted per tier or holders per tier
    pub counts: BTreeMap<String, u64>,
    pub items: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn new(job: JobKind) -> Self {
        Self {
            job,
            started_at: Utc::now(),
            finished_at: None,
            candidates: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            total_amount: Decimal::ZERO,
            amounts: BTreeMap::new(),
            counts: BTreeMap::new(),
            items: Vec::new(),
        }
    }

    /// Record a candidate outcome
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome.status {
            ItemStatus::Processed => self.processed += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed => self.failed += 1,
        }
        self.total_amount += outcome.amount;
        self.items.push(outcome);
    }

    pub fn add_amount(&mut self, key: impl Into<String>, amount: Decimal) {
        *self.amounts.entry(key.into()).or_insert(Decimal::ZERO) += amount;
    }

    pub fn add_count(&mut self, key: impl Into<String>, n: u64) {
        *self.counts.entry(key.into()).or_insert(0) += n;
    }

    pub fn amount(&self, key: &str) -> Decimal {
        self.amounts.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Outcome recorded for a candidate id
    pub fn item(&self, id: u64) -> Option<&ItemOutcome> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
