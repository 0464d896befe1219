//! Balances read from the ledger

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::storage::LedgerStorage;
use crate::types::{EarningCategory, MemberId};

/// Spendable balance: credits minus debits of transactions addressed to the member.
///
/// May be negative; callers deciding on activation treat negative as zero.
pub async fn member_balance<S: LedgerStorage + ?Sized>(
    storage: &S,
    member: MemberId,
) -> EngineResult<Decimal> {
    Ok(storage
        .list_transactions_to(member)
        .await?
        .iter()
        .map(|t| t.signed_amount())
        .sum())
}

/// Earning balance of a member, per category
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EarningBalance {
    pub member: MemberId,
    pub by_category: BTreeMap<EarningCategory, Decimal>,
    pub total: Decimal,
}

impl EarningBalance {
    pub fn category(&self, category: EarningCategory) -> Decimal {
        self.by_category
            .get(&category)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Credits minus debits of the member's live earnings, grouped by category
pub async fn earning_balance<S: LedgerStorage + ?Sized>(
    storage: &S,
    member: MemberId,
) -> EngineResult<EarningBalance> {
    let mut balance = EarningBalance {
        member,
        ..Default::default()
    };
    for earning in storage.list_earnings_for(member).await? {
        if !earning.is_live() {
            continue;
        }
        let signed = earning.signed_amount();
        *balance
            .by_category
            .entry(earning.category)
            .or_insert(Decimal::ZERO) += signed;
        balance.total += signed;
    }
    Ok(balance)
}
