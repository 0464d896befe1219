//! Ledger rows: earnings, pool entries, transactions and packages
//!
//! All rows are append-only. Only status flags move, and only forward.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::*;

/// Earning category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EarningCategory {
    #[default]
    Earning,
    Withdrawal,
    Redistribution,
}

impl fmt::Display for EarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EarningCategory::Earning => write!(f, "earning"),
            EarningCategory::Withdrawal => write!(f, "withdrawal"),
            EarningCategory::Redistribution => write!(f, "redistribution"),
        }
    }
}

/// Withdrawal workflow state, owned by the wallet collaborator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    #[default]
    None,
    Requested,
    Approved,
    Rejected,
}

/// Redistribution state of a flagged earning
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedistributionState {
    #[default]
    None,
    Pending,
    Done,
}

/// Earning ledger row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earning {
    pub id: EarningId,
    pub user_id: MemberId,
    pub order_id: Option<OrderId>,
    /// Member whose activity produced this row
    pub trigger_user_id: Option<MemberId>,
    /// Earning this row was derived from (chaque-match levels)
    pub trigger_earning_id: Option<EarningId>,
    pub name: String,
    pub category: EarningCategory,
    pub amount: Decimal,
    pub direction: Direction,
    pub withdrawal_state: WithdrawalState,
    pub redistribution_state: RedistributionState,
    pub active: bool,
    pub deleted: bool,
    pub consumed: bool,
    pub created_at: Timestamp,
}

impl Earning {
    /// Create an active credit earning
    pub fn credit(
        id: EarningId,
        user_id: MemberId,
        name: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            id,
            user_id,
            order_id: None,
            trigger_user_id: None,
            trigger_earning_id: None,
            name: name.into(),
            category: EarningCategory::Earning,
            amount,
            direction: Direction::Credit,
            withdrawal_state: WithdrawalState::None,
            redistribution_state: RedistributionState::None,
            active: true,
            deleted: false,
            consumed: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_trigger_user(mut self, user_id: MemberId) -> Self {
        self.trigger_user_id = Some(user_id);
        self
    }

    pub fn with_trigger_earning(mut self, earning_id: EarningId) -> Self {
        self.trigger_earning_id = Some(earning_id);
        self
    }

    pub fn with_category(mut self, category: EarningCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Counts toward balances
    pub fn is_live(&self) -> bool {
        self.active && !self.deleted
    }

    /// Amount with the direction's sign applied
    pub fn signed_amount(&self) -> Decimal {
        self.amount * Decimal::from(self.direction.signum())
    }
}

/// Pending slice of commission waiting for the monthly distribution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub id: PoolEntryId,
    pub user_id: MemberId,
    pub order_id: OrderId,
    pub trigger_user_id: MemberId,
    pub amount: Decimal,
    /// `false` until the monthly distributor has processed it
    pub active: bool,
    pub consumed: bool,
    pub created_at: Timestamp,
}

/// General ledger transaction, used for member balances
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub to_user_id: MemberId,
    pub from_user_id: Option<MemberId>,
    pub amount: Decimal,
    pub direction: Direction,
    pub note: String,
    pub created_at: Timestamp,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        to_user_id: MemberId,
        amount: Decimal,
        direction: Direction,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id,
            to_user_id,
            from_user_id: None,
            amount,
            direction,
            note: note.into(),
            created_at: Utc::now(),
        }
    }

    pub fn signed_amount(&self) -> Decimal {
        self.amount * Decimal::from(self.direction.signum())
    }
}

/// Membership package with an optional validity window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub amount: Decimal,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub created_at: Timestamp,
}

impl Package {
    /// Whether `day` lies inside the validity window (bounds inclusive, open ends allowed)
    pub fn is_valid_on(&self, day: NaiveDate) -> bool {
        self.valid_from.map_or(true, |from| day >= from)
            && self.valid_until.map_or(true, |until| day <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_amounts() {
        let credit = Earning::credit(EarningId(1), MemberId(1), "x", Decimal::new(10, 0));
        let debit = credit.clone().with_direction(Direction::Debit);
        assert_eq!(credit.signed_amount(), Decimal::new(10, 0));
        assert_eq!(debit.signed_amount(), Decimal::new(-10, 0));
    }

    #[test]
    fn test_package_window() {
        let day = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        let package = Package {
            id: PackageId(1),
            amount: Decimal::new(500, 0),
            valid_from: Some(day(1)),
            valid_until: Some(day(31)),
            created_at: Utc::now(),
        };
        assert!(package.is_valid_on(day(1)));
        assert!(package.is_valid_on(day(31)));
        assert!(!package.is_valid_on(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()));

        let open = Package { valid_from: None, valid_until: None, ..package };
        assert!(open.is_valid_on(day(15)));
    }
}
