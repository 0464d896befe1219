//! Orders written by the sales/billing subsystem

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::*;

/// Kind of customer that placed the order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CustomerKind {
    #[default]
    Member,
    Guest,
    Staff,
}

/// Completed order carrying a commission amount
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Member the sale is attributed to
    pub member_id: Option<MemberId>,
    pub commission_amount: Decimal,
    pub leadership_status: ProcessingStatus,
    pub chaque_match_status: ProcessingStatus,
    /// When the current distribution claim was taken
    pub claimed_at: Option<Timestamp>,
    pub payment_confirmed: bool,
    pub commission_distributed: bool,
    pub tax_done: bool,
    pub deleted: bool,
    pub customer_kind: CustomerKind,
    pub created_at: Timestamp,
}

impl Order {
    /// Create a confirmed order awaiting distribution
    pub fn confirmed(id: OrderId, member_id: MemberId, commission_amount: Decimal) -> Self {
        Self {
            id,
            member_id: Some(member_id),
            commission_amount,
            leadership_status: ProcessingStatus::Pending,
            chaque_match_status: ProcessingStatus::Pending,
            claimed_at: None,
            payment_confirmed: true,
            commission_distributed: false,
            tax_done: false,
            deleted: false,
            customer_kind: CustomerKind::Member,
            created_at: Utc::now(),
        }
    }

    pub fn leadership_done(&self) -> bool {
        self.leadership_status.is_done()
    }

    pub fn chaque_match_done(&self) -> bool {
        self.chaque_match_status.is_done()
    }

    /// Whether the order belongs to the leadership distributor's candidate set
    pub fn is_distribution_candidate(&self, stale_before: Timestamp) -> bool {
        self.payment_confirmed
            && self.member_id.is_some()
            && !self.commission_distributed
            && !self.tax_done
            && !self.deleted
            && self.chaque_match_status != ProcessingStatus::Done
            && self
                .leadership_status
                .is_claimable(self.claimed_at, stale_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_candidate_filter() {
        let stale_before = Utc::now() - Duration::minutes(30);
        let mut order = Order::confirmed(OrderId(1), MemberId(2), Decimal::new(100, 0));
        assert!(order.is_distribution_candidate(stale_before));

        order.deleted = true;
        assert!(!order.is_distribution_candidate(stale_before));

        order.deleted = false;
        order.member_id = None;
        assert!(!order.is_distribution_candidate(stale_before));

        order.member_id = Some(MemberId(2));
        order.leadership_status = ProcessingStatus::Done;
        assert!(!order.is_distribution_candidate(stale_before));
    }

    #[test]
    fn test_fresh_claim_is_not_candidate() {
        let stale_before = Utc::now() - Duration::minutes(30);
        let mut order = Order::confirmed(OrderId(1), MemberId(2), Decimal::new(100, 0));
        order.leadership_status = ProcessingStatus::InProgress;
        order.claimed_at = Some(Utc::now());
        assert!(!order.is_distribution_candidate(stale_before));
    }
}
