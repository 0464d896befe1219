//! Chaque-Match Sub-Distribution
//!
//! Re-splits one leadership payout across the recipient's own upline,
//! seven levels deep. Each level searches for the next paid ancestor above
//! the previous level's candidate; a candidate failing the level's badge
//! requirement is replaced by the house account, but the level still counts.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::storage::LedgerStorage;
use crate::types::{BadgeTier, Earning, EarningId, Member};
use crate::upline::{UplineMatch, UplinePredicate, UplineResolver};

/// Number of chaque-match levels
pub const CHAQUE_LEVELS: usize = 7;

/// Payout fraction of a level (1-based): 15% for levels 1-6, 10% for level 7
pub fn level_ratio(level: usize) -> Decimal {
    if level == CHAQUE_LEVELS {
        Decimal::new(10, 2)
    } else {
        Decimal::new(15, 2)
    }
}

/// What a paid candidate must satisfy at a level (1-based) to keep the payout
pub fn level_requirement(level: usize) -> UplinePredicate {
    match level {
        1 => UplinePredicate::IsEligible,
        2 | 3 => UplinePredicate::HoldsBadge(BadgeTier::ThreeStar),
        4 | 5 => UplinePredicate::HoldsBadge(BadgeTier::FiveStar),
        _ => UplinePredicate::HoldsBadge(BadgeTier::SevenStar),
    }
}

/// One resolved chaque-match level
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaqueLevel {
    pub level: usize,
    pub candidate: Member,
    /// `false` when the payout went to the house account
    pub eligible: bool,
    pub earning: Earning,
}

/// Chaque-match planner
pub struct ChaqueMatch<'a, S: LedgerStorage + ?Sized> {
    storage: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: LedgerStorage + ?Sized> ChaqueMatch<'a, S> {
    pub fn new(storage: &'a S, config: &'a EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Plan the sub-distribution of `trigger`.
    ///
    /// Returns one earning per resolved level; nothing is written here, the
    /// caller adds the earnings to the order's batch.
    pub async fn plan(&self, trigger: &Earning) -> EngineResult<Vec<ChaqueLevel>> {
        let resolver = UplineResolver::from_config(self.storage, self.config);
        let mut levels = Vec::new();
        let mut cursor = trigger.user_id;

        for level in 1..=CHAQUE_LEVELS {
            let Some(found) = resolver
                .find_ancestor_or_house(
                    cursor,
                    UplinePredicate::IsPaid,
                    level_requirement(level),
                    self.config.chaque_search_depth,
                )
                .await?
            else {
                debug!(
                    earning = %trigger.id,
                    level,
                    "No paid ancestor, chaque-match stops"
                );
                break;
            };
            let UplineMatch {
                candidate,
                qualified: eligible,
                recipient,
            } = found;

            let amount = trigger.amount * level_ratio(level);
            let mut earning = Earning::credit(
                EarningId(self.storage.next_id().await?),
                recipient,
                format!("chaque_match_l{}", level),
                amount,
            )
            .with_trigger_user(trigger.user_id)
            .with_trigger_earning(trigger.id);
            if let Some(order_id) = trigger.order_id {
                earning = earning.with_order(order_id);
            }

            debug!(
                earning = %trigger.id,
                level,
                candidate = %candidate.id,
                recipient = %recipient,
                eligible,
                amount = %amount,
                "Chaque-match level resolved"
            );

            cursor = candidate.id;
            levels.push(ChaqueLevel {
                level,
                candidate,
                eligible,
                earning,
            });
        }

        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LedgerBatch, LedgerWrite, MemoryStorage};
    use crate::types::{BadgeToken, MemberId, TokenId};

    #[test]
    fn test_level_ratios_sum_to_one() {
        let total: Decimal = (1..=CHAQUE_LEVELS).map(level_ratio).sum();
        assert_eq!(total, Decimal::ONE);
    }

    /// Paid chain 1 <- 2 <- ... <- 9; the trigger recipient is 9
    async fn chain() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
        for id in 2..=9u64 {
            storage
                .save_member(&Member::paid(MemberId(id), Some(MemberId(id - 1))))
                .await
                .unwrap();
        }
        storage
    }

    async fn grant(storage: &MemoryStorage, tier: BadgeTier, members: &[u64]) {
        let mut batch = LedgerBatch::new("grant");
        for (i, member) in members.iter().enumerate() {
            batch.push(LedgerWrite::InsertBadgeToken(BadgeToken::new(
                TokenId(1_000 + tier as u64 * 100 + i as u64),
                tier,
                MemberId(*member),
                vec![],
            )));
        }
        storage.apply(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_level_two_without_badge_goes_to_house() {
        let storage = chain().await;
        let config = EngineConfig::default().with_house_account(MemberId(99));
        // level 3 candidate (member 6) holds 3★, level 2 candidate (member 7) does not
        grant(&storage, BadgeTier::ThreeStar, &[6]).await;

        let trigger = Earning::credit(
            EarningId(500),
            MemberId(9),
            "leadership_tier3",
            Decimal::new(100, 0),
        );
        let levels = ChaqueMatch::new(&storage, &config).plan(&trigger).await.unwrap();

        assert_eq!(levels.len(), CHAQUE_LEVELS);
        assert_eq!(levels[0].earning.user_id, MemberId(8));
        assert_eq!(levels[1].candidate.id, MemberId(7));
        assert!(!levels[1].eligible);
        assert_eq!(levels[1].earning.user_id, MemberId(99));
        assert_eq!(levels[2].candidate.id, MemberId(6));
        assert_eq!(levels[2].earning.user_id, MemberId(6));

        let total: Decimal = levels.iter().map(|l| l.earning.amount).sum();
        assert_eq!(total, Decimal::new(100, 0));
        assert_eq!(levels[6].earning.amount, Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn test_stops_at_first_missing_candidate() {
        let storage = MemoryStorage::new();
        let config = EngineConfig::default();
        storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
        storage.save_member(&Member::paid(MemberId(2), Some(MemberId(1)))).await.unwrap();
        storage.save_member(&Member::paid(MemberId(3), Some(MemberId(2)))).await.unwrap();

        let trigger = Earning::credit(
            EarningId(500),
            MemberId(3),
            "leadership_tier5",
            Decimal::new(40, 0),
        );
        let levels = ChaqueMatch::new(&storage, &config).plan(&trigger).await.unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].earning.trigger_earning_id, Some(EarningId(500)));
    }

    #[tokio::test]
    async fn test_free_parent_ends_walk_with_unit_depth() {
        let storage = MemoryStorage::new();
        storage.save_member(&Member::paid(MemberId(1), None)).await.unwrap();
        storage.save_member(&Member::new(MemberId(2), Some(MemberId(1)))).await.unwrap();
        storage.save_member(&Member::paid(MemberId(3), Some(MemberId(2)))).await.unwrap();
        let trigger = Earning::credit(EarningId(500), MemberId(3), "x", Decimal::new(10, 0));

        let config = EngineConfig::default();
        let levels = ChaqueMatch::new(&storage, &config).plan(&trigger).await.unwrap();
        assert!(levels.is_empty());

        let mut deeper = EngineConfig::default();
        deeper.chaque_search_depth = 2;
        let levels = ChaqueMatch::new(&storage, &deeper).plan(&trigger).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].candidate.id, MemberId(1));
    }

    #[tokio::test]
    async fn test_inactive_level_one_goes_to_house() {
        let storage = chain().await;
        let config = EngineConfig::default().with_house_account(MemberId(99));
        let mut eight = storage.get_member(MemberId(8)).await.unwrap().unwrap();
        eight.active = false;
        storage.save_member(&eight).await.unwrap();

        let trigger =
            Earning::credit(EarningId(500), MemberId(9), "leadership_tier3", Decimal::new(20, 0));
        let levels = ChaqueMatch::new(&storage, &config).plan(&trigger).await.unwrap();

        // still paid, so it is the level-1 candidate, but inactive
        assert_eq!(levels[0].candidate.id, MemberId(8));
        assert!(!levels[0].eligible);
        assert_eq!(levels[0].earning.user_id, MemberId(99));
        assert_eq!(levels[0].earning.amount, Decimal::new(3, 0));
        // walk continues from member 8
        assert_eq!(levels[1].candidate.id, MemberId(7));
    }

    #[tokio::test]
    async fn test_upper_levels_require_five_and_seven_star() {
        let storage = chain().await;
        let config = EngineConfig::default().with_house_account(MemberId(99));
        // levels: L1=8 L2=7 L3=6 L4=5 L5=4 L6=3 L7=2
        grant(&storage, BadgeTier::ThreeStar, &[7, 6, 4]).await;
        grant(&storage, BadgeTier::FiveStar, &[5, 2]).await;
        grant(&storage, BadgeTier::SevenStar, &[3]).await;

        let trigger =
            Earning::credit(EarningId(500), MemberId(9), "leadership_tier7", Decimal::new(100, 0));
        let levels = ChaqueMatch::new(&storage, &config).plan(&trigger).await.unwrap();
        assert_eq!(levels.len(), CHAQUE_LEVELS);

        let recipients: Vec<MemberId> = levels.iter().map(|l| l.earning.user_id).collect();
        assert_eq!(
            recipients,
            vec![
                MemberId(8),
                MemberId(7),
                MemberId(6),
                MemberId(5),
                // 3★ only at a 5★ level
                MemberId(99),
                MemberId(3),
                // 5★ only at a 7★ level
                MemberId(99),
            ]
        );
        assert_eq!(levels[4].candidate.id, MemberId(4));
        assert_eq!(levels[6].candidate.id, MemberId(2));
    }
}
