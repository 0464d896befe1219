//! Badge tiers and tokens

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::*;

/// Badge tier, ordered from lowest to highest
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTier {
    ThreeStar,
    FiveStar,
    SevenStar,
    Mega,
    Giga,
}

impl BadgeTier {
    /// All tiers in promotion order
    pub fn all() -> [BadgeTier; 5] {
        [
            BadgeTier::ThreeStar,
            BadgeTier::FiveStar,
            BadgeTier::SevenStar,
            BadgeTier::Mega,
            BadgeTier::Giga,
        ]
    }

    /// Number of source tokens consumed to mint one token of this tier
    pub fn batch_size(&self) -> usize {
        match self {
            BadgeTier::ThreeStar => 2,
            BadgeTier::FiveStar => 5,
            BadgeTier::SevenStar => 7,
            BadgeTier::Mega => 10,
            BadgeTier::Giga => 10,
        }
    }

    /// Tier consumed to mint this tier; `None` means raw referral slots
    pub fn source(&self) -> Option<BadgeTier> {
        match self {
            BadgeTier::ThreeStar => None,
            BadgeTier::FiveStar => Some(BadgeTier::ThreeStar),
            BadgeTier::SevenStar => Some(BadgeTier::FiveStar),
            BadgeTier::Mega => Some(BadgeTier::SevenStar),
            BadgeTier::Giga => Some(BadgeTier::Mega),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BadgeTier::ThreeStar => "three_star",
            BadgeTier::FiveStar => "five_star",
            BadgeTier::SevenStar => "seven_star",
            BadgeTier::Mega => "mega",
            BadgeTier::Giga => "giga",
        }
    }

    /// Parse from a tier name (accepts `3`, `3star`, `three_star`, ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "3" | "3star" | "3_star" | "three_star" => Some(BadgeTier::ThreeStar),
            "5" | "5star" | "5_star" | "five_star" => Some(BadgeTier::FiveStar),
            "7" | "7star" | "7_star" | "seven_star" => Some(BadgeTier::SevenStar),
            "mega" => Some(BadgeTier::Mega),
            "giga" => Some(BadgeTier::Giga),
            _ => None,
        }
    }
}

impl fmt::Display for BadgeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Badge token held by a member
///
/// `payload` lists the ids consumed to mint it: member ids for
/// three-star tokens, token ids of the tier below otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeToken {
    pub id: TokenId,
    pub tier: BadgeTier,
    pub user_id: MemberId,
    pub consumed: bool,
    pub payload: Vec<u64>,
    pub created_at: Timestamp,
}

impl BadgeToken {
    pub fn new(id: TokenId, tier: BadgeTier, user_id: MemberId, payload: Vec<u64>) -> Self {
        Self {
            id,
            tier,
            user_id,
            consumed: false,
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_chain() {
        assert_eq!(BadgeTier::ThreeStar.source(), None);
        assert_eq!(BadgeTier::Giga.source(), Some(BadgeTier::Mega));
        let sizes: Vec<usize> = BadgeTier::all().iter().map(|t| t.batch_size()).collect();
        assert_eq!(sizes, vec![2, 5, 7, 10, 10]);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!(BadgeTier::parse("7star"), Some(BadgeTier::SevenStar));
        assert_eq!(BadgeTier::parse("MEGA"), Some(BadgeTier::Mega));
        assert_eq!(BadgeTier::parse("nine"), None);
    }
}
