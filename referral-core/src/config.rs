//! Engine Configuration
//!
//! Split ratios, fallback accounts and job scheduling.
//! Supports loading from environment variables with the REFERRAL_ prefix.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::types::{BadgeTier, MemberId};

/// Where the unallocated part of the leadership share goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResidueDestination {
    /// Not written anywhere; reported per order and per run
    #[default]
    Unallocated,
    /// Credited to the house account as its own earning row
    HouseAccount,
}

impl ResidueDestination {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unallocated" | "none" | "retain" => Some(Self::Unallocated),
            "house" | "house_account" => Some(Self::HouseAccount),
            _ => None,
        }
    }
}

/// Leadership slot percentages, expressed as fractions of the leadership share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipSplit {
    /// Fraction of the commission sent to the global pool
    pub pool_ratio: Decimal,
    pub referrer: Decimal,
    pub tier3: Decimal,
    pub tier5: Decimal,
    pub tier7: Decimal,
    pub mega: Decimal,
    pub giga: Decimal,
}

impl Default for LeadershipSplit {
    fn default() -> Self {
        Self {
            pool_ratio: Decimal::new(20, 2),
            referrer: Decimal::new(15, 2),
            tier3: Decimal::new(15, 2),
            tier5: Decimal::new(10, 2),
            tier7: Decimal::new(5, 2),
            mega: Decimal::new(2, 2),
            giga: Decimal::new(2, 2),
        }
    }
}

impl LeadershipSplit {
    /// Fraction of the commission forming the leadership share
    pub fn leadership_ratio(&self) -> Decimal {
        Decimal::ONE - self.pool_ratio
    }

    /// Sum of the six slot fractions
    pub fn slot_total(&self) -> Decimal {
        self.referrer + self.tier3 + self.tier5 + self.tier7 + self.mega + self.giga
    }

    /// Fraction of the leadership share not assigned to any slot
    pub fn residue_ratio(&self) -> Decimal {
        Decimal::ONE - self.slot_total()
    }

    /// Slot fractions re-split by chaque-match; those payouts are carved out of the residue
    pub fn chaque_total(&self) -> Decimal {
        self.tier3 + self.tier5 + self.tier7
    }

    /// Slot fraction for a badge tier
    pub fn for_tier(&self, tier: BadgeTier) -> Decimal {
        match tier {
            BadgeTier::ThreeStar => self.tier3,
            BadgeTier::FiveStar => self.tier5,
            BadgeTier::SevenStar => self.tier7,
            BadgeTier::Mega => self.mega,
            BadgeTier::Giga => self.giga,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.pool_ratio < Decimal::ZERO || self.pool_ratio > Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!(
                "pool_ratio {} outside [0, 1]",
                self.pool_ratio
            )));
        }
        let slots = [self.referrer, self.tier3, self.tier5, self.tier7, self.mega, self.giga];
        if slots.iter().any(|s| *s < Decimal::ZERO) {
            return Err(EngineError::InvalidConfig("negative leadership slot".to_string()));
        }
        if self.slot_total() > Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!(
                "leadership slots sum to {} > 1",
                self.slot_total()
            )));
        }
        if self.slot_total() + self.chaque_total() > Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!(
                "chaque-match share {} exceeds leadership residue {}",
                self.chaque_total(),
                self.residue_ratio()
            )));
        }
        Ok(())
    }
}

/// Global pool split across badge tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSplit {
    pub seven_star: Decimal,
    pub mega: Decimal,
    pub giga: Decimal,
}

impl Default for PoolSplit {
    fn default() -> Self {
        Self {
            seven_star: Decimal::new(50, 2),
            mega: Decimal::new(30, 2),
            giga: Decimal::new(20, 2),
        }
    }
}

impl PoolSplit {
    /// (tier, fraction) pairs in distribution order
    pub fn tiers(&self) -> [(BadgeTier, Decimal); 3] {
        [
            (BadgeTier::SevenStar, self.seven_star),
            (BadgeTier::Mega, self.mega),
            (BadgeTier::Giga, self.giga),
        ]
    }

    pub fn validate(&self) -> EngineResult<()> {
        let sum = self.seven_star + self.mega + self.giga;
        if sum != Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!("pool split sums to {} != 1", sum)));
        }
        Ok(())
    }
}

/// Background job intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_leadership_interval")]
    pub leadership_interval_secs: u64,
    #[serde(default = "default_activation_interval")]
    pub activation_interval_secs: u64,
    /// How often the runner checks whether a month has closed
    #[serde(default = "default_pool_interval")]
    pub pool_interval_secs: u64,
    #[serde(default = "default_redistribution_interval")]
    pub redistribution_interval_secs: u64,
}

fn default_leadership_interval() -> u64 {
    300
}

fn default_activation_interval() -> u64 {
    600
}

fn default_pool_interval() -> u64 {
    3_600
}

fn default_redistribution_interval() -> u64 {
    3_600
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            leadership_interval_secs: default_leadership_interval(),
            activation_interval_secs: default_activation_interval(),
            pool_interval_secs: default_pool_interval(),
            redistribution_interval_secs: default_redistribution_interval(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Account absorbing redirected payouts
    pub house_account: MemberId,
    /// Designated forest root; promotion walks stop here
    pub root_member: Option<MemberId>,
    pub leadership: LeadershipSplit,
    #[serde(default)]
    pub residue_destination: ResidueDestination,
    pub pool: PoolSplit,
    /// Hops searched per chaque-match level for a paid ancestor
    #[serde(default = "default_chaque_search_depth")]
    pub chaque_search_depth: usize,
    /// Hard cap on hops of any upline walk
    #[serde(default = "default_upline_iteration_cap")]
    pub upline_iteration_cap: usize,
    /// Levels located by the redistribution sweep
    #[serde(default = "default_redistribution_depth")]
    pub redistribution_depth: usize,
    /// Decimal places kept when dividing the pool among holders
    #[serde(default = "default_money_scale")]
    pub money_scale: u32,
    /// Age after which an in-progress claim is considered abandoned
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_chaque_search_depth() -> usize {
    1
}

fn default_upline_iteration_cap() -> usize {
    10_000
}

fn default_redistribution_depth() -> usize {
    15
}

fn default_money_scale() -> u32 {
    2
}

fn default_claim_timeout() -> u64 {
    1_800
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            house_account: MemberId(1),
            root_member: Some(MemberId(1)),
            leadership: LeadershipSplit::default(),
            residue_destination: ResidueDestination::default(),
            pool: PoolSplit::default(),
            chaque_search_depth: default_chaque_search_depth(),
            upline_iteration_cap: default_upline_iteration_cap(),
            redistribution_depth: default_redistribution_depth(),
            money_scale: default_money_scale(),
            claim_timeout_secs: default_claim_timeout(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - REFERRAL_HOUSE_ACCOUNT: House account member id
    /// - REFERRAL_ROOT_MEMBER: Forest root member id ("none" to walk to the first parentless node)
    /// - REFERRAL_RESIDUE_DESTINATION: unallocated | house
    /// - REFERRAL_POOL_RATIO: Fraction of commission sent to the global pool
    /// - REFERRAL_CHAQUE_SEARCH_DEPTH: Hops searched per chaque-match level
    /// - REFERRAL_UPLINE_CAP: Hard cap on upline walk hops
    /// - REFERRAL_MONEY_SCALE: Decimal places for pool shares
    /// - REFERRAL_CLAIM_TIMEOUT: Seconds before an in-progress claim is abandoned
    /// - REFERRAL_LEADERSHIP_INTERVAL / REFERRAL_ACTIVATION_INTERVAL /
    ///   REFERRAL_REDISTRIBUTION_INTERVAL: job intervals in seconds
    /// - REFERRAL_POOL_INTERVAL: seconds between checks for a closed month
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let root_member = match env::var("REFERRAL_ROOT_MEMBER") {
            Ok(s) if s.eq_ignore_ascii_case("none") => None,
            Ok(s) => s.parse().ok().map(MemberId).or(defaults.root_member),
            Err(_) => defaults.root_member,
        };

        let mut leadership = defaults.leadership.clone();
        if let Some(ratio) = env_parse::<String>("REFERRAL_POOL_RATIO")
            .and_then(|s| Decimal::from_str(&s).ok())
        {
            leadership.pool_ratio = ratio;
        }

        Self {
            house_account: env_parse("REFERRAL_HOUSE_ACCOUNT")
                .map(MemberId)
                .unwrap_or(defaults.house_account),
            root_member,
            leadership,
            residue_destination: env::var("REFERRAL_RESIDUE_DESTINATION")
                .ok()
                .and_then(|s| ResidueDestination::parse(&s))
                .unwrap_or_default(),
            pool: defaults.pool.clone(),
            chaque_search_depth: env_parse("REFERRAL_CHAQUE_SEARCH_DEPTH")
                .unwrap_or(defaults.chaque_search_depth),
            upline_iteration_cap: env_parse("REFERRAL_UPLINE_CAP")
                .unwrap_or(defaults.upline_iteration_cap),
            redistribution_depth: defaults.redistribution_depth,
            money_scale: env_parse("REFERRAL_MONEY_SCALE").unwrap_or(defaults.money_scale),
            claim_timeout_secs: env_parse("REFERRAL_CLAIM_TIMEOUT")
                .unwrap_or(defaults.claim_timeout_secs),
            schedule: ScheduleConfig {
                leadership_interval_secs: env_parse("REFERRAL_LEADERSHIP_INTERVAL")
                    .unwrap_or_else(default_leadership_interval),
                activation_interval_secs: env_parse("REFERRAL_ACTIVATION_INTERVAL")
                    .unwrap_or_else(default_activation_interval),
                pool_interval_secs: env_parse("REFERRAL_POOL_INTERVAL")
                    .unwrap_or_else(default_pool_interval),
                redistribution_interval_secs: env_parse("REFERRAL_REDISTRIBUTION_INTERVAL")
                    .unwrap_or_else(default_redistribution_interval),
            },
        }
    }

    /// Development configuration with short job intervals
    pub fn development() -> Self {
        Self {
            claim_timeout_secs: 60,
            schedule: ScheduleConfig {
                leadership_interval_secs: 10,
                activation_interval_secs: 10,
                pool_interval_secs: 60,
                redistribution_interval_secs: 30,
            },
            ..Self::default()
        }
    }

    /// Set the house account
    pub fn with_house_account(mut self, house: MemberId) -> Self {
        self.house_account = house;
        self
    }

    /// Set the residue destination
    pub fn with_residue_destination(mut self, destination: ResidueDestination) -> Self {
        self.residue_destination = destination;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.leadership.validate()?;
        self.pool.validate()?;
        if self.chaque_search_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "chaque_search_depth must be at least 1".to_string(),
            ));
        }
        if self.upline_iteration_cap < self.redistribution_depth
            || self.upline_iteration_cap < self.chaque_search_depth
        {
            return Err(EngineError::InvalidConfig(
                "upline_iteration_cap must cover every bounded walk".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.residue_destination, ResidueDestination::Unallocated);
    }

    #[test]
    fn test_leadership_residue() {
        let split = LeadershipSplit::default();
        assert_eq!(split.slot_total(), Decimal::new(49, 2));
        assert_eq!(split.residue_ratio(), Decimal::new(51, 2));
        assert_eq!(split.leadership_ratio(), Decimal::new(80, 2));
    }

    #[test]
    fn test_invalid_pool_split() {
        let mut config = EngineConfig::default();
        config.pool.giga = Decimal::new(30, 2);
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_slot_overflow_rejected() {
        let mut split = LeadershipSplit::default();
        split.referrer = Decimal::new(60, 2);
        assert!(split.validate().is_err());
    }

    #[test]
    fn test_chaque_share_beyond_residue_rejected() {
        let mut split = LeadershipSplit::default();
        // slots still sum to exactly 1, leaving nothing for chaque-match
        split.referrer = Decimal::new(66, 2);
        assert_eq!(split.slot_total(), Decimal::ONE);
        assert!(matches!(split.validate(), Err(EngineError::InvalidConfig(_))));

        // 0.49 + 0.30 = 0.79, 0.70 + 0.30 = 1.00
        let mut edge = LeadershipSplit::default();
        edge.referrer = Decimal::new(36, 2);
        assert!(edge.validate().is_ok());
        edge.referrer = Decimal::new(37, 2);
        assert!(edge.validate().is_err());
    }

    #[test]
    fn test_residue_destination_parse() {
        assert_eq!(ResidueDestination::parse("house"), Some(ResidueDestination::HouseAccount));
        assert_eq!(ResidueDestination::parse("retain"), Some(ResidueDestination::Unallocated));
        assert_eq!(ResidueDestination::parse("void"), None);
    }
}
