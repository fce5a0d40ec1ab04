use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reward level granted to a supporter, derived only from the contributed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardTier {
    ThankYou,
    Wood,
    Ruby,
    Bronze,
    Silver,
    Gold,
    Emerald,
}

/// Inclusive upper bound of each tier, ascending. Amounts above the last bound are `Emerald`.
///
/// `ThankYou` is the only tier bounded exclusively: anything strictly below 51 qualifies.
const TIER_CEILINGS: [(Decimal, RewardTier); 5] = [
    (dec!(100), RewardTier::Wood),
    (dec!(300), RewardTier::Ruby),
    (dec!(500), RewardTier::Bronze),
    (dec!(700), RewardTier::Silver),
    (dec!(900), RewardTier::Gold),
];

const THANK_YOU_LIMIT: Decimal = dec!(51);

impl RewardTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThankYou => "thank_you",
            Self::Wood => "wood",
            Self::Ruby => "ruby",
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Emerald => "emerald",
        }
    }

    /// Whether this tier yields a physical plaque.
    pub fn is_plaque(&self) -> bool {
        *self != Self::ThankYou
    }
}

impl fmt::Display for RewardTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an amount to its reward tier. Total over all decimals; negative
/// amounts (never persisted) fall into `ThankYou`.
pub fn classify(amount: Decimal) -> RewardTier {
    if amount < THANK_YOU_LIMIT {
        return RewardTier::ThankYou;
    }
    TIER_CEILINGS
        .iter()
        .find(|(ceiling, _)| amount <= *ceiling)
        .map(|(_, tier)| *tier)
        .unwrap_or(RewardTier::Emerald)
}
