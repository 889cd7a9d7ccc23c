use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side of the big/small table a player bets on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BetType {
    Small,
    Big,
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetType::Small => write!(f, "small"),
            BetType::Big => write!(f, "big"),
        }
    }
}

impl FromStr for BetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "small" => Ok(BetType::Small),
            "big" => Ok(BetType::Big),
            other => Err(format!("Unsupported bet type: '{}' (expected small or big)", other)),
        }
    }
}

/// Category a dice total falls into. Shares its wire names with `BetType`.
pub type ResultCategory = BetType;

impl ResultCategory {
    /// `small` covers totals 4..=10; everything else, including 3, is `big`.
    pub fn from_total(total: u8) -> Self {
        if (4..=10).contains(&total) {
            BetType::Small
        } else {
            BetType::Big
        }
    }
}

/// Win / lose flag as persisted in history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Lose,
}

impl GameOutcome {
    pub fn is_win(self) -> bool {
        self == GameOutcome::Win
    }
}

/// Three dice and what they add up to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiceRoll {
    pub dice: [u8; 3],
    pub total: u8,
    pub category: ResultCategory,
}

impl DiceRoll {
    pub fn from_dice(dice: [u8; 3]) -> Self {
        let total = dice.iter().sum();
        Self {
            dice,
            total,
            category: ResultCategory::from_total(total),
        }
    }

    /// A bet wins when it names the rolled category
    pub fn outcome_for(&self, bet_type: BetType) -> GameOutcome {
        if bet_type == self.category {
            GameOutcome::Win
        } else {
            GameOutcome::Lose
        }
    }
}

/// Result of one settled wager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WagerOutcome {
    pub roll: DiceRoll,
    pub bet_type: BetType,
    pub bet_amount: u64,
    pub outcome: GameOutcome,
    /// Signed change applied to the balance
    pub balance_delta: i64,
    pub new_balance: u64,
    pub win_amount: u64,
    /// Display name of the account, for announcements
    pub username: String,
}

impl WagerOutcome {
    pub fn is_win(&self) -> bool {
        self.outcome.is_win()
    }
}
