//! API Request and Response Models
//!
//! Field names follow the camelCase wire format the browser client speaks.

use crate::{
    account_store::{AccountId, AccountStats, LedgerEntry},
    games::{BetType, WagerOutcome},
    protocol::{account_id_from_number_or_string, RosterEntry},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub online: usize,
}

/// POST /api/play body.
///
/// Amounts arrive as JSON numbers and are checked for being whole and positive by
/// the handler, so malformed values surface as validation errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    #[serde(alias = "accountId", deserialize_with = "account_id_from_number_or_string")]
    pub user_id: AccountId,
    pub bet_type: String,
    pub bet_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayResponse {
    pub success: bool,
    pub dice: [u8; 3],
    pub total: u8,
    pub result: BetType,
    pub is_win: bool,
    pub new_balance: u64,
    pub win_amount: u64,
}

impl From<&WagerOutcome> for PlayResponse {
    fn from(outcome: &WagerOutcome) -> Self {
        Self {
            success: true,
            dice: outcome.roll.dice,
            total: outcome.roll.total,
            result: outcome.roll.category,
            is_win: outcome.is_win(),
            new_balance: outcome.new_balance,
            win_amount: outcome.win_amount,
        }
    }
}

/// POST /api/transaction body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(alias = "accountId", deserialize_with = "account_id_from_number_or_string")]
    pub user_id: AccountId,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub success: bool,
    pub new_balance: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One settled wager as shown in the history panel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub seq: u64,
    pub bet_type: BetType,
    pub bet_amount: u64,
    pub dice: [u8; 3],
    pub total: u8,
    pub result: BetType,
    pub is_win: bool,
    pub balance_after: u64,
    pub created_at: DateTime<Utc>,
}

impl HistoryItem {
    /// `None` for non-wager entries
    pub fn from_entry(entry: &LedgerEntry) -> Option<Self> {
        let wager = entry.as_wager()?;
        Some(Self {
            seq: entry.seq,
            bet_type: wager.bet_type,
            bet_amount: wager.bet_amount,
            dice: wager.dice,
            total: wager.total,
            result: wager.category,
            is_win: wager.outcome.is_win(),
            balance_after: wager.balance_after,
            created_at: DateTime::from_timestamp_millis(entry.created_at).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub user_id: AccountId,
    pub games: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: AccountStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineResponse {
    pub count: usize,
    pub users: Vec<RosterEntry>,
}

/// Whole, positive amount from a JSON number
pub fn whole_amount(value: f64, field: &str) -> Result<u64, String> {
    // Largest integer an f64 represents exactly
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    if !value.is_finite() || value.fract() != 0.0 {
        return Err(format!("{} must be a whole number", field));
    }
    if value <= 0.0 {
        return Err(format!("{} must be greater than zero", field));
    }
    if value > MAX_EXACT {
        return Err(format!("{} is too large", field));
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_play_request_accepts_both_id_spellings() {
        let req: PlayRequest =
            serde_json::from_value(json!({"userId": 4, "betType": "small", "betAmount": 100})).unwrap();
        assert_eq!(req.user_id, 4);

        let req: PlayRequest =
            serde_json::from_value(json!({"accountId": "5", "betType": "big", "betAmount": 1.0})).unwrap();
        assert_eq!(req.user_id, 5);
        assert_eq!(req.bet_amount, 1.0);
    }

    #[test]
    fn test_whole_amount() {
        assert_eq!(whole_amount(10000.0, "betAmount"), Ok(10000));
        assert!(whole_amount(0.0, "betAmount").is_err());
        assert!(whole_amount(-5.0, "betAmount").is_err());
        assert!(whole_amount(10.5, "betAmount").is_err());
        assert!(whole_amount(f64::NAN, "betAmount").is_err());
        assert!(whole_amount(1e30, "betAmount").is_err());
    }

    #[test]
    fn test_play_response_wire_names() {
        let value = serde_json::to_value(PlayResponse {
            success: true,
            dice: [2, 2, 3],
            total: 7,
            result: BetType::Small,
            is_win: true,
            new_balance: 110000,
            win_amount: 10000,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "success": true, "dice": [2, 2, 3], "total": 7, "result": "small",
                "isWin": true, "newBalance": 110000, "winAmount": 10000
            })
        );
    }
}
