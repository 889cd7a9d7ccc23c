//! Duplex channel message schema.
//!
//! Inbound frames are decoded into `ClientMessage` and validated before they reach
//! the hub; everything the hub emits is a `ServerEvent`. Both are tagged by a
//! `type` field on the wire.

use crate::account_store::AccountId;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Public identity of a logged-in session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: AccountId,
    pub username: String,
}

impl Identity {
    pub fn new(account_id: AccountId, username: impl Into<String>) -> Self {
        Self {
            account_id,
            username: username.into(),
        }
    }
}

/// One row of the presence roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub username: String,
    #[serde(rename = "userId")]
    pub user_id: AccountId,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Login {
        #[serde(rename = "userId", deserialize_with = "account_id_from_number_or_string")]
        user_id: AccountId,
        username: String,
    },
    ChatMessage {
        #[serde(default)]
        username: Option<String>,
        message: String,
    },
    GameResult {
        #[serde(default)]
        username: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoin {
        username: String,
        message: String,
        timestamp: String,
    },
    UserLeave {
        username: String,
        message: String,
        timestamp: String,
    },
    UserList {
        users: Vec<RosterEntry>,
    },
    ChatMessage {
        username: String,
        message: String,
        timestamp: String,
    },
    GameResult {
        username: String,
        message: String,
        timestamp: String,
    },
}

impl ServerEvent {
    pub fn user_join(username: &str) -> Self {
        ServerEvent::UserJoin {
            username: username.to_string(),
            message: format!("{} joined the chat room", username),
            timestamp: iso_timestamp(),
        }
    }

    pub fn user_leave(username: &str) -> Self {
        ServerEvent::UserLeave {
            username: username.to_string(),
            message: format!("{} left the chat room", username),
            timestamp: iso_timestamp(),
        }
    }

    pub fn chat(username: &str, message: &str) -> Self {
        ServerEvent::ChatMessage {
            username: username.to_string(),
            message: message.to_string(),
            timestamp: iso_timestamp(),
        }
    }

    pub fn game_result(username: &str, message: &str) -> Self {
        ServerEvent::GameResult {
            username: username.to_string(),
            message: message.to_string(),
            timestamp: iso_timestamp(),
        }
    }

    /// Wire name of the event, for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::UserJoin { .. } => "user_join",
            ServerEvent::UserLeave { .. } => "user_leave",
            ServerEvent::UserList { .. } => "user_list",
            ServerEvent::ChatMessage { .. } => "chat_message",
            ServerEvent::GameResult { .. } => "game_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Size limits applied while decoding inbound frames
#[derive(Debug, Clone, Copy)]
pub struct MessageLimits {
    pub max_username_length: usize,
    pub max_chat_length: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_username_length: 32,
            max_chat_length: 500,
        }
    }
}

impl ClientMessage {
    /// Parse and validate one text frame
    pub fn decode(text: &str, limits: MessageLimits) -> Result<Self, ProtocolError> {
        let mut message: ClientMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match &mut message {
            ClientMessage::Login { username, .. } => {
                *username = username.trim().to_string();
                check_username(username, limits)?;
            }
            ClientMessage::ChatMessage { message, .. } | ClientMessage::GameResult { message, .. } => {
                if message.trim().is_empty() {
                    return Err(ProtocolError::InvalidField {
                        field: "message",
                        reason: "cannot be empty".to_string(),
                    });
                }
                if message.chars().count() > limits.max_chat_length {
                    return Err(ProtocolError::InvalidField {
                        field: "message",
                        reason: format!("longer than {} characters", limits.max_chat_length),
                    });
                }
            }
        }

        Ok(message)
    }
}

/// Username rules shared by the wire decoder and the hub
pub fn check_username(username: &str, limits: MessageLimits) -> Result<(), ProtocolError> {
    if username.trim().is_empty() {
        return Err(ProtocolError::InvalidField {
            field: "username",
            reason: "cannot be empty".to_string(),
        });
    }
    if username.chars().count() > limits.max_username_length {
        return Err(ProtocolError::InvalidField {
            field: "username",
            reason: format!("longer than {} characters", limits.max_username_length),
        });
    }
    Ok(())
}

/// ISO-8601 UTC timestamp with millisecond precision
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn account_id_from_number_or_string<'de, D>(deserializer: D) -> Result<AccountId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(AccountId),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(id),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("userId '{}' is not a valid account id", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_login() {
        let msg = ClientMessage::decode(r#"{"type":"login","userId":7,"username":" alice "}"#, MessageLimits::default()).unwrap();
        assert_eq!(msg, ClientMessage::Login { user_id: 7, username: "alice".to_string() });

        let msg = ClientMessage::decode(r#"{"type":"login","userId":"12","username":"bob"}"#, MessageLimits::default()).unwrap();
        assert!(matches!(msg, ClientMessage::Login { user_id: 12, .. }));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let limits = MessageLimits::default();
        assert!(matches!(ClientMessage::decode("not json", limits), Err(ProtocolError::Malformed(_))));
        assert!(ClientMessage::decode(r#"{"type":"dance"}"#, limits).is_err());
        assert!(ClientMessage::decode(r#"{"type":"login","userId":"x","username":"a"}"#, limits).is_err());
        assert!(matches!(
            ClientMessage::decode(r#"{"type":"login","userId":1,"username":"  "}"#, limits),
            Err(ProtocolError::InvalidField { field: "username", .. })
        ));
        assert!(matches!(
            ClientMessage::decode(r#"{"type":"chat_message","username":"a","message":""}"#, limits),
            Err(ProtocolError::InvalidField { field: "message", .. })
        ));

        let long = "x".repeat(limits.max_chat_length + 1);
        let frame = json!({"type": "chat_message", "message": long}).to_string();
        assert!(ClientMessage::decode(&frame, limits).is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let value = serde_json::to_value(ServerEvent::UserList {
            users: vec![RosterEntry { username: "alice".into(), user_id: 1 }],
        })
        .unwrap();
        assert_eq!(value, json!({"type": "user_list", "users": [{"username": "alice", "userId": 1}]}));

        let value = serde_json::to_value(ServerEvent::user_join("bob")).unwrap();
        assert_eq!(value["type"], "user_join");
        assert_eq!(value["username"], "bob");
        let ts = value["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(ts.ends_with('Z'));
    }
}
