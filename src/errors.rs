//! Error types for the taixiu service
//!
//! `TaixiuError` is the root for infrastructure failures (configuration, storage,
//! hub registry). Wager settlement has its own taxonomy in `WagerError` because
//! every variant maps to a distinct caller-visible response.

use crate::account_store::AccountId;
use std::fmt;

/// Root error type for infrastructure operations
#[derive(Debug)]
pub enum TaixiuError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Storage system errors
    Storage(StorageError),

    /// Session hub registry errors
    Hub(HubError),

    /// Metrics registry setup errors
    Metrics(String),
}

/// Configuration loading and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    MissingRequired(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
}

/// Storage system errors
#[derive(Debug)]
pub enum StorageError {
    DatabaseOpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
    DuplicateUsername(String),
}

/// Registry-mutation errors reported by `SessionHub::register`.
///
/// Delivery failures to individual connections never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("Malformed identity: {0}")]
    MalformedIdentity(String),
}

/// Settlement failures, reported synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WagerError {
    #[error("Invalid wager: {0}")]
    Validation(String),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error("Account {account_id} busy; lock not acquired within {waited_ms}ms")]
    ConcurrencyTimeout { account_id: AccountId, waited_ms: u64 },

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl WagerError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            WagerError::Validation(_) => "validation",
            WagerError::AccountNotFound(_) => "account_not_found",
            WagerError::InsufficientFunds { .. } => "insufficient_funds",
            WagerError::ConcurrencyTimeout { .. } => "concurrency_timeout",
            WagerError::Persistence(_) => "persistence",
        }
    }
}

impl fmt::Display for TaixiuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaixiuError::Configuration(e) => write!(f, "Configuration error: {}", e),
            TaixiuError::Storage(e) => write!(f, "Storage error: {}", e),
            TaixiuError::Hub(e) => write!(f, "Hub error: {}", e),
            TaixiuError::Metrics(msg) => write!(f, "Metrics error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingRequired(field) => write!(f, "Missing required field: {}", field),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseOpenFailed(msg) => write!(f, "Database open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
            StorageError::DuplicateUsername(name) => write!(f, "Username already exists: {}", name),
        }
    }
}

impl std::error::Error for TaixiuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaixiuError::Configuration(e) => Some(e),
            TaixiuError::Storage(e) => Some(e),
            TaixiuError::Hub(e) => Some(e),
            TaixiuError::Metrics(_) => None,
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}

impl From<ConfigurationError> for TaixiuError {
    fn from(e: ConfigurationError) -> Self {
        TaixiuError::Configuration(e)
    }
}

impl From<StorageError> for TaixiuError {
    fn from(e: StorageError) -> Self {
        TaixiuError::Storage(e)
    }
}

impl From<HubError> for TaixiuError {
    fn from(e: HubError) -> Self {
        TaixiuError::Hub(e)
    }
}

impl From<rocksdb::Error> for TaixiuError {
    fn from(e: rocksdb::Error) -> Self {
        TaixiuError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<prometheus::Error> for TaixiuError {
    fn from(e: prometheus::Error) -> Self {
        TaixiuError::Metrics(e.to_string())
    }
}

impl From<std::io::Error> for TaixiuError {
    fn from(e: std::io::Error) -> Self {
        TaixiuError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

impl From<TaixiuError> for WagerError {
    fn from(e: TaixiuError) -> Self {
        WagerError::Persistence(e.to_string())
    }
}

pub type TaixiuResult<T> = Result<T, TaixiuError>;
