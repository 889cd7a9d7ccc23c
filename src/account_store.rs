//! Durable account balances and ledger history.
//!
//! The settlement engine needs exactly two things from a store: read an account,
//! and commit a balance change together with its history entries as one unit.
//! `StoreTransaction` is that unit; `AccountStore::commit` applies it atomically.

use crate::{
    errors::{StorageError, TaixiuError, TaixiuResult},
    games::types::{BetType, GameOutcome, ResultCategory},
    storage::{BatchItem, OptimizedStorage},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub type AccountId = u64;

const ACCOUNT_ID_PREFIX: &str = "account:id:";
const ACCOUNT_NAME_PREFIX: &str = "account:name:";
const NEXT_ACCOUNT_ID_KEY: &[u8] = b"meta:next_account_id";
const LEDGER_PREFIX: &[u8] = b"ledger:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub balance: u64,
    /// Entries appended so far; the next entry gets this sequence number
    pub entry_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WagerRecord {
    pub bet_type: BetType,
    pub bet_amount: u64,
    pub dice: [u8; 3],
    pub total: u8,
    pub category: ResultCategory,
    pub outcome: GameOutcome,
    pub balance_after: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    pub transfer_type: TransferKind,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub balance_after: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryDetail {
    Wager(WagerRecord),
    Transfer(TransferRecord),
}

/// Immutable history row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub account_id: AccountId,
    pub seq: u64,
    /// Unix milliseconds
    pub created_at: i64,
    #[serde(flatten)]
    pub detail: EntryDetail,
}

impl LedgerEntry {
    pub fn as_wager(&self) -> Option<&WagerRecord> {
        match &self.detail {
            EntryDetail::Wager(w) => Some(w),
            EntryDetail::Transfer(_) => None,
        }
    }
}

/// Balance update plus history appends for a single account, committed together
#[derive(Debug, Clone)]
pub struct StoreTransaction {
    account: Account,
    entries: Vec<LedgerEntry>,
}

impl StoreTransaction {
    /// Start a transaction from the account state read under the account's lock
    pub fn begin(account: Account) -> Self {
        Self {
            account,
            entries: Vec::new(),
        }
    }

    pub fn set_balance(&mut self, balance: u64) -> &mut Self {
        self.account.balance = balance;
        self
    }

    pub fn append(&mut self, detail: EntryDetail) -> &mut Self {
        let entry = LedgerEntry {
            account_id: self.account.id,
            seq: self.account.entry_count,
            created_at: chrono::Utc::now().timestamp_millis(),
            detail,
        };
        self.account.entry_count += 1;
        self.entries.push(entry);
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

/// Account/history store contract consumed by the ledger.
///
/// Callers serialize writes per account; implementations only need to make each
/// `commit` all-or-nothing.
pub trait AccountStore: Send + Sync {
    fn create_account(&self, username: &str, balance: u64) -> TaixiuResult<Account>;

    fn load_account(&self, id: AccountId) -> TaixiuResult<Option<Account>>;

    fn find_by_username(&self, username: &str) -> TaixiuResult<Option<Account>>;

    fn commit(&self, tx: StoreTransaction) -> TaixiuResult<()>;

    /// Most recent entries first
    fn recent_entries(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>>;

    /// Up to `limit` wager entries, newest first; transfers are skipped, not counted
    fn recent_wagers(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>>;

    /// Wager totals over the whole history, read from one consistent view
    fn wager_stats(&self, id: AccountId) -> TaixiuResult<AccountStats>;
}

/// Aggregate wager statistics for one account
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    pub total_games: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_profit: i64,
}

impl AccountStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        entries.into_iter().fold(Self::default(), |mut stats, entry| {
            stats.record(entry);
            stats
        })
    }

    /// Fold one entry in; transfers leave the totals untouched
    pub fn record(&mut self, entry: &LedgerEntry) {
        let Some(wager) = entry.as_wager() else {
            return;
        };
        self.total_games += 1;
        if wager.outcome.is_win() {
            self.wins += 1;
            self.total_profit += wager.bet_amount as i64;
        } else {
            self.losses += 1;
            self.total_profit -= wager.bet_amount as i64;
        }
    }
}

fn account_key(id: AccountId) -> Vec<u8> {
    format!("{}{}", ACCOUNT_ID_PREFIX, id).into_bytes()
}

fn username_key(username: &str) -> Vec<u8> {
    format!("{}{}", ACCOUNT_NAME_PREFIX, username).into_bytes()
}

fn ledger_prefix(id: AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(LEDGER_PREFIX.len() + 8);
    key.extend_from_slice(LEDGER_PREFIX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn ledger_key(id: AccountId, seq: u64) -> Vec<u8> {
    // Key layout: prefix | account_id(be) | seq(be), so a reverse scan is newest-first
    let mut key = ledger_prefix(id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T, what: &str) -> TaixiuResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)).into())
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8], what: &str) -> TaixiuResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)).into())
}

fn read_err(e: rocksdb::Error) -> TaixiuError {
    StorageError::ReadFailed(e.to_string()).into()
}

/// RocksDB-backed store; each commit is a single `WriteBatch`
pub struct RocksAccountStore {
    storage: OptimizedStorage,
    // Serializes account creation (id allocation + username uniqueness)
    create_lock: Mutex<()>,
}

impl RocksAccountStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self {
            storage,
            create_lock: Mutex::new(()),
        }
    }

    fn next_account_id(&self) -> TaixiuResult<AccountId> {
        let current = self.storage.get(NEXT_ACCOUNT_ID_KEY).map_err(read_err)?;
        Ok(match current {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::CorruptedData("next account id".to_string()))?;
                u64::from_be_bytes(arr)
            }
            None => 1,
        })
    }
}

impl AccountStore for RocksAccountStore {
    fn create_account(&self, username: &str, balance: u64) -> TaixiuResult<Account> {
        let _guard = self.create_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.storage.get(&username_key(username)).map_err(read_err)?.is_some() {
            return Err(StorageError::DuplicateUsername(username.to_string()).into());
        }

        let id = self.next_account_id()?;
        let account = Account {
            id,
            username: username.to_string(),
            balance,
            entry_count: 0,
        };

        self.storage.write_batch(vec![
            (account_key(id), Some(encode(&account, "account")?)),
            (username_key(username), Some(id.to_be_bytes().to_vec())),
            (NEXT_ACCOUNT_ID_KEY.to_vec(), Some((id + 1).to_be_bytes().to_vec())),
        ])?;

        Ok(account)
    }

    fn load_account(&self, id: AccountId) -> TaixiuResult<Option<Account>> {
        match self.storage.get(&account_key(id)).map_err(read_err)? {
            Some(bytes) => Ok(Some(decode(&bytes, &format!("account {}", id))?)),
            None => Ok(None),
        }
    }

    fn find_by_username(&self, username: &str) -> TaixiuResult<Option<Account>> {
        let Some(bytes) = self.storage.get(&username_key(username)).map_err(read_err)? else {
            return Ok(None);
        };
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::CorruptedData(format!("username index for {}", username)))?;
        self.load_account(u64::from_be_bytes(arr))
    }

    fn commit(&self, tx: StoreTransaction) -> TaixiuResult<()> {
        let account = tx.account();
        let mut items: Vec<BatchItem> = Vec::with_capacity(1 + tx.entries().len());
        items.push((account_key(account.id), Some(encode(account, "account")?)));
        for entry in tx.entries() {
            items.push((ledger_key(entry.account_id, entry.seq), Some(encode(entry, "ledger entry")?)));
        }

        self.storage.write_batch(items)?;
        tracing::debug!(
            account_id = account.id,
            balance = account.balance,
            entries = tx.entries().len(),
            "Committed account transaction"
        );
        Ok(())
    }

    fn recent_entries(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>> {
        self.storage
            .scan_prefix_reverse(&ledger_prefix(id), limit)
            .map_err(read_err)?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes, "ledger entry"))
            .collect()
    }

    fn recent_wagers(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>> {
        let mut wagers = Vec::new();
        if limit == 0 {
            return Ok(wagers);
        }
        self.storage.visit_prefix_reverse(&ledger_prefix(id), |_, bytes| {
            let entry: LedgerEntry = decode(bytes, "ledger entry")?;
            if entry.as_wager().is_some() {
                wagers.push(entry);
            }
            Ok::<_, TaixiuError>(wagers.len() < limit)
        })?;
        Ok(wagers)
    }

    fn wager_stats(&self, id: AccountId) -> TaixiuResult<AccountStats> {
        let mut stats = AccountStats::default();
        self.storage.visit_prefix_reverse(&ledger_prefix(id), |_, bytes| {
            stats.record(&decode(bytes, "ledger entry")?);
            Ok::<_, TaixiuError>(true)
        })?;
        Ok(stats)
    }
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, Account>,
    usernames: HashMap<String, AccountId>,
    ledger: HashMap<AccountId, Vec<LedgerEntry>>,
    next_id: AccountId,
}

/// Process-local store. Commits are atomic under one mutex.
#[derive(Default)]
pub struct MemoryAccountStore {
    state: Mutex<MemoryState>,
    fail_commits: AtomicBool,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail, for exercising persistence failures
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AccountStore for MemoryAccountStore {
    fn create_account(&self, username: &str, balance: u64) -> TaixiuResult<Account> {
        let mut state = self.state();
        if state.usernames.contains_key(username) {
            return Err(StorageError::DuplicateUsername(username.to_string()).into());
        }
        state.next_id += 1;
        let account = Account {
            id: state.next_id,
            username: username.to_string(),
            balance,
            entry_count: 0,
        };
        state.usernames.insert(username.to_string(), account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn load_account(&self, id: AccountId) -> TaixiuResult<Option<Account>> {
        Ok(self.state().accounts.get(&id).cloned())
    }

    fn find_by_username(&self, username: &str) -> TaixiuResult<Option<Account>> {
        let state = self.state();
        Ok(state.usernames.get(username).and_then(|id| state.accounts.get(id)).cloned())
    }

    fn commit(&self, tx: StoreTransaction) -> TaixiuResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("commit rejected by memory store".to_string()).into());
        }
        let StoreTransaction { account, entries } = tx;
        let mut state = self.state();
        state.ledger.entry(account.id).or_default().extend(entries);
        state.accounts.insert(account.id, account);
        Ok(())
    }

    fn recent_entries(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>> {
        Ok(self
            .state()
            .ledger
            .get(&id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn recent_wagers(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>> {
        Ok(self
            .state()
            .ledger
            .get(&id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter(|entry| entry.as_wager().is_some())
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn wager_stats(&self, id: AccountId) -> TaixiuResult<AccountStats> {
        Ok(self
            .state()
            .ledger
            .get(&id)
            .map(AccountStats::from_entries)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wager(outcome: GameOutcome, amount: u64, balance_after: u64) -> EntryDetail {
        EntryDetail::Wager(WagerRecord {
            bet_type: BetType::Small,
            bet_amount: amount,
            dice: [1, 2, 3],
            total: 6,
            category: BetType::Small,
            outcome,
            balance_after,
        })
    }

    fn exercise_store(store: &dyn AccountStore) {
        let alice = store.create_account("alice", 1_000).unwrap();
        let bob = store.create_account("bob", 500).unwrap();
        assert_ne!(alice.id, bob.id);
        assert!(store.create_account("alice", 1).is_err());

        let mut tx = StoreTransaction::begin(alice.clone());
        tx.set_balance(1_100).append(wager(GameOutcome::Win, 100, 1_100));
        store.commit(tx).unwrap();

        let mut tx = StoreTransaction::begin(store.load_account(alice.id).unwrap().unwrap());
        tx.set_balance(1_050).append(wager(GameOutcome::Lose, 50, 1_050));
        store.commit(tx).unwrap();

        let reloaded = store.load_account(alice.id).unwrap().unwrap();
        assert_eq!(reloaded.balance, 1_050);
        assert_eq!(reloaded.entry_count, 2);

        let entries = store.recent_entries(alice.id, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 0);
        assert!(store.recent_entries(bob.id, 10).unwrap().is_empty());
        assert_eq!(store.recent_entries(alice.id, 1).unwrap().len(), 1);

        let stats = AccountStats::from_entries(&entries);
        assert_eq!(stats, AccountStats { total_games: 2, wins: 1, losses: 1, total_profit: 50 });
        assert_eq!(store.wager_stats(alice.id).unwrap(), stats);

        // A transfer on top is skipped by the wager reads rather than counted against the limit
        let mut tx = StoreTransaction::begin(store.load_account(alice.id).unwrap().unwrap());
        tx.set_balance(1_060).append(EntryDetail::Transfer(TransferRecord {
            transfer_type: TransferKind::Deposit,
            amount: 10,
            description: None,
            balance_after: 1_060,
        }));
        store.commit(tx).unwrap();
        let wagers = store.recent_wagers(alice.id, 1).unwrap();
        assert_eq!(wagers.len(), 1);
        assert_eq!(wagers[0].seq, 1);
        assert_eq!(store.recent_wagers(alice.id, 10).unwrap().len(), 2);
        assert!(store.recent_wagers(alice.id, 0).unwrap().is_empty());
        assert_eq!(store.wager_stats(alice.id).unwrap(), stats);
        assert_eq!(store.wager_stats(bob.id).unwrap(), AccountStats::default());

        assert_eq!(store.find_by_username("bob").unwrap().unwrap().id, bob.id);
        assert!(store.find_by_username("carol").unwrap().is_none());
        assert!(store.load_account(999).unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryAccountStore::new());
    }

    #[test]
    fn test_rocks_store() {
        let temp = TempDir::new().unwrap();
        let storage = OptimizedStorage::new(temp.path()).unwrap();
        exercise_store(&RocksAccountStore::new(storage));
    }

    #[test]
    fn test_rocks_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let id = {
            let store = RocksAccountStore::new(OptimizedStorage::new(temp.path()).unwrap());
            let account = store.create_account("carol", 42).unwrap();
            let mut tx = StoreTransaction::begin(account.clone());
            tx.set_balance(84).append(wager(GameOutcome::Win, 42, 84));
            store.commit(tx).unwrap();
            account.id
        };

        let store = RocksAccountStore::new(OptimizedStorage::new(temp.path()).unwrap());
        assert_eq!(store.load_account(id).unwrap().unwrap().balance, 84);
        assert_eq!(store.recent_entries(id, 10).unwrap().len(), 1);
        assert_eq!(store.create_account("dave", 0).unwrap().id, id + 1);
    }

    #[test]
    fn test_failed_memory_commit_changes_nothing() {
        let store = MemoryAccountStore::new();
        let account = store.create_account("erin", 100).unwrap();
        store.set_fail_commits(true);

        let mut tx = StoreTransaction::begin(account.clone());
        tx.set_balance(0).append(wager(GameOutcome::Lose, 100, 0));
        assert!(store.commit(tx).is_err());

        assert_eq!(store.load_account(account.id).unwrap().unwrap(), account);
        assert!(store.recent_entries(account.id, 10).unwrap().is_empty());
    }
}
