//! Wager settlement engine.
//!
//! Every balance mutation for an account runs under that account's exclusive
//! lock, so the read-modify-write of `settle` and `transfer` never interleaves for
//! the same account while different accounts proceed in parallel. The lock wait is
//! bounded; a timeout is reported as `WagerError::ConcurrencyTimeout` and is not
//! retried here.

use crate::{
    account_store::{
        Account, AccountId, AccountStore, EntryDetail, StoreTransaction, TransferKind, TransferRecord,
        WagerRecord,
    },
    errors::WagerError,
    games::{BetType, GameEngine, WagerOutcome},
};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Result of a deposit or withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub account_id: AccountId,
    pub kind: TransferKind,
    pub amount: u64,
    pub new_balance: u64,
}

pub struct WagerLedger {
    store: Arc<dyn AccountStore>,
    engine: GameEngine,
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

impl WagerLedger {
    pub fn new(store: Arc<dyn AccountStore>, engine: GameEngine, lock_timeout: Duration) -> Self {
        Self {
            store,
            engine,
            locks: DashMap::new(),
            lock_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Settle one wager: roll, apply the delta, record history, atomically.
    pub async fn settle(&self, account_id: AccountId, bet_type: BetType, bet_amount: u64) -> Result<WagerOutcome, WagerError> {
        if bet_amount == 0 {
            return Err(WagerError::Validation("betAmount must be greater than zero".to_string()));
        }

        let result = self
            .locked(account_id, move |store, engine| settle_locked(store, engine, account_id, bet_type, bet_amount))
            .await;

        match &result {
            Ok(outcome) => info!(
                account_id,
                %bet_type,
                bet_amount,
                dice = ?outcome.roll.dice,
                total = outcome.roll.total,
                win = outcome.is_win(),
                new_balance = outcome.new_balance,
                "🎲 Wager settled"
            ),
            Err(e) => debug!(account_id, %bet_type, bet_amount, error = %e, "Wager rejected"),
        }
        result
    }

    /// Deposit into or withdraw from an account under the same serialization as `settle`
    pub async fn transfer(
        &self,
        account_id: AccountId,
        kind: TransferKind,
        amount: u64,
        description: Option<String>,
    ) -> Result<TransferOutcome, WagerError> {
        if amount == 0 {
            return Err(WagerError::Validation("amount must be greater than zero".to_string()));
        }

        let result = self
            .locked(account_id, move |store, _| transfer_locked(store, account_id, kind, amount, description))
            .await;

        if let Ok(outcome) = &result {
            info!(account_id, kind = ?kind, amount, new_balance = outcome.new_balance, "Transfer applied");
        }
        result
    }

    /// Current balance, read without taking the account lock
    pub fn balance(&self, account_id: AccountId) -> Result<u64, WagerError> {
        Ok(load(self.store.as_ref(), account_id)?.balance)
    }

    /// Number of accounts with a live lock entry
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Run `work` under the account lock on the blocking pool.
    ///
    /// The guard moves into the blocking task, so the lock is held until the store
    /// call returns even if the awaiting future is dropped.
    async fn locked<T, F>(&self, account_id: AccountId, work: F) -> Result<T, WagerError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AccountStore, &GameEngine) -> Result<T, WagerError> + Send + 'static,
    {
        let guard = self.acquire(account_id).await?;
        let store = self.store.clone();
        let engine = self.engine.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work(store.as_ref(), &engine)
        })
        .await;
        self.prune(account_id);

        joined.unwrap_or_else(|e| {
            warn!(account_id, error = %e, "Locked ledger task failed");
            Err(WagerError::Persistence(format!("ledger task failed: {}", e)))
        })
    }

    async fn acquire(&self, account_id: AccountId) -> Result<OwnedMutexGuard<()>, WagerError> {
        let lock = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let acquired = tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(account_id, timeout_ms = self.lock_timeout.as_millis() as u64, "Account lock timed out");
                self.prune(account_id);
                Err(WagerError::ConcurrencyTimeout {
                    account_id,
                    waited_ms: self.lock_timeout.as_millis() as u64,
                })
            }
        }
    }

    // Drop the lock entry once only the map holds it. Cloning an entry requires the
    // same shard lock `remove_if` holds, so a waiter cannot slip in between.
    fn prune(&self, account_id: AccountId) {
        self.locks.remove_if(&account_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    async fn hold_lock(&self, account_id: AccountId) -> OwnedMutexGuard<()> {
        self.acquire(account_id).await.expect("lock available")
    }
}

fn settle_locked(
    store: &dyn AccountStore,
    engine: &GameEngine,
    account_id: AccountId,
    bet_type: BetType,
    bet_amount: u64,
) -> Result<WagerOutcome, WagerError> {
    let account = load(store, account_id)?;
    if bet_amount > account.balance {
        return Err(WagerError::InsufficientFunds {
            balance: account.balance,
            requested: bet_amount,
        });
    }

    let (roll, outcome) = engine.play(bet_type);
    let (new_balance, balance_delta) = if outcome.is_win() {
        let new_balance = account
            .balance
            .checked_add(bet_amount)
            .ok_or_else(|| WagerError::Validation("payout would overflow the balance".to_string()))?;
        (new_balance, signed(bet_amount))
    } else {
        (account.balance - bet_amount, -signed(bet_amount))
    };

    let username = account.username.clone();
    let mut tx = StoreTransaction::begin(account);
    tx.set_balance(new_balance).append(EntryDetail::Wager(WagerRecord {
        bet_type,
        bet_amount,
        dice: roll.dice,
        total: roll.total,
        category: roll.category,
        outcome,
        balance_after: new_balance,
    }));
    store.commit(tx).map_err(|e| {
        warn!(account_id, error = %e, "Settlement commit failed; nothing applied");
        WagerError::Persistence(e.to_string())
    })?;

    Ok(WagerOutcome {
        roll,
        bet_type,
        bet_amount,
        outcome,
        balance_delta,
        new_balance,
        win_amount: if outcome.is_win() { bet_amount } else { 0 },
        username,
    })
}

fn transfer_locked(
    store: &dyn AccountStore,
    account_id: AccountId,
    kind: TransferKind,
    amount: u64,
    description: Option<String>,
) -> Result<TransferOutcome, WagerError> {
    let account = load(store, account_id)?;
    let new_balance = match kind {
        TransferKind::Deposit => account
            .balance
            .checked_add(amount)
            .ok_or_else(|| WagerError::Validation("deposit would overflow the balance".to_string()))?,
        TransferKind::Withdraw => {
            if amount > account.balance {
                return Err(WagerError::InsufficientFunds {
                    balance: account.balance,
                    requested: amount,
                });
            }
            account.balance - amount
        }
    };

    let mut tx = StoreTransaction::begin(account);
    tx.set_balance(new_balance).append(EntryDetail::Transfer(TransferRecord {
        transfer_type: kind,
        amount,
        description,
        balance_after: new_balance,
    }));
    store.commit(tx).map_err(|e| WagerError::Persistence(e.to_string()))?;

    Ok(TransferOutcome {
        account_id,
        kind,
        amount,
        new_balance,
    })
}

fn load(store: &dyn AccountStore, account_id: AccountId) -> Result<Account, WagerError> {
    store
        .load_account(account_id)
        .map_err(|e| WagerError::Persistence(e.to_string()))?
        .ok_or(WagerError::AccountNotFound(account_id))
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}
