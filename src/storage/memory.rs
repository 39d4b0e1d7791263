use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{Account, AccountId, Amount, LedgerEntry, Transaction, TransactionId};

use super::{LedgerStore, UnitOfWork};

/// Store operations, used to script faults and to inspect the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Begin,
    ReadAccount,
    ReadAccountForUpdate,
    InsertAccount,
    UpdateAccountBalance,
    InsertTransaction,
    InsertLedgerEntries,
    Commit,
    Rollback,
}

/// What happens the next time a given operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The operation fails without side effects.
    Fail,
    /// The operation is held up before it runs.
    Delay(Duration),
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub account_id: Option<AccountId>,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transactions: Vec<Transaction>,
    entries: Vec<LedgerEntry>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: std::sync::Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
    faults: Mutex<HashMap<StoreOp, Vec<Fault>>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl Shared {
    async fn record(&self, op: StoreOp, account_id: Option<&AccountId>) -> Result<()> {
        self.calls.lock().await.push(StoreCall {
            op,
            account_id: account_id.cloned(),
        });

        let fault = {
            let mut faults = self.faults.lock().await;
            match faults.get_mut(&op) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match fault {
            Some(Fault::Fail) => Err(anyhow!("injected {op:?} failure")),
            Some(Fault::Delay(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn row_lock(&self, id: &AccountId) -> Arc<Mutex<()>> {
        self.row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Forget the locks of `ids` that no unit holds or waits on.
    fn prune_row_locks(&self, ids: &[AccountId]) {
        let mut row_locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if row_locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                row_locks.remove(id);
            }
        }
    }
}

/// Row locks held by one unit, released together when the unit ends.
struct HeldLocks {
    shared: Arc<Shared>,
    guards: BTreeMap<AccountId, OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let released: Vec<AccountId> = self.guards.keys().cloned().collect();
        self.guards.clear();
        self.shared.prune_row_locks(&released);
    }
}

/// In-memory ledger store.
///
/// Account rows carry real exclusive locks, held by a unit of work until it
/// commits or rolls back. Writes are buffered in the unit and applied
/// atomically on commit, so an abandoned unit leaves nothing behind.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next call of `op`. Faults queued for the same
    /// operation fire in order, one per call.
    pub async fn inject(&self, op: StoreOp, fault: Fault) {
        self.shared
            .faults
            .lock()
            .await
            .entry(op)
            .or_default()
            .push(fault);
    }

    pub async fn clear_faults(&self) {
        self.shared.faults.lock().await.clear();
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.shared.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.shared.calls.lock().await.clear();
    }

    /// Accounts locked for update, in the order the locks were requested.
    pub async fn lock_order(&self) -> Vec<AccountId> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| call.op == StoreOp::ReadAccountForUpdate)
            .filter_map(|call| call.account_id)
            .collect()
    }

    /// Seed an account directly, bypassing the ledger. Only for corrupting
    /// state in integrity tests.
    pub async fn force_balance(&self, id: &AccountId, balance: Amount) -> Result<()> {
        let mut tables = self.shared.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(id)
            .ok_or_else(|| anyhow!("Account {id} not found"))?;
        account.balance = balance;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit> {
        self.shared.record(StoreOp::Begin, None).await?;
        Ok(MemoryUnit {
            shared: self.shared.clone(),
            locks: HeldLocks {
                shared: self.shared.clone(),
                guards: BTreeMap::new(),
            },
            accounts: BTreeMap::new(),
            new_accounts: Vec::new(),
            transactions: Vec::new(),
            entries: Vec::new(),
        })
    }

    async fn read_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.shared.record(StoreOp::ReadAccount, Some(id)).await?;
        Ok(self.shared.tables.lock().await.accounts.get(id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .shared
            .tables
            .lock()
            .await
            .accounts
            .values()
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self
            .shared
            .tables
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list_transactions(&self, account_id: Option<&AccountId>) -> Result<Vec<Transaction>> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| account_id.is_none_or(|id| t.involves(id)))
            .cloned()
            .collect())
    }

    async fn list_ledger_entries(
        &self,
        account_id: Option<&AccountId>,
    ) -> Result<Vec<LedgerEntry>> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| account_id.is_none_or(|id| &e.account_id == id))
            .cloned()
            .collect())
    }

    async fn list_transaction_entries(&self, id: TransactionId) -> Result<Vec<LedgerEntry>> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.transaction_id == id)
            .cloned()
            .collect())
    }
}

/// A unit of work over the in-memory tables.
pub struct MemoryUnit {
    shared: Arc<Shared>,
    locks: HeldLocks,
    /// Uncommitted account state, new or updated
    accounts: BTreeMap<AccountId, Account>,
    new_accounts: Vec<AccountId>,
    transactions: Vec<Transaction>,
    entries: Vec<LedgerEntry>,
}

impl MemoryUnit {
    async fn current(&self, id: &AccountId) -> Option<Account> {
        match self.accounts.get(id) {
            Some(account) => Some(account.clone()),
            None => self.shared.tables.lock().await.accounts.get(id).cloned(),
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn read_account_for_update(&mut self, id: &AccountId) -> Result<Option<Account>> {
        self.shared.record(StoreOp::ReadAccountForUpdate, Some(id)).await?;

        if !self.locks.guards.contains_key(id) {
            let guard = self.shared.row_lock(id).lock_owned().await;
            self.locks.guards.insert(id.clone(), guard);
        }
        Ok(self.current(id).await)
    }

    async fn read_account(&mut self, id: &AccountId) -> Result<Option<Account>> {
        self.shared.record(StoreOp::ReadAccount, Some(id)).await?;
        Ok(self.current(id).await)
    }

    async fn insert_account(&mut self, account: &Account) -> Result<bool> {
        let id = &account.account_id;
        self.shared.record(StoreOp::InsertAccount, Some(id)).await?;

        if self.current(id).await.is_some() {
            return Ok(false);
        }
        self.accounts.insert(id.clone(), account.clone());
        self.new_accounts.push(id.clone());
        Ok(true)
    }

    async fn update_account_balance(&mut self, id: &AccountId, balance: Amount) -> Result<()> {
        self.shared.record(StoreOp::UpdateAccountBalance, Some(id)).await?;

        if !self.locks.guards.contains_key(id) && !self.new_accounts.contains(id) {
            bail!("Account {id} must be locked before its balance is updated");
        }
        let mut account = self
            .current(id)
            .await
            .ok_or_else(|| anyhow!("Account {id} vanished while its balance was being updated"))?;
        account.balance = balance;
        account.updated_at = Utc::now();
        self.accounts.insert(id.clone(), account);
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.shared.record(StoreOp::InsertTransaction, None).await?;

        let duplicate = self.transactions.iter().any(|t| t.id == transaction.id)
            || self
                .shared
                .tables
                .lock()
                .await
                .transactions
                .iter()
                .any(|t| t.id == transaction.id || t.reference == transaction.reference);
        if duplicate {
            bail!("Transaction {} already recorded", transaction.reference);
        }
        self.transactions.push(transaction.clone());
        Ok(())
    }

    async fn insert_ledger_entries(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        self.shared.record(StoreOp::InsertLedgerEntries, None).await?;

        for entry in entries {
            let owned = self
                .transactions
                .iter()
                .any(|t| t.id == entry.transaction_id);
            if !owned {
                bail!(
                    "Ledger entry {} references unknown transaction {}",
                    entry.id,
                    entry.transaction_id
                );
            }
        }
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.shared.record(StoreOp::Commit, None).await?;

        let mut tables = self.shared.tables.lock().await;
        if let Some(id) = self
            .new_accounts
            .iter()
            .find(|id| tables.accounts.contains_key(*id))
        {
            bail!("Account {id} was created concurrently");
        }
        for (id, account) in self.accounts {
            tables.accounts.insert(id, account);
        }
        tables.transactions.extend(self.transactions);
        tables.entries.extend(self.entries);
        // Row locks are released when `self.locks` drops here.
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.shared.record(StoreOp::Rollback, None).await
    }
}
