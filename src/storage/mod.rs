//! Durable storage for accounts, transactions and ledger entries.
//!
//! The engine only sees the two capability traits below. `SqliteStore` is the
//! production implementation; `MemoryStore` is a substitutable double with
//! real row locks and fault injection.

mod memory;
mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Account, AccountId, Amount, LedgerEntry, Transaction, TransactionId};

pub use memory::*;
pub use sqlite::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// A store that can open units of work and serve plain, lock-free reads.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Unit: UnitOfWork + 'static;

    /// Open an atomic unit of work. Dropping it without `commit` discards it.
    async fn begin(&self) -> Result<Self::Unit>;

    /// Single read outside any unit of work; no lock is taken.
    async fn read_account(&self, id: &AccountId) -> Result<Option<Account>>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Transactions in recording order, optionally limited to one account.
    async fn list_transactions(&self, account_id: Option<&AccountId>) -> Result<Vec<Transaction>>;

    /// Ledger entries in recording order, optionally limited to one account.
    async fn list_ledger_entries(&self, account_id: Option<&AccountId>)
    -> Result<Vec<LedgerEntry>>;

    async fn list_transaction_entries(&self, id: TransactionId) -> Result<Vec<LedgerEntry>>;
}

/// The operations available inside one atomic unit of work.
///
/// Account rows may only be mutated after `read_account_for_update` locked
/// them in the same unit. Locks are released by `commit` or `rollback`.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the account row for exclusive update and read it.
    async fn read_account_for_update(&mut self, id: &AccountId) -> Result<Option<Account>>;

    /// Read within the unit, seeing its own uncommitted writes. No lock is taken.
    async fn read_account(&mut self, id: &AccountId) -> Result<Option<Account>>;

    /// Returns `false` when an account with the same id already exists.
    async fn insert_account(&mut self, account: &Account) -> Result<bool>;

    async fn update_account_balance(&mut self, id: &AccountId, balance: Amount) -> Result<()>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    async fn insert_ledger_entries(&mut self, entries: &[LedgerEntry]) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
