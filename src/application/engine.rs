use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    Account, AccountId, AccountSnapshot, Amount, IntegrityReport, LedgerEntry, Transaction,
    TransactionId, build_integrity_report, post_deposit, post_transfer, validate_account_id,
    validate_amount, validate_sufficient_funds, validate_transfer_pair,
};
use crate::storage::{LedgerStore, SqliteStore, StoreConfig, UnitOfWork};

use super::{CoordinatorStats, EngineConfig, LedgerError, TransactionCoordinator};

/// The money-movement engine. Every mutation runs inside one unit of work
/// and leaves balances and ledger history consistent, or untouched.
///
/// This is the primary interface for any client (CLI, API, TUI, etc.).
pub struct LedgerEngine<S: LedgerStore> {
    coordinator: TransactionCoordinator<S>,
    config: EngineConfig,
}

impl LedgerEngine<SqliteStore> {
    /// Create the database if needed, migrate it, and build an engine on it.
    pub async fn init(store: &StoreConfig, config: EngineConfig) -> Result<Self, LedgerError> {
        let store = SqliteStore::init(store).await?;
        Ok(Self::new(store, config))
    }

    /// Connect to an existing database.
    pub async fn connect(store: &StoreConfig, config: EngineConfig) -> Result<Self, LedgerError> {
        let store = SqliteStore::connect(store).await?;
        Ok(Self::new(store, config))
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store, &config),
            config,
        }
    }

    pub fn store(&self) -> &S {
        self.coordinator.store()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    // ========================
    // Mutations
    // ========================

    /// Open a new account funded by an initial deposit.
    pub async fn open_account(
        &self,
        account_id: &str,
        initial_amount: Amount,
    ) -> Result<Account, LedgerError> {
        self.open_account_until(None, account_id, initial_amount).await
    }

    #[instrument(skip(self, deadline))]
    pub async fn open_account_until(
        &self,
        deadline: Option<Instant>,
        account_id: &str,
        initial_amount: Amount,
    ) -> Result<Account, LedgerError> {
        let id = validate_account_id(account_id).inspect_err(reject)?;
        let amount = validate_amount(initial_amount).inspect_err(reject)?;
        let currency = self.config.currency.clone();

        let result = self
            .coordinator
            .run_until(deadline, move |unit| {
                Box::pin(async move {
                    // Serializes concurrent opens of the same id.
                    if unit.read_account_for_update(&id).await?.is_some() {
                        return Err(LedgerError::AlreadyExists(id.to_string()));
                    }

                    let mut account = Account::open(id.clone(), Amount::ZERO, currency);
                    let posting = post_deposit(&account, amount);
                    account.balance = posting.new_balance;

                    if !unit.insert_account(&account).await? {
                        return Err(LedgerError::AlreadyExists(id.to_string()));
                    }
                    unit.insert_transaction(&posting.transaction).await?;
                    unit.insert_ledger_entries(std::slice::from_ref(&posting.entry)).await?;
                    Ok(account)
                })
            })
            .await;

        log_outcome(&result, |account| {
            info!(balance = %account.balance, "Account opened")
        });
        result
    }

    /// Credit an existing account.
    pub async fn deposit(
        &self,
        account_id: &str,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        self.deposit_until(None, account_id, amount).await
    }

    #[instrument(skip(self, deadline))]
    pub async fn deposit_until(
        &self,
        deadline: Option<Instant>,
        account_id: &str,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        let id = validate_account_id(account_id).inspect_err(reject)?;
        let amount = validate_amount(amount).inspect_err(reject)?;

        let result = self
            .coordinator
            .run_until(deadline, move |unit| {
                Box::pin(async move {
                    let account = unit
                        .read_account_for_update(&id)
                        .await?
                        .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

                    let posting = post_deposit(&account, amount);
                    unit.insert_transaction(&posting.transaction).await?;
                    unit.insert_ledger_entries(std::slice::from_ref(&posting.entry)).await?;
                    unit.update_account_balance(&id, posting.new_balance).await?;
                    Ok(posting.transaction)
                })
            })
            .await;

        log_outcome(&result, |transaction| {
            info!(reference = %transaction.reference, "Deposit recorded")
        });
        result
    }

    /// Move `amount` from `source` to `destination` as one debit and one credit.
    pub async fn transfer(
        &self,
        source: &str,
        destination: &str,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        self.transfer_until(None, source, destination, amount).await
    }

    #[instrument(skip(self, deadline))]
    pub async fn transfer_until(
        &self,
        deadline: Option<Instant>,
        source: &str,
        destination: &str,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        let source = validate_account_id(source).inspect_err(reject)?;
        let destination = validate_account_id(destination).inspect_err(reject)?;
        validate_transfer_pair(&source, &destination).inspect_err(reject)?;
        let amount = validate_amount(amount).inspect_err(reject)?;

        let result = self
            .coordinator
            .run_until(deadline, move |unit| {
                Box::pin(async move {
                    let (source_account, destination_account) =
                        lock_pair(&mut *unit, &source, &destination).await?;

                    validate_sufficient_funds(&source, source_account.balance, amount)?;

                    let posting = post_transfer(&source_account, &destination_account, amount);
                    unit.insert_transaction(&posting.transaction).await?;
                    unit.insert_ledger_entries(&posting.entries()).await?;
                    unit.update_account_balance(&source, posting.new_source_balance).await?;
                    unit.update_account_balance(&destination, posting.new_destination_balance)
                        .await?;
                    Ok(posting.transaction)
                })
            })
            .await;

        log_outcome(&result, |transaction| {
            info!(reference = %transaction.reference, "Transfer recorded")
        });
        result
    }

    // ========================
    // Reads
    // ========================

    /// Current balance of one account. Plain read, no lock.
    #[instrument(skip(self))]
    pub async fn get_account(&self, account_id: &str) -> Result<AccountSnapshot, LedgerError> {
        Ok(self.get_account_details(account_id).await?.snapshot())
    }

    pub async fn get_account_details(&self, account_id: &str) -> Result<Account, LedgerError> {
        let id = validate_account_id(account_id)?;
        self.store()
            .read_account(&id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store().list_accounts().await?)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.store()
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// A transaction with the ledger entries it produced.
    pub async fn get_transaction_with_entries(
        &self,
        id: TransactionId,
    ) -> Result<(Transaction, Vec<LedgerEntry>), LedgerError> {
        let transaction = self.get_transaction(id).await?;
        let entries = self.store().list_transaction_entries(id).await?;
        Ok((transaction, entries))
    }

    /// Transactions in recording order, optionally for one account.
    pub async fn list_transactions(
        &self,
        account_id: Option<&str>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        match account_id {
            Some(account_id) => {
                let account = self.get_account_details(account_id).await?;
                Ok(self
                    .store()
                    .list_transactions(Some(&account.account_id))
                    .await?)
            }
            None => Ok(self.store().list_transactions(None).await?),
        }
    }

    /// Ledger entries of one account, oldest first.
    pub async fn statement(&self, account_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let account = self.get_account_details(account_id).await?;
        Ok(self
            .store()
            .list_ledger_entries(Some(&account.account_id))
            .await?)
    }

    /// Recompute balances from the ledger and report every inconsistency.
    #[instrument(skip(self))]
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let accounts = self.store().list_accounts().await?;
        let transactions = self.store().list_transactions(None).await?;
        let entries = self.store().list_ledger_entries(None).await?;

        let report = build_integrity_report(&accounts, &transactions, &entries);
        if report.is_healthy() {
            info!(accounts = report.account_count, "Ledger is consistent");
        } else {
            warn!(issues = report.issues.len(), "Ledger integrity issues found");
        }
        Ok(report)
    }
}

/// Lock both accounts in ascending id order, whatever the transfer direction.
async fn lock_pair<U: UnitOfWork>(
    unit: &mut U,
    source: &AccountId,
    destination: &AccountId,
) -> Result<(Account, Account), LedgerError> {
    let (first, second) = if source < destination {
        (source, destination)
    } else {
        (destination, source)
    };

    let first_account = unit.read_account_for_update(first).await?;
    let second_account = unit.read_account_for_update(second).await?;

    let (source_account, destination_account) = if first == source {
        (first_account, second_account)
    } else {
        (second_account, first_account)
    };

    let source_account =
        source_account.ok_or_else(|| LedgerError::NotFound(source.to_string()))?;
    let destination_account =
        destination_account.ok_or_else(|| LedgerError::NotFound(destination.to_string()))?;
    Ok((source_account, destination_account))
}

fn reject<E: std::fmt::Display>(err: &E) {
    warn!(error = %err, "Request rejected");
}

fn log_outcome<T>(result: &Result<T, LedgerError>, on_success: impl FnOnce(&T)) {
    match result {
        Ok(value) => on_success(value),
        Err(err) if err.is_store_failure() => error!(error = %err, "Request failed"),
        Err(err) => warn!(error = %err, "Request rejected"),
    }
}
