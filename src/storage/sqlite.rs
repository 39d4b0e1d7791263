use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction as SqlxTransaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountStatus, Amount, EntryType, LedgerEntry, Transaction,
    TransactionId, TransactionStatus, TransactionType, amount_from_storage, amount_to_storage,
};

use super::{LedgerStore, MIGRATION_001_INITIAL, UnitOfWork};

const ACCOUNT_COLUMNS: &str = "account_id, balance, currency, status, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, reference, transaction_type, from_account_id, to_account_id, amount, description, status, created_at";
const ENTRY_COLUMNS: &str = "id, transaction_id, account_id, entry_type, amount, balance_before, balance_after, description, created_at";

/// Connection settings for the SQLite store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// How long a writer waits for the database write lock before failing
    pub busy_timeout: Duration,
    pub create_if_missing: bool,
}

impl StoreConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            create_if_missing: false,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(self.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(self.busy_timeout)
            .foreign_keys(true)
    }
}

/// SQLite-backed ledger store.
///
/// SQLite has no row locks: the first write of a unit of work takes the
/// database write lock, which then covers every row until commit or rollback.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the SQLite database described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (create if missing + connect + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let config = config.clone().with_create_if_missing(true);
        let store = Self::connect(&config).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    type Unit = SqliteUnit;

    async fn begin(&self) -> Result<SqliteUnit> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;
        Ok(SqliteUnit { tx })
    }

    async fn read_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY account_id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(row_to_account).collect()
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn list_transactions(&self, account_id: Option<&AccountId>) -> Result<Vec<Transaction>> {
        let rows = match account_id {
            Some(id) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {TRANSACTION_COLUMNS}
                    FROM transactions
                    WHERE from_account_id = ? OR to_account_id = ?
                    ORDER BY rowid
                    "#
                ))
                .bind(id.as_str())
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY rowid"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list transactions")?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn list_ledger_entries(
        &self,
        account_id: Option<&AccountId>,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = match account_id {
            Some(id) => {
                sqlx::query(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? ORDER BY rowid"
                ))
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries ORDER BY rowid"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list ledger entries")?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_transaction_entries(&self, id: TransactionId) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE transaction_id = ? ORDER BY rowid"
        ))
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list entries of transaction {id}"))?;

        rows.iter().map(row_to_entry).collect()
    }
}

/// One SQLite transaction. Dropping it without commit rolls it back.
pub struct SqliteUnit {
    tx: SqlxTransaction<'static, Sqlite>,
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn read_account_for_update(&mut self, id: &AccountId) -> Result<Option<Account>> {
        // A no-op write takes the database write lock up front, so a later
        // write in this unit never has to upgrade a read lock.
        let row = sqlx::query(&format!(
            r#"
            UPDATE accounts
            SET balance = balance
            WHERE account_id = ?
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to lock account {id}"))?;

        debug!(account_id = %id, found = row.is_some(), "Locked account row");
        row.as_ref().map(row_to_account).transpose()
    }

    async fn read_account(&mut self, id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (account_id, balance, currency, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO NOTHING
            "#,
        )
        .bind(account.account_id.as_str())
        .bind(amount_to_storage(account.balance))
        .bind(&account.currency)
        .bind(account.status.as_str())
        .bind(account.created_at.to_rfc3339())
        .bind(account.updated_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert account")?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_account_balance(&mut self, id: &AccountId, balance: Amount) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET balance = ?, updated_at = ? WHERE account_id = ?",
        )
        .bind(amount_to_storage(balance))
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to update balance of account {id}"))?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Account {id} vanished while its balance was being updated");
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, reference, transaction_type, from_account_id, to_account_id, amount, description, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(&transaction.reference)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.from_account.as_ref().map(AccountId::as_str))
        .bind(transaction.to_account.as_ref().map(AccountId::as_str))
        .bind(amount_to_storage(transaction.amount))
        .bind(&transaction.description)
        .bind(transaction.status.as_str())
        .bind(transaction.created_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert transaction")?;
        Ok(())
    }

    async fn insert_ledger_entries(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (id, transaction_id, account_id, entry_type, amount, balance_before, balance_after, description, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.id.to_string())
            .bind(entry.transaction_id.to_string())
            .bind(entry.account_id.as_str())
            .bind(entry.entry_type.as_str())
            .bind(amount_to_storage(entry.amount))
            .bind(amount_to_storage(entry.balance_before))
            .bind(amount_to_storage(entry.balance_after))
            .bind(&entry.description)
            .bind(entry.created_at.to_rfc3339())
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert ledger entry")?;
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit database transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back database transaction")
    }
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid {column} timestamp"))?
        .with_timezone(&Utc))
}

fn parse_amount_column(row: &SqliteRow, column: &str) -> Result<Amount> {
    let raw: String = row.get(column);
    amount_from_storage(&raw).with_context(|| format!("Invalid {column} amount: {raw}"))
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let status_str: String = row.get("status");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Account {
        account_id: AccountId::new_unchecked(row.get::<String, _>("account_id")),
        balance: parse_amount_column(row, "balance")?,
        currency: row.get("currency"),
        status: AccountStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let id_str: String = row.get("id");
    let type_str: String = row.get("transaction_type");
    let status_str: String = row.get("status");
    let from_str: Option<String> = row.get("from_account_id");
    let to_str: Option<String> = row.get("to_account_id");
    let created_at_str: String = row.get("created_at");

    Ok(Transaction {
        id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
        reference: row.get("reference"),
        transaction_type: TransactionType::parse(&type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
        from_account: from_str.map(AccountId::new_unchecked),
        to_account: to_str.map(AccountId::new_unchecked),
        amount: parse_amount_column(row, "amount")?,
        description: row.get("description"),
        status: TransactionStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let id_str: String = row.get("id");
    let transaction_id_str: String = row.get("transaction_id");
    let entry_type_str: String = row.get("entry_type");
    let created_at_str: String = row.get("created_at");

    Ok(LedgerEntry {
        id: Uuid::parse_str(&id_str).context("Invalid ledger entry ID")?,
        transaction_id: Uuid::parse_str(&transaction_id_str).context("Invalid transaction ID")?,
        account_id: AccountId::new_unchecked(row.get::<String, _>("account_id")),
        entry_type: EntryType::parse(&entry_type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid entry type: {}", entry_type_str))?,
        amount: parse_amount_column(row, "amount")?,
        balance_before: parse_amount_column(row, "balance_before")?,
        balance_after: parse_amount_column(row, "balance_after")?,
        description: row.get("description"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
