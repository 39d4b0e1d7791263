use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::LedgerEngine;
use crate::domain::{Account, LedgerEntry, format_amount};
use crate::storage::LedgerStore;

/// One account with its full ledger history, as written by `export_statement_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub account: Account,
    pub entries: Vec<LedgerEntry>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a, S: LedgerStore> {
    engine: &'a LedgerEngine<S>,
}

impl<'a, S: LedgerStore> Exporter<'a, S> {
    pub fn new(engine: &'a LedgerEngine<S>) -> Self {
        Self { engine }
    }

    /// Export one account's ledger entries to CSV format
    pub async fn export_statement_csv<W: Write>(
        &self,
        account_id: &str,
        writer: W,
    ) -> Result<usize> {
        let entries = self.engine.statement(account_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "entry_id",
            "transaction_id",
            "created_at",
            "entry_type",
            "amount",
            "balance_before",
            "balance_after",
            "description",
        ])?;

        for entry in &entries {
            csv_writer.write_record([
                entry.id.to_string(),
                entry.transaction_id.to_string(),
                entry.created_at.to_rfc3339(),
                entry.entry_type.as_str().to_string(),
                format_amount(entry.amount),
                format_amount(entry.balance_before),
                format_amount(entry.balance_after),
                entry.description.clone(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export every account balance to CSV format
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.engine.list_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["account_id", "currency", "status", "balance"])?;

        for account in &accounts {
            csv_writer.write_record([
                account.account_id.to_string(),
                account.currency.clone(),
                account.status.as_str().to_string(),
                format_amount(account.balance),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export one account and its ledger entries as a JSON snapshot
    pub async fn export_statement_json<W: Write>(
        &self,
        account_id: &str,
        mut writer: W,
    ) -> Result<StatementSnapshot> {
        let account = self.engine.get_account_details(account_id).await?;
        let entries = self.engine.statement(account_id).await?;

        let snapshot = StatementSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            account,
            entries,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
