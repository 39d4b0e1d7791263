use std::fs::File;
use std::io::{Write, stdout};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::application::{EngineConfig, LedgerEngine};
use crate::domain::{format_amount, parse_amount};
use crate::io::Exporter;
use crate::storage::{SqliteStore, StoreConfig};
use crate::telemetry::LogFormat;

/// Ledgerwell - transactional double-entry ledger
#[derive(Parser)]
#[command(name = "ledgerwell")]
#[command(about = "Accounts and money movements recorded as immutable double-entry ledger events")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(
        short,
        long,
        global = true,
        env = "LEDGERWELL_DATABASE",
        default_value = "ledgerwell.db"
    )]
    pub database: PathBuf,

    /// Time limit for one unit of work, in seconds
    #[arg(long, global = true, env = "LEDGERWELL_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Open an account funded by an initial deposit
    Open {
        account_id: String,

        /// Initial deposit (e.g., "100.00" or "100")
        amount: String,
    },

    /// Deposit into an existing account
    Deposit {
        account_id: String,

        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,
    },

    /// Show the balance of an account
    Balance { account_id: String },

    /// Transfer funds between accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account
        #[arg(long)]
        from: String,

        /// Destination account
        #[arg(long)]
        to: String,
    },

    /// List all accounts with their balances
    Accounts,

    /// Show the ledger entries of an account
    History { account_id: String },

    /// Show a recorded transaction and its entries
    Show {
        /// Transaction ID
        id: String,
    },

    /// Verify ledger integrity
    Check,

    /// Export an account statement, or all balances when no account is given
    Export {
        account_id: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_unit_of_work_timeout(Duration::from_secs(self.timeout_secs))
    }

    pub async fn run(self) -> Result<()> {
        let store_config = self.store_config();
        let engine_config = self.engine_config();

        let engine = match self.command {
            Commands::Init => LedgerEngine::init(&store_config, engine_config).await?,
            _ => LedgerEngine::connect(&store_config, engine_config).await?,
        };
        run_command(&engine, &store_config, self.command).await
    }
}

async fn run_command(
    engine: &LedgerEngine<SqliteStore>,
    store_config: &StoreConfig,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Init => {
            println!(
                "Database initialized: {}",
                store_config.database_path.display()
            );
        }

        Commands::Open { account_id, amount } => {
            let amount =
                parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let account = engine.open_account(&account_id, amount).await?;
            println!(
                "Opened account {} with {} {}",
                account.account_id,
                format_amount(account.balance),
                account.currency
            );
        }

        Commands::Deposit { account_id, amount } => {
            let amount =
                parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let transaction = engine.deposit(&account_id, amount).await?;
            let balance = engine.get_account(&account_id).await?.balance;
            println!(
                "Deposited {} to {} ({}), balance {}",
                format_amount(transaction.amount),
                account_id,
                transaction.reference,
                format_amount(balance)
            );
        }

        Commands::Balance { account_id } => {
            let account = engine.get_account_details(&account_id).await?;
            println!(
                "{}: {} {}",
                account.account_id,
                format_amount(account.balance),
                account.currency
            );
        }

        Commands::Transfer { amount, from, to } => {
            let amount =
                parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let transaction = engine.transfer(&from, &to, amount).await?;
            println!(
                "Recorded transfer: {} {} -> {} ({})",
                format_amount(transaction.amount),
                from,
                to,
                transaction.reference
            );
        }

        Commands::Accounts => run_accounts_command(engine).await?,

        Commands::History { account_id } => run_history_command(engine, &account_id).await?,

        Commands::Show { id } => {
            let id =
                Uuid::parse_str(&id).with_context(|| format!("Invalid transaction ID '{}'", id))?;
            run_show_command(engine, id).await?;
        }

        Commands::Check => run_check_command(engine).await?,

        Commands::Export {
            account_id,
            format,
            output,
        } => run_export_command(engine, account_id.as_deref(), format, output).await?,
    }

    Ok(())
}

async fn run_accounts_command(engine: &LedgerEngine<SqliteStore>) -> Result<()> {
    let accounts = engine.list_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts found.");
        return Ok(());
    }

    println!(
        "{:<24} {:>14} {:<8} {:<8}",
        "ACCOUNT", "BALANCE", "CURRENCY", "STATUS"
    );
    println!("{}", "-".repeat(57));
    for account in accounts {
        println!(
            "{:<24} {:>14} {:<8} {:<8}",
            truncate(account.account_id.as_str(), 24),
            format_amount(account.balance),
            account.currency,
            account.status.as_str()
        );
    }
    Ok(())
}

async fn run_history_command(engine: &LedgerEngine<SqliteStore>, account_id: &str) -> Result<()> {
    let entries = engine.statement(account_id).await?;

    println!(
        "{:<20} {:<7} {:>12} {:>14} {:>14}",
        "DATE", "TYPE", "AMOUNT", "BEFORE", "AFTER"
    );
    println!("{}", "-".repeat(71));
    for entry in entries {
        println!(
            "{:<20} {:<7} {:>12} {:>14} {:>14}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.entry_type.as_str(),
            format_amount(entry.amount),
            format_amount(entry.balance_before),
            format_amount(entry.balance_after)
        );
    }
    Ok(())
}

async fn run_show_command(engine: &LedgerEngine<SqliteStore>, id: Uuid) -> Result<()> {
    let (transaction, entries) = engine.get_transaction_with_entries(id).await?;

    println!("Transaction: {}", transaction.id);
    println!("  Reference:   {}", transaction.reference);
    println!("  Type:        {}", transaction.transaction_type.as_str());
    println!("  Status:      {}", transaction.status.as_str());
    println!("  Amount:      {}", format_amount(transaction.amount));
    if let Some(from) = &transaction.from_account {
        println!("  From:        {}", from);
    }
    if let Some(to) = &transaction.to_account {
        println!("  To:          {}", to);
    }
    println!("  Description: {}", transaction.description);
    println!(
        "  Recorded at: {}",
        transaction.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    println!();
    println!("  Entries:");
    for entry in &entries {
        println!(
            "    - {:<6} {:<20} {:>12}  {} -> {}",
            entry.entry_type.as_str(),
            truncate(entry.account_id.as_str(), 20),
            format_amount(entry.amount),
            format_amount(entry.balance_before),
            format_amount(entry.balance_after)
        );
    }
    Ok(())
}

async fn run_check_command(engine: &LedgerEngine<SqliteStore>) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = engine.check_integrity().await?;

    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.transaction_count);
    println!("Entries:      {}", report.entry_count);
    println!();
    println!(
        "Total balance:   {:>14}",
        format_amount(report.total_balance)
    );
    println!(
        "Total deposited: {:>14}",
        format_amount(report.total_deposited)
    );
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    engine: &LedgerEngine<SqliteStore>,
    account_id: Option<&str>,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> Result<()> {
    let exporter = Exporter::new(engine);

    let writer: Box<dyn Write> = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match (account_id, format) {
        (Some(account_id), ExportFormat::Csv) => {
            let count = exporter.export_statement_csv(account_id, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} entries", count);
            }
        }
        (Some(account_id), ExportFormat::Json) => {
            let snapshot = exporter.export_statement_json(account_id, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported account {} with {} entries",
                    snapshot.account.account_id,
                    snapshot.entries.len()
                );
            }
        }
        (None, ExportFormat::Csv) => {
            let count = exporter.export_balances_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        (None, ExportFormat::Json) => {
            anyhow::bail!("JSON export needs an account; balances export as CSV only");
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
