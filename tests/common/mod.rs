// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use ledgerwell::domain::Amount;
use ledgerwell::{EngineConfig, LedgerEngine, SqliteStore, StoreConfig};
use tempfile::TempDir;

/// Helper to create a test engine with a temporary database
pub async fn test_engine() -> Result<(LedgerEngine<SqliteStore>, TempDir)> {
    test_engine_with(EngineConfig::default()).await
}

pub async fn test_engine_with(
    config: EngineConfig,
) -> Result<(LedgerEngine<SqliteStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let store = StoreConfig::new(temp_dir.path().join("test.db"))
        .with_max_connections(8)
        .with_busy_timeout(Duration::from_secs(10));
    let engine = LedgerEngine::init(&store, config).await?;
    Ok((engine, temp_dir))
}

/// Balance of an account, panicking if it cannot be read
pub async fn balance(engine: &LedgerEngine<SqliteStore>, account_id: &str) -> Amount {
    engine.get_account(account_id).await.unwrap().balance
}

/// Test fixture: acct-1 with 100 and acct-2 with 50
pub async fn open_standard_accounts(engine: &LedgerEngine<SqliteStore>) -> Result<()> {
    engine.open_account("acct-1", Amount::from(100)).await?;
    engine.open_account("acct-2", Amount::from(50)).await?;
    Ok(())
}
