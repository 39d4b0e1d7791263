mod common;

use anyhow::Result;
use common::{balance, open_standard_accounts, test_engine};
use ledgerwell::LedgerError;
use ledgerwell::domain::{Account, EntryType, TransactionType, validate_account_id};
use ledgerwell::storage::{LedgerStore, UnitOfWork};
use ledgerwell::{SqliteStore, StoreConfig};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_open_account_then_get() -> Result<()> {
    let (engine, _temp) = test_engine().await?;

    let account = engine.open_account("acct-1", dec!(100)).await?;
    assert_eq!(account.balance, dec!(100));
    assert_eq!(account.currency, "USD");

    let snapshot = engine.get_account("acct-1").await?;
    assert_eq!(snapshot.account_id.as_str(), "acct-1");
    assert_eq!(snapshot.balance, dec!(100));

    let entries = engine.statement("acct-1").await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::Credit);
    assert_eq!(entries[0].balance_before, dec!(0));
    assert_eq!(entries[0].balance_after, dec!(100));
    assert_eq!(entries[0].description, "deposit transaction");

    let transactions = engine.list_transactions(Some("acct-1")).await?;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].transaction_type, TransactionType::Deposit);
    assert_eq!(transactions[0].description, "deposit 100.00 to acct-1");
    Ok(())
}

#[tokio::test]
async fn test_open_account_twice_fails() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    engine.open_account("acct-1", dec!(100)).await?;

    let result = engine.open_account("acct-1", dec!(250)).await;
    assert!(matches!(result, Err(LedgerError::AlreadyExists(ref id)) if id == "acct-1"));

    assert_eq!(balance(&engine, "acct-1").await, dec!(100));
    assert_eq!(engine.list_transactions(None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_get_unknown_account() -> Result<()> {
    let (engine, _temp) = test_engine().await?;

    let result = engine.get_account("unknown").await;
    assert!(matches!(result, Err(LedgerError::NotFound(ref id)) if id == "unknown"));
    Ok(())
}

#[tokio::test]
async fn test_amount_boundaries() -> Result<()> {
    let (engine, _temp) = test_engine().await?;

    engine.open_account("min", dec!(1)).await?;
    engine.open_account("max", dec!(1000000)).await?;

    for (id, amount) in [
        ("low", dec!(0.999)),
        ("zero", dec!(0)),
        ("negative", dec!(-10)),
        ("high", dec!(1000000.01)),
        ("sub-cent", dec!(10.005)),
    ] {
        let result = engine.open_account(id, amount).await;
        assert!(
            matches!(result, Err(LedgerError::AmountOutOfRange(_))),
            "{amount} should be rejected"
        );
    }

    assert_eq!(engine.list_accounts().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_invalid_identifiers_rejected() -> Result<()> {
    let (engine, _temp) = test_engine().await?;

    for bad in ["", "acct 1", "acct;1", &"x".repeat(65)] {
        let result = engine.open_account(bad, dec!(10)).await;
        assert!(matches!(result, Err(LedgerError::InvalidIdentifier(_))));
    }
    assert!(engine.list_accounts().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_deposit_into_existing_account() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    open_standard_accounts(&engine).await?;

    let transaction = engine.deposit("acct-2", dec!(12.50)).await?;
    assert_eq!(transaction.transaction_type, TransactionType::Deposit);
    assert_eq!(balance(&engine, "acct-2").await, dec!(62.50));

    let (_, entries) = engine.get_transaction_with_entries(transaction.id).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].balance_before, dec!(50));
    assert_eq!(entries[0].balance_after, dec!(62.50));

    let result = engine.deposit("unknown", dec!(10)).await;
    assert!(matches!(result, Err(LedgerError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_state_survives_reconnect() -> Result<()> {
    let (engine, temp) = test_engine().await?;
    open_standard_accounts(&engine).await?;
    engine.transfer("acct-1", "acct-2", dec!(0.5) + dec!(9.50)).await?;
    drop(engine);

    let store = SqliteStore::connect(&StoreConfig::new(temp.path().join("test.db"))).await?;
    let accounts = store.list_accounts().await?;
    let balances: Vec<_> = accounts
        .iter()
        .map(|a| (a.account_id.as_str().to_string(), a.balance))
        .collect();
    assert_eq!(
        balances,
        vec![
            ("acct-1".to_string(), dec!(90)),
            ("acct-2".to_string(), dec!(60))
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_ledger_history_is_append_only() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    open_standard_accounts(&engine).await?;

    let pool = engine.store().pool();
    assert!(
        sqlx::query("DELETE FROM ledger_entries")
            .execute(pool)
            .await
            .is_err()
    );
    assert!(
        sqlx::query("UPDATE transactions SET amount = '1'")
            .execute(pool)
            .await
            .is_err()
    );
    assert_eq!(engine.store().list_ledger_entries(None).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unit_reads_its_own_uncommitted_insert() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    let store = engine.store();
    let id = validate_account_id("acct-9")?;

    let mut unit = store.begin().await?;
    assert!(unit.read_account(&id).await?.is_none());
    assert!(unit.insert_account(&Account::open(id.clone(), dec!(25), "USD")).await?);

    let seen = unit.read_account(&id).await?;
    assert_eq!(seen.map(|a| a.balance), Some(dec!(25)));
    assert!(store.read_account(&id).await?.is_none());

    unit.rollback().await?;
    assert!(store.read_account(&id).await?.is_none());
    Ok(())
}
