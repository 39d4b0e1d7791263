//! Atomic units of work over a `LedgerStore`.
//!
//! `run` begins a unit, hands it to the work function, and commits only when
//! the work returns `Ok`. Errors, panics and the execution ceiling all end in
//! a rollback. Dropping the returned future abandons the unit; stores discard
//! uncommitted writes on drop.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::storage::{LedgerStore, UnitOfWork};

use super::{EngineConfig, LedgerError};

tokio::task_local! {
    static UNIT_ACTIVE: ();
}

/// Lifecycle of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Idle => "idle",
            UnitState::Active => "active",
            UnitState::Committed => "committed",
            UnitState::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters since the coordinator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

pub struct TransactionCoordinator<S: LedgerStore> {
    store: S,
    timeout: Duration,
    counters: Counters,
}

impl<S: LedgerStore> TransactionCoordinator<S> {
    pub fn new(store: S, config: &EngineConfig) -> Self {
        Self {
            store,
            timeout: config.unit_of_work_timeout,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            begun: self.counters.begun.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            rolled_back: self.counters.rolled_back.load(Ordering::Relaxed),
        }
    }

    /// Whether the current task is inside a unit of work.
    pub fn in_unit_of_work() -> bool {
        UNIT_ACTIVE.try_with(|_| ()).is_ok()
    }

    /// Run `work` in one atomic unit of work, bounded by the configured ceiling.
    pub async fn run<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut S::Unit) -> BoxFuture<'u, Result<T, LedgerError>> + Send,
    {
        self.run_until(None, work).await
    }

    /// Like `run`, with a caller deadline. The earlier of the deadline and
    /// the configured ceiling applies.
    pub async fn run_until<T, F>(
        &self,
        deadline: Option<Instant>,
        work: F,
    ) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut S::Unit) -> BoxFuture<'u, Result<T, LedgerError>> + Send,
    {
        if Self::in_unit_of_work() {
            warn!("Refusing to begin a nested unit of work");
            return Err(LedgerError::AlreadyActive);
        }
        UNIT_ACTIVE.scope((), self.execute(deadline, work)).await
    }

    async fn execute<T, F>(&self, deadline: Option<Instant>, work: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'u> FnOnce(&'u mut S::Unit) -> BoxFuture<'u, Result<T, LedgerError>> + Send,
    {
        let started = Instant::now();
        let ceiling = started + self.timeout;
        let deadline = deadline.map_or(ceiling, |d| d.min(ceiling));

        let mut unit = self
            .store
            .begin()
            .await
            .context("Failed to begin unit of work")?;
        self.counters.begun.fetch_add(1, Ordering::Relaxed);
        transition(UnitState::Idle, UnitState::Active);

        let outcome = {
            let guarded = AssertUnwindSafe(work(&mut unit)).catch_unwind();
            match tokio::time::timeout_at(deadline, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(LedgerError::Panicked(panic_message(payload))),
                Err(_) => Err(LedgerError::Timeout(
                    deadline.saturating_duration_since(started),
                )),
            }
        };

        match outcome {
            Ok(value) => {
                let committed = unit.commit().await;
                match committed {
                    Ok(()) => {
                        self.counters.committed.fetch_add(1, Ordering::Relaxed);
                        transition(UnitState::Active, UnitState::Committed);
                        Ok(value)
                    }
                    Err(err) => {
                        self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
                        transition(UnitState::Active, UnitState::RolledBack);
                        error!(error = %format!("{err:#}"), "Commit failed");
                        Err(LedgerError::StoreFailure(
                            err.context("Failed to commit unit of work"),
                        ))
                    }
                }
            }
            Err(original) => {
                let rolled_back = unit.rollback().await;
                self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
                transition(UnitState::Active, UnitState::RolledBack);
                match rolled_back {
                    Ok(()) => Err(original),
                    Err(rollback) => {
                        error!(
                            error = %original,
                            rollback_error = %format!("{rollback:#}"),
                            "Rollback failed"
                        );
                        Err(LedgerError::RollbackFailed {
                            original: Box::new(original),
                            rollback,
                        })
                    }
                }
            }
        }
    }
}

fn transition(from: UnitState, to: UnitState) {
    debug!(%from, %to, "Unit of work state change");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{Account, validate_account_id};
    use crate::storage::{Fault, MemoryStore, StoreOp};

    fn coordinator(store: &MemoryStore) -> TransactionCoordinator<MemoryStore> {
        TransactionCoordinator::new(store.clone(), &EngineConfig::default())
    }

    fn account(id: &str) -> Account {
        Account::open(validate_account_id(id).unwrap(), dec!(10), "USD")
    }

    #[tokio::test]
    async fn test_commits_on_ok() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);

        let acct = account("acct-1");
        let inserted = coordinator
            .run(move |unit| Box::pin(async move { Ok(unit.insert_account(&acct).await?) }))
            .await?;

        assert!(inserted);
        let id = validate_account_id("acct-1")?;
        assert!(store.read_account(&id).await?.is_some());
        assert_eq!(
            coordinator.stats(),
            CoordinatorStats {
                begun: 1,
                committed: 1,
                rolled_back: 0
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rolls_back_on_err() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);

        let acct = account("acct-1");
        let result: Result<(), _> = coordinator
            .run(move |unit| {
                Box::pin(async move {
                    unit.insert_account(&acct).await?;
                    Err(LedgerError::NotFound("acct-2".into()))
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::NotFound(_))));
        assert!(store.list_accounts().await?.is_empty());
        assert_eq!(coordinator.stats().rolled_back, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_rolled_back() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);

        let acct = account("acct-1");
        let result: Result<(), _> = coordinator
            .run(move |unit| {
                Box::pin(async move {
                    unit.insert_account(&acct).await?;
                    panic!("balance invariant broken");
                })
            })
            .await;

        match result {
            Err(LedgerError::Panicked(message)) => {
                assert_eq!(message, "balance invariant broken")
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
        assert!(store.list_accounts().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let config = EngineConfig::default().with_unit_of_work_timeout(Duration::from_millis(50));
        let coordinator = TransactionCoordinator::new(store.clone(), &config);
        store
            .inject(StoreOp::InsertAccount, Fault::Delay(Duration::from_secs(5)))
            .await;

        let acct = account("acct-1");
        let result = coordinator
            .run(move |unit| Box::pin(async move { Ok(unit.insert_account(&acct).await?) }))
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::Timeout(limit)) if limit <= Duration::from_millis(50)
        ));
        assert!(store.list_accounts().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_caller_deadline_wins_when_earlier() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);
        store
            .inject(StoreOp::InsertAccount, Fault::Delay(Duration::from_secs(5)))
            .await;

        let acct = account("acct-1");
        let deadline = Instant::now() + Duration::from_millis(20);
        let started = Instant::now();
        let result = coordinator
            .run_until(Some(deadline), move |unit| {
                Box::pin(async move { Ok(unit.insert_account(&acct).await?) })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[tokio::test]
    async fn test_nested_unit_is_refused() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = Arc::new(coordinator(&store));

        let inner = coordinator.clone();
        let result = coordinator
            .run(move |_unit| {
                Box::pin(async move {
                    inner
                        .run(|_unit| Box::pin(async { Ok(()) }))
                        .await
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::AlreadyActive)));
        assert!(!TransactionCoordinator::<MemoryStore>::in_unit_of_work());
        Ok(())
    }

    #[tokio::test]
    async fn test_rollback_failure_reports_both_errors() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);
        store.inject(StoreOp::Rollback, Fault::Fail).await;

        let result: Result<(), _> = coordinator
            .run(|_unit| Box::pin(async { Err(LedgerError::NotFound("acct-9".into())) }))
            .await;

        match result {
            Err(LedgerError::RollbackFailed { original, .. }) => {
                assert!(matches!(*original, LedgerError::NotFound(_)))
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_failure_is_store_failure() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);
        store.inject(StoreOp::Commit, Fault::Fail).await;

        let acct = account("acct-1");
        let result = coordinator
            .run(move |unit| Box::pin(async move { Ok(unit.insert_account(&acct).await?) }))
            .await;

        assert!(matches!(result, Err(LedgerError::StoreFailure(_))));
        assert!(store.list_accounts().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_begin_failure_is_store_failure() {
        let store = MemoryStore::new();
        let coordinator = coordinator(&store);
        store.inject(StoreOp::Begin, Fault::Fail).await;

        let result = coordinator
            .run(|_unit| Box::pin(async { Ok(()) }))
            .await;

        assert!(matches!(result, Err(LedgerError::StoreFailure(_))));
        assert_eq!(coordinator.stats().begun, 0);
    }
}
