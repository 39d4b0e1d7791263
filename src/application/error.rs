use std::time::Duration;

use thiserror::Error;

use crate::domain::{Amount, ValidationError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid account identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Amount {0} out of range (must be between 1 and 1000000 with at most 2 decimals)")]
    AmountOutOfRange(Amount),

    #[error("Source and destination are the same account: {0}")]
    SameAccount(String),

    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: String,
        balance: Amount,
        required: Amount,
    },

    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("A unit of work is already active on this task")]
    AlreadyActive,

    #[error("Unit of work exceeded its time limit of {0:?}")]
    Timeout(Duration),

    #[error("Unit of work panicked: {0}")]
    Panicked(String),

    #[error("Store failure: {0:#}")]
    StoreFailure(#[from] anyhow::Error),

    #[error("Rollback failed after: {original}")]
    RollbackFailed {
        original: Box<LedgerError>,
        #[source]
        rollback: anyhow::Error,
    },
}

impl LedgerError {
    /// True for failures of the store itself, including failed rollbacks.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreFailure(_) | Self::RollbackFailed { .. })
    }

    /// True for rejections decided before any store access.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier(_) | Self::AmountOutOfRange(_) | Self::SameAccount(_)
        )
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidIdentifier(id) => Self::InvalidIdentifier(id),
            ValidationError::AmountOutOfRange(amount) => Self::AmountOutOfRange(amount),
            ValidationError::SameAccount(id) => Self::SameAccount(id.to_string()),
            ValidationError::InsufficientFunds {
                account_id,
                balance,
                required,
            } => Self::InsufficientFunds {
                account_id: account_id.to_string(),
                balance,
                required,
            },
        }
    }
}
