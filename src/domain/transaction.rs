use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount, format_amount};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Money entering the ledger; only the destination is set.
    Deposit,
    /// Money moving between two accounts of the ledger.
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionType::Deposit),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }

    /// Number of ledger entries a well-formed transaction of this type owns.
    pub fn expected_entries(&self) -> usize {
        match self {
            TransactionType::Deposit => 1,
            TransactionType::Transfer => 2,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recording is synchronous, so only completed transactions are ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "completed" => Some(TransactionStatus::Completed),
            _ => None,
        }
    }
}

/// One business event. Immutable once recorded; its ledger entries carry the
/// per-account effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Human-readable reference, unique across the ledger
    pub reference: String,
    pub transaction_type: TransactionType,
    pub from_account: Option<AccountId>,
    pub to_account: Option<AccountId>,
    pub amount: Amount,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn deposit(to: AccountId, amount: Amount) -> Self {
        let description = format!("deposit {} to {}", format_amount(amount), to);
        Self::new(TransactionType::Deposit, None, Some(to), amount, description)
    }

    pub fn transfer(from: AccountId, to: AccountId, amount: Amount) -> Self {
        assert!(from != to, "Transfer requires distinct accounts");
        let description = format!(
            "transfer {} from {} to {}",
            format_amount(amount),
            from,
            to
        );
        Self::new(
            TransactionType::Transfer,
            Some(from),
            Some(to),
            amount,
            description,
        )
    }

    fn new(
        transaction_type: TransactionType,
        from_account: Option<AccountId>,
        to_account: Option<AccountId>,
        amount: Amount,
        description: String,
    ) -> Self {
        assert!(amount > Amount::ZERO, "Transaction amount must be positive");
        let id = Uuid::new_v4();
        Self {
            id,
            reference: reference_for(id),
            transaction_type,
            from_account,
            to_account,
            amount,
            description,
            status: TransactionStatus::Completed,
            created_at: Utc::now(),
        }
    }

    /// Whether the account references match the transaction type.
    pub fn has_valid_shape(&self) -> bool {
        match self.transaction_type {
            TransactionType::Deposit => self.from_account.is_none() && self.to_account.is_some(),
            TransactionType::Transfer => match (&self.from_account, &self.to_account) {
                (Some(from), Some(to)) => from != to,
                _ => false,
            },
        }
    }

    pub fn involves(&self, account_id: &AccountId) -> bool {
        self.from_account.as_ref() == Some(account_id)
            || self.to_account.as_ref() == Some(account_id)
    }
}

fn reference_for(id: TransactionId) -> String {
    format!("TRX-{}", id.simple().to_string().to_uppercase())
}
