use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Account, AccountId, Amount, Transaction, TransactionId};

pub type LedgerEntryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Balance decreases
    Debit,
    /// Balance increases
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debit" => Some(EntryType::Debit),
            "credit" => Some(EntryType::Credit),
            _ => None,
        }
    }

    /// Apply an amount of this entry type to a balance.
    pub fn apply(&self, balance: Amount, amount: Amount) -> Amount {
        match self {
            EntryType::Debit => balance - amount,
            EntryType::Credit => balance + amount,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One account's side of a transaction. Entries are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub entry_type: EntryType,
    /// Always positive; the direction is carried by `entry_type`
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn post(
        transaction: &Transaction,
        account_id: AccountId,
        entry_type: EntryType,
        balance_before: Amount,
        description: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            account_id,
            entry_type,
            amount: transaction.amount,
            balance_before,
            balance_after: entry_type.apply(balance_before, transaction.amount),
            description: description.to_string(),
            created_at: transaction.created_at,
        }
    }

    /// Signed effect of this entry on its account's balance.
    pub fn signed_amount(&self) -> Amount {
        self.entry_type.apply(Amount::ZERO, self.amount)
    }

    /// Whether `balance_after` follows from `balance_before` and the amount.
    pub fn is_arithmetic_consistent(&self) -> bool {
        self.amount > Amount::ZERO
            && self.entry_type.apply(self.balance_before, self.amount) == self.balance_after
    }
}

/// Everything a deposit writes, computed before the unit of work touches the store.
#[derive(Debug, Clone)]
pub struct DepositPosting {
    pub transaction: Transaction,
    pub entry: LedgerEntry,
    pub new_balance: Amount,
}

/// Everything a transfer writes: one debit on the source, one credit on the destination.
#[derive(Debug, Clone)]
pub struct TransferPosting {
    pub transaction: Transaction,
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
    pub new_source_balance: Amount,
    pub new_destination_balance: Amount,
}

impl TransferPosting {
    pub fn entries(&self) -> [LedgerEntry; 2] {
        [self.debit.clone(), self.credit.clone()]
    }
}

/// Build the deposit into `account`, whose current balance is the entry's starting point.
pub fn post_deposit(account: &Account, amount: Amount) -> DepositPosting {
    let transaction = Transaction::deposit(account.account_id.clone(), amount);
    let entry = LedgerEntry::post(
        &transaction,
        account.account_id.clone(),
        EntryType::Credit,
        account.balance,
        "deposit transaction",
    );
    let new_balance = entry.balance_after;

    DepositPosting {
        transaction,
        entry,
        new_balance,
    }
}

/// Build the transfer between two locked accounts. Funds must already be validated.
pub fn post_transfer(source: &Account, destination: &Account, amount: Amount) -> TransferPosting {
    let transaction = Transaction::transfer(
        source.account_id.clone(),
        destination.account_id.clone(),
        amount,
    );
    let debit = LedgerEntry::post(
        &transaction,
        source.account_id.clone(),
        EntryType::Debit,
        source.balance,
        "transfer transaction",
    );
    let credit = LedgerEntry::post(
        &transaction,
        destination.account_id.clone(),
        EntryType::Credit,
        destination.balance,
        "transfer transaction",
    );

    TransferPosting {
        new_source_balance: debit.balance_after,
        new_destination_balance: credit.balance_after,
        transaction,
        debit,
        credit,
    }
}

/// Compute an account's balance from its ledger entries.
pub fn compute_balance(account_id: &AccountId, entries: &[LedgerEntry]) -> Amount {
    entries
        .iter()
        .filter(|entry| &entry.account_id == account_id)
        .map(LedgerEntry::signed_amount)
        .sum()
}

/// Compute balances for all accounts appearing in the entries.
pub fn compute_all_balances(entries: &[LedgerEntry]) -> HashMap<AccountId, Amount> {
    let mut balances: HashMap<AccountId, Amount> = HashMap::new();

    for entry in entries {
        *balances.entry(entry.account_id.clone()).or_insert(Amount::ZERO) += entry.signed_amount();
    }

    balances
}

/// Total debits and total credits of a set of entries.
pub fn debit_credit_totals(entries: &[LedgerEntry]) -> (Amount, Amount) {
    entries
        .iter()
        .fold((Amount::ZERO, Amount::ZERO), |(debits, credits), entry| {
            match entry.entry_type {
                EntryType::Debit => (debits + entry.amount, credits),
                EntryType::Credit => (debits, credits + entry.amount),
            }
        })
}
