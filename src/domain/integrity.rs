use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{
    Account, AccountId, Amount, LedgerEntry, Transaction, TransactionId, TransactionType,
    compute_all_balances, debit_credit_totals, format_amount,
};

/// Result of re-deriving the ledger from its append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub entry_count: usize,
    /// Sum of all account balances
    pub total_balance: Amount,
    /// Sum of all deposits; transfers only move value around
    pub total_deposited: Amount,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Cross-check accounts, transactions and entries against each other.
pub fn build_integrity_report(
    accounts: &[Account],
    transactions: &[Transaction],
    entries: &[LedgerEntry],
) -> IntegrityReport {
    let mut issues = Vec::new();

    let derived = compute_all_balances(entries);
    for account in accounts {
        let expected = derived
            .get(&account.account_id)
            .copied()
            .unwrap_or(Amount::ZERO);
        if account.balance != expected {
            issues.push(format!(
                "Account {} balance {} does not match its entries ({})",
                account.account_id,
                format_amount(account.balance),
                format_amount(expected)
            ));
        }
        if account.balance < Amount::ZERO {
            issues.push(format!(
                "Account {} has a negative balance",
                account.account_id
            ));
        }
    }

    let known: HashSet<&AccountId> = accounts.iter().map(|a| &a.account_id).collect();
    let mut by_transaction: HashMap<TransactionId, Vec<LedgerEntry>> = HashMap::new();
    for entry in entries {
        if !known.contains(&entry.account_id) {
            issues.push(format!(
                "Entry {} references unknown account {}",
                entry.id, entry.account_id
            ));
        }
        if !entry.is_arithmetic_consistent() {
            issues.push(format!(
                "Entry {} on {}: {} {} does not lead from {} to {}",
                entry.id,
                entry.account_id,
                entry.entry_type,
                format_amount(entry.amount),
                format_amount(entry.balance_before),
                format_amount(entry.balance_after)
            ));
        }
        by_transaction
            .entry(entry.transaction_id)
            .or_default()
            .push(entry.clone());
    }

    let mut total_deposited = Amount::ZERO;
    for transaction in transactions {
        if !transaction.has_valid_shape() {
            issues.push(format!(
                "Transaction {} has inconsistent account references for a {}",
                transaction.reference, transaction.transaction_type
            ));
        }

        let owned = by_transaction
            .remove(&transaction.id)
            .unwrap_or_default();
        let expected = transaction.transaction_type.expected_entries();
        if owned.len() != expected {
            issues.push(format!(
                "Transaction {} has {} ledger entries, expected {}",
                transaction.reference,
                owned.len(),
                expected
            ));
            continue;
        }

        let (debits, credits) = debit_credit_totals(&owned);
        match transaction.transaction_type {
            TransactionType::Deposit => {
                total_deposited += credits;
                if debits != Amount::ZERO || credits != transaction.amount {
                    issues.push(format!(
                        "Deposit {} entries do not credit {}",
                        transaction.reference,
                        format_amount(transaction.amount)
                    ));
                }
            }
            TransactionType::Transfer => {
                if debits != credits || debits != transaction.amount {
                    issues.push(format!(
                        "Transfer {} is unbalanced: debits {}, credits {}",
                        transaction.reference,
                        format_amount(debits),
                        format_amount(credits)
                    ));
                }
            }
        }
    }

    for (transaction_id, orphans) in by_transaction {
        issues.push(format!(
            "{} ledger entries reference unknown transaction {}",
            orphans.len(),
            transaction_id
        ));
    }

    let total_balance: Amount = accounts.iter().map(|a| a.balance).sum();
    if issues.is_empty() && total_balance != total_deposited {
        issues.push(format!(
            "Total balance {} differs from total deposited {}",
            format_amount(total_balance),
            format_amount(total_deposited)
        ));
    }

    IntegrityReport {
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        entry_count: entries.len(),
        total_balance,
        total_deposited,
        issues,
    }
}
