//! Pure checks applied before any store access.

use thiserror::Error;

use super::{AccountId, Amount, MAX_AMOUNT, MIN_AMOUNT, MINOR_UNIT_SCALE};

/// Longest accepted account identifier.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid account identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("amount {0} out of range (must be between 1 and 1000000 with at most 2 decimals)")]
    AmountOutOfRange(Amount),

    #[error("source and destination are the same account: {0}")]
    SameAccount(AccountId),

    #[error("insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Amount,
        required: Amount,
    },
}

/// Identifiers are opaque: 1 to 64 ASCII alphanumerics, `-` or `_`.
/// UUIDs and ids such as `acct-1` both qualify.
pub fn validate_account_id(id: &str) -> Result<AccountId, ValidationError> {
    let well_formed = !id.is_empty()
        && id.len() <= MAX_ACCOUNT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !well_formed {
        return Err(ValidationError::InvalidIdentifier(id.to_string()));
    }
    Ok(AccountId::new_unchecked(id))
}

/// Bounds are inclusive; sub-cent precision is out of range too.
pub fn validate_amount(amount: Amount) -> Result<Amount, ValidationError> {
    let in_bounds = amount >= MIN_AMOUNT && amount <= MAX_AMOUNT;
    let on_minor_unit = amount.normalize().scale() <= MINOR_UNIT_SCALE;

    if !(in_bounds && on_minor_unit) {
        return Err(ValidationError::AmountOutOfRange(amount));
    }
    Ok(amount)
}

pub fn validate_transfer_pair(
    source: &AccountId,
    destination: &AccountId,
) -> Result<(), ValidationError> {
    if source == destination {
        return Err(ValidationError::SameAccount(source.clone()));
    }
    Ok(())
}

pub fn validate_sufficient_funds(
    account_id: &AccountId,
    balance: Amount,
    amount: Amount,
) -> Result<(), ValidationError> {
    if balance < amount {
        return Err(ValidationError::InsufficientFunds {
            account_id: account_id.clone(),
            balance,
            required: amount,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_account_id_accepts_opaque_ids() {
        assert!(validate_account_id("acct-1").is_ok());
        assert!(validate_account_id("unknown").is_ok());
        assert!(validate_account_id("3f2504e0-4f89-11d3-9a0c-0305e82c3301").is_ok());
        assert!(validate_account_id("savings_main").is_ok());
        assert!(validate_account_id(&"a".repeat(MAX_ACCOUNT_ID_LEN)).is_ok());
    }

    #[test]
    fn test_account_id_rejects_malformed() {
        for bad in ["", " ", "acct 1", "acct/1", "ácct", "a;drop table"] {
            assert!(
                matches!(validate_account_id(bad), Err(ValidationError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_account_id(&"a".repeat(MAX_ACCOUNT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_amount_boundaries() {
        assert_eq!(validate_amount(dec!(1)), Ok(dec!(1)));
        assert_eq!(validate_amount(dec!(1000000)), Ok(dec!(1000000)));
        assert_eq!(validate_amount(dec!(1000000.00)), Ok(dec!(1000000.00)));
        assert_eq!(validate_amount(dec!(1.50)), Ok(dec!(1.50)));

        for bad in [
            dec!(0.999),
            dec!(0.99),
            dec!(0),
            dec!(-5),
            dec!(1000000.01),
            dec!(2000000),
        ] {
            assert_eq!(
                validate_amount(bad),
                Err(ValidationError::AmountOutOfRange(bad))
            );
        }
    }

    #[test]
    fn test_amount_rejects_sub_cent_precision() {
        assert!(validate_amount(dec!(10.005)).is_err());
        assert!(validate_amount(dec!(10.010)).is_ok());
    }

    #[test]
    fn test_transfer_pair() {
        let a = validate_account_id("acct-1").unwrap();
        let b = validate_account_id("acct-2").unwrap();
        assert!(validate_transfer_pair(&a, &b).is_ok());
        assert_eq!(
            validate_transfer_pair(&a, &a),
            Err(ValidationError::SameAccount(a.clone()))
        );
    }

    #[test]
    fn test_sufficient_funds() {
        let a = validate_account_id("acct-1").unwrap();
        assert!(validate_sufficient_funds(&a, dec!(100), dec!(100)).is_ok());
        assert!(matches!(
            validate_sufficient_funds(&a, dec!(100), dec!(200)),
            Err(ValidationError::InsufficientFunds { .. })
        ));
    }
}
