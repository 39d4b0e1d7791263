use rust_decimal::Decimal;
use thiserror::Error;

/// Money is a fixed-point decimal. Binary floating point never touches it.
pub type Amount = Decimal;

/// Number of fractional digits in the currency's minor unit (cents).
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Smallest amount accepted for a deposit or transfer.
pub const MIN_AMOUNT: Decimal = Decimal::ONE;

/// Largest amount accepted for a deposit or transfer.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Format an amount with exactly two fractional digits.
/// Example: 50 -> "50.00", 12.5 -> "12.50", -0.01 -> "-0.01"
pub fn format_amount(amount: Amount) -> String {
    let mut rounded = amount.round_dp(MINOR_UNIT_SCALE);
    rounded.rescale(MINOR_UNIT_SCALE);
    rounded.to_string()
}

/// Parse a decimal string into an amount without going through a float.
/// Example: "50.00" -> 50.00, "12.5" -> 12.5, ".50" -> 0.50
///
/// Precision is preserved as written; range and scale checks belong to
/// validation, so "10.005" parses fine and is rejected later.
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }

    // Plain decimal notation only: no exponents, separators or signs other than "-".
    if !input
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(ParseAmountError::InvalidFormat(input.to_string()));
    }

    let normalized = if input.starts_with('.') {
        format!("0{input}")
    } else {
        input.to_string()
    };

    Decimal::from_str_exact(&normalized)
        .map_err(|_| ParseAmountError::InvalidFormat(input.to_string()))
}

/// Canonical text form used by the stores. Trailing zeros are kept as-is so
/// the stored value round-trips exactly.
pub fn amount_to_storage(amount: Amount) -> String {
    amount.to_string()
}

pub fn amount_from_storage(raw: &str) -> Result<Amount, ParseAmountError> {
    Decimal::from_str_exact(raw).map_err(|_| ParseAmountError::InvalidFormat(raw.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmountError {
    #[error("amount is empty")]
    Empty,

    #[error("invalid money format: {0}")]
    InvalidFormat(String),
}
