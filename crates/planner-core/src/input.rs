//! Edit-boundary number parsing
//!
//! Users type `1234.5`, `1234,5`, `1 234,5` or `1,234.56`. Everything is
//! normalized to a plain `Decimal` here so the core never sees locale text.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{PlannerError, Result};

/// Parse a non-negative decimal typed by a user.
///
/// Whitespace is removed. A comma with no dot is a decimal separator;
/// otherwise commas are thousands separators. Empty input is zero.
pub fn parse_decimal(raw: &str) -> Result<Decimal> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let normalized = if compact.contains(',') && !compact.contains('.') {
        compact.replacen(',', ".", 1)
    } else {
        compact.replace(',', "")
    };

    let value = Decimal::from_str(&normalized)
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map_err(|_| PlannerError::InvalidInput(format!("not a number: {raw:?}")))?;

    if value < Decimal::ZERO {
        return Err(PlannerError::InvalidInput(format!("negative value: {raw:?}")));
    }

    Ok(value.normalize())
}

/// Parse a quantity that must be strictly positive
pub fn parse_quantity(raw: &str) -> Result<Decimal> {
    let value = parse_decimal(raw)?;
    if value.is_zero() {
        return Err(PlannerError::InvalidQuantity(value));
    }
    Ok(value)
}

/// Parse a percentage, clamped to 0..=100
pub fn parse_percentage(raw: &str) -> Result<Decimal> {
    Ok(parse_decimal(raw)?.min(Decimal::ONE_HUNDRED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decimal_separators() {
        assert_eq!(parse_decimal("1234.5").unwrap(), dec!(1234.5));
        assert_eq!(parse_decimal("1234,5").unwrap(), dec!(1234.5));
        assert_eq!(parse_decimal("1 234,5").unwrap(), dec!(1234.5));
        assert_eq!(parse_decimal("1,234.56").unwrap(), dec!(1234.56));
        assert_eq!(parse_decimal(" 0,00002 ").unwrap(), dec!(0.00002));
        assert_eq!(parse_decimal("").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_rejects_garbage_and_negatives() {
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("NaN").is_err());
        assert!(parse_decimal("-5").is_err());
        assert!(parse_decimal("1.2.3").is_err());
    }

    #[test]
    fn test_quantity_and_percentage() {
        assert!(parse_quantity("0").is_err());
        assert_eq!(parse_quantity("2,5").unwrap(), dec!(2.5));
        assert_eq!(parse_percentage("150").unwrap(), dec!(100));
        assert_eq!(parse_percentage("33,3").unwrap(), dec!(33.3));
    }
}
