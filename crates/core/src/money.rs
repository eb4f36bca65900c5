//! Monetary amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Currency used when none is configured.
pub const DEFAULT_CURRENCY: &str = "PLN";

/// A decimal amount in a named currency. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    /// Builds a strictly positive amount with a three-letter currency code.
    ///
    /// The currency code is uppercased.
    pub fn positive(amount: Decimal, currency: impl AsRef<str>) -> DomainResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let currency = normalize_currency(currency.as_ref())?;
        Ok(Self { amount, currency })
    }
}

/// Trims and uppercases a currency code, rejecting anything that is not three ASCII letters.
pub fn normalize_currency(code: &str) -> DomainResult<String> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::validation(format!(
            "currency must be a three-letter code, got {code:?}"
        )));
    }
    Ok(code.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_negative_amounts() {
        assert!(Money::positive(Decimal::ZERO, "PLN").is_err());
        assert!(Money::positive(Decimal::new(-1, 2), "PLN").is_err());
    }

    #[test]
    fn normalizes_currency() {
        let money = Money::positive(Decimal::new(999, 2), " pln ").unwrap();
        assert_eq!(money.currency, "PLN");
        assert!(Money::positive(Decimal::ONE, "zloty").is_err());
    }
}
