//! Monetary types for ratechain.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monetary amount with currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value (high precision decimal).
    pub value: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }

    /// Create from a string value.
    pub fn from_str(value: &str, currency: Currency) -> Result<Self, rust_decimal::Error> {
        Ok(Self {
            value: value.parse()?,
            currency,
        })
    }

    /// Round to the currency's standard decimal places.
    ///
    /// Conversions never round on their own; callers that want a
    /// display-scale amount call this explicitly.
    pub fn round(&self) -> Self {
        let places = self.currency.decimal_places();
        Self {
            value: self.value.round_dp(places),
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// An amount was applied to a rate with a different base currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyMismatchError {
    pub expected: Currency,
    pub actual: Currency,
}

impl fmt::Display for CurrencyMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Currency mismatch: expected {}, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for CurrencyMismatchError {}

/// ISO 4217 currency code.
///
/// Codes are upper-cased on construction, so `Currency::new("eur")` and
/// `Currency::eur()` are the same key in every rate map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "ISK" => 0,
            "BHD" | "KWD" | "OMR" | "TND" => 3,
            "XDR" => 6,
            _ => 2,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }

    pub fn chf() -> Self {
        Self::new("CHF")
    }

    /// The IMF special drawing right, used as a basket pivot.
    pub fn sdr() -> Self {
        Self::new("XDR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An ordered (base, term) pair of currencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency (the one being priced).
    pub base: Currency,
    /// Term currency (the pricing currency).
    pub term: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, term: Currency) -> Self {
        Self { base, term }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_from_str() {
        let m = Money::from_str("100.50", Currency::usd()).unwrap();
        assert_eq!(m.value, dec!(100.50));
        assert_eq!(m.to_string(), "100.50 USD");

        assert!(Money::from_str("abc", Currency::usd()).is_err());
    }

    #[test]
    fn test_currency_codes_are_normalized() {
        assert_eq!(Currency::new(" eur "), Currency::eur());
        assert_eq!(Currency::from("xdr"), Currency::sdr());
    }

    #[test]
    fn test_money_round() {
        let yen = Money::new(dec!(1234.56), Currency::jpy());
        assert_eq!(yen.round().value, dec!(1235));

        let usd = Money::new(dec!(10.005), Currency::usd());
        assert_eq!(usd.round().value, dec!(10.00));
    }

    #[test]
    fn test_pair_display() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::eur());
        assert_eq!(pair.to_string(), "USD/EUR");
    }
}
