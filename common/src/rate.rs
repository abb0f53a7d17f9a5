//! Exchange rate value types.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::monetary::{Currency, CurrencyMismatchError, CurrencyPair, Money};

/// Kind of rate a provider publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateType {
    /// Matches every other rate type in a query.
    Any,
    /// Streaming market quotes.
    Realtime,
    /// Published once per business day, with some delay.
    Deferred,
    /// Archived rates for past dates.
    Historic,
    /// Static or synthetic rates, e.g. identity.
    Other,
}

impl RateType {
    /// Whether a rate of this type satisfies a request for `requested`.
    pub fn satisfies(&self, requested: RateType) -> bool {
        *self == RateType::Any || requested == RateType::Any || *self == requested
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateType::Any => "ANY",
            RateType::Realtime => "REALTIME",
            RateType::Deferred => "DEFERRED",
            RateType::Historic => "HISTORIC",
            RateType::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Metadata attached to an exchange rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateContext {
    /// Rate type of the source feed.
    pub rate_type: RateType,
    /// Calendar date the rate is valid for.
    pub date: Option<NaiveDate>,
    /// Precision hint (significant digits) used when the factor was computed.
    pub precision: Option<u32>,
}

impl RateContext {
    pub fn new(rate_type: RateType) -> Self {
        Self {
            rate_type,
            date: None,
            precision: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Fixed precision used for derived and reversed factors.
///
/// Factors are rounded to `precision` significant digits, half-to-even, so
/// that composing several links does not accumulate representation noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathContext {
    pub precision: u32,
    pub strategy: RoundingStrategy,
}

impl MathContext {
    /// 16 significant digits, half-even.
    pub const DECIMAL64: MathContext = MathContext {
        precision: 16,
        strategy: RoundingStrategy::MidpointNearestEven,
    };

    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            strategy: RoundingStrategy::MidpointNearestEven,
        }
    }

    /// Round to the configured number of significant digits.
    pub fn round(&self, value: Decimal) -> Decimal {
        value
            .round_sf_with_strategy(self.precision, self.strategy)
            .unwrap_or(value)
            .normalize()
    }

    /// `numerator / denominator`, rounded. `None` on a zero denominator.
    pub fn divide(&self, numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
        numerator.checked_div(denominator).map(|q| self.round(q))
    }

    /// `a * b`, rounded. `None` on overflow.
    pub fn multiply(&self, a: Decimal, b: Decimal) -> Option<Decimal> {
        a.checked_mul(b).map(|p| self.round(p))
    }
}

impl Default for MathContext {
    fn default() -> Self {
        Self::DECIMAL64
    }
}

/// An immutable exchange rate: `factor` units of `term` per one unit of `base`.
///
/// A derived rate carries the rates it was composed from in `chain`; a direct
/// rate has an empty chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub base: Currency,
    pub term: Currency,
    pub factor: Decimal,
    pub chain: Vec<ExchangeRate>,
    /// Name of the provider that produced the rate.
    pub provider: String,
    pub context: RateContext,
}

impl ExchangeRate {
    /// Create a direct rate.
    pub fn new(
        base: Currency,
        term: Currency,
        factor: Decimal,
        provider: impl Into<String>,
        context: RateContext,
    ) -> Self {
        Self {
            base,
            term,
            factor,
            chain: Vec::new(),
            provider: provider.into(),
            context,
        }
    }

    /// The 1:1 rate of a currency to itself.
    pub fn identity(currency: Currency, provider: impl Into<String>, context: RateContext) -> Self {
        Self::new(currency.clone(), currency, Decimal::ONE, provider, context)
    }

    /// Compose two rates whose currencies meet in the middle.
    ///
    /// Returns `None` when `first.term != second.base` or the product overflows.
    pub fn derive(first: ExchangeRate, second: ExchangeRate, mc: &MathContext) -> Option<Self> {
        if first.term != second.base {
            return None;
        }
        let factor = mc.multiply(first.factor, second.factor)?;
        let mut context = first.context.clone().with_precision(mc.precision);
        if context.date.is_none() {
            context.date = second.context.date;
        }
        Some(Self {
            base: first.base.clone(),
            term: second.term.clone(),
            factor,
            provider: first.provider.clone(),
            chain: vec![first, second],
            context,
        })
    }

    /// The same rate quoted the other way round. `None` for a zero factor.
    pub fn reversed(&self, mc: &MathContext) -> Option<Self> {
        let factor = mc.divide(Decimal::ONE, self.factor)?;
        Some(Self {
            base: self.term.clone(),
            term: self.base.clone(),
            factor,
            chain: Vec::new(),
            provider: self.provider.clone(),
            context: self.context.clone().with_precision(mc.precision),
        })
    }

    /// True when the rate was composed from a chain of other rates.
    pub fn is_derived(&self) -> bool {
        !self.chain.is_empty()
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.base.clone(), self.term.clone())
    }

    /// Convert an amount in `base` to `term`, without display rounding.
    pub fn apply(&self, amount: &Money) -> Result<Money, CurrencyMismatchError> {
        if amount.currency != self.base {
            return Err(CurrencyMismatchError {
                expected: self.base.clone(),
                actual: amount.currency.clone(),
            });
        }
        Ok(Money::new(amount.value * self.factor, self.term.clone()))
    }
}

impl fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {} [{}]", self.base, self.term, self.factor, self.provider)?;
        if let Some(date) = self.context.date {
            write!(f, " @ {}", date)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn eur_to(term: &str, factor: Decimal) -> ExchangeRate {
        ExchangeRate::new(
            Currency::eur(),
            Currency::new(term),
            factor,
            "ECB",
            RateContext::new(RateType::Deferred).with_date(d(2024, 1, 2)),
        )
    }

    #[test]
    fn test_factor_equality_is_value_based() {
        let a = eur_to("USD", dec!(1.10));
        let b = eur_to("USD", "1.1".parse().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_reversed() {
        let rate = eur_to("USD", dec!(1.10));
        let rev = rate.reversed(&MathContext::DECIMAL64).unwrap();

        assert_eq!(rev.base, Currency::usd());
        assert_eq!(rev.term, Currency::eur());
        assert_eq!(rev.factor, dec!(0.9090909090909091));
        assert!(!rev.is_derived());
    }

    #[test]
    fn test_reversed_zero_factor() {
        let rate = eur_to("USD", Decimal::ZERO);
        assert!(rate.reversed(&MathContext::DECIMAL64).is_none());
    }

    #[test]
    fn test_derive_chain() {
        let mc = MathContext::DECIMAL64;
        let usd_eur = eur_to("USD", dec!(1.10)).reversed(&mc).unwrap();
        let eur_brl = eur_to("BRL", dec!(5.83));

        let derived = ExchangeRate::derive(usd_eur.clone(), eur_brl.clone(), &mc).unwrap();

        assert_eq!(derived.base, Currency::usd());
        assert_eq!(derived.term, Currency::new("BRL"));
        assert_eq!(derived.chain, vec![usd_eur, eur_brl]);
        assert_eq!(derived.factor.round_dp(4), dec!(5.3000));
        assert_eq!(derived.context.precision, Some(16));
    }

    #[test]
    fn test_derive_rejects_disconnected_links() {
        let mc = MathContext::DECIMAL64;
        let a = eur_to("USD", dec!(1.10));
        let b = eur_to("BRL", dec!(5.83));
        assert!(ExchangeRate::derive(a, b, &mc).is_none());
    }

    #[test]
    fn test_apply() {
        let rate = eur_to("USD", dec!(1.10));
        let out = rate.apply(&Money::new(dec!(100), Currency::eur())).unwrap();
        assert_eq!(out, Money::new(dec!(110.00), Currency::usd()));

        assert!(rate.apply(&Money::new(dec!(1), Currency::gbp())).is_err());
    }

    #[test]
    fn test_rate_type_satisfies() {
        assert!(RateType::Deferred.satisfies(RateType::Any));
        assert!(RateType::Any.satisfies(RateType::Historic));
        assert!(!RateType::Deferred.satisfies(RateType::Historic));
    }
}
