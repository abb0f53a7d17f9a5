//! Currency conversion types and operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ratechain_common::{Currency, CurrencyPair, ExchangeRate, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;
use crate::query::ConversionQuery;

/// Represents a completed currency conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    /// Input amount.
    pub input: Money,
    /// Output amount, unrounded.
    pub output: Money,
    /// Rate used for conversion.
    pub rate: ExchangeRate,
    /// When the conversion was executed.
    pub executed_at: DateTime<Utc>,
}

impl Conversion {
    pub fn new(input: Money, output: Money, rate: ExchangeRate) -> Self {
        Self {
            input,
            output,
            rate,
            executed_at: Utc::now(),
        }
    }

    /// Get the effective rate used.
    pub fn effective_rate(&self) -> Decimal {
        if self.input.value.is_zero() {
            return Decimal::ZERO;
        }
        self.output.value / self.input.value
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.input.currency.clone(), self.output.currency.clone())
    }
}

/// A conversion into one term currency, bound to a provider chain.
///
/// The base currency comes from each amount; the rest of the query (dates,
/// rate types) comes from the template it was built with.
pub struct CurrencyConversion {
    provider: Arc<dyn RateProvider>,
    template: ConversionQuery,
}

impl CurrencyConversion {
    /// Bind `template.term` as the target currency. `template.base` is
    /// replaced by each amount's currency.
    pub fn new(provider: Arc<dyn RateProvider>, template: ConversionQuery) -> Self {
        Self { provider, template }
    }

    pub fn term(&self) -> &Currency {
        &self.template.term
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// The rate this conversion would use for amounts in `base`.
    pub async fn exchange_rate(&self, base: &Currency) -> FxResult<ExchangeRate> {
        let query = self.template.with_base(base.clone());
        self.provider
            .exchange_rate(&query)
            .await?
            .ok_or_else(|| FxError::MissingRate {
                base: query.base.clone(),
                term: query.term.clone(),
                dates: query.candidate_dates(0),
            })
    }

    /// Convert `amount` into the term currency.
    pub async fn apply(&self, amount: &Money) -> FxResult<Money> {
        Ok(self.convert(amount).await?.output)
    }

    /// Convert `amount` and keep the rate that was used.
    #[instrument(skip(self, amount), fields(
        from_currency = %amount.currency,
        to_currency = %self.template.term,
        value = %amount.value
    ))]
    pub async fn convert(&self, amount: &Money) -> FxResult<Conversion> {
        let rate = self.exchange_rate(&amount.currency).await?;
        let output = rate.apply(amount)?;
        let conversion = Conversion::new(amount.clone(), output, rate);

        debug!(
            effective_rate = %conversion.effective_rate(),
            provider = %conversion.rate.provider,
            "Conversion completed"
        );

        Ok(conversion)
    }
}
