//! Identity provider: every currency converts to itself at 1.

use async_trait::async_trait;
use ratechain_common::{ExchangeRate, RateContext, RateType};

use crate::error::FxResult;
use crate::provider::{ProviderContext, RateProvider};
use crate::query::ConversionQuery;

pub const IDENTITY_PROVIDER: &str = "IDENT";

/// Answers only `X -> X` queries, on any date.
pub struct IdentityRateProvider {
    context: ProviderContext,
}

impl IdentityRateProvider {
    pub fn new() -> Self {
        Self {
            context: ProviderContext::new(
                IDENTITY_PROVIDER,
                RateType::Other,
                "Identity rates for same-currency conversions",
            ),
        }
    }
}

impl Default for IdentityRateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for IdentityRateProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn is_available(&self, query: &ConversionQuery) -> bool {
        query.base == query.term
    }

    async fn exchange_rate(&self, query: &ConversionQuery) -> FxResult<Option<ExchangeRate>> {
        if query.base != query.term {
            return Ok(None);
        }

        let mut context = RateContext::new(RateType::Other);
        if let Some(date) = query.candidate_dates(0).first() {
            context = context.with_date(*date);
        }
        Ok(Some(ExchangeRate::identity(
            query.base.clone(),
            IDENTITY_PROVIDER,
            context,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ratechain_common::Currency;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_identity_rate() {
        let provider = IdentityRateProvider::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let query = ConversionQuery::new(Currency::chf(), Currency::chf()).on(date);

        let rate = provider.exchange_rate(&query).await.unwrap().unwrap();

        assert_eq!(rate.factor, Decimal::ONE);
        assert_eq!(rate.provider, "IDENT");
        assert_eq!(rate.context.date, Some(date));
        assert!(provider.is_available(&query));
    }

    #[tokio::test]
    async fn test_other_pairs_absent() {
        let provider = IdentityRateProvider::new();
        let query = ConversionQuery::new(Currency::usd(), Currency::eur());

        assert!(provider.exchange_rate(&query).await.unwrap().is_none());
        assert!(!provider.is_available(&query));
    }
}
