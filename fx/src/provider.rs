//! Rate provider trait and the provider aggregator.

use async_trait::async_trait;
use ratechain_common::{ExchangeRate, RateType};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};
use crate::query::ConversionQuery;

/// Static description of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    pub name: String,
    pub rate_types: Vec<RateType>,
    pub description: String,
}

impl ProviderContext {
    pub fn new(name: impl Into<String>, rate_type: RateType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate_types: vec![rate_type],
            description: description.into(),
        }
    }
}

/// Trait for exchange rate providers.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str {
        &self.context().name
    }

    fn context(&self) -> &ProviderContext;

    /// Whether this provider could answer `query`. Cheap, never blocks.
    fn is_available(&self, query: &ConversionQuery) -> bool;

    /// Rate for `query`, or `None` if this provider has nothing for it.
    async fn exchange_rate(&self, query: &ConversionQuery) -> FxResult<Option<ExchangeRate>>;

    /// Wait until the provider holds its startup data.
    async fn await_ready(&self) -> FxResult<()> {
        Ok(())
    }
}

/// Several providers presented as one, asked in a fixed order.
pub struct CompositeRateProvider {
    context: ProviderContext,
    providers: Vec<Arc<dyn RateProvider>>,
}

impl CompositeRateProvider {
    /// Create a composite over `providers`, in precedence order.
    pub fn new(providers: Vec<Arc<dyn RateProvider>>) -> Self {
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        let mut rate_types: Vec<RateType> = Vec::new();
        for t in providers.iter().flat_map(|p| p.context().rate_types.iter()) {
            if !rate_types.contains(t) {
                rate_types.push(*t);
            }
        }
        let context = ProviderContext {
            name: names.join(","),
            rate_types,
            description: "composite provider".to_string(),
        };
        Self { context, providers }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl RateProvider for CompositeRateProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn is_available(&self, query: &ConversionQuery) -> bool {
        self.providers.iter().any(|p| p.is_available(query))
    }

    async fn exchange_rate(&self, query: &ConversionQuery) -> FxResult<Option<ExchangeRate>> {
        let mut last_error: Option<FxError> = None;

        for provider in &self.providers {
            if !query.accepts_any(&provider.context().rate_types) {
                continue;
            }

            match provider.exchange_rate(query).await {
                Ok(Some(rate)) => {
                    debug!(
                        provider = provider.name(),
                        pair = %query.pair(),
                        factor = %rate.factor,
                        "Got rate from provider"
                    );
                    return Ok(Some(rate));
                }
                Ok(None) => {
                    debug!(provider = provider.name(), pair = %query.pair(), "Provider has no rate");
                }
                Err(e) if !e.is_recoverable() => {
                    warn!(
                        provider = provider.name(),
                        pair = %query.pair(),
                        error = %e,
                        "Provider failed, not asking the rest of the chain"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        pair = %query.pair(),
                        error = %e,
                        "Provider failed to return rate"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    context: ProviderContext,
    rates: dashmap::DashMap<String, ExchangeRate>,
    error: parking_lot::Mutex<Option<FxError>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_type(name, RateType::Deferred)
    }

    pub fn with_rate_type(name: impl Into<String>, rate_type: RateType) -> Self {
        Self {
            context: ProviderContext::new(name, rate_type, "mock"),
            rates: dashmap::DashMap::new(),
            error: parking_lot::Mutex::new(None),
        }
    }

    /// Set a rate for its currency pair.
    pub fn set_rate(&self, rate: ExchangeRate) {
        self.rates.insert(rate.pair().to_string(), rate);
    }

    /// Make every query fail with `error`.
    pub fn fail_with(&self, error: FxError) {
        *self.error.lock() = Some(error);
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn is_available(&self, query: &ConversionQuery) -> bool {
        self.rates.contains_key(&query.pair().to_string())
    }

    async fn exchange_rate(&self, query: &ConversionQuery) -> FxResult<Option<ExchangeRate>> {
        if let Some(e) = self.error.lock().clone() {
            return Err(e);
        }
        Ok(self.rates.get(&query.pair().to_string()).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratechain_common::{Currency, RateContext};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn make_rate(base: &str, term: &str, factor: Decimal, provider: &str) -> ExchangeRate {
        ExchangeRate::new(
            Currency::new(base),
            Currency::new(term),
            factor,
            provider,
            RateContext::new(RateType::Deferred),
        )
    }

    fn usd_eur() -> ConversionQuery {
        ConversionQuery::new(Currency::usd(), Currency::eur())
    }

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockRateProvider::new("test");
        provider.set_rate(make_rate("USD", "EUR", dec!(0.92), "test"));

        let result = provider.exchange_rate(&usd_eur()).await.unwrap().unwrap();

        assert_eq!(result.factor, dec!(0.92));
        assert!(provider.is_available(&usd_eur()));
        assert!(!provider.is_available(&usd_eur().with_term(Currency::gbp())));
    }

    #[tokio::test]
    async fn test_composite_first_answer_wins() {
        let a = Arc::new(MockRateProvider::new("A"));
        let b = Arc::new(MockRateProvider::new("B"));
        let c = Arc::new(MockRateProvider::new("C"));
        b.set_rate(make_rate("USD", "EUR", dec!(0.91), "B"));
        c.set_rate(make_rate("USD", "EUR", dec!(0.93), "C"));

        let composite = CompositeRateProvider::new(vec![a, b, c]);
        assert_eq!(composite.name(), "A,B,C");

        let rate = composite.exchange_rate(&usd_eur()).await.unwrap().unwrap();
        assert_eq!(rate.provider, "B");
        assert!(composite.is_available(&usd_eur()));
    }

    #[tokio::test]
    async fn test_composite_skips_failing_provider() {
        let a = Arc::new(MockRateProvider::new("A"));
        a.fail_with(FxError::InvalidProviderState("A".to_string()));
        let b = Arc::new(MockRateProvider::new("B"));
        b.set_rate(make_rate("USD", "EUR", dec!(0.91), "B"));

        let composite = CompositeRateProvider::new(vec![a, b]);
        let rate = composite.exchange_rate(&usd_eur()).await.unwrap().unwrap();
        assert_eq!(rate.provider, "B");
    }

    #[tokio::test]
    async fn test_composite_stops_on_unrecoverable_error() {
        let a = Arc::new(MockRateProvider::new("A"));
        a.fail_with(FxError::Configuration("bad feed url".to_string()));
        let b = Arc::new(MockRateProvider::new("B"));
        b.set_rate(make_rate("USD", "EUR", dec!(0.91), "B"));

        let composite = CompositeRateProvider::new(vec![a, b]);
        assert!(matches!(
            composite.exchange_rate(&usd_eur()).await,
            Err(FxError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_composite_nothing_found() {
        let a = Arc::new(MockRateProvider::new("A"));
        let b = Arc::new(MockRateProvider::new("B"));
        let composite = CompositeRateProvider::new(vec![a.clone(), b]);

        assert!(composite.exchange_rate(&usd_eur()).await.unwrap().is_none());
        assert!(!composite.is_available(&usd_eur()));

        a.fail_with(FxError::InvalidProviderState("A".to_string()));
        assert!(matches!(
            composite.exchange_rate(&usd_eur()).await,
            Err(FxError::InvalidProviderState(_))
        ));
    }

    #[tokio::test]
    async fn test_composite_filters_rate_types() {
        let deferred = Arc::new(MockRateProvider::with_rate_type("ECB", RateType::Deferred));
        let historic = Arc::new(MockRateProvider::with_rate_type("ECB-HIST", RateType::Historic));
        deferred.set_rate(make_rate("USD", "EUR", dec!(0.91), "ECB"));
        historic.set_rate(make_rate("USD", "EUR", dec!(0.90), "ECB-HIST"));

        let composite = CompositeRateProvider::new(vec![deferred, historic]);
        let q = usd_eur().with_rate_type(RateType::Historic);

        let rate = composite.exchange_rate(&q).await.unwrap().unwrap();
        assert_eq!(rate.provider, "ECB-HIST");
    }
}
