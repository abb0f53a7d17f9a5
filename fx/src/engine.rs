//! Main FX engine implementation.

use std::sync::Arc;

use ratechain_common::{Currency, ExchangeRate, Money};
use tracing::{info, instrument};

use crate::config::FxConfig;
use crate::conversion::{Conversion, CurrencyConversion};
use crate::error::{FxError, FxResult};
use crate::feed::{FeedFetcher, FeedParser};
use crate::loader::{LoadCoordinator, LoadState};
use crate::provider::RateProvider;
use crate::query::ConversionQuery;
use crate::registry::ProviderRegistry;
use crate::resource_cache::ResourceCache;

/// The main FX engine: rate lookups and conversions over a provider registry.
pub struct FxEngine {
    registry: Arc<ProviderRegistry>,
    coordinator: Arc<LoadCoordinator>,
    config: FxConfig,
}

impl FxEngine {
    /// Create an engine over an existing registry.
    pub fn new(registry: Arc<ProviderRegistry>, coordinator: Arc<LoadCoordinator>, config: FxConfig) -> Self {
        Self {
            registry,
            coordinator,
            config,
        }
    }

    /// Build the standard providers from `config` and start loading them.
    pub fn from_config(
        config: FxConfig,
        fetcher: Arc<dyn FeedFetcher>,
        parser: Arc<dyn FeedParser>,
        cache: Option<Arc<dyn ResourceCache>>,
    ) -> FxResult<Self> {
        let mut coordinator = LoadCoordinator::new(fetcher);
        if let Some(cache) = cache {
            coordinator = coordinator.with_cache(cache);
        }
        let coordinator = Arc::new(coordinator);
        let registry = ProviderRegistry::from_config(&config, parser, coordinator.clone())?;

        info!(
            providers = registry.provider_names().len(),
            timeout_ms = config.first_load_timeout.as_millis() as u64,
            "FX engine started"
        );

        Ok(Self::new(Arc::new(registry), coordinator, config))
    }

    pub fn config(&self) -> &FxConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Latest rate between two currencies from the default chain.
    pub async fn exchange_rate(&self, base: Currency, term: Currency) -> FxResult<ExchangeRate> {
        self.exchange_rate_for(&ConversionQuery::new(base, term)).await
    }

    /// Rate for a full query. The query's provider list, or the default
    /// chain when it has none, is asked in order.
    #[instrument(skip(self, query), fields(pair = %query.pair(), date = ?query.date))]
    pub async fn exchange_rate_for(&self, query: &ConversionQuery) -> FxResult<ExchangeRate> {
        let provider = self.registry.resolve_with(query.providers.as_slice())?;
        provider
            .exchange_rate(query)
            .await?
            .ok_or_else(|| FxError::MissingRate {
                base: query.base.clone(),
                term: query.term.clone(),
                dates: query.candidate_dates(self.config.lookback_days),
            })
    }

    /// A reusable conversion into `term` over the default chain, at the
    /// latest available rates.
    pub fn currency_conversion(&self, term: Currency) -> FxResult<CurrencyConversion> {
        self.currency_conversion_for(ConversionQuery::new(term.clone(), term))
    }

    /// A reusable conversion into `template.term`, keeping the template's
    /// dates, rate types and providers.
    pub fn currency_conversion_for(&self, template: ConversionQuery) -> FxResult<CurrencyConversion> {
        let provider = self.registry.resolve_with(template.providers.as_slice())?;
        Ok(CurrencyConversion::new(Arc::new(provider), template))
    }

    /// Convert an amount at the latest available rate.
    pub async fn convert(&self, amount: &Money, term: Currency) -> FxResult<Conversion> {
        self.currency_conversion(term)?.convert(amount).await
    }

    /// Whether any provider the query would ask can answer it. Unknown
    /// provider names make the query unavailable.
    pub fn is_available(&self, query: &ConversionQuery) -> bool {
        self.registry
            .resolve_with(query.providers.as_slice())
            .map(|provider| provider.is_available(query))
            .unwrap_or(false)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.registry.provider_names()
    }

    pub fn default_provider_chain(&self) -> Vec<String> {
        self.registry.default_provider_chain().to_vec()
    }

    /// Replace the default chain; see [`ProviderRegistry::reload_default_chain`].
    pub fn reload_default_chain(&self, chain: Option<&str>) -> Vec<String> {
        self.registry.reload_default_chain(chain).to_vec()
    }

    /// Wait for every registered provider's startup data. Returns the
    /// providers that timed out or failed.
    pub async fn await_ready(&self) -> Vec<(String, FxError)> {
        let mut failed = Vec::new();
        for name in self.registry.provider_names() {
            let result = match self.registry.provider(&name) {
                Ok(provider) => provider.await_ready().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                failed.push((name, e));
            }
        }
        failed
    }

    /// Load state of a feed resource, keyed by provider name for the
    /// startup feeds.
    pub fn load_state(&self, resource_id: &str) -> LoadState {
        self.coordinator.state(resource_id)
    }

    /// Load a provider's startup feed now and wait for it.
    pub async fn load_now(&self, resource_id: &str) -> FxResult<usize> {
        self.coordinator.load_now(resource_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BasketFeedConfig, BucketFeedConfig};
    use crate::feed::{DelimitedFeedParser, StaticFeedFetcher};
    use crate::provider::MockRateProvider;
    use chrono::NaiveDate;
    use ratechain_common::{RateContext, RateType};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const ECB_CSV: &str = "\
2024-01-02,EUR,USD,1.10
2024-01-02,EUR,BRL,5.83
2024-01-02,EUR,GBP,0.8665
";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn setup_engine() -> FxEngine {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        fetcher.set("mem://ecb", ECB_CSV);
        fetcher.set(
            "mem://imf",
            "2024-01-02,XDR,USD,1.3378\n2024-01-02,XDR,JPY,189.42\n",
        );

        let config = FxConfig {
            default_chain: Some("IDENT,ECB,IMF".to_string()),
            first_load_timeout: Duration::from_secs(5),
            bucket_feeds: vec![BucketFeedConfig::new("ECB", RateType::Deferred, "mem://ecb")],
            basket_feeds: vec![BasketFeedConfig::current("IMF", "mem://imf")],
            ..FxConfig::default()
        };

        FxEngine::from_config(config, fetcher, Arc::new(DelimitedFeedParser::csv()), None).unwrap()
    }

    #[tokio::test]
    async fn test_exchange_rate() {
        let engine = setup_engine();

        let rate = engine.exchange_rate(Currency::usd(), Currency::new("BRL")).await.unwrap();

        assert_eq!(rate.provider, "ECB");
        assert_eq!(rate.factor.round_dp(4), dec!(5.3000));
        assert_eq!(rate.chain.len(), 2);
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_imf() {
        let engine = setup_engine();

        // ECB has no JPY.
        let rate = engine.exchange_rate(Currency::usd(), Currency::jpy()).await.unwrap();

        assert_eq!(rate.provider, "IMF");
        assert_eq!(rate.chain[0].term, Currency::sdr());
    }

    #[tokio::test]
    async fn test_identity_first() {
        let engine = setup_engine();
        let rate = engine.exchange_rate(Currency::chf(), Currency::chf()).await.unwrap();
        assert_eq!(rate.provider, "IDENT");
        assert_eq!(rate.factor, dec!(1));
    }

    #[tokio::test]
    async fn test_lookback_reaches_previous_publication_day() {
        let engine = setup_engine();
        let query = ConversionQuery::new(Currency::eur(), Currency::usd())
            .on(d(2024, 1, 4))
            .with_providers(["ECB"]);

        let rate = engine.exchange_rate_for(&query).await.unwrap();
        assert_eq!(rate.context.date, Some(d(2024, 1, 2)));
    }

    #[tokio::test]
    async fn test_missing_date_error() {
        let engine = setup_engine();
        let query = ConversionQuery::new(Currency::eur(), Currency::usd())
            .on_any_of([d(2023, 6, 1)])
            .with_providers(["ECB"]);

        let err = engine.exchange_rate_for(&query).await.unwrap_err();
        assert!(matches!(err, FxError::MissingRate { ref dates, .. } if dates == &vec![d(2023, 6, 1)]));
    }

    #[tokio::test]
    async fn test_currency_conversion() {
        let engine = setup_engine();
        let to_gbp = engine.currency_conversion(Currency::gbp()).unwrap();

        let gbp = to_gbp.apply(&Money::new(dec!(100), Currency::eur())).await.unwrap();
        assert_eq!(gbp, Money::new(dec!(86.65), Currency::gbp()));

        let conversion = engine.convert(&Money::new(dec!(110), Currency::usd()), Currency::eur()).await.unwrap();
        assert_eq!(conversion.output.round().value, dec!(100.00));
    }

    #[tokio::test]
    async fn test_unsupported_provider() {
        let engine = setup_engine();
        let query = ConversionQuery::new(Currency::eur(), Currency::usd()).with_providers(["Z"]);

        assert!(matches!(
            engine.exchange_rate_for(&query).await,
            Err(FxError::UnsupportedProvider(_))
        ));
        assert!(!engine.is_available(&query));
    }

    #[tokio::test]
    async fn test_provider_discovery() {
        let engine = setup_engine();
        assert_eq!(engine.provider_names(), vec!["IDENT", "ECB", "IMF"]);
        assert_eq!(engine.default_provider_chain(), vec!["IDENT", "ECB", "IMF"]);

        assert_eq!(engine.reload_default_chain(Some("IMF,ECB")), vec!["IMF", "ECB"]);
        let rate = engine.exchange_rate(Currency::sdr(), Currency::usd()).await.unwrap();
        assert_eq!(rate.provider, "IMF");
    }

    #[tokio::test]
    async fn test_await_ready() {
        let engine = setup_engine();

        assert!(engine.await_ready().await.is_empty());
        // The gate opens from the listener, just before the state is finalized.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.load_state("ECB").has_loaded());
        assert_eq!(engine.load_now("IMF").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_is_available_after_load() {
        let engine = setup_engine();
        let query = ConversionQuery::new(Currency::usd(), Currency::gbp());
        engine.exchange_rate_for(&query).await.unwrap();

        assert!(engine.is_available(&query));
        assert!(!engine.is_available(&ConversionQuery::new(Currency::usd(), Currency::new("ZAR"))));
    }

    #[tokio::test]
    async fn test_engine_over_custom_registry() {
        let mock = Arc::new(MockRateProvider::new("MOCK"));
        mock.set_rate(ExchangeRate::new(
            Currency::gbp(),
            Currency::usd(),
            dec!(1.27),
            "MOCK",
            RateContext::new(RateType::Deferred),
        ));
        let registry = ProviderRegistry::new(vec![mock], None).unwrap();
        let coordinator = Arc::new(LoadCoordinator::new(Arc::new(StaticFeedFetcher::new())));
        let engine = FxEngine::new(Arc::new(registry), coordinator, FxConfig::default());

        let usd = engine
            .currency_conversion(Currency::usd())
            .unwrap()
            .apply(&Money::new(dec!(10), Currency::gbp()))
            .await
            .unwrap();
        assert_eq!(usd.value, dec!(12.70));
    }
}
