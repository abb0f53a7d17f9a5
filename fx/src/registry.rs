//! Provider registry and default provider chain.
//!
//! The registry is built once from an explicit list of providers and passed
//! to whatever composes them; there is no process-wide instance.

use std::sync::Arc;

use parking_lot::RwLock;
use ratechain_common::MathContext;
use tracing::{debug, info, warn};

use crate::config::FxConfig;
use crate::error::{FxError, FxResult};
use crate::feed::FeedParser;
use crate::loader::LoadCoordinator;
use crate::provider::{CompositeRateProvider, RateProvider};
use crate::providers::{EcbRateProvider, IdentityRateProvider, ImfRateProvider};
use crate::resolver::ResolverConfig;

/// Named providers in registration order, plus the default chain.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn RateProvider>>,
    default_chain: RwLock<Arc<Vec<String>>>,
}

impl ProviderRegistry {
    /// Build a registry over `providers`.
    ///
    /// `chain` is a comma-separated list of provider names; `None` uses
    /// registration order. Duplicate provider names are rejected.
    pub fn new(providers: Vec<Arc<dyn RateProvider>>, chain: Option<&str>) -> FxResult<Self> {
        for (i, provider) in providers.iter().enumerate() {
            if providers[..i].iter().any(|p| p.name() == provider.name()) {
                return Err(FxError::Configuration(format!(
                    "provider {} registered twice",
                    provider.name()
                )));
            }
        }

        let registry = Self {
            providers,
            default_chain: RwLock::new(Arc::new(Vec::new())),
        };
        registry.reload_default_chain(chain);
        Ok(registry)
    }

    /// Build the standard providers described by `config`.
    ///
    /// Order: identity (if enabled), bucket feeds, basket feeds, each in
    /// configuration order.
    pub fn from_config(
        config: &FxConfig,
        parser: Arc<dyn FeedParser>,
        coordinator: Arc<LoadCoordinator>,
    ) -> FxResult<Self> {
        config.validate().map_err(FxError::Configuration)?;

        let resolver_config = ResolverConfig {
            math: MathContext::new(config.precision),
            lookback_days: config.lookback_days,
            ..ResolverConfig::default()
        };

        let mut providers: Vec<Arc<dyn RateProvider>> = Vec::new();
        if config.identity_provider {
            providers.push(Arc::new(IdentityRateProvider::new()));
        }
        for feed in &config.bucket_feeds {
            providers.push(Arc::new(EcbRateProvider::new(
                feed,
                parser.clone(),
                coordinator.clone(),
                resolver_config.clone(),
                config.first_load_timeout,
            )));
        }
        for feed in &config.basket_feeds {
            providers.push(Arc::new(ImfRateProvider::new(
                feed,
                parser.clone(),
                coordinator.clone(),
                resolver_config.clone(),
                config.first_load_timeout,
            )));
        }

        let registry = Self::new(providers, config.default_chain.as_deref())?;
        info!(
            providers = ?registry.provider_names(),
            chain = ?registry.default_provider_chain(),
            "Provider registry ready"
        );
        Ok(registry)
    }

    /// Look up one provider by name.
    pub fn provider(&self, name: &str) -> FxResult<Arc<dyn RateProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| FxError::UnsupportedProvider(name.to_string()))
    }

    /// All provider names in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn default_provider_chain(&self) -> Arc<Vec<String>> {
        self.default_chain.read().clone()
    }

    /// Replace the default chain.
    ///
    /// Unknown names in `chain` are skipped with a warning. `None` resets to
    /// registration order. Returns the new chain.
    pub fn reload_default_chain(&self, chain: Option<&str>) -> Arc<Vec<String>> {
        let names = match chain {
            Some(list) => {
                let mut names: Vec<String> = Vec::new();
                for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    if self.provider(name).is_err() {
                        warn!(provider = name, "Unknown provider in default chain, skipping");
                        continue;
                    }
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
                names
            }
            None => self.provider_names(),
        };

        debug!(chain = ?names, "Default provider chain set");
        let names = Arc::new(names);
        *self.default_chain.write() = names.clone();
        names
    }

    /// Compose the named providers, in order, into one.
    ///
    /// No names means the default chain; an empty default chain is a
    /// configuration error.
    pub fn resolve_with<S: AsRef<str>>(&self, names: &[S]) -> FxResult<CompositeRateProvider> {
        let providers = if names.is_empty() {
            let chain = self.default_provider_chain();
            if chain.is_empty() {
                return Err(FxError::Configuration(
                    "no provider names given and the default chain is empty".to_string(),
                ));
            }
            chain
                .iter()
                .map(|name| self.provider(name))
                .collect::<FxResult<Vec<_>>>()?
        } else {
            names
                .iter()
                .map(|name| self.provider(name.as_ref()))
                .collect::<FxResult<Vec<_>>>()?
        };

        Ok(CompositeRateProvider::new(providers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DelimitedFeedParser, StaticFeedFetcher};
    use crate::provider::MockRateProvider;
    use crate::query::ConversionQuery;
    use ratechain_common::{Currency, ExchangeRate, RateContext, RateType};
    use rust_decimal_macros::dec;

    fn registry(chain: Option<&str>) -> (ProviderRegistry, Arc<MockRateProvider>, Arc<MockRateProvider>) {
        let a = Arc::new(MockRateProvider::new("A"));
        let b = Arc::new(MockRateProvider::new("B"));
        let registry = ProviderRegistry::new(vec![a.clone(), b.clone()], chain).unwrap();
        (registry, a, b)
    }

    #[test]
    fn test_default_chain_discovery_order() {
        let (registry, _, _) = registry(None);
        assert_eq!(registry.provider_names(), vec!["A", "B"]);
        assert_eq!(*registry.default_provider_chain(), vec!["A", "B"]);
    }

    #[test]
    fn test_configured_chain() {
        let (registry, _, _) = registry(Some("B,A"));
        assert_eq!(*registry.default_provider_chain(), vec!["B", "A"]);

        // Unknown names are skipped, not fatal.
        let chain = registry.reload_default_chain(Some(" B , Z, A,B"));
        assert_eq!(*chain, vec!["B", "A"]);

        assert_eq!(*registry.reload_default_chain(None), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_resolve_with_order() {
        let (registry, _, b) = registry(None);
        b.set_rate(ExchangeRate::new(
            Currency::usd(),
            Currency::eur(),
            dec!(0.91),
            "B",
            RateContext::new(RateType::Deferred),
        ));

        let composite = registry.resolve_with(&["A", "B"]).unwrap();
        let rate = composite
            .exchange_rate(&ConversionQuery::new(Currency::usd(), Currency::eur()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rate.provider, "B");
    }

    #[test]
    fn test_resolve_with_unknown_provider() {
        let (registry, _, _) = registry(None);
        assert!(matches!(
            registry.resolve_with(&["A", "Z"]),
            Err(FxError::UnsupportedProvider(name)) if name == "Z"
        ));
    }

    #[test]
    fn test_resolve_with_empty_chain() {
        let (registry, _, _) = registry(Some("Z"));
        assert!(registry.default_provider_chain().is_empty());

        let none: [&str; 0] = [];
        assert!(matches!(registry.resolve_with(&none), Err(FxError::Configuration(_))));

        registry.reload_default_chain(Some("B"));
        assert_eq!(registry.resolve_with(&none).unwrap().provider_names(), vec!["B"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let a = Arc::new(MockRateProvider::new("A"));
        let again = Arc::new(MockRateProvider::new("A"));
        assert!(ProviderRegistry::new(vec![a, again], None).is_err());
    }

    #[tokio::test]
    async fn test_from_config() {
        let coordinator = Arc::new(LoadCoordinator::new(Arc::new(StaticFeedFetcher::new())));
        let config = FxConfig::from_properties([("conversion.default-chain", "IDENT,ECB,IMF")]);

        let registry =
            ProviderRegistry::from_config(&config, Arc::new(DelimitedFeedParser::csv()), coordinator)
                .unwrap();

        assert_eq!(
            registry.provider_names(),
            vec!["IDENT", "ECB", "ECB-HIST90", "ECB-HIST", "IMF", "IMF-HIST"]
        );
        assert_eq!(*registry.default_provider_chain(), vec!["IDENT", "ECB", "IMF"]);
    }
}
