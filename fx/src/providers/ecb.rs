//! Central-bank providers backed by one dated bucket of EUR rates per day.
//!
//! `ECB` (daily), `ECB-HIST90` and `ECB-HIST` differ only in feed URL and
//! rate type; each owns its own [`RateStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratechain_common::ExchangeRate;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BucketFeedConfig;
use crate::error::{FxError, FxResult};
use crate::feed::FeedParser;
use crate::ingest::FeedIngestor;
use crate::loader::{FirstLoadGate, LoadCoordinator, LoadListener};
use crate::provider::{ProviderContext, RateProvider};
use crate::query::ConversionQuery;
use crate::resolver::{PivotSource, RateResolver, ResolverConfig};
use crate::store::RateStore;

/// Provider over a bucketed pivot feed.
pub struct EcbRateProvider {
    context: ProviderContext,
    resource_id: String,
    store: Arc<RateStore>,
    gate: Arc<FirstLoadGate>,
    resolver: RateResolver,
    coordinator: Arc<LoadCoordinator>,
    first_load_timeout: Duration,
    refresh: Option<JoinHandle<()>>,
}

impl EcbRateProvider {
    /// Register the feed with `coordinator` and start loading it.
    ///
    /// Loading is started in the background; if there is no tokio runtime
    /// the first query waits out `first_load_timeout` instead.
    pub fn new(
        feed: &BucketFeedConfig,
        parser: Arc<dyn FeedParser>,
        coordinator: Arc<LoadCoordinator>,
        resolver_config: ResolverConfig,
        first_load_timeout: Duration,
    ) -> Self {
        let store = Arc::new(RateStore::new(feed.pivot.clone()));
        let gate = Arc::new(FirstLoadGate::new());
        let ingestor = FeedIngestor::new(feed.name.clone(), feed.rate_type, parser);

        let listener: LoadListener = {
            let store = store.clone();
            let gate = gate.clone();
            Arc::new(move |_resource, payload| {
                let dates = ingestor.ingest(payload, &store);
                if !store.is_empty() {
                    gate.release();
                }
                dates
            })
        };

        let resource_id = feed.name.clone();
        coordinator.register(&resource_id, &feed.url, listener);

        let refresh = match feed.refresh_interval {
            Some(interval) if tokio::runtime::Handle::try_current().is_ok() => {
                Some(coordinator.schedule(&resource_id, interval))
            }
            _ => {
                coordinator.trigger_load(&resource_id);
                None
            }
        };

        info!(provider = %feed.name, url = %feed.url, "Provider registered");

        Self {
            context: ProviderContext::new(feed.name.clone(), feed.rate_type, feed.description.clone()),
            resolver: RateResolver::new(feed.name.clone(), feed.rate_type, resolver_config),
            resource_id,
            store,
            gate,
            coordinator,
            first_load_timeout,
            refresh,
        }
    }

    pub fn store(&self) -> &RateStore {
        &self.store
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Wait for the first load, up to the configured timeout.
    ///
    /// Times out at most once; afterwards queries run against whatever the
    /// store holds.
    pub async fn await_first_load(&self) -> FxResult<()> {
        if self.gate.wait(self.first_load_timeout).await {
            return Ok(());
        }
        Err(FxError::LoadTimeout {
            provider: self.context.name.clone(),
            diagnostic: self.coordinator.state(&self.resource_id).diagnostic,
        })
    }

    /// Reload the feed now and wait for it.
    pub async fn reload(&self) -> FxResult<usize> {
        self.coordinator.load_now(&self.resource_id).await
    }
}

impl Drop for EcbRateProvider {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RateProvider for EcbRateProvider {
    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn is_available(&self, query: &ConversionQuery) -> bool {
        if !query.accepts_any(&self.context.rate_types) {
            return false;
        }
        if query.base == query.term {
            return true;
        }
        let legs = [&query.base, &query.term];
        let dates = query.candidate_dates(self.resolver.config().lookback_days);
        if dates.is_empty() {
            return self.store.latest_date_quoting(&legs).is_some();
        }
        dates
            .iter()
            .any(|date| legs.iter().all(|c| self.store.quotes(c, *date)))
    }

    async fn await_ready(&self) -> FxResult<()> {
        self.await_first_load().await
    }

    async fn exchange_rate(&self, query: &ConversionQuery) -> FxResult<Option<ExchangeRate>> {
        self.await_first_load().await?;
        debug!(provider = %self.context.name, dates = self.store.len(), "Resolving from store");
        self.resolver.resolve(self.store.as_ref(), query)
    }
}
