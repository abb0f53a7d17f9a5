//! IMF providers quoting currencies against the SDR basket.
//!
//! `IMF` loads a recent-rates feed at startup. `IMF-HIST` loads monthly
//! history files on demand: the first query touching a period fetches the
//! pivot -> currency and currency -> pivot tables for that month in
//! parallel and merges both before resolving.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use ratechain_common::{ExchangeRate, Period};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::BasketFeedConfig;
use crate::error::{FxError, FxResult};
use crate::feed::FeedParser;
use crate::ingest::FeedIngestor;
use crate::loader::{FirstLoadGate, LoadCoordinator, LoadListener};
use crate::provider::{ProviderContext, RateProvider};
use crate::query::ConversionQuery;
use crate::resolver::{PivotSource, RateResolver, ResolverConfig};
use crate::store::HistoryStore;

const PERIOD_PLACEHOLDER: &str = "{period}";

struct HistoryUrls {
    from_pivot: String,
    to_pivot: String,
}

impl HistoryUrls {
    fn for_period(&self, period: Period) -> (String, String) {
        let p = period.to_string();
        (
            self.from_pivot.replace(PERIOD_PLACEHOLDER, &p),
            self.to_pivot.replace(PERIOD_PLACEHOLDER, &p),
        )
    }
}

/// Provider over the SDR basket history store.
pub struct ImfRateProvider {
    context: ProviderContext,
    store: Arc<HistoryStore>,
    ingestor: Arc<FeedIngestor>,
    gate: Arc<FirstLoadGate>,
    resolver: RateResolver,
    coordinator: Arc<LoadCoordinator>,
    first_load_timeout: Duration,
    current_resource: Option<String>,
    refresh: Option<JoinHandle<()>>,
    history: Option<HistoryUrls>,
    fetched_periods: Mutex<HashSet<Period>>,
    period_locks: DashMap<Period, Arc<tokio::sync::Mutex<()>>>,
}

impl ImfRateProvider {
    pub fn new(
        feed: &BasketFeedConfig,
        parser: Arc<dyn FeedParser>,
        coordinator: Arc<LoadCoordinator>,
        resolver_config: ResolverConfig,
        first_load_timeout: Duration,
    ) -> Self {
        let store = Arc::new(HistoryStore::new(feed.pivot.clone()));
        let gate = Arc::new(FirstLoadGate::new());
        let ingestor = Arc::new(FeedIngestor::new(feed.name.clone(), feed.rate_type, parser));

        let current_resource = feed.current_url.as_ref().map(|url| {
            let resource_id = feed.name.clone();
            let listener: LoadListener = {
                let store = store.clone();
                let gate = gate.clone();
                let ingestor = ingestor.clone();
                Arc::new(move |_resource, payload| {
                    let dates = ingestor.ingest_history(payload, &store);
                    if !store.is_empty() {
                        gate.release();
                    }
                    dates
                })
            };
            coordinator.register(&resource_id, url, listener);
            resource_id
        });

        let refresh = current_resource.as_deref().and_then(|resource_id| {
            match feed.refresh_interval {
                Some(interval) if tokio::runtime::Handle::try_current().is_ok() => {
                    Some(coordinator.schedule(resource_id, interval))
                }
                _ => {
                    coordinator.trigger_load(resource_id);
                    None
                }
            }
        });

        // History-only providers load per period on demand; nothing to wait for.
        if current_resource.is_none() {
            gate.release();
        }

        let history = match (&feed.history_from_pivot_url, &feed.history_to_pivot_url) {
            (Some(from_pivot), Some(to_pivot)) => Some(HistoryUrls {
                from_pivot: from_pivot.clone(),
                to_pivot: to_pivot.clone(),
            }),
            _ => None,
        };

        info!(
            provider = %feed.name,
            current = current_resource.is_some(),
            history = history.is_some(),
            "Provider registered"
        );

        Self {
            context: ProviderContext::new(feed.name.clone(), feed.rate_type, feed.description.clone()),
            resolver: RateResolver::new(feed.name.clone(), feed.rate_type, resolver_config),
            store,
            ingestor,
            gate,
            coordinator,
            first_load_timeout,
            current_resource,
            refresh,
            history,
            fetched_periods: Mutex::new(HashSet::new()),
            period_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub async fn await_first_load(&self) -> FxResult<()> {
        if self.gate.wait(self.first_load_timeout).await {
            return Ok(());
        }
        let diagnostic = self
            .current_resource
            .as_deref()
            .map(|id| self.coordinator.state(id).diagnostic)
            .unwrap_or_default();
        Err(FxError::LoadTimeout {
            provider: self.context.name.clone(),
            diagnostic,
        })
    }

    pub fn is_period_loaded(&self, period: Period) -> bool {
        self.fetched_periods.lock().contains(&period)
    }

    /// Make sure the history files for `period` are merged into the store.
    ///
    /// Concurrent callers for the same period share one fetch. Failures are
    /// logged and leave the period unmarked so a later query retries it.
    /// Returns whether the period is loaded.
    #[instrument(skip(self, period), fields(provider = %self.context.name, %period))]
    pub async fn ensure_period_loaded(&self, period: Period) -> bool {
        let Some(history) = &self.history else {
            return false;
        };
        if self.is_period_loaded(period) {
            return true;
        }

        let lock = self
            .period_locks
            .entry(period)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if self.is_period_loaded(period) {
            return true;
        }

        let (from_url, to_url) = history.for_period(period);
        let from_id = format!("{}/{}/from", self.context.name, period);
        let to_id = format!("{}/{}/to", self.context.name, period);
        self.register_history_resource(&from_id, &from_url);
        self.register_history_resource(&to_id, &to_url);

        let (from, to) = tokio::join!(
            self.coordinator.load_now(&from_id),
            self.coordinator.load_now(&to_id)
        );

        match (from, to) {
            (Ok(a), Ok(b)) if a > 0 && b > 0 => {
                self.fetched_periods.lock().insert(period);
                info!(dates = a.max(b), "Period loaded");
                true
            }
            (from, to) => {
                warn!(
                    from = ?from.as_ref().map_err(|e| e.to_string()),
                    to = ?to.as_ref().map_err(|e| e.to_string()),
                    "Period load incomplete, will retry on next query"
                );
                false
            }
        }
    }

    fn register_history_resource(&self, resource_id: &str, url: &str) {
        if self.coordinator.is_registered(resource_id) {
            return;
        }
        let store = self.store.clone();
        let ingestor = self.ingestor.clone();
        let listener: LoadListener =
            Arc::new(move |_resource, payload| ingestor.ingest_history(payload, &store));
        self.coordinator.register(resource_id, url, listener);
    }

    /// Periods a query needs: one per candidate date, or the current month
    /// when it names none.
    fn periods_for(&self, query: &ConversionQuery) -> BTreeSet<Period> {
        let dates = query.candidate_dates(self.resolver.config().lookback_days);
        if dates.is_empty() {
            BTreeSet::from([Period::of(Utc::now().date_naive())])
        } else {
            dates.into_iter().map(Period::of).collect()
        }
    }

    async fn load_history_for(&self, query: &ConversionQuery) {
        let periods = self.periods_for(query);
        for period in &periods {
            self.ensure_period_loaded(*period).await;
        }

        // Early in a month the current file may be empty or missing.
        if query.candidate_dates(0).is_empty() && self.store.is_empty() {
            if let Some(previous) = periods
                .iter()
                .next()
                .and_then(|p| p.first_day().pred_opt())
                .map(Period::of)
            {
                debug!(%previous, "Falling back to previous period");
                self.ensure_period_loaded(previous).await;
            }
        }
    }
}

impl Drop for ImfRateProvider {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RateProvider for ImfRateProvider {
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
        let quoted = if dates.is_empty() {
            self.store.latest_date_quoting(&legs).is_some()
        } else {
            dates
                .iter()
                .any(|date| legs.iter().all(|c| self.store.quotes(c, *date)))
        };
        if quoted {
            return true;
        }
        // Periods not fetched yet may still hold the pair.
        self.history.is_some()
    }

    async fn await_ready(&self) -> FxResult<()> {
        self.await_first_load().await
    }

    async fn exchange_rate(&self, query: &ConversionQuery) -> FxResult<Option<ExchangeRate>> {
        self.await_first_load().await?;
        if self.history.is_some() {
            self.load_history_for(query).await;
        }
        self.resolver.resolve(self.store.as_ref(), query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DelimitedFeedParser, StaticFeedFetcher};
    use chrono::NaiveDate;
    use ratechain_common::{Currency, MathContext, RateType};
    use rust_decimal_macros::dec;

    const FROM_TEMPLATE: &str = "mem://imf/{period}/from";
    const TO_TEMPLATE: &str = "mem://imf/{period}/to";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn hist_provider(fetcher: Arc<StaticFeedFetcher>) -> ImfRateProvider {
        ImfRateProvider::new(
            &BasketFeedConfig::historic("IMF-HIST", FROM_TEMPLATE, TO_TEMPLATE),
            Arc::new(DelimitedFeedParser::csv()),
            Arc::new(LoadCoordinator::new(fetcher)),
            ResolverConfig::default(),
            Duration::from_secs(5),
        )
    }

    fn serve_january(fetcher: &StaticFeedFetcher) {
        fetcher.set(
            "mem://imf/2024-01/from",
            "2024-01-15,XDR,USD,1.3378\n2024-01-15,XDR,GBP,1.0523\n",
        );
        fetcher.set(
            "mem://imf/2024-01/to",
            "2024-01-15,USD,XDR,0.747496\n2024-01-15,GBP,XDR,0.950299\n",
        );
    }

    #[tokio::test]
    async fn test_history_period_loaded_on_demand() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        serve_january(&fetcher);
        let imf = hist_provider(fetcher);
        let period = Period::new(2024, 1).unwrap();
        assert!(!imf.is_period_loaded(period));

        let query = ConversionQuery::new(Currency::usd(), Currency::sdr()).on(d(2024, 1, 15));
        let rate = imf.exchange_rate(&query).await.unwrap().unwrap();

        assert!(imf.is_period_loaded(period));
        // Stored direction is used, not the reversal of the other list.
        assert_eq!(rate.factor, dec!(0.747496));
        assert!(!rate.is_derived());
    }

    #[tokio::test]
    async fn test_cross_rate_through_sdr() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        serve_january(&fetcher);
        let imf = hist_provider(fetcher);

        let query = ConversionQuery::new(Currency::gbp(), Currency::usd()).on(d(2024, 1, 15));
        let rate = imf.exchange_rate(&query).await.unwrap().unwrap();

        let expected = MathContext::DECIMAL64.round(dec!(0.950299) * dec!(1.3378));
        assert_eq!(rate.factor, expected);
        assert_eq!(rate.chain.len(), 2);
        assert_eq!(rate.chain[0].term, Currency::sdr());
    }

    #[tokio::test]
    async fn test_failed_period_is_retried() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        // Only one half is served.
        fetcher.set("mem://imf/2024-01/from", "2024-01-15,XDR,USD,1.3378\n");
        let imf = hist_provider(fetcher.clone());
        let period = Period::new(2024, 1).unwrap();

        assert!(!imf.ensure_period_loaded(period).await);
        assert!(!imf.is_period_loaded(period));

        serve_january(&fetcher);
        assert!(imf.ensure_period_loaded(period).await);
        assert!(imf.is_period_loaded(period));
        // The half loaded by the failed attempt is replaced, not duplicated.
        assert_eq!(imf.store().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_period_loads_share_one_fetch() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        serve_january(&fetcher);
        let imf = Arc::new(hist_provider(fetcher));
        let period = Period::new(2024, 1).unwrap();

        let (a, b) = tokio::join!(imf.ensure_period_loaded(period), imf.ensure_period_loaded(period));
        assert!(a && b);

        // Two entries per currency per direction would mean a duplicate fetch.
        assert_eq!(imf.store().len(), 4);
        assert_eq!(imf.coordinator.state("IMF-HIST/2024-01/from").attempts, 1);
    }

    #[tokio::test]
    async fn test_current_feed_provider() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        fetcher.set(
            "mem://imf/five",
            "2024-01-15,XDR,USD,1.3378\n2024-01-16,XDR,USD,1.3361\n2024-01-16,USD,XDR,0.748447\n",
        );
        let imf = ImfRateProvider::new(
            &BasketFeedConfig::current("IMF", "mem://imf/five"),
            Arc::new(DelimitedFeedParser::csv()),
            Arc::new(LoadCoordinator::new(fetcher)),
            ResolverConfig::default(),
            Duration::from_secs(5),
        );

        let rate = imf
            .exchange_rate(&ConversionQuery::new(Currency::sdr(), Currency::usd()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rate.factor, dec!(1.3361));
        assert_eq!(rate.context.date, Some(d(2024, 1, 16)));
        assert!(imf.is_available(&ConversionQuery::new(Currency::usd(), Currency::sdr())));
        assert!(!imf.is_available(&ConversionQuery::new(Currency::usd(), Currency::jpy())));
    }

    #[tokio::test]
    async fn test_current_feed_reload_is_idempotent() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        fetcher.set(
            "mem://imf/five",
            "2024-01-15,XDR,USD,1.3378\n2024-01-16,XDR,USD,1.3361\n2024-01-16,USD,XDR,0.748447\n",
        );
        let imf = ImfRateProvider::new(
            &BasketFeedConfig::current("IMF", "mem://imf/five"),
            Arc::new(DelimitedFeedParser::csv()),
            Arc::new(LoadCoordinator::new(fetcher)),
            ResolverConfig::default(),
            Duration::from_secs(5),
        );
        imf.await_first_load().await.unwrap();
        // The initial background load may still hold the resource.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let loaded = imf.store().len();
        assert_eq!(loaded, 3);

        for _ in 0..5 {
            imf.coordinator.load_now("IMF").await.unwrap();
        }
        assert_eq!(imf.store().len(), loaded);

        let rate = imf
            .exchange_rate(&ConversionQuery::new(Currency::usd(), Currency::sdr()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rate.factor, dec!(0.748447));
    }

    #[tokio::test]
    async fn test_uneven_quoting_resolves_on_common_date() {
        let fetcher = Arc::new(StaticFeedFetcher::new());
        fetcher.set(
            "mem://imf/2024-01/from",
            "2024-01-16,XDR,USD,1.3361\n2024-01-15,XDR,USD,1.3378\n",
        );
        fetcher.set("mem://imf/2024-01/to", "2024-01-15,GBP,XDR,0.950299\n");
        let imf = hist_provider(fetcher);

        let query = ConversionQuery::new(Currency::gbp(), Currency::usd())
            .on_any_of([d(2024, 1, 16), d(2024, 1, 15)]);
        let rate = imf.exchange_rate(&query).await.unwrap().unwrap();

        assert_eq!(rate.context.date, Some(d(2024, 1, 15)));
        assert_eq!(rate.factor, MathContext::DECIMAL64.round(dec!(0.950299) * dec!(1.3378)));
        assert!(imf.is_available(&query));
        assert!(!imf.is_available(&query.clone().with_rate_type(RateType::Realtime)));
    }
}
