//! Pivot-based rate resolution.
//!
//! Every provider dataset relates currencies through one pivot (EUR for
//! central-bank buckets, XDR for the IMF basket). A `base/term` rate is
//! either read directly (one side is the pivot), reversed, or derived as
//! `base -> pivot -> term`.

use chrono::NaiveDate;
use ratechain_common::{
    Currency, ExchangeRate, MathContext, RateContext, RateType, DEFAULT_LOOKBACK_DAYS,
};
use tracing::{debug, instrument};

use crate::error::{FxError, FxResult};
use crate::query::ConversionQuery;

/// Read access to a provider's rates around its pivot.
pub trait PivotSource: Send + Sync {
    fn pivot(&self) -> &Currency;

    /// True until the first successful ingest.
    fn is_empty(&self) -> bool;

    fn most_recent_date(&self) -> Option<NaiveDate>;

    /// Whether any rate is stored for `date`.
    fn has_date(&self, date: NaiveDate) -> bool;

    /// Stored pivot -> `currency` rate for `date`.
    fn from_pivot(&self, currency: &Currency, date: NaiveDate) -> Option<ExchangeRate>;

    /// Stored `currency` -> pivot rate for `date`.
    fn to_pivot(&self, currency: &Currency, date: NaiveDate) -> Option<ExchangeRate>;

    /// Whether `currency` can be priced against the pivot on `date`. The
    /// pivot itself counts as quoted on every date with data.
    fn quotes(&self, currency: &Currency, date: NaiveDate) -> bool {
        if currency == self.pivot() {
            return self.has_date(date);
        }
        self.from_pivot(currency, date).is_some() || self.to_pivot(currency, date).is_some()
    }

    /// Newest date on which all of `currencies` are quoted.
    fn latest_date_quoting(&self, currencies: &[&Currency]) -> Option<NaiveDate>;

    /// Candidates with no data, in the order given.
    fn dates_missing(&self, candidates: &[NaiveDate]) -> Vec<NaiveDate> {
        candidates
            .iter()
            .filter(|d| !self.has_date(**d))
            .copied()
            .collect()
    }
}

/// What to do when the store has never been populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyStorePolicy {
    /// Fail with [`FxError::InvalidProviderState`].
    Fail,
    /// Return no rate so an aggregator can ask the next provider.
    Absent,
}

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Precision for reversed and derived factors.
    pub math: MathContext,
    /// Days tried before a single as-of date.
    pub lookback_days: u32,
    pub empty_store: EmptyStorePolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            math: MathContext::DECIMAL64,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            empty_store: EmptyStorePolicy::Absent,
        }
    }
}

/// Resolves queries against a [`PivotSource`].
#[derive(Debug, Clone)]
pub struct RateResolver {
    provider: String,
    rate_type: RateType,
    config: ResolverConfig,
}

impl RateResolver {
    pub fn new(provider: impl Into<String>, rate_type: RateType, config: ResolverConfig) -> Self {
        Self {
            provider: provider.into(),
            rate_type,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `query` against `source`.
    ///
    /// `Ok(None)` means this source cannot answer (empty store under the
    /// `Absent` policy, or a direct pivot rate that is not quoted).
    #[instrument(skip(self, source, query), fields(provider = %self.provider, pair = %query.pair()))]
    pub fn resolve(
        &self,
        source: &dyn PivotSource,
        query: &ConversionQuery,
    ) -> FxResult<Option<ExchangeRate>> {
        if source.is_empty() {
            return match self.config.empty_store {
                EmptyStorePolicy::Fail => Err(FxError::InvalidProviderState(self.provider.clone())),
                EmptyStorePolicy::Absent => {
                    debug!("Store empty, no rate");
                    Ok(None)
                }
            };
        }

        // Identity holds on every date, stored or not.
        if query.base == query.term {
            let date = query
                .candidate_dates(0)
                .first()
                .copied()
                .or_else(|| source.most_recent_date());
            return Ok(Some(self.identity(&query.base, date)));
        }

        let Some(date) = self.select_date(source, query)? else {
            return Ok(None);
        };
        debug!(%date, "Resolving on date");
        self.resolve_on(source, &query.base, &query.term, date)
    }

    /// Pick the date to resolve on: the first candidate quoting both
    /// currencies, or the newest such date when the query names none.
    ///
    /// When no date quotes both, the first candidate with any data is used
    /// so the failure names the missing leg.
    fn select_date(
        &self,
        source: &dyn PivotSource,
        query: &ConversionQuery,
    ) -> FxResult<Option<NaiveDate>> {
        let legs = [&query.base, &query.term];
        let candidates = query.candidate_dates(self.config.lookback_days);
        if candidates.is_empty() {
            return Ok(source
                .latest_date_quoting(&legs)
                .or_else(|| source.most_recent_date()));
        }

        let quoted = candidates
            .iter()
            .find(|d| legs.iter().all(|c| source.quotes(c, **d)));
        match quoted.or_else(|| candidates.iter().find(|d| source.has_date(**d))) {
            Some(date) => Ok(Some(*date)),
            None => Err(FxError::MissingRate {
                base: query.base.clone(),
                term: query.term.clone(),
                dates: source.dates_missing(&candidates),
            }),
        }
    }

    /// Resolve `base/term` on a date known to have data.
    pub fn resolve_on(
        &self,
        source: &dyn PivotSource,
        base: &Currency,
        term: &Currency,
        date: NaiveDate,
    ) -> FxResult<Option<ExchangeRate>> {
        let pivot = source.pivot();
        // Leg failures are reported against the requested pair.
        let for_pair = |e: FxError| match e {
            FxError::CurrencyConversion { reason, .. } => FxError::conversion(base, term, reason),
            other => other,
        };

        if base == term {
            return Ok(Some(self.identity(base, Some(date))));
        }
        if base == pivot {
            return self.from_pivot_leg(source, term, date).map_err(for_pair);
        }
        if term == pivot {
            return self.to_pivot_leg(source, base, date).map_err(for_pair);
        }

        let first = self
            .to_pivot_leg(source, base, date)
            .map_err(&for_pair)?
            .ok_or_else(|| {
                FxError::conversion(base, term, format!("no {}/{} rate on {}", base, pivot, date))
            })?;
        let second = self
            .from_pivot_leg(source, term, date)
            .map_err(&for_pair)?
            .ok_or_else(|| {
                FxError::conversion(base, term, format!("no {}/{} rate on {}", pivot, term, date))
            })?;

        ExchangeRate::derive(first, second, &self.config.math)
            .map(Some)
            .ok_or_else(|| FxError::conversion(base, term, "factor overflow"))
    }

    /// `pivot -> currency`, reversing a stored `currency -> pivot` if needed.
    fn from_pivot_leg(
        &self,
        source: &dyn PivotSource,
        currency: &Currency,
        date: NaiveDate,
    ) -> FxResult<Option<ExchangeRate>> {
        if let Some(rate) = source.from_pivot(currency, date) {
            return Ok(Some(rate));
        }
        match source.to_pivot(currency, date) {
            Some(stored) => self.reverse(&stored).map(Some),
            None => Ok(None),
        }
    }

    /// `currency -> pivot`, reversing a stored `pivot -> currency` if needed.
    fn to_pivot_leg(
        &self,
        source: &dyn PivotSource,
        currency: &Currency,
        date: NaiveDate,
    ) -> FxResult<Option<ExchangeRate>> {
        if let Some(rate) = source.to_pivot(currency, date) {
            return Ok(Some(rate));
        }
        match source.from_pivot(currency, date) {
            Some(stored) => self.reverse(&stored).map(Some),
            None => Ok(None),
        }
    }

    fn identity(&self, currency: &Currency, date: Option<NaiveDate>) -> ExchangeRate {
        let mut context = RateContext::new(self.rate_type);
        context.date = date;
        ExchangeRate::identity(currency.clone(), self.provider.clone(), context)
    }

    fn reverse(&self, rate: &ExchangeRate) -> FxResult<ExchangeRate> {
        rate.reversed(&self.config.math)
            .ok_or_else(|| FxError::conversion(&rate.term, &rate.base, "zero rate cannot be reversed"))
    }
}
