//! Rate queries.

use chrono::NaiveDate;
use ratechain_common::{lookback_dates, Currency, CurrencyPair, RateType};

/// What a caller asks a provider for.
///
/// Date handling, in order of precedence:
/// - `dates`: explicit candidates, tried in the given order;
/// - `date`: a single as-of date, expanded into a look-back window;
/// - neither: the most recent date the provider knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionQuery {
    pub base: Currency,
    pub term: Currency,
    pub date: Option<NaiveDate>,
    pub dates: Vec<NaiveDate>,
    /// Acceptable rate types; empty means any.
    pub rate_types: Vec<RateType>,
    /// Providers to ask, in order; empty means the default chain.
    pub providers: Vec<String>,
}

impl ConversionQuery {
    pub fn new(base: Currency, term: Currency) -> Self {
        Self {
            base,
            term,
            date: None,
            dates: Vec::new(),
            rate_types: Vec::new(),
            providers: Vec::new(),
        }
    }

    /// Rates valid on `date` (or shortly before it).
    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Rates valid on the first of `dates` that has data.
    pub fn on_any_of(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.dates = dates.into_iter().collect();
        self
    }

    pub fn with_rate_type(mut self, rate_type: RateType) -> Self {
        self.rate_types.push(rate_type);
        self
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.base.clone(), self.term.clone())
    }

    /// Same query for another term currency.
    pub fn with_term(&self, term: Currency) -> Self {
        Self {
            term,
            ..self.clone()
        }
    }

    /// Same query for another base currency.
    pub fn with_base(&self, base: Currency) -> Self {
        Self {
            base,
            ..self.clone()
        }
    }

    /// Dates to try, in order. Empty means "most recent".
    pub fn candidate_dates(&self, lookback_days: u32) -> Vec<NaiveDate> {
        if !self.dates.is_empty() {
            self.dates.clone()
        } else if let Some(date) = self.date {
            lookback_dates(date, lookback_days)
        } else {
            Vec::new()
        }
    }

    /// Whether a provider publishing `rate_types` can serve this query.
    pub fn accepts_any(&self, rate_types: &[RateType]) -> bool {
        self.rate_types.is_empty()
            || self
                .rate_types
                .iter()
                .any(|wanted| rate_types.iter().any(|t| t.satisfies(*wanted)))
    }
}
