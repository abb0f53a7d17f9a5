//! Feed ingestion: parse payloads and merge the rows into a store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use ratechain_common::{Currency, ExchangeRate, RateContext, RateType};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::feed::{FeedParser, RateRecord};
use crate::store::{HistoryStore, RateStore};

/// Turns raw feed payloads into stored rates for one provider.
pub struct FeedIngestor {
    provider: String,
    rate_type: RateType,
    parser: Arc<dyn FeedParser>,
}

impl FeedIngestor {
    pub fn new(provider: impl Into<String>, rate_type: RateType, parser: Arc<dyn FeedParser>) -> Self {
        Self {
            provider: provider.into(),
            rate_type,
            parser,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Parse `payload` and upsert one bucket per date found.
    ///
    /// Returns the number of dates added or replaced; 0 when the payload
    /// does not parse.
    pub fn ingest(&self, payload: &[u8], store: &RateStore) -> usize {
        let Some(records) = self.parse(payload) else {
            return 0;
        };

        let mut by_date: BTreeMap<NaiveDate, HashMap<Currency, ExchangeRate>> = BTreeMap::new();
        for record in records {
            if record.base != *store.pivot() {
                debug!(
                    provider = %self.provider,
                    base = %record.base,
                    term = %record.term,
                    "Skipping row not quoted against the pivot"
                );
                continue;
            }
            let date = record.date;
            let term = record.term.clone();
            if let Some(rate) = self.to_rate(record) {
                by_date.entry(date).or_default().insert(term, rate);
            }
        }

        let updated = by_date
            .into_iter()
            .filter(|(date, rates)| store.upsert_bucket(*date, rates.clone()))
            .count();

        info!(provider = %self.provider, dates = updated, "Feed ingested");
        updated
    }

    /// Parse `payload` and store it in a basket history store.
    ///
    /// Rows based on the pivot go into the pivot -> currency lists, rows
    /// quoted in the pivot into the currency -> pivot lists. Dates the
    /// payload covers are replaced; see [`HistoryStore::replace`]. Returns
    /// the number of distinct dates touched; 0 when the payload does not
    /// parse, in which case the store is left alone.
    pub fn ingest_history(&self, payload: &[u8], store: &HistoryStore) -> usize {
        let Some(records) = self.parse(payload) else {
            return 0;
        };

        let pivot = store.pivot().clone();
        let mut from_pivot: HashMap<Currency, Vec<ExchangeRate>> = HashMap::new();
        let mut to_pivot: HashMap<Currency, Vec<ExchangeRate>> = HashMap::new();
        let mut dates = BTreeSet::new();

        for record in records {
            let (side, currency) = if record.base == pivot {
                (&mut from_pivot, record.term.clone())
            } else if record.term == pivot {
                (&mut to_pivot, record.base.clone())
            } else {
                debug!(
                    provider = %self.provider,
                    base = %record.base,
                    term = %record.term,
                    "Skipping row not quoted against the pivot"
                );
                continue;
            };
            let date = record.date;
            if let Some(rate) = self.to_rate(record) {
                dates.insert(date);
                side.entry(currency).or_default().push(rate);
            }
        }

        store.replace(from_pivot, to_pivot);

        info!(provider = %self.provider, dates = dates.len(), "History feed merged");
        dates.len()
    }

    fn parse(&self, payload: &[u8]) -> Option<Vec<RateRecord>> {
        match self.parser.parse(payload) {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Failed to parse feed payload");
                None
            }
        }
    }

    fn to_rate(&self, record: RateRecord) -> Option<ExchangeRate> {
        if record.factor <= Decimal::ZERO {
            warn!(
                provider = %self.provider,
                base = %record.base,
                term = %record.term,
                date = %record.date,
                factor = %record.factor,
                "Dropping non-positive rate"
            );
            return None;
        }
        Some(ExchangeRate::new(
            record.base,
            record.term,
            record.factor,
            self.provider.clone(),
            RateContext::new(self.rate_type).with_date(record.date),
        ))
    }
}

/// Append each source list to the destination list for the same currency
/// and re-sort it newest first.
///
/// Entries are not deduplicated: overlapping batches may leave two entries
/// for the same date, and lookups take the first one found.
pub fn merge(
    source: HashMap<Currency, Vec<ExchangeRate>>,
    destination: &mut HashMap<Currency, Vec<ExchangeRate>>,
) {
    for (currency, rates) in source {
        let list = destination.entry(currency).or_default();
        list.extend(rates);
        list.sort_by(|a, b| b.context.date.cmp(&a.context.date));
    }
}
