//! Date-indexed rate storage.
//!
//! [`RateStore`] keeps one bucket of pivot rates per calendar date (the
//! central-bank layout). [`HistoryStore`] keeps per-currency rate lists in
//! both directions around the pivot (the basket layout), newest first.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use ratechain_common::{Currency, ExchangeRate};
use tracing::{debug, warn};

use crate::ingest;
use crate::resolver::PivotSource;

/// All pivot rates valid for one date.
///
/// Every rate in a bucket has the bucket's pivot as base and the bucket's
/// date in its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBucket {
    date: NaiveDate,
    pivot: Currency,
    rates: HashMap<Currency, ExchangeRate>,
}

impl RateBucket {
    /// Build a bucket, dropping rates that do not belong to `(date, pivot)`.
    pub fn new(date: NaiveDate, pivot: Currency, rates: HashMap<Currency, ExchangeRate>) -> Self {
        let rates = rates
            .into_iter()
            .filter(|(currency, rate)| {
                let fits = rate.base == pivot
                    && &rate.term == currency
                    && rate.context.date == Some(date);
                if !fits {
                    warn!(%date, %pivot, rate = %rate, "Dropping rate that does not fit its bucket");
                }
                fits
            })
            .collect();
        Self { date, pivot, rates }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn pivot(&self) -> &Currency {
        &self.pivot
    }

    /// Pivot -> `currency` rate.
    pub fn get(&self, currency: &Currency) -> Option<&ExchangeRate> {
        self.rates.get(currency)
    }

    pub fn rates(&self) -> &HashMap<Currency, ExchangeRate> {
        &self.rates
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Thread-safe map of date -> [`RateBucket`], owned by one provider.
///
/// Buckets are shared as `Arc`s and replaced whole, so a reader holding a
/// bucket never sees it change underneath.
pub struct RateStore {
    pivot: Currency,
    buckets: RwLock<BTreeMap<NaiveDate, Arc<RateBucket>>>,
}

impl RateStore {
    pub fn new(pivot: Currency) -> Self {
        Self {
            pivot,
            buckets: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn pivot(&self) -> &Currency {
        &self.pivot
    }

    /// Replace every rate for `date`. Returns false (and leaves the store
    /// untouched) when the new bucket would be empty.
    pub fn upsert_bucket(&self, date: NaiveDate, rates: HashMap<Currency, ExchangeRate>) -> bool {
        let bucket = RateBucket::new(date, self.pivot.clone(), rates);
        if bucket.is_empty() {
            debug!(%date, "Ignoring empty bucket");
            return false;
        }
        let count = bucket.len();
        let previous = self.buckets.write().insert(date, Arc::new(bucket));
        debug!(%date, rates = count, replaced = previous.is_some(), "Bucket stored");
        true
    }

    pub fn lookup(&self, date: NaiveDate) -> Option<Arc<RateBucket>> {
        self.buckets.read().get(&date).cloned()
    }

    pub fn most_recent_date(&self) -> Option<NaiveDate> {
        self.buckets.read().keys().next_back().copied()
    }

    /// The candidates with no bucket, in the order given.
    pub fn dates_missing(&self, candidates: &[NaiveDate]) -> Vec<NaiveDate> {
        let buckets = self.buckets.read();
        candidates
            .iter()
            .filter(|d| !buckets.contains_key(d))
            .copied()
            .collect()
    }

    /// All stored dates, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.buckets.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }
}

impl PivotSource for RateStore {
    fn pivot(&self) -> &Currency {
        &self.pivot
    }

    fn is_empty(&self) -> bool {
        RateStore::is_empty(self)
    }

    fn most_recent_date(&self) -> Option<NaiveDate> {
        RateStore::most_recent_date(self)
    }

    fn has_date(&self, date: NaiveDate) -> bool {
        self.buckets.read().contains_key(&date)
    }

    fn from_pivot(&self, currency: &Currency, date: NaiveDate) -> Option<ExchangeRate> {
        self.lookup(date)?.get(currency).cloned()
    }

    fn to_pivot(&self, _currency: &Currency, _date: NaiveDate) -> Option<ExchangeRate> {
        // Buckets only hold pivot -> currency; the resolver reverses them.
        None
    }

    fn quotes(&self, currency: &Currency, date: NaiveDate) -> bool {
        self.lookup(date)
            .map(|bucket| currency == &self.pivot || bucket.get(currency).is_some())
            .unwrap_or(false)
    }

    fn latest_date_quoting(&self, currencies: &[&Currency]) -> Option<NaiveDate> {
        self.buckets
            .read()
            .iter()
            .rev()
            .find(|(_, bucket)| {
                currencies
                    .iter()
                    .all(|c| *c == &self.pivot || bucket.get(*c).is_some())
            })
            .map(|(date, _)| *date)
    }
}

/// Which side of the pivot a history list quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    /// pivot -> currency
    FromPivot,
    /// currency -> pivot
    ToPivot,
}

#[derive(Default)]
struct HistoryTables {
    from_pivot: HashMap<Currency, Vec<ExchangeRate>>,
    to_pivot: HashMap<Currency, Vec<ExchangeRate>>,
}

impl HistoryTables {
    fn side(&self, direction: HistoryDirection) -> &HashMap<Currency, Vec<ExchangeRate>> {
        match direction {
            HistoryDirection::FromPivot => &self.from_pivot,
            HistoryDirection::ToPivot => &self.to_pivot,
        }
    }

    fn side_mut(&mut self, direction: HistoryDirection) -> &mut HashMap<Currency, Vec<ExchangeRate>> {
        match direction {
            HistoryDirection::FromPivot => &mut self.from_pivot,
            HistoryDirection::ToPivot => &mut self.to_pivot,
        }
    }

    fn all_lists(&self) -> impl Iterator<Item = &Vec<ExchangeRate>> {
        self.from_pivot.values().chain(self.to_pivot.values())
    }

    fn most_recent_date(&self) -> Option<NaiveDate> {
        self.all_lists()
            .filter_map(|list| list.first().and_then(|r| r.context.date))
            .max()
    }

    /// Dates with an entry for `currency` in either direction.
    fn dates_for(&self, currency: &Currency) -> BTreeSet<NaiveDate> {
        self.from_pivot
            .get(currency)
            .into_iter()
            .chain(self.to_pivot.get(currency))
            .flatten()
            .filter_map(|r| r.context.date)
            .collect()
    }

    /// Drop the entries on `dates` from one direction, then merge `batch` in.
    fn replace_dates(&mut self, direction: HistoryDirection, batch: HashMap<Currency, Vec<ExchangeRate>>) {
        if batch.is_empty() {
            return;
        }
        let dates: HashSet<NaiveDate> = batch
            .values()
            .flatten()
            .filter_map(|r| r.context.date)
            .collect();
        let side = self.side_mut(direction);
        for list in side.values_mut() {
            list.retain(|r| r.context.date.map_or(true, |d| !dates.contains(&d)));
        }
        side.retain(|_, list| !list.is_empty());
        ingest::merge(batch, side);
    }
}

/// Per-currency rate lists around a basket pivot, each ordered newest first.
pub struct HistoryStore {
    pivot: Currency,
    tables: RwLock<HistoryTables>,
}

impl HistoryStore {
    pub fn new(pivot: Currency) -> Self {
        Self {
            pivot,
            tables: RwLock::new(HistoryTables::default()),
        }
    }

    pub fn pivot(&self) -> &Currency {
        &self.pivot
    }

    /// Store a freshly parsed batch.
    ///
    /// In each direction, every entry dated on a day the batch covers is
    /// dropped before the batch is merged in, so reloading a feed replaces
    /// its dates instead of stacking copies. Both directions change under
    /// one write lock.
    pub fn replace(
        &self,
        from_pivot: HashMap<Currency, Vec<ExchangeRate>>,
        to_pivot: HashMap<Currency, Vec<ExchangeRate>>,
    ) {
        let mut tables = self.tables.write();
        tables.replace_dates(HistoryDirection::FromPivot, from_pivot);
        tables.replace_dates(HistoryDirection::ToPivot, to_pivot);
    }

    /// Snapshot of the list for `currency`, newest first.
    pub fn rates_for(&self, direction: HistoryDirection, currency: &Currency) -> Vec<ExchangeRate> {
        self.tables
            .read()
            .side(direction)
            .get(currency)
            .cloned()
            .unwrap_or_default()
    }

    /// First rate in the list for `currency` dated exactly `date`.
    pub fn lookup(
        &self,
        direction: HistoryDirection,
        currency: &Currency,
        date: NaiveDate,
    ) -> Option<ExchangeRate> {
        self.tables
            .read()
            .side(direction)
            .get(currency)?
            .iter()
            .find(|r| r.context.date == Some(date))
            .cloned()
    }

    pub fn most_recent_date(&self) -> Option<NaiveDate> {
        self.tables.read().most_recent_date()
    }

    pub fn is_empty(&self) -> bool {
        let tables = self.tables.read();
        tables.from_pivot.values().all(Vec::is_empty) && tables.to_pivot.values().all(Vec::is_empty)
    }

    /// Total number of stored entries across both directions.
    pub fn len(&self) -> usize {
        self.tables.read().all_lists().map(Vec::len).sum()
    }
}

impl PivotSource for HistoryStore {
    fn pivot(&self) -> &Currency {
        &self.pivot
    }

    fn is_empty(&self) -> bool {
        HistoryStore::is_empty(self)
    }

    fn most_recent_date(&self) -> Option<NaiveDate> {
        HistoryStore::most_recent_date(self)
    }

    fn has_date(&self, date: NaiveDate) -> bool {
        self.tables
            .read()
            .all_lists()
            .any(|list| list.iter().any(|r| r.context.date == Some(date)))
    }

    fn from_pivot(&self, currency: &Currency, date: NaiveDate) -> Option<ExchangeRate> {
        self.lookup(HistoryDirection::FromPivot, currency, date)
    }

    fn to_pivot(&self, currency: &Currency, date: NaiveDate) -> Option<ExchangeRate> {
        self.lookup(HistoryDirection::ToPivot, currency, date)
    }

    fn latest_date_quoting(&self, currencies: &[&Currency]) -> Option<NaiveDate> {
        let tables = self.tables.read();
        let mut common: Option<BTreeSet<NaiveDate>> = None;
        for currency in currencies.iter().copied().filter(|c| *c != &self.pivot) {
            let dates = tables.dates_for(currency);
            common = Some(match common {
                Some(acc) => acc.intersection(&dates).copied().collect(),
                None => dates,
            });
        }
        match common {
            Some(dates) => dates.last().copied(),
            None => tables.most_recent_date(),
        }
    }
}
