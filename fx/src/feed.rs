//! Feed collaborators: fetching raw payloads and parsing them into records.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use ratechain_common::{parse_date, Currency, ParseError};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// One parsed feed row: `factor` units of `term` per one `base` on `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateRecord {
    pub date: NaiveDate,
    pub base: Currency,
    pub term: Currency,
    pub factor: Decimal,
}

impl RateRecord {
    pub fn new(date: NaiveDate, base: Currency, term: Currency, factor: Decimal) -> Self {
        Self {
            date,
            base,
            term,
            factor,
        }
    }
}

/// Retrieves the raw bytes behind a feed URL.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FxResult<Vec<u8>>;
}

/// Turns a raw payload into rate records.
pub trait FeedParser: Send + Sync {
    fn parse(&self, payload: &[u8]) -> Result<Vec<RateRecord>, ParseError>;
}

/// Parser for delimited text feeds with one `date,base,term,factor` row per
/// rate.
///
/// Blank lines and lines starting with `#` are skipped, as is a first row
/// whose date column does not parse (a header). Factors may be plain decimals
/// or scientific notation.
#[derive(Debug, Clone)]
pub struct DelimitedFeedParser {
    delimiter: char,
}

impl DelimitedFeedParser {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn csv() -> Self {
        Self::new(',')
    }

    pub fn tsv() -> Self {
        Self::new('\t')
    }

    fn parse_factor(raw: &str, line: usize) -> Result<Decimal, ParseError> {
        raw.parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|_| ParseError::InvalidRate {
                line,
                value: raw.to_string(),
            })
    }
}

impl Default for DelimitedFeedParser {
    fn default() -> Self {
        Self::csv()
    }
}

impl FeedParser for DelimitedFeedParser {
    fn parse(&self, payload: &[u8]) -> Result<Vec<RateRecord>, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|e| ParseError::Encoding(e.to_string()))?;

        let mut records = Vec::new();
        let mut seen_row = false;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let cols: Vec<&str> = trimmed.split(self.delimiter).map(str::trim).collect();
            if cols.len() != 4 {
                return Err(ParseError::MalformedRow {
                    line,
                    message: format!("expected 4 columns, found {}", cols.len()),
                });
            }

            let date = match parse_date(cols[0]) {
                Ok(date) => date,
                Err(_) if !seen_row => {
                    debug!(line, "Skipping header row");
                    seen_row = true;
                    continue;
                }
                Err(e) => return Err(e),
            };
            seen_row = true;

            let factor = Self::parse_factor(cols[3], line)?;
            records.push(RateRecord::new(
                date,
                Currency::new(cols[1]),
                Currency::new(cols[2]),
                factor,
            ));
        }

        if records.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(records)
    }
}

/// Fetcher serving payloads from memory. Unknown URLs fail.
#[derive(Default)]
pub struct StaticFeedFetcher {
    payloads: RwLock<HashMap<String, Vec<u8>>>,
}

impl StaticFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the payload served for `url`.
    pub fn set(&self, url: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.payloads.write().insert(url.into(), payload.into());
    }

    pub fn remove(&self, url: &str) {
        self.payloads.write().remove(url);
    }
}

#[async_trait]
impl FeedFetcher for StaticFeedFetcher {
    async fn fetch(&self, url: &str) -> FxResult<Vec<u8>> {
        self.payloads
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| FxError::Fetch {
                url: url.to_string(),
                reason: "no payload registered".to_string(),
            })
    }
}

/// Fetcher reading `file://` URLs or plain paths from the local disk,
/// relative to an optional root directory.
#[derive(Debug, Clone, Default)]
pub struct FileFeedFetcher {
    root: Option<PathBuf>,
}

impl FileFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl FeedFetcher for FileFeedFetcher {
    async fn fetch(&self, url: &str) -> FxResult<Vec<u8>> {
        let path = self.resolve(url);
        tokio::fs::read(&path).await.map_err(|e| FxError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
