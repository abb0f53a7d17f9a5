//! Engine and provider configuration.

use std::collections::HashSet;
use std::time::Duration;

use ratechain_common::{Currency, RateType, DEFAULT_LOOKBACK_DAYS};

/// Property key holding the comma-separated default provider chain.
pub const DEFAULT_CHAIN_KEY: &str = "conversion.default-chain";

/// Upper bound for `lookback_days`.
pub const MAX_LOOKBACK_DAYS: u32 = 31;

/// A central-bank style feed: one bucket of pivot rates per date.
#[derive(Debug, Clone)]
pub struct BucketFeedConfig {
    /// Provider name, e.g. `ECB`.
    pub name: String,
    pub description: String,
    pub pivot: Currency,
    pub rate_type: RateType,
    pub url: String,
    /// Reload interval; `None` loads once.
    pub refresh_interval: Option<Duration>,
}

impl BucketFeedConfig {
    pub fn new(name: impl Into<String>, rate_type: RateType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pivot: Currency::eur(),
            rate_type,
            url: url.into(),
            refresh_interval: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_refresh(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }
}

/// A basket feed quoted around a synthetic unit, optionally with monthly
/// history files.
#[derive(Debug, Clone)]
pub struct BasketFeedConfig {
    pub name: String,
    pub description: String,
    pub pivot: Currency,
    pub rate_type: RateType,
    /// Feed with recent rates, loaded at startup.
    pub current_url: Option<String>,
    /// History URL templates; `{period}` is replaced with `YYYY-MM`.
    /// One file quotes pivot -> currency, the other currency -> pivot.
    pub history_from_pivot_url: Option<String>,
    pub history_to_pivot_url: Option<String>,
    pub refresh_interval: Option<Duration>,
}

impl BasketFeedConfig {
    pub fn current(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pivot: Currency::sdr(),
            rate_type: RateType::Deferred,
            current_url: Some(url.into()),
            history_from_pivot_url: None,
            history_to_pivot_url: None,
            refresh_interval: None,
        }
    }

    pub fn historic(
        name: impl Into<String>,
        from_pivot_template: impl Into<String>,
        to_pivot_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pivot: Currency::sdr(),
            rate_type: RateType::Historic,
            current_url: None,
            history_from_pivot_url: Some(from_pivot_template.into()),
            history_to_pivot_url: Some(to_pivot_template.into()),
            refresh_interval: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_refresh(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn has_history(&self) -> bool {
        self.history_from_pivot_url.is_some() && self.history_to_pivot_url.is_some()
    }
}

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct FxConfig {
    /// Comma-separated provider names; `None` uses registration order.
    pub default_chain: Option<String>,
    /// Longest a query waits for a provider's first load.
    pub first_load_timeout: Duration,
    /// Days tried before a single as-of date.
    pub lookback_days: u32,
    /// Significant digits for reversed and derived factors.
    pub precision: u32,
    /// Register the identity provider.
    pub identity_provider: bool,
    pub bucket_feeds: Vec<BucketFeedConfig>,
    pub basket_feeds: Vec<BasketFeedConfig>,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            default_chain: None,
            first_load_timeout: Duration::from_secs(30),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            precision: 16,
            identity_provider: true,
            bucket_feeds: vec![
                BucketFeedConfig::new(
                    "ECB",
                    RateType::Deferred,
                    "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml",
                )
                .with_description("European Central Bank daily reference rates")
                .with_refresh(Duration::from_secs(6 * 60 * 60)),
                BucketFeedConfig::new(
                    "ECB-HIST90",
                    RateType::Historic,
                    "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-hist-90d.xml",
                )
                .with_description("European Central Bank reference rates, last 90 days"),
                BucketFeedConfig::new(
                    "ECB-HIST",
                    RateType::Historic,
                    "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-hist.xml",
                )
                .with_description("European Central Bank reference rates since 1999"),
            ],
            basket_feeds: vec![
                BasketFeedConfig::current(
                    "IMF",
                    "https://www.imf.org/external/np/fin/data/rms_five.aspx?tsv",
                )
                .with_description("IMF SDR valuation, last five days")
                .with_refresh(Duration::from_secs(6 * 60 * 60)),
                BasketFeedConfig::historic(
                    "IMF-HIST",
                    "https://www.imf.org/external/np/fin/data/rms_mth.aspx?SelectDate={period}-01&reportType=SDRCV&tsv",
                    "https://www.imf.org/external/np/fin/data/rms_mth.aspx?SelectDate={period}-01&reportType=CVSDR&tsv",
                )
                .with_description("IMF SDR valuation, monthly history"),
            ],
        }
    }
}

impl FxConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let vars = [
            ("CONVERSION_DEFAULT_CHAIN", DEFAULT_CHAIN_KEY),
            ("CONVERSION_FIRST_LOAD_TIMEOUT_MS", "conversion.first-load-timeout-ms"),
            ("CONVERSION_LOOKBACK_DAYS", "conversion.lookback-days"),
            ("CONVERSION_PRECISION", "conversion.precision"),
        ];
        let props: Vec<(String, String)> = vars
            .iter()
            .filter_map(|(env, key)| std::env::var(env).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self::default().with_properties(props)
    }

    /// Apply `key = value` properties on top of the defaults.
    ///
    /// Recognized keys: `conversion.default-chain`,
    /// `conversion.first-load-timeout-ms`, `conversion.lookback-days`,
    /// `conversion.precision`, `provider.<NAME>.url`. Unparseable values
    /// are ignored.
    pub fn from_properties<I, K, V>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::default().with_properties(props)
    }

    pub fn with_properties<I, K, V>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in props {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match key {
                DEFAULT_CHAIN_KEY => {
                    self.default_chain = Some(value.to_string());
                }
                "conversion.first-load-timeout-ms" => {
                    if let Ok(ms) = value.parse() {
                        self.first_load_timeout = Duration::from_millis(ms);
                    }
                }
                "conversion.lookback-days" => {
                    if let Ok(days) = value.parse() {
                        self.lookback_days = days;
                    }
                }
                "conversion.precision" => {
                    if let Ok(p) = value.parse() {
                        self.precision = p;
                    }
                }
                _ => {
                    if let Some(name) = key
                        .strip_prefix("provider.")
                        .and_then(|rest| rest.strip_suffix(".url"))
                    {
                        self.set_url(name, value);
                    }
                }
            }
        }
        self
    }

    fn set_url(&mut self, name: &str, url: &str) {
        for feed in self.bucket_feeds.iter_mut().filter(|f| f.name == name) {
            feed.url = url.to_string();
        }
        for feed in self.basket_feeds.iter_mut().filter(|f| f.name == name) {
            feed.current_url = Some(url.to_string());
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.first_load_timeout.is_zero() {
            return Err("First load timeout cannot be 0".to_string());
        }

        if self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(format!(
                "Lookback must be at most {} days, got {}",
                MAX_LOOKBACK_DAYS, self.lookback_days
            ));
        }

        if self.precision == 0 || self.precision > 28 {
            return Err(format!("Precision must be within 1..=28, got {}", self.precision));
        }

        let mut names = HashSet::new();
        let all_names = self
            .bucket_feeds
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.basket_feeds.iter().map(|f| f.name.as_str()));
        for name in all_names {
            if name.is_empty() {
                return Err("Provider name cannot be empty".to_string());
            }
            if !names.insert(name) {
                return Err(format!("Duplicate provider name: {}", name));
            }
        }

        for feed in &self.basket_feeds {
            if feed.current_url.is_none() && !feed.has_history() {
                return Err(format!("Basket feed {} has no URL", feed.name));
            }
        }

        Ok(())
    }
}
