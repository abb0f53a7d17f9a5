//! FX engine error types.

use chrono::NaiveDate;
use ratechain_common::{Currency, CurrencyMismatchError};
use thiserror::Error;

/// Errors that can occur while resolving or applying exchange rates.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// No data for any of the requested dates.
    #[error("No rate for {base}/{term} on any of {}", format_dates(.dates))]
    MissingRate {
        base: Currency,
        term: Currency,
        dates: Vec<NaiveDate>,
    },

    /// A chained rate could not be derived.
    #[error("Cannot convert {base} to {term}: {reason}")]
    CurrencyConversion {
        base: Currency,
        term: Currency,
        reason: String,
    },

    /// Requested provider is not registered.
    #[error("Unsupported rate provider: {0}")]
    UnsupportedProvider(String),

    /// First load did not complete in time.
    #[error("Timed out waiting for first load of {provider}: {diagnostic}")]
    LoadTimeout {
        provider: String,
        diagnostic: String,
    },

    /// Provider was queried before it ever held data.
    #[error("Provider {0} has no rates loaded")]
    InvalidProviderState(String),

    /// Bad or empty configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote or local fetch failed.
    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Amount currency does not match the rate base.
    #[error(transparent)]
    CurrencyMismatch(#[from] CurrencyMismatchError),
}

impl FxError {
    /// Whether another provider, date or retry might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FxError::MissingRate { .. }
                | FxError::CurrencyConversion { .. }
                | FxError::LoadTimeout { .. }
                | FxError::InvalidProviderState(_)
                | FxError::Fetch { .. }
        )
    }

    /// Stable code for logs and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::MissingRate { .. } => "MISSING_RATE",
            FxError::CurrencyConversion { .. } => "CURRENCY_CONVERSION",
            FxError::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            FxError::LoadTimeout { .. } => "LOAD_TIMEOUT",
            FxError::InvalidProviderState(_) => "INVALID_PROVIDER_STATE",
            FxError::Configuration(_) => "CONFIGURATION_ERROR",
            FxError::Fetch { .. } => "FETCH_FAILED",
            FxError::CurrencyMismatch(_) => "CURRENCY_MISMATCH",
        }
    }

    pub(crate) fn conversion(base: &Currency, term: &Currency, reason: impl Into<String>) -> Self {
        FxError::CurrencyConversion {
            base: base.clone(),
            term: term.clone(),
            reason: reason.into(),
        }
    }
}

fn format_dates(dates: &[NaiveDate]) -> String {
    if dates.is_empty() {
        return "[latest]".to_string();
    }
    let joined: Vec<String> = dates.iter().map(|d| d.to_string()).collect();
    format!("[{}]", joined.join(", "))
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
