//! Error types shared by feed parsers.

use thiserror::Error;

/// A feed payload could not be turned into rate records.
///
/// Parse failures never reach a rate query: the ingest path logs them and
/// reports zero rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Payload is not valid UTF-8 text.
    #[error("Payload is not valid UTF-8: {0}")]
    Encoding(String),

    /// A row has the wrong number of columns.
    #[error("Malformed row {line}: {message}")]
    MalformedRow { line: usize, message: String },

    /// Unparseable date.
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Unparseable rate value.
    #[error("Invalid rate value on row {line}: {value}")]
    InvalidRate { line: usize, value: String },

    /// Payload contained no data rows.
    #[error("Empty payload")]
    Empty,
}
