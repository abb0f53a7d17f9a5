//! Ratechain FX Engine
//!
//! Time-indexed exchange rate resolution over several feed providers.
//!
//! # Features
//!
//! - Date-bucketed rate stores with look-back for weekends and holidays
//! - Cross rates derived through each provider's pivot currency
//! - Background feed loading with a bounded first-load wait
//! - On-demand monthly history loading for basket feeds
//! - Ordered provider chains with a configurable default
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratechain_fx::{DelimitedFeedParser, FileFeedFetcher, FxConfig, FxEngine};
//! use ratechain_common::{Currency, Money};
//!
//! let engine = FxEngine::from_config(
//!     FxConfig::from_env(),
//!     Arc::new(FileFeedFetcher::new()),
//!     Arc::new(DelimitedFeedParser::csv()),
//!     None,
//! )?;
//!
//! // Get current rate
//! let rate = engine.exchange_rate(Currency::usd(), Currency::eur()).await?;
//!
//! // Convert amount
//! let to_eur = engine.currency_conversion(Currency::eur())?;
//! let eur = to_eur.apply(&Money::from_str("1000.00", Currency::usd())?).await?;
//! ```

pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod loader;
pub mod provider;
pub mod providers;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod resource_cache;
pub mod store;

pub use config::{BasketFeedConfig, BucketFeedConfig, FxConfig};
pub use conversion::{Conversion, CurrencyConversion};
pub use engine::FxEngine;
pub use error::{FxError, FxResult};
pub use feed::{DelimitedFeedParser, FeedFetcher, FeedParser, FileFeedFetcher, StaticFeedFetcher};
pub use loader::{FirstLoadGate, LoadCoordinator, LoadState, LoadStatus};
pub use provider::{CompositeRateProvider, ProviderContext, RateProvider};
pub use query::ConversionQuery;
pub use registry::ProviderRegistry;
pub use resolver::{EmptyStorePolicy, PivotSource, RateResolver, ResolverConfig};
pub use resource_cache::{FileResourceCache, InMemoryResourceCache, ResourceCache};
pub use store::{HistoryStore, RateStore};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
