//! Ratechain Common Types
//!
//! Shared monetary and exchange-rate value types used by the rate engine and
//! its providers.

pub mod monetary;
pub mod rate;
pub mod error;
pub mod time;

pub use monetary::*;
pub use rate::*;
pub use error::*;
pub use time::*;
