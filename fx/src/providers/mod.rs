//! Concrete rate providers.

mod ecb;
mod identity;
mod imf;

pub use ecb::EcbRateProvider;
pub use identity::{IdentityRateProvider, IDENTITY_PROVIDER};
pub use imf::ImfRateProvider;
