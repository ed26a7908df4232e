//! Canonical refresh strategies.

pub mod fast_renewal;
pub mod full_login;

pub use fast_renewal::FastRenewalStrategy;
pub use full_login::FullLoginStrategy;
