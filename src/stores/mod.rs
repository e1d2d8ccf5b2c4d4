pub mod rate_counter;
pub mod revocation;

pub use rate_counter::{RateDecision, RateLimitStorage};
pub use revocation::RevocationStore;
