//! Request admission for Switchboard.
//!
//! Provides:
//! - **Rate limiting**: per-identity fixed windows with progressive blacklisting
//! - **Masking**: identity redaction for logs and outbound parameters

pub mod mask;
pub mod rate_limit;

pub use mask::mask_identity;
pub use rate_limit::{RateLimitDecision, RateLimiter, SweepStats};
