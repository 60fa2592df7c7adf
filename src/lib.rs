//! Floodgate - keyed in-process rate limiting
//!
//! This crate implements three rate limiting strategies over a concurrent
//! per-key counter store: aligned fixed windows ([`FixedMapping`]), windows
//! that adapt to observed load ([`DynamicMapping`]), and fixed windows that
//! keep the previous window's count around for smoothing ([`JumpingWindow`]).
//!
//! ```
//! use std::time::Duration;
//! use floodgate::{FixedMapping, LimitConfig, ManualClock};
//!
//! let clock = ManualClock::new();
//! let mapping: FixedMapping<String, ManualClock> = FixedMapping::new(
//!     LimitConfig::new(2, Duration::from_secs(1)),
//!     clock.clone(),
//! )
//! .unwrap();
//!
//! assert!(mapping.check("client").allowed);
//! assert!(mapping.check("client").allowed);
//! assert!(!mapping.check("client").allowed);
//!
//! clock.advance(Duration::from_secs(1));
//! assert!(mapping.check("client").allowed);
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{FloodgateError, Result};
pub use ratelimit::{
    Clock, Decision, DynamicMapping, FixedMapping, JumpingWindow, KeyState, LimitConfig,
    ManualClock, MonotonicClock, RateLimiter, SweepConfig, Timestamp,
};
