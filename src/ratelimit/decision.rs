//! Results of rate limit checks.

use std::time::Duration;

use serde::Serialize;

/// The outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Admits left in the current window
    pub remaining: u64,
    /// How long to wait before a request could be admitted. Set only on denial.
    #[serde(rename = "retry_after_ms", serialize_with = "serialize_opt_millis")]
    pub retry_after: Option<Duration>,
    /// Time until the current window ends
    #[serde(rename = "reset_after_ms", serialize_with = "serialize_millis")]
    pub reset_after: Duration,
    /// Admits left once the previous window's count is blended in.
    ///
    /// Only jumping windows report this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed_remaining: Option<u64>,
}

impl Decision {
    pub(crate) fn admit(remaining: u64, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
            reset_after,
            smoothed_remaining: None,
        }
    }

    pub(crate) fn deny(remaining: u64, retry_after: Duration, reset_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining,
            retry_after: Some(retry_after),
            reset_after,
            smoothed_remaining: None,
        }
    }

    pub(crate) fn with_smoothed_remaining(mut self, smoothed: u64) -> Self {
        self.smoothed_remaining = Some(smoothed);
        self
    }

    /// The retry hint in whole milliseconds, rounded up.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after.map(ceil_millis)
    }

    /// Time until the current window ends in whole milliseconds, rounded up.
    pub fn reset_after_ms(&self) -> u64 {
        ceil_millis(self.reset_after)
    }
}

/// Where a key sits in the check state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    /// No state is tracked for the key
    Idle,
    /// State is tracked and the next check would be admitted
    Active,
    /// State is tracked and the next check would be denied
    Throttled,
}

fn ceil_millis(d: Duration) -> u64 {
    let nanos = d.as_nanos();
    u64::try_from(nanos.div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(ceil_millis(*d))
}

fn serialize_opt_millis<S: serde::Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&ceil_millis(*d)),
        None => s.serialize_none(),
    }
}
