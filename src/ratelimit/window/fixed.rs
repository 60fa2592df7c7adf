//! Fixed windows aligned to multiples of the window length since the epoch.
//!
//! A burst straddling a window boundary can be admitted up to twice the
//! capacity in a short span: `capacity` at the end of one window and
//! `capacity` again at the start of the next.

use super::aligned_start;
use crate::ratelimit::clock::Timestamp;
use crate::ratelimit::decision::Decision;
use crate::ratelimit::limiter::LimitConfig;

/// Per-key fixed window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedState {
    /// Start of the window `count` belongs to
    pub window_start: Timestamp,
    /// Admits recorded in that window
    pub count: u64,
}

impl FixedState {
    /// Empty state for the window containing `now`.
    pub fn new(config: &LimitConfig, now: Timestamp) -> Self {
        Self {
            window_start: aligned_start(now, config.window),
            count: 0,
        }
    }

    /// The state as seen at `now`, with the count reset if a later window
    /// has begun.
    pub fn rolled(self, config: &LimitConfig, now: Timestamp) -> Self {
        let start = aligned_start(now, config.window);
        if start > self.window_start {
            Self {
                window_start: start,
                count: 0,
            }
        } else {
            self
        }
    }

    fn reset_after(&self, config: &LimitConfig, now: Timestamp) -> std::time::Duration {
        let now = now.max(self.window_start);
        (self.window_start + config.window).saturating_sub(now)
    }
}

/// Record a check at `now`.
pub fn evaluate(state: FixedState, config: &LimitConfig, now: Timestamp) -> (Decision, FixedState) {
    let mut state = state.rolled(config, now);
    let reset_after = state.reset_after(config, now);

    if state.count < config.capacity {
        state.count += 1;
        (Decision::admit(config.capacity - state.count, reset_after), state)
    } else {
        (Decision::deny(0, reset_after, reset_after), state)
    }
}

/// The standing of a key at `now` without recording a check.
pub fn peek(state: FixedState, config: &LimitConfig, now: Timestamp) -> Decision {
    let state = state.rolled(config, now);
    let reset_after = state.reset_after(config, now);
    let remaining = config.capacity.saturating_sub(state.count);

    if remaining > 0 {
        Decision::admit(remaining, reset_after)
    } else {
        Decision::deny(0, reset_after, reset_after)
    }
}
