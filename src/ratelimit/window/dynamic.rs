//! Windows whose length and admission threshold adapt to observed load.
//!
//! Load is tracked as an exponentially decayed count of admits with a
//! half-life of `decay * window`. With observed rate `r` (admits per second)
//! and utilization `u = min(1, r * window / capacity)`:
//!
//! - a new window lasts `window * (1 + decay * (1 - u))`, so quiet keys get
//!   longer windows and busy keys fall back to the base window;
//! - a check is admitted only if `count + 1 + floor(decay * r * time_left)`
//!   stays within capacity, which spreads a sustained burst over the rest
//!   of the window instead of spending the whole capacity up front.
//!
//! With `decay == 0` the half-life is zero, the window never widens and the
//! projection term vanishes, so decisions are identical to a fixed window.

use std::f64::consts::LN_2;
use std::time::Duration;

use super::aligned_start;
use crate::ratelimit::clock::Timestamp;
use crate::ratelimit::decision::Decision;
use crate::ratelimit::limiter::LimitConfig;

/// Per-key dynamic window state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicState {
    /// Start of the current window
    pub window_start: Timestamp,
    /// Length of the current window, fixed when it opened
    pub window_len: Duration,
    /// Admits recorded in the current window
    pub count: u64,
    /// Decayed admit count, valid as of `last_seen`
    pub load: f64,
    /// Latest check time, when `load` was last decayed
    pub last_seen: Timestamp,
}

impl DynamicState {
    /// Empty state with a window opening at `now`.
    pub fn new(config: &LimitConfig, now: Timestamp) -> Self {
        Self {
            window_start: aligned_start(now, config.window),
            window_len: window_len(config, 0.0),
            count: 0,
            load: 0.0,
            last_seen: now,
        }
    }

    fn window_end(&self) -> Timestamp {
        self.window_start + self.window_len
    }

    /// The state as seen at `now`: load decayed, and a new window opened if
    /// the current one has ended.
    pub fn rolled(self, config: &LimitConfig, now: Timestamp) -> Self {
        let now = now.max(self.window_start);
        let mut next = Self {
            load: decayed_load(self.load, config, now.saturating_sub(self.last_seen)),
            last_seen: self.last_seen.max(now),
            ..self
        };

        let end = self.window_end();
        if now >= end {
            let utilization = utilization(config, next.load);
            next.window_start = aligned_start(now, config.window).max(end);
            next.window_len = window_len(config, utilization);
            next.count = 0;
        }
        next
    }

    /// Admits the projection says the rest of the window will bring.
    fn projected_extra(&self, config: &LimitConfig, time_left: Duration) -> u64 {
        if config.decay == 0.0 {
            return 0;
        }
        let extra = config.decay * rate(config, self.load) * time_left.as_secs_f64();
        // Float to int casts saturate.
        extra.floor() as u64
    }

    fn decide(&self, config: &LimitConfig, now: Timestamp) -> Decision {
        let time_left = self.window_end().saturating_sub(now);
        let remaining = config.capacity.saturating_sub(self.count);
        let projected = self
            .count
            .saturating_add(1)
            .saturating_add(self.projected_extra(config, time_left));

        if projected <= config.capacity {
            Decision::admit(remaining, time_left)
        } else if remaining == 0 {
            Decision::deny(0, time_left, time_left)
        } else {
            let retry_after = time_left.min(half_life(config));
            Decision::deny(remaining, retry_after, time_left)
        }
    }
}

/// Record a check at `now`.
pub fn evaluate(
    state: DynamicState,
    config: &LimitConfig,
    now: Timestamp,
) -> (Decision, DynamicState) {
    let mut state = state.rolled(config, now);
    let now = now.max(state.window_start);
    let decision = state.decide(config, now);

    if decision.allowed {
        state.count += 1;
        if config.decay > 0.0 {
            state.load += 1.0;
        }
        return (Decision::admit(decision.remaining - 1, decision.reset_after), state);
    }
    (decision, state)
}

/// The standing of a key at `now` without recording a check.
pub fn peek(state: DynamicState, config: &LimitConfig, now: Timestamp) -> Decision {
    let state = state.rolled(config, now);
    state.decide(config, now.max(state.window_start))
}

fn half_life(config: &LimitConfig) -> Duration {
    config.window.mul_f64(config.decay)
}

fn decayed_load(load: f64, config: &LimitConfig, elapsed: Duration) -> f64 {
    let half_life = half_life(config);
    if half_life.is_zero() {
        return 0.0;
    }
    load * 0.5f64.powf(elapsed.as_secs_f64() / half_life.as_secs_f64())
}

/// Observed admits per second implied by a decayed count.
fn rate(config: &LimitConfig, load: f64) -> f64 {
    let half_life = half_life(config);
    if half_life.is_zero() {
        return 0.0;
    }
    load * LN_2 / half_life.as_secs_f64()
}

fn utilization(config: &LimitConfig, load: f64) -> f64 {
    let per_window = rate(config, load) * config.window.as_secs_f64();
    (per_window / config.capacity as f64).clamp(0.0, 1.0)
}

/// Window length for a utilization in `0.0..=1.0`. Non-increasing in
/// utilization and never shorter than the base window.
fn window_len(config: &LimitConfig, utilization: f64) -> Duration {
    config
        .window
        .mul_f64(1.0 + config.decay * (1.0 - utilization))
}
