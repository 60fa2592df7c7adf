//! Jumping windows.
//!
//! Admission works exactly like a fixed window. When the window jumps to the
//! next index, the count of the window that just ended stays readable for
//! one more window and is blended into `smoothed_remaining`. It is never
//! used to admit or deny.

use super::{bucket_index, bucket_start};
use crate::ratelimit::clock::Timestamp;
use crate::ratelimit::decision::Decision;
use crate::ratelimit::limiter::LimitConfig;

/// Per-key jumping window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpingState {
    /// Index of the current window, `now / window`
    pub window_index: u64,
    /// Admits recorded in the current window
    pub count: u64,
    /// Admits recorded in the window immediately before `window_index`
    pub previous_count: Option<u64>,
}

impl JumpingState {
    /// Empty state for the window containing `now`.
    pub fn new(config: &LimitConfig, now: Timestamp) -> Self {
        Self {
            window_index: bucket_index(now, config.window),
            count: 0,
            previous_count: None,
        }
    }

    /// The state as seen at `now`.
    ///
    /// Jumping one window keeps the old count as `previous_count`; jumping
    /// further discards it.
    pub fn rolled(self, config: &LimitConfig, now: Timestamp) -> Self {
        let index = bucket_index(now, config.window);
        if index <= self.window_index {
            return self;
        }
        let previous_count = (index == self.window_index + 1).then_some(self.count);
        Self {
            window_index: index,
            count: 0,
            previous_count,
        }
    }

    /// Remaining admits once the previous window's count, weighted by how
    /// much of the current window is still ahead, is added to the current
    /// count.
    fn smoothed_remaining(&self, config: &LimitConfig, now: Timestamp) -> u64 {
        let previous = self.previous_count.unwrap_or(0);
        let start = bucket_start(self.window_index, config.window);
        let elapsed = now.saturating_sub(start).as_secs_f64() / config.window.as_secs_f64();
        let weight = (1.0 - elapsed).clamp(0.0, 1.0);
        let carried = (previous as f64 * weight).floor() as u64;
        config
            .capacity
            .saturating_sub(self.count.saturating_add(carried))
    }

    fn reset_after(&self, config: &LimitConfig, now: Timestamp) -> std::time::Duration {
        let start = bucket_start(self.window_index, config.window);
        bucket_start(self.window_index.saturating_add(1), config.window)
            .saturating_sub(now.max(start))
    }
}

/// Record a check at `now`.
pub fn evaluate(
    state: JumpingState,
    config: &LimitConfig,
    now: Timestamp,
) -> (Decision, JumpingState) {
    let mut state = state.rolled(config, now);
    let reset_after = state.reset_after(config, now);

    let decision = if state.count < config.capacity {
        state.count += 1;
        Decision::admit(config.capacity - state.count, reset_after)
    } else {
        Decision::deny(0, reset_after, reset_after)
    };
    let smoothed = state.smoothed_remaining(config, now);
    (decision.with_smoothed_remaining(smoothed), state)
}

/// The standing of a key at `now` without recording a check.
pub fn peek(state: JumpingState, config: &LimitConfig, now: Timestamp) -> Decision {
    let state = state.rolled(config, now);
    let reset_after = state.reset_after(config, now);
    let remaining = config.capacity.saturating_sub(state.count);

    let decision = if remaining > 0 {
        Decision::admit(remaining, reset_after)
    } else {
        Decision::deny(0, reset_after, reset_after)
    };
    decision.with_smoothed_remaining(state.smoothed_remaining(config, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(millis: u64) -> Timestamp {
        Duration::from_millis(millis)
    }

    fn check_n(
        mut state: JumpingState,
        config: &LimitConfig,
        now: Timestamp,
        n: usize,
    ) -> (Vec<Decision>, JumpingState) {
        let mut decisions = Vec::with_capacity(n);
        for _ in 0..n {
            let (decision, next) = evaluate(state, config, now);
            decisions.push(decision);
            state = next;
        }
        (decisions, state)
    }

    #[test]
    fn test_denies_after_capacity() {
        let config = LimitConfig::from_millis(3, 1000);
        let (decisions, _) = check_n(JumpingState::new(&config, ms(0)), &config, ms(0), 4);

        assert!(decisions[..3].iter().all(|d| d.allowed));
        assert!(!decisions[3].allowed);
        assert_eq!(decisions[3].retry_after, Some(ms(1000)));
    }

    #[test]
    fn test_previous_count_retained_for_one_window() {
        let config = LimitConfig::from_millis(10, 1000);
        let (_, state) = check_n(JumpingState::new(&config, ms(0)), &config, ms(100), 4);

        let next = state.rolled(&config, ms(1500));
        assert_eq!(next.window_index, 1);
        assert_eq!(next.count, 0);
        assert_eq!(next.previous_count, Some(4));

        let skipped = state.rolled(&config, ms(2000));
        assert_eq!(skipped.previous_count, None);
    }

    #[test]
    fn test_previous_count_discarded_after_following_window() {
        let config = LimitConfig::from_millis(10, 1000);
        let (_, state) = check_n(JumpingState::new(&config, ms(0)), &config, ms(100), 4);
        let (_, state) = check_n(state, &config, ms(1100), 1);
        assert_eq!(state.previous_count, Some(4));

        let state = state.rolled(&config, ms(2100));
        assert_eq!(state.previous_count, Some(1));
    }

    #[test]
    fn test_smoothed_remaining_blends_previous_window() {
        let config = LimitConfig::from_millis(10, 1000);
        let (_, state) = check_n(JumpingState::new(&config, ms(0)), &config, ms(0), 8);

        // A quarter into the next window, 3/4 of the previous 8 still count.
        let (decisions, _) = check_n(state, &config, ms(1250), 1);
        let decision = decisions[0];
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.smoothed_remaining, Some(3));
    }

    #[test]
    fn test_smoothed_remaining_does_not_change_admission() {
        let config = LimitConfig::from_millis(5, 1000);
        let (_, state) = check_n(JumpingState::new(&config, ms(0)), &config, ms(999), 5);

        let (decisions, _) = check_n(state, &config, ms(1000), 6);
        assert!(decisions[..5].iter().all(|d| d.allowed));
        assert!(!decisions[5].allowed);
        assert_eq!(decisions[0].smoothed_remaining, Some(0));
    }

    #[test]
    fn test_stale_timestamp_reports_current_window_reset() {
        let config = LimitConfig::from_millis(2, 1000);
        let (_, state) = check_n(JumpingState::new(&config, ms(1500)), &config, ms(1500), 2);

        let (decisions, state) = check_n(state, &config, ms(900), 1);
        assert!(!decisions[0].allowed);
        assert_eq!(decisions[0].retry_after, Some(ms(1000)));
        assert_eq!(decisions[0].reset_after, ms(1000));
        assert_eq!(state.window_index, 1);
    }

    #[test]
    fn test_remaining_resets_on_rollover() {
        let config = LimitConfig::from_millis(5, 1000);
        let (decisions, state) = check_n(JumpingState::new(&config, ms(0)), &config, ms(0), 5);
        assert_eq!(decisions[4].remaining, 0);

        let (decisions, _) = check_n(state, &config, ms(1000), 1);
        assert_eq!(decisions[0].remaining, 4);
    }

    #[test]
    fn test_peek_reports_smoothing() {
        let config = LimitConfig::from_millis(4, 1000);
        let (_, state) = check_n(JumpingState::new(&config, ms(0)), &config, ms(0), 4);

        let decision = peek(state, &config, ms(1500));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.smoothed_remaining, Some(2));
    }
}
