//! Per-key counter state and strategy dispatch.

use serde::{Deserialize, Serialize};

use super::clock::Timestamp;
use super::decision::Decision;
use super::limiter::LimitConfig;
use super::window::dynamic::{self, DynamicState};
use super::window::fixed::{self, FixedState};
use super::window::jumping::{self, JumpingState};

/// Window counting strategy, chosen when a mapping is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Windows aligned to multiples of the window length
    Fixed,
    /// Windows adapting to observed load
    Dynamic,
    /// Aligned windows that remember the previous window's count
    Jumping,
}

/// Counting state for one key.
///
/// The variant always matches the owning mapping's [`Strategy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterState {
    Fixed(FixedState),
    Dynamic(DynamicState),
    Jumping(JumpingState),
}

impl Strategy {
    /// Fresh state for a key first seen at `now`.
    pub fn initial_state(self, config: &LimitConfig, now: Timestamp) -> CounterState {
        match self {
            Strategy::Fixed => CounterState::Fixed(FixedState::new(config, now)),
            Strategy::Dynamic => CounterState::Dynamic(DynamicState::new(config, now)),
            Strategy::Jumping => CounterState::Jumping(JumpingState::new(config, now)),
        }
    }

    /// Record a check at `now`, returning the decision and the new state.
    pub fn evaluate(
        self,
        state: CounterState,
        config: &LimitConfig,
        now: Timestamp,
    ) -> (Decision, CounterState) {
        match (self, state) {
            (Strategy::Fixed, CounterState::Fixed(state)) => {
                let (decision, state) = fixed::evaluate(state, config, now);
                (decision, CounterState::Fixed(state))
            }
            (Strategy::Dynamic, CounterState::Dynamic(state)) => {
                let (decision, state) = dynamic::evaluate(state, config, now);
                (decision, CounterState::Dynamic(state))
            }
            (Strategy::Jumping, CounterState::Jumping(state)) => {
                let (decision, state) = jumping::evaluate(state, config, now);
                (decision, CounterState::Jumping(state))
            }
            (strategy, _) => strategy.evaluate(strategy.initial_state(config, now), config, now),
        }
    }

    /// The standing of a key at `now` without recording a check.
    pub fn peek(self, state: &CounterState, config: &LimitConfig, now: Timestamp) -> Decision {
        match (self, *state) {
            (Strategy::Fixed, CounterState::Fixed(state)) => fixed::peek(state, config, now),
            (Strategy::Dynamic, CounterState::Dynamic(state)) => dynamic::peek(state, config, now),
            (Strategy::Jumping, CounterState::Jumping(state)) => jumping::peek(state, config, now),
            (strategy, _) => strategy.peek(&strategy.initial_state(config, now), config, now),
        }
    }

    /// The standing of a key with no tracked state.
    pub fn peek_fresh(self, config: &LimitConfig, now: Timestamp) -> Decision {
        self.peek(&self.initial_state(config, now), config, now)
    }
}

impl CounterState {
    /// Admits recorded in the window the state was last rolled to.
    pub fn count(&self) -> u64 {
        match self {
            CounterState::Fixed(state) => state.count,
            CounterState::Dynamic(state) => state.count,
            CounterState::Jumping(state) => state.count,
        }
    }

    /// The previous window's count as seen at `now`. Jumping windows only.
    pub fn previous_count(&self, config: &LimitConfig, now: Timestamp) -> Option<u64> {
        match self {
            CounterState::Jumping(state) => state.rolled(config, now).previous_count,
            _ => None,
        }
    }
}
