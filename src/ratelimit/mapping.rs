//! Public mapping types, one per window strategy.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::backend::RateLimiter;
use super::clock::{Clock, MonotonicClock};
use super::counter::Strategy;
use super::decision::{Decision, KeyState};
use super::limiter::{self, LimitConfig, Limiter, SweepConfig};
use crate::error::Result;

macro_rules! mapping {
    ($(#[$meta:meta])* $name:ident, $strategy:expr) => {
        $(#[$meta])*
        pub struct $name<K = String, C = MonotonicClock> {
            limiter: Limiter<K, C>,
        }

        impl<K> $name<K, MonotonicClock>
        where
            K: Eq + Hash,
        {
            /// Create a mapping driven by the system clock.
            pub fn with_config(config: LimitConfig) -> Result<Self> {
                Self::new(config, MonotonicClock::new())
            }
        }

        impl<K, C> $name<K, C>
        where
            K: Eq + Hash,
            C: Clock,
        {
            /// Create a mapping. Fails if `config` is invalid.
            pub fn new(config: LimitConfig, clock: C) -> Result<Self> {
                Ok(Self {
                    limiter: Limiter::new($strategy, config, clock)?,
                })
            }

            /// Replace the idle-key sweeping policy.
            pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
                self.limiter = self.limiter.with_sweep(sweep);
                self
            }

            /// The strategy this mapping counts with.
            pub fn strategy(&self) -> Strategy {
                self.limiter.strategy()
            }

            /// The limit this mapping enforces.
            pub fn config(&self) -> &LimitConfig {
                self.limiter.config()
            }

            /// The mapping's time source.
            pub fn clock(&self) -> &C {
                self.limiter.clock()
            }

            /// Record a check for `key` and decide whether it is admitted.
            ///
            /// Never fails; state for unseen keys is created on the fly.
            pub fn check<Q>(&self, key: &Q) -> Decision
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ToOwned<Owned = K> + Debug + ?Sized,
            {
                self.limiter.check(key)
            }

            /// Record a check; returns how long to wait if it was denied.
            pub fn trigger<Q>(&self, key: &Q) -> Option<Duration>
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ToOwned<Owned = K> + Debug + ?Sized,
            {
                self.limiter.check(key).retry_after
            }

            /// The standing of `key` right now, without recording a check.
            ///
            /// `allowed` says whether a check now would be admitted and
            /// `remaining` counts the admits left before this check.
            pub fn peek<Q>(&self, key: &Q) -> Decision
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ?Sized,
            {
                self.limiter.peek(key)
            }

            /// Admits left in the current window.
            pub fn tokens<Q>(&self, key: &Q) -> u64
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ?Sized,
            {
                self.limiter.peek(key).remaining
            }

            /// Whether a check now would be admitted.
            pub fn can_trigger<Q>(&self, key: &Q) -> bool
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ?Sized,
            {
                self.limiter.peek(key).allowed
            }

            /// Time until the key's current window ends.
            pub fn next_reset<Q>(&self, key: &Q) -> Duration
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ?Sized,
            {
                self.limiter.peek(key).reset_after
            }

            /// How long to wait before a check would be admitted, if it would
            /// be denied now.
            pub fn retry_after<Q>(&self, key: &Q) -> Option<Duration>
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ?Sized,
            {
                self.limiter.peek(key).retry_after
            }

            /// Where the key sits in the check state machine.
            pub fn state<Q>(&self, key: &Q) -> KeyState
            where
                K: Borrow<Q>,
                Q: Hash + Eq + ?Sized,
            {
                self.limiter.state(key)
            }

            /// Drop all state for `key`. Calling it again has no effect.
            pub fn reset<Q>(&self, key: &Q)
            where
                K: Borrow<Q>,
                Q: Hash + Eq + Debug + ?Sized,
            {
                self.limiter.reset(key)
            }

            /// Drop every key idle for longer than `idle_threshold`.
            /// Returns the number of keys dropped.
            pub fn sweep(&self, idle_threshold: Duration) -> usize {
                self.limiter.sweep(idle_threshold)
            }

            /// Drop every key idle for longer than the configured threshold.
            pub fn sweep_idle(&self) -> usize {
                self.limiter.sweep_idle()
            }

            /// Number of tracked keys. Approximate under concurrent mutation.
            pub fn len(&self) -> usize {
                self.limiter.len()
            }

            pub fn is_empty(&self) -> bool {
                self.limiter.is_empty()
            }

            /// Drop all state for every key.
            pub fn clear(&self) {
                self.limiter.clear()
            }
        }

        impl<K, C> $name<K, C>
        where
            K: Eq + Hash + Send + Sync + 'static,
            C: Clock + 'static,
        {
            /// Sweep idle keys every `interval` on the tokio runtime.
            ///
            /// The task stops on its own once the mapping is dropped.
            pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
                limiter::spawn_sweeper(self, interval, Self::sweep_idle)
            }
        }

        impl<K, C> RateLimiter<K> for $name<K, C>
        where
            K: Eq + Hash + Clone + Debug + Send + Sync,
            C: Clock,
        {
            fn check(&self, key: &K) -> Decision {
                self.limiter.check(key)
            }

            fn peek(&self, key: &K) -> Decision {
                self.limiter.peek(key)
            }

            fn reset(&self, key: &K) {
                self.limiter.reset(key)
            }

            fn sweep(&self, idle_threshold: Duration) -> usize {
                self.limiter.sweep(idle_threshold)
            }

            fn sweep_idle(&self) -> usize {
                self.limiter.sweep_idle()
            }

            fn len(&self) -> usize {
                self.limiter.len()
            }
        }
    };
}

mapping!(
    /// Keyed limiter over fixed windows aligned to multiples of the window
    /// length since the epoch.
    ///
    /// Bursts straddling a window boundary may see up to twice the capacity
    /// admitted in a short span.
    FixedMapping,
    Strategy::Fixed
);

mapping!(
    /// Keyed limiter whose windows adapt to each key's observed load.
    ///
    /// The `decay` of the [`LimitConfig`] sets how strongly it adapts; with a
    /// decay of zero it behaves exactly like [`FixedMapping`].
    DynamicMapping,
    Strategy::Dynamic
);

mapping!(
    /// Keyed limiter over aligned windows that keeps the previous window's
    /// count readable for one extra window.
    ///
    /// Decisions carry a `smoothed_remaining` estimate blending in that
    /// previous count; admission itself matches [`FixedMapping`].
    JumpingWindow,
    Strategy::Jumping
);

impl<K, C> JumpingWindow<K, C>
where
    K: Eq + Hash,
    C: Clock,
{
    /// Admits recorded in the window before the current one, while it is
    /// still retained.
    pub fn previous_count<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.limiter.previous_count(key)
    }
}
