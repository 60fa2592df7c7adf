//! Core keyed rate limiter shared by every mapping type.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::clock::{Clock, Timestamp};
use super::counter::{CounterState, Strategy};
use super::decision::{Decision, KeyState};
use super::store::CounterStore;
use crate::error::{FloodgateError, Result};

/// Default number of checks between opportunistic sweeps.
const DEFAULT_SWEEP_CHECK_INTERVAL: u64 = 4096;
/// Shortest period accepted for a background sweeper.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);
/// Longest window, widened by decay, that timestamps can represent.
const MAX_WINDOW: Duration = Duration::from_nanos(u64::MAX);

/// Limit parameters for a mapping. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitConfig {
    /// Maximum admits per window
    pub capacity: u64,
    /// Base window length
    pub window: Duration,
    /// Load adaptation strength in `0.0..=1.0`. Only dynamic windows use it.
    pub decay: f64,
}

impl LimitConfig {
    /// Create a limit of `capacity` admits per `window`.
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            capacity,
            window,
            decay: 0.0,
        }
    }

    /// Create a limit with the window given in milliseconds.
    pub fn from_millis(capacity: u64, window_ms: u64) -> Self {
        Self::new(capacity, Duration::from_millis(window_ms))
    }

    /// Set the decay used by dynamic windows.
    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    /// Check that the parameters describe a usable limit.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FloodgateError::Config(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(FloodgateError::Config(
                "window duration must be greater than zero".to_string(),
            ));
        }
        if !self.decay.is_finite() || !(0.0..=1.0).contains(&self.decay) {
            return Err(FloodgateError::Config(format!(
                "decay must be between 0.0 and 1.0, got {}",
                self.decay
            )));
        }
        if self.window.as_secs_f64() * (1.0 + self.decay) > MAX_WINDOW.as_secs_f64() {
            return Err(FloodgateError::Config(format!(
                "window of {:?} with decay {} exceeds the longest supported window of {:?}",
                self.window, self.decay, MAX_WINDOW
            )));
        }
        Ok(())
    }
}

/// When a mapping drops idle keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Keys idle for longer than this are swept. Defaults to twice the window.
    pub idle_threshold: Option<Duration>,
    /// Sweep after every this many checks. Zero disables opportunistic sweeps.
    pub check_interval: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            idle_threshold: None,
            check_interval: DEFAULT_SWEEP_CHECK_INTERVAL,
        }
    }
}

impl SweepConfig {
    /// No opportunistic sweeping; keys are only dropped by explicit or
    /// background sweeps.
    pub fn manual() -> Self {
        Self {
            idle_threshold: None,
            check_interval: 0,
        }
    }

    /// Set the idle threshold.
    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> Self {
        self.idle_threshold = Some(idle_threshold);
        self
    }

    /// Set the number of checks between opportunistic sweeps.
    pub fn with_check_interval(mut self, check_interval: u64) -> Self {
        self.check_interval = check_interval;
        self
    }
}

/// Keyed limiter combining a clock, a counter store and a strategy.
///
/// This struct is thread-safe and can be shared across threads and tasks.
pub(crate) struct Limiter<K, C> {
    strategy: Strategy,
    config: LimitConfig,
    clock: C,
    store: CounterStore<K, CounterState>,
    sweep: SweepConfig,
    /// Checks since creation, drives opportunistic sweeps
    checks: AtomicU64,
}

impl<K, C> Limiter<K, C>
where
    K: Eq + Hash,
    C: Clock,
{
    /// Create a limiter after validating `config`.
    pub fn new(strategy: Strategy, config: LimitConfig, clock: C) -> Result<Self> {
        config.validate()?;
        debug!(
            strategy = ?strategy,
            capacity = config.capacity,
            window_ms = config.window.as_millis() as u64,
            decay = config.decay,
            "Creating rate limiter"
        );
        Ok(Self {
            strategy,
            config,
            clock,
            store: CounterStore::new(),
            sweep: SweepConfig::default(),
            checks: AtomicU64::new(0),
        })
    }

    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Idle time after which a key is swept.
    pub fn idle_threshold(&self) -> Duration {
        self.sweep
            .idle_threshold
            .unwrap_or_else(|| self.config.window.saturating_mul(2))
    }

    /// Record a check for `key` and decide whether it is admitted.
    pub fn check<Q>(&self, key: &Q) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + Debug + ?Sized,
    {
        let now = self.clock.now();

        let (decision, created) = {
            let mut state = self.store.get_or_create(
                key,
                || self.strategy.initial_state(&self.config, now),
                now,
            );
            let (decision, next) = self.strategy.evaluate(*state, &self.config, now);
            *state = next;
            (decision, state.is_new())
        };

        if created {
            debug!(key = ?key, strategy = ?self.strategy, "Created new counter state");
        }

        trace!(
            key = ?key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Checked rate limit"
        );
        if !decision.allowed {
            debug!(
                key = ?key,
                retry_after_ms = ?decision.retry_after_ms(),
                "Rate limit exceeded"
            );
        }

        self.maybe_sweep(now);
        decision
    }

    /// The key's standing right now, without recording a check or creating
    /// state.
    pub fn peek<Q>(&self, key: &Q) -> Decision
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        match self.store.get(key) {
            Some(state) => self.strategy.peek(&state, &self.config, now),
            None => self.strategy.peek_fresh(&self.config, now),
        }
    }

    /// Where the key sits in the check state machine.
    pub fn state<Q>(&self, key: &Q) -> KeyState
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        match self.store.get(key) {
            None => KeyState::Idle,
            Some(state) if self.strategy.peek(&state, &self.config, now).allowed => {
                KeyState::Active
            }
            Some(_) => KeyState::Throttled,
        }
    }

    /// The previous window's admit count for `key`, if the strategy keeps one.
    pub fn previous_count<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.store
            .get(key)
            .and_then(|state| state.previous_count(&self.config, now))
    }

    /// Drop all state for `key`.
    pub fn reset<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        if self.store.remove(key) {
            debug!(key = ?key, "Reset counter state");
        }
    }

    /// Drop every key idle for longer than `idle_threshold`.
    pub fn sweep(&self, idle_threshold: Duration) -> usize {
        self.sweep_at(idle_threshold, self.clock.now())
    }

    /// Drop every key idle for longer than the configured threshold.
    pub fn sweep_idle(&self) -> usize {
        self.sweep(self.idle_threshold())
    }

    fn sweep_at(&self, idle_threshold: Duration, now: Timestamp) -> usize {
        let removed = self.store.sweep(idle_threshold, now);
        if removed > 0 {
            debug!(
                removed = removed,
                tracked = self.store.len(),
                idle_threshold_ms = idle_threshold.as_millis() as u64,
                "Swept idle counter state"
            );
        }
        removed
    }

    fn maybe_sweep(&self, now: Timestamp) {
        let interval = self.sweep.check_interval;
        if interval == 0 {
            return;
        }
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % interval == 0 {
            self.sweep_at(self.idle_threshold(), now);
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Run `sweep` against `mapping` every `interval` on the tokio runtime.
///
/// The task holds only a weak reference and stops once the mapping is
/// dropped. Must be called from within a tokio runtime.
pub(crate) fn spawn_sweeper<T>(
    mapping: &Arc<T>,
    interval: Duration,
    sweep: fn(&T) -> usize,
) -> JoinHandle<()>
where
    T: Send + Sync + ?Sized + 'static,
{
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    let mapping = Arc::downgrade(mapping);
    info!(
        interval_ms = interval.as_millis() as u64,
        "Starting background sweeper"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(mapping) = mapping.upgrade() else {
                break;
            };
            sweep(&mapping);
        }

        info!("Background sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use tokio_test::{assert_err, assert_ok};

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn limiter(strategy: Strategy, capacity: u64) -> (Limiter<String, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = Limiter::new(
            strategy,
            LimitConfig::from_millis(capacity, 1000),
            clock.clone(),
        )
        .unwrap()
        .with_sweep(SweepConfig::manual());
        (limiter, clock)
    }

    #[test]
    fn test_config_validation() {
        assert_ok!(LimitConfig::from_millis(1, 1).validate());
        assert_ok!(LimitConfig::from_millis(1, 1).with_decay(1.0).validate());
        assert_err!(LimitConfig::from_millis(0, 1000).validate());
        assert_err!(LimitConfig::from_millis(10, 0).validate());
        assert_err!(LimitConfig::from_millis(10, 1000).with_decay(-0.1).validate());
        assert_err!(LimitConfig::from_millis(10, 1000).with_decay(1.5).validate());
        assert_err!(LimitConfig::from_millis(10, 1000).with_decay(f64::NAN).validate());
    }

    #[test]
    fn test_config_rejects_unrepresentable_windows() {
        assert_ok!(LimitConfig::new(1, MAX_WINDOW).validate());
        assert_ok!(LimitConfig::new(1, MAX_WINDOW / 4).with_decay(1.0).validate());
        assert_err!(LimitConfig::new(1, MAX_WINDOW).with_decay(0.5).validate());
        assert_err!(LimitConfig::new(1, Duration::MAX).validate());
        assert_err!(LimitConfig::new(1, Duration::MAX).with_decay(0.5).validate());
        assert_err!(LimitConfig::from_millis(1, u64::MAX).validate());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result: Result<Limiter<String, _>> = Limiter::new(
            Strategy::Fixed,
            LimitConfig::from_millis(0, 1000),
            ManualClock::new(),
        );
        assert!(matches!(result, Err(FloodgateError::Config(_))));
    }

    #[test]
    fn test_check_creates_state() {
        let (limiter, _) = limiter(Strategy::Fixed, 10);
        assert_eq!(limiter.len(), 0);

        assert!(limiter.check("key").allowed);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_peek_does_not_create_state() {
        let (limiter, _) = limiter(Strategy::Fixed, 10);

        let decision = limiter.peek("key");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_state_machine() {
        let (limiter, clock) = limiter(Strategy::Fixed, 2);
        assert_eq!(limiter.state("key"), KeyState::Idle);

        limiter.check("key");
        assert_eq!(limiter.state("key"), KeyState::Active);

        limiter.check("key");
        assert_eq!(limiter.state("key"), KeyState::Throttled);

        clock.advance(ms(1000));
        assert_eq!(limiter.state("key"), KeyState::Active);

        limiter.reset("key");
        assert_eq!(limiter.state("key"), KeyState::Idle);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (limiter, _) = limiter(Strategy::Jumping, 1);
        limiter.check("key");
        assert!(!limiter.check("key").allowed);

        limiter.reset("key");
        let once = (limiter.len(), limiter.peek("key"));
        limiter.reset("key");
        let twice = (limiter.len(), limiter.peek("key"));

        assert_eq!(once, twice);
        assert!(limiter.check("key").allowed);
    }

    #[test]
    fn test_sweep_drops_idle_keys() {
        let (limiter, clock) = limiter(Strategy::Fixed, 10);
        limiter.check("old");
        clock.advance(ms(600));
        limiter.check("new");
        clock.advance(ms(500));

        assert_eq!(limiter.sweep(ms(1000)), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.state("old"), KeyState::Idle);
        assert_eq!(limiter.state("new"), KeyState::Active);
    }

    #[test]
    fn test_default_idle_threshold_is_two_windows() {
        let (limiter, clock) = limiter(Strategy::Jumping, 10);
        assert_eq!(limiter.idle_threshold(), ms(2000));

        limiter.check("key");
        clock.advance(ms(2000));
        assert_eq!(limiter.sweep_idle(), 0);
        clock.advance(ms(1));
        assert_eq!(limiter.sweep_idle(), 1);
    }

    #[test]
    fn test_opportunistic_sweep() {
        let clock = ManualClock::new();
        let limiter: Limiter<String, _> = Limiter::new(
            Strategy::Fixed,
            LimitConfig::from_millis(100, 1000),
            clock.clone(),
        )
        .unwrap()
        .with_sweep(
            SweepConfig::default()
                .with_check_interval(4)
                .with_idle_threshold(ms(100)),
        );

        limiter.check("stale");
        clock.advance(ms(500));
        limiter.check("a");
        limiter.check("a");
        assert_eq!(limiter.len(), 2);

        // Fourth check triggers a sweep.
        limiter.check("a");
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.state("stale"), KeyState::Idle);
    }

    #[test]
    fn test_previous_count_only_for_jumping() {
        let (fixed, fixed_clock) = limiter(Strategy::Fixed, 10);
        let (jumping, jumping_clock) = limiter(Strategy::Jumping, 10);

        for _ in 0..3 {
            fixed.check("key");
            jumping.check("key");
        }
        fixed_clock.advance(ms(1000));
        jumping_clock.advance(ms(1000));

        assert_eq!(fixed.previous_count("key"), None);
        assert_eq!(jumping.previous_count("key"), Some(3));
        assert_eq!(jumping.previous_count("missing"), None);
    }

    #[tokio::test]
    async fn test_background_sweeper_stops_with_mapping() {
        let (limiter, clock) = limiter(Strategy::Fixed, 10);
        let limiter = Arc::new(limiter);
        limiter.check("key");
        clock.advance(ms(5000));

        let handle = spawn_sweeper(&limiter, ms(5), Limiter::sweep_idle);
        tokio::time::sleep(ms(50)).await;
        assert_eq!(limiter.len(), 0);

        drop(limiter);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop once the mapping is dropped")
            .unwrap();
    }
}
