//! Time sources for rate limit decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A point in time, measured as the duration since the Unix epoch.
///
/// Window boundaries are aligned to multiples of the window length since
/// this epoch.
pub type Timestamp = Duration;

/// A monotonic time source.
///
/// Implementations must never return a value smaller than one they returned
/// before, and must be callable from many threads without locking.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall-clock anchored monotonic clock.
///
/// The wall clock is read once at construction; after that time advances
/// with [`Instant`], so system clock adjustments never move it backwards.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Timestamp,
    started: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self {
            anchor: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO),
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.anchor + self.started.elapsed()
    }
}

/// A manually driven clock for deterministic tests.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// hand another to a mapping.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at the given time.
    pub fn starting_at(start: Timestamp) -> Self {
        let clock = Self::new();
        clock.set(start);
        clock
    }

    /// Move the clock forward, saturating at the latest representable time.
    pub fn advance(&self, by: Duration) {
        let by = duration_to_nanos(by);
        let update = |nanos: u64| Some(nanos.saturating_add(by));
        let nanos = &self.nanos;
        let _ = nanos.fetch_update(Ordering::SeqCst, Ordering::SeqCst, update);
    }

    /// Move the clock to `to`. Earlier values are ignored.
    pub fn set(&self, to: Timestamp) {
        self.nanos.fetch_max(duration_to_nanos(to), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(250));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(500));
    }

    #[test]
    fn test_manual_clock_advance_saturates() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(1));
        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::starting_at(Duration::from_secs(10));

        clock.set(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(10));

        clock.set(Duration::from_secs(12));
        assert_eq!(clock.now(), Duration::from_secs(12));
    }

    #[test]
    fn test_monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_monotonic_clock_tracks_wall_time() {
        let clock = MonotonicClock::new();
        let wall = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let drift = if clock.now() > wall {
            clock.now() - wall
        } else {
            wall - clock.now()
        };
        assert!(drift < Duration::from_secs(1));
    }

    #[test]
    fn test_arc_clock_delegates() {
        let clock = ManualClock::starting_at(Duration::from_secs(7));
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        assert_eq!(shared.now(), Duration::from_secs(7));
    }
}
