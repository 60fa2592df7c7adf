//! Rate limiter trait for abstracting over the mapping types.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::decision::Decision;

/// Trait for keyed rate limiters.
///
/// This trait abstracts over [`FixedMapping`](super::FixedMapping),
/// [`DynamicMapping`](super::DynamicMapping) and
/// [`JumpingWindow`](super::JumpingWindow) so embedding code can pick a
/// strategy at runtime and hold an `Arc<dyn RateLimiter<K>>`.
pub trait RateLimiter<K>: Send + Sync {
    /// Record a check for `key` and decide whether it is admitted.
    fn check(&self, key: &K) -> Decision;

    /// The standing of `key` without recording a check.
    fn peek(&self, key: &K) -> Decision;

    /// Drop all state for `key`.
    fn reset(&self, key: &K);

    /// Drop every key idle for longer than `idle_threshold`.
    fn sweep(&self, idle_threshold: Duration) -> usize;

    /// Drop every key idle for longer than the mapping's configured threshold.
    fn sweep_idle(&self) -> usize;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sweep idle keys of `limiter` every `interval` on the tokio runtime.
///
/// The task stops on its own once every other reference to the limiter is
/// dropped.
pub fn spawn_sweeper<K: 'static>(
    limiter: &Arc<dyn RateLimiter<K>>,
    interval: Duration,
) -> JoinHandle<()> {
    super::limiter::spawn_sweeper(limiter, interval, |limiter| limiter.sweep_idle())
}
