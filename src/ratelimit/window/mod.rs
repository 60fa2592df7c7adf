//! Window counting algorithms.
//!
//! Every algorithm works on a copy of a key's state: it returns the decision
//! together with the replacement state, and the caller stores the new state
//! in one assignment. Timestamps older than the stored window (a caller that
//! read the clock before waiting on the key's lock) never move a window
//! backwards.

pub mod dynamic;
pub mod fixed;
pub mod jumping;

use std::time::Duration;

use super::clock::Timestamp;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Index of the aligned window containing `now`.
pub(crate) fn bucket_index(now: Timestamp, window: Duration) -> u64 {
    u64::try_from(now.as_nanos() / window.as_nanos()).unwrap_or(u64::MAX)
}

/// Start time of the aligned window with the given index.
pub(crate) fn bucket_start(index: u64, window: Duration) -> Timestamp {
    let nanos = u128::from(index).saturating_mul(window.as_nanos());
    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

/// Start time of the aligned window containing `now`.
pub(crate) fn aligned_start(now: Timestamp, window: Duration) -> Timestamp {
    bucket_start(bucket_index(now, window), window)
}
