//! Concurrent per-key counter storage.
//!
//! Entries live in a sharded [`DashMap`]; each value is an individually
//! locked slot. The shard lock is held only long enough to clone the slot's
//! `Arc`, so mutating one key never waits on another key's critical section.

use std::borrow::Borrow;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use super::clock::Timestamp;

struct Slot<S> {
    state: S,
    last_access: Timestamp,
}

/// Exclusive access to one key's state.
///
/// The key's lock is held until the handle is dropped. While any handle
/// exists the entry is never swept.
pub struct SlotHandle<S> {
    guard: ArcMutexGuard<RawMutex, Slot<S>>,
    created: bool,
}

impl<S> SlotHandle<S> {
    /// When the entry was last fetched through `get_or_create`.
    pub fn last_access(&self) -> Timestamp {
        self.guard.last_access
    }

    /// Whether this call created the entry.
    pub fn is_new(&self) -> bool {
        self.created
    }
}

impl<S> Deref for SlotHandle<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard.state
    }
}

impl<S> DerefMut for SlotHandle<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard.state
    }
}

/// Map from key to lazily created, individually locked counter state.
pub struct CounterStore<K, S> {
    slots: DashMap<K, Arc<Mutex<Slot<S>>>>,
}

impl<K, S> CounterStore<K, S>
where
    K: Eq + Hash,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Lock the state for `key`, creating it with `init` on first access.
    ///
    /// Records `now` as the entry's last access time.
    pub fn get_or_create<Q>(
        &self,
        key: &Q,
        init: impl FnOnce() -> S,
        now: Timestamp,
    ) -> SlotHandle<S>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let mut created = false;
        let existing = self.slots.get(key).map(|slot| Arc::clone(slot.value()));
        let slot = match existing {
            Some(slot) => slot,
            None => Arc::clone(
                self.slots
                    .entry(key.to_owned())
                    .or_insert_with(|| {
                        created = true;
                        Arc::new(Mutex::new(Slot {
                            state: init(),
                            last_access: now,
                        }))
                    })
                    .value(),
            ),
        };

        let mut guard = slot.lock_arc();
        guard.last_access = guard.last_access.max(now);
        SlotHandle { guard, created }
    }

    /// Lock the state for `key` if it exists.
    ///
    /// Does not create state and does not count as an access for sweeping.
    pub fn get<Q>(&self, key: &Q) -> Option<SlotHandle<S>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.slots.get(key).map(|slot| Arc::clone(slot.value()))?;
        Some(SlotHandle {
            guard: slot.lock_arc(),
            created: false,
        })
    }

    /// Remove the state for `key`. Returns whether an entry existed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.remove(key).is_some()
    }

    /// Remove every entry not accessed within `idle_threshold` of `now`.
    ///
    /// Entries currently held through a [`SlotHandle`] are skipped. Returns the
    /// number of entries removed.
    pub fn sweep(&self, idle_threshold: Duration, now: Timestamp) -> usize {
        let mut removed = 0;
        self.slots.retain(|_, slot| {
            // Handles keep a clone of the Arc; new ones need this shard's lock.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Some(guard) = slot.try_lock() else {
                return true;
            };
            let idle = now.saturating_sub(guard.last_access) > idle_threshold;
            if idle {
                removed += 1;
            }
            !idle
        });
        removed
    }

    /// Number of tracked keys. Approximate under concurrent mutation.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

impl<K, S> Default for CounterStore<K, S>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
