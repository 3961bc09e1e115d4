use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guest keys sort before unit keys, so every caller locks in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum LockKey {
    Guest(String),
    Unit(String),
}

/// Held for the duration of one check-then-write sequence. Dropping it
/// releases both mutexes and removes slots nobody else is using.
pub(super) struct StayGuard<'a> {
    table: &'a LockTable,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
    /// Set while waiting, so a cancelled `lock` still releases its slot.
    waiting: Option<LockKey>,
}

impl Drop for StayGuard<'_> {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.held.pop() {
            drop(guard);
            self.table.release(&key);
        }
        if let Some(key) = self.waiting.take() {
            self.table.release(&key);
        }
    }
}

/// Per-guest and per-unit mutexes. Two requests that could conflict share a
/// guest or a unit, so they serialize; unrelated requests run in parallel.
/// Only slots with a holder or a waiter stay in the map.
#[derive(Default)]
pub(super) struct LockTable {
    slots: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockTable {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) async fn lock(&self, guest_name: &str, unit_id: &str) -> StayGuard<'_> {
        let mut keys = [
            LockKey::Guest(guest_name.to_string()),
            LockKey::Unit(unit_id.to_string()),
        ];
        keys.sort();

        let mut guard = StayGuard {
            table: self,
            held: Vec::with_capacity(keys.len()),
            waiting: None,
        };
        for key in keys {
            // Clone the Arc out so no DashMap shard lock is held across the await.
            let slot = self.slots.entry(key.clone()).or_default().clone();
            guard.waiting = Some(key.clone());
            let held = slot.lock_owned().await;
            guard.waiting = None;
            guard.held.push((key, held));
        }
        guard
    }

    /// The map's own reference is the last one: no holder, no waiter.
    fn release(&self, key: &LockKey) {
        self.slots.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.slots.len()
    }
}
