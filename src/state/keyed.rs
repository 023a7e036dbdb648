use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Slots kept before idle ones are pruned
const PRUNE_THRESHOLD: usize = 256;

/// One FIFO mutex per key, so remote calls for the same game run in the
/// order their optimistic updates were applied.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this key's turn
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.len() > PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

/// Remote writes still outstanding for one key
struct Burst<T> {
    pending: usize,
    failed: bool,
    /// Last state the store is known to hold
    settled: T,
}

/// Tracks overlapping optimistic writes per key.
///
/// Each write calls [`PendingWrites::begin`] when it changes memory and
/// [`PendingWrites::finish`] once the store has answered. Only the last write
/// of a burst decides the rollback, so a failure in the middle never undoes
/// edits that were queued behind it.
pub struct PendingWrites<T> {
    bursts: Arc<Mutex<HashMap<String, Burst<T>>>>,
}

impl<T> Clone for PendingWrites<T> {
    fn clone(&self) -> Self {
        Self {
            bursts: self.bursts.clone(),
        }
    }
}

impl<T> Default for PendingWrites<T> {
    fn default() -> Self {
        Self {
            bursts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> PendingWrites<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a write. `before` is the value memory held before it; it only
    /// counts when no other write for `key` is outstanding.
    pub fn begin(&self, key: &str, before: T) {
        let mut bursts = self.bursts.lock().unwrap_or_else(|e| e.into_inner());
        bursts
            .entry(key.to_string())
            .and_modify(|burst| burst.pending += 1)
            .or_insert(Burst {
                pending: 1,
                failed: false,
                settled: before,
            });
    }

    /// Record a write's outcome: `Some(accept)` applies the write to the
    /// settled value, `None` marks it failed.
    ///
    /// Returns the value memory must be reset to once the burst is over and
    /// any write in it failed.
    pub fn finish<F>(&self, key: &str, accepted: Option<F>) -> Option<T>
    where
        F: FnOnce(&mut T),
    {
        let mut bursts = self.bursts.lock().unwrap_or_else(|e| e.into_inner());
        let burst = bursts.get_mut(key)?;
        match accepted {
            Some(accept) => accept(&mut burst.settled),
            None => burst.failed = true,
        }
        burst.pending -= 1;
        if burst.pending > 0 {
            return None;
        }

        let burst = bursts.remove(key)?;
        burst.failed.then_some(burst.settled)
    }
}
