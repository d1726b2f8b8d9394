//! Pending table: single-settlement futures keyed by id.
//!
//! Every outstanding `invoke()` and `open()` is one entry: a oneshot sender
//! plus the deadline it was armed with. Settling an entry *removes* it, so
//! whichever of {reply, deadline} gets there first wins and the other finds
//! nothing to settle. That rule lives here, not in the callers.

use iwpc_types::{IwpcError, IwpcResult};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

struct Pending<T> {
    settle: oneshot::Sender<IwpcResult<T>>,
    deadline: Instant,
}

/// Receiving side of a pending entry.
///
/// Resolves to [`IwpcError::Disposed`] if the table was cleared before the
/// entry settled.
pub struct Settlement<T> {
    receiver: oneshot::Receiver<IwpcResult<T>>,
}

impl<T> Settlement<T> {
    /// Wait for the entry to be resolved, rejected or abandoned.
    pub async fn wait(self) -> IwpcResult<T> {
        self.receiver.await.unwrap_or(Err(IwpcError::Disposed))
    }
}

/// Table of unsettled operations.
pub struct PendingTable<K, T> {
    entries: Mutex<HashMap<K, Pending<T>>>,
}

impl<K, T> PendingTable<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Send + 'static,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a new entry that expires `timeout` from now. Replaces (and
    /// thereby abandons) any entry already stored under `key`.
    pub fn insert(&self, key: K, timeout: Duration) -> Settlement<T> {
        let (settle, receiver) = oneshot::channel();
        let pending = Pending {
            settle,
            deadline: Instant::now() + timeout,
        };
        self.lock().insert(key, pending);
        Settlement { receiver }
    }

    /// Settle `key` successfully. Returns `false` if nothing was pending.
    pub fn resolve(&self, key: &K, value: T) -> bool {
        self.settle(key, Ok(value))
    }

    /// Settle `key` with an error. Returns `false` if nothing was pending.
    pub fn reject(&self, key: &K, error: IwpcError) -> bool {
        self.settle(key, Err(error))
    }

    fn settle(&self, key: &K, outcome: IwpcResult<T>) -> bool {
        match self.take(key) {
            Some(pending) => {
                // The waiter may have given up; the entry is gone either way.
                let _ = pending.settle.send(outcome);
                true
            }
            None => false,
        }
    }

    fn take(&self, key: &K) -> Option<Pending<T>> {
        self.lock().remove(key)
    }

    /// Arm the deadline recorded for `key` by [`insert`](Self::insert).
    /// When it passes and the entry is still pending, `on_expire` builds the
    /// rejection. It is not called if the entry settled first, or was
    /// replaced by one with a later deadline.
    pub fn arm_deadline<F>(self: &Arc<Self>, key: K, on_expire: F)
    where
        F: FnOnce() -> IwpcError + Send + 'static,
    {
        let Some(deadline) = self.deadline(&key) else {
            return;
        };
        let table = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(table) = table.upgrade() else {
                return;
            };
            if let Some(pending) = table.take_due(&key) {
                let _ = pending.settle.send(Err(on_expire()));
            }
        });
    }

    fn take_due(&self, key: &K) -> Option<Pending<T>> {
        let mut entries = self.lock();
        let due = entries
            .get(key)
            .is_some_and(|pending| pending.deadline <= Instant::now());
        if due {
            entries.remove(key)
        } else {
            None
        }
    }

    /// Whether `key` is still waiting to settle.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// When `key` expires, if it is still pending.
    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.lock().get(key).map(|p| p.deadline)
    }

    /// Number of unsettled entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry without settling it. Waiters observe
    /// [`IwpcError::Disposed`]. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<Pending<T>> = self.lock().drain().map(|(_, p)| p).collect();
        drained.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Pending<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K, T> Default for PendingTable<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
