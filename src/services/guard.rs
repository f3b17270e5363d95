//! Single-generation guard
//!
//! At most one generation turn per key. Acquisition is an atomic
//! check-and-set; release happens when the returned guard is dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

struct ActiveTurn {
    turn: u64,
    cancel: Arc<Notify>,
}

struct Inner<K> {
    active: Mutex<HashMap<K, ActiveTurn>>,
    next_turn: AtomicU64,
}

impl<K> Inner<K> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, ActiveTurn>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of keys with a generation in flight
pub struct SessionGuards<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for SessionGuards<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Hash + Eq + Clone> Default for SessionGuards<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> SessionGuards<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                active: Mutex::new(HashMap::new()),
                next_turn: AtomicU64::new(1),
            }),
        }
    }

    /// Mark `key` as generating; `None` if a turn is already in flight
    pub fn try_acquire(&self, key: K) -> Option<GenerationGuard<K>> {
        let mut active = self.inner.lock();
        if active.contains_key(&key) {
            return None;
        }

        let turn = self.inner.next_turn.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(Notify::new());
        active.insert(
            key.clone(),
            ActiveTurn {
                turn,
                cancel: Arc::clone(&cancel),
            },
        );
        debug!("Generation turn {} acquired", turn);

        Some(GenerationGuard {
            inner: Arc::clone(&self.inner),
            key,
            turn,
            cancel,
        })
    }

    /// Release `key` without waiting for its turn to end
    ///
    /// The running turn observes this through [`GenerationGuard::cancelled`]
    /// and [`GenerationGuard::is_current`]. Returns whether a turn was in flight.
    pub fn cancel(&self, key: &K) -> bool {
        match self.inner.lock().remove(key) {
            Some(active) => {
                debug!("Generation turn {} cancelled", active.turn);
                active.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_generating(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }
}

/// Scoped ownership of one generation turn
pub struct GenerationGuard<K: Hash + Eq> {
    inner: Arc<Inner<K>>,
    key: K,
    turn: u64,
    cancel: Arc<Notify>,
}

impl<K: Hash + Eq> GenerationGuard<K> {
    /// False once the turn was cancelled
    pub fn is_current(&self) -> bool {
        self.inner
            .lock()
            .get(&self.key)
            .map_or(false, |active| active.turn == self.turn)
    }

    /// Resolves when the turn is cancelled
    pub async fn cancelled(&self) {
        self.cancel.notified().await
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Hash + Eq> Drop for GenerationGuard<K> {
    fn drop(&mut self) {
        let mut active = self.inner.lock();
        // A cancelled turn must not release a newer turn on the same key
        if active.get(&self.key).map_or(false, |a| a.turn == self.turn) {
            active.remove(&self.key);
            debug!("Generation turn {} released", self.turn);
        }
    }
}
