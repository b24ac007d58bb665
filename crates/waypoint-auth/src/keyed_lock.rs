//! Per-key async locks.
//!
//! Gives single-flight semantics without a global lock: callers for the same
//! key queue on one `tokio::sync::Mutex`, callers for other keys never wait.
//! Entries are removed when the last holder or waiter lets go.
//!
//! A dropped (cancelled) holder releases the lock and the next waiter takes
//! over. A dropped waiter gives up its place and removes the entry if it was
//! the last one interested in the key.

use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created per-key mutexes.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock on `key`.
    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let mutex = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = Waiter {
            acquire: Some(Box::pin(mutex.lock_owned())),
            locks: &self.locks,
            key,
        }
        .await;
        KeyedGuard {
            guard: Some(guard),
            locks: &self.locks,
            key: key.clone(),
        }
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` if no key is held or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

type Acquire = Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>;

/// Pending acquisition. Cleans up the entry if dropped before completing.
struct Waiter<'a, K: Eq + Hash + Clone> {
    acquire: Option<Acquire>,
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: &'a K,
}

impl<K: Eq + Hash + Clone> Future for Waiter<'_, K> {
    type Output = OwnedMutexGuard<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(acquire) = self.acquire.as_mut() else {
            return Poll::Pending;
        };
        let guard = ready!(acquire.as_mut().poll(cx));
        self.acquire = None;
        Poll::Ready(guard)
    }
}

impl<K: Eq + Hash + Clone> Drop for Waiter<'_, K> {
    fn drop(&mut self) {
        // drop the pending acquisition first so its reference is gone
        if self.acquire.take().is_some() {
            self.locks
                .remove_if(self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

/// Held lock for one key. Releases on drop.
#[derive(Debug)]
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        // the map's own reference is the last one when nobody is waiting
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
