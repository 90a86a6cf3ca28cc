//! Per-key coalescing of delayed writes.
//!
//! Scheduling a key that already has a timer replaces the timer. Tasks
//! receive no captured value: they read current state when they fire.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Pending {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Debounce timers keyed by `K`.
#[derive(Debug)]
pub struct DebounceScheduler<K: Eq + Hash> {
    pending: Arc<DashMap<K, Pending>>,
    next_generation: AtomicU64,
}

impl<K> DebounceScheduler<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Run `task` after `delay` unless `key` is scheduled or cancelled again first.
    pub fn schedule<F, Fut>(&self, key: K, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Register before spawning so a zero delay cannot fire unclaimed.
        let previous = self.pending.insert(
            key.clone(),
            Pending {
                generation,
                handle: None,
            },
        );
        if let Some(Pending {
            handle: Some(handle),
            ..
        }) = previous
        {
            handle.abort();
        }

        let pending = Arc::clone(&self.pending);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = pending
                .remove_if(&task_key, |_, p| p.generation == generation)
                .is_some();
            if claimed {
                task().await;
            }
        });

        if let Some(mut entry) = self.pending.get_mut(&key) {
            if entry.generation == generation {
                entry.handle = Some(handle);
            }
        }
    }

    /// Cancel the timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                if let Some(handle) = pending.handle {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<K> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl<K> Default for DebounceScheduler<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for DebounceScheduler<K> {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            if let Some(handle) = &entry.handle {
                handle.abort();
            }
        }
    }
}
