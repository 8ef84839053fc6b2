//! Request coalescing
//!
//! Collapses duplicate near-simultaneous requests for the same resource. A
//! bounded map keyed by call signature holds the pending (or just completed)
//! shared result together with its creation instant. Entries older than the
//! TTL are ignored and purged; when the map is full the oldest entry is
//! evicted.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct Entry<V: Clone> {
    created: Instant,
    result: Shared<BoxFuture<'static, V>>,
}

/// Owned, size- and time-bounded memoization map
pub struct RequestCoalescer<K, V: Clone> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Return the live result for `key`, or run `make` and share its result
    pub async fn get_or_run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let result = {
            let mut entries = self.lock();
            let now = Instant::now();
            let ttl = self.ttl;
            entries.retain(|_, entry| now.duration_since(entry.created) < ttl);

            if let Some(entry) = entries.get(&key) {
                trace!(key = ?key, "Coalesced duplicate request");
                entry.result.clone()
            } else {
                if entries.len() >= self.max_entries {
                    let oldest = entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.created)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        entries.remove(&oldest);
                    }
                }

                let result = make().boxed().shared();
                entries.insert(
                    key,
                    Entry {
                        created: now,
                        result: result.clone(),
                    },
                );
                result
            }
        };

        result.await
    }

    /// Drop the entry for `key` so the next request runs again
    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
