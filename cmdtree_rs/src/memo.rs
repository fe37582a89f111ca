//! Keyed single-flight memoization.
//!
//! Concurrent callers asking for the same key await one shared in-flight
//! computation. A successful result is memoized; a failed one is dropped on
//! settle so the next caller retries.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

pub struct SingleFlight<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn cells(&self) -> MutexGuard<'_, HashMap<K, Arc<OnceCell<V>>>> {
        // Only map bookkeeping happens under the lock, a poisoned map is still consistent.
        self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the memoized value for `key`, running `init` at most once
    /// across concurrent callers.
    pub async fn get_or_try_init<E, F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cells().entry(key.clone()).or_default().clone();
        let result = cell.get_or_try_init(init).await.cloned();

        if result.is_err() && !cell.initialized() {
            let mut cells = self.cells();
            if cells
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell) && !current.initialized())
            {
                cells.remove(&key);
            }
        }

        result
    }

    /// Number of keys with a settled value.
    pub fn len(&self) -> usize {
        self.cells().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
