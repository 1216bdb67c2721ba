//! Read-through TTL cache for aggregate reads
//!
//! [`TtlCache`] keeps one async-mutex slot per key. A lookup locks only its
//! own slot, so two concurrent misses on the same key run the loader once
//! while different keys load independently. Expired entries count as misses,
//! and idle slots that are expired or empty are dropped on the next lookup.
//!
//! [`EngineCache`] puts typed caches in front of the category list, the
//! uncategorized-transaction list, per-period transaction lists and the
//! classification stats.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::models::{Category, ClassificationStats, StoredTransaction};
use crate::store::{CategoryDirectory, TransactionStore};

/// A cached value and when it was loaded
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub timestamp: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed() < ttl
    }
}

type Slot<V> = Arc<tokio::sync::Mutex<Option<CacheEntry<V>>>>;

/// Generic read-through cache with a fixed time-to-live
pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    // The map only holds Arcs, so a panic while it was locked cannot leave it
    // half-updated.
    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the live value for `key`, or run `loader` and cache its result
    ///
    /// A failed load caches nothing.
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = {
            let mut slots = self.slots();
            let ttl = self.ttl;
            // only the map references an idle slot; clones are taken under this lock
            slots.retain(|_, slot| {
                Arc::strong_count(slot) > 1
                    || slot
                        .try_lock()
                        .map(|entry| entry.as_ref().is_some_and(|e| e.is_fresh(ttl)))
                        .unwrap_or(true)
            });
            slots.entry(key).or_default().clone()
        };

        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_ref() {
            if entry.is_fresh(self.ttl) {
                return Ok(entry.value.clone());
            }
        }

        let value = loader().await?;
        *guard = Some(CacheEntry::new(value.clone()));
        Ok(value)
    }

    /// Drop `key` so the next lookup reloads it
    pub fn invalidate(&self, key: &K) {
        self.slots().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.slots().clear();
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots().len()
    }
}

/// Logical resources cached by [`EngineCache`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Categories,
    Uncategorized,
    /// Transactions of one period scope
    Period(String),
    Stats,
}

/// Read-through cache over the engine's aggregate reads
pub struct EngineCache {
    transactions: Arc<dyn TransactionStore>,
    categories: Arc<dyn CategoryDirectory>,
    category_list: TtlCache<(), Arc<Vec<Category>>>,
    uncategorized: TtlCache<(), Arc<Vec<StoredTransaction>>>,
    periods: TtlCache<String, Arc<Vec<StoredTransaction>>>,
    stats: TtlCache<(), ClassificationStats>,
}

impl EngineCache {
    pub fn new(
        ttl: Duration,
        transactions: Arc<dyn TransactionStore>,
        categories: Arc<dyn CategoryDirectory>,
    ) -> Self {
        Self {
            transactions,
            categories,
            category_list: TtlCache::new(ttl),
            uncategorized: TtlCache::new(ttl),
            periods: TtlCache::new(ttl),
            stats: TtlCache::new(ttl),
        }
    }

    pub async fn categories(&self) -> Result<Arc<Vec<Category>>> {
        self.category_list
            .get_or_load((), || async {
                debug!("Loading category list");
                Ok(Arc::new(self.categories.list_categories().await?))
            })
            .await
    }

    pub async fn uncategorized(&self) -> Result<Arc<Vec<StoredTransaction>>> {
        self.uncategorized
            .get_or_load((), || async {
                debug!("Loading uncategorized transactions");
                Ok(Arc::new(self.transactions.list_uncategorized().await?))
            })
            .await
    }

    pub async fn period(&self, period_scope: &str) -> Result<Arc<Vec<StoredTransaction>>> {
        self.periods
            .get_or_load(period_scope.to_string(), || async {
                debug!("Loading transactions for period '{}'", period_scope);
                Ok(Arc::new(self.transactions.list_by_period(period_scope).await?))
            })
            .await
    }

    pub async fn stats(&self) -> Result<ClassificationStats> {
        self.stats
            .get_or_load((), || async {
                debug!("Loading classification stats");
                self.transactions.stats().await
            })
            .await
    }

    pub fn invalidate(&self, key: &CacheKey) {
        match key {
            CacheKey::Categories => self.category_list.invalidate(&()),
            CacheKey::Uncategorized => self.uncategorized.invalidate(&()),
            CacheKey::Period(p) => self.periods.invalidate(p),
            CacheKey::Stats => self.stats.invalidate(&()),
        }
    }

    pub fn invalidate_all(&self) {
        self.category_list.invalidate_all();
        self.uncategorized.invalidate_all();
        self.periods.invalidate_all();
        self.stats.invalidate_all();
    }

    /// Drop everything a transaction write in `period_scope` can change
    pub fn invalidate_transactions(&self, period_scope: &str) {
        self.invalidate(&CacheKey::Uncategorized);
        self.invalidate(&CacheKey::Stats);
        self.invalidate(&CacheKey::Period(period_scope.to_string()));
    }
}
