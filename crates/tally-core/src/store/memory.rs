//! In-memory storage engines backed by `DashMap`
//!
//! Reinforcement goes through the map's entry API, which holds the shard lock
//! for the read-modify-write of one key. Different keys on different shards
//! proceed in parallel. Learning from a source additionally holds the source
//! set's lock, so one source teaches a category exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CategoryDirectory, PatternStore, TransactionStore};
use crate::error::{Error, Result};
use crate::models::{
    Category, CategoryId, ClassificationStats, Pattern, PatternSeed, StoredTransaction,
    TransactionRecord,
};
use crate::patterns::{confidence, select_by_similarity, select_containing, select_exact};

/// Pattern store held entirely in memory
#[derive(Default)]
pub struct MemoryPatternStore {
    patterns: DashMap<(String, CategoryId), Pattern>,
    /// (source, category) pairs that have already been learned
    sources: Mutex<HashSet<(String, CategoryId)>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn all(&self) -> Vec<Pattern> {
        self.patterns.iter().map(|r| r.value().clone()).collect()
    }

    fn bump(&self, pattern: &str, category_id: CategoryId) -> Pattern {
        let now = Utc::now();
        let entry = self
            .patterns
            .entry((pattern.to_string(), category_id))
            .and_modify(|p| {
                p.frequency += 1;
                p.confidence = confidence(p.frequency, &p.pattern);
                p.last_updated = now;
            })
            .or_insert_with(|| Pattern {
                pattern: pattern.to_string(),
                category_id,
                confidence: confidence(1, pattern),
                frequency: 1,
                last_updated: now,
            });
        entry.value().clone()
    }

    fn sources(&self) -> Result<std::sync::MutexGuard<'_, HashSet<(String, CategoryId)>>> {
        self.sources
            .lock()
            .map_err(|_| Error::StoreUnavailable("pattern source lock poisoned".to_string()))
    }
}

#[async_trait]
impl PatternStore for MemoryPatternStore {
    async fn find_exact(&self, text: &str) -> Result<Option<Pattern>> {
        let matching: Vec<Pattern> = self
            .patterns
            .iter()
            .filter(|r| r.key().0 == text)
            .map(|r| r.value().clone())
            .collect();
        Ok(select_exact(&matching, text))
    }

    async fn find_containing(&self, text: &str) -> Result<Option<Pattern>> {
        Ok(select_containing(&self.all(), text))
    }

    async fn find_by_similarity(
        &self,
        text: &str,
        min_similarity: f64,
    ) -> Result<Option<(Pattern, f64)>> {
        Ok(select_by_similarity(&self.all(), text, min_similarity))
    }

    async fn reinforce(&self, pattern: &str, category_id: CategoryId) -> Result<Pattern> {
        Ok(self.bump(pattern, category_id))
    }

    async fn learn(
        &self,
        source: &str,
        patterns: &[String],
        category_id: CategoryId,
    ) -> Result<Option<Vec<Pattern>>> {
        let mut sources = self.sources()?;
        if !sources.insert((source.to_string(), category_id)) {
            return Ok(None);
        }
        Ok(Some(
            patterns.iter().map(|p| self.bump(p, category_id)).collect(),
        ))
    }

    async fn bulk_load(&self, seeds: &[PatternSeed]) -> Result<usize> {
        let now = Utc::now();
        let mut inserted = 0;
        for seed in seeds {
            if let Entry::Vacant(slot) = self
                .patterns
                .entry((seed.pattern.clone(), seed.category_id))
            {
                let frequency = seed.frequency.max(1);
                slot.insert(Pattern {
                    pattern: seed.pattern.clone(),
                    category_id: seed.category_id,
                    confidence: confidence(frequency, &seed.pattern),
                    frequency,
                    last_updated: now,
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn reset(&self) -> Result<usize> {
        let mut sources = self.sources()?;
        let removed = self.patterns.len();
        self.patterns.clear();
        sources.clear();
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.patterns.len())
    }

    async fn snapshot(&self) -> Result<Vec<Pattern>> {
        let mut all = self.all();
        all.sort_by(|a, b| {
            a.pattern
                .cmp(&b.pattern)
                .then_with(|| a.category_id.cmp(&b.category_id))
        });
        Ok(all)
    }
}

/// Transaction store held entirely in memory
pub struct MemoryTransactionStore {
    rows: DashMap<i64, StoredTransaction>,
    /// (identity hash, period scope) -> row id
    identities: DashMap<(String, String), i64>,
    next_id: AtomicI64,
}

impl Default for MemoryTransactionStore {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            identities: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_where(&self, pred: impl Fn(&StoredTransaction) -> bool) -> Vec<StoredTransaction> {
        let mut rows: Vec<StoredTransaction> = self
            .rows
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        rows
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn find_by_identity_hash(
        &self,
        identity_hash: &str,
        period_scope: &str,
    ) -> Result<Option<StoredTransaction>> {
        let key = (identity_hash.to_string(), period_scope.to_string());
        let Some(id) = self.identities.get(&key).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn insert(&self, record: &TransactionRecord) -> Result<i64> {
        let key = (record.identity_hash.clone(), record.period_scope.clone());
        match self.identities.entry(key) {
            Entry::Occupied(_) => Err(Error::DuplicateIdentity(record.identity_hash.clone())),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.rows.insert(
                    id,
                    StoredTransaction {
                        id,
                        date: record.date,
                        description: record.description.clone(),
                        amount: record.amount,
                        card_type: record.card_type.clone(),
                        period_scope: record.period_scope.clone(),
                        identity_hash: record.identity_hash.clone(),
                        category_id: record.category_id,
                        updated_at: Utc::now(),
                    },
                );
                slot.insert(id);
                Ok(id)
            }
        }
    }

    async fn update(&self, id: i64, record: &TransactionRecord) -> Result<()> {
        let mut row = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))?;
        row.date = record.date;
        row.description = record.description.clone();
        row.amount = record.amount;
        row.card_type = record.card_type.clone();
        row.category_id = record.category_id;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn list_uncategorized(&self) -> Result<Vec<StoredTransaction>> {
        Ok(self.sorted_where(|t| t.category_id.is_none()))
    }

    async fn list_by_period(&self, period_scope: &str) -> Result<Vec<StoredTransaction>> {
        Ok(self.sorted_where(|t| t.period_scope == period_scope))
    }

    async fn stats(&self) -> Result<ClassificationStats> {
        let total_count = self.rows.len() as i64;
        let classified_count = self
            .rows
            .iter()
            .filter(|r| r.value().category_id.is_some())
            .count() as i64;
        Ok(ClassificationStats {
            total_count,
            classified_count,
            unclassified_count: total_count - classified_count,
        })
    }
}

/// Fixed category list held in memory
#[derive(Default)]
pub struct MemoryCategoryDirectory {
    categories: RwLock<Vec<Category>>,
}

impl MemoryCategoryDirectory {
    pub fn new(categories: Vec<Category>) -> Self {
        Self {
            categories: RwLock::new(categories),
        }
    }

    pub fn add(&self, id: CategoryId, name: &str) -> Result<()> {
        let mut categories = self
            .categories
            .write()
            .map_err(|_| Error::StoreUnavailable("category lock poisoned".to_string()))?;
        categories.retain(|c| c.id != id);
        categories.push(Category {
            id,
            name: name.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl CategoryDirectory for MemoryCategoryDirectory {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = self
            .categories
            .read()
            .map_err(|_| Error::StoreUnavailable("category lock poisoned".to_string()))?;
        let mut list = categories.clone();
        list.sort_by_key(|c| c.id);
        Ok(list)
    }

    async fn category_exists(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        Ok(self
            .list_categories()
            .await?
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn test_reinforce_creates_then_increments() {
        let store = MemoryPatternStore::new();

        let first = store.reinforce("supermercado lider", 4).await.unwrap();
        assert_eq!(first.frequency, 1);
        assert!((first.confidence - confidence(1, "supermercado lider")).abs() < 1e-12);

        let second = store.reinforce("supermercado lider", 4).await.unwrap();
        assert_eq!(second.frequency, 2);
        assert!(second.confidence > first.confidence);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_pattern_different_categories() {
        let store = MemoryPatternStore::new();
        store.reinforce("copec", 1).await.unwrap();
        store.reinforce("copec", 2).await.unwrap();
        store.reinforce("copec", 2).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let best = store.find_exact("copec").await.unwrap().unwrap();
        assert_eq!(best.category_id, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reinforce_same_key() {
        let store = Arc::new(MemoryPatternStore::new());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.reinforce("uber", 9).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let p = store.find_exact("uber").await.unwrap().unwrap();
        assert_eq!(p.frequency, 50);
        assert!((p.confidence - confidence(50, "uber")).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_learn_once_per_source_and_category() {
        let store = MemoryPatternStore::new();
        let patterns = vec!["jumbo costanera".to_string(), "jumbo".to_string()];

        let learned = store.learn("tx-1", &patterns, 2).await.unwrap().unwrap();
        assert_eq!(learned.len(), 2);
        assert!(store.learn("tx-1", &patterns, 2).await.unwrap().is_none());

        // another category or another source still teaches
        assert!(store.learn("tx-1", &patterns, 5).await.unwrap().is_some());
        assert!(store.learn("tx-2", &patterns, 2).await.unwrap().is_some());

        let jumbo = store.find_exact("jumbo").await.unwrap().unwrap();
        assert_eq!(jumbo.frequency, 2);
        assert_eq!(jumbo.category_id, 2);

        // reset forgets the sources along with the patterns
        store.reset().await.unwrap();
        assert!(store.learn("tx-1", &patterns, 2).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_learn_from_one_source() {
        let store = Arc::new(MemoryPatternStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .learn("tx-1", &["uber".to_string()], 9)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut taught = 0;
        for h in handles {
            if h.await.unwrap() {
                taught += 1;
            }
        }

        assert_eq!(taught, 1);
        assert_eq!(store.find_exact("uber").await.unwrap().unwrap().frequency, 1);
    }

    #[tokio::test]
    async fn test_bulk_load_does_not_overwrite() {
        let store = MemoryPatternStore::new();
        for _ in 0..3 {
            store.reinforce("jumbo", 2).await.unwrap();
        }

        let seeds = vec![
            PatternSeed {
                pattern: "jumbo".to_string(),
                category_id: 2,
                frequency: 1,
            },
            PatternSeed {
                pattern: "copec".to_string(),
                category_id: 3,
                frequency: 4,
            },
        ];
        assert_eq!(store.bulk_load(&seeds).await.unwrap(), 1);
        // loading again inserts nothing
        assert_eq!(store.bulk_load(&seeds).await.unwrap(), 0);

        let jumbo = store.find_exact("jumbo").await.unwrap().unwrap();
        assert_eq!(jumbo.frequency, 3);
        let copec = store.find_exact("copec").await.unwrap().unwrap();
        assert_eq!(copec.frequency, 4);
        assert!((copec.confidence - confidence(4, "copec")).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_reset_and_snapshot_order() {
        let store = MemoryPatternStore::new();
        store.reinforce("zeta", 1).await.unwrap();
        store.reinforce("alfa", 2).await.unwrap();
        store.reinforce("alfa", 1).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        let keys: Vec<(&str, i64)> = snapshot
            .iter()
            .map(|p| (p.pattern.as_str(), p.category_id))
            .collect();
        assert_eq!(keys, vec![("alfa", 1), ("alfa", 2), ("zeta", 1)]);

        assert_eq!(store.reset().await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    fn record(description: &str, category_id: Option<i64>) -> TransactionRecord {
        TransactionRecord {
            date: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            description: description.to_string(),
            amount: -12.5,
            card_type: None,
            period_scope: "2024-03".to_string(),
            identity_hash: format!("hash-{}", description),
            category_id,
        }
    }

    #[tokio::test]
    async fn test_transaction_insert_rejects_duplicate_identity() {
        let store = MemoryTransactionStore::new();
        let id = store.insert(&record("lider", None)).await.unwrap();

        let err = store.insert(&record("lider", Some(1))).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity(_)));

        store.update(id, &record("lider", Some(1))).await.unwrap();
        let row = store
            .find_by_identity_hash("hash-lider", "2024-03")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.category_id, Some(1));
        assert!(store
            .find_by_identity_hash("hash-lider", "2024-04")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_transaction_lists_and_stats() {
        let store = MemoryTransactionStore::new();
        store.insert(&record("a", None)).await.unwrap();
        store.insert(&record("b", Some(3))).await.unwrap();
        store.insert(&record("c", None)).await.unwrap();

        assert_eq!(store.list_uncategorized().await.unwrap().len(), 2);
        assert_eq!(store.list_by_period("2024-03").await.unwrap().len(), 3);
        assert!(store.list_by_period("2024-04").await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.classified_count, 1);
        assert_eq!(stats.unclassified_count, 2);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let store = MemoryTransactionStore::new();
        let err = store.update(42, &record("x", None)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_category_directory() {
        let dir = MemoryCategoryDirectory::new(vec![Category {
            id: 2,
            name: "Groceries".to_string(),
        }]);
        dir.add(1, "Transport").unwrap();

        assert!(dir.category_exists("groceries").await.unwrap());
        assert!(dir.category_exists(" TRANSPORT ").await.unwrap());
        assert!(!dir.category_exists("Dining").await.unwrap());

        let ids: Vec<i64> = dir.list_categories().await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
