//! Storage interfaces consumed by the engine
//!
//! The engine never talks to a database directly. Patterns, transactions and
//! categories sit behind these traits so the concrete engine is swappable:
//! - [`memory`] - in-process maps, used by tests and ephemeral embedders
//! - [`crate::db::Database`] - SQLite with connection pooling
//!
//! Every method is a suspension point. Implementations must leave the store
//! consistent if the calling future is dropped mid-call.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Category, CategoryId, ClassificationStats, Pattern, PatternSeed, StoredTransaction,
    TransactionRecord,
};

pub use memory::{MemoryCategoryDirectory, MemoryPatternStore, MemoryTransactionStore};

/// Learned (pattern, category) associations
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Pattern whose text equals `text` exactly
    async fn find_exact(&self, text: &str) -> Result<Option<Pattern>>;

    /// Most specific pattern where either string contains the other
    async fn find_containing(&self, text: &str) -> Result<Option<Pattern>>;

    /// Highest edit-similarity pattern at or above `min_similarity`, with its score
    async fn find_by_similarity(
        &self,
        text: &str,
        min_similarity: f64,
    ) -> Result<Option<(Pattern, f64)>>;

    /// Confirm `pattern` for `category_id`: bump frequency or create it
    ///
    /// Atomic per (pattern, category) key.
    async fn reinforce(&self, pattern: &str, category_id: CategoryId) -> Result<Pattern>;

    /// Reinforce `patterns` for `category_id` once per `source`
    ///
    /// `source` names what taught the patterns (an accepted transaction).
    /// Returns `None` and changes nothing when `source` already taught
    /// `category_id`. Recording the source and reinforcing every pattern happen
    /// together or not at all, so a failed call can simply be retried.
    async fn learn(
        &self,
        source: &str,
        patterns: &[String],
        category_id: CategoryId,
    ) -> Result<Option<Vec<Pattern>>>;

    /// Insert seeds whose key does not exist yet; returns rows inserted
    async fn bulk_load(&self, seeds: &[PatternSeed]) -> Result<usize>;

    /// Delete every pattern and forget every learning source; returns patterns removed
    async fn reset(&self) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    /// All patterns ordered by (pattern, category_id)
    async fn snapshot(&self) -> Result<Vec<Pattern>>;
}

/// Persisted transactions, keyed for dedup by (identity hash, period scope)
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_by_identity_hash(
        &self,
        identity_hash: &str,
        period_scope: &str,
    ) -> Result<Option<StoredTransaction>>;

    /// Insert a new row
    ///
    /// Fails with [`crate::Error::DuplicateIdentity`] when a row with the same
    /// identity already exists in the period scope.
    async fn insert(&self, record: &TransactionRecord) -> Result<i64>;

    /// Overwrite every field of row `id`
    async fn update(&self, id: i64, record: &TransactionRecord) -> Result<()>;

    /// Rows without a category, oldest first
    async fn list_uncategorized(&self) -> Result<Vec<StoredTransaction>>;

    /// Rows in one period scope, oldest first
    async fn list_by_period(&self, period_scope: &str) -> Result<Vec<StoredTransaction>>;

    async fn stats(&self) -> Result<ClassificationStats>;
}

/// Categories owned by the surrounding system
#[async_trait]
pub trait CategoryDirectory: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Case-insensitive name lookup
    async fn category_exists(&self, name: &str) -> Result<bool>;
}
