//! Engine facade
//!
//! [`ClassificationEngine`] owns one instance of every service and wires them
//! to a set of stores. Construct it once and share it behind an `Arc`.

use std::io::Write;
use std::sync::Arc;

use tracing::info;

use crate::cache::EngineCache;
use crate::classifier::Classifier;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::Result;
use crate::history::{HistorySeeder, SeedReport};
use crate::ingest::{IngestOutcome, IngestionGate};
use crate::models::{
    Category, CategoryId, ClassificationStats, ClassificationSuggestion, HistoricalRecord,
    Pattern, ReviewCandidate, StoredTransaction, TransactionCandidate,
};
use crate::normalize::Normalizer;
use crate::preload::Preloader;
use crate::review::ReviewLoop;
use crate::store::{
    CategoryDirectory, MemoryCategoryDirectory, MemoryPatternStore, MemoryTransactionStore,
    PatternStore, TransactionStore,
};

pub struct ClassificationEngine {
    config: EngineConfig,
    patterns: Arc<dyn PatternStore>,
    cache: Arc<EngineCache>,
    gate: Arc<IngestionGate>,
    classifier: Arc<Classifier>,
    review: ReviewLoop,
    preloader: Preloader,
    seeder: HistorySeeder,
}

impl ClassificationEngine {
    /// Build an engine over arbitrary store implementations
    pub fn with_stores(
        config: EngineConfig,
        patterns: Arc<dyn PatternStore>,
        transactions: Arc<dyn TransactionStore>,
        categories: Arc<dyn CategoryDirectory>,
    ) -> Result<Self> {
        config.validate()?;

        let normalizer = Arc::new(Normalizer::new(&config.normalizer)?);
        let cache = Arc::new(EngineCache::new(
            config.cache_ttl,
            transactions.clone(),
            categories.clone(),
        ));
        let gate = Arc::new(IngestionGate::new(transactions, cache.clone()));
        let classifier = Arc::new(Classifier::new(
            normalizer.clone(),
            patterns.clone(),
            config.classifier.clone(),
        ));
        let review = ReviewLoop::new(
            classifier.clone(),
            patterns.clone(),
            gate.clone(),
            config.extraction.clone(),
        );
        let preloader = Preloader::new(classifier.clone(), cache.clone(), config.preload_batch_size);
        let seeder = HistorySeeder::new(
            normalizer,
            patterns.clone(),
            categories,
            config.extraction.clone(),
        );

        Ok(Self {
            config,
            patterns,
            cache,
            gate,
            classifier,
            review,
            preloader,
            seeder,
        })
    }

    /// Engine over in-memory stores with a fixed category list
    pub fn in_memory(config: EngineConfig, categories: Vec<Category>) -> Result<Self> {
        Self::with_stores(
            config,
            Arc::new(MemoryPatternStore::new()),
            Arc::new(MemoryTransactionStore::new()),
            Arc::new(MemoryCategoryDirectory::new(categories)),
        )
    }

    /// Engine persisting everything in one SQLite database
    pub fn sqlite(config: EngineConfig, db: Database) -> Result<Self> {
        info!("Using SQLite engine at {}", db.path());
        let db = Arc::new(db);
        Self::with_stores(config, db.clone(), db.clone(), db)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Normalized form of a raw description
    pub fn normalize(&self, raw: &str) -> String {
        self.classifier.normalizer().normalize(raw)
    }

    // Classification

    pub async fn suggest(&self, description: &str) -> Result<ClassificationSuggestion> {
        self.classifier.suggest(description).await
    }

    pub async fn suggest_batch<S: AsRef<str>>(
        &self,
        descriptions: &[S],
    ) -> Result<Vec<ClassificationSuggestion>> {
        self.classifier.suggest_batch(descriptions).await
    }

    // Review loop

    pub async fn candidate_for(
        &self,
        transaction: &TransactionCandidate,
    ) -> Result<Option<ReviewCandidate>> {
        self.review.candidate_for(transaction).await
    }

    /// Accept a candidate into `category_id` and learn from it
    pub async fn accept(
        &self,
        candidate: &mut ReviewCandidate,
        category_id: CategoryId,
    ) -> Result<Vec<Pattern>> {
        let learned = self.review.accept(candidate, category_id).await?;
        self.preloader.remove(&candidate.identity_hash());
        Ok(learned)
    }

    pub async fn reject(&self, candidate: &mut ReviewCandidate) -> Result<()> {
        self.review.reject(candidate).await?;
        self.preloader.remove(&candidate.identity_hash());
        Ok(())
    }

    /// Persist an imported transaction uncategorized unless already stored
    pub async fn stage(&self, transaction: &TransactionCandidate) -> Result<IngestOutcome> {
        self.gate.stage(transaction).await
    }

    // Preloading

    pub fn pending_preloaded(&self) -> Arc<Vec<ReviewCandidate>> {
        self.preloader.pending()
    }

    /// Returns `false` when a preload is already running
    pub fn start_preloading(&self) -> bool {
        self.preloader.start()
    }

    pub async fn stop_preloading(&self) -> bool {
        self.preloader.stop().await
    }

    /// Wait for a running preload to publish
    pub async fn wait_for_preload(&self) -> Result<()> {
        self.preloader.wait().await
    }

    pub fn clear_preloaded(&self) {
        self.preloader.clear()
    }

    // Cached reads

    pub async fn classification_stats(&self) -> Result<ClassificationStats> {
        self.cache.stats().await
    }

    pub async fn categories(&self) -> Result<Arc<Vec<Category>>> {
        self.cache.categories().await
    }

    pub async fn uncategorized(&self) -> Result<Arc<Vec<StoredTransaction>>> {
        self.cache.uncategorized().await
    }

    /// Transactions of one period ("" for transactions without a period)
    pub async fn transactions_for_period(
        &self,
        period_id: &str,
    ) -> Result<Arc<Vec<StoredTransaction>>> {
        self.cache.period(period_id).await
    }

    /// Drop every cached read
    pub fn refresh(&self) {
        self.cache.invalidate_all()
    }

    // Pattern maintenance

    pub async fn seed_from_history<I>(&self, records: I) -> Result<SeedReport>
    where
        I: IntoIterator<Item = Result<HistoricalRecord>>,
    {
        self.seeder.seed(records).await
    }

    pub async fn seed_if_empty<I>(&self, records: I) -> Result<Option<SeedReport>>
    where
        I: IntoIterator<Item = Result<HistoricalRecord>>,
    {
        self.seeder.seed_if_empty(records).await
    }

    /// Forget every learned pattern; returns how many were removed
    pub async fn reset_patterns(&self) -> Result<usize> {
        let removed = self.patterns.reset().await?;
        info!("Reset {} learned patterns", removed);
        Ok(removed)
    }

    pub async fn patterns(&self) -> Result<Vec<Pattern>> {
        self.patterns.snapshot().await
    }

    /// Write every learned pattern as pretty JSON (for diagnostics)
    pub async fn dump_patterns<W: Write>(&self, writer: W) -> Result<usize> {
        let snapshot = self.patterns.snapshot().await?;
        serde_json::to_writer_pretty(writer, &snapshot)?;
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::history::read_history_csv;
    use crate::models::MatchTier;

    fn categories() -> Vec<Category> {
        vec![
            Category {
                id: 1,
                name: "Groceries".to_string(),
            },
            Category {
                id: 2,
                name: "Transport".to_string(),
            },
        ]
    }

    fn engine() -> ClassificationEngine {
        ClassificationEngine::in_memory(EngineConfig::embedded().unwrap(), categories()).unwrap()
    }

    fn transaction(day: u32, description: &str) -> TransactionCandidate {
        TransactionCandidate::new(
            Utc.with_ymd_and_hms(2024, 8, day, 18, 0, 0).unwrap(),
            description,
            -7000.0,
        )
        .with_period("2024-08")
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.preload_batch_size = 0;
        assert!(ClassificationEngine::in_memory(config, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_accept_removes_from_preloaded_batch() {
        let engine = engine();
        engine
            .seed_from_history(read_history_csv(
                "description,category\nJUMBO,Groceries\nUBER TRIP,Transport\n".as_bytes(),
            ))
            .await
            .unwrap();

        engine.stage(&transaction(1, "JUMBO")).await.unwrap();
        engine.stage(&transaction(2, "UBER TRIP")).await.unwrap();

        assert!(engine.start_preloading());
        engine.wait_for_preload().await.unwrap();
        let batch = engine.pending_preloaded();
        assert_eq!(batch.len(), 2);

        let mut first = batch[0].clone();
        engine.accept(&mut first, 1).await.unwrap();
        let remaining = engine.pending_preloaded();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].transaction.description, "UBER TRIP");

        let mut second = remaining[0].clone();
        engine.reject(&mut second).await.unwrap();
        assert!(engine.pending_preloaded().is_empty());

        let stats = engine.classification_stats().await.unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.classified_count, 1);
    }

    #[tokio::test]
    async fn test_cached_reads_follow_writes() {
        let engine = engine();
        assert_eq!(engine.categories().await.unwrap().len(), 2);
        assert!(engine.transactions_for_period("2024-08").await.unwrap().is_empty());

        engine.stage(&transaction(3, "COPEC")).await.unwrap();
        assert_eq!(engine.transactions_for_period("2024-08").await.unwrap().len(), 1);
        assert_eq!(engine.uncategorized().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_patterns() {
        let engine = engine();
        let tx = transaction(4, "LIDER EXPRESS");
        let suggestion = engine.suggest(&tx.description).await.unwrap();
        let mut candidate = ReviewCandidate::new(tx, suggestion);
        engine.accept(&mut candidate, 1).await.unwrap();

        assert_eq!(
            engine.suggest("Hiper Lider").await.unwrap().tier,
            MatchTier::Exact
        );
        let mut dump = Vec::new();
        assert_eq!(engine.dump_patterns(&mut dump).await.unwrap(), 1);
        let parsed: Vec<Pattern> = serde_json::from_slice(&dump).unwrap();
        assert_eq!(parsed[0].pattern, "lider");
        assert_eq!(parsed[0].category_id, 1);

        assert!(engine.reset_patterns().await.unwrap() > 0);
        assert!(engine.patterns().await.unwrap().is_empty());
        assert!(engine.suggest("Hiper Lider").await.unwrap().is_none());
    }
}
