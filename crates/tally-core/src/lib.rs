//! Tally Core Library
//!
//! Transaction classification engine for a personal budgeting tool:
//! - Description normalization (accents, punctuation, stop words, merchant synonyms)
//! - Tiered classifier over learned patterns (exact, partial, fuzzy)
//! - Interactive accept/reject loop that reinforces patterns
//! - Upsert-not-duplicate ingestion keyed by identity hash
//! - Read-through TTL cache for aggregate reads
//! - Background preloading of suggestions
//! - Seeding from historical categorizations
//! - In-memory and SQLite storage engines

pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod history;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod patterns;
pub mod preload;
pub mod review;
pub mod similarity;
pub mod store;

pub use cache::{CacheKey, EngineCache, TtlCache};
pub use classifier::Classifier;
pub use config::{ClassifierConfig, EngineConfig, ExtractionConfig, NormalizerConfig};
pub use db::Database;
pub use engine::ClassificationEngine;
pub use error::{Error, Result};
pub use history::{read_history_csv, HistorySeeder, SeedReport};
pub use ingest::{identity_hash, IngestOutcome, IngestionGate};
pub use models::*;
pub use normalize::Normalizer;
pub use preload::Preloader;
pub use review::ReviewLoop;
pub use similarity::{edit_similarity, token_overlap_similarity};
pub use store::{CategoryDirectory, PatternStore, TransactionStore};
