//! Ingestion gate: identity hashing and upsert-not-duplicate persistence
//!
//! Every transaction reaches storage through [`IngestionGate`]. The gate looks
//! the transaction up by identity hash inside its period scope; a hit becomes
//! an update, a miss an insert. Importing the same statement twice therefore
//! leaves exactly one row per transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::EngineCache;
use crate::error::{Error, Result};
use crate::models::{CategoryId, StoredTransaction, TransactionCandidate, TransactionRecord};
use crate::store::TransactionStore;

/// Stable dedup key: SHA-256 over `epoch_millis|amount|description`
///
/// Neither of the first two fields can contain the delimiter, so distinct
/// triples never share an input.
pub fn identity_hash(date: &DateTime<Utc>, amount: f64, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.timestamp_millis().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// What the gate did with a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// New row, contains its id
    Inserted(i64),
    /// Existing row overwritten
    Updated {
        id: i64,
        previous_category: Option<CategoryId>,
    },
    /// Row already present and left untouched (staging only)
    Existing(StoredTransaction),
}

impl IngestOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) => *id,
            Self::Updated { id, .. } => *id,
            Self::Existing(row) => row.id,
        }
    }
}

/// Dedup gate in front of the transaction store
pub struct IngestionGate {
    transactions: Arc<dyn TransactionStore>,
    cache: Arc<EngineCache>,
}

impl IngestionGate {
    pub fn new(transactions: Arc<dyn TransactionStore>, cache: Arc<EngineCache>) -> Self {
        Self {
            transactions,
            cache,
        }
    }

    /// Look up the persisted row for a candidate, if any
    pub async fn existing(&self, candidate: &TransactionCandidate) -> Result<Option<StoredTransaction>> {
        self.transactions
            .find_by_identity_hash(&candidate.identity_hash(), candidate.period_scope())
            .await
    }

    /// Persist `candidate` with exactly `category_id` (None clears it)
    pub async fn ingest(
        &self,
        candidate: &TransactionCandidate,
        category_id: Option<CategoryId>,
    ) -> Result<IngestOutcome> {
        let record = TransactionRecord::from_candidate(candidate, category_id);

        let outcome = match self.existing(candidate).await? {
            Some(row) => self.overwrite(row, &record).await?,
            None => match self.transactions.insert(&record).await {
                Ok(id) => {
                    debug!("Inserted transaction {} ({})", id, record.identity_hash);
                    IngestOutcome::Inserted(id)
                }
                Err(Error::DuplicateIdentity(hash)) => {
                    // Lost an insert race; the winner's row is there now
                    warn!("Concurrent insert for {}, degrading to update", hash);
                    let row = self.existing(candidate).await?.ok_or_else(|| {
                        Error::StoreUnavailable(format!(
                            "transaction {} reported duplicate but not found",
                            hash
                        ))
                    })?;
                    self.overwrite(row, &record).await?
                }
                Err(e) => return Err(e),
            },
        };

        self.cache.invalidate_transactions(&record.period_scope);
        Ok(outcome)
    }

    /// Insert `candidate` uncategorized unless it is already stored
    ///
    /// Used when queueing imported transactions for review; an existing row
    /// (and any category it carries) is left alone.
    pub async fn stage(&self, candidate: &TransactionCandidate) -> Result<IngestOutcome> {
        if let Some(row) = self.existing(candidate).await? {
            return Ok(IngestOutcome::Existing(row));
        }

        let record = TransactionRecord::from_candidate(candidate, None);
        let outcome = match self.transactions.insert(&record).await {
            Ok(id) => IngestOutcome::Inserted(id),
            Err(Error::DuplicateIdentity(hash)) => {
                let row = self.existing(candidate).await?.ok_or_else(|| {
                    Error::StoreUnavailable(format!(
                        "transaction {} reported duplicate but not found",
                        hash
                    ))
                })?;
                return Ok(IngestOutcome::Existing(row));
            }
            Err(e) => return Err(e),
        };

        self.cache.invalidate_transactions(&record.period_scope);
        Ok(outcome)
    }

    async fn overwrite(&self, row: StoredTransaction, record: &TransactionRecord) -> Result<IngestOutcome> {
        self.transactions.update(row.id, record).await?;
        debug!(
            "Updated transaction {} category {:?} -> {:?}",
            row.id, row.category_id, record.category_id
        );
        Ok(IngestOutcome::Updated {
            id: row.id,
            previous_category: row.category_id,
        })
    }
}
