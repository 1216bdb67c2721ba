//! Interactive review loop
//!
//! Each suggested transaction becomes a [`ReviewCandidate`] in the PENDING
//! state. The user accepts it (optionally into a different category) or
//! rejects it; either decision is terminal.
//!
//! Accepting teaches the pattern store and then persists the transaction with
//! its category. The store learns from a transaction at most once per
//! category: the claim on (transaction, category) and the reinforcements are a
//! single store operation, so replayed or concurrent accepts never count twice
//! and an accept that failed half way can be retried. Rejecting persists the
//! transaction uncategorized and teaches nothing.

use std::sync::Arc;

use tracing::{debug, info};

use crate::classifier::Classifier;
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::ingest::IngestionGate;
use crate::models::{CandidateState, CategoryId, Pattern, ReviewCandidate, TransactionCandidate};
use crate::patterns::extract_patterns;
use crate::store::PatternStore;

pub struct ReviewLoop {
    classifier: Arc<Classifier>,
    patterns: Arc<dyn PatternStore>,
    gate: Arc<IngestionGate>,
    extraction: ExtractionConfig,
}

impl ReviewLoop {
    pub fn new(
        classifier: Arc<Classifier>,
        patterns: Arc<dyn PatternStore>,
        gate: Arc<IngestionGate>,
        extraction: ExtractionConfig,
    ) -> Self {
        Self {
            classifier,
            patterns,
            gate,
            extraction,
        }
    }

    /// Build a pending candidate for `transaction`
    ///
    /// Returns `None` when the stored row is already categorized or nothing
    /// matched.
    pub async fn candidate_for(
        &self,
        transaction: &TransactionCandidate,
    ) -> Result<Option<ReviewCandidate>> {
        if let Some(row) = self.gate.existing(transaction).await? {
            if row.category_id.is_some() {
                return Ok(None);
            }
        }

        let suggestion = self.classifier.suggest(&transaction.description).await?;
        if suggestion.is_none() {
            return Ok(None);
        }
        Ok(Some(ReviewCandidate::new(transaction.clone(), suggestion)))
    }

    /// Accept `candidate` into `category_id`
    ///
    /// Returns the patterns that were reinforced (empty when this transaction
    /// already taught this category). The candidate stays PENDING on error.
    pub async fn accept(
        &self,
        candidate: &mut ReviewCandidate,
        category_id: CategoryId,
    ) -> Result<Vec<Pattern>> {
        if candidate.state == CandidateState::Accepted {
            return Ok(Vec::new());
        }
        if candidate.state.is_terminal() {
            return Err(already_decided(candidate));
        }

        let transaction = &candidate.transaction;
        let normalized = self.classifier.normalizer().normalize(&transaction.description);
        let extracted = extract_patterns(&normalized, &self.extraction);

        let learned = self
            .patterns
            .learn(&learning_source(transaction), &extracted, category_id)
            .await?;
        self.gate.ingest(transaction, Some(category_id)).await?;

        let reinforced = match learned {
            Some(reinforced) => {
                info!(
                    "Learned {} patterns from '{}' for category {}",
                    reinforced.len(),
                    normalized,
                    category_id
                );
                reinforced
            }
            None => {
                debug!(
                    "Transaction {} already taught category {}, not reinforcing",
                    candidate.identity_hash(),
                    category_id
                );
                Vec::new()
            }
        };

        candidate.state = CandidateState::Accepted;
        Ok(reinforced)
    }

    /// Reject `candidate`: persist it uncategorized, learn nothing
    pub async fn reject(&self, candidate: &mut ReviewCandidate) -> Result<()> {
        if candidate.state == CandidateState::Rejected {
            return Ok(());
        }
        if candidate.state.is_terminal() {
            return Err(already_decided(candidate));
        }

        self.gate.ingest(&candidate.transaction, None).await?;
        debug!("Rejected suggestion for {}", candidate.identity_hash());

        candidate.state = CandidateState::Rejected;
        Ok(())
    }
}

/// Learning source for a transaction: its dedup identity
fn learning_source(transaction: &TransactionCandidate) -> String {
    format!("{}@{}", transaction.identity_hash(), transaction.period_scope())
}

fn already_decided(candidate: &ReviewCandidate) -> Error {
    Error::AlreadyDecided {
        identity_hash: candidate.identity_hash(),
        state: candidate.state,
    }
}
