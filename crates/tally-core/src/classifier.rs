//! Tiered classifier
//!
//! Resolves a raw description to a category suggestion. Tiers are tried in
//! order and the first hit wins:
//! 1. Exact - normalized description equals a learned pattern (confidence 1.0)
//! 2. Partial - description and pattern contain one another (confidence 0.9)
//! 3. Fuzzy - edit similarity at or above the configured minimum (confidence = score)
//!
//! Anything below the acceptance floor is reported as no suggestion.

use std::sync::Arc;

use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::Result;
use crate::models::{ClassificationSuggestion, MatchTier};
use crate::normalize::Normalizer;
use crate::store::PatternStore;

const EXACT_CONFIDENCE: f64 = 1.0;
const PARTIAL_CONFIDENCE: f64 = 0.9;

pub struct Classifier {
    normalizer: Arc<Normalizer>,
    patterns: Arc<dyn PatternStore>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(
        normalizer: Arc<Normalizer>,
        patterns: Arc<dyn PatternStore>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            normalizer,
            patterns,
            config,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Suggest a category for a raw statement description
    pub async fn suggest(&self, raw: &str) -> Result<ClassificationSuggestion> {
        let normalized = self.normalizer.normalize(raw);
        if normalized.is_empty() {
            debug!("Nothing to classify in '{}'", raw);
            return Ok(ClassificationSuggestion::none());
        }

        let suggestion = self.match_tiers(&normalized).await?;
        if suggestion.is_none() || suggestion.confidence < self.config.acceptance_floor {
            debug!("No suggestion for '{}'", normalized);
            return Ok(ClassificationSuggestion::none());
        }

        debug!(
            "{} match for '{}': pattern '{}' -> category {:?} ({:.2})",
            suggestion.tier,
            normalized,
            suggestion.matched_pattern.as_deref().unwrap_or(""),
            suggestion.category_id,
            suggestion.confidence
        );
        Ok(suggestion)
    }

    /// Classify several descriptions, preserving input order
    pub async fn suggest_batch<S: AsRef<str>>(
        &self,
        descriptions: &[S],
    ) -> Result<Vec<ClassificationSuggestion>> {
        let mut suggestions = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            suggestions.push(self.suggest(description.as_ref()).await?);
        }
        Ok(suggestions)
    }

    async fn match_tiers(&self, normalized: &str) -> Result<ClassificationSuggestion> {
        if let Some(p) = self.patterns.find_exact(normalized).await? {
            return Ok(ClassificationSuggestion {
                category_id: Some(p.category_id),
                confidence: EXACT_CONFIDENCE,
                matched_pattern: Some(p.pattern),
                tier: MatchTier::Exact,
            });
        }

        if let Some(p) = self.patterns.find_containing(normalized).await? {
            return Ok(ClassificationSuggestion {
                category_id: Some(p.category_id),
                confidence: PARTIAL_CONFIDENCE,
                matched_pattern: Some(p.pattern),
                tier: MatchTier::Partial,
            });
        }

        if let Some((p, score)) = self
            .patterns
            .find_by_similarity(normalized, self.config.fuzzy_min_similarity)
            .await?
        {
            return Ok(ClassificationSuggestion {
                category_id: Some(p.category_id),
                confidence: score,
                matched_pattern: Some(p.pattern),
                tier: MatchTier::Fuzzy,
            });
        }

        Ok(ClassificationSuggestion::none())
    }
}
