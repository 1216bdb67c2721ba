//! Domain models for Tally

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::identity_hash;

/// Identifier of a category owned by the surrounding system
pub type CategoryId = i64;

/// A spending category (owned elsewhere, referenced by id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// A learned association between normalized text and a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Normalized text (whole description, keyword or merchant prefix)
    pub pattern: String,
    pub category_id: CategoryId,
    /// Always within [0, 1]
    pub confidence: f64,
    /// Times this (pattern, category) pair has been confirmed, >= 1
    pub frequency: i64,
    pub last_updated: DateTime<Utc>,
}

/// A pattern to bulk-load (seeding from historical records)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSeed {
    pub pattern: String,
    pub category_id: CategoryId,
    /// Initial frequency, clamped to at least 1 by the stores
    pub frequency: i64,
}

/// An imported transaction as handed to the engine
///
/// The engine never mutates a candidate; it only emits decisions about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    pub date: DateTime<Utc>,
    /// Raw description as it appears on the statement
    pub description: String,
    pub amount: f64,
    pub card_type: Option<String>,
    pub period_id: Option<String>,
}

impl TransactionCandidate {
    pub fn new(date: DateTime<Utc>, description: impl Into<String>, amount: f64) -> Self {
        Self {
            date,
            description: description.into(),
            amount,
            card_type: None,
            period_id: None,
        }
    }

    pub fn with_period(mut self, period_id: impl Into<String>) -> Self {
        self.period_id = Some(period_id.into());
        self
    }

    pub fn with_card_type(mut self, card_type: impl Into<String>) -> Self {
        self.card_type = Some(card_type.into());
        self
    }

    /// Stable dedup key over (date, amount, description)
    pub fn identity_hash(&self) -> String {
        identity_hash(&self.date, self.amount, &self.description)
    }

    /// Period the dedup lookup is scoped to ("" when the candidate has none)
    pub fn period_scope(&self) -> &str {
        self.period_id.as_deref().unwrap_or("")
    }
}

/// A transaction as written to storage (before it has an id)
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub date: DateTime<Utc>,
    pub description: String,
    pub amount: f64,
    pub card_type: Option<String>,
    pub period_scope: String,
    pub identity_hash: String,
    pub category_id: Option<CategoryId>,
}

impl TransactionRecord {
    pub fn from_candidate(candidate: &TransactionCandidate, category_id: Option<CategoryId>) -> Self {
        Self {
            date: candidate.date,
            description: candidate.description.clone(),
            amount: candidate.amount,
            card_type: candidate.card_type.clone(),
            period_scope: candidate.period_scope().to_string(),
            identity_hash: candidate.identity_hash(),
            category_id,
        }
    }
}

/// A persisted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub description: String,
    pub amount: f64,
    pub card_type: Option<String>,
    /// Empty string when the transaction has no period
    pub period_scope: String,
    pub identity_hash: String,
    pub category_id: Option<CategoryId>,
    pub updated_at: DateTime<Utc>,
}

impl StoredTransaction {
    /// Rebuild the candidate this row was ingested from
    pub fn to_candidate(&self) -> TransactionCandidate {
        TransactionCandidate {
            date: self.date,
            description: self.description.clone(),
            amount: self.amount,
            card_type: self.card_type.clone(),
            period_id: if self.period_scope.is_empty() {
                None
            } else {
                Some(self.period_scope.clone())
            },
        }
    }
}

/// Matching strategy that produced a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Normalized description equals a learned pattern
    Exact,
    /// One of description/pattern contains the other
    Partial,
    /// Edit similarity at or above the fuzzy threshold
    Fuzzy,
    /// No suggestion
    None,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Partial => "partial",
            Self::Fuzzy => "fuzzy",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for MatchTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "partial" => Ok(Self::Partial),
            "fuzzy" => Ok(Self::Fuzzy),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown match tier: {}", s)),
        }
    }
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Best category guess for a description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSuggestion {
    pub category_id: Option<CategoryId>,
    pub confidence: f64,
    pub matched_pattern: Option<String>,
    pub tier: MatchTier,
}

impl ClassificationSuggestion {
    /// The "no suggestion" result
    pub fn none() -> Self {
        Self {
            category_id: None,
            confidence: 0.0,
            matched_pattern: None,
            tier: MatchTier::None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.tier == MatchTier::None
    }
}

impl Default for ClassificationSuggestion {
    fn default() -> Self {
        Self::none()
    }
}

/// Counts over persisted transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub total_count: i64,
    pub classified_count: i64,
    pub unclassified_count: i64,
}

/// Review state of a candidate in the swipe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Pending,
    Accepted,
    Rejected,
}

impl CandidateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for CandidateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One transaction waiting for the user to accept or reject its suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCandidate {
    pub transaction: TransactionCandidate,
    pub suggestion: ClassificationSuggestion,
    pub state: CandidateState,
}

impl ReviewCandidate {
    pub fn new(transaction: TransactionCandidate, suggestion: ClassificationSuggestion) -> Self {
        Self {
            transaction,
            suggestion,
            state: CandidateState::Pending,
        }
    }

    pub fn identity_hash(&self) -> String {
        self.transaction.identity_hash()
    }
}

/// A (description, category name) pair from historical data
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoricalRecord {
    pub description: String,
    #[serde(alias = "category_name")]
    pub category: String,
}
