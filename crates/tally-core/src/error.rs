//! Error types for Tally

use thiserror::Error;

use crate::models::CandidateState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Duplicate transaction identity: {0}")]
    DuplicateIdentity(String),

    #[error("Candidate {identity_hash} already {state}")]
    AlreadyDecided {
        identity_hash: String,
        state: CandidateState,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Storage-class failures the caller may retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Pool(_)
                | Error::Io(_)
                | Error::StoreUnavailable(_)
                | Error::Task(_)
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
