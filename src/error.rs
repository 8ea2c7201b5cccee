//! Crate-wide error type.
//!
//! Store, fetch, LLM and pipeline code all return [`Result`]. The HTTP layer
//! maps each variant to a status code in [`crate::api`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A pipeline stage gave up; the message is reported as the run outcome.
    #[error("{0}")]
    Stage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    Conflict { kind: &'static str, id: String },
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn stage(reason: impl Into<String>) -> Self {
        Self::Stage(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
