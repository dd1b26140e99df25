//! Structured error types for the analytics module.
//!
//! Replaces `anyhow::Result` with domain-specific errors so consumers
//! can match on specific failure variants.

use std::path::PathBuf;

use crate::errors::AppError;

/// Errors from the analytics subsystem (skill library, experience replay).
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// Failed to read a file from disk.
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a file to disk.
    #[error("Failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A skill document's frontmatter was missing, malformed, or missing a
    /// required field.
    #[error("Failed to parse skill document {path}: {reason}")]
    MalformedSkillDocument { path: PathBuf, reason: String },

    /// Failed to parse YAML frontmatter.
    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Failed to parse JSON data.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The registry's backing KV store failed.
    #[error("Skill registry storage error: {0}")]
    Registry(#[from] AppError),
}

/// Result type alias for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

impl From<AnalyticsError> for AppError {
    fn from(e: AnalyticsError) -> Self {
        match e {
            AnalyticsError::Registry(app_err) => app_err,
            other => AppError::internal(other.to_string()),
        }
    }
}
