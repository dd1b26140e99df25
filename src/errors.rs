//! Categorized application errors with user-facing formatting.
//!
//! Mirrors the orchestrator's error taxonomy: every error carries a category,
//! a severity, optional suggestions, free-form context, and a recoverability
//! flag so callers can decide whether to retry or abort.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broad classification of an error's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    FileSystem,
    Vcs,
    Network,
    Validation,
    Configuration,
    MakerVoting,
    ModelTimeout,
    Connection,
    ToolExecution,
    AiService,
    Resource,
    Internal,
    Unknown,
}

/// Severity of an error, used to pick a log level and a display treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// A user-facing, categorized error.
///
/// This is the crate's single error type for anything that can surface to an
/// operator or be relayed back over the MCP tools endpoint. Internal library
/// failures are wrapped into one of these at the module boundary.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AppError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub code: Option<String>,
}

impl AppError {
    pub fn new(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            category,
            severity: ErrorSeverity::Error,
            suggestions: Vec::new(),
            recoverable: true,
            context: HashMap::new(),
            code: None,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = String>) -> Self {
        self.suggestions = suggestions.into_iter().collect();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Render for a human (CLI/MCP error payload), matching the orchestrator's
    /// `UserError.format_for_user` layout.
    pub fn format_for_user(&self) -> String {
        let mut lines = vec![format!("Error: {}", self.message)];
        if !matches!(self.category, ErrorCategory::Unknown) {
            lines.push(format!("Category: {:?}", self.category));
        }
        if !self.suggestions.is_empty() {
            lines.push("\nSuggestions:".to_string());
            for s in &self.suggestions {
                lines.push(format!("  - {s}"));
            }
        }
        if !self.context.is_empty() {
            lines.push("\nContext:".to_string());
            for (k, v) in &self.context {
                lines.push(format!("  {k}: {v}"));
            }
        }
        lines.join("\n")
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(format!("File not found: {path}"), ErrorCategory::FileSystem)
            .with_suggestions([
                "Check the file path is correct".to_string(),
                "Ensure the file exists in the codebase".to_string(),
                "Try using a path relative to the project root".to_string(),
            ])
            .with_context("path", path)
    }

    pub fn vcs(message: impl Into<String>, command: Option<&str>) -> Self {
        let mut e = Self::new(format!("Git error: {}", message.into()), ErrorCategory::Vcs)
            .with_suggestions([
                "Check that git is installed and in PATH".to_string(),
                "Verify you have write permissions in the repository".to_string(),
                "Check git repository status with `git status`".to_string(),
            ]);
        if let Some(cmd) = command {
            e = e.with_context("command", cmd);
        }
        e
    }

    pub fn model_timeout(agent: impl Into<String>, endpoint: Option<&str>) -> Self {
        let agent = agent.into();
        let mut e = Self::new(
            format!("Model timeout for agent {agent}"),
            ErrorCategory::ModelTimeout,
        )
        .with_suggestions([
            "Check the agent's model server is running".to_string(),
            "Verify the model is loaded at the configured endpoint".to_string(),
            "Try restarting the model server".to_string(),
            "Check server logs for errors".to_string(),
        ])
        .with_context("agent", agent);
        if let Some(endpoint) = endpoint {
            e = e.with_context("endpoint", endpoint);
        }
        e
    }

    pub fn configuration(message: impl Into<String>, config_path: Option<&str>) -> Self {
        let mut e = Self::new(
            format!("Configuration error: {}", message.into()),
            ErrorCategory::Configuration,
        )
        .with_suggestions([
            "Check your .maker.toml file for syntax errors".to_string(),
            "Verify configuration values are valid".to_string(),
        ]);
        if let Some(path) = config_path {
            e = e.with_context("config_path", path);
        }
        e
    }

    pub fn network(message: impl Into<String>, url: Option<&str>) -> Self {
        let mut e = Self::new(format!("Network error: {}", message.into()), ErrorCategory::Network)
            .with_suggestions([
                "Check network connectivity".to_string(),
                "Verify the server URL is correct".to_string(),
                "Retry the operation".to_string(),
            ]);
        if let Some(url) = url {
            e = e.with_context("url", url);
        }
        e
    }

    pub fn maker_voting(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::MakerVoting).with_severity(ErrorSeverity::Warning)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Internal).with_severity(ErrorSeverity::Critical)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::new(e.to_string(), ErrorCategory::FileSystem).recoverable(false)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::new(e.to_string(), ErrorCategory::Validation)
    }
}

pub type AppResult<T> = Result<T, AppError>;
