//! Shared types, errors, dataset model, and collaborator interfaces for the
//! analyst pipeline.
//!
//! This crate provides the foundational types used across all other analyst crates:
//! - `AnalystError`: unified error taxonomy
//! - `Dataset`: the tabular working resource
//! - verdicts and decisions exchanged with planners, judges and verifiers
//! - collaborator traits (`Planner`, `Judge`, `Summarizer`, ...)
//! - `AnalystConfig`: explicit configuration passed to every component

pub mod collab;
pub mod config;
pub mod dataset;
pub mod stats;
pub mod verdict;

pub use collab::{ChatPlanner, CodeGenerator, Judge, Planner, Summarizer, TextModel, Verifier};
pub use config::{AnalystConfig, ChatSettings, ModelSettings, SandboxSettings, SessionSettings};
pub use dataset::{Cell, ColumnType, Dataset};
pub use verdict::{
    ChatDecision, ChatRole, ChatTurn, CodeRequest, GeneratedCode, PlannerDecision,
    SessionVerdict, StageInfo, StepVerdict, Validity, VerificationReport,
};

use std::path::PathBuf;

/// Unified error type for all analyst subsystems.
#[derive(Debug, thiserror::Error)]
pub enum AnalystError {
    // === Sandbox Errors ===
    #[error("Syntax error at line {line}, col {column}: {message}")]
    Validation {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Forbidden or unknown symbol: {0}")]
    ForbiddenSymbol(String),

    #[error("Execution error: {0}")]
    Execution(String),

    // === Session Errors ===
    #[error("Stage '{stage}' requires '{missing}' to run first")]
    StageDependency { stage: String, missing: String },

    #[error("Unknown tool '{0}'")]
    UnknownStage(String),

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Could not parse {collaborator} response: {message}")]
    JudgeParse {
        collaborator: String,
        message: String,
    },

    #[error("Failed to persist session state to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load dataset from {}: {message}", path.display())]
    DatasetLoad { path: PathBuf, message: String },

    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Unknown tool '{name}'. Available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    // === Model Errors ===
    #[error("Model {provider} failed: {message}")]
    Model { provider: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl AnalystError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalystError::CommandTimeout { .. } | AnalystError::Model { .. }
        )
    }

    /// Returns `true` for the two conditions that abort a whole run: the
    /// dataset could not be loaded, or session state could not be written.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AnalystError::DatasetLoad { .. } | AnalystError::Persistence { .. }
        )
    }

    /// Wrap an I/O failure on a session file.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalystError::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// A convenience alias for `Result<T, AnalystError>`.
pub type Result<T> = std::result::Result<T, AnalystError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
