use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum BackendErrorKind {
    /// The backend could not be reached
    Connection,
    /// The backend answered but produced no usable text
    EmptyResponse,
    /// The backend answered with a non-2xx status
    HttpStatus(u16),
    /// The call exceeded its deadline
    Timeout,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Connection => write!(f, "CONNECTION"),
            BackendErrorKind::EmptyResponse => write!(f, "EMPTY_RESPONSE"),
            BackendErrorKind::HttpStatus(code) => write!(f, "HTTP_STATUS({})", code),
            BackendErrorKind::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CellScribeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported backend '{0}': expected one of hosted, local")]
    InvalidBackend(String),

    #[error("Precondition not met: {0}")]
    Precondition(String),

    #[error("Backend error [{kind}]: {message}")]
    Backend {
        kind: BackendErrorKind,
        message: String,
    },

    #[error("Empty text from {0}")]
    EmptyText(String),

    #[error("Template '{template}' requires field '{field}'")]
    MissingField { template: String, field: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Predicted cluster ids have no counterpart in the grouping: {}", .0.join(", "))]
    UnmatchedCluster(Vec<String>),

    #[error("Cluster id '{0}' appears more than once in the model output")]
    DuplicateCluster(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Enrichment aborted at {stage}: {reason}")]
    EnrichmentAborted {
        stage: String,
        reason: Box<CellScribeError>,
    },
}

impl CellScribeError {
    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        CellScribeError::Backend {
            kind,
            message: message.into(),
        }
    }

    /// Backend failure kind, looking through an aborted enrichment.
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            CellScribeError::Backend { kind, .. } => Some(*kind),
            CellScribeError::EnrichmentAborted { reason, .. } => reason.backend_kind(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CellScribeError>;
