//! Provisioning error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-supplied detail attached to a rejected request or a failed
/// operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "ResourceNotFound")
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// HTTP status, when the rejection carries one
    pub status: Option<u16>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: {} (status {})", self.code, self.message, status),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("control plane rejected the request: {0}")]
    RemoteRejected(ErrorDetail),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("cyclic dependency involving step '{0}'")]
    CyclicDependency(String),

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' executed before its dependency '{dependency}' produced a result")]
    UnresolvedDependency { step: String, dependency: String },

    #[error("step '{step}' references unknown output '{reference}'")]
    InvalidReference { step: String, reference: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Whether a poller may retry after this error. Only transport faults and
    /// throttling (429) qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::Transport(_) => true,
            ProvisionError::RemoteRejected(detail) => detail.status == Some(429),
            _ => false,
        }
    }

    /// Whether this error means the target resource does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProvisionError::RemoteRejected(detail) => {
                detail.status == Some(404)
                    || detail.code.eq_ignore_ascii_case("notfound")
                    || detail.code.eq_ignore_ascii_case("resourcenotfound")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
