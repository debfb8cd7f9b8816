//! Error types.
//!
//! Failures are values: a failed fetch or derivation is stored in the cell
//! or node it belongs to and handed back, by clone, to every reader until
//! the upstream is replaced. Not-ready values travel through the same
//! channel as [`ReadError::Suspended`] so callers can use `?` for both.

use std::any::Any;

use thiserror::Error;

use crate::cell::Suspension;

/// Failure surfaced by the injected fetch collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    status: Option<u16>,
    info: Option<serde_json::Value>,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            info: None,
        }
    }

    /// Attach the transport status code (for HTTP, the response status).
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the decoded error body returned by the remote side.
    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.info = Some(info);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn info(&self) -> Option<&serde_json::Value> {
        self.info.as_ref()
    }
}

/// Terminal failure of a cell or graph node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// The fetch collaborator rejected.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A derived computation returned an error or panicked.
    #[error("derivation `{node}` failed: {message}")]
    Derivation { node: String, message: String },

    /// A derived node read itself through its own dependencies.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

impl LoadError {
    /// A derivation failure not yet attributed to a node. The graph fills
    /// in the node label when it stores the error.
    pub fn derivation(message: impl Into<String>) -> Self {
        LoadError::Derivation {
            node: String::new(),
            message: message.into(),
        }
    }

    /// The human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            LoadError::Fetch(err) => err.message(),
            LoadError::Derivation { message, .. } => message,
            LoadError::Cycle { .. } => "dependency cycle detected",
        }
    }

    /// The fetch error, if this failure came from the fetch collaborator.
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            LoadError::Fetch(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn attributed_to(self, label: &str) -> Self {
        match self {
            LoadError::Derivation { node, message } if node.is_empty() => LoadError::Derivation {
                node: label.to_string(),
                message,
            },
            other => other,
        }
    }
}

/// Outcome of a read that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// Not ready yet. Await the suspension, then read again.
    #[error("{0}")]
    Suspended(Suspension),

    #[error(transparent)]
    Failed(#[from] LoadError),
}

impl ReadError {
    /// Shorthand for failing a derivation with a message.
    pub fn msg(message: impl Into<String>) -> Self {
        ReadError::Failed(LoadError::derivation(message))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ReadError::Suspended(_))
    }

    pub fn as_failure(&self) -> Option<&LoadError> {
        match self {
            ReadError::Failed(err) => Some(err),
            ReadError::Suspended(_) => None,
        }
    }
}

impl From<FetchError> for ReadError {
    fn from(err: FetchError) -> Self {
        ReadError::Failed(LoadError::Fetch(err))
    }
}

/// Failure loading a [`CacheConfig`](crate::config::CacheConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid cache config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
