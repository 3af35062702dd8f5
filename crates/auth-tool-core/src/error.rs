//! Flow Error Types
//!
//! Every failure in the core is scoped to the current authorization attempt.
//! `ErrorKind` groups variants into the reporting paths the front end uses.

use std::fmt;

/// Message shown for any token request that did not produce a parseable reply.
pub const FETCH_FAILURE_MESSAGE: &str = "Failed to fetch token";

/// Reporting category of a [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport, DNS or TLS failure
    Network,
    /// Malformed JSON from the provider
    Parse,
    /// Returned response cannot be matched to the pending attempt
    ProtocolMismatch,
    /// Missing or unusable configuration / discovery data
    Config,
    /// Local persistence failure
    Storage,
    /// Event not valid in the current flow phase
    State,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::ProtocolMismatch => "protocol-mismatch",
            ErrorKind::Config => "config",
            ErrorKind::Storage => "storage",
            ErrorKind::State => "state",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("HTTP request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("Invalid JSON from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Authorization response rejected: {0}")]
    ProtocolMismatch(String),

    #[error("Invalid authentication server URL '{0}'")]
    InvalidIssuer(String),

    #[error("Discovery document has no string '{0}'")]
    MissingEndpoint(&'static str),

    #[error("{0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cannot {event} while {phase}")]
    InvalidTransition { event: &'static str, phase: String },
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Network { .. } => ErrorKind::Network,
            FlowError::Parse { .. } => ErrorKind::Parse,
            FlowError::ProtocolMismatch(_) => ErrorKind::ProtocolMismatch,
            FlowError::InvalidIssuer(_) | FlowError::MissingEndpoint(_) | FlowError::Config(_) => {
                ErrorKind::Config
            }
            FlowError::Storage(_) => ErrorKind::Storage,
            FlowError::InvalidTransition { .. } => ErrorKind::State,
        }
    }

    /// Network and parse failures share one reporting path.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Parse)
    }

    /// Text shown to the operator for this failure.
    pub fn report(&self) -> String {
        if self.is_fetch_failure() {
            FETCH_FAILURE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    pub(crate) fn network(url: &str, err: impl fmt::Display) -> Self {
        FlowError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(url: &str, err: impl fmt::Display) -> Self {
        FlowError::Parse {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn storage(context: &str, err: impl fmt::Display) -> Self {
        FlowError::Storage(format!("{}: {}", context, err))
    }
}

/// Result type used across the core.
pub type FlowResult<T> = Result<T, FlowError>;
