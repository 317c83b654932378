//! Error types for data source operations

use std::fmt;

/// Result type alias for data source operations
pub type DatasourceResult<T> = Result<T, DatasourceError>;

/// Failure reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    /// HTTP status, if the remote side answered at all
    pub status: Option<u16>,

    /// Human-readable cause
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// A transport failure, wrapped so callers can tell network problems apart
/// from everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkError {
    pub cause: TransportError,
}

impl NetworkError {
    /// HTTP status of the underlying failure, if any
    pub fn status(&self) -> Option<u16> {
        self.cause.status
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network error: {}", self.cause)
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Errors that can occur while serving panel, probe or variable queries
#[derive(Debug, Clone)]
pub enum DatasourceError {
    /// Missing or invalid configuration (connection url, interval strings)
    Config(String),

    /// A panel mixes response formats across its targets
    FormatMismatch,

    /// Transport-layer failure while talking to an endpoint
    Network(NetworkError),

    /// The remote side answered with something we can not interpret
    Protocol(String),

    /// Failures collected by the background poller since the last query
    Background(Vec<String>),

    /// Backend-specific failure while fetching a single target
    Target { ref_id: String, message: String },
}

impl DatasourceError {
    pub fn is_network(&self) -> bool {
        matches!(self, DatasourceError::Network(_))
    }
}

impl fmt::Display for DatasourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasourceError::Config(msg) => write!(f, "{}", msg),
            DatasourceError::FormatMismatch => {
                write!(f, "Format must be the same for all queries of a panel.")
            }
            DatasourceError::Network(err) => write!(f, "{}", err),
            DatasourceError::Protocol(msg) => write!(f, "unexpected response: {}", msg),
            DatasourceError::Background(messages) => write!(f, "{}", messages.join("\n")),
            DatasourceError::Target { ref_id, message } => {
                write!(f, "query {} failed: {}", ref_id, message)
            }
        }
    }
}

impl std::error::Error for DatasourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasourceError::Network(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for DatasourceError {
    fn from(err: TransportError) -> Self {
        DatasourceError::Network(NetworkError { cause: err })
    }
}

impl From<serde_json::Error> for DatasourceError {
    fn from(err: serde_json::Error) -> Self {
        DatasourceError::Protocol(err.to_string())
    }
}
