//! Error types for the sharded cache.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the proxy and node tiers.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown or invalid API key. No downstream call was made.
    #[error("authentication failed: unknown api key")]
    Authentication,

    /// The hash ring has no members, so there is no node to target.
    #[error("routing error: hash ring is empty")]
    Routing,

    /// The resolved node could not be reached or the RPC failed.
    #[error("node {node} unavailable during {operation}: {reason}")]
    NodeUnavailable {
        node: String,
        operation: &'static str,
        reason: String,
    },

    /// A namespace exceeded its configured request rate.
    #[error("rate limited: namespace {namespace} exceeds {limit_qps} qps")]
    RateLimited { namespace: String, limit_qps: u64 },

    /// A candidate configuration was rejected.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Process configuration errors (environment, config document parsing).
    #[error("config error: {0}")]
    Config(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Error reported by a remote peer, kept with its wire category.
    #[error("remote error ({kind:?}): {message}")]
    Remote { kind: ErrorKind, message: String },

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a lower-level failure with the node and operation it happened on.
    pub fn node_unavailable(node: impl Into<String>, operation: &'static str, reason: impl ToString) -> Self {
        Error::NodeUnavailable {
            node: node.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authentication => ErrorKind::Authentication,
            Error::Routing => ErrorKind::Routing,
            Error::NodeUnavailable { .. } | Error::Network(_) | Error::Timeout => {
                ErrorKind::NodeUnavailable
            }
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Validation(_) | Error::Config(_) => ErrorKind::Validation,
            Error::Remote { kind, .. } => *kind,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Rebuild an error received over the wire.
    ///
    /// Only the category and message cross the wire, so categories with
    /// typed fields come back as [`Error::Remote`].
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Authentication => Error::Authentication,
            ErrorKind::Routing => Error::Routing,
            kind => Error::Remote { kind, message },
        }
    }
}

/// Error categories carried in wire responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Authentication,
    Routing,
    NodeUnavailable,
    RateLimited,
    Validation,
    Internal,
}

/// Reasons a candidate configuration is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The configuration declares no namespaces.
    #[error("configuration must declare at least one namespace")]
    NoNamespaces,

    /// A namespace has an empty name.
    #[error("namespace at index {index} has an empty name")]
    EmptyName { index: usize },

    /// A namespace name contains the key separator.
    #[error("namespace name {name:?} contains the reserved separator ':'")]
    ReservedSeparator { name: String },

    /// Two namespaces share a name.
    #[error("duplicate namespace name: {0}")]
    DuplicateName(String),

    /// A namespace has an empty API key.
    #[error("namespace {0} has an empty api key")]
    EmptyApiKey(String),

    /// A numeric limit is negative.
    #[error("namespace {namespace}: {field} must be >= 0, got {value}")]
    NegativeLimit {
        namespace: String,
        field: &'static str,
        value: i64,
    },

    /// A node address in the static node list is empty or duplicated.
    #[error("invalid node list: {0}")]
    InvalidNodes(String),
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame exceeds the maximum size.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The peer answered with a message of the wrong type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Network(NetworkError::Serialization(e.to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(format!("invalid config document: {}", e))
    }
}
