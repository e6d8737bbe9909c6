//! Error types for container runtime operations

use std::fmt;

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors reported by a [`super::ContainerRuntime`]
#[derive(Debug)]
pub enum RuntimeError {
    /// The runtime could not be reached at all
    Unavailable(String),

    /// A snapshot request (e.g. listing containers) failed
    Request(String),

    /// A long-lived stream broke
    Stream(String),

    /// A stream item could not be decoded
    Decode(serde_json::Error),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Unavailable(msg) => write!(f, "container runtime unavailable: {}", msg),
            RuntimeError::Request(msg) => write!(f, "container runtime request failed: {}", msg),
            RuntimeError::Stream(msg) => write!(f, "container runtime stream failed: {}", msg),
            RuntimeError::Decode(err) => write!(f, "failed to decode runtime payload: {}", err),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Decode(err)
    }
}
