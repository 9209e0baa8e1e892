//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when listing or watching resources
#[derive(Debug, Error)]
pub enum ClientError {
    /// Kubernetes client/transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The API server answered with an error status
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP-style status code reported by the server
        code: u16,
        /// Server supplied message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., blank descriptor fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The server sent an error object on an open change stream (e.g. 410 Gone)
    #[error("Watch stream error: {0}")]
    Stream(String),

    /// The connection dropped without an API level error
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Shorthand for an API error.
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Status code when the server responded with one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}
