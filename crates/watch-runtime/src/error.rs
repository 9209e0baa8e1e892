//! Watcher and controller error types.

use cluster_client::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by watch sessions, either surfaced from the cluster client
/// or from the session lifecycle.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Cluster API error (list, stream open, or stream failure)
    #[error("Cluster client error: {0}")]
    Client(#[from] ClientError),

    /// `start` was called on a watcher that is stopping or already stopped
    #[error("Watcher for {0} is stopping or stopped and cannot be started")]
    Stopped(String),

    /// The watch loop did not exit within the stop timeout
    #[error("Watch loop for {kind} did not exit within {timeout:?}")]
    StopTimeout {
        /// Watched kind
        kind: String,
        /// The timeout the caller supplied
        timeout: Duration,
    },

    /// `start` was called outside of a Tokio runtime
    #[error("No Tokio runtime available to run the watch loop")]
    NoRuntime,
}

/// Errors that can occur in a resource controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Watch session error
    #[error("Resource watch failed: {0}")]
    Watch(#[from] WatchError),

    /// Startup reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(#[source] anyhow::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a controller that is stopping or already stopped
    #[error("Controller for {0} is stopping or stopped and cannot be started")]
    Stopped(String),

    /// In-flight reconciliations were still running when the stop timeout elapsed
    #[error("{abandoned} in-flight reconciliation(s) abandoned after {timeout:?}")]
    StopTimeout {
        /// Number of reconcile runs left detached
        abandoned: usize,
        /// The timeout the caller supplied
        timeout: Duration,
    },
}
