use std::sync::Arc;

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// Errors produced by the connection, registry and metadata layers.
///
/// Only [`WatcherError::BackoffExhausted`] is terminal: it means the connection manager gave up
/// and the process has to be restarted externally. Every other variant is either retried through
/// the reconnection cycle or scoped to a single watcher.
#[derive(Error, Debug, Clone)]
pub enum WatcherError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    Connection(Arc<RpcError<TransportErrorKind>>),

    /// A timeout elapsed while waiting for an RPC response.
    #[error("Operation timed out")]
    Timeout,

    /// A live subscription stream ended while it was still registered.
    #[error("Subscription for watcher \"{0}\" closed")]
    SubscriptionClosed(String),

    /// The underlying subscription for a watcher could not be created.
    #[error("Failed to create subscription for watcher \"{name}\": {reason}")]
    SubscriptionCreation { name: String, reason: String },

    /// A watcher with the same name is already registered.
    #[error("Watcher \"{0}\" is already registered")]
    DuplicateWatcher(String),

    /// The reconnection backoff gave up after the maximum number of attempts.
    #[error("Reconnection abandoned after {attempts} attempts")]
    BackoffExhausted { attempts: u32 },

    /// The batched metadata read failed as a whole.
    #[error("Token metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// No connection is installed (the manager is in a terminal state).
    #[error("Not connected")]
    NotConnected,
}

impl WatcherError {
    /// Returns `true` when the error is the terminal backoff-exhaustion failure.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherError::BackoffExhausted { .. })
    }
}

impl From<RpcError<TransportErrorKind>> for WatcherError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        WatcherError::Connection(Arc::new(error))
    }
}

impl From<tokio::time::error::Elapsed> for WatcherError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        WatcherError::Timeout
    }
}

/// Error returned by [`EventHandler`](crate::EventHandler) operations.
///
/// Handler errors are caught and logged by the dispatcher; they never cancel the subscription
/// that delivered the batch.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A notification sink rejected the message.
    #[error("Notification failed: {0}")]
    Notify(String),

    /// A watcher-level call made by the handler failed (e.g. a metadata lookup).
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type HandlerResult = Result<(), HandlerError>;
