//! Daemon error types.

use std::io;

use calnotify_providers::ProviderError;
use thiserror::Error;

use crate::scheduler::JobHandle;

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors that can occur in the daemon.
///
/// Only [`DaemonError::Auth`] at startup and [`DaemonError::Config`] stop the
/// process; everything else is logged and retried on a later tick.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// No credential could be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[source] ProviderError),

    /// The calendar source failed or timed out.
    #[error("fetch failed: {0}")]
    Fetch(#[source] ProviderError),

    /// The desktop notifier rejected a notification.
    #[error("notification failed: {0}")]
    Notify(String),

    /// A scheduled job failed while running.
    #[error("job {handle} failed: {message}")]
    Job { handle: JobHandle, message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a job failure.
    pub fn job(handle: JobHandle, message: impl Into<String>) -> Self {
        Self::Job {
            handle,
            message: message.into(),
        }
    }

    /// Splits a credential-path failure into `Auth` or `Fetch`.
    ///
    /// Transport problems while refreshing are not authentication failures
    /// and are retried like any fetch error.
    pub fn from_credential(err: ProviderError) -> Self {
        if err.is_auth() {
            Self::Auth(err)
        } else {
            Self::Fetch(err)
        }
    }

    /// Returns true if this error concerns credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
