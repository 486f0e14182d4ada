//! Error types for calendar and credential providers.
//!
//! Everything a calendar source or credential provider can fail with is a
//! [`ProviderError`]. The daemon only needs to know two things about a
//! failure: whether it is an authentication problem, and whether trying again
//! on the next sync tick is worthwhile. [`ProviderErrorCode`] answers both.

use std::fmt;
use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Credentials are missing, invalid, expired, or could not be refreshed.
    AuthenticationFailed,
    /// The credential is valid but lacks access to the calendar.
    AuthorizationFailed,
    /// Connection failed, DNS resolution failed, or the transport broke.
    NetworkError,
    /// The request did not finish within its deadline.
    Timeout,
    /// Too many requests.
    RateLimited,
    /// The server answered with an error status.
    ServerError,
    /// The response body could not be understood.
    InvalidResponse,
    /// The calendar does not exist (404).
    NotFound,
    /// Missing or invalid local configuration.
    ConfigurationError,
    /// Unexpected internal state.
    InternalError,
}

impl ProviderErrorCode {
    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    /// Returns true if this error means the credential is unusable.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::AuthorizationFailed)
    }

    /// Returns a stable snake_case name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::ConfigurationError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error that occurred while talking to a calendar or credential provider.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// Provider tag such as `"google"`.
    provider: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Creates a new provider error with the given code and message.
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            source: None,
        }
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthenticationFailed, message)
    }

    /// Creates an authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthorizationFailed, message)
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Timeout, message)
    }

    /// Creates a rate limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    /// Creates a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ServerError, message)
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ConfigurationError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InternalError, message)
    }

    /// Sets the provider tag for this error.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the provider tag, if set.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true if this error concerns the credential.
    pub fn is_auth(&self) -> bool {
        self.code.is_auth()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
