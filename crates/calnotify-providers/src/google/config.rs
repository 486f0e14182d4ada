//! Google Calendar provider configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProviderError, ProviderResult};

/// OAuth 2.0 client credentials used to refresh access tokens.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    /// The OAuth 2.0 client ID from Google Cloud Console.
    pub client_id: String,
    /// The OAuth 2.0 client secret from Google Cloud Console.
    pub client_secret: String,
}

/// Google Cloud Console credentials JSON.
///
/// Accepts the console download (`installed` or `web` section) as well as the
/// flat `client_id`/`client_secret` layout.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<NestedCredentials>,
    web: Option<NestedCredentials>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    /// Creates new OAuth credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads credentials from a Google Cloud Console JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::configuration(format!(
                "failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses credentials from a Google credentials JSON string.
    pub fn from_json(json: &str) -> ProviderResult<Self> {
        let file: CredentialsFile = serde_json::from_str(json).map_err(|e| {
            ProviderError::configuration(format!("failed to parse credentials JSON: {}", e))
        })?;

        if let Some(creds) = file.installed.or(file.web) {
            return Ok(Self::new(creds.client_id, creds.client_secret));
        }

        if let (Some(client_id), Some(client_secret)) = (file.client_id, file.client_secret) {
            return Ok(Self::new(client_id, client_secret));
        }

        Err(ProviderError::configuration(
            "credentials file must contain an 'installed'/'web' section or 'client_id'/'client_secret'",
        ))
    }

    /// Checks that both values are present and the client id looks like a
    /// Google OAuth client id.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.is_empty() {
            return Err("client_id is required");
        }
        if !self.client_id.ends_with(".apps.googleusercontent.com") {
            return Err("client_id should end with .apps.googleusercontent.com");
        }
        if self.client_secret.is_empty() {
            return Err("client_secret is required");
        }
        Ok(())
    }
}

/// Configuration for the Google Calendar source and credentials.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth client credentials.
    pub credentials: OAuthCredentials,

    /// Where the access/refresh token pair is persisted.
    ///
    /// Defaults to `<data_dir>/calnotify/token.json`.
    pub token_path: PathBuf,

    /// Request timeout for API and token calls.
    pub timeout: Duration,

    /// Scopes the stored token must carry.
    pub scopes: Vec<String>,
}

impl GoogleConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Read-only calendar scope.
    pub const DEFAULT_SCOPE: &'static str = "https://www.googleapis.com/auth/calendar.readonly";

    /// Creates a configuration with default token path, timeout and scope.
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            token_path: Self::default_token_path(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            scopes: vec![Self::DEFAULT_SCOPE.to_string()],
        }
    }

    /// Returns `<data_dir>/calnotify/token.json`.
    pub fn default_token_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calnotify")
            .join("token.json")
    }

    /// Sets the token storage path.
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the required scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ProviderResult<()> {
        self.credentials
            .validate()
            .map_err(|e| ProviderError::configuration(format!("invalid credentials: {}", e)))?;

        if self.scopes.is_empty() {
            return Err(ProviderError::configuration(
                "at least one OAuth scope is required",
            ));
        }

        if self.timeout.is_zero() {
            return Err(ProviderError::configuration("timeout must be non-zero"));
        }

        Ok(())
    }
}
