//! Google credential provider backed by a token file.
//!
//! The stored access token is handed out while it is fresh. Once it expires
//! the refresh token is exchanged at Google's token endpoint and the new
//! access token is written back to disk. Obtaining the first token pair is
//! not handled here: without a token file every call fails with an
//! authentication error.

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, Credential, CredentialProvider};

use super::config::{GoogleConfig, OAuthCredentials};
use super::tokens::TokenStorage;

/// Google OAuth token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Credential provider for the Google Calendar API.
#[derive(Debug)]
pub struct GoogleCredentials {
    credentials: OAuthCredentials,
    storage: TokenStorage,
    scopes: Vec<String>,
    http_client: reqwest::Client,
    token_url: String,
}

impl GoogleCredentials {
    /// Creates the provider and loads any stored token.
    ///
    /// A missing token file is not an error here; it surfaces on the first
    /// call to [`CredentialProvider::credential`].
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        config.validate()?;

        let storage = TokenStorage::new(&config.token_path);
        storage.load()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            credentials: config.credentials.clone(),
            storage,
            scopes: config.scopes.clone(),
            http_client,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }

    /// Overrides the token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Returns true if a stored token exists and is either fresh or refreshable.
    pub fn is_authenticated(&self) -> bool {
        self.storage
            .get()
            .is_some_and(|tokens| !tokens.is_expired() || tokens.refresh_token.is_some())
    }

    async fn current_credential(&self) -> ProviderResult<Credential> {
        let tokens = self.storage.get().ok_or_else(|| {
            ProviderError::authentication(format!(
                "no usable token at {}",
                self.storage.path().display()
            ))
        })?;

        if !tokens.has_scopes(&self.scopes) {
            warn!(
                granted = ?tokens.scopes,
                required = ?self.scopes,
                "stored token is missing required scopes"
            );
        }

        if !tokens.is_expired_at(Utc::now()) {
            return Ok(Credential::bearer(tokens.access_token));
        }

        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::authentication("access token expired and no refresh token is stored")
        })?;

        debug!("refreshing expired access token");
        let (access_token, expires_in) = self.refresh(refresh_token).await?;
        let updated = self.storage.update_access_token(access_token, expires_in)?;
        Ok(Credential::bearer(updated.access_token))
    }

    async fn refresh(&self, refresh_token: &str) -> ProviderResult<(String, Option<i64>)> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::timeout("token refresh timed out")
                } else {
                    ProviderError::network(format!("token refresh request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ProviderError::authentication(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let (access_token, expires_in) = parse_token_response(&body)?;
        info!("refreshed access token");
        Ok((access_token, expires_in))
    }
}

fn parse_token_response(body: &str) -> ProviderResult<(String, Option<i64>)> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_response(format!("invalid token response: {}", e)))?;
    Ok((response.access_token, response.expires_in))
}

impl CredentialProvider for GoogleCredentials {
    fn credential(&self) -> BoxFuture<'_, ProviderResult<Credential>> {
        Box::pin(async move {
            self.current_credential()
                .await
                .map_err(|e| e.with_provider("google"))
        })
    }
}
