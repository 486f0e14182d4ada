//! OAuth token persistence.
//!
//! The token pair lives in a JSON file under the application data directory.
//! Writes go through a temporary file and a rename so a crash never leaves a
//! truncated token behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

/// Seconds shaved off the reported lifetime so refreshes happen early.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// A persisted OAuth token set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// The access token for API requests.
    pub access_token: String,

    /// The refresh token for obtaining new access tokens.
    pub refresh_token: Option<String>,

    /// When the access token stops being usable, margin included.
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// When the access token was last obtained.
    pub last_refresh: DateTime<Utc>,
}

impl TokenInfo {
    /// Creates a token set from an OAuth token response.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs.and_then(|secs| expiry_from(now, secs)),
            scopes,
            last_refresh: now,
        }
    }

    /// Returns true if the access token is expired or about to expire.
    ///
    /// Tokens without an expiry never expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns true if the access token is unusable at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Returns true if the token carries every scope in `required`.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    /// Replaces the access token after a refresh.
    pub fn update_access_token(
        &mut self,
        access_token: impl Into<String>,
        expires_in_secs: Option<i64>,
    ) {
        let now = Utc::now();
        self.access_token = access_token.into();
        self.expires_at = expires_in_secs.and_then(|secs| expiry_from(now, secs));
        self.last_refresh = now;
    }
}

/// Lifetimes too large to represent never expire; hugely negative ones
/// expire immediately.
fn expiry_from(now: DateTime<Utc>, expires_in_secs: i64) -> Option<DateTime<Utc>> {
    let lifetime = expires_in_secs.saturating_sub(EXPIRY_MARGIN_SECS);
    match TimeDelta::try_seconds(lifetime).and_then(|d| now.checked_add_signed(d)) {
        Some(expires_at) => Some(expires_at),
        None if lifetime < 0 => Some(now),
        None => None,
    }
}

/// File-backed token storage with an in-memory copy.
#[derive(Debug)]
pub struct TokenStorage {
    path: PathBuf,
    tokens: RwLock<Option<TokenInfo>>,
}

impl TokenStorage {
    /// Creates a storage bound to `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tokens: RwLock::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<TokenInfo>> {
        self.tokens.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<TokenInfo>> {
        self.tokens.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads tokens from disk into memory.
    ///
    /// Returns `Ok(false)` when the file does not exist.
    pub fn load(&self) -> ProviderResult<bool> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no token file");
            return Ok(false);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            ProviderError::configuration(format!("failed to read token file: {}", e))
        })?;

        let tokens: TokenInfo = serde_json::from_str(&content).map_err(|e| {
            ProviderError::configuration(format!("failed to parse token file: {}", e))
        })?;

        info!(path = %self.path.display(), "loaded tokens");
        *self.write() = Some(tokens);
        Ok(true)
    }

    fn save(&self, tokens: &TokenInfo) -> ProviderResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ProviderError::configuration(format!("failed to create token directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(tokens)
            .map_err(|e| ProviderError::internal(format!("failed to serialize tokens: {}", e)))?;

        fs::write(&temp_path, &content).map_err(|e| {
            ProviderError::configuration(format!("failed to write token file: {}", e))
        })?;

        fs::rename(&temp_path, &self.path).map_err(|e| {
            ProviderError::configuration(format!("failed to rename token file: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        debug!(path = %self.path.display(), "saved tokens");
        Ok(())
    }

    /// Returns a copy of the current tokens, if any.
    pub fn get(&self) -> Option<TokenInfo> {
        self.read().clone()
    }

    /// Replaces the tokens and persists them.
    pub fn set(&self, tokens: TokenInfo) -> ProviderResult<()> {
        self.save(&tokens)?;
        *self.write() = Some(tokens);
        Ok(())
    }

    /// Stores a refreshed access token, keeping the refresh token.
    pub fn update_access_token(
        &self,
        access_token: impl Into<String>,
        expires_in_secs: Option<i64>,
    ) -> ProviderResult<TokenInfo> {
        let mut tokens = self
            .get()
            .ok_or_else(|| ProviderError::internal("no tokens to update"))?;
        tokens.update_access_token(access_token, expires_in_secs);
        self.set(tokens.clone())?;
        Ok(tokens)
    }

    /// Returns the token file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, TokenStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::new(dir.path().join("nested").join("token.json"));
        (dir, storage)
    }

    #[test]
    fn token_info_creation() {
        let token = TokenInfo::new(
            "access-token",
            Some("refresh-token".to_string()),
            Some(3600),
            vec!["scope1".to_string()],
        );

        assert_eq!(token.access_token, "access-token");
        assert!(token.expires_at.is_some());
        assert!(!token.is_expired());
    }

    #[test]
    fn expiry_includes_margin() {
        let token = TokenInfo::new("access", None, Some(30), vec![]);
        assert!(token.is_expired());

        let forever = TokenInfo::new("access", None, None, vec![]);
        assert!(!forever.is_expired());
    }

    #[test]
    fn expired_at_boundary() {
        let mut token = TokenInfo::new("access", None, Some(3600), vec![]);
        let expires_at = Utc::now();
        token.expires_at = Some(expires_at);
        assert!(token.is_expired_at(expires_at));
        assert!(!token.is_expired_at(expires_at - TimeDelta::seconds(1)));
    }

    #[test]
    fn out_of_range_lifetime_does_not_panic() {
        let long = TokenInfo::new("access", None, Some(i64::MAX), vec![]);
        assert!(long.expires_at.is_none());
        assert!(!long.is_expired());

        let negative = TokenInfo::new("access", None, Some(i64::MIN), vec![]);
        assert!(negative.is_expired());

        let mut refreshed = TokenInfo::new("access", None, Some(3600), vec![]);
        refreshed.update_access_token("next", Some(i64::MAX));
        assert_eq!(refreshed.access_token, "next");
        assert!(refreshed.expires_at.is_none());
    }

    #[test]
    fn scope_check() {
        let token = TokenInfo::new("access", None, None, vec!["a".to_string(), "b".to_string()]);
        assert!(token.has_scopes(&["a".to_string()]));
        assert!(!token.has_scopes(&["c".to_string()]));
    }

    #[test]
    fn save_and_load() {
        let (_dir, storage) = storage();
        storage
            .set(TokenInfo::new(
                "access-token",
                Some("refresh".to_string()),
                Some(3600),
                vec![],
            ))
            .unwrap();
        assert!(storage.path().exists());

        let reloaded = TokenStorage::new(storage.path());
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.get().unwrap().access_token, "access-token");
    }

    #[test]
    fn load_missing_file() {
        let (_dir, storage) = storage();
        assert!(!storage.load().unwrap());
        assert!(storage.get().is_none());
    }

    #[test]
    fn load_corrupt_file() {
        let (_dir, storage) = storage();
        fs::create_dir_all(storage.path().parent().unwrap()).unwrap();
        fs::write(storage.path(), "{ not json").unwrap();
        assert!(storage.load().is_err());
    }

    #[test]
    fn update_keeps_refresh_token() {
        let (_dir, storage) = storage();
        storage
            .set(TokenInfo::new("old", Some("refresh".to_string()), Some(0), vec![]))
            .unwrap();

        let updated = storage.update_access_token("new", Some(3600)).unwrap();
        assert_eq!(updated.access_token, "new");
        assert_eq!(updated.refresh_token.as_deref(), Some("refresh"));
        assert!(!updated.is_expired());

        let reloaded = TokenStorage::new(storage.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.get().unwrap().access_token, "new");
    }

    #[test]
    fn update_without_tokens_fails() {
        let (_dir, storage) = storage();
        assert!(storage.update_access_token("new", None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, storage) = storage();
        storage.set(TokenInfo::new("access", None, None, vec![])).unwrap();
        let mode = fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
