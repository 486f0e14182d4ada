//! Daemon configuration.
//!
//! Settings live in `~/.config/calnotify/config.toml` by default. Every
//! section is optional:
//!
//! ```toml
//! [google]
//! client_id = "xxx.apps.googleusercontent.com"
//! client_secret = "env::CALNOTIFY_CLIENT_SECRET"
//! # or: credentials_file = "~/Downloads/client_secret.json"
//!
//! [sync]
//! interval_minutes = 10
//!
//! [notifications]
//! timeout_secs = 15
//! ```
//!
//! `client_id` and `client_secret` accept secret references:
//! - `pass::path/in/store` - first line of `pass show path/in/store`
//! - `env::VAR_NAME` - the environment variable
//! - anything else - used as-is
//!
//! The list of calendars to watch is kept separately in
//! `~/.local/share/calnotify/calendars.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use calnotify_providers::google::{GoogleConfig, OAuthCredentials};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult};
use crate::notify::NotifyConfig;
use crate::sync::SyncConfig;

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub google: GoogleSettings,
    pub sync: SyncSettings,
    pub notifications: NotifyConfig,
}

/// The `[google]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,
    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,
    /// Google Cloud Console credentials JSON, used when the inline values
    /// are absent.
    pub credentials_file: Option<PathBuf>,
    /// Where the token pair is stored.
    pub token_path: Option<PathBuf>,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            credentials_file: None,
            token_path: None,
            timeout_secs: GoogleConfig::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GoogleSettings {
    /// Builds the provider configuration.
    pub fn to_provider_config(&self) -> DaemonResult<GoogleConfig> {
        let mut config = GoogleConfig::new(self.resolve_credentials()?)
            .with_timeout(Duration::from_secs(self.timeout_secs));

        if let Some(ref path) = self.token_path {
            config = config.with_token_path(path);
        }

        config
            .validate()
            .map_err(|e| DaemonError::config(e.message().to_string()))?;
        Ok(config)
    }

    fn resolve_credentials(&self) -> DaemonResult<OAuthCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Ok(OAuthCredentials::new(
                resolve_secret(id).map_err(DaemonError::config)?,
                resolve_secret(secret).map_err(DaemonError::config)?,
            )),
            (Some(_), None) => Err(DaemonError::config(
                "client_secret is missing from the [google] section",
            )),
            _ => match self.credentials_file {
                Some(ref path) => OAuthCredentials::from_file(path)
                    .map_err(|e| DaemonError::config(e.message().to_string())),
                None => Err(DaemonError::config(format!(
                    "Google credentials not found. Add to {}:\n  \
                     [google]\n  \
                     client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                     client_secret = \"YOUR_SECRET\"",
                    DaemonConfig::default_path().display()
                ))),
            },
        }
    }
}

/// The `[sync]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Minutes between reconciliations.
    pub interval_minutes: u64,
    /// Seconds between scheduler polls.
    pub poll_seconds: u64,
    /// Upper bound on one calendar fetch, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            poll_seconds: 1,
            fetch_timeout_secs: 60,
        }
    }
}

impl SyncSettings {
    /// Converts to the loop's timing, rejecting zero values.
    pub fn to_sync_config(&self) -> DaemonResult<SyncConfig> {
        for (name, value) in [
            ("interval_minutes", self.interval_minutes),
            ("poll_seconds", self.poll_seconds),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
        ] {
            if value == 0 {
                return Err(DaemonError::config(format!("[sync] {} must be non-zero", name)));
            }
        }

        Ok(SyncConfig::default()
            .with_sync_interval(Duration::from_secs(self.interval_minutes * 60))
            .with_poll_interval(Duration::from_secs(self.poll_seconds))
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout_secs)))
    }
}

impl DaemonConfig {
    /// Loads `path`, or the default location when `None`.
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> DaemonResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> DaemonResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DaemonError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            DaemonError::config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calnotify")
    }

    /// Returns the default data directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calnotify")
    }

    /// Returns the default calendar list path.
    pub fn default_calendars_path() -> PathBuf {
        Self::default_data_dir().join("calendars.json")
    }
}

/// Reads the calendar ids to watch from a JSON array file.
///
/// When the file does not exist it is created containing `["primary"]`.
pub fn load_calendar_ids(path: &Path) -> DaemonResult<Vec<String>> {
    if !path.exists() {
        let defaults = vec!["primary".to_string()];
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&defaults)
            .map_err(|e| DaemonError::config(format!("failed to serialize calendars: {}", e)))?;
        fs::write(path, content)?;
        info!(path = %path.display(), "created default calendar list");
        return Ok(defaults);
    }

    let content = fs::read_to_string(path)?;
    let ids: Vec<String> = serde_json::from_str(&content).map_err(|e| {
        DaemonError::config(format!(
            "{} must be a JSON array of calendar ids: {}",
            path.display(),
            e
        ))
    })?;

    if ids.is_empty() {
        warn!(path = %path.display(), "calendar list is empty, nothing will be fetched");
    }
    Ok(ids)
}

/// Resolves a value that may contain a secret reference prefix.
fn resolve_secret(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var).map_err(|_| format!("environment variable `{}` is not set", var))
    } else {
        Ok(value.to_string())
    }
}

/// Runs `pass show <path>` and returns the first line of stdout.
fn resolve_pass(path: &str) -> Result<String, String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run `pass show {}`: {}", path, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`pass show {}` failed ({}): {}",
            path,
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| format!("`pass show {}` produced no output", path))
}
