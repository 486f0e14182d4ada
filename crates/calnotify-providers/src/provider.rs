//! Calendar source and credential provider traits.
//!
//! The daemon never talks to a calendar service directly. It asks a
//! [`CredentialProvider`] for a bearer [`Credential`] and hands it to a
//! [`CalendarSource`] together with the calendar ids and the time window it
//! wants. Both traits return boxed futures so they can be used as trait
//! objects.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use calnotify_core::{EventSnapshot, TimeWindow};
use chrono::{DateTime, Utc};

use crate::error::{ProviderError, ProviderResult};

/// A boxed future for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An opaque bearer credential.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
}

impl Credential {
    /// Wraps a bearer access token.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// Returns the raw access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Supplies a valid credential, refreshing it when necessary.
pub trait CredentialProvider: Send + Sync {
    /// Returns a credential that is valid right now.
    ///
    /// # Errors
    ///
    /// Returns an `AuthenticationFailed` error when no usable credential can
    /// be produced.
    fn credential(&self) -> BoxFuture<'_, ProviderResult<Credential>>;
}

/// Fetches upcoming events from one or more calendars.
pub trait CalendarSource: Send + Sync {
    /// Returns the name of this source (e.g. `"google"`).
    fn name(&self) -> &str;

    /// Fetches events for `calendar_ids` within `window`.
    ///
    /// Implementations must drop events without a start time and events that
    /// do not start strictly after the moment of the call. Results from
    /// several calendars are concatenated in `calendar_ids` order.
    fn fetch_upcoming_events<'a>(
        &'a self,
        credential: &'a Credential,
        calendar_ids: &'a [String],
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<EventSnapshot>>>;
}

/// Keeps only events that start strictly after `now`.
pub fn retain_upcoming(events: &mut Vec<EventSnapshot>, now: DateTime<Utc>) {
    events.retain(|event| event.starts_after(now));
}

/// A credential provider that always returns the same token.
///
/// Useful for tests and for tokens managed outside the daemon.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    /// Creates a provider that returns `access_token` forever.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            credential: Credential::bearer(access_token),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> BoxFuture<'_, ProviderResult<Credential>> {
        let credential = self.credential.clone();
        Box::pin(async move { Ok(credential) })
    }
}

/// A calendar source that always fails with the same error.
///
/// Stands in for a source that could not be constructed.
#[derive(Debug)]
pub struct ErrorSource {
    name: String,
    error: ProviderError,
}

impl ErrorSource {
    /// Creates a new failing source.
    pub fn new(name: impl Into<String>, error: ProviderError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

impl CalendarSource for ErrorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_upcoming_events<'a>(
        &'a self,
        _credential: &'a Credential,
        _calendar_ids: &'a [String],
        _window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<EventSnapshot>>> {
        let error =
            ProviderError::new(self.error.code(), self.error.message()).with_provider(&self.name);
        Box::pin(async move { Err(error) })
    }
}
