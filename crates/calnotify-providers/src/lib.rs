//! Calendar sources and credential providers.
//!
//! - [`CalendarSource`] - fetches upcoming [`EventSnapshot`](calnotify_core::EventSnapshot)s
//! - [`CredentialProvider`] - supplies a valid bearer [`Credential`]
//! - [`ProviderError`] - error type shared by both
//!
//! The Google implementation lives in [`google`] behind the `google` feature.

pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod provider;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use provider::{
    BoxFuture, CalendarSource, Credential, CredentialProvider, ErrorSource, StaticCredentials,
    retain_upcoming,
};
