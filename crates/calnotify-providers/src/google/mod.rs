//! Google Calendar backend.
//!
//! - [`GoogleCredentials`] hands out bearer tokens from a token file and
//!   refreshes them through Google's token endpoint.
//! - [`GoogleCalendarSource`] lists today's events of the configured calendars.
//!
//! The first token pair has to be obtained out of band and written to the
//! token file (see [`TokenInfo`] for the format).
//!
//! # Example
//!
//! ```ignore
//! use calnotify_providers::google::{GoogleConfig, GoogleCredentials, GoogleCalendarSource};
//!
//! let config = GoogleConfig::new(OAuthCredentials::from_file("client.json")?);
//! let credentials = GoogleCredentials::new(&config)?;
//! let source = GoogleCalendarSource::new(&config)?;
//!
//! let credential = credentials.credential().await?;
//! let events = source
//!     .fetch_upcoming_events(&credential, &["primary".into()], TimeWindow::today(Local::now()))
//!     .await?;
//! ```

mod auth;
mod client;
mod config;
mod source;
mod tokens;

pub use auth::GoogleCredentials;
pub use client::GoogleCalendarClient;
pub use config::{GoogleConfig, OAuthCredentials};
pub use source::GoogleCalendarSource;
pub use tokens::{TokenInfo, TokenStorage};
