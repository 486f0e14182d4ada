//! [`CalendarSource`] implementation for Google Calendar.

use calnotify_core::{EventSnapshot, TimeWindow};
use chrono::Utc;
use tracing::{debug, info};

use crate::error::ProviderResult;
use crate::provider::{BoxFuture, CalendarSource, Credential, retain_upcoming};

use super::client::GoogleCalendarClient;
use super::config::GoogleConfig;

/// Fetches upcoming events from one or more Google calendars.
#[derive(Debug, Clone)]
pub struct GoogleCalendarSource {
    client: GoogleCalendarClient,
}

impl GoogleCalendarSource {
    /// Creates a source using the timeout from `config`.
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: GoogleCalendarClient::new(config.timeout)?,
        })
    }

    /// Creates a source around an existing client.
    pub fn with_client(client: GoogleCalendarClient) -> Self {
        Self { client }
    }

    async fn fetch(
        &self,
        credential: &Credential,
        calendar_ids: &[String],
        window: TimeWindow,
    ) -> ProviderResult<Vec<EventSnapshot>> {
        let mut events = Vec::new();
        for calendar_id in calendar_ids {
            let fetched = self
                .client
                .list_events(credential, calendar_id, window.start, window.end)
                .await?;
            events.extend(fetched);
        }

        let total = events.len();
        retain_upcoming(&mut events, Utc::now());
        debug!(
            calendars = calendar_ids.len(),
            total,
            upcoming = events.len(),
            "filtered fetched events"
        );
        info!(count = events.len(), "fetched upcoming events");
        Ok(events)
    }
}

impl CalendarSource for GoogleCalendarSource {
    fn name(&self) -> &str {
        "google"
    }

    fn fetch_upcoming_events<'a>(
        &'a self,
        credential: &'a Credential,
        calendar_ids: &'a [String],
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<EventSnapshot>>> {
        Box::pin(async move {
            self.fetch(credential, calendar_ids, window)
                .await
                .map_err(|e| e.with_provider("google"))
        })
    }
}
