//! Google Calendar API client.
//!
//! A thin HTTP layer over the `events.list` endpoint. The bearer token is
//! passed with every call so the same client survives token refreshes.

use std::time::Duration;

use calnotify_core::EventSnapshot;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::Credential;

/// Base URL for Google Calendar API v3.
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Page size requested from the API.
const PAGE_SIZE: usize = 250;

/// Google Calendar API client.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarClient {
    /// Creates a new client with the given request timeout.
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            base_url: CALENDAR_API_BASE.to_string(),
        })
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Lists timed events of one calendar whose start lies in
    /// `[time_min, time_max)`, following pagination.
    ///
    /// Recurring events are expanded into their instances. Cancelled events,
    /// events without an id, and all-day events are dropped.
    pub async fn list_events(
        &self,
        credential: &Credential,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> ProviderResult<Vec<EventSnapshot>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_events_page(
                    credential,
                    calendar_id,
                    time_min,
                    time_max,
                    page_token.as_deref(),
                )
                .await?;

            events.extend(
                page.items
                    .into_iter()
                    .filter_map(|event| convert_event(event, calendar_id)),
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(calendar_id, count = events.len(), "fetched events");
        Ok(events)
    }

    async fn list_events_page(
        &self,
        credential: &Credential,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> ProviderResult<EventListResponse> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        );

        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(credential.access_token())
            .query(&[
                ("timeMin", time_min.to_rfc3339()),
                ("timeMax", time_max.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout("request timeout")
            } else if e.is_connect() {
                ProviderError::network(format!("connection failed: {}", e))
            } else {
                ProviderError::network(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(ProviderError::rate_limited(format!(
                "rate limit exceeded{}",
                retry_after
                    .map(|s| format!(", retry after {} seconds", s))
                    .unwrap_or_default()
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, calendar_id, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        parse_event_list(&body)
    }
}

fn status_error(status: reqwest::StatusCode, calendar_id: &str, body: &str) -> ProviderError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED => {
            ProviderError::authentication("access token expired or invalid")
        }
        reqwest::StatusCode::FORBIDDEN => {
            ProviderError::authorization(format!("access denied to calendar {}", calendar_id))
        }
        reqwest::StatusCode::NOT_FOUND => {
            ProviderError::not_found(format!("calendar {} not found", calendar_id))
        }
        _ => ProviderError::server(format!("API error ({}): {}", status, body)),
    }
}

fn parse_event_list(body: &str) -> ProviderResult<EventListResponse> {
    serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_response(format!("failed to parse response: {}", e)))
}

fn convert_event(event: ApiEvent, calendar_id: &str) -> Option<EventSnapshot> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let id = event.id?;

    // All-day events carry only `date`; they never get a notification.
    let Some(date_time) = event.start.date_time else {
        debug!(
            event_id = %id,
            date = ?event.start.date,
            "skipping event without a start time"
        );
        return None;
    };

    let start = match DateTime::parse_from_rfc3339(&date_time) {
        Ok(start) => start,
        Err(e) => {
            warn!(event_id = %id, error = %e, "failed to parse start time");
            return None;
        }
    };

    let mut snapshot = EventSnapshot::new(id, event.summary.unwrap_or_default(), start)
        .with_calendar_id(calendar_id);
    if let Some(description) = event.description {
        snapshot = snapshot.with_description(description);
    }
    if let Some(location) = event.location {
        snapshot = snapshot.with_location(location);
    }
    Some(snapshot)
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    #[serde(default)]
    start: ApiEventTime,
    status: Option<String>,
}

/// Event time from the API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn parse_event_list_response() {
        let json = r#"{
            "items": [
                {
                    "id": "event1",
                    "summary": "Test Meeting",
                    "start": {
                        "dateTime": "2024-03-15T10:00:00Z"
                    },
                    "end": {
                        "dateTime": "2024-03-15T11:00:00Z"
                    },
                    "status": "confirmed"
                }
            ],
            "nextPageToken": "page-2"
        }"#;

        let response = parse_event_list(json).unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].summary, Some("Test Meeting".to_string()));
        assert_eq!(response.next_page_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn parse_invalid_response() {
        let err = parse_event_list("<html>").unwrap_err();
        assert_eq!(err.code(), crate::error::ProviderErrorCode::InvalidResponse);
    }

    #[test]
    fn parse_all_day_event() {
        let json = r#"{
            "id": "event1",
            "summary": "All Day Event",
            "start": {
                "date": "2024-03-15"
            },
            "end": {
                "date": "2024-03-16"
            }
        }"#;

        let event: ApiEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.start.date, Some("2024-03-15".to_string()));
        assert!(event.start.date_time.is_none());
        assert!(convert_event(event, "primary").is_none());
    }

    #[test]
    fn convert_timed_event() {
        let json = r#"{
            "id": "standup",
            "summary": "Standup",
            "description": "Daily sync",
            "location": "Room 4",
            "start": {
                "dateTime": "2024-03-15T09:30:00+02:00",
                "timeZone": "Europe/Paris"
            }
        }"#;

        let event: ApiEvent = serde_json::from_str(json).unwrap();
        let snapshot = convert_event(event, "work@example.com").unwrap();

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(snapshot.id, "standup");
        assert_eq!(snapshot.title, "Standup");
        assert_eq!(snapshot.description.as_deref(), Some("Daily sync"));
        assert_eq!(snapshot.location.as_deref(), Some("Room 4"));
        assert_eq!(
            snapshot.start_time,
            offset.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()
        );
        assert_eq!(snapshot.calendar_id, "work@example.com");
    }

    #[test]
    fn convert_skips_cancelled_and_anonymous() {
        let cancelled: ApiEvent = serde_json::from_str(
            r#"{"id": "x", "status": "cancelled", "start": {"dateTime": "2024-03-15T10:00:00Z"}}"#,
        )
        .unwrap();
        assert!(convert_event(cancelled, "primary").is_none());

        let anonymous: ApiEvent =
            serde_json::from_str(r#"{"start": {"dateTime": "2024-03-15T10:00:00Z"}}"#).unwrap();
        assert!(convert_event(anonymous, "primary").is_none());

        let no_start: ApiEvent = serde_json::from_str(r#"{"id": "y"}"#).unwrap();
        assert!(convert_event(no_start, "primary").is_none());
    }

    #[test]
    fn convert_untitled_event() {
        let event: ApiEvent = serde_json::from_str(
            r#"{"id": "z", "start": {"dateTime": "2024-03-15T10:00:00Z"}}"#,
        )
        .unwrap();
        let snapshot = convert_event(event, "primary").unwrap();
        assert_eq!(snapshot.title, calnotify_core::UNTITLED);
        assert!(snapshot.description.is_none());
    }

    #[test]
    fn status_mapping() {
        use crate::error::ProviderErrorCode;
        use reqwest::StatusCode;

        let cases = [
            (StatusCode::UNAUTHORIZED, ProviderErrorCode::AuthenticationFailed),
            (StatusCode::FORBIDDEN, ProviderErrorCode::AuthorizationFailed),
            (StatusCode::NOT_FOUND, ProviderErrorCode::NotFound),
            (StatusCode::BAD_GATEWAY, ProviderErrorCode::ServerError),
        ];
        for (status, code) in cases {
            assert_eq!(status_error(status, "primary", "").code(), code);
        }
    }
}
