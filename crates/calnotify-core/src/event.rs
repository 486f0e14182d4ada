//! Event types for calendar events.
//!
//! [`EventSnapshot`] is the provider-agnostic shape a calendar source reports
//! for one event during a single fetch. Snapshots are not persisted: the
//! daemon compares each batch against what it already scheduled and throws
//! the batch away afterwards.

use chrono::{DateTime, FixedOffset, Local, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::time::truncate_to_minute;

/// Title used when the provider reports an empty or missing summary.
pub const UNTITLED: &str = "(No title)";

/// One calendar event as reported by a calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Stable identifier assigned by the calendar source.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Optional location.
    pub location: Option<String>,
    /// When the event starts, with the offset the provider reported.
    pub start_time: DateTime<FixedOffset>,
    /// The calendar this event was fetched from.
    pub calendar_id: String,
}

impl EventSnapshot {
    /// Creates a snapshot with the required fields.
    ///
    /// A blank title is replaced with [`UNTITLED`].
    pub fn new<Tz: TimeZone>(
        id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Tz>,
    ) -> Self {
        let title = title.into();
        let title = if title.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            title
        };

        Self {
            id: id.into(),
            title,
            description: None,
            location: None,
            start_time: start_time.fixed_offset(),
            calendar_id: "primary".to_string(),
        }
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder method to set the calendar id.
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    /// Returns the start time in the local timezone.
    pub fn local_start(&self) -> DateTime<Local> {
        self.start_time.with_timezone(&Local)
    }

    /// Returns the local wall-clock minute at which a reminder should fire.
    pub fn fire_time(&self) -> NaiveTime {
        truncate_to_minute(self.local_start().time())
    }

    /// Returns the `HH:MM` label shown in notifications.
    pub fn time_label(&self) -> String {
        self.local_start().format("%H:%M").to_string()
    }

    /// Returns true if the event starts strictly after `now`.
    pub fn starts_after(&self, now: DateTime<Utc>) -> bool {
        self.start_time > now
    }

    /// Returns true if any display field differs from `other`.
    pub fn display_differs(&self, other: &EventSnapshot) -> bool {
        self.title != other.title
            || self.description != other.description
            || self.location != other.location
    }
}
