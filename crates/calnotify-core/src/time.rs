//! Time helpers for calendar fetches and minute-granular scheduling.
//!
//! [`TimeWindow`] describes the range a calendar source is queried for. The
//! daemon always asks for the current local day, midnight to midnight.

use chrono::{
    DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

/// A time window for querying calendar events.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window, or `None` if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Creates a time window covering one calendar day in the given timezone.
    ///
    /// Midnight is resolved with [`local_midnight`], so days that begin inside
    /// a DST gap still produce a window.
    pub fn for_date<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Self {
        let next = date.succ_opt().unwrap_or(date);
        Self {
            start: local_midnight(date, tz),
            end: local_midnight(next, tz),
        }
    }

    /// Creates the window for the local day containing `now`.
    pub fn today(now: DateTime<Local>) -> Self {
        Self::for_date(now.date_naive(), &Local)
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    ///
    /// Uses half-open interval semantics: `[start, end)`.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }
}

/// Returns the first instant of `date` in `tz`, as UTC.
///
/// Ambiguous midnights resolve to the earlier instant. A midnight skipped by a
/// DST transition is treated as UTC wall-clock time.
pub fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => midnight.and_utc(),
    }
}

/// Drops seconds and sub-second precision from a time of day.
pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/// Drops seconds and sub-second precision from a wall-clock datetime.
pub fn truncate_datetime_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(truncate_to_minute(dt.time()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn creation() {
        let start = utc(2025, 2, 5, 9, 0, 0);
        let end = utc(2025, 2, 5, 17, 0, 0);
        let window = TimeWindow::new(start, end).unwrap();
        assert_eq!(window.start, start);
        assert_eq!(window.end, end);
        assert_eq!(window.duration(), Duration::hours(8));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let start = utc(2025, 2, 5, 17, 0, 0);
        let end = utc(2025, 2, 5, 9, 0, 0);
        assert!(TimeWindow::new(start, end).is_none());
    }

    #[test]
    fn contains_is_half_open() {
        let window =
            TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0)).unwrap();

        assert!(window.contains(utc(2025, 2, 5, 10, 0, 0)));
        assert!(window.contains(utc(2025, 2, 5, 9, 0, 0)));
        assert!(!window.contains(utc(2025, 2, 5, 17, 0, 0)));
        assert!(!window.contains(utc(2025, 2, 5, 8, 59, 59)));
    }

    #[test]
    fn for_date_spans_one_day() {
        let window = TimeWindow::for_date(date(2025, 2, 5), &Utc);
        assert_eq!(window.start, utc(2025, 2, 5, 0, 0, 0));
        assert_eq!(window.end, utc(2025, 2, 6, 0, 0, 0));
        assert_eq!(window.duration(), Duration::hours(24));
    }

    #[test]
    fn for_date_with_offset() {
        let tz = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let window = TimeWindow::for_date(date(2025, 2, 5), &tz);
        assert_eq!(window.start, utc(2025, 2, 4, 22, 0, 0));
        assert_eq!(window.end, utc(2025, 2, 5, 22, 0, 0));
    }

    #[test]
    fn today_contains_now() {
        let now = Local::now();
        let window = TimeWindow::today(now);
        assert!(window.contains(now.with_timezone(&Utc)));
    }

    #[test]
    fn truncation() {
        let t = NaiveTime::from_hms_milli_opt(14, 7, 42, 500).unwrap();
        assert_eq!(truncate_to_minute(t), NaiveTime::from_hms_opt(14, 7, 0).unwrap());

        let dt = date(2025, 2, 5).and_time(t);
        assert_eq!(
            truncate_datetime_to_minute(dt),
            date(2025, 2, 5).and_hms_opt(14, 7, 0).unwrap()
        );
    }

    #[test]
    fn serde_roundtrip() {
        let window =
            TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0)).unwrap();
        let json = serde_json::to_string(&window).unwrap();
        let parsed: TimeWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(window, parsed);
    }
}
