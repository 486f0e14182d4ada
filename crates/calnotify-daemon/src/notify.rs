//! Desktop notifications for starting events.
//!
//! The [`Dispatcher`] renders an event into a [`Notification`] and hands it
//! to a [`Notifier`]. Delivery failures are logged and swallowed: a firing
//! counts as delivered whether or not the desktop accepted it.

use std::time::Duration;

use calnotify_core::EventSnapshot;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult};

/// Notification settings, the `[notifications]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Application name reported to the notification server.
    pub app_name: String,
    /// How long the notification stays on screen.
    pub timeout_secs: u32,
    /// Icon name or path.
    pub icon: Option<String>,
    /// Append the event location to the body.
    pub include_location: bool,
    /// Master switch. When off, firings are logged only.
    pub enabled: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            app_name: "calnotify".to_string(),
            timeout_secs: 15,
            icon: Some("calendar".to_string()),
            include_location: true,
            enabled: true,
        }
    }
}

impl NotifyConfig {
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_location(mut self, include: bool) -> Self {
        self.include_location = include;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub app_name: String,
    pub summary: String,
    pub body: String,
    pub timeout: Duration,
    pub icon: Option<String>,
}

/// Something that can put a notification on screen.
pub trait Notifier {
    /// Shows `notification`.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Notify`] when the notification server is
    /// unavailable or rejects the request.
    fn show(&self, notification: &Notification) -> DaemonResult<()>;
}

/// Freedesktop/macOS/Windows notifications through `notify-rust`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn show(&self, notification: &Notification) -> DaemonResult<()> {
        let mut desktop = notify_rust::Notification::new();
        desktop
            .appname(&notification.app_name)
            .summary(&notification.summary)
            .body(&notification.body)
            .timeout(notification.timeout);

        if let Some(ref icon) = notification.icon {
            desktop.icon(icon);
        }

        desktop
            .show()
            .map(|_| ())
            .map_err(|e| DaemonError::Notify(e.to_string()))
    }
}

/// Turns firings into notifications.
#[derive(Debug)]
pub struct Dispatcher<N> {
    config: NotifyConfig,
    notifier: N,
}

impl<N: Notifier> Dispatcher<N> {
    pub fn new(config: NotifyConfig, notifier: N) -> Self {
        Self { config, notifier }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Announces `event`. The body is its description, followed by its
    /// location when configured.
    pub fn notify_event(&self, event: &EventSnapshot) {
        let mut body = event.description.clone().unwrap_or_default();
        if self.config.include_location
            && let Some(location) = event.location.as_deref().filter(|l| !l.is_empty())
        {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(location);
        }

        self.notify(&event.title, &body, &event.time_label());
    }

    /// Shows `title` with `body` preceded by `time_label`.
    ///
    /// Never fails; delivery errors are logged.
    pub fn notify(&self, title: &str, body: &str, time_label: &str) {
        if !self.config.enabled {
            debug!(title, time_label, "notifications disabled, skipping");
            return;
        }

        let notification = self.render(title, body, time_label);
        match self.notifier.show(&notification) {
            Ok(()) => info!(title, time_label, "notification sent"),
            Err(e) => warn!(error = %e, title, "failed to send notification"),
        }
    }

    fn render(&self, title: &str, body: &str, time_label: &str) -> Notification {
        let body = if body.is_empty() {
            time_label.to_string()
        } else {
            format!("{}\n{}", time_label, body)
        };

        Notification {
            app_name: self.config.app_name.clone(),
            summary: title.to_string(),
            body,
            timeout: Duration::from_secs(u64::from(self.config.timeout_secs)),
            icon: self.config.icon.clone(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use chrono::{Local, TimeZone};

    fn event() -> EventSnapshot {
        let start = Local.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        EventSnapshot::new("planning", "Weekly planning", start)
    }

    fn dispatcher(config: NotifyConfig) -> Dispatcher<RecordingNotifier> {
        Dispatcher::new(config, RecordingNotifier::default())
    }

    fn last_body(dispatcher: &Dispatcher<RecordingNotifier>) -> String {
        dispatcher.notifier().shown.borrow().last().unwrap().body.clone()
    }

    #[test]
    fn config_defaults() {
        let config = NotifyConfig::default();
        assert_eq!(config.app_name, "calnotify");
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.icon.as_deref(), Some("calendar"));
        assert!(config.include_location);
        assert!(config.enabled);
    }

    #[test]
    fn body_with_time_only() {
        let dispatcher = dispatcher(NotifyConfig::default());
        dispatcher.notify_event(&event());
        insta::assert_snapshot!(last_body(&dispatcher), @"14:00");

        let shown = dispatcher.notifier().shown.borrow();
        assert_eq!(shown[0].summary, "Weekly planning");
        assert_eq!(shown[0].timeout, Duration::from_secs(15));
        assert_eq!(shown[0].app_name, "calnotify");
    }

    #[test]
    fn body_with_description_and_location() {
        let dispatcher = dispatcher(NotifyConfig::default());
        let event = event()
            .with_description("Review the roadmap")
            .with_location("Room 4");
        dispatcher.notify_event(&event);
        insta::assert_snapshot!(last_body(&dispatcher), @r"
        14:00
        Review the roadmap
        Room 4
        ");
    }

    #[test]
    fn location_can_be_hidden() {
        let dispatcher = dispatcher(NotifyConfig::default().with_location(false));
        dispatcher.notify_event(&event().with_location("Room 4"));
        insta::assert_snapshot!(last_body(&dispatcher), @"14:00");
    }

    #[test]
    fn location_without_description() {
        let dispatcher = dispatcher(NotifyConfig::default());
        dispatcher.notify_event(&event().with_location("Room 4"));
        insta::assert_snapshot!(last_body(&dispatcher), @r"
        14:00
        Room 4
        ");
    }

    #[test]
    fn disabled_sends_nothing() {
        let dispatcher = dispatcher(NotifyConfig::default().with_enabled(false));
        dispatcher.notify("Title", "", "09:00");
        assert!(dispatcher.notifier().shown.borrow().is_empty());
    }

    #[test]
    fn failures_are_swallowed() {
        let dispatcher = Dispatcher::new(NotifyConfig::default(), RecordingNotifier::failing());
        dispatcher.notify("Title", "Body", "09:00");
        assert_eq!(dispatcher.notifier().summaries(), vec!["Title".to_string()]);
    }

    #[test]
    fn custom_icon_and_timeout() {
        let config = NotifyConfig::default()
            .with_icon(None)
            .with_timeout(5)
            .with_app_name("cal");
        let dispatcher = dispatcher(config);
        dispatcher.notify("T", "", "10:30");

        let shown = dispatcher.notifier().shown.borrow();
        assert_eq!(shown[0].icon, None);
        assert_eq!(shown[0].timeout, Duration::from_secs(5));
        assert_eq!(shown[0].app_name, "cal");
    }

    #[test]
    fn config_from_toml() {
        let config: NotifyConfig = toml::from_str("timeout_secs = 30\nenabled = false").unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.enabled);
        assert_eq!(config.app_name, "calnotify");
    }
}
