//! Daemon: scheduler, reconciler, notifications, sync loop.
//!
//! The `calnotify` binary polls Google Calendar every ten minutes and shows a
//! desktop notification when each of today's events starts.
//!
//! # Example
//!
//! ```rust,no_run
//! use calnotify_daemon::{Dispatcher, DesktopNotifier, NotifyConfig, Shutdown, SyncConfig, SyncLoop};
//! use calnotify_providers::{ErrorSource, ProviderError, StaticCredentials};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = ErrorSource::new("offline", ProviderError::network("no network"));
//!     let mut sync = SyncLoop::new(
//!         SyncConfig::default(),
//!         source,
//!         StaticCredentials::new("token"),
//!         Dispatcher::new(NotifyConfig::default(), DesktopNotifier),
//!         vec!["primary".to_string()],
//!     );
//!     sync.run(Shutdown::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
mod config;
mod error;
mod notify;
mod reconcile;
mod scheduler;
mod signals;
mod sync;

pub use config::{DaemonConfig, GoogleSettings, SyncSettings, load_calendar_ids};
pub use error::{DaemonError, DaemonResult};
pub use notify::{DesktopNotifier, Dispatcher, Notification, Notifier, NotifyConfig};
pub use reconcile::{ReconcilePlan, ReconcileSummary, Reconciler, TrackedEvent, diff};
pub use scheduler::{
    Clock, DueJob, JobHandle, JobKind, ManualClock, Schedule, Scheduler, SystemClock,
};
pub use signals::Shutdown;
pub use sync::{SyncConfig, SyncLoop, SyncStatus, Task};
