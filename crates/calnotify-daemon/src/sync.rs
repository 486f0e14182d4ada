//! The sync loop.
//!
//! Startup acquires a credential (fatal on failure), reconciles once, and
//! registers a recurring reconciliation job. After that the loop polls the
//! scheduler once per `poll_interval` and executes whatever is due:
//! notification jobs and the periodic reconciliation. Everything runs on one
//! task; the only suspension points are the calendar fetch and the sleep
//! between polls.

use std::time::Duration;

use calnotify_core::TimeWindow;
use calnotify_providers::{CalendarSource, CredentialProvider, ProviderError};
use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, DaemonResult};
use crate::notify::{Dispatcher, Notifier};
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::scheduler::{Clock, DueJob, JobHandle, Scheduler, SystemClock};
use crate::signals::Shutdown;

/// Payload of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Announce the tracked event with this id.
    Notify { event_id: String },
    /// Fetch and reconcile.
    Reconcile,
}

/// Timing of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Time between reconciliations.
    pub sync_interval: Duration,
    /// Sleep between scheduler polls.
    pub poll_interval: Duration,
    /// Upper bound on one calendar fetch.
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Health of the sync loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Events currently tracked.
    pub tracked_count: usize,
    /// Live scheduler jobs, the reconciliation job included.
    pub pending_jobs: usize,
    /// Last successful reconciliation.
    pub last_sync: Option<DateTime<Utc>>,
    /// Last reconciliation attempt.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Failed reconciliations since the last success.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl SyncStatus {
    fn record_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_sync = Some(at);
        self.last_attempt = Some(at);
        self.last_error = None;
    }

    fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_attempt = Some(at);
        self.last_error = Some(error.into());
    }
}

/// Drives fetching, reconciliation and notification.
pub struct SyncLoop<S, P, N, C: Clock = SystemClock> {
    config: SyncConfig,
    source: S,
    credentials: P,
    dispatcher: Dispatcher<N>,
    calendar_ids: Vec<String>,
    scheduler: Scheduler<Task, C>,
    reconciler: Reconciler,
    status: SyncStatus,
    reconcile_job: Option<JobHandle>,
}

impl<S, P, N> SyncLoop<S, P, N, SystemClock>
where
    S: CalendarSource,
    P: CredentialProvider,
    N: Notifier,
{
    pub fn new(
        config: SyncConfig,
        source: S,
        credentials: P,
        dispatcher: Dispatcher<N>,
        calendar_ids: Vec<String>,
    ) -> Self {
        Self::with_clock(config, source, credentials, dispatcher, calendar_ids, SystemClock)
    }
}

impl<S, P, N, C> SyncLoop<S, P, N, C>
where
    S: CalendarSource,
    P: CredentialProvider,
    N: Notifier,
    C: Clock,
{
    pub fn with_clock(
        config: SyncConfig,
        source: S,
        credentials: P,
        dispatcher: Dispatcher<N>,
        calendar_ids: Vec<String>,
        clock: C,
    ) -> Self {
        Self {
            config,
            source,
            credentials,
            dispatcher,
            calendar_ids,
            scheduler: Scheduler::with_clock(clock),
            reconciler: Reconciler::new(),
            status: SyncStatus::default(),
            reconcile_job: None,
        }
    }

    /// Acquires a credential, reconciles once and registers the recurring
    /// reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Auth`] when no credential can be obtained. A
    /// failing first fetch is logged and retried on the next interval.
    pub async fn start(&mut self) -> DaemonResult<()> {
        let credential = self.credentials.credential().await.map_err(DaemonError::Auth)?;

        info!(
            source = self.source.name(),
            calendars = ?self.calendar_ids,
            interval_secs = self.config.sync_interval.as_secs(),
            "sync loop starting"
        );

        let result = self.fetch_and_reconcile(&credential).await;
        self.record(&result);

        if self.reconcile_job.is_none() {
            let job = self
                .scheduler
                .schedule_every(self.config.sync_interval, Task::Reconcile);
            self.reconcile_job = Some(job);
        }
        Ok(())
    }

    /// Runs one reconciliation pass with a freshly obtained credential.
    ///
    /// On error the tracked events and their jobs are left untouched.
    pub async fn sync(&mut self) -> DaemonResult<ReconcileSummary> {
        let result = match self.credentials.credential().await {
            Ok(credential) => self.fetch_and_reconcile(&credential).await,
            Err(e) => Err(DaemonError::from_credential(e)),
        };
        self.record(&result);
        result
    }

    async fn fetch_and_reconcile(
        &mut self,
        credential: &calnotify_providers::Credential,
    ) -> DaemonResult<ReconcileSummary> {
        let local_now = self.local_now();
        let window = TimeWindow::today(local_now);
        debug!(start = %window.start, end = %window.end, "fetching events");

        let fetch = self
            .source
            .fetch_upcoming_events(credential, &self.calendar_ids, window);
        let events = match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
            Ok(result) => result.map_err(DaemonError::Fetch)?,
            Err(_) => {
                return Err(DaemonError::Fetch(
                    ProviderError::timeout(format!(
                        "no response within {}s",
                        self.config.fetch_timeout.as_secs()
                    ))
                    .with_provider(self.source.name()),
                ));
            }
        };

        Ok(self
            .reconciler
            .reconcile(&events, &mut self.scheduler, local_now.with_timezone(&Utc)))
    }

    fn record(&mut self, result: &DaemonResult<ReconcileSummary>) {
        let at = self.local_now().with_timezone(&Utc);
        match result {
            Ok(_) => self.status.record_success(at),
            Err(e) => {
                self.status.record_failure(at, e.to_string());
                warn!(
                    error = %e,
                    failures = self.status.consecutive_failures,
                    "reconciliation failed, keeping current schedule"
                );
            }
        }
    }

    /// Executes every due job. Returns how many ran.
    ///
    /// A failing job is logged and does not affect the others.
    pub async fn run_pending(&mut self) -> usize {
        let due = self.scheduler.run_pending();
        let count = due.len();
        for job in due {
            let handle = job.handle;
            if let Err(e) = self.execute(job).await {
                error!(job = %handle, error = %e, "job failed");
            }
        }
        count
    }

    async fn execute(&mut self, job: DueJob<Task>) -> DaemonResult<()> {
        match job.payload {
            Task::Notify { event_id } => {
                let tracked = self
                    .reconciler
                    .mark_fired(&event_id, job.handle)
                    .ok_or_else(|| {
                        DaemonError::job(job.handle, format!("event {} is not tracked", event_id))
                    })?;
                debug!(event_id = %event_id, job = %job.handle, "notification due");
                self.dispatcher.notify_event(&tracked.event);
                Ok(())
            }
            Task::Reconcile => {
                // Failures are recorded and logged by `sync`.
                let _ = self.sync().await;
                Ok(())
            }
        }
    }

    /// Starts, then polls until `shutdown` is triggered.
    ///
    /// # Errors
    ///
    /// Only startup failures are returned.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> DaemonResult<()> {
        self.start().await?;

        while !shutdown.is_triggered() {
            self.run_pending().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.wait() => {}
            }
        }

        let status = self.status();
        info!(
            tracked = status.tracked_count,
            pending_jobs = status.pending_jobs,
            "sync loop stopped"
        );
        Ok(())
    }

    /// Returns a snapshot of the loop's health.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            tracked_count: self.reconciler.len(),
            pending_jobs: self.scheduler.len(),
            ..self.status.clone()
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &Scheduler<Task, C> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Dispatcher<N> {
        &self.dispatcher
    }

    fn local_now(&self) -> DateTime<Local> {
        let naive = self.scheduler.clock().now();
        Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(|| naive.and_utc().with_timezone(&Local))
    }
}
