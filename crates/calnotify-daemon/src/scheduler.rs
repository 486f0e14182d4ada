//! Cooperative job scheduler.
//!
//! The scheduler is a registry of jobs keyed by [`JobHandle`]. Each job has a
//! [`Schedule`] (a wall-clock time of day, or a fixed interval), a
//! [`JobKind`] and a payload. It never runs anything itself:
//! [`Scheduler::run_pending`] hands back the jobs that are due and the owner
//! executes them. This keeps the owner free to mutate the scheduler while it
//! handles a job.
//!
//! Time comes from a [`Clock`], so tests can drive the scheduler with a
//! [`ManualClock`] instead of sleeping.
//!
//! Missed periods are not caught up. A recurring job that was due several
//! times while nobody polled fires once and moves to its next occurrence after
//! the current time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calnotify_core::{truncate_datetime_to_minute, truncate_to_minute};
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use tracing::{debug, trace};

/// Opaque reference to a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(u64);

impl JobHandle {
    #[cfg(test)]
    pub(crate) const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at this local time, minute granularity.
    DailyAt(NaiveTime),
    /// Every `Duration`, starting one period after registration.
    Every(Duration),
}

/// Whether a job survives its first firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Removed from the registry when it fires.
    OneShot,
    /// Rescheduled to its next occurrence when it fires.
    Recurring,
}

/// A job returned by [`Scheduler::run_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueJob<T> {
    pub handle: JobHandle,
    pub kind: JobKind,
    /// The fire time the job was due at.
    pub scheduled_for: NaiveDateTime,
    pub payload: T,
}

/// Source of local wall-clock time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// The system's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = add_duration(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct Job<T> {
    schedule: Schedule,
    kind: JobKind,
    next_run: NaiveDateTime,
    payload: T,
}

/// Registry of one-shot and recurring jobs.
#[derive(Debug)]
pub struct Scheduler<T, C: Clock = SystemClock> {
    clock: C,
    jobs: BTreeMap<JobHandle, Job<T>>,
    next_id: u64,
}

impl<T> Scheduler<T, SystemClock> {
    /// Creates a scheduler on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<T> Default for Scheduler<T, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: Clock> Scheduler<T, C> {
    /// Creates a scheduler reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            jobs: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Returns the clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Registers a job and returns its handle.
    pub fn schedule(&mut self, schedule: Schedule, kind: JobKind, payload: T) -> JobHandle {
        let handle = JobHandle(self.next_id);
        self.next_id += 1;

        let next_run = first_run(schedule, self.clock.now());
        debug!(job = %handle, ?schedule, ?kind, %next_run, "scheduled job");

        self.jobs.insert(
            handle,
            Job {
                schedule,
                kind,
                next_run,
                payload,
            },
        );
        handle
    }

    /// Runs every day at `time`.
    ///
    /// A time earlier than the current minute is first due tomorrow. A time
    /// within the current minute is due at the next poll.
    pub fn schedule_daily_at(&mut self, time: NaiveTime, payload: T) -> JobHandle {
        self.schedule(Schedule::DailyAt(time), JobKind::Recurring, payload)
    }

    /// Runs once, at the next occurrence of `time`.
    pub fn schedule_daily_at_once(&mut self, time: NaiveTime, payload: T) -> JobHandle {
        self.schedule(Schedule::DailyAt(time), JobKind::OneShot, payload)
    }

    /// Runs every `interval`, first one interval from now.
    pub fn schedule_every(&mut self, interval: Duration, payload: T) -> JobHandle {
        self.schedule(Schedule::Every(interval), JobKind::Recurring, payload)
    }

    /// Removes a job.
    ///
    /// Returns false if the handle was unknown, already cancelled, or a
    /// one-shot that already fired.
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        let removed = self.jobs.remove(&handle).is_some();
        if removed {
            debug!(job = %handle, "cancelled job");
        } else {
            trace!(job = %handle, "cancel of inactive job ignored");
        }
        removed
    }

    pub fn is_scheduled(&self, handle: JobHandle) -> bool {
        self.jobs.contains_key(&handle)
    }

    /// Returns when the job is next due.
    pub fn next_run(&self, handle: JobHandle) -> Option<NaiveDateTime> {
        self.jobs.get(&handle).map(|job| job.next_run)
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<T: Clone, C: Clock> Scheduler<T, C> {
    /// Collects every job due at or before now, in fire-time order.
    ///
    /// One-shot jobs leave the registry. Recurring jobs move to their next
    /// occurrence strictly after now.
    pub fn run_pending(&mut self) -> Vec<DueJob<T>> {
        let now = self.clock.now();

        let mut due: Vec<(NaiveDateTime, JobHandle)> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.next_run <= now)
            .map(|(handle, job)| (job.next_run, *handle))
            .collect();
        due.sort_unstable();

        let mut fired = Vec::with_capacity(due.len());
        for (scheduled_for, handle) in due {
            let Some(kind) = self.jobs.get(&handle).map(|job| job.kind) else {
                continue;
            };

            match kind {
                JobKind::OneShot => {
                    if let Some(job) = self.jobs.remove(&handle) {
                        fired.push(DueJob {
                            handle,
                            kind,
                            scheduled_for,
                            payload: job.payload,
                        });
                    }
                }
                JobKind::Recurring => {
                    let Some(job) = self.jobs.get_mut(&handle) else {
                        continue;
                    };
                    job.next_run = next_after(job.schedule, now);
                    trace!(job = %handle, next_run = %job.next_run, "rescheduled job");
                    fired.push(DueJob {
                        handle,
                        kind: JobKind::Recurring,
                        scheduled_for,
                        payload: job.payload.clone(),
                    });
                }
            }
        }

        if !fired.is_empty() {
            debug!(count = fired.len(), %now, "jobs due");
        }
        fired
    }
}

fn add_duration(at: NaiveDateTime, by: Duration) -> NaiveDateTime {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(NaiveDateTime::MAX)
}

fn first_run(schedule: Schedule, now: NaiveDateTime) -> NaiveDateTime {
    match schedule {
        Schedule::DailyAt(time) => {
            let today = now.date().and_time(truncate_to_minute(time));
            if today < truncate_datetime_to_minute(now) {
                today + TimeDelta::days(1)
            } else {
                today
            }
        }
        Schedule::Every(interval) => add_duration(now, interval),
    }
}

fn next_after(schedule: Schedule, now: NaiveDateTime) -> NaiveDateTime {
    match schedule {
        Schedule::DailyAt(time) => {
            let today = now.date().and_time(truncate_to_minute(time));
            if today > now {
                today
            } else {
                today + TimeDelta::days(1)
            }
        }
        Schedule::Every(interval) => add_duration(now, interval),
    }
}
