//! Reconciliation of tracked events against a fresh fetch.
//!
//! [`diff`] compares the tracked collection with a fetched snapshot list and
//! produces a [`ReconcilePlan`] without side effects. [`Reconciler::reconcile`]
//! applies a plan: it schedules, cancels and re-points notification jobs so
//! that every tracked event has at most one live job.
//!
//! Notification jobs carry only the event id. The display fields are read
//! from the collection when the job fires, so a title or description change
//! never needs a new job.

use std::collections::{BTreeMap, HashSet};

use calnotify_core::EventSnapshot;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info};

use crate::scheduler::{Clock, JobHandle, Scheduler};
use crate::sync::Task;

/// An event the reconciler has seen, with its notification job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEvent {
    /// The most recently observed snapshot.
    pub event: EventSnapshot,
    /// The live notification job, if any. Cleared when the job fires.
    pub scheduled_job: Option<JobHandle>,
}

impl TrackedEvent {
    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.event.start_time
    }
}

/// The changes one reconciliation pass would make.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Ids seen for the first time.
    pub added: Vec<EventSnapshot>,
    /// Known ids whose start time changed.
    pub rescheduled: Vec<EventSnapshot>,
    /// Known ids with the same start time but different display fields.
    pub refreshed: Vec<EventSnapshot>,
    /// Tracked ids absent from the fetch.
    pub removed: Vec<String>,
    /// Tracked ids absent from the fetch that already started and still
    /// wait for their notification.
    pub retained: Vec<String>,
}

impl ReconcilePlan {
    /// Returns true if applying the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.rescheduled.is_empty()
            && self.refreshed.is_empty()
            && self.removed.is_empty()
    }
}

/// Computes the changes needed to bring `tracked` in line with `fresh`.
///
/// When `fresh` holds the same id more than once, the first occurrence wins.
/// An id missing from `fresh` is removed unless it started at or before `now`
/// and `job_due` reports its notification job as due but not yet fired. A job
/// that was pushed to the next day never holds its event back.
pub fn diff(
    tracked: &BTreeMap<String, TrackedEvent>,
    fresh: &[EventSnapshot],
    now: DateTime<Utc>,
    job_due: impl Fn(JobHandle) -> bool,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(fresh.len());

    for snapshot in fresh {
        if !seen.insert(snapshot.id.as_str()) {
            debug!(event_id = %snapshot.id, "duplicate event id in fetch ignored");
            continue;
        }

        match tracked.get(&snapshot.id) {
            None => plan.added.push(snapshot.clone()),
            Some(current) if current.start_time() != snapshot.start_time => {
                plan.rescheduled.push(snapshot.clone())
            }
            Some(current) if current.event.display_differs(snapshot) => {
                plan.refreshed.push(snapshot.clone())
            }
            Some(_) => {}
        }
    }

    for (id, event) in tracked {
        if seen.contains(id.as_str()) {
            continue;
        }
        let started = event.start_time() <= now;
        if started && event.scheduled_job.is_some_and(&job_due) {
            plan.retained.push(id.clone());
        } else {
            plan.removed.push(id.clone());
        }
    }

    plan
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub rescheduled: usize,
    pub refreshed: usize,
    pub removed: usize,
    pub retained: usize,
    /// Size of the collection after the pass.
    pub tracked: usize,
}

/// Owner of the tracked-event collection.
#[derive(Debug, Default)]
pub struct Reconciler {
    events: BTreeMap<String, TrackedEvent>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one pass: diffs `fresh` against the collection and applies the
    /// result to the collection and `scheduler`.
    pub fn reconcile<C: Clock>(
        &mut self,
        fresh: &[EventSnapshot],
        scheduler: &mut Scheduler<Task, C>,
        now: DateTime<Utc>,
    ) -> ReconcileSummary {
        let clock_now = scheduler.clock().now();
        let plan = diff(&self.events, fresh, now, |job| {
            scheduler.next_run(job).is_some_and(|at| at <= clock_now)
        });
        let summary = self.apply(plan, scheduler);
        info!(
            added = summary.added,
            rescheduled = summary.rescheduled,
            refreshed = summary.refreshed,
            removed = summary.removed,
            retained = summary.retained,
            tracked = summary.tracked,
            "reconciled events"
        );
        summary
    }

    /// Applies a plan produced by [`diff`].
    pub fn apply<C: Clock>(
        &mut self,
        plan: ReconcilePlan,
        scheduler: &mut Scheduler<Task, C>,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary {
            added: plan.added.len(),
            rescheduled: plan.rescheduled.len(),
            refreshed: plan.refreshed.len(),
            removed: plan.removed.len(),
            retained: plan.retained.len(),
            tracked: 0,
        };

        for snapshot in plan.added {
            let job = schedule_notification(scheduler, &snapshot);
            debug!(
                event_id = %snapshot.id,
                job = %job,
                fire_time = %snapshot.fire_time(),
                "tracking new event"
            );
            self.events.insert(
                snapshot.id.clone(),
                TrackedEvent {
                    event: snapshot,
                    scheduled_job: Some(job),
                },
            );
        }

        for snapshot in plan.rescheduled {
            let Some(tracked) = self.events.get_mut(&snapshot.id) else {
                continue;
            };
            if let Some(old) = tracked.scheduled_job.take() {
                scheduler.cancel(old);
            }
            let job = schedule_notification(scheduler, &snapshot);
            debug!(
                event_id = %snapshot.id,
                from = %tracked.start_time(),
                to = %snapshot.start_time,
                job = %job,
                "event moved"
            );
            tracked.event = snapshot;
            tracked.scheduled_job = Some(job);
        }

        for snapshot in plan.refreshed {
            if let Some(tracked) = self.events.get_mut(&snapshot.id) {
                debug!(event_id = %snapshot.id, "event details changed");
                tracked.event = snapshot;
            }
        }

        for id in plan.removed {
            if let Some(tracked) = self.events.remove(&id) {
                if let Some(job) = tracked.scheduled_job {
                    scheduler.cancel(job);
                }
                debug!(event_id = %id, "stopped tracking event");
            }
        }

        summary.tracked = self.events.len();
        summary
    }

    /// Records that `job` fired for `event_id`.
    ///
    /// Returns the event when `job` is its current notification job, and
    /// `None` for unknown ids and superseded jobs.
    pub fn mark_fired(&mut self, event_id: &str, job: JobHandle) -> Option<&TrackedEvent> {
        let tracked = self.events.get_mut(event_id)?;
        if tracked.scheduled_job != Some(job) {
            return None;
        }
        tracked.scheduled_job = None;
        Some(tracked)
    }

    pub fn get(&self, event_id: &str) -> Option<&TrackedEvent> {
        self.events.get(event_id)
    }

    pub fn events(&self) -> impl Iterator<Item = &TrackedEvent> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn schedule_notification<C: Clock>(
    scheduler: &mut Scheduler<Task, C>,
    snapshot: &EventSnapshot,
) -> JobHandle {
    scheduler.schedule_daily_at_once(
        snapshot.fire_time(),
        Task::Notify {
            event_id: snapshot.id.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;
    use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};

    fn local(h: u32, m: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(&day().and_hms_opt(h, m, 0).unwrap())
            .earliest()
            .unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn naive(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    fn snapshot(id: &str, h: u32, m: u32) -> EventSnapshot {
        EventSnapshot::new(id, format!("Event {}", id), local(h, m))
    }

    fn setup(h: u32, m: u32) -> (ManualClock, Scheduler<Task, ManualClock>, Reconciler) {
        let clock = ManualClock::new(naive(h, m, 0));
        let scheduler = Scheduler::with_clock(clock.clone());
        (clock, scheduler, Reconciler::new())
    }

    fn now(h: u32, m: u32) -> DateTime<Utc> {
        local(h, m).with_timezone(&Utc)
    }

    fn job_of(reconciler: &Reconciler, id: &str) -> JobHandle {
        reconciler.get(id).and_then(|e| e.scheduled_job).unwrap()
    }

    #[test]
    fn add_unchanged_then_move() {
        let (_clock, mut scheduler, mut reconciler) = setup(8, 0);

        let summary = reconciler.reconcile(&[snapshot("a", 14, 0)], &mut scheduler, now(8, 0));
        assert_eq!(summary.added, 1);
        assert_eq!(reconciler.len(), 1);
        assert_eq!(reconciler.get("a").unwrap().start_time(), local(14, 0).fixed_offset());
        let first = job_of(&reconciler, "a");
        assert_eq!(scheduler.next_run(first), Some(naive(14, 0, 0)));
        assert_eq!(scheduler.len(), 1);

        let summary = reconciler.reconcile(&[snapshot("a", 14, 0)], &mut scheduler, now(8, 10));
        assert_eq!(summary, ReconcileSummary { tracked: 1, ..Default::default() });
        assert_eq!(job_of(&reconciler, "a"), first);
        assert_eq!(scheduler.len(), 1);

        let summary = reconciler.reconcile(&[snapshot("a", 15, 30)], &mut scheduler, now(8, 20));
        assert_eq!(summary.rescheduled, 1);
        let second = job_of(&reconciler, "a");
        assert_ne!(first, second);
        assert!(!scheduler.is_scheduled(first));
        assert_eq!(scheduler.next_run(second), Some(naive(15, 30, 0)));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(reconciler.get("a").unwrap().start_time(), local(15, 30).fixed_offset());
    }

    #[test]
    fn same_start_time_events_are_independent() {
        let (clock, mut scheduler, mut reconciler) = setup(8, 0);
        let fresh = [snapshot("a", 9, 0), snapshot("b", 9, 0)];
        reconciler.reconcile(&fresh, &mut scheduler, now(8, 0));

        let a = job_of(&reconciler, "a");
        let b = job_of(&reconciler, "b");
        assert_ne!(a, b);

        clock.set(naive(9, 0, 0));
        let due = scheduler.run_pending();
        let ids: Vec<_> = due
            .iter()
            .map(|job| match &job.payload {
                Task::Notify { event_id } => event_id.as_str(),
                Task::Reconcile => "reconcile",
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_ids_first_wins() {
        let tracked = BTreeMap::new();
        let fresh = [snapshot("a", 10, 0), snapshot("a", 11, 0)];
        let plan = diff(&tracked, &fresh, now(8, 0), |_| false);
        assert_eq!(plan.added.len(), 1);
        assert_eq!(plan.added[0].start_time, local(10, 0).fixed_offset());
    }

    #[test]
    fn display_change_needs_no_job() {
        let (_clock, mut scheduler, mut reconciler) = setup(8, 0);
        reconciler.reconcile(&[snapshot("a", 14, 0)], &mut scheduler, now(8, 0));
        let job = job_of(&reconciler, "a");

        let renamed = snapshot("a", 14, 0)
            .with_description("Agenda attached")
            .with_location("Room 2");
        let summary = reconciler.reconcile(&[renamed], &mut scheduler, now(8, 10));
        assert_eq!(summary.refreshed, 1);
        assert_eq!(job_of(&reconciler, "a"), job);
        assert_eq!(scheduler.len(), 1);

        let tracked = reconciler.get("a").unwrap();
        assert_eq!(tracked.event.description.as_deref(), Some("Agenda attached"));
        assert_eq!(tracked.event.location.as_deref(), Some("Room 2"));
    }

    #[test]
    fn vanished_event_is_removed_and_cancelled() {
        let (_clock, mut scheduler, mut reconciler) = setup(8, 0);
        reconciler.reconcile(
            &[snapshot("a", 14, 0), snapshot("b", 16, 0)],
            &mut scheduler,
            now(8, 0),
        );
        let b = job_of(&reconciler, "b");

        let summary = reconciler.reconcile(&[snapshot("a", 14, 0)], &mut scheduler, now(8, 10));
        assert_eq!(summary.removed, 1);
        assert!(reconciler.get("b").is_none());
        assert!(!scheduler.is_scheduled(b));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn started_event_waits_for_its_notification() {
        // Starts at 14:00:30, so it fires at 14:00 but drops out of a fetch
        // taken at 14:00:45 before the poll that would fire it.
        let (clock, mut scheduler, mut reconciler) = setup(13, 0);
        let start = local(14, 0) + chrono::Duration::seconds(30);
        reconciler.reconcile(
            &[EventSnapshot::new("a", "Sync", start)],
            &mut scheduler,
            now(13, 0),
        );
        let job = job_of(&reconciler, "a");

        clock.set(naive(14, 0, 45));
        let after_start = start.with_timezone(&Utc) + chrono::Duration::seconds(15);
        let summary = reconciler.reconcile(&[], &mut scheduler, after_start);
        assert_eq!(summary.retained, 1);
        assert_eq!(summary.removed, 0);
        assert!(scheduler.is_scheduled(job));

        // Once fired, the next pass lets it go.
        assert!(reconciler.mark_fired("a", job).is_some());
        let summary = reconciler.reconcile(&[], &mut scheduler, after_start);
        assert_eq!(summary.removed, 1);
        assert!(reconciler.is_empty());
    }

    #[test]
    fn past_event_pushed_to_tomorrow_is_dropped_when_it_vanishes() {
        // Seen for the first time after it started, so its job sits at
        // tomorrow's 09:00.
        let (clock, mut scheduler, mut reconciler) = setup(10, 0);
        reconciler.reconcile(&[snapshot("a", 9, 0)], &mut scheduler, now(10, 0));
        let job = job_of(&reconciler, "a");
        let tomorrow = day().succ_opt().unwrap();
        assert_eq!(scheduler.next_run(job), Some(tomorrow.and_hms_opt(9, 0, 0).unwrap()));

        clock.set(naive(10, 10, 0));
        let summary = reconciler.reconcile(&[], &mut scheduler, now(10, 10));
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.retained, 0);
        assert!(reconciler.is_empty());
        assert!(!scheduler.is_scheduled(job));

        clock.set(tomorrow.and_hms_opt(9, 0, 0).unwrap());
        assert!(scheduler.run_pending().is_empty());
    }

    #[test]
    fn diff_retains_only_due_jobs() {
        let (_clock, mut scheduler, mut reconciler) = setup(8, 0);
        reconciler.reconcile(&[snapshot("a", 9, 0)], &mut scheduler, now(8, 0));
        let job = job_of(&reconciler, "a");

        let plan = diff(&reconciler.events, &[], now(9, 5), |_| false);
        assert_eq!(plan.removed, vec!["a".to_string()]);

        let plan = diff(&reconciler.events, &[], now(9, 5), |j| j == job);
        assert_eq!(plan.retained, vec!["a".to_string()]);
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn mark_fired_ignores_superseded_jobs() {
        let (_clock, mut scheduler, mut reconciler) = setup(8, 0);
        reconciler.reconcile(&[snapshot("a", 14, 0)], &mut scheduler, now(8, 0));
        let old = job_of(&reconciler, "a");
        reconciler.reconcile(&[snapshot("a", 15, 0)], &mut scheduler, now(8, 10));

        assert!(reconciler.mark_fired("a", old).is_none());
        assert!(reconciler.mark_fired("missing", old).is_none());

        let current = job_of(&reconciler, "a");
        let fired = reconciler.mark_fired("a", current).unwrap();
        assert_eq!(fired.scheduled_job, None);
    }

    #[test]
    fn at_most_one_job_per_event() {
        let (_clock, mut scheduler, mut reconciler) = setup(8, 0);
        let passes: [&[(&str, u32, u32)]; 5] = [
            &[("a", 10, 0), ("b", 11, 0)],
            &[("a", 10, 30), ("b", 11, 0), ("c", 12, 0)],
            &[("a", 10, 30), ("c", 12, 15)],
            &[("b", 13, 0), ("a", 10, 0), ("a", 10, 45)],
            &[],
        ];

        for (i, pass) in passes.iter().enumerate() {
            let fresh: Vec<_> = pass.iter().map(|(id, h, m)| snapshot(id, *h, *m)).collect();
            reconciler.reconcile(&fresh, &mut scheduler, now(8, i as u32));

            let live: Vec<_> = reconciler
                .events()
                .filter_map(|e| e.scheduled_job)
                .collect();
            assert_eq!(live.len(), reconciler.len());
            assert_eq!(scheduler.len(), live.len());
            assert!(live.iter().all(|job| scheduler.is_scheduled(*job)));
        }
        assert!(reconciler.is_empty());
    }

    #[test]
    fn diff_on_empty_is_empty() {
        let plan = diff(&BTreeMap::new(), &[], now(8, 0), |_| false);
        assert!(plan.is_empty());
        assert!(plan.retained.is_empty());
    }
}
