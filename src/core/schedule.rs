//! Periodic triggers driving the pipeline jobs.
//!
//! Every trigger runs on its own loop, so a slow job never delays another
//! job's cadence. Each job kind has a guard: a firing (scheduled or manual)
//! that finds the guard taken is skipped rather than queued.

use crate::core::jobs::{JobKind, JobRunner, JobSummary};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every N minutes, aligned to multiples of N from local midnight.
    EveryMinutes(u32),
    /// Once a day at a local time of day.
    DailyAt(NaiveTime),
}

impl Cadence {
    /// First firing strictly after `now`, in the local time given by `offset`.
    pub fn next_after(&self, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let offset_secs = i64::from(offset.local_minus_utc());
        match self {
            Cadence::EveryMinutes(minutes) => {
                let period = i64::from((*minutes).max(1)) * 60;
                let local_secs = now.timestamp() + offset_secs;
                let next_local = (local_secs.div_euclid(period) + 1) * period;
                Utc.timestamp_opt(next_local - offset_secs, 0)
                    .single()
                    .unwrap_or(now + Duration::seconds(period))
            }
            Cadence::DailyAt(time) => {
                let local_date = now.with_timezone(&offset).date_naive();
                let mut candidate = Utc.from_utc_datetime(
                    &(local_date.and_time(*time) - Duration::seconds(offset_secs)),
                );
                while candidate <= now {
                    candidate += Duration::days(1);
                }
                candidate
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Uninitialized,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(JobSummary),
    /// Another run of the same job was in flight, or the scheduler is stopped.
    Skipped,
}

/// Wall-clock time advanced by tokio's timer from a single system clock reading.
#[derive(Debug, Clone, Copy)]
struct TimerClock {
    wall: DateTime<Utc>,
    at: Instant,
}

impl TimerClock {
    fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            at: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.wall + Duration::from_std(self.at.elapsed()).unwrap_or_default()
    }

    fn deadline(&self, wall: DateTime<Utc>) -> Instant {
        self.at + (wall - self.wall).to_std().unwrap_or_default()
    }
}

struct Inner {
    runner: Arc<dyn JobRunner>,
    triggers: Vec<(JobKind, Cadence)>,
    offset: FixedOffset,
    state: Mutex<SchedulerState>,
    guards: HashMap<JobKind, Arc<Mutex<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl Inner {
    fn try_claim(&self, kind: JobKind) -> Option<OwnedMutexGuard<()>> {
        self.guards.get(&kind)?.clone().try_lock_owned().ok()
    }

    async fn execute(&self, kind: JobKind) -> JobSummary {
        info!(job = %kind, "Running job");
        let summary = self.runner.run(kind).await;
        info!(
            job = %kind,
            processed = summary.processed,
            failed = summary.failed,
            "Job finished"
        );
        summary
    }
}

pub struct Scheduler {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    anchor: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        triggers: Vec<(JobKind, Cadence)>,
        offset: FixedOffset,
    ) -> Self {
        let guards = JobKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Mutex::new(()))))
            .collect();
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                runner,
                triggers,
                offset,
                state: Mutex::new(SchedulerState::Uninitialized),
                guards,
                stop_tx,
            }),
            handles: Mutex::new(Vec::new()),
            anchor: None,
        }
    }

    /// Uses `wall` instead of the system clock as the time at which `start` is called.
    pub fn anchored_at(mut self, wall: DateTime<Utc>) -> Self {
        self.anchor = Some(wall);
        self
    }

    pub async fn state(&self) -> SchedulerState {
        *self.inner.state.lock().await
    }

    /// Starts every trigger loop. Returns false if the scheduler was already started or stopped.
    pub async fn start(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if *state != SchedulerState::Uninitialized {
            debug!(state = ?*state, "Scheduler already initialized");
            return false;
        }

        let clock = TimerClock::starting_at(self.anchor.unwrap_or_else(Utc::now));
        let mut handles = self.handles.lock().await;
        for (kind, cadence) in &self.inner.triggers {
            let inner = Arc::clone(&self.inner);
            let stop_rx = self.inner.stop_tx.subscribe();
            handles.push(tokio::spawn(trigger_loop(inner, *kind, *cadence, clock, stop_rx)));
        }

        *state = SchedulerState::Running;
        info!(triggers = self.inner.triggers.len(), "Scheduler started");
        true
    }

    /// Runs a job immediately unless a run of the same kind is in flight.
    pub async fn run_now(&self, kind: JobKind) -> RunOutcome {
        let guard = {
            let state = self.inner.state.lock().await;
            if *state == SchedulerState::Stopped {
                warn!(job = %kind, "Scheduler stopped, not running job");
                return RunOutcome::Skipped;
            }
            match self.inner.try_claim(kind) {
                Some(guard) => guard,
                None => {
                    warn!(job = %kind, "Job already running, skipping");
                    return RunOutcome::Skipped;
                }
            }
        };

        let summary = self.inner.execute(kind).await;
        drop(guard);
        RunOutcome::Completed(summary)
    }

    /// Stops new firings and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopped;
        }
        self.inner.stop_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Trigger loop ended abnormally");
            }
        }

        // Manual runs hold their guard until done.
        for guard in self.inner.guards.values() {
            let _ = guard.lock().await;
        }
        info!("Scheduler stopped");
    }
}

async fn trigger_loop(
    inner: Arc<Inner>,
    kind: JobKind,
    cadence: Cadence,
    clock: TimerClock,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();
    let mut from = clock.now();

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let next = cadence.next_after(from, inner.offset);
        debug!(job = %kind, next = %next, "Next firing scheduled");

        tokio::select! {
            _ = tokio::time::sleep_until(clock.deadline(next)) => {
                while in_flight.try_join_next().is_some() {}

                match inner.try_claim(kind) {
                    Some(guard) => {
                        let inner = Arc::clone(&inner);
                        in_flight.spawn(async move {
                            inner.execute(kind).await;
                            drop(guard);
                        });
                    }
                    None => warn!(job = %kind, "Previous run still in progress, skipping firing"),
                }
                from = next.max(clock.now());
            }
            _ = stop_rx.changed() => break,
        }
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!(job = %kind, error = %e, "Job task failed");
        }
    }
    debug!(job = %kind, "Trigger loop exited");
}
