//! Per-user session jobs.
//!
//! Each armed window is one tokio task that sleeps until each planned fire
//! and then hands a `TickRequest` to the tick worker. Jobs are keyed by
//! `tick:{user}:{window}` and cancelled by aborting their task.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::actors::tick_worker::{TickMessage, TickRequest};
use crate::clock::Clock;
use crate::domain::entities::UserId;
use crate::domain::services::session::{Cadence, PlannedWindow, TradingSession, WindowKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub user_id: UserId,
    pub window: WindowKind,
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tick:{}:{}", self.user_id, self.window)
    }
}

/// Public view of an armed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub key: String,
    pub user_id: UserId,
    pub window: WindowKind,
    /// `None` for one-shot jobs.
    pub interval_secs: Option<i64>,
    pub window_start: DateTime<Utc>,
    pub window_end: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<Utc>>,
    pub remaining_fires: usize,
}

struct ArmedJob {
    plan: PlannedWindow,
    handle: JoinHandle<()>,
}

impl ArmedJob {
    fn view(&self, key: JobKey, now: DateTime<Utc>) -> ScheduledJob {
        let upcoming: Vec<_> = self.plan.fires.iter().filter(|at| **at >= now).collect();
        ScheduledJob {
            key: key.to_string(),
            user_id: key.user_id,
            window: key.window,
            interval_secs: match self.plan.cadence {
                Cadence::OneShot => None,
                Cadence::Repeating { interval } => Some(interval.num_seconds()),
            },
            window_start: self.plan.window_start,
            window_end: self.plan.window_end,
            next_fire: upcoming.first().map(|at| **at),
            remaining_fires: upcoming.len(),
        }
    }
}

pub struct JobScheduler {
    session: TradingSession,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<TickMessage>,
    jobs: Mutex<HashMap<JobKey, ArmedJob>>,
}

impl JobScheduler {
    pub fn new(session: TradingSession, clock: Arc<dyn Clock>, tx: mpsc::Sender<TickMessage>) -> Self {
        Self {
            session,
            clock,
            tx,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &TradingSession {
        &self.session
    }

    /// The job table. A panic while the lock was held leaves the map itself
    /// consistent, so a poisoned lock is taken over rather than skipped.
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobKey, ArmedJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            warn!("Job table lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Arm today's remaining windows for `user_id`, replacing any existing jobs.
    ///
    /// Removal and insertion happen under one lock so concurrent calls for
    /// the same user never leave a running task without an entry.
    pub fn arm(&self, user_id: UserId) -> Vec<ScheduledJob> {
        let now = self.clock.now();
        let base = tokio::time::Instant::now();
        let plans = self.session.plan(now);

        let mut jobs = self.jobs();
        let replaced = remove_user_jobs(&mut jobs, user_id);

        let mut armed = Vec::with_capacity(plans.len());
        for plan in plans {
            let key = JobKey {
                user_id,
                window: plan.kind,
            };
            let handle = spawn_job(key, plan.fires.clone(), now, base, self.tx.clone());
            let job = ArmedJob { plan, handle };
            armed.push(job.view(key, now));
            if let Some(previous) = jobs.insert(key, job) {
                previous.handle.abort();
            }
        }

        info!(
            user_id,
            windows = armed.len(),
            replaced,
            "Armed session jobs"
        );
        armed
    }

    /// Cancel every job of `user_id`; returns how many were removed.
    pub fn disarm(&self, user_id: UserId) -> usize {
        let removed = remove_user_jobs(&mut self.jobs(), user_id);
        if removed > 0 {
            info!(user_id, jobs = removed, "Disarmed session jobs");
        }
        removed
    }

    /// Jobs still pending for `user_id`, in session order.
    pub fn scheduled_jobs(&self, user_id: UserId) -> Vec<ScheduledJob> {
        let now = self.clock.now();
        let jobs = self.jobs();
        let mut views: Vec<ScheduledJob> = jobs
            .iter()
            .filter(|(key, job)| key.user_id == user_id && !job.handle.is_finished())
            .map(|(key, job)| job.view(*key, now))
            .collect();
        views.sort_by_key(|job| job.window);
        views
    }

    pub fn disarm_all(&self) {
        for (_, job) in self.jobs().drain() {
            job.handle.abort();
        }
    }
}

fn remove_user_jobs(jobs: &mut HashMap<JobKey, ArmedJob>, user_id: UserId) -> usize {
    let keys: Vec<JobKey> = jobs.keys().filter(|k| k.user_id == user_id).copied().collect();
    for key in &keys {
        if let Some(job) = jobs.remove(key) {
            job.handle.abort();
            debug!("Cancelled job {}", key);
        }
    }
    keys.len()
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.disarm_all();
    }
}

fn spawn_job(
    key: JobKey,
    fires: Vec<DateTime<Utc>>,
    planned_at: DateTime<Utc>,
    base: tokio::time::Instant,
    tx: mpsc::Sender<TickMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for fire_at in fires {
            let offset = (fire_at - planned_at).to_std().unwrap_or_default();
            tokio::time::sleep_until(base + offset).await;

            let request = TickRequest {
                user_id: key.user_id,
                window: key.window,
                scheduled_for: fire_at,
            };
            if tx.send(TickMessage::Tick(request)).await.is_err() {
                debug!("Tick channel closed, stopping {}", key);
                break;
            }
        }
    })
}
