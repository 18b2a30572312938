//! Periodic scheduler: fires registered jobs on calendar triggers.
//!
//! The scheduler only submits. It keeps a minute cursor and, on each tick,
//! fires every job whose trigger matched a minute in `(cursor, now]`.
//! A job fires at most once per tick, however many minutes it missed.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::trigger::{CalendarTrigger, TriggerError};
use crate::app::TaskHandle;
use crate::config::{ConfigError, ScheduleZone, SchedulerConfig};
use crate::domain::JobId;
use crate::ports::Clock;
use crate::queue::Engine;

/// Missed minutes older than this are not evaluated.
const MAX_CATCH_UP_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("job '{job_id}': {source}")]
    Trigger {
        job_id: JobId,
        #[source]
        source: TriggerError,
    },

    #[error("job '{job_id}' targets unregistered task '{task_name}'")]
    UnknownTask { job_id: JobId, task_name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A periodic job registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub job_id: JobId,
    pub trigger: CalendarTrigger,
    pub task_name: String,
    pub args: serde_json::Value,
}

impl ScheduledJob {
    pub fn new(
        job_id: impl Into<JobId>,
        trigger_expr: &str,
        task_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Result<Self, ScheduleError> {
        let job_id = job_id.into();
        let trigger = CalendarTrigger::parse(trigger_expr).map_err(|source| {
            ScheduleError::Trigger {
                job_id: job_id.clone(),
                source,
            }
        })?;
        Ok(Self {
            job_id,
            trigger,
            task_name: task_name.into(),
            args,
        })
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(ChronoDuration::minutes(1)).unwrap_or(t)
}

pub struct Scheduler<C: Clock> {
    engine: Engine,
    zone: ScheduleZone,
    clock: C,
    jobs: Vec<ScheduledJob>,
    cursor: DateTime<Utc>,
}

impl<C: Clock> Scheduler<C> {
    /// The cursor starts at the current minute, so that minute never fires.
    pub fn new(engine: Engine, config: &SchedulerConfig, clock: C) -> Result<Self, ScheduleError> {
        let zone = config.zone()?;
        let cursor = truncate_to_minute(clock.now());
        Ok(Self {
            engine,
            zone,
            clock,
            jobs: Vec::new(),
            cursor,
        })
    }

    /// Register a job. An existing job with the same id is replaced.
    pub fn add_job(
        &mut self,
        job_id: impl Into<JobId>,
        trigger_expr: &str,
        task_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Result<(), ScheduleError> {
        let job = ScheduledJob::new(job_id, trigger_expr, task_name, args)?;
        self.insert(job)
    }

    pub fn insert(&mut self, job: ScheduledJob) -> Result<(), ScheduleError> {
        if !self.engine.registry().contains(&job.task_name) {
            return Err(ScheduleError::UnknownTask {
                job_id: job.job_id,
                task_name: job.task_name,
            });
        }
        info!(job = %job.job_id, trigger = %job.trigger, task = %job.task_name, "job registered");
        match self.jobs.iter_mut().find(|j| j.job_id == job.job_id) {
            Some(existing) => *existing = job,
            None => self.jobs.push(job),
        }
        Ok(())
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn zone(&self) -> ScheduleZone {
        self.zone
    }

    /// Fire every job due in `(cursor, now]`, then advance the cursor.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<(JobId, TaskHandle)> {
        let end = truncate_to_minute(now);
        if end <= self.cursor {
            return Vec::new();
        }
        let earliest = end - ChronoDuration::minutes(MAX_CATCH_UP_MINUTES - 1);
        let start = (self.cursor + ChronoDuration::minutes(1)).max(earliest);
        self.cursor = end;

        let mut fired = Vec::new();
        for job in &self.jobs {
            if !Self::due(&job.trigger, self.zone, start, end) {
                continue;
            }
            match self
                .engine
                .submit_by_name(&job.task_name, job.args.clone())
                .await
            {
                Ok(handle) => {
                    debug!(job = %job.job_id, task_id = %handle.id(), "job fired");
                    fired.push((job.job_id.clone(), handle));
                }
                Err(e) => {
                    error!(job = %job.job_id, task = %job.task_name, error = %e, "job submission failed");
                }
            }
        }
        fired
    }

    fn due(
        trigger: &CalendarTrigger,
        zone: ScheduleZone,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> bool {
        let mut minute = start;
        while minute <= end {
            let fires = match zone {
                ScheduleZone::Named(tz) => trigger.matches(&minute.with_timezone(&tz)),
                ScheduleZone::Fixed(offset) => trigger.matches(&minute.with_timezone(&offset)),
            };
            if fires {
                return true;
            }
            minute += ChronoDuration::minutes(1);
        }
        false
    }

    /// Spawn the background loop.
    pub fn start(mut self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        info!(jobs = self.jobs.len(), zone = %self.zone, "Task scheduler started");

        let join = tokio::spawn(async move {
            loop {
                let now = self.clock.now();
                let next_minute = truncate_to_minute(now) + ChronoDuration::minutes(1);
                let wait = (next_minute - now).to_std().unwrap_or_default();

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                let now = self.clock.now();
                self.tick(now).await;
            }
            info!("Task scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, join }
    }
}

/// Start a scheduler with `jobs` if `config.enabled`.
pub fn maybe_start<C: Clock>(
    engine: Engine,
    config: &SchedulerConfig,
    clock: C,
    jobs: Vec<ScheduledJob>,
) -> Result<Option<SchedulerHandle>, ScheduleError> {
    if !config.enabled {
        info!("Task scheduler disabled");
        return Ok(None);
    }
    let mut scheduler = Scheduler::new(engine, config, clock)?;
    for job in jobs {
        scheduler.insert(job)?;
    }
    Ok(Some(scheduler.start()))
}

/// Owner of a running scheduler loop.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
