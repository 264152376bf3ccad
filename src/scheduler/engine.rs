//! Scheduler engine — persisted job store plus the background fire loop.
//!
//! `SchedulerHandle` is a cheap clone over shared engine state. Admin
//! operations (add/modify/pause/resume/remove/list) go straight to the job
//! store; the tick loop polls for due jobs, advances their schedules, and
//! runs each fire through the execution wrapper on its own task so a slow
//! handler never stalls the loop or the admin API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::DatabaseError;
use crate::flow::FlowRunner;
use crate::handlers::HandlerRegistry;
use crate::scheduler::execute::job_execute;
use crate::scheduler::types::{Job, Trigger};
use crate::store::JobStore;

struct EngineInner {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    flow: Arc<dyn FlowRunner>,
    paused: AtomicBool,
}

/// Shared handle to the process scheduler engine.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<EngineInner>,
}

impl SchedulerHandle {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        flow: Arc<dyn FlowRunner>,
        start_paused: bool,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                registry,
                flow,
                paused: AtomicBool::new(start_paused),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub fn flow(&self) -> &Arc<dyn FlowRunner> {
        &self.inner.flow
    }

    // ── Engine state ────────────────────────────────────────────────

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    /// Stop firing jobs. Admin operations keep working.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Relaxed);
        info!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Relaxed);
        info!("Scheduler resumed");
    }

    pub fn state(&self) -> &'static str {
        if self.is_paused() { "paused" } else { "running" }
    }

    // ── Job administration ──────────────────────────────────────────

    /// Insert a job, replacing any existing job with the same id.
    pub async fn add_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.inner.store.upsert_job(job).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        self.inner.store.get_job(id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        self.inner.store.list_jobs().await
    }

    /// Update a job's kwargs and misfire grace in place without touching its
    /// schedule.
    pub async fn modify_job(
        &self,
        id: &str,
        kwargs: &Map<String, Value>,
        misfire_grace_secs: Option<u64>,
    ) -> Result<(), DatabaseError> {
        self.inner.store.update_job(id, kwargs, misfire_grace_secs).await
    }

    /// Replace a job's trigger, recomputing (or clearing) its next-run time.
    pub async fn reschedule_job(
        &self,
        id: &str,
        trigger: &Trigger,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        self.inner.store.update_trigger(id, trigger, next_run).await
    }

    /// Clear a job's next-run time so it stops firing until resumed.
    pub async fn pause_job(&self, id: &str) -> Result<Job, DatabaseError> {
        self.inner.store.set_next_run(id, None).await?;
        self.require_job(id).await
    }

    /// Recompute a paused job's next-run time from its trigger.
    pub async fn resume_job(&self, id: &str) -> Result<Job, DatabaseError> {
        let job = self.require_job(id).await?;
        let next = job.trigger.initial_next_run(Utc::now());
        self.inner.store.set_next_run(id, Some(next)).await?;
        self.require_job(id).await
    }

    pub async fn remove_job(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.store.remove_job(id).await
    }

    async fn require_job(&self, id: &str) -> Result<Job, DatabaseError> {
        self.inner
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "job".to_string(),
                id: id.to_string(),
            })
    }

    // ── Firing ──────────────────────────────────────────────────────

    /// Process all jobs whose next-run time has arrived.
    ///
    /// The schedule advances before the handler runs: one-shot jobs are
    /// garbage-collected, interval jobs get their next slot. A fire outside
    /// its misfire grace window is logged as missed and skipped; the
    /// schedule still advances.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        if self.is_paused() {
            return Ok(());
        }

        for job in self.inner.store.due_jobs(now).await? {
            let Some(scheduled) = job.next_run else {
                continue;
            };

            match job.trigger.next_run_after(now) {
                Some(next) => self.inner.store.set_next_run(&job.id, Some(next)).await?,
                // Fired one-shots are removed, not left behind paused.
                None => self.inner.store.remove_job(&job.id).await?,
            }

            if let Some(grace) = job.misfire_grace_time() {
                let late = (now - scheduled).to_std().unwrap_or(Duration::ZERO);
                if late > grace {
                    warn!(
                        job_id = %job.id,
                        scheduled = %scheduled,
                        late_secs = late.as_secs(),
                        "Job fire missed (outside misfire grace time)"
                    );
                    continue;
                }
            }

            info!(job_id = %job.id, handler = %job.handler, "Firing job");
            let scheduler = self.clone();
            tokio::spawn(async move {
                job_execute(&scheduler, &job.handler, &job.id, &job.kwargs).await;
            });
        }

        Ok(())
    }
}

/// Spawn the engine fire loop, polling every `interval`.
pub fn spawn_tick_loop(
    scheduler: SchedulerHandle,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = scheduler.tick(Utc::now()).await {
                error!("Scheduler tick failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::test_support::RecordingFlowRunner;
    use crate::store::LibSqlJobStore;

    async fn test_handle() -> SchedulerHandle {
        let store = Arc::new(LibSqlJobStore::new_memory().await.unwrap());
        SchedulerHandle::new(
            store,
            Arc::new(HandlerRegistry::new()),
            Arc::new(RecordingFlowRunner::new()),
            false,
        )
    }

    fn interval_job(id: &str, next_run: DateTime<Utc>) -> Job {
        let now = Utc::now();
        Job {
            id: id.to_string(),
            handler: "ErrorHandler".to_string(),
            kwargs: Map::new(),
            trigger: Trigger::Interval {
                period_secs: 3600,
                start_at: None,
            },
            misfire_grace_secs: None,
            next_run: Some(next_run),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn pause_and_resume_engine() {
        let handle = test_handle().await;
        assert_eq!(handle.state(), "running");
        handle.pause();
        assert_eq!(handle.state(), "paused");
        handle.resume();
        assert_eq!(handle.state(), "running");
    }

    #[tokio::test]
    async fn paused_engine_does_not_fire() {
        let handle = test_handle().await;
        handle.pause();

        let now = Utc::now();
        let job = interval_job("j1", now - chrono::Duration::seconds(5));
        handle.add_job(&job).await.unwrap();

        handle.tick(now).await.unwrap();
        // Schedule untouched: the due job is still due.
        let loaded = handle.get_job("j1").await.unwrap().unwrap();
        assert!(loaded.next_run.unwrap() <= now);
    }

    #[tokio::test]
    async fn tick_advances_interval_schedule() {
        let handle = test_handle().await;
        let now = Utc::now();
        handle
            .add_job(&interval_job("j1", now - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        handle.tick(now).await.unwrap();

        let loaded = handle.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.next_run, Some(now + chrono::Duration::seconds(3600)));
    }

    #[tokio::test]
    async fn tick_removes_fired_one_shot() {
        let handle = test_handle().await;
        let now = Utc::now();
        let mut job = interval_job("j1", now - chrono::Duration::seconds(1));
        job.trigger = Trigger::Once { run_at: None };
        handle.add_job(&job).await.unwrap();

        handle.tick(now).await.unwrap();
        assert!(handle.get_job("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn misfired_job_advances_without_firing() {
        let handle = test_handle().await;
        let now = Utc::now();
        let mut job = interval_job("j1", now - chrono::Duration::seconds(600));
        job.misfire_grace_secs = Some(60);
        handle.add_job(&job).await.unwrap();

        handle.tick(now).await.unwrap();

        let loaded = handle.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.next_run, Some(now + chrono::Duration::seconds(3600)));
    }

    #[tokio::test]
    async fn pause_job_clears_next_run_and_resume_restores_it() {
        let handle = test_handle().await;
        let now = Utc::now();
        handle
            .add_job(&interval_job("j1", now + chrono::Duration::seconds(30)))
            .await
            .unwrap();

        let paused = handle.pause_job("j1").await.unwrap();
        assert!(paused.next_run.is_none());

        let resumed = handle.resume_job("j1").await.unwrap();
        assert!(resumed.next_run.is_some());
    }

    #[tokio::test]
    async fn pause_missing_job_is_not_found() {
        let handle = test_handle().await;
        let err = handle.pause_job("nope").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
