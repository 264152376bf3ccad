//! `JobStore` trait — the persistence boundary of the scheduler.
//!
//! The scheduler engine never talks SQL directly; everything goes through
//! this trait so tests can run against an in-memory database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DatabaseError;
use crate::scheduler::types::{Job, Trigger};

/// Backend-agnostic durable storage for job definitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job, replacing any existing job with the same id.
    async fn upsert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by id.
    async fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError>;

    /// All jobs, ordered by creation time.
    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    /// Update a job's kwargs and misfire grace in place, leaving its
    /// schedule untouched.
    async fn update_job(
        &self,
        id: &str,
        kwargs: &Map<String, Value>,
        misfire_grace_secs: Option<u64>,
    ) -> Result<(), DatabaseError>;

    /// Replace a job's trigger and next-run time.
    async fn update_trigger(
        &self,
        id: &str,
        trigger: &Trigger,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    /// Set only the next-run time. `None` pauses the job.
    async fn set_next_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    /// Delete a job. `NotFound` if no such job exists.
    async fn remove_job(&self, id: &str) -> Result<(), DatabaseError>;

    /// Jobs whose next-run time has arrived (next_run <= now, not paused).
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError>;
}
