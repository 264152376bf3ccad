//! libSQL job store — async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. The in-memory variant backs
//! the test suite; production points at the shared job store file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::scheduler::types::{Job, Trigger};
use crate::store::migrations;
use crate::store::traits::JobStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlJobStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlJobStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Job store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string, falling back to epoch on garbage rows.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn opt_rfc3339(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<u64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n as i64),
        None => libsql::Value::Null,
    }
}

const JOB_COLUMNS: &str =
    "id, handler, kwargs, trigger, misfire_grace_secs, next_run, created_at, updated_at";

/// Map a libsql Row to a Job.
///
/// Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("job row id: {e}")))?;
    let handler: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("job row handler: {e}")))?;
    let kwargs_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("job row kwargs: {e}")))?;
    let trigger_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("job row trigger: {e}")))?;
    let misfire_grace: Option<i64> = match row
        .get_value(4)
        .map_err(|e| DatabaseError::Query(format!("job row misfire_grace_secs: {e}")))?
    {
        libsql::Value::Null => None,
        libsql::Value::Integer(n) => Some(n),
        other => {
            return Err(DatabaseError::Serialization(format!(
                "job misfire_grace_secs: unexpected value {other:?}"
            )));
        }
    };
    let next_run_str: Option<String> = match row
        .get_value(5)
        .map_err(|e| DatabaseError::Query(format!("job row next_run: {e}")))?
    {
        libsql::Value::Null => None,
        libsql::Value::Text(s) => Some(s),
        other => {
            return Err(DatabaseError::Serialization(format!(
                "job next_run: unexpected value {other:?}"
            )));
        }
    };
    let created_str: String = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("job row created_at: {e}")))?;
    let updated_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("job row updated_at: {e}")))?;

    let kwargs: Map<String, Value> = serde_json::from_str(&kwargs_str)
        .map_err(|e| DatabaseError::Serialization(format!("job '{id}' kwargs: {e}")))?;
    let trigger: Trigger = serde_json::from_str(&trigger_str)
        .map_err(|e| DatabaseError::Serialization(format!("job '{id}' trigger: {e}")))?;

    Ok(Job {
        id,
        handler,
        kwargs,
        trigger,
        misfire_grace_secs: misfire_grace.map(|n| n as u64),
        next_run: next_run_str.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlJobStore {
    async fn upsert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let kwargs_json = serde_json::to_string(&job.kwargs)
            .map_err(|e| DatabaseError::Serialization(format!("kwargs: {e}")))?;
        let trigger_json = serde_json::to_string(&job.trigger)
            .map_err(|e| DatabaseError::Serialization(format!("trigger: {e}")))?;

        conn.execute(
            "INSERT INTO jobs (id, handler, kwargs, trigger, misfire_grace_secs, next_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                handler = excluded.handler,
                kwargs = excluded.kwargs,
                trigger = excluded.trigger,
                misfire_grace_secs = excluded.misfire_grace_secs,
                next_run = excluded.next_run,
                updated_at = excluded.updated_at",
            params![
                job.id.clone(),
                job.handler.clone(),
                kwargs_json,
                trigger_json,
                opt_int(job.misfire_grace_secs),
                opt_rfc3339(job.next_run),
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_job: {e}")))?;

        debug!(job_id = %job.id, handler = %job.handler, "Job stored");
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn update_job(
        &self,
        id: &str,
        kwargs: &Map<String, Value>,
        misfire_grace_secs: Option<u64>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let kwargs_json = serde_json::to_string(kwargs)
            .map_err(|e| DatabaseError::Serialization(format!("kwargs: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let n = conn
            .execute(
                "UPDATE jobs SET kwargs = ?1, misfire_grace_secs = ?2, updated_at = ?3 WHERE id = ?4",
                params![kwargs_json, opt_int(misfire_grace_secs), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_job: {e}")))?;

        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn update_trigger(
        &self,
        id: &str,
        trigger: &Trigger,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let trigger_json = serde_json::to_string(trigger)
            .map_err(|e| DatabaseError::Serialization(format!("trigger: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let n = conn
            .execute(
                "UPDATE jobs SET trigger = ?1, next_run = ?2, updated_at = ?3 WHERE id = ?4",
                params![trigger_json, opt_rfc3339(next_run), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_trigger: {e}")))?;

        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_next_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        let n = conn
            .execute(
                "UPDATE jobs SET next_run = ?1, updated_at = ?2 WHERE id = ?3",
                params![opt_rfc3339(next_run), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_next_run: {e}")))?;

        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn remove_job(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let n = conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_job: {e}")))?;

        if n == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job".to_string(),
                id: id.to_string(),
            });
        }
        debug!(job_id = %id, "Job removed");
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE next_run IS NOT NULL AND next_run <= ?1
                     ORDER BY next_run"
                ),
                params![now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("due_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::JobState;

    fn sample_job(id: &str) -> Job {
        let now = Utc::now();
        Job {
            id: id.to_string(),
            handler: "FlowScheduling".to_string(),
            kwargs: Map::new(),
            trigger: Trigger::Interval {
                period_secs: 3600,
                start_at: None,
            },
            misfire_grace_secs: None,
            next_run: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrip() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        let job = sample_job("j1");
        store.upsert_job(&job).await.unwrap();

        let loaded = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "j1");
        assert_eq!(loaded.handler, "FlowScheduling");
        assert_eq!(loaded.trigger, job.trigger);
        assert_eq!(loaded.state(), JobState::Active);
    }

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        store.upsert_job(&sample_job("j1")).await.unwrap();

        let mut replacement = sample_job("j1");
        replacement.handler = "ErrorHandler".to_string();
        store.upsert_job(&replacement).await.unwrap();

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].handler, "ErrorHandler");
    }

    #[tokio::test]
    async fn set_next_run_null_pauses() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        store.upsert_job(&sample_job("j1")).await.unwrap();

        store.set_next_run("j1", None).await.unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Paused);

        let due = store.due_jobs(Utc::now()).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn due_jobs_respects_next_run() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        let now = Utc::now();

        let mut past = sample_job("past");
        past.next_run = Some(now - chrono::Duration::seconds(10));
        store.upsert_job(&past).await.unwrap();

        let mut future = sample_job("future");
        future.next_run = Some(now + chrono::Duration::seconds(3600));
        store.upsert_job(&future).await.unwrap();

        let due = store.due_jobs(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "past");
    }

    #[tokio::test]
    async fn corrupt_next_run_column_surfaces_an_error() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        store.upsert_job(&sample_job("j1")).await.unwrap();

        // A non-text, non-null next_run must not read back as "paused".
        store
            .conn()
            .execute("UPDATE jobs SET next_run = x'DEADBEEF' WHERE id = 'j1'", ())
            .await
            .unwrap();

        let err = store.get_job("j1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(_)));
    }

    #[tokio::test]
    async fn remove_missing_job_is_not_found() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        let err = store.remove_job("nope").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_job_preserves_schedule() {
        let store = LibSqlJobStore::new_memory().await.unwrap();
        let job = sample_job("j1");
        let original_next = job.next_run;
        store.upsert_job(&job).await.unwrap();

        let mut kwargs = Map::new();
        kwargs.insert("count".to_string(), serde_json::json!(5));
        store.update_job("j1", &kwargs, Some(300)).await.unwrap();

        let loaded = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.next_run, original_next);
        assert_eq!(loaded.misfire_grace_secs, Some(300));
        assert_eq!(loaded.kwargs.get("count"), Some(&serde_json::json!(5)));
    }

    #[tokio::test]
    async fn local_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        {
            let store = LibSqlJobStore::new_local(&path).await.unwrap();
            store.upsert_job(&sample_job("j1")).await.unwrap();
        }
        let store = LibSqlJobStore::new_local(&path).await.unwrap();
        assert!(store.get_job("j1").await.unwrap().is_some());
    }
}
