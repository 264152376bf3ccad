//! Execution wrapper around job handlers.
//!
//! Every fire goes through `job_execute`. A handler failure never tears down
//! the engine; instead the failure context is persisted as a paused job of
//! `ErrorHandler`, so operators can inspect and retry it later. A failure of
//! `ErrorHandler` itself is only logged, never wrapped again, which caps the
//! recursion at depth one.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::error_chain;
use crate::handlers::{ErrorHandler, HandlerContext, is_failed_job_handler_name};
use crate::scheduler::engine::SchedulerHandle;
use crate::scheduler::types::{Job, Trigger};

/// Run a handler for a fired job, converting failure into an error job.
///
/// Returns the id of the created error job when the handler failed and its
/// failure was recorded.
pub async fn job_execute(
    scheduler: &SchedulerHandle,
    handler_name: &str,
    job_id: &str,
    kwargs: &Map<String, Value>,
) -> Option<String> {
    let ctx = HandlerContext::new(Some(job_id.to_string()), scheduler.flow().clone());

    let outcome = match scheduler.registry().instantiate(handler_name, ctx) {
        Some(handler) => handler.execute(kwargs).await,
        None => Err(crate::error::HandlerError::Other(format!(
            "Handler '{handler_name}' is not registered"
        ))),
    };

    let err = match outcome {
        Ok(()) => {
            info!(job_id = %job_id, handler = %handler_name, "Job executed");
            return None;
        }
        Err(err) => err,
    };

    error!(
        job_id = %job_id,
        handler = %handler_name,
        error = %err,
        "Job handler failed"
    );

    // The failed-job record handler gets no record of its own.
    if is_failed_job_handler_name(handler_name) {
        return None;
    }

    let mut failure_kwargs = Map::new();
    failure_kwargs.insert("exc_str".to_string(), Value::String(err.to_string()));
    failure_kwargs.insert(
        "exc_traceback".to_string(),
        Value::String(error_chain(&err)),
    );
    failure_kwargs.insert(
        "failed_job_id".to_string(),
        Value::String(job_id.to_string()),
    );
    failure_kwargs.insert(
        "failed_job_handler".to_string(),
        Value::String(handler_name.to_string()),
    );
    failure_kwargs.insert(
        "failed_handler_kwargs".to_string(),
        Value::Object(kwargs.clone()),
    );

    let now = Utc::now();
    let error_job = Job {
        id: Uuid::new_v4().to_string(),
        handler: ErrorHandler::NAME.to_string(),
        kwargs: failure_kwargs,
        trigger: Trigger::Once { run_at: None },
        misfire_grace_secs: None,
        // Paused on creation: inspected by operators, never auto-fired.
        next_run: None,
        created_at: now,
        updated_at: now,
    };

    if let Err(store_err) = scheduler.add_job(&error_job).await {
        error!(
            job_id = %job_id,
            error = %store_err,
            "Failed to persist error job for failed handler"
        );
        return None;
    }

    info!(
        job_id = %job_id,
        error_job_id = %error_job.id,
        "Recorded failed job"
    );
    Some(error_job.id)
}
