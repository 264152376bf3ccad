//! REST surface of the jobs service.
//!
//! Thin layer over the scheduler: every admin route takes the process-wide
//! scheduler lock, performs one lifecycle or engine operation, and renders
//! jobs in the external raw-dict shape (`job_id`, `handler`, `kwargs`,
//! `state`, `when`, `periodically`, `misfire_grace_time`).

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use crate::error::{DatabaseError, Error};
use crate::handlers::{
    FlowScheduling, HandlerContext, JobHandler, SelectiveFlowScheduling,
    is_failed_job_handler_name,
};
use crate::scheduler::{
    Job, JobSpec, SchedulerHandle, Trigger, facade::scheduler_lock, schedule_job,
};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/service/state", get(get_service_state))
        .route("/api/v1/service/state", put(put_service_state))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs", post(post_job))
        .route("/api/v1/jobs/clean-failed", delete(clean_failed_jobs))
        .route("/api/v1/jobs/{id}", put(put_job_state))
        .route("/api/v1/jobs/{id}", delete(delete_job))
        .route("/api/v1/flow-scheduling", post(post_flow_scheduling))
        .route(
            "/api/v1/selective-flow-scheduling",
            post(post_selective_flow_scheduling),
        )
        .route("/readiness", get(readiness))
        .route("/liveness", get(liveness))
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

fn map_error(err: Error) -> ApiError {
    match &err {
        Error::Config(_) | Error::Schedule(_) => error_response(StatusCode::BAD_REQUEST, err),
        Error::Database(DatabaseError::NotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, err)
        }
        _ => {
            error!(error = %err, "Request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

fn map_db_error(err: DatabaseError) -> ApiError {
    map_error(Error::Database(err))
}

/// Render a seconds count in the duration-expression form accepted on input.
fn format_duration_expr(mut secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, factor) in [("d", 86400u64), ("h", 3600), ("m", 60), ("s", 1)] {
        let n = secs / factor;
        if n > 0 {
            out.push_str(&format!("{n}{unit}"));
            secs -= n * factor;
        }
    }
    out
}

/// External raw-dict rendering of a job.
fn job_to_dict(job: &Job) -> Value {
    let (when, periodically) = match &job.trigger {
        Trigger::Once { run_at } => (run_at.map(|d| d.to_rfc3339()), None),
        Trigger::Interval {
            period_secs,
            start_at,
        } => (
            start_at.map(|d| d.to_rfc3339()),
            Some(format_duration_expr(*period_secs)),
        ),
    };
    json!({
        "job_id": job.id,
        "handler": job.handler,
        "kwargs": job.kwargs,
        "state": job.state().to_string(),
        "when": when,
        "periodically": periodically,
        "misfire_grace_time": job.misfire_grace_secs.map(format_duration_expr),
    })
}

// ── Service state ───────────────────────────────────────────────────

async fn get_service_state(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "state": state.scheduler.state() }))
}

#[derive(Deserialize)]
struct StateQuery {
    state: String,
}

async fn put_service_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<Value>, ApiError> {
    let _guard = scheduler_lock().await;
    match query.state.as_str() {
        "running" => state.scheduler.resume(),
        "paused" => state.scheduler.pause(),
        other => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown state '{other}' provided, could be 'running' or 'paused'"),
            ));
        }
    }
    Ok(Json(json!({ "state": state.scheduler.state() })))
}

// ── Jobs ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    job_type: Option<String>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let _guard = scheduler_lock().await;
    let jobs = state.scheduler.list_jobs().await.map_err(map_db_error)?;

    let job_type = query.job_type.as_deref().unwrap_or("all");
    let filtered: Vec<&Job> = match job_type {
        "all" => jobs.iter().collect(),
        "failed" => jobs
            .iter()
            .filter(|j| is_failed_job_handler_name(&j.handler))
            .collect(),
        "user" => jobs
            .iter()
            .filter(|j| !is_failed_job_handler_name(&j.handler))
            .collect(),
        other => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown job type '{other}', could be 'all', 'failed' or 'user'"),
            ));
        }
    };

    Ok(Json(json!({
        "jobs": filtered.iter().map(|j| job_to_dict(j)).collect::<Vec<_>>(),
        "jobs_count": filtered.len(),
    })))
}

#[derive(Deserialize)]
struct ScheduleBody {
    handler: String,
    #[serde(flatten)]
    spec: JobSpec,
}

async fn post_job(
    State(state): State<AppState>,
    Json(body): Json<ScheduleBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let _guard = scheduler_lock().await;
    let job = schedule_job(&state.scheduler, &body.handler, body.spec)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(job_to_dict(&job))))
}

async fn put_job_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StateQuery>,
) -> Result<Json<Value>, ApiError> {
    let _guard = scheduler_lock().await;
    let job = match query.state.as_str() {
        "paused" => state.scheduler.pause_job(&id).await,
        "running" => state.scheduler.resume_job(&id).await,
        other => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown state '{other}' provided, could be 'running' or 'paused'"),
            ));
        }
    }
    .map_err(map_db_error)?;
    Ok(Json(job_to_dict(&job)))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let _guard = scheduler_lock().await;
    state.scheduler.remove_job(&id).await.map_err(map_db_error)?;
    Ok(Json(json!({ "removed": id })))
}

async fn clean_failed_jobs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let _guard = scheduler_lock().await;
    let jobs = state.scheduler.list_jobs().await.map_err(map_db_error)?;

    let mut removed = 0usize;
    for job in jobs
        .iter()
        .filter(|j| is_failed_job_handler_name(&j.handler))
    {
        state
            .scheduler
            .remove_job(&job.id)
            .await
            .map_err(map_db_error)?;
        removed += 1;
    }
    Ok(Json(json!({ "removed_count": removed })))
}

// ── Handler-specific scheduling ─────────────────────────────────────

async fn post_flow_scheduling(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let _guard = scheduler_lock().await;
    let job = schedule_job(&state.scheduler, FlowScheduling::NAME, spec)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(job_to_dict(&job))))
}

async fn post_selective_flow_scheduling(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let _guard = scheduler_lock().await;
    let job = schedule_job(&state.scheduler, SelectiveFlowScheduling::NAME, spec)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(job_to_dict(&job))))
}

// ── Probes ──────────────────────────────────────────────────────────

async fn readiness() -> Json<Value> {
    Json(json!({}))
}

/// Liveness exercises the whole dispatch path by starting a liveness flow
/// through the regular handler machinery.
async fn liveness(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ctx = HandlerContext::new(None, state.scheduler.flow().clone());
    let handler = FlowScheduling::new(ctx);
    let kwargs = json!({
        "flow_name": "livenessFlow",
        "flow_arguments": [{}],
    });
    let kwargs = kwargs.as_object().cloned().unwrap_or_default();

    handler
        .execute(&kwargs)
        .await
        .map_err(|e| map_error(Error::Handler(e)))?;
    Ok(Json(json!({})))
}
