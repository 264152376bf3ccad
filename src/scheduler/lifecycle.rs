//! Job lifecycle — validated create-or-modify scheduling and default jobs.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ConfigError, Error, ScheduleJobError};
use crate::scheduler::engine::SchedulerHandle;
use crate::scheduler::types::{Job, JobSpec, Trigger, parse_duration_expr, parse_when};

/// Schedule a job from an external spec, creating it or modifying an
/// existing one.
///
/// Validation happens before any mutation, in a fixed order: state value,
/// handler name, `when`, `misfire_grace_time`, `periodically`. With
/// `modify_existing_job` set and a matching job present, kwargs and misfire
/// grace are updated in place; the schedule is replaced only when the
/// trigger meaningfully changed (kind change, one-shot run-time change, or
/// interval period change), so a pure kwargs update never shifts an interval
/// job's phase. Otherwise a new job is upserted, replacing any previous job
/// with the same id.
pub async fn schedule_job(
    scheduler: &SchedulerHandle,
    handler_name: &str,
    spec: JobSpec,
) -> Result<Job, Error> {
    let requested_paused = match spec.state.as_deref() {
        None | Some("running") => false,
        Some("paused") => true,
        Some(other) => return Err(ConfigError::UnknownJobState(other.to_string()).into()),
    };

    if !scheduler.registry().contains(handler_name) {
        return Err(ConfigError::UnknownHandler(handler_name.to_string()).into());
    }

    let when: Option<DateTime<Utc>> = match &spec.when {
        Some(raw) => Some(
            parse_when(raw).ok_or_else(|| ScheduleJobError::InvalidWhen(raw.clone()))?,
        ),
        None => None,
    };

    let misfire_grace_secs = match &spec.misfire_grace_time {
        Some(raw) => Some(
            parse_duration_expr(raw)
                .ok_or_else(|| ScheduleJobError::InvalidMisfireGraceTime(raw.clone()))?
                .as_secs(),
        ),
        None => None,
    };

    let trigger = match &spec.periodically {
        Some(raw) => {
            let period = parse_duration_expr(raw)
                .ok_or_else(|| ScheduleJobError::InvalidPeriodically(raw.clone()))?;
            let period_secs = period.as_secs();
            // A zero period would re-fire on every engine poll; an oversized
            // one overflows datetime arithmetic at fire time.
            let in_bounds = i64::try_from(period_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .is_some();
            if period_secs == 0 || !in_bounds {
                return Err(ScheduleJobError::InvalidPeriodically(raw.clone()).into());
            }
            Trigger::Interval {
                period_secs,
                start_at: when,
            }
        }
        None => Trigger::Once { run_at: when },
    };

    let now = Utc::now();
    let when_in_past = when.is_some_and(|w| w < now);
    let reject_past_when = || -> Result<(), Error> {
        if when_in_past {
            let raw = spec.when.clone().unwrap_or_default();
            return Err(ScheduleJobError::WhenInPast(raw).into());
        }
        Ok(())
    };

    let job_id = spec
        .job_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let existing = if spec.modify_existing_job {
        scheduler
            .get_job(&job_id)
            .await
            .map_err(|e| ScheduleJobError::Engine(e.to_string()))?
    } else {
        None
    };

    if let Some(current) = existing {
        let needs_reschedule = match (&current.trigger, &trigger) {
            (Trigger::Once { run_at: a }, Trigger::Once { run_at: b }) => a != b,
            (
                Trigger::Interval { period_secs: a, .. },
                Trigger::Interval { period_secs: b, .. },
            ) => a != b,
            _ => true,
        };
        // A period change between two interval triggers restarts the
        // schedule from now, so a stale `when` is not re-validated there.
        let reschedule_from_when = !matches!(
            (&current.trigger, &trigger),
            (Trigger::Interval { .. }, Trigger::Interval { .. })
        );
        if needs_reschedule && reschedule_from_when {
            reject_past_when()?;
        }

        scheduler
            .modify_job(&job_id, &spec.kwargs, misfire_grace_secs)
            .await
            .map_err(|e| ScheduleJobError::Engine(e.to_string()))?;

        if needs_reschedule {
            let next_run = if requested_paused {
                None
            } else {
                Some(trigger.initial_next_run(now))
            };
            scheduler
                .reschedule_job(&job_id, &trigger, next_run)
                .await
                .map_err(|e| ScheduleJobError::Engine(e.to_string()))?;
            info!(job_id = %job_id, kind = trigger.kind(), "Job rescheduled");
        } else {
            info!(job_id = %job_id, "Job modified in place");
        }
    } else {
        reject_past_when()?;

        let next_run = if requested_paused {
            None
        } else {
            Some(trigger.initial_next_run(now))
        };
        let job = Job {
            id: job_id.clone(),
            handler: handler_name.to_string(),
            kwargs: spec.kwargs.clone(),
            trigger,
            misfire_grace_secs,
            next_run,
            created_at: now,
            updated_at: now,
        };
        scheduler
            .add_job(&job)
            .await
            .map_err(|e| ScheduleJobError::Engine(e.to_string()))?;
        info!(job_id = %job_id, handler = %handler_name, "Job scheduled");
    }

    scheduler
        .get_job(&job_id)
        .await
        .map_err(|e| ScheduleJobError::Engine(e.to_string()))?
        .ok_or_else(|| ScheduleJobError::Engine(format!("job '{job_id}' vanished after write")).into())
}

/// On-disk default job spec: handler name plus the schedule spec.
#[derive(Debug, Deserialize)]
struct DefaultJobFile {
    handler: String,
    #[serde(flatten)]
    spec: JobSpec,
}

/// Load all default job spec files from `job_dir` into the scheduler.
///
/// Expected to run against a paused scheduler at startup. Each `*.json` file
/// holds one spec and must carry `handler` and `job_id`; specs are applied
/// with `modify_existing_job` forced on, so restarts converge on the file
/// contents instead of duplicating jobs. A broken file is logged and skipped,
/// the rest still load.
pub async fn register_default_jobs(
    scheduler: &SchedulerHandle,
    job_dir: &Path,
) -> Result<(), Error> {
    let entries = std::fs::read_dir(job_dir).map_err(ConfigError::Io)?;

    for entry in entries {
        let entry = entry.map_err(ConfigError::Io)?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if !path.is_file() || name.starts_with('.') || !name.ends_with(".json") {
            warn!(file = %name, "Skipping non-job file in default jobs dir");
            continue;
        }

        let parsed: Result<DefaultJobFile, String> = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()));

        let mut file = match parsed {
            Ok(file) => file,
            Err(reason) => {
                error!(
                    file = %name,
                    error = %ConfigError::MalformedJobFile { file: name.clone(), reason },
                    "Failed to parse default job spec"
                );
                continue;
            }
        };

        if file.spec.job_id.is_none() {
            error!(file = %name, "Default job spec is missing 'job_id'");
            continue;
        }

        file.spec.modify_existing_job = true;
        match schedule_job(scheduler, &file.handler, file.spec).await {
            Ok(job) => info!(file = %name, job_id = %job.id, "Default job registered"),
            Err(e) => error!(file = %name, error = %e, "Failed to register default job"),
        }
    }

    Ok(())
}
