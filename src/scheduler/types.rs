//! Core types for scheduled jobs.
//!
//! A job binds a registered handler name to a firing policy (trigger) and an
//! arbitrary JSON kwargs map. Jobs are persisted; whether a job is paused is
//! derived from its next-run time (`None` means paused).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Firing policy of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire exactly once, immediately on activation when `run_at` is absent.
    Once { run_at: Option<DateTime<Utc>> },

    /// Fire repeatedly every `period_secs`, starting at `start_at` (or
    /// immediately).
    Interval {
        period_secs: u64,
        start_at: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    /// The string tag used in logs and trigger-kind comparisons. Matches
    /// the serialized `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Once { .. } => "once",
            Trigger::Interval { .. } => "interval",
        }
    }

    /// First fire time for a freshly activated job.
    pub fn initial_next_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Once { run_at } => run_at.unwrap_or(now),
            Trigger::Interval { start_at, .. } => start_at.unwrap_or(now),
        }
    }

    /// Fire time following a fire at `now`. `None` for exhausted one-shots,
    /// or when the period overflows datetime arithmetic.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Once { .. } => None,
            Trigger::Interval { period_secs, .. } => i64::try_from(*period_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|period| now.checked_add_signed(period)),
        }
    }
}

/// Derived lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Has a next-run time and will fire.
    Active,
    /// Next-run time cleared; inert until explicitly resumed.
    Paused,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Active => write!(f, "active"),
            JobState::Paused => write!(f, "paused"),
        }
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id; caller-supplied or generated (UUID v4) when absent.
    pub id: String,
    /// Name of the registered handler that executes this job.
    pub handler: String,
    /// Arbitrary JSON arguments passed verbatim to the handler at fire time.
    pub kwargs: Map<String, Value>,
    pub trigger: Trigger,
    /// Tolerated delay between the scheduled and the actual fire before the
    /// fire is treated as missed.
    pub misfire_grace_secs: Option<u64>,
    /// Next planned fire. `None` means the job is paused.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn state(&self) -> JobState {
        if self.next_run.is_some() {
            JobState::Active
        } else {
            JobState::Paused
        }
    }

    pub fn misfire_grace_time(&self) -> Option<Duration> {
        self.misfire_grace_secs.map(Duration::from_secs)
    }
}

/// External job specification as accepted by `schedule_job`.
///
/// This is also the shape of default job spec files and of the REST schedule
/// body (minus the `handler` key, which travels separately). Unknown keys are
/// collected into `kwargs` and passed through to the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSpec {
    pub job_id: Option<String>,
    /// Datetime string for one-shot fire or interval start.
    pub when: Option<String>,
    /// Duration expression for periodic execution ("1h", "30m"). Absent
    /// means the job fires only once.
    pub periodically: Option<String>,
    /// Duration expression for the misfire grace window.
    pub misfire_grace_time: Option<String>,
    /// Requested initial state: "running" or "paused".
    pub state: Option<String>,
    #[serde(default)]
    pub modify_existing_job: bool,
    #[serde(flatten)]
    pub kwargs: Map<String, Value>,
}

/// Parse a datetime string: RFC 3339 first, then naive `YYYY-MM-DDTHH:MM:SS`
/// (and the space-separated variant) interpreted as UTC.
pub fn parse_when(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    None
}

/// Parse a duration expression: compounds of `d`/`h`/`m`/`s` units
/// ("90s", "5m", "1h30m", "2d") or a bare integer meaning seconds.
pub fn parse_duration_expr(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_unit = false;
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let factor = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return None,
        };
        if digits.is_empty() {
            return None;
        }
        let n: u64 = digits.parse().ok()?;
        total = total.checked_add(n.checked_mul(factor)?)?;
        digits.clear();
        saw_unit = true;
    }
    // Trailing digits without a unit ("1h30") are rejected.
    if !digits.is_empty() || !saw_unit {
        return None;
    }
    Some(Duration::from_secs(total))
}
