//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the job store database file.
    pub db_path: PathBuf,
    /// Port the REST API listens on.
    pub port: u16,
    /// Start the scheduler paused (no job fires until resumed).
    pub start_paused: bool,
    /// How often the scheduler engine polls for due jobs.
    pub tick_interval: Duration,
    /// Directory of default job spec files registered at startup.
    pub default_jobs_dir: Option<PathBuf>,
    /// Base URL of the external flow dispatcher.
    pub dispatcher_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/jobs.db"),
            port: 34000,
            start_paused: false,
            tick_interval: Duration::from_secs(1),
            default_jobs_dir: None,
            dispatcher_url: "http://localhost:8000".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_path = std::env::var("JOBS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let port = std::env::var("JOB_SERVICE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        // Operational constraint: exactly one process may run with an
        // unpaused scheduler against a given job store. A second unpaused
        // process would double-fire periodic jobs; there is no cross-process
        // lease. Set JOB_SERVICE_PAUSED on every process but the leader.
        let start_paused = std::env::var("JOB_SERVICE_PAUSED")
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let tick_interval = std::env::var("JOBS_TICK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.tick_interval);

        let default_jobs_dir = std::env::var("JOBS_DEFAULT_DIR").ok().map(PathBuf::from);

        let dispatcher_url =
            std::env::var("FLOW_DISPATCHER_URL").unwrap_or(defaults.dispatcher_url);

        Self {
            db_path,
            port,
            start_paused,
            tick_interval,
            default_jobs_dir,
            dispatcher_url,
        }
    }
}
