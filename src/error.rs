//! Error types for the jobs service.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Scheduling error: {0}")]
    Schedule(#[from] ScheduleJobError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Flow dispatch error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors. These are caller bugs: they are surfaced
/// immediately and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown handler '{0}'")]
    UnknownHandler(String),

    #[error("Unknown state '{0}' provided, could be 'running' or 'paused'")]
    UnknownJobState(String),

    #[error("Malformed job spec file '{file}': {reason}")]
    MalformedJobFile { file: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while creating or modifying a scheduled job.
///
/// One error type for "the schedule operation itself failed" — the caller
/// decides whether to retry with corrected input.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleJobError {
    #[error("Unable to parse datetime format for 'when': '{0}'")]
    InvalidWhen(String),

    #[error("Cannot schedule event at '{0}' to past")]
    WhenInPast(String),

    #[error("Unable to parse format for 'misfire_grace_time': '{0}'")]
    InvalidMisfireGraceTime(String),

    #[error("Unable to parse format for 'periodically': '{0}'")]
    InvalidPeriodically(String),

    #[error("Unable to schedule job: {0}")]
    Engine(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by job handler execution.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Missing required argument '{0}'")]
    MissingArgument(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Filter expansion is not available for argument set: {0}")]
    FilterExpansion(String),

    #[error("Flow dispatch failed: {0}")]
    Flow(#[from] FlowError),

    #[error("{0}")]
    Other(String),
}

/// Flow runner client errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Dispatcher request failed: {0}")]
    Request(String),

    #[error("Dispatcher rejected flow '{flow}': {reason}")]
    Rejected { flow: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

/// Render an error and its full source chain as multi-line text.
///
/// Stored in error-job kwargs so the failure context survives the process.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
