//! Scheduling core: engine, facade, lifecycle, and the execution wrapper.

pub mod engine;
pub mod execute;
pub mod facade;
pub mod lifecycle;
pub mod types;

pub use engine::{SchedulerHandle, spawn_tick_loop};
pub use execute::job_execute;
pub use facade::{get_paused_scheduler, get_scheduler, scheduler_lock};
pub use lifecycle::{register_default_jobs, schedule_job};
pub use types::{Job, JobSpec, JobState, Trigger};
