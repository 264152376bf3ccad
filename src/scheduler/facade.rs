//! Process-wide scheduler access.
//!
//! Exactly one live engine per process: `get_scheduler` initializes it on
//! first use (opening the job store and starting the fire loop) and every
//! later call gets a clone of the same handle. `scheduler_lock` is the admin
//! mutex callers take around multi-step scheduler operations so concurrent
//! API requests cannot interleave their read-modify-write sequences.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::info;

use crate::config::ServiceConfig;
use crate::error::Error;
use crate::flow::FlowRunner;
use crate::handlers::HandlerRegistry;
use crate::scheduler::engine::{SchedulerHandle, spawn_tick_loop};
use crate::store::LibSqlJobStore;

static SCHEDULER: OnceCell<SchedulerHandle> = OnceCell::const_new();
static SCHEDULER_LOCK: Mutex<()> = Mutex::const_new(());

/// Acquire the process-wide scheduler admin lock.
pub async fn scheduler_lock() -> MutexGuard<'static, ()> {
    SCHEDULER_LOCK.lock().await
}

/// Get the process scheduler, initializing it on first call.
///
/// Initialization opens (and migrates) the job store and spawns the fire
/// loop; `OnceCell` serializes racing first calls so this happens once.
pub async fn get_scheduler(
    config: &ServiceConfig,
    registry: Arc<HandlerRegistry>,
    flow: Arc<dyn FlowRunner>,
) -> Result<SchedulerHandle, Error> {
    let handle = SCHEDULER
        .get_or_try_init(|| async {
            let store = Arc::new(LibSqlJobStore::new_local(&config.db_path).await?);
            let handle = SchedulerHandle::new(store, registry, flow, config.start_paused);
            spawn_tick_loop(handle.clone(), config.tick_interval);
            info!(
                db = %config.db_path.display(),
                state = handle.state(),
                "Scheduler initialized"
            );
            Ok::<_, Error>(handle)
        })
        .await?;
    Ok(handle.clone())
}

/// Get a scheduler that is guaranteed not to fire anything.
///
/// Returns the live singleton when it already exists. Otherwise opens the
/// job store with a paused engine and no fire loop — the form used to seed
/// default jobs before the service proper starts.
pub async fn get_paused_scheduler(
    config: &ServiceConfig,
    registry: Arc<HandlerRegistry>,
    flow: Arc<dyn FlowRunner>,
) -> Result<SchedulerHandle, Error> {
    if let Some(handle) = SCHEDULER.get() {
        return Ok(handle.clone());
    }
    let store = Arc::new(LibSqlJobStore::new_local(&config.db_path).await?);
    Ok(SchedulerHandle::new(store, registry, flow, true))
}
