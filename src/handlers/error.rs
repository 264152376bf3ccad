//! Handler for storing information about failed jobs.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, JobHandler};

/// Deliberately does nothing when run.
///
/// Its value is in existing as a schedulable, listable record: the execution
/// wrapper creates a paused job of this handler whenever another handler
/// fails, with the failure context in the job's kwargs. Listing failed jobs
/// is a filter over handler name == `ErrorHandler`.
pub struct ErrorHandler {
    ctx: HandlerContext,
}

impl ErrorHandler {
    pub const NAME: &'static str = "ErrorHandler";

    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for ErrorHandler {
    async fn execute(&self, _kwargs: &Map<String, Value>) -> Result<(), HandlerError> {
        info!(job_id = ?self.ctx.job_id, "Error handler executed without effect");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::test_support::RecordingFlowRunner;
    use std::sync::Arc;

    #[tokio::test]
    async fn execute_is_a_noop() {
        let flow = Arc::new(RecordingFlowRunner::new());
        let handler = ErrorHandler::new(HandlerContext::new(None, flow.clone()));

        let mut kwargs = Map::new();
        kwargs.insert("exc_str".to_string(), serde_json::json!("boom"));
        handler.execute(&kwargs).await.unwrap();

        assert!(flow.flows().await.is_empty());
    }
}
