//! Job handlers and the handler registry.
//!
//! Handlers are a closed set, registered by name at startup. Job specs
//! reference handlers by name from persisted/external data, so the map
//! lookup is the one legitimately dynamic dispatch point; an unknown name
//! is a configuration error, caught at schedule time.

pub mod error;
pub mod flow_scheduling;
pub mod selective_flow;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FlowError, HandlerError};
use crate::flow::{DispatchId, FlowRunner};

pub use error::ErrorHandler;
pub use flow_scheduling::FlowScheduling;
pub use selective_flow::SelectiveFlowScheduling;

/// The kwargs key marking an argument set as a declarative filter.
const FILTER_KEY: &str = "$filter";

/// Everything a handler instance gets at construction time.
#[derive(Clone)]
pub struct HandlerContext {
    /// Id of the job this execution belongs to, when fired by the scheduler.
    pub job_id: Option<String>,
    flow: Arc<dyn FlowRunner>,
}

impl HandlerContext {
    pub fn new(job_id: Option<String>, flow: Arc<dyn FlowRunner>) -> Self {
        Self { job_id, flow }
    }

    /// Start a flow, tagging its arguments with this job's id so downstream
    /// workflow results are traceable back to the job.
    pub async fn run_flow(
        &self,
        flow_name: &str,
        mut node_args: Value,
    ) -> Result<DispatchId, FlowError> {
        if let Some(ref job_id) = self.job_id
            && let Some(obj) = node_args.as_object_mut()
        {
            obj.insert("job_id".to_string(), Value::String(job_id.clone()));
        }
        debug!(flow = %flow_name, job_id = ?self.job_id, "Scheduling flow");
        self.flow.run_flow(flow_name, node_args).await
    }

    /// Start a selective flow restricted to `task_names`.
    pub async fn run_flow_selective(
        &self,
        flow_name: &str,
        task_names: &[String],
        node_args: Value,
        follow_subflows: bool,
        run_subsequent: bool,
    ) -> Result<DispatchId, FlowError> {
        debug!(flow = %flow_name, tasks = ?task_names, job_id = ?self.job_id, "Scheduling selective flow");
        self.flow
            .run_flow_selective(flow_name, task_names, node_args, follow_subflows, run_subsequent)
            .await
    }
}

/// A job handler: one `execute` operation, may fail with any error.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, kwargs: &Map<String, Value>) -> Result<(), HandlerError>;
}

type HandlerFactory = fn(HandlerContext) -> Box<dyn JobHandler>;

/// Closed name-to-factory map over the known handler set.
pub struct HandlerRegistry {
    factories: HashMap<&'static str, HandlerFactory>,
}

impl HandlerRegistry {
    /// Build the registry over all shipped handlers.
    pub fn new() -> Self {
        let mut factories: HashMap<&'static str, HandlerFactory> = HashMap::new();
        factories.insert(ErrorHandler::NAME, |ctx| Box::new(ErrorHandler::new(ctx)));
        factories.insert(FlowScheduling::NAME, |ctx| {
            Box::new(FlowScheduling::new(ctx))
        });
        factories.insert(SelectiveFlowScheduling::NAME, |ctx| {
            Box::new(SelectiveFlowScheduling::new(ctx))
        });
        Self { factories }
    }

    /// Existence check, used for validation at schedule time.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate a handler by name.
    pub fn instantiate(&self, name: &str, ctx: HandlerContext) -> Option<Box<dyn JobHandler>> {
        self.factories.get(name).map(|factory| factory(ctx))
    }

    /// All registered handler names.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// True if the handler name denotes the failed-job record handler.
pub fn is_failed_job_handler_name(handler_name: &str) -> bool {
    handler_name == ErrorHandler::NAME
}

/// True if an argument set should be expanded from a declarative filter.
pub fn is_filter_query(node_args: &Value) -> bool {
    node_args
        .as_object()
        .is_some_and(|obj| obj.contains_key(FILTER_KEY))
}

/// Pull a required string argument out of handler kwargs.
pub(crate) fn required_str<'a>(
    kwargs: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, HandlerError> {
    kwargs
        .get(name)
        .ok_or_else(|| HandlerError::MissingArgument(name.to_string()))?
        .as_str()
        .ok_or_else(|| HandlerError::InvalidArgument {
            name: name.to_string(),
            reason: "expected a string".to_string(),
        })
}

/// Pull a required array argument out of handler kwargs.
pub(crate) fn required_array<'a>(
    kwargs: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Vec<Value>, HandlerError> {
    kwargs
        .get(name)
        .ok_or_else(|| HandlerError::MissingArgument(name.to_string()))?
        .as_array()
        .ok_or_else(|| HandlerError::InvalidArgument {
            name: name.to_string(),
            reason: "expected an array".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::test_support::RecordingFlowRunner;

    #[test]
    fn registry_contains_known_handlers() {
        let registry = HandlerRegistry::new();
        assert!(registry.contains("ErrorHandler"));
        assert!(registry.contains("FlowScheduling"));
        assert!(registry.contains("SelectiveFlowScheduling"));
        assert!(!registry.contains("NoSuchHandler"));
    }

    #[test]
    fn registry_instantiates_by_name() {
        let registry = HandlerRegistry::new();
        let flow = Arc::new(RecordingFlowRunner::new());
        let ctx = HandlerContext::new(Some("j1".to_string()), flow);
        assert!(registry.instantiate("FlowScheduling", ctx.clone()).is_some());
        assert!(registry.instantiate("NoSuchHandler", ctx).is_none());
    }

    #[test]
    fn failed_job_handler_name_check() {
        assert!(is_failed_job_handler_name("ErrorHandler"));
        assert!(!is_failed_job_handler_name("FlowScheduling"));
    }

    #[test]
    fn filter_query_detection() {
        assert!(is_filter_query(&serde_json::json!({"$filter": {}})));
        assert!(!is_filter_query(&serde_json::json!({"name": "x"})));
        assert!(!is_filter_query(&serde_json::json!("plain")));
    }

    #[tokio::test]
    async fn run_flow_injects_job_id() {
        let flow = Arc::new(RecordingFlowRunner::new());
        let ctx = HandlerContext::new(Some("j1".to_string()), Arc::clone(&flow) as _);
        ctx.run_flow("bayesianFlow", serde_json::json!({"name": "pkg"}))
            .await
            .unwrap();

        let calls = flow.flows().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["job_id"], "j1");
        assert_eq!(calls[0].1["name"], "pkg");
    }
}
