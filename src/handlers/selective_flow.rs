//! Schedule multiple selective flows of a type.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, JobHandler, is_filter_query, required_array, required_str};

/// Starts one selective flow per entry of `flow_arguments`, restricted to
/// `task_names`.
///
/// Expected kwargs: `flow_name` (string), `task_names` (array of strings),
/// `flow_arguments` (array of argument objects); optional `follow_subflows`
/// (default true) and `run_subsequent` (default false).
pub struct SelectiveFlowScheduling {
    ctx: HandlerContext,
}

impl SelectiveFlowScheduling {
    pub const NAME: &'static str = "SelectiveFlowScheduling";

    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for SelectiveFlowScheduling {
    async fn execute(&self, kwargs: &Map<String, Value>) -> Result<(), HandlerError> {
        let flow_name = required_str(kwargs, "flow_name")?;
        let task_names: Vec<String> = required_array(kwargs, "task_names")?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| HandlerError::InvalidArgument {
                        name: "task_names".to_string(),
                        reason: "expected an array of strings".to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;
        let flow_arguments = required_array(kwargs, "flow_arguments")?;

        let follow_subflows = kwargs
            .get("follow_subflows")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let run_subsequent = kwargs
            .get("run_subsequent")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        for node_args in flow_arguments {
            if is_filter_query(node_args) {
                return Err(HandlerError::FilterExpansion(node_args.to_string()));
            }
            self.ctx
                .run_flow_selective(
                    flow_name,
                    &task_names,
                    node_args.clone(),
                    follow_subflows,
                    run_subsequent,
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::test_support::RecordingFlowRunner;
    use std::sync::Arc;

    fn kwargs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn schedules_selective_flows_with_defaults() {
        let flow = Arc::new(RecordingFlowRunner::new());
        let handler = SelectiveFlowScheduling::new(HandlerContext::new(
            Some("j1".to_string()),
            Arc::clone(&flow) as _,
        ));

        handler
            .execute(&kwargs(serde_json::json!({
                "flow_name": "bayesianFlow",
                "task_names": ["GithubTask"],
                "flow_arguments": [{"ecosystem": "maven", "name": "junit"}],
            })))
            .await
            .unwrap();

        let calls = flow.selective_flows().await;
        assert_eq!(calls.len(), 1);
        let (name, tasks, _args, follow, subsequent) = &calls[0];
        assert_eq!(name, "bayesianFlow");
        assert_eq!(tasks, &vec!["GithubTask".to_string()]);
        assert!(*follow);
        assert!(!*subsequent);
    }

    #[tokio::test]
    async fn non_string_task_names_are_rejected() {
        let flow = Arc::new(RecordingFlowRunner::new());
        let handler = SelectiveFlowScheduling::new(HandlerContext::new(None, flow));

        let err = handler
            .execute(&kwargs(serde_json::json!({
                "flow_name": "bayesianFlow",
                "task_names": [42],
                "flow_arguments": [{}],
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidArgument { name, .. } if name == "task_names"));
    }
}
