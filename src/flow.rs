//! Flow runner client — the boundary to the external workflow dispatcher.
//!
//! The core only depends on two black-box operations: start a flow and start
//! a selective flow. Both return an opaque dispatch id. Handlers hold the
//! runner as `Arc<dyn FlowRunner>` so tests can substitute a recording stub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::FlowError;

/// Opaque identifier of a started flow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchId(pub String);

impl std::fmt::Display for DispatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asynchronous workflow dispatch contract.
#[async_trait]
pub trait FlowRunner: Send + Sync {
    /// Start a flow with the given arguments.
    async fn run_flow(&self, flow_name: &str, node_args: Value) -> Result<DispatchId, FlowError>;

    /// Start a flow restricted to a subset of its tasks.
    async fn run_flow_selective(
        &self,
        flow_name: &str,
        task_names: &[String],
        node_args: Value,
        follow_subflows: bool,
        run_subsequent: bool,
    ) -> Result<DispatchId, FlowError>;
}

/// HTTP client for the flow dispatcher service.
pub struct HttpFlowRunner {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct DispatchResponse {
    dispatch_id: String,
}

impl HttpFlowRunner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn dispatch(&self, path: &str, flow_name: &str, body: Value) -> Result<DispatchId, FlowError> {
        let url = format!("{}/{path}", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(FlowError::Rejected {
                flow: flow_name.to_string(),
                reason: format!("{status}: {text}"),
            });
        }

        let parsed: DispatchResponse = response
            .json()
            .await
            .map_err(|e| FlowError::Request(format!("bad dispatch response: {e}")))?;

        debug!(flow = %flow_name, dispatch_id = %parsed.dispatch_id, "Flow dispatched");
        Ok(DispatchId(parsed.dispatch_id))
    }
}

/// In-memory recording runner for unit tests.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every dispatch instead of calling out; optionally fails.
    pub struct RecordingFlowRunner {
        flows: Mutex<Vec<(String, Value)>>,
        selective: Mutex<Vec<(String, Vec<String>, Value, bool, bool)>>,
        fail: bool,
    }

    impl RecordingFlowRunner {
        pub fn new() -> Self {
            Self {
                flows: Mutex::new(Vec::new()),
                selective: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        pub async fn flows(&self) -> Vec<(String, Value)> {
            self.flows.lock().await.clone()
        }

        pub async fn selective_flows(&self) -> Vec<(String, Vec<String>, Value, bool, bool)> {
            self.selective.lock().await.clone()
        }
    }

    #[async_trait]
    impl FlowRunner for RecordingFlowRunner {
        async fn run_flow(
            &self,
            flow_name: &str,
            node_args: Value,
        ) -> Result<DispatchId, FlowError> {
            if self.fail {
                return Err(FlowError::Request("dispatcher unreachable".to_string()));
            }
            let mut flows = self.flows.lock().await;
            flows.push((flow_name.to_string(), node_args));
            Ok(DispatchId(format!("dispatch-{}", flows.len())))
        }

        async fn run_flow_selective(
            &self,
            flow_name: &str,
            task_names: &[String],
            node_args: Value,
            follow_subflows: bool,
            run_subsequent: bool,
        ) -> Result<DispatchId, FlowError> {
            if self.fail {
                return Err(FlowError::Request("dispatcher unreachable".to_string()));
            }
            let mut calls = self.selective.lock().await;
            calls.push((
                flow_name.to_string(),
                task_names.to_vec(),
                node_args,
                follow_subflows,
                run_subsequent,
            ));
            Ok(DispatchId(format!("dispatch-{}", calls.len())))
        }
    }
}

#[async_trait]
impl FlowRunner for HttpFlowRunner {
    async fn run_flow(&self, flow_name: &str, node_args: Value) -> Result<DispatchId, FlowError> {
        self.dispatch(
            "api/v1/flows",
            flow_name,
            serde_json::json!({
                "flow_name": flow_name,
                "node_args": node_args,
            }),
        )
        .await
    }

    async fn run_flow_selective(
        &self,
        flow_name: &str,
        task_names: &[String],
        node_args: Value,
        follow_subflows: bool,
        run_subsequent: bool,
    ) -> Result<DispatchId, FlowError> {
        self.dispatch(
            "api/v1/flows/selective",
            flow_name,
            serde_json::json!({
                "flow_name": flow_name,
                "task_names": task_names,
                "node_args": node_args,
                "follow_subflows": follow_subflows,
                "run_subsequent": run_subsequent,
            }),
        )
        .await
    }
}
