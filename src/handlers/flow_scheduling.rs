//! Schedule multiple flows of a type.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::handlers::{HandlerContext, JobHandler, is_filter_query, required_array, required_str};

/// Starts one flow per entry of `flow_arguments`.
///
/// Expected kwargs: `flow_name` (string), `flow_arguments` (array of
/// argument objects, one flow started per entry).
pub struct FlowScheduling {
    ctx: HandlerContext,
}

impl FlowScheduling {
    pub const NAME: &'static str = "FlowScheduling";

    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for FlowScheduling {
    async fn execute(&self, kwargs: &Map<String, Value>) -> Result<(), HandlerError> {
        let flow_name = required_str(kwargs, "flow_name")?;
        let flow_arguments = required_array(kwargs, "flow_arguments")?;

        for node_args in flow_arguments {
            // Filter expansion needs the bookkeeping database, which this
            // service does not own. Reject rather than silently dropping.
            if is_filter_query(node_args) {
                return Err(HandlerError::FilterExpansion(node_args.to_string()));
            }
            self.ctx.run_flow(flow_name, node_args.clone()).await?;
        }
        Ok(())
    }
}
