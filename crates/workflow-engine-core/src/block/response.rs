//! Response block: packages a final `{response: {data, status, headers}}` envelope. Never
//! fails non-fatally — any internal error downgrades to a 500 response instead.

use serde_json::Value;

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::{BlockOutput, ResponseEnvelope};

use super::{BlockHandler, Decision, HandlerContext};

const DEFAULT_STATUS: u16 = 200;

pub struct ResponseHandler;

impl ResponseHandler {
    fn build(ctx: &HandlerContext<'_>, block: &Block) -> Result<ResponseEnvelope, BlockError> {
        let data_mode = ctx
            .resolved_string(block, "dataMode")?
            .unwrap_or_else(|| "structured".to_string());
        let raw_data = ctx.resolved_field(block, "data")?.unwrap_or(Value::Null);
        let data = if data_mode == "json" {
            match &raw_data {
                Value::String(s) => serde_json::from_str(s).unwrap_or(raw_data),
                other => other.clone(),
            }
        } else {
            raw_data
        };

        let status = ctx
            .resolved_field(block, "status")?
            .and_then(|v| v.as_u64())
            .map(|s| s as u16)
            .unwrap_or(DEFAULT_STATUS)
            .clamp(100, 599);

        let headers = match ctx.resolved_field(block, "headers")? {
            Some(Value::Array(pairs)) => pairs
                .into_iter()
                .filter_map(|pair| {
                    let key = pair.get("key").or_else(|| pair.get(0))?.as_str()?.to_string();
                    let value = pair.get("value").or_else(|| pair.get(1))?.as_str()?.to_string();
                    Some((key, value))
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(ResponseEnvelope { data, status, headers })
    }
}

#[async_trait::async_trait]
impl BlockHandler for ResponseHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Response)
    }

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let response = Self::build(ctx, block).unwrap_or_else(|err| ResponseEnvelope {
            data: serde_json::json!({ "error": true, "message": err.to_string() }),
            status: 500,
            headers: Vec::new(),
        });
        Ok((BlockOutput::Response { response }, Decision::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SerializedBlock, SerializedWorkflowState, SubBlockField, WorkflowMetadata};
    use serde_json::json;
    use std::collections::HashMap as Map;

    struct NoopTools;
    #[async_trait::async_trait]
    impl crate::persistence::ToolRegistry for NoopTools {
        async fn execute(
            &self,
            _tool_id: &str,
            _params: Value,
            _workflow_id: &str,
        ) -> crate::persistence::ToolResult {
            unreachable!()
        }
    }

    fn response_block(status: Option<i64>) -> crate::graph::WorkflowGraph {
        let mut sub_blocks = Map::new();
        sub_blocks.insert(
            "data".to_string(),
            SubBlockField { field_type: "data".into(), value: json!({ "ok": true }) },
        );
        if let Some(status) = status {
            sub_blocks.insert(
                "status".to_string(),
                SubBlockField { field_type: "status".into(), value: json!(status) },
            );
        }
        let block = SerializedBlock {
            id: "resp".into(),
            block_type: "response".into(),
            name: "Respond".into(),
            position: None,
            enabled: true,
            sub_blocks,
            outputs: Value::Null,
        };
        let state = SerializedWorkflowState {
            blocks: Map::from([("resp".to_string(), block)]),
            edges: vec![],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        crate::graph::WorkflowGraph::load("wf", &state).unwrap()
    }

    #[tokio::test]
    async fn status_clamps_to_valid_range() {
        let graph = response_block(Some(900));
        let states = Map::new();
        let env = Map::new();
        let items = Map::new();
        let iters = Map::new();
        let tools = NoopTools;
        let ctx = HandlerContext {
            workflow_id: "wf",
            graph: &graph,
            block_states: &states,
            environment_variables: &env,
            loop_items: &items,
            loop_iterations: &iters,
            tool_registry: &tools,
        };
        let (output, _) = ResponseHandler
            .execute(graph.block("resp").unwrap(), &ctx)
            .await
            .unwrap();
        match output {
            BlockOutput::Response { response } => assert_eq!(response.status, 599),
            _ => panic!("expected Response output"),
        }
    }

    #[tokio::test]
    async fn default_status_is_200() {
        let graph = response_block(None);
        let states = Map::new();
        let env = Map::new();
        let items = Map::new();
        let iters = Map::new();
        let tools = NoopTools;
        let ctx = HandlerContext {
            workflow_id: "wf",
            graph: &graph,
            block_states: &states,
            environment_variables: &env,
            loop_items: &items,
            loop_iterations: &iters,
            tool_registry: &tools,
        };
        let (output, _) = ResponseHandler
            .execute(graph.block("resp").unwrap(), &ctx)
            .await
            .unwrap();
        match output {
            BlockOutput::Response { response } => assert_eq!(response.status, 200),
            _ => panic!("expected Response output"),
        }
    }
}
