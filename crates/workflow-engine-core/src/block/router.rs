//! Router block: asks an LLM provider (via the tool registry) to pick one of the block's
//! direct successors as the next hop.

use serde_json::{Value, json};

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::{BlockOutput, RouterSelection};

use super::{BlockHandler, Decision, HandlerContext};

pub struct RouterHandler;

#[async_trait::async_trait]
impl BlockHandler for RouterHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Router)
    }

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let prompt = ctx.resolved_string(block, "prompt")?.unwrap_or_default();
        let model = ctx.resolved_string(block, "model")?;
        let temperature = ctx.resolved_field(block, "temperature")?;

        let targets: Vec<Value> = ctx
            .graph
            .successors(&block.id)
            .into_iter()
            .map(|e| e.target_block_id.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| ctx.graph.block(&id))
            .map(|b| {
                json!({
                    "blockId": b.id,
                    "title": b.name,
                    "blockType": b.block_type.as_str(),
                })
            })
            .collect();

        let params = json!({
            "prompt": prompt,
            "model": model,
            "temperature": temperature,
            "targets": targets,
        });

        let result = ctx
            .tool_registry
            .execute("llm_route", params, ctx.workflow_id)
            .await;
        if !result.success {
            return Err(BlockError::ToolExecutionFailed {
                tool_id: "llm_route".to_string(),
                message: result
                    .error
                    .unwrap_or_else(|| "llm_route failed with no message".to_string()),
            });
        }
        let chosen_id = result
            .output
            .get("blockId")
            .and_then(Value::as_str)
            .ok_or_else(|| BlockError::Other("llm_route returned no blockId".to_string()))?
            .to_string();

        let successor_ids: Vec<String> = ctx
            .graph
            .successors(&block.id)
            .into_iter()
            .map(|e| e.target_block_id.clone())
            .collect();
        if !successor_ids.contains(&chosen_id) {
            return Err(BlockError::InvalidRoutingDecision(chosen_id));
        }
        let block_name = ctx.graph.block(&chosen_id).map(|b| b.name.clone());

        Ok((
            BlockOutput::Router {
                selected_path: RouterSelection {
                    block_id: chosen_id.clone(),
                    block_name: block_name.clone(),
                },
            },
            Decision::Router {
                block_id: chosen_id,
                block_name,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SerializedBlock, SerializedEdge, SerializedWorkflowState, WorkflowMetadata};
    use std::collections::HashMap as Map;

    fn block(id: &str, block_type: &str) -> SerializedBlock {
        SerializedBlock {
            id: id.to_string(),
            block_type: block_type.to_string(),
            name: id.to_string(),
            position: None,
            enabled: true,
            sub_blocks: Map::new(),
            outputs: Value::Null,
        }
    }

    struct StaticTools(String);
    #[async_trait::async_trait]
    impl crate::persistence::ToolRegistry for StaticTools {
        async fn execute(
            &self,
            _tool_id: &str,
            _params: Value,
            _workflow_id: &str,
        ) -> crate::persistence::ToolResult {
            crate::persistence::ToolResult {
                success: true,
                output: json!({ "blockId": self.0 }),
                error: None,
            }
        }
    }

    fn two_target_graph() -> crate::graph::WorkflowGraph {
        let state = SerializedWorkflowState {
            blocks: Map::from([
                ("router".to_string(), block("router", "router")),
                ("target-block-1".to_string(), block("target-block-1", "function")),
                ("target-block-2".to_string(), block("target-block-2", "function")),
            ]),
            edges: vec![
                SerializedEdge {
                    id: "e1".into(),
                    source: "router".into(),
                    target: "target-block-1".into(),
                    source_handle: None,
                    target_handle: None,
                },
                SerializedEdge {
                    id: "e2".into(),
                    source: "router".into(),
                    target: "target-block-2".into(),
                    source_handle: None,
                    target_handle: None,
                },
            ],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        crate::graph::WorkflowGraph::load("wf", &state).unwrap()
    }

    #[tokio::test]
    async fn valid_choice_selects_path() {
        let graph = two_target_graph();
        let states = Map::new();
        let env = Map::new();
        let items = Map::new();
        let iters = Map::new();
        let tools = StaticTools("target-block-1".to_string());
        let ctx = HandlerContext {
            workflow_id: "wf",
            graph: &graph,
            block_states: &states,
            environment_variables: &env,
            loop_items: &items,
            loop_iterations: &iters,
            tool_registry: &tools,
        };
        let (output, decision) = RouterHandler
            .execute(graph.block("router").unwrap(), &ctx)
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Router {
                block_id: "target-block-1".into(),
                block_name: Some("target-block-1".into())
            }
        );
        match output {
            BlockOutput::Router { selected_path } => {
                assert_eq!(selected_path.block_id, "target-block-1")
            }
            _ => panic!("expected Router output"),
        }
    }

    #[tokio::test]
    async fn choice_outside_successors_fails() {
        let graph = two_target_graph();
        let states = Map::new();
        let env = Map::new();
        let items = Map::new();
        let iters = Map::new();
        let tools = StaticTools("not-a-target".to_string());
        let ctx = HandlerContext {
            workflow_id: "wf",
            graph: &graph,
            block_states: &states,
            environment_variables: &env,
            loop_items: &items,
            loop_iterations: &iters,
            tool_registry: &tools,
        };
        let err = RouterHandler
            .execute(graph.block("router").unwrap(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, BlockError::InvalidRoutingDecision(id) if id == "not-a-target"));
    }
}
