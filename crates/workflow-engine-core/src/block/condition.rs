//! Condition block: evaluates an ordered `if` / `else if` / `else` ladder and selects the
//! `sourceHandle = "condition-<id>"` edge of the first branch that evaluates truthy.

use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EvalValue};
use serde_json::Value;

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::BlockOutput;

use super::{BlockHandler, Decision, HandlerContext};

struct ConditionEntry {
    id: String,
    title: String,
    value: String,
}

fn parse_conditions(field: Option<Value>) -> Vec<ConditionEntry> {
    let Some(Value::Array(entries)) = field else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.get("id")?.as_str()?.to_string();
            let title = entry.get("title")?.as_str()?.to_string();
            let value = entry
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(ConditionEntry { id, title, value })
        })
        .collect()
}

/// Convert a JSON scalar into an evalexpr value. Arrays/objects are not supported as
/// expression operands and are dropped from the lexical context.
fn json_to_eval(value: &Value) -> Option<EvalValue> {
    match value {
        Value::Null => Some(EvalValue::Empty),
        Value::Bool(b) => Some(EvalValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EvalValue::Int(i))
            } else {
                n.as_f64().map(EvalValue::Float)
            }
        }
        Value::String(s) => Some(EvalValue::String(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn build_context(ctx: &HandlerContext<'_>, block: &Block) -> HashMapContext {
    let mut context = HashMapContext::new();
    if let Some(edge) = ctx.graph.predecessors(&block.id).first() {
        if let Some(source) = ctx.block_states.get(&edge.source_block_id) {
            if let Value::Object(fields) = source.as_value() {
                for (name, value) in &fields {
                    if let Some(v) = json_to_eval(value) {
                        let _ = context.set_value(name.clone(), v);
                    }
                }
            }
        }
    }
    if let Some(subflow) = ctx.graph.subflow_of(&block.id) {
        if let Some(item) = ctx.loop_items.get(&subflow.id) {
            if let Some(v) = json_to_eval(item) {
                let _ = context.set_value("loop.item".to_string(), v);
            }
        }
        if let Some(index) = ctx.loop_iterations.get(&subflow.id) {
            let _ = context.set_value("loop.index".to_string(), EvalValue::Int(*index as i64));
        }
    }
    context
}

pub struct ConditionHandler;

#[async_trait::async_trait]
impl BlockHandler for ConditionHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Condition)
    }

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let conditions = parse_conditions(ctx.resolved_field(block, "conditions")?);
        let context = build_context(ctx, block);

        let mut else_branch: Option<&ConditionEntry> = None;
        for entry in &conditions {
            if entry.title == "else" {
                else_branch = Some(entry);
                continue;
            }
            let resolved_value = crate::resolver::resolve(
                &entry.value,
                ctx.graph,
                ctx.block_states,
                ctx.environment_variables,
            )?
            .into_value();
            let expr = match resolved_value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let truthy = evalexpr::eval_boolean_with_context(&expr, &context).unwrap_or(false);
            if truthy {
                return Ok((
                    BlockOutput::Condition {
                        selected_condition_id: entry.id.clone(),
                    },
                    Decision::Condition {
                        condition_id: entry.id.clone(),
                    },
                ));
            }
        }

        match else_branch {
            Some(entry) => Ok((
                BlockOutput::Condition {
                    selected_condition_id: entry.id.clone(),
                },
                Decision::Condition {
                    condition_id: entry.id.clone(),
                },
            )),
            None => Err(BlockError::NoMatchingCondition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        SerializedBlock, SerializedEdge, SerializedWorkflowState, WorkflowMetadata,
    };
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn block_with_conditions(id: &str, conditions: Value) -> SerializedBlock {
        let mut sub_blocks = Map::new();
        sub_blocks.insert(
            "conditions".to_string(),
            crate::graph::SubBlockField {
                field_type: "conditions".into(),
                value: conditions,
            },
        );
        SerializedBlock {
            id: id.to_string(),
            block_type: "condition".into(),
            name: id.to_string(),
            position: None,
            enabled: true,
            sub_blocks,
            outputs: Value::Null,
        }
    }

    fn source_block(id: &str) -> SerializedBlock {
        SerializedBlock {
            id: id.to_string(),
            block_type: "function".into(),
            name: id.to_string(),
            position: None,
            enabled: true,
            sub_blocks: Map::new(),
            outputs: Value::Null,
        }
    }

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

    #[tokio::test]
    async fn else_branch_wins_when_no_condition_matches() {
        let conditions = json!([
            { "id": "c1", "title": "if", "value": "x > 10" },
            { "id": "c2", "title": "else" },
        ]);
        let state = SerializedWorkflowState {
            blocks: Map::from([
                ("src".to_string(), source_block("src")),
                ("cond".to_string(), block_with_conditions("cond", conditions)),
            ]),
            edges: vec![SerializedEdge {
                id: "e0".into(),
                source: "src".into(),
                target: "cond".into(),
                source_handle: None,
                target_handle: None,
            }],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        let graph = crate::graph::WorkflowGraph::load("wf", &state).unwrap();
        let mut states = Map::new();
        states.insert(
            "src".to_string(),
            BlockOutput::Function {
                result: json!({ "x": 3 }),
            },
        );
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

        let (output, decision) = ConditionHandler
            .execute(graph.block("cond").unwrap(), &ctx)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Condition { condition_id: "c2".into() });
        match output {
            BlockOutput::Condition { selected_condition_id } => {
                assert_eq!(selected_condition_id, "c2");
            }
            _ => panic!("expected Condition output"),
        }
    }

    #[tokio::test]
    async fn no_match_and_no_else_fails() {
        let conditions = json!([{ "id": "c1", "title": "if", "value": "x > 10" }]);
        let state = SerializedWorkflowState {
            blocks: Map::from([
                ("src".to_string(), source_block("src")),
                ("cond".to_string(), block_with_conditions("cond", conditions)),
            ]),
            edges: vec![SerializedEdge {
                id: "e0".into(),
                source: "src".into(),
                target: "cond".into(),
                source_handle: None,
                target_handle: None,
            }],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        let graph = crate::graph::WorkflowGraph::load("wf", &state).unwrap();
        let mut states = Map::new();
        states.insert(
            "src".to_string(),
            BlockOutput::Function {
                result: json!({ "x": 3 }),
            },
        );
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
        let err = ConditionHandler
            .execute(graph.block("cond").unwrap(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, BlockError::NoMatchingCondition));
    }
}
