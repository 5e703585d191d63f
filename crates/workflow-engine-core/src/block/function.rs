//! Function block: runs user code via the tool registry's sandboxed `function_execute` tool.

use serde_json::{Map, Value, json};

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::BlockOutput;

use super::{BlockHandler, Decision, HandlerContext};

const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub struct FunctionHandler;

impl FunctionHandler {
    fn code(field: Option<Value>) -> String {
        match field {
            Some(Value::String(s)) => s,
            Some(Value::Array(fragments)) => fragments
                .iter()
                .map(|f| f.as_str().unwrap_or_default().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

#[async_trait::async_trait]
impl BlockHandler for FunctionHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Function)
    }

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let code = Self::code(ctx.resolved_field(block, "code")?);
        let timeout = ctx
            .resolved_field(block, "timeout")?
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let env_vars: Map<String, Value> = ctx
            .environment_variables
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let block_data: Map<String, Value> = ctx
            .block_states
            .iter()
            .map(|(id, output)| (id.clone(), output.as_value()))
            .collect();
        let block_name_mapping: Map<String, Value> = ctx
            .graph
            .blocks()
            .map(|b| (b.id.clone(), Value::String(b.name.clone())))
            .collect();

        let params = json!({
            "code": code,
            "timeout": timeout,
            "envVars": env_vars,
            "blockData": block_data,
            "blockNameMapping": block_name_mapping,
        });

        let result = ctx
            .tool_registry
            .execute("function_execute", params, ctx.workflow_id)
            .await;
        if !result.success {
            return Err(BlockError::ToolExecutionFailed {
                tool_id: "function_execute".to_string(),
                message: result
                    .error
                    .unwrap_or_else(|| "function_execute failed with no message".to_string()),
            });
        }
        Ok((BlockOutput::Function { result: result.output }, Decision::None))
    }
}
