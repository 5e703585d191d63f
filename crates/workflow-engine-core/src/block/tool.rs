//! Generic tool/agent block: everything the core does not interpret itself is handed to
//! the tool registry keyed on the block's own type string.

use serde_json::Value;

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::BlockOutput;

use super::{BlockHandler, Decision, HandlerContext};

pub struct ToolHandler;

#[async_trait::async_trait]
impl BlockHandler for ToolHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Agent | BlockType::Tool(_))
    }

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let mut params = serde_json::Map::new();
        for (field_id, _) in &block.sub_blocks {
            if let Some(value) = ctx.resolved_field(block, field_id)? {
                params.insert(field_id.clone(), value);
            }
        }

        let result = ctx
            .tool_registry
            .execute(block.block_type.as_str(), Value::Object(params), ctx.workflow_id)
            .await;
        if !result.success {
            return Err(BlockError::ToolExecutionFailed {
                tool_id: block.block_type.as_str().to_string(),
                message: result.error.unwrap_or_else(|| {
                    format!("{} failed with no message", block.block_type.as_str())
                }),
            });
        }
        let mut output = serde_json::Map::new();
        if let Value::Object(map) = result.output {
            output = map;
        } else {
            output.insert("result".to_string(), result.output);
        }
        Ok((BlockOutput::Generic(output), Decision::None))
    }
}
