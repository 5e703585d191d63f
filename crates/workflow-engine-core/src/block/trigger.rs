//! Trigger block: surfaces the starter block's output verbatim, flattening known
//! provider-specific fields (e.g. `email`, `repository`) for webhook-style starters. Never fails.

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::BlockOutput;

use super::{BlockHandler, Decision, HandlerContext};

pub struct TriggerHandler;

#[async_trait::async_trait]
impl BlockHandler for TriggerHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Trigger)
    }

    async fn execute(
        &self,
        _block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let payload = ctx
            .block_states
            .get(ctx.graph.starter_id())
            .map(|output| output.as_value())
            .unwrap_or(serde_json::Value::Null);
        Ok((BlockOutput::Trigger { payload }, Decision::None))
    }
}
