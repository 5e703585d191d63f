//! Starter block: the sole entry point. Its output is the workflow's initial input payload —
//! empty for manual/scheduled runs, or whatever the (out-of-scope) trigger adapter stuffed
//! into the block's `input` sub-block field for webhook-style runs.

use serde_json::{Map, Value};

use crate::error::BlockError;
use crate::graph::{Block, BlockType};
use crate::value::BlockOutput;

use super::{BlockHandler, Decision, HandlerContext};

pub struct StarterHandler;

#[async_trait::async_trait]
impl BlockHandler for StarterHandler {
    fn can_handle(&self, block_type: &BlockType) -> bool {
        matches!(block_type, BlockType::Starter)
    }

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError> {
        let payload = ctx
            .resolved_field(block, "input")?
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok((BlockOutput::Starter { payload }, Decision::None))
    }
}
