//! Block handler contracts (spec §4.4). Every kind but loop/parallel subflow entries (which
//! the executor drives directly, since they recurse back into the executor itself) implements
//! [`BlockHandler`]; [`BlockRegistry`] dispatches by [`crate::graph::BlockType`].

mod condition;
mod function;
mod response;
mod router;
mod starter;
mod tool;
mod trigger;

pub use condition::ConditionHandler;
pub use function::FunctionHandler;
pub use response::ResponseHandler;
pub use router::RouterHandler;
pub use starter::StarterHandler;
pub use tool::ToolHandler;
pub use trigger::TriggerHandler;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::BlockError;
use crate::graph::{Block, WorkflowGraph};
use crate::persistence::ToolRegistry;
use crate::resolver::resolve_value;
use crate::value::BlockOutput;

/// A routing or branching decision a handler reports back, for the path tracker to consume.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    None,
    Condition { condition_id: String },
    Router { block_id: String, block_name: Option<String> },
}

/// Everything a handler needs beyond the block itself: the graph (for reference resolution
/// and successor lookups), prior block outputs, decrypted environment, loop-iteration
/// bindings, and the tool dispatch boundary.
pub struct HandlerContext<'a> {
    pub workflow_id: &'a str,
    pub graph: &'a WorkflowGraph,
    pub block_states: &'a HashMap<String, BlockOutput>,
    pub environment_variables: &'a HashMap<String, String>,
    pub loop_items: &'a HashMap<String, Value>,
    pub loop_iterations: &'a HashMap<String, u64>,
    pub tool_registry: &'a dyn ToolRegistry,
}

impl<'a> HandlerContext<'a> {
    /// Resolve one sub-block field by id, walking every string leaf of its value through the
    /// reference resolver. Missing fields resolve to `None` rather than failing — most fields
    /// are optional with handler-level defaults.
    pub fn resolved_field(&self, block: &Block, field_id: &str) -> Result<Option<Value>, BlockError> {
        match block.sub_blocks.get(field_id) {
            None => Ok(None),
            Some(field) => {
                let resolved = resolve_value(
                    &field.value,
                    self.graph,
                    self.block_states,
                    self.environment_variables,
                )?;
                Ok(Some(resolved))
            }
        }
    }

    pub fn resolved_string(&self, block: &Block, field_id: &str) -> Result<Option<String>, BlockError> {
        Ok(match self.resolved_field(block, field_id)? {
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        })
    }
}

/// A single block kind's execution contract.
#[async_trait::async_trait]
pub trait BlockHandler: Send + Sync {
    fn can_handle(&self, block_type: &crate::graph::BlockType) -> bool;

    async fn execute(
        &self,
        block: &Block,
        ctx: &HandlerContext<'_>,
    ) -> Result<(BlockOutput, Decision), BlockError>;
}

/// Dispatch table from block type to handler, consulted once per ready block.
#[derive(Default)]
pub struct BlockRegistry {
    handlers: Vec<Box<dyn BlockHandler>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register(&mut self, handler: Box<dyn BlockHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_for(&self, block_type: &crate::graph::BlockType) -> Option<&dyn BlockHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(block_type))
            .map(|h| h.as_ref())
    }

    /// Registry carrying every handler but the loop/parallel subflow driver, which the
    /// executor invokes directly.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(StarterHandler));
        registry.register(Box::new(FunctionHandler));
        registry.register(Box::new(ConditionHandler));
        registry.register(Box::new(RouterHandler));
        registry.register(Box::new(ResponseHandler));
        registry.register(Box::new(TriggerHandler));
        registry.register(Box::new(ToolHandler));
        registry
    }
}
