//! Error taxonomy. One `thiserror` enum per layer, composed into [`EngineError`] for callers
//! that want a single type (mirrors the teacher's layered `RuntimeError`/`BlockError` split).

use uuid::Uuid;

/// Errors raised while building a [`crate::graph::WorkflowGraph`] from serialized state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("workflow has no starter block")]
    NoStarterBlock,
    #[error("workflow has {0} starter blocks, expected exactly one")]
    MultipleStarterBlocks(usize),
    #[error("edge {edge_id} references nonexistent block {block_id}")]
    DanglingEdge { edge_id: String, block_id: String },
    #[error("block {0} belongs to more than one subflow")]
    BlockInMultipleSubflows(String),
}

/// Errors raised while resolving `<block.field>` / `{{ENV}}` tokens.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error("block reference \"{0}\" could not be resolved: block has not executed")]
    UnresolvedReference(String),
    #[error("block reference \"{0}\" has no field \"{1}\"")]
    MissingField(String, String),
    #[error("Environment variable \"{0}\" was not found")]
    MissingEnvironmentVariable(String),
    #[error("failed to decrypt environment variable \"{name}\": {cause}")]
    DecryptionFailed { name: String, cause: String },
}

/// Errors raised by the recurrence planner.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlannerError {
    #[error("unsupported schedule type: {0}")]
    UnsupportedScheduleType(String),
    #[error("invalid cron expression \"{expression}\": {cause}")]
    InvalidCronExpression { expression: String, cause: String },
    #[error("invalid time-of-day value \"{0}\"")]
    InvalidTimeOfDay(String),
    #[error("unknown timezone \"{0}\"")]
    UnknownTimezone(String),
}

/// Errors raised while executing a single block's handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlockError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("no condition matched and no else branch was defined")]
    NoMatchingCondition,
    #[error("router selected \"{0}\", which is not a direct successor of the router block")]
    InvalidRoutingDecision(String),
    #[error("tool \"{tool_id}\" failed: {message}")]
    ToolExecutionFailed { tool_id: String, message: String },
    #[error("function block timed out after {0}ms")]
    FunctionTimeout(u64),
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the executor while driving a run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("block {block_id} ({block_type}) failed: {source}")]
    BlockFailed {
        block_id: String,
        block_type: String,
        #[source]
        source: BlockError,
    },
    #[error("execution cancelled")]
    ExecutionCancelled,
    #[error("iteration budget exceeded (cycle or too many steps)")]
    IterationBudgetExceeded,
    #[error("no handler registered for block type {0}")]
    NoHandler(String),
}

/// Errors raised by the schedule tick loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(String),
    #[error("environment for owner {0} could not be loaded")]
    EnvironmentMissing(String),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Top-level error type composing every layer, for callers that want one type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Identity of a single-flight run, used in log correlation.
pub fn new_execution_id() -> Uuid {
    Uuid::new_v4()
}
