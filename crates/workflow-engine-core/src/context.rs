//! Per-run execution state (spec §3 "Execution context") and the log records it produces.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::value::BlockOutput;

/// `info` for block success and aggregate success; `error` otherwise (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Error,
}

/// A persisted log record (spec §3, §6 `workflowLog`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub trigger: String,
}

impl LogRecord {
    pub fn new(
        workflow_id: &str,
        execution_id: Uuid,
        level: LogLevel,
        message: impl Into<String>,
        duration_ms: Option<u64>,
        trigger: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            execution_id,
            level,
            message: message.into(),
            duration_ms,
            created_at: Utc::now(),
            trigger: trigger.to_string(),
        }
    }
}

/// Per-block log entry produced by the executor (spec §4.5 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLog {
    pub block_id: String,
    pub block_name: String,
    pub block_type: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// A router or condition decision recorded against the block that made it.
#[derive(Debug, Clone, Default)]
pub struct Decisions {
    pub router: HashMap<String, String>,
    pub condition: HashMap<String, String>,
}

/// Per-run, in-memory state. Instantiated per execution, discarded once its logs are
/// persisted. Never shared between concurrent executions (spec §5 "Shared resource policy").
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub block_states: HashMap<String, BlockOutput>,
    pub block_logs: Vec<BlockLog>,
    pub decisions: Decisions,
    pub loop_iterations: HashMap<String, u64>,
    pub loop_items: HashMap<String, Value>,
    pub executed_blocks: HashSet<String>,
    pub active_execution_path: HashSet<String>,
    pub completed_loops: HashSet<String>,
    pub environment_variables: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, environment_variables: HashMap<String, String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4(),
            block_states: HashMap::new(),
            block_logs: Vec::new(),
            decisions: Decisions::default(),
            loop_iterations: HashMap::new(),
            loop_items: HashMap::new(),
            executed_blocks: HashSet::new(),
            active_execution_path: HashSet::new(),
            completed_loops: HashSet::new(),
            environment_variables,
        }
    }
}

/// Final outcome of one executor run (spec §4.5 contract).
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub success: bool,
    pub logs: Vec<BlockLog>,
    pub output: Option<BlockOutput>,
    pub error: Option<String>,
    pub block_states: HashMap<String, BlockOutput>,
    /// The path tracker's active set at the end of the run (spec §3 `activeExecutionPath`).
    pub active_execution_path: HashSet<String>,
    /// Subflow ids whose iterations all completed (spec §3 `completedLoops`, §4.4).
    pub completed_loops: HashSet<String>,
}

impl ExecutionReport {
    /// Total elapsed time as the sum of successful block durations (spec §7).
    pub fn total_success_duration_ms(&self) -> u64 {
        self.logs
            .iter()
            .filter(|l| l.success)
            .map(|l| l.duration_ms)
            .sum()
    }
}
