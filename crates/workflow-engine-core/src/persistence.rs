//! External collaborator boundaries: persistence, secret decryption, and tool dispatch.
//! The core depends on these only as traits; production adapters (database, KMS, HTTP/sandbox
//! dispatch) are out of scope (spec §1).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::LogRecord;
use crate::graph::SerializedWorkflowState;

/// A workflow row as loaded from the persistence layer.
#[derive(Debug, Clone)]
pub struct WorkflowRow {
    pub id: String,
    pub owner_id: String,
    pub state: SerializedWorkflowState,
}

/// A schedule row, as defined in spec §3. `nextRunAt > lastRanAt` is an invariant maintained
/// by the scheduler, not enforced by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    pub trigger_type: String,
    #[serde(default)]
    pub last_ran_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the scheduler is permitted to update on a schedule after a tick.
#[derive(Debug, Clone)]
pub struct ScheduleUpdate {
    pub last_ran_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence boundary consumed by the schedule tick loop.
#[async_trait::async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load_due_schedules(&self, now: DateTime<Utc>, limit: usize) -> Vec<Schedule>;
    async fn update_schedule(&self, id: &str, update: ScheduleUpdate);
    async fn load_workflow(&self, id: &str) -> Option<WorkflowRow>;
    async fn load_environment(&self, owner_id: &str) -> Option<HashMap<String, String>>;
    async fn append_log(&self, record: LogRecord);
}

/// Secret decryption boundary. Pure and failure-reportable, per spec §1.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, String>;
}

/// Result of dispatching to an external tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

/// Tool dispatch boundary for HTTP, sandboxed code execution, and LLM routing blocks.
#[async_trait::async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn execute(
        &self,
        tool_id: &str,
        params: serde_json::Value,
        workflow_id: &str,
    ) -> ToolResult;
}
