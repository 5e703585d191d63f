//! The durable, wire-format shape of `workflow.state` (see spec §6). Implementations may use
//! native representations internally, but this shape must round-trip byte-identically where
//! referenced by id, so it is kept as its own serde layer distinct from [`super::WorkflowGraph`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `{type, value}` sub-block field. `value` may still contain unresolved `<...>` / `{{...}}` tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubBlockField {
    #[serde(rename = "type")]
    pub field_type: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    #[serde(default)]
    pub position: Option<(f64, f64)>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sub_blocks: HashMap<String, SubBlockField>,
    #[serde(default)]
    pub outputs: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationType {
    Fixed,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedLoop {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub iteration_count: Option<u64>,
    pub iteration_type: IterationType,
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedParallel {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub parallel_count: Option<u64>,
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// The exact persisted shape of `workflow.state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedWorkflowState {
    pub blocks: HashMap<String, SerializedBlock>,
    pub edges: Vec<SerializedEdge>,
    #[serde(default)]
    pub loops: HashMap<String, SerializedLoop>,
    #[serde(default)]
    pub parallels: HashMap<String, SerializedParallel>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_state_roundtrips_through_json() {
        let mut blocks = HashMap::new();
        blocks.insert(
            "start".to_string(),
            SerializedBlock {
                id: "start".into(),
                block_type: "starter".into(),
                name: "Start".into(),
                position: None,
                enabled: true,
                sub_blocks: HashMap::new(),
                outputs: Value::Null,
            },
        );
        let state = SerializedWorkflowState {
            blocks,
            edges: vec![],
            loops: HashMap::new(),
            parallels: HashMap::new(),
            variables: HashMap::new(),
            metadata: WorkflowMetadata::default(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let restored: SerializedWorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
