//! Heterogeneous block output, represented as a tagged sum type with a uniform JSON-like
//! leaf (`serde_json::Value`), per the re-architecture notes: resolution walks the leaf
//! value rather than a dynamically-typed object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Chosen branch of a router block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSelection {
    pub block_id: String,
    pub block_name: Option<String>,
}

/// The `{response: {...}}` envelope produced by a response block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub data: Value,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Output produced by one block execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockOutput {
    Starter { payload: Value },
    Function { result: Value },
    Condition { selected_condition_id: String },
    Router { selected_path: RouterSelection },
    Response { response: ResponseEnvelope },
    Trigger { payload: Value },
    /// Tool/agent/generic blocks and loop/parallel aggregation results.
    Generic(Map<String, Value>),
}

impl BlockOutput {
    pub fn generic(map: Map<String, Value>) -> Self {
        BlockOutput::Generic(map)
    }

    pub fn empty() -> Self {
        BlockOutput::Generic(Map::new())
    }

    /// Flatten to the JSON object view used by the reference resolver for
    /// `<blockNameOrId.field[.sub]>` lookups.
    pub fn as_value(&self) -> Value {
        match self {
            BlockOutput::Starter { payload } => payload.clone(),
            BlockOutput::Function { result } => result.clone(),
            BlockOutput::Condition {
                selected_condition_id,
            } => json!({ "conditionId": selected_condition_id }),
            BlockOutput::Router { selected_path } => json!({
                "selectedPath": { "blockId": selected_path.block_id, "blockName": selected_path.block_name },
            }),
            BlockOutput::Response { response } => json!({
                "response": {
                    "data": response.data,
                    "status": response.status,
                    "headers": response.headers,
                }
            }),
            BlockOutput::Trigger { payload } => payload.clone(),
            BlockOutput::Generic(map) => Value::Object(map.clone()),
        }
    }

    /// Look up a dotted field path (`field.subfield.subsubfield`) inside this output's value view.
    pub fn get_path(&self, path: &[&str]) -> Option<Value> {
        let mut current = self.as_value();
        if path.is_empty() {
            return Some(current);
        }
        for segment in path {
            current = current.get(*segment)?.clone();
        }
        Some(current)
    }
}
