//! Path tracker: maintains `activeExecutionPath`, the set of blocks eligible to run given
//! routing and condition decisions made so far (spec §4.3).
//!
//! A block is never added to the active set unless some executed predecessor explicitly
//! activates it (unconditionally, for ordinary blocks, or via the chosen branch, for
//! condition/router blocks) — so a branch that is never chosen simply never gains any
//! active members, which is what makes it "dead" per invariant (3).

use std::collections::HashSet;

use crate::graph::WorkflowGraph;

/// The set of blocks currently eligible to run.
#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    active: HashSet<String>,
}

impl PathTracker {
    /// Seed the tracker with just the starter (or subflow entry) block active.
    pub fn seed(entry_id: &str) -> Self {
        let mut active = HashSet::new();
        active.insert(entry_id.to_string());
        Self { active }
    }

    pub fn is_active(&self, block_id: &str) -> bool {
        self.active.contains(block_id)
    }

    pub fn activate(&mut self, block_id: &str) {
        self.active.insert(block_id.to_string());
    }

    /// Activate every unconditional successor (edges with no `sourceHandle`) of a completed
    /// non-branching block.
    pub fn activate_successors(&mut self, graph: &WorkflowGraph, block_id: &str) {
        for edge in graph.successors(block_id) {
            if edge.source_handle.is_none() {
                self.activate(&edge.target_block_id);
            }
        }
    }

    /// Router decision: activate only the chosen target; siblings stay inactive.
    pub fn activate_router_choice(&mut self, target_block_id: &str) {
        self.activate(target_block_id);
    }

    /// Condition decision: activate the target of `sourceHandle = "condition-<id>"`.
    pub fn activate_condition_choice(
        &mut self,
        graph: &WorkflowGraph,
        block_id: &str,
        condition_id: &str,
    ) {
        let handle = format!("condition-{condition_id}");
        for target in graph.targets_for_handle(block_id, &handle) {
            self.active.insert(target.to_string());
        }
    }

    pub fn active_set(&self) -> &HashSet<String> {
        &self.active
    }
}

/// Blocks whose inbound dependencies are satisfied: active, not yet executed, and every
/// predecessor is either executed or dead (not in the active path). Sorted by each block's
/// graph topology index, not by id, for a deterministic dispatch order across runs (spec §4.5
/// tie-break).
pub fn ready_blocks(
    graph: &WorkflowGraph,
    tracker: &PathTracker,
    executed: &HashSet<String>,
) -> Vec<String> {
    let mut ready: Vec<&str> = graph
        .blocks()
        .filter(|b| tracker.is_active(&b.id))
        .filter(|b| !executed.contains(&b.id))
        .filter(|b| {
            let preds = graph.predecessors(&b.id);
            preds.is_empty()
                || preds.iter().all(|e| {
                    executed.contains(&e.source_block_id) || !tracker.is_active(&e.source_block_id)
                })
        })
        .map(|b| b.id.as_str())
        .collect();
    ready.sort_by_key(|id| graph.block(id).map(|b| b.topology_index).unwrap_or(usize::MAX));
    ready.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SerializedBlock, SerializedEdge, SerializedWorkflowState, WorkflowMetadata};
    use serde_json::Value;
    use std::collections::HashMap as Map;

    fn block(id: &str, block_type: &str) -> SerializedBlock {
        SerializedBlock {
            id: id.to_string(),
            block_type: block_type.to_string(),
            name: id.to_string(),
            position: None,
            enabled: true,
            sub_blocks: Map::new(),
            outputs: Value::Null,
        }
    }

    fn edge(id: &str, source: &str, target: &str, handle: Option<&str>) -> SerializedEdge {
        SerializedEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: handle.map(str::to_string),
            target_handle: None,
        }
    }

    #[test]
    fn condition_choice_leaves_other_branch_dead() {
        let state = SerializedWorkflowState {
            blocks: Map::from([
                ("start".to_string(), block("start", "starter")),
                ("cond".to_string(), block("cond", "condition")),
                ("then_b".to_string(), block("then_b", "function")),
                ("else_b".to_string(), block("else_b", "function")),
            ]),
            edges: vec![
                edge("e0", "start", "cond", None),
                edge("e1", "cond", "then_b", Some("condition-c1")),
                edge("e2", "cond", "else_b", Some("condition-c2")),
            ],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        let graph = WorkflowGraph::load("wf", &state).unwrap();
        let mut tracker = PathTracker::seed("start");
        tracker.activate_successors(&graph, "start");
        tracker.activate_condition_choice(&graph, "cond", "c2");

        let mut executed = HashSet::new();
        executed.insert("start".to_string());
        executed.insert("cond".to_string());
        let ready = ready_blocks(&graph, &tracker, &executed);
        assert_eq!(ready, vec!["else_b".to_string()]);
        assert!(!tracker.is_active("then_b"));
    }

    #[test]
    fn ready_blocks_deterministic_order() {
        let state = SerializedWorkflowState {
            blocks: Map::from([
                ("start".to_string(), block("start", "starter")),
                ("b".to_string(), block("b", "function")),
                ("a".to_string(), block("a", "function")),
            ]),
            edges: vec![edge("e0", "start", "a", None), edge("e1", "start", "b", None)],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        let graph = WorkflowGraph::load("wf", &state).unwrap();
        let mut tracker = PathTracker::seed("start");
        tracker.activate_successors(&graph, "start");
        let mut executed = HashSet::new();
        executed.insert("start".to_string());
        let ready = ready_blocks(&graph, &tracker, &executed);
        assert_eq!(ready, vec!["a".to_string(), "b".to_string()]);
    }
}
