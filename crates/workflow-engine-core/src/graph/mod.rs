//! In-memory workflow graph: blocks, edges, subflows, and the adjacency caches the executor
//! and path tracker consult on every step.

mod serialized;

use std::collections::{HashMap, HashSet};

use serde_json::Value;

pub use serialized::{
    IterationType, SerializedBlock, SerializedEdge, SerializedLoop, SerializedParallel,
    SerializedWorkflowState, SubBlockField, WorkflowMetadata,
};

use crate::error::GraphError;

/// Kind of block. Generic tool/agent block kinds are carried as their raw type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockType {
    Starter,
    Function,
    Condition,
    Router,
    Response,
    Loop,
    Parallel,
    Trigger,
    Agent,
    Tool(String),
}

impl BlockType {
    fn from_raw(raw: &str) -> Self {
        match raw {
            "starter" => BlockType::Starter,
            "function" => BlockType::Function,
            "condition" => BlockType::Condition,
            "router" => BlockType::Router,
            "response" => BlockType::Response,
            "loop" => BlockType::Loop,
            "parallel" => BlockType::Parallel,
            "trigger" => BlockType::Trigger,
            "agent" => BlockType::Agent,
            other => BlockType::Tool(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BlockType::Starter => "starter",
            BlockType::Function => "function",
            BlockType::Condition => "condition",
            BlockType::Router => "router",
            BlockType::Response => "response",
            BlockType::Loop => "loop",
            BlockType::Parallel => "parallel",
            BlockType::Trigger => "trigger",
            BlockType::Agent => "agent",
            BlockType::Tool(t) => t.as_str(),
        }
    }
}

/// One node in the workflow graph.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: String,
    pub block_type: BlockType,
    pub name: String,
    pub sub_blocks: HashMap<String, SubBlockField>,
    pub outputs: Value,
    pub enabled: bool,
    /// Position in a deterministic BFS traversal from the starter (spec §4.5 "graph topology
    /// index, stable across runs"). Ties among simultaneously-ready blocks are broken by this,
    /// not by block id, since the wire format's `blocks` map carries no declaration order.
    pub topology_index: usize,
}

/// One directed connection between two blocks.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: String,
    pub source_block_id: String,
    pub target_block_id: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubflowKind {
    Loop,
    Parallel,
}

/// A loop or parallel subflow grouping a set of blocks into an iteration scope.
#[derive(Debug, Clone)]
pub struct Subflow {
    pub id: String,
    pub kind: SubflowKind,
    pub nodes: HashSet<String>,
    pub iteration_count: Option<u64>,
    pub iteration_type: IterationType,
    pub collection: Option<String>,
}

/// Typed in-memory workflow graph with cached adjacency, built once at load time.
pub struct WorkflowGraph {
    pub id: String,
    blocks: HashMap<String, Block>,
    edges: Vec<Edge>,
    subflows: HashMap<String, Subflow>,
    starter_id: String,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    subflow_of: HashMap<String, String>,
    outgoing_by_handle: HashMap<String, HashMap<String, Vec<String>>>,
}

impl WorkflowGraph {
    /// Build the graph model from the durable serialized shape, computing and caching
    /// adjacency, the starter id, subflow membership, and handle-keyed dispatch tables.
    pub fn load(id: impl Into<String>, state: &SerializedWorkflowState) -> Result<Self, GraphError> {
        let mut blocks: HashMap<String, Block> = state
            .blocks
            .values()
            .map(|b| {
                (
                    b.id.clone(),
                    Block {
                        id: b.id.clone(),
                        block_type: BlockType::from_raw(&b.block_type),
                        name: b.name.clone(),
                        sub_blocks: b.sub_blocks.clone(),
                        outputs: b.outputs.clone(),
                        enabled: b.enabled,
                        topology_index: 0,
                    },
                )
            })
            .collect();

        for edge in &state.edges {
            if !blocks.contains_key(&edge.source) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    block_id: edge.source.clone(),
                });
            }
            if !blocks.contains_key(&edge.target) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    block_id: edge.target.clone(),
                });
            }
        }

        let edges: Vec<Edge> = state
            .edges
            .iter()
            .map(|e| Edge {
                id: e.id.clone(),
                source_block_id: e.source.clone(),
                target_block_id: e.target.clone(),
                source_handle: e.source_handle.clone(),
                target_handle: e.target_handle.clone(),
            })
            .collect();

        let starters: Vec<&String> = blocks
            .values()
            .filter(|b| b.block_type == BlockType::Starter)
            .map(|b| &b.id)
            .collect();
        let starter_id = match starters.len() {
            0 => return Err(GraphError::NoStarterBlock),
            1 => starters[0].clone(),
            n => return Err(GraphError::MultipleStarterBlocks(n)),
        };

        let mut subflows = HashMap::new();
        let mut subflow_of: HashMap<String, String> = HashMap::new();
        for (loop_id, l) in &state.loops {
            for node in &l.nodes {
                if let Some(existing) = subflow_of.insert(node.clone(), loop_id.clone())
                    && existing != *loop_id
                {
                    return Err(GraphError::BlockInMultipleSubflows(node.clone()));
                }
            }
            subflows.insert(
                loop_id.clone(),
                Subflow {
                    id: loop_id.clone(),
                    kind: SubflowKind::Loop,
                    nodes: l.nodes.iter().cloned().collect(),
                    iteration_count: l.iteration_count,
                    iteration_type: l.iteration_type.clone(),
                    collection: l.collection.clone(),
                },
            );
        }
        for (parallel_id, p) in &state.parallels {
            for node in &p.nodes {
                if let Some(existing) = subflow_of.insert(node.clone(), parallel_id.clone())
                    && existing != *parallel_id
                {
                    return Err(GraphError::BlockInMultipleSubflows(node.clone()));
                }
            }
            subflows.insert(
                parallel_id.clone(),
                Subflow {
                    id: parallel_id.clone(),
                    kind: SubflowKind::Parallel,
                    nodes: p.nodes.iter().cloned().collect(),
                    iteration_count: p.parallel_count,
                    iteration_type: IterationType::Fixed,
                    collection: p.collection.clone(),
                },
            );
        }

        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outgoing_by_handle: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            outgoing
                .entry(edge.source_block_id.clone())
                .or_default()
                .push(idx);
            incoming
                .entry(edge.target_block_id.clone())
                .or_default()
                .push(idx);
            if let Some(handle) = &edge.source_handle {
                outgoing_by_handle
                    .entry(edge.source_block_id.clone())
                    .or_default()
                    .entry(handle.clone())
                    .or_default()
                    .push(edge.target_block_id.clone());
            }
        }

        assign_topology_indices(&mut blocks, &edges, &outgoing, &starter_id);

        Ok(Self {
            id: id.into(),
            blocks,
            edges,
            subflows,
            starter_id,
            incoming,
            outgoing,
            subflow_of,
            outgoing_by_handle,
        })
    }

    pub fn starter_id(&self) -> &str {
        &self.starter_id
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Resolve a block by its stable id, or (failing that) by its display name, as the
    /// resolver's `<blockNameOrId.field>` syntax permits either.
    pub fn find_block_by_name_or_id(&self, name_or_id: &str) -> Option<&Block> {
        self.blocks.get(name_or_id).or_else(|| {
            self.blocks
                .values()
                .find(|b| b.name == name_or_id)
        })
    }

    pub fn subflow_of(&self, block_id: &str) -> Option<&Subflow> {
        self.subflow_of
            .get(block_id)
            .and_then(|id| self.subflows.get(id))
    }

    /// Look up a loop/parallel subflow definition by its own id (the subflow entry block
    /// shares this id).
    pub fn subflow(&self, id: &str) -> Option<&Subflow> {
        self.subflows.get(id)
    }

    pub fn subflows(&self) -> impl Iterator<Item = &Subflow> {
        self.subflows.values()
    }

    pub fn successors(&self, block_id: &str) -> Vec<&Edge> {
        self.outgoing
            .get(block_id)
            .map(|idxs| idxs.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, block_id: &str) -> Vec<&Edge> {
        self.incoming
            .get(block_id)
            .map(|idxs| idxs.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Targets reachable from `block_id` via the given `sourceHandle` (e.g. `condition-<id>`).
    pub fn targets_for_handle(&self, block_id: &str, handle: &str) -> Vec<&str> {
        self.outgoing_by_handle
            .get(block_id)
            .and_then(|by_handle| by_handle.get(handle))
            .map(|targets| targets.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether the block has at least one outgoing edge with a `sourceHandle`, i.e. a
    /// branching block (condition/router) whose successors are dispatched by decision
    /// rather than activated unconditionally.
    pub fn has_handled_outgoing(&self, block_id: &str) -> bool {
        self.outgoing_by_handle
            .get(block_id)
            .is_some_and(|m| !m.is_empty())
    }
}

/// Assigns each block a position in a deterministic BFS traversal from the starter, breaking
/// ties among a node's simultaneously-discovered successors by target block id so that the
/// index depends only on graph structure, never on `HashMap` iteration order. Blocks
/// unreachable from the starter (dead code in the graph) are appended afterward, sorted by id.
fn assign_topology_indices(
    blocks: &mut HashMap<String, Block>,
    edges: &[Edge],
    outgoing: &HashMap<String, Vec<usize>>,
    starter_id: &str,
) {
    let mut order: Vec<String> = Vec::with_capacity(blocks.len());
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: std::collections::VecDeque<String> = std::collections::VecDeque::new();

    visited.insert(starter_id.to_string());
    queue.push_back(starter_id.to_string());
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());
        let mut successors: Vec<&str> = outgoing
            .get(&current)
            .map(|idxs| idxs.iter().map(|&i| edges[i].target_block_id.as_str()).collect())
            .unwrap_or_default();
        successors.sort_unstable();
        successors.dedup();
        for target in successors {
            if visited.insert(target.to_string()) {
                queue.push_back(target.to_string());
            }
        }
    }

    let mut remaining: Vec<&String> = blocks.keys().filter(|id| !visited.contains(*id)).collect();
    remaining.sort();
    order.extend(remaining.into_iter().cloned());

    for (index, block_id) in order.into_iter().enumerate() {
        if let Some(block) = blocks.get_mut(&block_id) {
            block.topology_index = index;
        }
    }
}
