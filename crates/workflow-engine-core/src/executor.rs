//! Ready-queue driven executor (spec §4.5): walks the graph once, dispatching ready blocks to
//! handlers, consulting the path tracker, and aggregating logs into an [`ExecutionReport`].

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use crate::block::{BlockHandler, BlockRegistry, Decision, HandlerContext};
use crate::config::EngineConfig;
use crate::context::{BlockLog, Decisions, ExecutionContext, ExecutionReport};
use crate::error::{BlockError, ExecutorError};
use crate::graph::{Block, BlockType, IterationType, Subflow, WorkflowGraph};
use crate::persistence::ToolRegistry;
use crate::path_tracker::{self, PathTracker};
use crate::value::BlockOutput;

/// Drives one execution of a [`WorkflowGraph`]. Stateless across runs; all per-run state
/// lives in the [`ExecutionContext`] built fresh by [`Executor::execute`].
pub struct Executor {
    registry: BlockRegistry,
    config: EngineConfig,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: BlockRegistry::with_defaults(),
            config,
        }
    }

    pub fn with_registry(registry: BlockRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Run the graph to completion (or failure/cancellation), producing an aggregate report.
    /// `initial_block_states` seeds already-known outputs (typically just the starter's),
    /// each of which counts as already executed.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        initial_block_states: HashMap<String, BlockOutput>,
        environment_variables: HashMap<String, String>,
        tool_registry: &dyn ToolRegistry,
        deadline: Option<Instant>,
    ) -> ExecutionReport {
        let mut cx = ExecutionContext::new(graph.id.clone(), environment_variables);
        cx.executed_blocks.extend(initial_block_states.keys().cloned());
        cx.block_states = initial_block_states;

        let top_scope: HashSet<String> = graph
            .blocks()
            .filter(|b| graph.subflow_of(&b.id).is_none())
            .map(|b| b.id.clone())
            .collect();
        let mut tracker = PathTracker::seed(graph.starter_id());
        tracker.activate_successors(graph, graph.starter_id());
        let mut budget = 0u32;

        let outcome = self
            .run_scope(
                graph,
                &top_scope,
                &mut tracker,
                &mut cx.executed_blocks,
                &mut cx.block_states,
                &mut cx.block_logs,
                &mut cx.decisions,
                &mut cx.completed_loops,
                &cx.environment_variables,
                &cx.loop_items,
                &cx.loop_iterations,
                tool_registry,
                deadline,
                &mut budget,
            )
            .await;

        // The top-level path tracker owns the authoritative active set; mirror it back onto
        // the execution context, which spec §3 names as the data-model home for it.
        cx.active_execution_path = tracker.active_set().clone();

        let success = outcome.is_ok();
        let error = outcome.err().map(|e| e.to_string());
        let output = Self::final_output(graph, &cx);

        ExecutionReport {
            success,
            logs: cx.block_logs,
            output,
            error,
            block_states: cx.block_states,
            active_execution_path: cx.active_execution_path,
            completed_loops: cx.completed_loops,
        }
    }

    /// The run's headline output: the last Response block's output if one ran, otherwise the
    /// last executed block's output.
    fn final_output(graph: &WorkflowGraph, cx: &ExecutionContext) -> Option<BlockOutput> {
        if let Some(log) = cx.block_logs.iter().rev().find(|l| {
            graph
                .block(&l.block_id)
                .is_some_and(|b| b.block_type == BlockType::Response)
        }) {
            return cx.block_states.get(&log.block_id).cloned();
        }
        cx.block_logs
            .last()
            .and_then(|log| cx.block_states.get(&log.block_id).cloned())
    }

    /// Ready-queue loop over one scope (the top-level graph, or one loop/parallel iteration's
    /// body). `executed` and `tracker` are scoped to the caller: fresh per subflow iteration,
    /// run-lifetime at the top level.
    #[allow(clippy::too_many_arguments)]
    async fn run_scope(
        &self,
        graph: &WorkflowGraph,
        scope: &HashSet<String>,
        tracker: &mut PathTracker,
        executed: &mut HashSet<String>,
        block_states: &mut HashMap<String, BlockOutput>,
        block_logs: &mut Vec<BlockLog>,
        decisions: &mut Decisions,
        completed_loops: &mut HashSet<String>,
        environment_variables: &HashMap<String, String>,
        loop_items: &HashMap<String, Value>,
        loop_iterations: &HashMap<String, u64>,
        tool_registry: &dyn ToolRegistry,
        deadline: Option<Instant>,
        budget: &mut u32,
    ) -> Result<(), ExecutorError> {
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ExecutorError::ExecutionCancelled);
                }
            }
            let ready: Vec<String> = path_tracker::ready_blocks(graph, tracker, executed)
                .into_iter()
                .filter(|id| scope.contains(id))
                .collect();
            if ready.is_empty() {
                break;
            }

            for block_id in ready {
                *budget += 1;
                if *budget > self.config.iteration_budget {
                    return Err(ExecutorError::IterationBudgetExceeded);
                }
                let block = graph.block(&block_id).expect("ready block exists in graph");

                if !block.enabled {
                    executed.insert(block_id.clone());
                    tracker.activate_successors(graph, &block_id);
                    continue;
                }

                if matches!(block.block_type, BlockType::Loop | BlockType::Parallel) {
                    let outcome = self
                        .run_subflow(
                            graph,
                            block,
                            block_states,
                            block_logs,
                            decisions,
                            completed_loops,
                            environment_variables,
                            loop_items,
                            loop_iterations,
                            tool_registry,
                            deadline,
                            budget,
                        )
                        .await;
                    executed.insert(block_id.clone());
                    match outcome {
                        Ok(()) => tracker.activate_successors(graph, &block_id),
                        Err(source) => {
                            return Err(ExecutorError::BlockFailed {
                                block_id: block_id.clone(),
                                block_type: block.block_type.as_str().to_string(),
                                source,
                            });
                        }
                    }
                    continue;
                }

                let handler = self
                    .registry
                    .handler_for(&block.block_type)
                    .ok_or_else(|| ExecutorError::NoHandler(block.block_type.as_str().to_string()))?;

                let started_at = Utc::now();
                let start_instant = Instant::now();
                let handler_ctx = HandlerContext {
                    workflow_id: graph.id.as_str(),
                    graph,
                    block_states: &*block_states,
                    environment_variables,
                    loop_items,
                    loop_iterations,
                    tool_registry,
                };
                let outcome = handler.execute(block, &handler_ctx).await;
                let ended_at = Utc::now();
                let duration_ms = start_instant.elapsed().as_millis() as u64;
                executed.insert(block_id.clone());

                match outcome {
                    Ok((output, decision)) => {
                        block_logs.push(BlockLog {
                            block_id: block_id.clone(),
                            block_name: block.name.clone(),
                            block_type: block.block_type.as_str().to_string(),
                            duration_ms,
                            started_at,
                            ended_at,
                            success: true,
                            error: None,
                        });
                        block_states.insert(block_id.clone(), output);
                        match decision {
                            Decision::None => tracker.activate_successors(graph, &block_id),
                            Decision::Condition { condition_id } => {
                                decisions.condition.insert(block_id.clone(), condition_id.clone());
                                tracker.activate_condition_choice(graph, &block_id, &condition_id);
                            }
                            Decision::Router { block_id: target, .. } => {
                                decisions.router.insert(block_id.clone(), target.clone());
                                tracker.activate_router_choice(&target);
                            }
                        }
                    }
                    Err(err) => {
                        block_logs.push(BlockLog {
                            block_id: block_id.clone(),
                            block_name: block.name.clone(),
                            block_type: block.block_type.as_str().to_string(),
                            duration_ms,
                            started_at,
                            ended_at,
                            success: false,
                            error: Some(err.to_string()),
                        });
                        return Err(ExecutorError::BlockFailed {
                            block_id: block_id.clone(),
                            block_type: block.block_type.as_str().to_string(),
                            source: err,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Drives one loop/parallel subflow entry to completion: computes the iteration count
    /// (or collection length), runs each iteration's body as its own fresh scope, and merges
    /// logs/outputs back into the enclosing run.
    #[allow(clippy::too_many_arguments)]
    async fn run_subflow(
        &self,
        graph: &WorkflowGraph,
        entry_block: &Block,
        block_states: &mut HashMap<String, BlockOutput>,
        block_logs: &mut Vec<BlockLog>,
        decisions: &mut Decisions,
        completed_loops: &mut HashSet<String>,
        environment_variables: &HashMap<String, String>,
        outer_loop_items: &HashMap<String, Value>,
        outer_loop_iterations: &HashMap<String, u64>,
        tool_registry: &dyn ToolRegistry,
        deadline: Option<Instant>,
        budget: &mut u32,
    ) -> Result<(), BlockError> {
        let subflow = graph
            .subflow(&entry_block.id)
            .ok_or_else(|| BlockError::Other(format!("block {} has no subflow definition", entry_block.id)))?
            .clone();
        let body_entries: Vec<String> = subflow
            .nodes
            .iter()
            .filter(|n| {
                graph
                    .predecessors(n)
                    .iter()
                    .all(|e| !subflow.nodes.contains(&e.source_block_id))
            })
            .cloned()
            .collect();

        let items: Vec<Option<Value>> = match &subflow.iteration_type {
            IterationType::Fixed => (0..subflow.iteration_count.unwrap_or(1)).map(|_| None).collect(),
            IterationType::Collection => {
                let raw = subflow.collection.clone().unwrap_or_default();
                let resolved = crate::resolver::resolve(&raw, graph, &*block_states, environment_variables)?
                    .into_value();
                match resolved {
                    Value::Array(items) => items.into_iter().map(Some).collect(),
                    other => vec![Some(other)],
                }
            }
        };

        let _ = decisions; // branch decisions inside a subflow body stay scoped to the iteration

        if matches!(entry_block.block_type, BlockType::Parallel) {
            let snapshot = block_states.clone();
            let futures = items.iter().enumerate().map(|(idx, item)| {
                self.run_iteration(
                    graph,
                    &subflow,
                    &body_entries,
                    idx as u64,
                    item.clone(),
                    snapshot.clone(),
                    environment_variables,
                    outer_loop_items,
                    outer_loop_iterations,
                    tool_registry,
                    deadline,
                )
            });
            let results = futures::future::join_all(futures).await;
            let mut first_error = None;
            for result in results {
                match result {
                    Ok((logs, states, spent, nested_loops)) => {
                        block_logs.extend(logs);
                        block_states.extend(states);
                        *budget += spent;
                        completed_loops.extend(nested_loops);
                    }
                    Err((logs, spent, err)) => {
                        block_logs.extend(logs);
                        *budget += spent;
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        } else {
            for (idx, item) in items.into_iter().enumerate() {
                let snapshot = block_states.clone();
                match self
                    .run_iteration(
                        graph,
                        &subflow,
                        &body_entries,
                        idx as u64,
                        item,
                        snapshot,
                        environment_variables,
                        outer_loop_items,
                        outer_loop_iterations,
                        tool_registry,
                        deadline,
                    )
                    .await
                {
                    Ok((logs, states, spent, nested_loops)) => {
                        block_logs.extend(logs);
                        block_states.extend(states);
                        *budget += spent;
                        completed_loops.extend(nested_loops);
                    }
                    Err((logs, spent, err)) => {
                        block_logs.extend(logs);
                        *budget += spent;
                        return Err(err);
                    }
                }
                if *budget > self.config.iteration_budget {
                    return Err(BlockError::Other("iteration budget exceeded".to_string()));
                }
            }
        }
        completed_loops.insert(subflow.id.clone());
        Ok(())
    }

    /// Runs one loop/parallel iteration's body in isolation and returns its logs, the
    /// resulting local block states, and how much budget it spent — or, on failure, the same
    /// minus the states plus the error.
    #[allow(clippy::too_many_arguments)]
    async fn run_iteration(
        &self,
        graph: &WorkflowGraph,
        subflow: &Subflow,
        body_entries: &[String],
        index: u64,
        item: Option<Value>,
        mut local_states: HashMap<String, BlockOutput>,
        environment_variables: &HashMap<String, String>,
        outer_loop_items: &HashMap<String, Value>,
        outer_loop_iterations: &HashMap<String, u64>,
        tool_registry: &dyn ToolRegistry,
        deadline: Option<Instant>,
    ) -> Result<
        (Vec<BlockLog>, HashMap<String, BlockOutput>, u32, HashSet<String>),
        (Vec<BlockLog>, u32, BlockError),
    > {
        let mut loop_items = outer_loop_items.clone();
        if let Some(item) = item {
            loop_items.insert(subflow.id.clone(), item);
        }
        let mut loop_iterations = outer_loop_iterations.clone();
        loop_iterations.insert(subflow.id.clone(), index);

        let mut tracker = PathTracker::default();
        for entry in body_entries {
            tracker.activate(entry);
        }
        let mut executed = HashSet::new();
        let mut logs = Vec::new();
        let mut decisions = Decisions::default();
        let mut nested_completed_loops = HashSet::new();
        let mut local_budget = 0u32;

        let result = self
            .run_scope(
                graph,
                &subflow.nodes,
                &mut tracker,
                &mut executed,
                &mut local_states,
                &mut logs,
                &mut decisions,
                &mut nested_completed_loops,
                environment_variables,
                &loop_items,
                &loop_iterations,
                tool_registry,
                deadline,
                &mut local_budget,
            )
            .await;

        match result {
            Ok(()) => Ok((logs, local_states, local_budget, nested_completed_loops)),
            Err(err) => Err((logs, local_budget, BlockError::Other(err.to_string()))),
        }
    }
}
