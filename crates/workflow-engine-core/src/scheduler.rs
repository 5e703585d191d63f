//! Schedule tick loop (spec §4.7): polls persistence for due schedules and single-flights
//! execution per workflow. Invocation is externally driven — nominally once per minute — so
//! this module exposes `tick()` as the unit of work rather than owning its own timer.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::context::{LogLevel, LogRecord};
use crate::error::new_execution_id;
use crate::executor::Executor;
use crate::graph::{Block, WorkflowGraph};
use crate::persistence::{PersistenceStore, Schedule, ScheduleUpdate, SecretDecryptor, ToolRegistry};
use crate::planner::{ScheduleConfig, next_run_time};
use crate::resolver::decrypt_environment;
use crate::value::BlockOutput;

/// Single-flight token set keyed on `workflowId`. Entries are inserted on claim and removed
/// on every exit path via [`SingleFlightGuard`]'s `Drop`.
struct SingleFlightGuard<'a> {
    set: &'a DashMap<String, ()>,
    key: String,
}

impl<'a> SingleFlightGuard<'a> {
    fn acquire(set: &'a DashMap<String, ()>, key: &str) -> Option<Self> {
        match set.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self { set, key: key.to_string() })
            }
        }
    }
}

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// Read one sub-block's raw literal string value (schedule configuration is never a
/// cross-block reference, so this bypasses the resolver entirely).
fn string_field(block: &Block, field_id: &str) -> Option<String> {
    match block.sub_blocks.get(field_id).map(|f| &f.value) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}

fn u32_field(block: &Block, field_id: &str) -> Option<u32> {
    block
        .sub_blocks
        .get(field_id)
        .and_then(|f| f.value.as_u64())
        .map(|n| n as u32)
}

/// Build the planner's schedule configuration from the starter block's sub-block fields.
pub fn schedule_config_from_block(block: &Block) -> ScheduleConfig {
    ScheduleConfig {
        schedule_type: string_field(block, "scheduleType").unwrap_or_default(),
        timezone: string_field(block, "timezone"),
        cron_expression: string_field(block, "cronExpression"),
        minutes_interval: u32_field(block, "minutesInterval"),
        minutes_starting_at: string_field(block, "minutesStartingAt"),
        hourly_minute: u32_field(block, "hourlyMinute"),
        daily_time: string_field(block, "dailyTime"),
        weekly_day: string_field(block, "weeklyDay"),
        weekly_day_time: string_field(block, "weeklyDayTime"),
        monthly_day: u32_field(block, "monthlyDay"),
        monthly_time: string_field(block, "monthlyTime"),
    }
}

/// Drives one polling cycle across due schedules, single-flighting per workflow and handing
/// each to the [`Executor`].
pub struct ScheduleTickLoop {
    persistence: Arc<dyn PersistenceStore>,
    secrets: Arc<dyn SecretDecryptor>,
    tools: Arc<dyn ToolRegistry>,
    executor: Executor,
    config: EngineConfig,
    in_flight: DashMap<String, ()>,
}

impl ScheduleTickLoop {
    pub fn new(
        persistence: Arc<dyn PersistenceStore>,
        secrets: Arc<dyn SecretDecryptor>,
        tools: Arc<dyn ToolRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            persistence,
            secrets,
            tools,
            executor: Executor::new(config.clone()),
            config,
            in_flight: DashMap::new(),
        }
    }

    /// Run one tick: load the due batch and process each schedule to completion.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let due = self.persistence.load_due_schedules(now, self.config.batch_size).await;
        for schedule in due {
            self.process_schedule(schedule, now).await;
        }
    }

    /// Poll forever at the given cadence. Convenience wrapper; callers that already drive
    /// their own timer (a cron job, a k8s CronJob) should call [`Self::tick`] directly instead.
    pub async fn run(&self, cadence: StdDuration) -> ! {
        let mut interval = tokio::time::interval(cadence);
        loop {
            interval.tick().await;
            self.tick(Utc::now()).await;
        }
    }

    async fn process_schedule(&self, schedule: Schedule, tick_start: DateTime<Utc>) {
        let Some(_guard) = SingleFlightGuard::acquire(&self.in_flight, &schedule.workflow_id) else {
            return;
        };

        let Some(workflow) = self.persistence.load_workflow(&schedule.workflow_id).await else {
            return;
        };

        let graph = match WorkflowGraph::load(workflow.id.clone(), &workflow.state) {
            Ok(graph) => graph,
            Err(err) => {
                tracing::error!(workflow_id = %schedule.workflow_id, error = %err, "failed to load workflow graph");
                return;
            }
        };

        let ciphertext_env = self
            .persistence
            .load_environment(&workflow.owner_id)
            .await
            .unwrap_or_default();
        let environment_variables = match decrypt_environment(&ciphertext_env, self.secrets.as_ref()) {
            Ok(env) => env,
            Err(err) => {
                tracing::error!(workflow_id = %schedule.workflow_id, error = %err, "environment decryption failed");
                self.persistence
                    .append_log(LogRecord::new(
                        &schedule.workflow_id,
                        new_execution_id(),
                        LogLevel::Error,
                        format!(
                            "environment decryption failed for workflow {}: {}",
                            schedule.workflow_id, err
                        ),
                        None,
                        "schedule",
                    ))
                    .await;
                self.persistence
                    .update_schedule(
                        &schedule.id,
                        ScheduleUpdate {
                            last_ran_at: schedule.last_ran_at,
                            next_run_at: tick_start + self.config.retry_delay,
                            updated_at: tick_start,
                        },
                    )
                    .await;
                return;
            }
        };

        let mut initial_block_states = HashMap::new();
        initial_block_states.insert(
            graph.starter_id().to_string(),
            BlockOutput::Starter { payload: Value::Object(Map::new()) },
        );

        let report = self
            .executor
            .execute(&graph, initial_block_states, environment_variables, self.tools.as_ref(), None)
            .await;

        let execution_id = new_execution_id();
        for log in &report.logs {
            let level = if log.success { LogLevel::Info } else { LogLevel::Error };
            let message = if log.success {
                format!("block {} ({}) completed", log.block_name, log.block_type)
            } else {
                format!(
                    "block {} ({}) failed: {}",
                    log.block_name,
                    log.block_type,
                    log.error.as_deref().unwrap_or("unknown error")
                )
            };
            self.persistence
                .append_log(LogRecord::new(
                    &schedule.workflow_id,
                    execution_id,
                    level,
                    message,
                    Some(log.duration_ms),
                    "schedule",
                ))
                .await;
        }

        let aggregate_level = if report.success { LogLevel::Info } else { LogLevel::Error };
        let aggregate_message = if report.success {
            format!(
                "workflow {} execution succeeded in {}ms",
                schedule.workflow_id,
                report.total_success_duration_ms()
            )
        } else {
            format!(
                "workflow {} execution failed: {}",
                schedule.workflow_id,
                report.error.as_deref().unwrap_or("unknown error")
            )
        };
        self.persistence
            .append_log(LogRecord::new(
                &schedule.workflow_id,
                execution_id,
                aggregate_level,
                aggregate_message,
                None,
                "schedule",
            ))
            .await;

        if report.success {
            let starter_config = schedule_config_from_block(
                graph.block(graph.starter_id()).expect("starter block exists"),
            );
            match next_run_time(schedule.cron_expression.as_deref(), &starter_config, Some(tick_start), tick_start) {
                Ok(next_run_at) => {
                    self.persistence
                        .update_schedule(
                            &schedule.id,
                            ScheduleUpdate {
                                last_ran_at: Some(tick_start),
                                next_run_at,
                                updated_at: tick_start,
                            },
                        )
                        .await;
                }
                Err(err) => {
                    tracing::error!(workflow_id = %schedule.workflow_id, error = %err, "failed to plan next run");
                    self.persistence
                        .update_schedule(
                            &schedule.id,
                            ScheduleUpdate {
                                last_ran_at: schedule.last_ran_at,
                                next_run_at: tick_start + self.config.retry_delay,
                                updated_at: tick_start,
                            },
                        )
                        .await;
                }
            }
        } else {
            self.persistence
                .update_schedule(
                    &schedule.id,
                    ScheduleUpdate {
                        last_ran_at: schedule.last_ran_at,
                        next_run_at: tick_start + self.config.retry_delay,
                        updated_at: tick_start,
                    },
                )
                .await;
        }
    }
}
