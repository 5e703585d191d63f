//! Directed-graph workflow engine with an integrated time-based scheduler.
//!
//! The crate is organized leaf-to-root, mirroring the data flow of one schedule tick:
//! [`graph`] models the workflow; [`resolver`] substitutes block references and secrets
//! into block inputs; [`path_tracker`] tracks which blocks are still eligible to run given
//! routing/condition decisions; [`block`] holds one handler per block kind; [`executor`]
//! drives a single run of the graph; [`planner`] computes next-fire times; [`scheduler`]
//! polls for due schedules and single-flights execution per workflow.
//!
//! Persistence, secret decryption, and tool dispatch are external collaborators, expressed
//! here only as the traits in [`persistence`] that the core depends on.

pub mod block;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod path_tracker;
pub mod persistence;
pub mod planner;
pub mod resolver;
pub mod scheduler;
pub mod value;

pub use config::EngineConfig;
pub use context::{BlockLog, ExecutionContext, ExecutionReport, LogLevel};
pub use error::EngineError;
pub use executor::Executor;
pub use graph::{Block, BlockType, Edge, SerializedWorkflowState, WorkflowGraph};
pub use persistence::{PersistenceStore, SecretDecryptor, Schedule, ToolRegistry, WorkflowRow};
pub use planner::next_run_time;
pub use scheduler::ScheduleTickLoop;
