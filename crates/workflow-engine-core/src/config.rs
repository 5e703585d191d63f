//! Engine-wide tunables. Defaults match the spec's recommended constants.

use std::time::Duration;

/// Tick cadence, batch size, retry delay, and iteration budget for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How many due schedules a single tick will claim at most.
    pub batch_size: usize,
    /// How far `nextRunAt` is pushed out after a failed tick (decryption or execution failure).
    pub retry_delay: Duration,
    /// Safety net on the executor's ready-queue loop; bounds runaway subflow iteration.
    pub iteration_budget: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry_delay: Duration::from_secs(60),
            iteration_budget: 10_000,
        }
    }
}
