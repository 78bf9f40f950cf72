use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{config::AcquisitionConfig, session::SessionStatus};

/// Immutable tuning for one acquisition loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionSettings {
    pub quota: usize,
    pub unit_delay: Duration,
    pub batch_delay: Duration,
    pub release_retry_limit: u32,
    pub release_retry_delay: Duration,
    pub max_acquisitions_per_run: u64,
    pub allowed_prefixes: Vec<String>,
}

impl AcquisitionSettings {
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            quota: config.quota,
            unit_delay: Duration::from_millis(config.unit_delay_ms),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            release_retry_limit: config.release_retry_limit,
            release_retry_delay: Duration::from_millis(config.release_retry_delay_ms),
            max_acquisitions_per_run: config.max_acquisitions_per_run,
            allowed_prefixes: config.allowed_prefixes.clone(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self::from_config(&AcquisitionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    WaitingBetweenBatches,
    Complete,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Complete,
    Stopped,
}

/// What one invocation of the loop did, plus the persisted snapshot it ended on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub batches: u32,
    pub acquisitions: u64,
    pub status: SessionStatus,
}
