//! Loop cadence and behaviour

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Largest batch a single tick will take on
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub payment_poll_interval_ms: u64,
    pub request_poll_interval_ms: u64,
    /// Records per tick, per loop
    pub batch_size: usize,
    /// Dispatch paid jobs to the agent executor straight away
    pub auto_trigger_agent: bool,
    /// Consecutive failures before a job is escalated
    pub max_retries: u32,
    pub agent_timeout_ms: u64,
    /// Floor for classifier budgets
    pub min_budget: Decimal,
    /// Parsed and reported; no timer acts on it
    pub escrow_timeout_hours: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            payment_poll_interval_ms: 10_000,
            request_poll_interval_ms: 5_000,
            batch_size: 5,
            auto_trigger_agent: true,
            max_retries: 5,
            agent_timeout_ms: 120_000,
            min_budget: Decimal::from(10),
            escrow_timeout_hours: 72,
        }
    }
}

impl OrchestratorConfig {
    pub fn payment_poll_interval(&self) -> Duration {
        Duration::from_millis(self.payment_poll_interval_ms)
    }

    pub fn request_poll_interval(&self) -> Duration {
        Duration::from_millis(self.request_poll_interval_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    /// `batch_size` clamped to `1..=MAX_BATCH_SIZE`
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.payment_poll_interval_ms == 0 || self.request_poll_interval_ms == 0 {
            return Err(OrchestratorError::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(OrchestratorError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.agent_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "agent_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.min_budget <= Decimal::ZERO {
            return Err(OrchestratorError::Config(
                "min_budget must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
