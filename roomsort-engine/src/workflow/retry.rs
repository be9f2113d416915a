//! Step retry policies

use roomsort_common::config::{RetryConfig, WorkflowConfig};
use std::time::Duration;

use super::state_machine::WorkflowState;

/// Longest single retry delay (one day); later retries stop growing
const MAX_RETRY_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRetryPolicies {
    pub fast_tier: RetryConfig,
    pub fallback_tier: RetryConfig,
}

impl StepRetryPolicies {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            fast_tier: config.fast_tier_retry,
            fallback_tier: config.fallback_tier_retry,
        }
    }

    /// Only the two classification steps are retried
    pub fn for_state(&self, state: WorkflowState) -> RetryConfig {
        match state {
            WorkflowState::FastTierClassify => self.fast_tier,
            WorkflowState::FallbackTierClassify => self.fallback_tier,
            _ => RetryConfig::none(),
        }
    }
}

/// Delay before retry number `retry` (1-based): `interval * rate^(retry-1)`
pub fn retry_delay(policy: &RetryConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = policy.interval_secs as f64 * policy.backoff_rate.powi(exponent);
    Duration::from_secs_f64(secs.clamp(0.0, MAX_RETRY_DELAY_SECS))
}
