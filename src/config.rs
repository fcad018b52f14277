//! Tunable limits for the engine core.
//!
//! Kept self-contained rather than layered on an external config service: the
//! persistent store, timer service, and event bus are external collaborators
//! reached through the traits in [`crate::store`], [`crate::timer`], and
//! [`crate::events`], so there is no shared config tree to join.

use std::time::Duration;

/// `maxWorkflowSteps`.
pub const MAX_WORKFLOW_STEPS: u32 = 10;
/// `maxSubflowDepth`.
pub const MAX_SUBFLOW_DEPTH: u32 = 5;
/// Breaker bound on catch-loop re-entries within a single failure pass.
pub const MAX_CATCH_LOOP_PASSES: u8 = 10;
/// Number of `[A-Za-z]` characters appended to an instance id.
pub const INSTANCE_ID_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workflow_steps: u32,
    pub max_subflow_depth: u32,
    pub lock_wait: Duration,
    pub jq_budget: Duration,
    /// Retries scheduled with an effective delay below this sleep in-process
    /// instead of arming a timer.
    pub retry_inline_threshold: Duration,
    pub default_soft_timeout: Duration,
    pub default_hard_timeout_extra: Duration,
    pub cancel_broadcast_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_workflow_steps: MAX_WORKFLOW_STEPS,
            max_subflow_depth: MAX_SUBFLOW_DEPTH,
            lock_wait: Duration::from_secs(5),
            jq_budget: Duration::from_secs(10),
            retry_inline_threshold: Duration::from_secs(5),
            default_soft_timeout: Duration::from_secs(15 * 60),
            default_hard_timeout_extra: Duration::from_secs(5 * 60),
            cancel_broadcast_interval: Duration::from_millis(1),
        }
    }
}
