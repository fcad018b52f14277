//! Timer Facade (§4.4): a named, idempotent one-shot timer service. The
//! distributed scheduler and its wire protocol are an external
//! collaborator — out of scope here (§1) — this module only states the
//! contract the engine drives it through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Action applied to an existing timer by [`TimerService::action_timer_by_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Delete,
}

/// The function names the engine registers handlers under (§6). Timer
/// payloads are opaque bytes to the facade; the engine serializes/deserializes
/// them on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeFunction {
    SleepWakeup,
    RetryWakeup,
    TimeoutFunction,
    Wfcron,
    EventsWakeup,
}

impl WakeFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            WakeFunction::SleepWakeup => "sleepWakeup",
            WakeFunction::RetryWakeup => "retryWakeup",
            WakeFunction::TimeoutFunction => "timeoutFunction",
            WakeFunction::Wfcron => "wfcron",
            WakeFunction::EventsWakeup => "eventsWakeup",
        }
    }
}

/// Payload shape shared by `sleepWakeup`/`retryWakeup` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepWakePayload {
    pub instance_id: String,
    pub state: String,
    pub step: u32,
}

/// Payload for `timeoutFunction` (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutPayload {
    pub instance_id: String,
    pub step: u32,
    /// `true` for the interrupt (soft) deadline, `false` for the kill (hard) one.
    pub soft: bool,
}

/// The contract the engine needs from the distributed timer service.
/// Delivery is at-least-once and single-firing per scheduled occurrence;
/// handlers driven through this facade must be idempotent under duplicate
/// delivery (enforced by the run loop's step/status revalidation, not here).
#[async_trait]
pub trait TimerService: Send + Sync {
    /// Schedules a one-shot timer. If `id` already exists it is replaced
    /// (§4.4).
    async fn add_one_shot(
        &self,
        id: &str,
        function: WakeFunction,
        at_time_millis: i64,
        payload: Vec<u8>,
    ) -> EngineResult<()>;

    async fn action_timer_by_name(&self, id: &str, action: TimerAction) -> EngineResult<()>;

    /// Deletes every timer registered for an instance, returning the count
    /// removed (§4.10 step 5 relies on the per-step variant of this id
    /// scheme: `timeout:<id>[:<step>]`).
    async fn delete_timers_for_instance(&self, instance_id: &str) -> EngineResult<u32>;
}

/// Builds the per-step timeout timer id used throughout §4.9/§4.10.
pub fn timeout_timer_id(instance_id: &str, step: u32) -> String {
    format!("timeout:{instance_id}:{step}")
}

pub fn retry_timer_id(instance_id: &str, step: u32) -> String {
    format!("retry:{instance_id}:{step}")
}

pub fn sleep_timer_id(instance_id: &str, step: u32) -> String {
    format!("sleep:{instance_id}:{step}")
}
