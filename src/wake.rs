//! Wake callbacks (§6): the handlers registered with the timer service and
//! event bus. Each re-verifies `step == len(flow)` and `status ∈ {pending,
//! running}` before resuming, so duplicate delivery is a safe no-op (§5,
//! §8 property 6).

use serde_json::Value;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::events::InboundEvent;
use crate::timer::StepWakePayload;

/// `sleepWakeup(payload)`: resumes with wakedata `"sleep"` (§6).
pub async fn sleep_wakeup(engine: &Engine, payload: StepWakePayload) -> EngineResult<()> {
    resume_step(engine, &payload, None, Some(b"sleep".to_vec())).await
}

/// `retryWakeup(payload)`: resumes with no savedata/wakedata (§6).
pub async fn retry_wakeup(engine: &Engine, payload: StepWakePayload) -> EngineResult<()> {
    resume_step(engine, &payload, None, None).await
}

/// `eventsWakeup(signature, events)`: savedata is the persisted `memory`
/// bytes, wakedata is the JSON-encoded event list in registration order
/// (§6). `memory` is deliberately left untouched (§9 open question);
/// clearing it is the resuming state logic's responsibility.
pub async fn events_wakeup(
    engine: &Engine,
    signature: crate::events::ListenerSignature,
    events: Vec<InboundEvent>,
) -> EngineResult<()> {
    let record = engine.store().load(&signature.instance_id).await?;

    if !record.status.is_resumable() {
        tracing::debug!(status = ?record.status, "instance not resumable, dropping events wake");
        return Ok(());
    }
    if record.step() != signature.step {
        tracing::debug!(
            actual_step = record.step(),
            expected_step = signature.step,
            "tardy events wake, step already advanced, aborting"
        );
        return Ok(());
    }

    let savedata = record.memory.clone();
    let wakedata = serde_json::to_vec(&events).map_err(|e| EngineError::Other(e.into()))?;

    crate::run_loop::run_state(engine, &signature.instance_id, savedata, Some(wakedata)).await
}

/// `wfcron(payload)`: payload is the UTF-8 workflow uid (§6); triggers a
/// fresh [`crate::invoke::cron_invoke`] rather than resuming an existing
/// instance.
pub async fn wfcron(engine: &Engine, namespace: &str, uid: &str) -> EngineResult<String> {
    crate::invoke::cron_invoke(engine, namespace, uid, Value::Null).await
}

async fn resume_step(
    engine: &Engine,
    payload: &StepWakePayload,
    savedata: Option<Vec<u8>>,
    wakedata: Option<Vec<u8>>,
) -> EngineResult<()> {
    let record = engine.store().load(&payload.instance_id).await?;

    if !record.status.is_resumable() {
        tracing::debug!(status = ?record.status, "instance not resumable, dropping wake");
        return Ok(());
    }
    if record.step() != payload.step {
        tracing::debug!(
            actual_step = record.step(),
            expected_step = payload.step,
            "tardy wake, step already advanced, aborting"
        );
        return Ok(());
    }

    crate::run_loop::run_state(engine, &payload.instance_id, savedata, wakedata).await
}
