//! Cancellation (§4.10): hardCancel/softCancel and the registered
//! `timeoutFunction` handler that drives both from a fired deadline.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::store::{InstanceRecord, InstanceStatus};
use crate::timer::TimeoutPayload;

/// Unconditional termination: status → `cancelled` regardless of any step
/// hint (§4.10).
pub async fn hard_cancel(engine: &Engine, instance_id: &str, code: &str, message: &str) -> EngineResult<()> {
    cancel(engine, instance_id, code, message).await
}

/// Same termination as [`hard_cancel`]. The reference behavior ignores the
/// `step` hint entirely (§9 open question); it is accepted here purely to
/// keep the public API shape from §4.10 intact for callers that have one.
pub async fn soft_cancel(
    engine: &Engine,
    instance_id: &str,
    _step: u32,
    code: &str,
    message: &str,
) -> EngineResult<()> {
    cancel(engine, instance_id, code, message).await
}

async fn cancel(engine: &Engine, instance_id: &str, code: &str, message: &str) -> EngineResult<()> {
    let broadcaster = spawn_cancel_broadcast(engine.clone(), instance_id.to_string());

    let result = cancel_inner(engine, instance_id, code, message).await;

    broadcaster.abort();
    result
}

/// §4.10 step 1: a background ticker that broadcasts `cancelSubflow` for
/// this instance every millisecond so a remote node holding the lock
/// observes cancellation promptly (§9 "any equivalent push or pub/sub
/// suffices provided the target receives within bounded latency").
fn spawn_cancel_broadcast(engine: Engine, instance_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(engine.config().cancel_broadcast_interval.max(Duration::from_millis(1)));
        loop {
            interval.tick().await;
            engine.locks().broadcast_cancel(&instance_id);
        }
    })
}

async fn cancel_inner(engine: &Engine, instance_id: &str, code: &str, message: &str) -> EngineResult<()> {
    let mut record = engine.store().load(instance_id).await?;

    if !record.status.is_resumable() {
        tracing::debug!(status = ?record.status, "instance already terminal, cancellation is a no-op");
        return Ok(());
    }

    if record.error_code.is_none() {
        record
            .set_error_once(code.to_string(), message.to_string())
            .map_err(crate::error::EngineError::Workflow)?;
    }
    record.status = InstanceStatus::Cancelled;
    record.end_time = Some(crate::store::now_millis());
    engine.store().save(&record).await?;
    crate::metrics::CANCELLATIONS_TOTAL
        .with_label_values(&[if code == crate::error::codes::CANCELS_TIMEOUT { "timeout" } else { "explicit" }])
        .inc();

    let timer_id = crate::run_loop::timer_id_for(&record);
    engine.timers().action_timer_by_name(&timer_id, crate::timer::TimerAction::Delete).await.ok();

    cancel_living_children(engine, &record).await;

    crate::run_loop::wake_caller(
        engine,
        &record,
        Some(record.error_code.clone().unwrap_or_default()),
        record.error_message.clone(),
        None,
    )
    .await;

    Ok(())
}

/// §4.10 step 4: cancel children of whichever state the instance was in when
/// cancelled, following the same isolate/subflow policy as a failed run pass
/// (§4.7). Best-effort: the state itself no longer exists to ask, so the
/// state definition and logic are re-resolved from the last entry in `flow`.
async fn cancel_living_children(engine: &Engine, record: &InstanceRecord) {
    let Some(current_state) = record.flow.last() else { return };

    let model = match engine.models().resolve(&record.workflow_ref).await {
        Ok(model) => model,
        Err(err) => {
            tracing::debug!(?err, "could not resolve workflow model while cancelling children");
            return;
        }
    };
    let Ok(state_def) = model.state(current_state) else { return };
    let Ok(logic) = engine.registry().build(state_def) else { return };

    crate::run_loop::cancel_living_children(engine, record, logic.as_ref()).await;
}

/// The registered `timeoutFunction` handler (§4.10, §6): `{instance_id,
/// step, soft}` drives softCancel (interrupt deadline) or hardCancel (kill
/// deadline).
pub async fn timeout_function(engine: &Engine, payload: TimeoutPayload) -> EngineResult<()> {
    if payload.soft {
        soft_cancel(
            engine,
            &payload.instance_id,
            payload.step,
            crate::error::codes::CANCELS_TIMEOUT,
            "operation timed out",
        )
        .await
    } else {
        hard_cancel(engine, &payload.instance_id, crate::error::codes::CANCELS_TIMEOUT, "workflow timed out").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_and_hard_timeout_messages_differ() {
        assert_ne!(
            payload_message(true),
            payload_message(false),
        );
    }

    fn payload_message(soft: bool) -> &'static str {
        if soft { "operation timed out" } else { "workflow timed out" }
    }
}
