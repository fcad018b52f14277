//! Transition function (§4.9): advances the persisted flow to a new state
//! and launches the next Run Loop pass.

use serde_json::Value;
use tracing::Instrument;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::store::now_millis;

/// Advances `instance_id` from `expected_step` to `next_state` carrying
/// `data` as the new state document, under the instance lock (§4.9).
///
/// `expected_step` is the flow length the caller believes is current
/// ("tardy" deliveries — e.g. a duplicate wake racing a transition that
/// already landed — are detected here and silently dropped, §5 ordering
/// guarantees).
#[tracing::instrument(skip(engine, data), fields(instance_id = %instance_id, next_state = %next_state))]
pub async fn transition(
    engine: &Engine,
    instance_id: &str,
    expected_step: u32,
    next_state: &str,
    data: Value,
    attempt: u32,
) -> EngineResult<()> {
    let lock = engine.locks().acquire(instance_id, engine.config().lock_wait).await?;
    let mut record = engine.store().load(instance_id).await?;

    if record.check_flow_step_invariant(expected_step).is_err() {
        tracing::debug!(
            actual_step = record.flow.len(),
            expected_step,
            "tardy transition, flow already advanced, aborting"
        );
        return Ok(());
    }

    let model = engine.models().resolve(&record.workflow_ref).await.map_err(EngineError::Other)?;

    if expected_step == 0 {
        install_initial_timeouts(engine, &mut record, &model).await?;
    }

    let state_def = model.state(next_state).map_err(|_| EngineError::UnknownState(next_state.to_string()))?;
    let logic = engine.registry().build(state_def).map_err(EngineError::Other)?;

    record.flow.push(next_state.to_string());
    record.state_data = data;
    record.memory = None;
    record.attempts = attempt;
    record.deadline = logic.deadline();
    record.status = crate::store::InstanceStatus::Running;

    engine.store().save(&record).await?;

    let timer_id = crate::timer::timeout_timer_id(instance_id, record.step());
    let payload = serde_json::to_vec(&crate::timer::TimeoutPayload {
        instance_id: instance_id.to_string(),
        step: record.step(),
        soft: true,
    })
    .expect("timeout payload always serializable");
    engine
        .timers()
        .add_one_shot(&timer_id, crate::timer::WakeFunction::TimeoutFunction, record.deadline, payload)
        .await?;

    drop(lock);

    let engine = engine.clone();
    let instance_id = instance_id.to_string();
    tokio::spawn(
        async move {
            if let Err(err) = crate::run_loop::run_state(&engine, &instance_id, None, None).await {
                tracing::debug!(?err, "run pass ended without completing");
            }
        }
        .in_current_span(),
    );

    Ok(())
}

/// Installs the soft (`interrupt`)/hard (`kill`) timeout pair when entering
/// the start state (§4.9 step 1). The hard timeout is armed directly as a
/// `timeoutFunction` timer tagged `soft=false`; the soft deadline is what
/// `record.deadline`/the per-step timer track going forward.
async fn install_initial_timeouts(
    engine: &Engine,
    record: &mut crate::store::InstanceRecord,
    model: &crate::registry::WorkflowModel,
) -> EngineResult<()> {
    let now = now_millis();
    let soft_delta = model
        .soft_timeout
        .as_deref()
        .and_then(parse_iso8601_millis)
        .unwrap_or_else(|| engine.config().default_soft_timeout.as_millis() as i64);
    let hard_delta = model
        .hard_timeout
        .as_deref()
        .and_then(parse_iso8601_millis)
        .unwrap_or_else(|| engine.config().default_hard_timeout_extra.as_millis() as i64);

    let soft_deadline = now + soft_delta;
    let hard_deadline = soft_deadline + hard_delta;

    let hard_timer_id = format!("timeout:{}:hard", record.instance_id);
    let hard_payload = serde_json::to_vec(&crate::timer::TimeoutPayload {
        instance_id: record.instance_id.clone(),
        step: record.step(),
        soft: false,
    })
    .expect("timeout payload always serializable");
    engine
        .timers()
        .add_one_shot(&hard_timer_id, crate::timer::WakeFunction::TimeoutFunction, hard_deadline, hard_payload)
        .await?;

    // `record.deadline` itself is set by the caller from `logic.deadline()`
    // right after this returns (§4.9 step 4) — the per-step deadline always
    // wins over this workflow-level default. `soft_deadline` only feeds the
    // hard-kill calculation above.
    let _ = soft_deadline;
    Ok(())
}

fn parse_iso8601_millis(duration: &str) -> Option<i64> {
    let parsed: iso8601::Duration = iso8601::duration(duration).ok()?;
    Some(crate::retry::iso8601_duration_millis(&parsed))
}
