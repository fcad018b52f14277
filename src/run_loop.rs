//! The Run Loop (§4.7): `runState → classify outcome → transition/
//! terminate/retry`. The heart of the engine — everything else (invocation,
//! transition, retry, cancellation) exists to get a [`Engine`] into a
//! position to call [`run_state`] under the instance lock.

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::Instrument;

use crate::config::MAX_CATCH_LOOP_PASSES;
use crate::engine::{ActionResultPayload, Engine};
use crate::error::{codes, EngineError, EngineResult, WorkflowError};
use crate::logic::{ChildKind, RunOutcome, SaveData, WakeData};
use crate::metrics;
use crate::store::{InstanceRecord, InstanceStatus, StateTransition};
use crate::timer::timeout_timer_id;

/// Runs one state-dispatch pass for `instance_id` under a freshly acquired
/// advisory lock (§4.7). `savedata`/`wakedata` are populated only when a
/// wake handler is resuming a suspended state; a fresh transition always
/// calls this with `(None, None)`.
#[tracing::instrument(skip(engine, savedata, wakedata), fields(instance_id = %instance_id))]
pub async fn run_state(
    engine: &Engine,
    instance_id: &str,
    savedata: SaveData,
    wakedata: WakeData,
) -> EngineResult<()> {
    let lock = engine.locks().acquire(instance_id, engine.config().lock_wait).await?;
    let mut record = engine.store().load(instance_id).await?;

    if !record.status.is_resumable() {
        tracing::debug!(status = ?record.status, "instance not resumable, aborting run pass");
        return Err(EngineError::RecordTerminal(record.status));
    }

    let step = record.step();
    if step > engine.config().max_workflow_steps {
        return Err(fail_and_wake(
            engine,
            &mut record,
            WorkflowError::uncatchable(codes::LIMITS_STEPS, format!("step {step} exceeds maxWorkflowSteps")),
        )
        .await
        .err()
        .unwrap_or(EngineError::StepsExceeded(step)));
    }

    let Some(current_state) = record.flow.last().cloned() else {
        return Err(EngineError::UnknownState(String::new()));
    };

    let model = engine.models().resolve(&record.workflow_ref).await.map_err(EngineError::Other)?;
    let state_def = model.state(&current_state).map_err(EngineError::Other)?;
    let logic = engine.registry().build(state_def).map_err(EngineError::Other)?;

    tracing::debug!(state = %current_state, step, "running state");
    metrics::RUN_PASSES_TOTAL.with_label_values(&[logic.state_type()]).inc();

    let outcome = logic.run(&record.state_data, savedata, wakedata).await;

    match outcome {
        Ok(RunOutcome::Advance(transition)) => {
            metrics::RUN_OUTCOMES_TOTAL.with_label_values(&[logic.state_type(), "advance"]).inc();
            handle_advance(engine, &mut record, &current_state, logic.as_ref(), transition).await
        }
        Ok(RunOutcome::Suspend(memory)) => {
            metrics::RUN_OUTCOMES_TOTAL.with_label_values(&[logic.state_type(), "suspend"]).inc();
            record.memory = memory;
            engine.store().save(&record).await?;
            tracing::debug!(state = %current_state, "state suspended");
            drop(lock);
            Ok(())
        }
        Err(err) => {
            metrics::RUN_OUTCOMES_TOTAL.with_label_values(&[logic.state_type(), "error"]).inc();
            handle_failure(engine, &mut record, &current_state, logic.as_ref(), err).await
        }
    }
}

/// Success path (§4.7 "Success with transition"). Also re-entered by the
/// catch-loop when a catcher falls through to its own `transition` with an
/// identity transform, bounded by [`MAX_CATCH_LOOP_PASSES`].
///
/// A non-identity transform that fails to produce a mapping is itself a
/// catchable fault (§4.7: "the result must be a mapping (else catchable)")
/// and is routed through [`handle_failure`] rather than propagated out of
/// [`run_state`], so catchers get a chance to match it and the instance
/// still reaches a terminal status either way.
async fn handle_advance(
    engine: &Engine,
    record: &mut InstanceRecord,
    current_state: &str,
    logic: &dyn crate::logic::StateLogic,
    transition: StateTransition,
) -> EngineResult<()> {
    let data = if transition.is_identity_transform() {
        record.state_data.clone()
    } else {
        match engine.jq().jq_object(&record.state_data, &transition.transform).await {
            Ok(data) => data,
            Err(err) => {
                metrics::RUN_OUTCOMES_TOTAL.with_label_values(&[logic.state_type(), "error"]).inc();
                return Box::pin(handle_failure(engine, record, current_state, logic, err)).await;
            }
        }
    };

    if transition.is_terminal() {
        record.state_data = data.clone();
        record.status = InstanceStatus::Complete;
        record.output = Some(data);
        record.end_time = Some(crate::store::now_millis());
        engine.store().save(record).await?;
        engine.timers().delete_timers_for_instance(&record.instance_id).await.ok();
        tracing::debug!(state = %current_state, "instance complete");
        wake_caller(engine, record, None, None, record.output.clone()).await;
        return Ok(());
    }

    let next_state = transition.next_state.clone();
    let expected_step = record.step();
    let engine = engine.clone();
    let instance_id = record.instance_id.clone();
    tracing::debug!(next_state = %next_state, "transition scheduled");
    tokio::spawn(
        async move {
            if let Err(err) =
                crate::transition::transition(&engine, &instance_id, expected_step, &next_state, data, 0).await
            {
                tracing::error!(?err, "transition pass failed");
            }
        }
        .in_current_span(),
    );
    Ok(())
}

/// Failure path (§4.7 "Failure"). Propagates cancellation to living
/// children, then classifies the error.
async fn handle_failure(
    engine: &Engine,
    record: &mut InstanceRecord,
    current_state: &str,
    logic: &dyn crate::logic::StateLogic,
    err: WorkflowError,
) -> EngineResult<()> {
    cancel_living_children(engine, record, logic).await;

    match &err {
        WorkflowError::Uncatchable { .. } => {
            metrics::ERRORS_TOTAL.with_label_values(&["uncatchable"]).inc();
            fail_and_wake(engine, record, err).await
        }
        WorkflowError::Internal(_) => {
            metrics::ERRORS_TOTAL.with_label_values(&["internal"]).inc();
            crash_and_wake(engine, record, err).await
        }
        WorkflowError::Catchable { code, .. } => {
            metrics::ERRORS_TOTAL.with_label_values(&["catchable"]).inc();
            run_catch_loop(engine, record, current_state, logic, code.clone(), err, 0).await
        }
    }
}

/// Walks `errorCatchers()` top-down for the first regex match, handling
/// retry-vs-fallthrough (§4.7, §8 property 4).
///
/// `pass` bounds repeated catcher-to-catcher fallthrough within a single
/// synchronous failure-handling call (§9's breaker counter). In this
/// architecture a catcher's `transition` only re-enters synchronously when
/// its own logic fails again before ever suspending or persisting — once a
/// state actually advances, the next pass is scheduled through
/// [`crate::transition::transition`] as an independent task, which
/// naturally bounds unrelated runaway loops via `maxWorkflowSteps` instead.
async fn run_catch_loop(
    engine: &Engine,
    record: &mut InstanceRecord,
    current_state: &str,
    logic: &dyn crate::logic::StateLogic,
    code: String,
    original_err: WorkflowError,
    pass: u8,
) -> EngineResult<()> {
    if pass > MAX_CATCH_LOOP_PASSES {
        return crash_and_wake(
            engine,
            record,
            WorkflowError::internal("catch loop exceeded maximum passes without converging"),
        )
        .await;
    }

    let matched = logic
        .error_catchers()
        .iter()
        .find(|c| regex_lite_match(&c.error_regex, &code))
        .cloned();

    let Some(catcher) = matched else {
        return fail_and_wake(engine, record, original_err).await;
    };

    if let Some(retry_policy) = &catcher.retry {
        if record.attempts < retry_policy.max_attempts {
            return crate::retry::retry(
                engine,
                record,
                current_state,
                logic.deadline(),
                retry_policy.delay.clone(),
                retry_policy.multiplier,
            )
            .await;
        }
        tracing::debug!(code = %code, "max retry exceeded, falling through to catcher transition");
    }

    handle_advance(engine, record, current_state, logic, StateTransition::to(catcher.transition.clone())).await
}

/// The regex matcher used for catcher `error_regex` evaluation. Grounded on
/// the spec's "regex on code" wording (§4.1): matches are anchored-free
/// substring regex, first-match-wins in declaration order (§8 property 4).
fn regex_lite_match(pattern: &str, code: &str) -> bool {
    match regex_compile(pattern) {
        Some(re) => re.is_match(code),
        None => pattern == code,
    }
}

fn regex_compile(pattern: &str) -> Option<regex::Regex> {
    regex::Regex::new(pattern).ok()
}

async fn fail_and_wake(engine: &Engine, record: &mut InstanceRecord, err: WorkflowError) -> EngineResult<()> {
    let code = err.code().unwrap_or_default().to_string();
    let message = err.message().to_string();

    if record.error_code.is_none() {
        record.set_error_once(code.clone(), message.clone()).map_err(EngineError::Workflow)?;
        record.status = InstanceStatus::Failed;
        record.end_time = Some(crate::store::now_millis());
        engine.store().save(record).await?;
        engine.timers().delete_timers_for_instance(&record.instance_id).await.ok();
    }

    wake_caller(engine, record, Some(code), Some(message), None).await;
    Ok(())
}

async fn crash_and_wake(engine: &Engine, record: &mut InstanceRecord, err: WorkflowError) -> EngineResult<()> {
    if record.error_code.is_none() {
        record
            .set_error_once(String::new(), err.sanitized_message().to_string())
            .map_err(EngineError::Workflow)?;
        record.status = InstanceStatus::Crashed;
        record.end_time = Some(crate::store::now_millis());
        if let Err(store_err) = engine.store().save(record).await {
            tracing::error!(?err, ?store_err, "failed to persist crashed instance, giving up without wake");
            return Ok(());
        }
        engine.timers().delete_timers_for_instance(&record.instance_id).await.ok();
    }

    tracing::error!(?err, "instance crashed");
    wake_caller(engine, record, Some(String::new()), Some(err.sanitized_message().to_string()), None).await;
    Ok(())
}

/// Delivers an action-result message to the parent subflow, if any (§4.7
/// "Wake caller"). The sole coupling from subflow completion back to the
/// parent's action state.
pub(crate) async fn wake_caller(
    engine: &Engine,
    record: &InstanceRecord,
    error_code: Option<String>,
    error_message: Option<String>,
    output: Option<Value>,
) {
    let Some(caller) = &record.invoked_by else { return };

    let payload = ActionResultPayload {
        instance_id: caller.instance_id.clone(),
        state: caller.state.clone(),
        step: caller.step,
        action_id: record.instance_id.clone(),
        error_code,
        error_message,
        output,
    };

    if let Err(err) = engine.flow().report_action_results(payload).await {
        tracing::error!(?err, caller_instance_id = %caller.instance_id, "failed to wake caller");
    }
}

/// Propagates cancellation to external work the failed state believes is
/// still running (§4.7). Isolate children get a fire-and-forget cancel
/// request; subflow children get a full `hardCancel`, run concurrently.
pub(crate) async fn cancel_living_children(
    engine: &Engine,
    record: &InstanceRecord,
    logic: &dyn crate::logic::StateLogic,
) {
    let children = logic.living_children(record.memory.as_deref());
    if children.is_empty() {
        return;
    }

    let tasks = FuturesUnordered::new();
    for child in children {
        let engine = engine.clone();
        match child.kind {
            ChildKind::Isolate => {
                let action_id = child.id;
                tasks.push(tokio::spawn(async move {
                    if let Err(err) = engine.isolate().cancel(&action_id).await {
                        tracing::error!(?err, action_id = %action_id, "failed to cancel isolate child");
                    }
                }));
            }
            ChildKind::Subflow => {
                let child_id = child.id;
                tasks.push(tokio::spawn(async move {
                    if let Err(err) = crate::cancel::hard_cancel(
                        &engine,
                        &child_id,
                        codes::CANCELS_PARENT,
                        "parent workflow failed",
                    )
                    .await
                    {
                        tracing::error!(?err, child_id = %child_id, "failed to cancel subflow child");
                    }
                }));
            }
        }
    }

    let _: Vec<_> = tasks.collect().await;
}

pub(crate) fn timer_id_for(record: &InstanceRecord) -> String {
    timeout_timer_id(&record.instance_id, record.step())
}
