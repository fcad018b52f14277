//! Scenario E (SPEC_FULL.md §8): a duplicate `retryWakeup` delivery for a
//! step the instance has already moved past is dropped without a second
//! `StateLogic::run` call (§5 ordering guarantees, §8 property 6).

mod common;

use std::sync::Arc;
use std::time::Duration;

use flowcore::registry::LogicRegistry;
use flowcore::store::StateTransition;
use flowcore::testutil::{MemoryModelProvider, ScriptedLogic, ScriptedOutcome};
use flowcore::timer::StepWakePayload;
use flowcore::wake::retry_wakeup;
use flowcore::EngineConfig;

async fn wait_for_calls(logic: &ScriptedLogic, want: u32, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if logic.call_count() >= want {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for call_count to reach {want}, saw {}", logic.call_count());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn duplicate_wake_past_current_step_is_a_no_op() {
    let logic = Arc::new(ScriptedLogic::new(
        "s1",
        "waiter",
        vec![ScriptedOutcome::Suspend(None), ScriptedOutcome::Advance(StateTransition::to("s2"))],
    ));

    let mut registry = LogicRegistry::new();
    common::register_scripted(&mut registry, "waiter", logic.clone());
    common::register_scripted(
        &mut registry,
        "noop",
        Arc::new(ScriptedLogic::new("s2", "noop", vec![ScriptedOutcome::Advance(StateTransition::terminal("."))])),
    );

    let models = MemoryModelProvider::new();
    models.insert("dup-wf", common::model("s1", &[("s1", "waiter"), ("s2", "noop")]));

    let harness = common::build(EngineConfig::default(), registry, models);

    let instance_id = flowcore::invoke::direct_invoke(&harness.engine, "ns", "dup-wf", br#"{}"#).await.unwrap();

    wait_for_calls(&logic, 1, Duration::from_secs(5)).await;

    let payload = StepWakePayload { instance_id: instance_id.clone(), state: "s1".to_string(), step: 1 };

    retry_wakeup(&harness.engine, payload.clone()).await.unwrap();
    wait_for_calls(&logic, 2, Duration::from_secs(5)).await;

    let record = common::wait_for(&harness.store, &instance_id, Duration::from_secs(5), |r| r.step() == 2).await;
    assert_eq!(record.flow, vec!["s1".to_string(), "s2".to_string()]);

    // Same payload, now stale: the instance has already moved to step 2.
    retry_wakeup(&harness.engine, payload).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(logic.call_count(), 2, "a tardy duplicate wake must not re-invoke the state logic");
}
