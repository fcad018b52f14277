//! Scenario B (SPEC_FULL.md §8): a catchable error retried with exponential
//! backoff converges on the third attempt; `attempts == 2` and the state
//! never advances to a separate state before succeeding in place.

mod common;

use std::sync::Arc;
use std::time::Duration;

use flowcore::error::WorkflowError;
use flowcore::logic::{ErrorCatcher, RetryPolicy};
use flowcore::registry::LogicRegistry;
use flowcore::store::{InstanceStatus, StateTransition};
use flowcore::testutil::{MemoryModelProvider, ScriptedLogic, ScriptedOutcome};
use flowcore::EngineConfig;

#[tokio::test]
async fn third_attempt_converges_with_attempts_recorded() {
    let catcher = ErrorCatcher {
        error_regex: r"flowcore\.test\..*".to_string(),
        retry: Some(RetryPolicy { max_attempts: 3, delay: "PT0S".to_string(), multiplier: 2.0 }),
        transition: "recover".to_string(),
    };

    let logic = Arc::new(
        ScriptedLogic::new(
            "s",
            "flaky",
            vec![
                ScriptedOutcome::Fail(WorkflowError::catchable("flowcore.test.x", "induced failure")),
                ScriptedOutcome::Fail(WorkflowError::catchable("flowcore.test.x", "induced failure")),
                ScriptedOutcome::Advance(StateTransition::terminal(".")),
            ],
        )
        .with_catchers(vec![catcher]),
    );

    let mut registry = LogicRegistry::new();
    common::register_scripted(&mut registry, "flaky", logic.clone());

    let models = MemoryModelProvider::new();
    models.insert("retry-wf", common::model("s", &[("s", "flaky")]));

    let harness = common::build(EngineConfig::default(), registry, models);

    let instance_id =
        flowcore::invoke::direct_invoke(&harness.engine, "ns", "retry-wf", br#"{}"#).await.unwrap();

    let record = common::wait_for(&harness.store, &instance_id, Duration::from_secs(5), |r| {
        r.status.is_terminal()
    })
    .await;

    assert_eq!(record.status, InstanceStatus::Complete);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.flow, vec!["s".to_string()]);
    assert_eq!(logic.call_count(), 3);
}
