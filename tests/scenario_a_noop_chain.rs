//! Scenario A (SPEC_FULL.md §8): a two-state noop chain with an identity
//! hop followed by a terminal merge transform.

mod common;

use std::sync::Arc;
use std::time::Duration;

use flowcore::registry::LogicRegistry;
use flowcore::store::{InstanceStatus, StateTransition};
use flowcore::testutil::{MemoryModelProvider, ScriptedLogic, ScriptedOutcome};
use flowcore::EngineConfig;

#[tokio::test]
async fn two_state_noop_chain_completes_with_merged_output() {
    let mut registry = LogicRegistry::new();
    common::register_scripted(
        &mut registry,
        "s1",
        Arc::new(ScriptedLogic::new("s1", "noop", vec![ScriptedOutcome::Advance(StateTransition::to("s2"))])),
    );
    common::register_scripted(
        &mut registry,
        "s2",
        Arc::new(ScriptedLogic::new(
            "s2",
            "noop",
            vec![ScriptedOutcome::Advance(StateTransition::terminal(". + {\"b\": 2}"))],
        )),
    );

    let models = MemoryModelProvider::new();
    models.insert("chain", common::model("s1", &[("s1", "s1"), ("s2", "s2")]));

    let harness = common::build(EngineConfig::default(), registry, models);

    let instance_id =
        flowcore::invoke::direct_invoke(&harness.engine, "ns", "chain", br#"{"a": 1}"#).await.unwrap();

    let record = common::wait_for(&harness.store, &instance_id, Duration::from_secs(5), |r| {
        r.status.is_terminal()
    })
    .await;

    assert_eq!(record.status, InstanceStatus::Complete);
    assert_eq!(record.flow, vec!["s1".to_string(), "s2".to_string()]);
    assert_eq!(record.output, Some(serde_json::json!({"a": 1, "b": 2})));
}
