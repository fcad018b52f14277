//! Scenario C (SPEC_FULL.md §8): hard-cancelling a parent propagates to a
//! living subflow child with `flowcore.cancels.parent`, and the child's own
//! termination wakes the parent with that same code.

mod common;

use std::sync::Arc;
use std::time::Duration;

use flowcore::error::codes;
use flowcore::logic::{ChildKind, LivingChild};
use flowcore::registry::LogicRegistry;
use flowcore::store::{InstanceRecord, InstanceStatus, Store, SubflowCaller};
use flowcore::testutil::{MemoryModelProvider, ScriptedLogic, ScriptedOutcome};
use flowcore::EngineConfig;

#[tokio::test]
async fn hard_cancel_propagates_to_subflow_child_and_wakes_parent() {
    let parent_id = "ns/parent/AAAAAA".to_string();
    let child_id = "ns/child/BBBBBB".to_string();

    let parent_logic = Arc::new(
        ScriptedLogic::new("s", "action", vec![ScriptedOutcome::Suspend(None)])
            .with_living_children(vec![LivingChild { kind: ChildKind::Subflow, id: child_id.clone() }]),
    );

    let mut registry = LogicRegistry::new();
    common::register_scripted(&mut registry, "action", parent_logic);

    let models = MemoryModelProvider::new();
    models.insert("parentwf", common::model("s", &[("s", "action")]));

    let harness = common::build(EngineConfig::default(), registry, models);

    let mut parent_record =
        InstanceRecord::new(parent_id.clone(), "ns".to_string(), "parentwf".to_string(), serde_json::json!({}), None);
    parent_record.flow = vec!["s".to_string()];
    parent_record.status = InstanceStatus::Running;
    harness.store.insert(parent_record).await.unwrap();

    let caller = SubflowCaller { instance_id: parent_id.clone(), state: "s".to_string(), step: 1, depth: 0 };
    let mut child_record = InstanceRecord::new(
        child_id.clone(),
        "ns".to_string(),
        "childwf".to_string(),
        serde_json::json!({}),
        Some(caller),
    );
    child_record.flow = vec!["child_state".to_string()];
    child_record.status = InstanceStatus::Running;
    harness.store.insert(child_record).await.unwrap();

    flowcore::cancel::hard_cancel(&harness.engine, &parent_id, "operator.cancel", "manual cancellation").await.unwrap();

    let parent_after = common::wait_for(&harness.store, &parent_id, Duration::from_secs(5), |r| {
        r.status.is_terminal()
    })
    .await;
    assert_eq!(parent_after.status, InstanceStatus::Cancelled);
    assert_eq!(parent_after.error_code.as_deref(), Some("operator.cancel"));

    let child_after = common::wait_for(&harness.store, &child_id, Duration::from_secs(5), |r| {
        r.status.is_terminal()
    })
    .await;
    assert_eq!(child_after.status, InstanceStatus::Cancelled);
    assert_eq!(child_after.error_code.as_deref(), Some(codes::CANCELS_PARENT));

    let mut action_results = harness.action_results;
    let payload = action_results.recv().await.expect("parent should have been woken by the child's cancellation");
    assert_eq!(payload.instance_id, parent_id);
    assert_eq!(payload.action_id, child_id);
    assert_eq!(payload.error_code.as_deref(), Some(codes::CANCELS_PARENT));
}
