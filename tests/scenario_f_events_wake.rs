//! Scenario F (SPEC_FULL.md §8): an `events-and` listener for two event
//! types only resumes once both have "arrived" (aggregation itself belongs
//! to the external event bus, §1 — this test plays that role), and resumes
//! with `wakedata` holding both events in registration order while leaving
//! `memory` untouched (§9 open question).

mod common;

use std::sync::Arc;
use std::time::Duration;

use flowcore::events::{EventBus, InboundEvent, ListenerRegistration, ListenerSignature, TransformedEvent};
use flowcore::registry::LogicRegistry;
use flowcore::store::StateTransition;
use flowcore::testutil::{MemoryModelProvider, ScriptedLogic, ScriptedOutcome};
use flowcore::wake::events_wakeup;
use flowcore::EngineConfig;

#[tokio::test]
async fn all_of_listener_resumes_only_once_both_events_arrive() {
    let scratch = b"carried-memory".to_vec();
    let logic = Arc::new(ScriptedLogic::new(
        "s",
        "consume-events",
        vec![ScriptedOutcome::Suspend(Some(scratch.clone())), ScriptedOutcome::Advance(StateTransition::terminal("."))],
    ));

    let mut registry = LogicRegistry::new();
    common::register_scripted(&mut registry, "consume-events", logic.clone());

    let models = MemoryModelProvider::new();
    models.insert("events-wf", common::model("s", &[("s", "consume-events")]));

    let harness = common::build(EngineConfig::default(), registry, models);

    let instance_id = flowcore::invoke::direct_invoke(&harness.engine, "ns", "events-wf", br#"{}"#).await.unwrap();

    let record = common::wait_for(&harness.store, &instance_id, Duration::from_secs(5), |r| r.step() == 1).await;
    assert_eq!(record.memory.as_deref(), Some(scratch.as_slice()), "suspend should have persisted the logic's memory");

    let signature = ListenerSignature { instance_id: instance_id.clone(), step: 1 };
    let registration = ListenerRegistration {
        workflow_id: "events-wf".to_string(),
        transformed_events: vec![
            TransformedEvent { event_type: "typeA".to_string(), context: Default::default() },
            TransformedEvent { event_type: "typeB".to_string(), context: Default::default() },
        ],
        signature: signature.clone(),
        all_of: true,
    };
    harness.events.register_listener(registration.clone()).await.unwrap();

    let ev_a = InboundEvent { event_type: "typeA".to_string(), payload: serde_json::json!({"n": 1}) };
    let ev_b = InboundEvent { event_type: "typeB".to_string(), payload: serde_json::json!({"n": 2}) };

    // Only typeA has arrived: an `all_of` listener must not resume yet. The
    // bus itself owns that aggregation (§1); this test stands in for it by
    // simply not calling `events_wakeup` until both events are in hand.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(logic.call_count(), 1, "no resume should happen before the second event arrives");

    events_wakeup(&harness.engine, signature, vec![ev_a.clone(), ev_b.clone()]).await.unwrap();

    let completed = common::wait_for(&harness.store, &instance_id, Duration::from_secs(5), |r| {
        r.status.is_terminal()
    })
    .await;
    assert_eq!(completed.status, flowcore::InstanceStatus::Complete);
    assert_eq!(logic.call_count(), 2);

    let (savedata, wakedata) = logic.last_wake().expect("resume call should have been recorded");
    assert_eq!(savedata.as_deref(), Some(scratch.as_slice()), "savedata must be the persisted memory, untouched");

    let delivered: Vec<InboundEvent> = serde_json::from_slice(&wakedata.expect("wakedata must be set")).unwrap();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].event_type, "typeA");
    assert_eq!(delivered[1].event_type, "typeB");
}
