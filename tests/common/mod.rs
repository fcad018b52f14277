//! Shared scaffolding for the scenario tests (§8 of SPEC_FULL.md): wires a
//! full `Engine` against the in-memory fakes from `flowcore::testutil`, the
//! way `gasoline`'s own workflow tests wire a `Worker` against a test
//! database — here there is no database to point at, so the fakes stand in
//! for the persistent store, timer service, event bus, and downstream
//! clients (§1, §13).

use std::sync::Arc;
use std::time::Duration;

use flowcore::logic::StateLogic;
use flowcore::registry::{LogicFactory, LogicRegistry, StateDef, WorkflowModel};
use flowcore::store::InstanceRecord;
use flowcore::testutil::{
    ChannelFlowClient, MemoryEventBus, MemoryIsolateClient, MemoryModelProvider, MemoryStore,
    MemoryTimerService, ScriptedLogic,
};
use flowcore::{Engine, EngineConfig};

pub struct Harness {
    pub engine: Engine,
    pub store: MemoryStore,
    pub timers: MemoryTimerService,
    pub events: MemoryEventBus,
    pub isolate: MemoryIsolateClient,
    pub action_results: tokio::sync::mpsc::UnboundedReceiver<flowcore::engine::ActionResultPayload>,
}

/// Builds a full `Engine` wired to fresh in-memory fakes, with `registry`
/// and `models` supplied by the calling test.
pub fn build(config: EngineConfig, registry: LogicRegistry, models: MemoryModelProvider) -> Harness {
    let store = MemoryStore::new();
    let timers = MemoryTimerService::new();
    let events = MemoryEventBus::new();
    let isolate = MemoryIsolateClient::new();
    let (flow, action_results) = ChannelFlowClient::new();

    let engine = Engine::new(
        Arc::new(registry),
        Arc::new(models),
        Arc::new(store.clone()),
        Arc::new(timers.clone()),
        Arc::new(events.clone()),
        Arc::new(flow),
        Arc::new(isolate.clone()),
        config,
    );

    Harness { engine, store, timers, events, isolate, action_results }
}

/// A single `noop`-typed state whose `run` pops the next entry of `script`
/// each call, sharing the same underlying `ScriptedLogic` (and its call
/// count / remaining script) across every re-`build()` the registry performs
/// — matching how a real logic instance's `memory`-derived state persists
/// across separate run passes, but for the in-memory script itself.
pub fn register_scripted(
    registry: &mut LogicRegistry,
    state_type: &str,
    logic: Arc<ScriptedLogic>,
) {
    let factory: LogicFactory = Arc::new(move |_def: &StateDef| {
        Ok(logic.clone() as Arc<dyn StateLogic>)
    });
    registry.register(state_type, factory);
}

pub fn model(start: &str, states: &[(&str, &str)]) -> WorkflowModel {
    model_with_timeouts(start, states, None, None)
}

pub fn model_with_timeouts(
    start: &str,
    states: &[(&str, &str)],
    soft_timeout: Option<&str>,
    hard_timeout: Option<&str>,
) -> WorkflowModel {
    let mut map = std::collections::HashMap::new();
    for (id, state_type) in states {
        map.insert(
            id.to_string(),
            StateDef { id: id.to_string(), state_type: state_type.to_string(), definition: serde_json::Value::Null },
        );
    }
    WorkflowModel {
        trigger: "default".to_string(),
        start: start.to_string(),
        states: map,
        soft_timeout: soft_timeout.map(str::to_string),
        hard_timeout: hard_timeout.map(str::to_string),
    }
}

/// Polls `store` until `instance_id`'s record satisfies `pred`, or panics
/// after `timeout`. The engine dispatches every pass on `tokio::spawn`, so
/// tests observe completion by polling the store rather than awaiting a
/// return value — mirroring how the engine itself has no synchronous
/// "wait for completion" API (§5: scheduling is parallel and preemptive).
pub async fn wait_for(
    store: &MemoryStore,
    instance_id: &str,
    timeout: Duration,
    pred: impl Fn(&InstanceRecord) -> bool,
) -> InstanceRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(record) = store.snapshot(instance_id) {
            if pred(&record) {
                return record;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {instance_id} to satisfy predicate");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
