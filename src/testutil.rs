//! In-memory fakes for the external-collaborator traits (§13), following
//! the pack's `#[cfg(any(test, feature = "test-support"))]` gating
//! convention for job-engine test doubles. No real database, timer
//! service, or container runner is required to drive [`crate::Engine`]
//! end-to-end against these.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::engine::{ActionResultPayload, FlowClient, IsolateClient, ModelProvider};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, ListenerRegistration, ListenerSignature};
use crate::registry::WorkflowModel;
use crate::store::{InstanceRecord, Store};
use crate::timer::{TimerAction, TimerService, WakeFunction};

/// An in-memory [`Store`] backed by a mutex-guarded map, mirroring the
/// spec's "in-memory `rec` is a snapshot refreshed after every update"
/// policy (§5) without any actual persistence.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, InstanceRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.records.lock().get(instance_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, record: InstanceRecord) -> EngineResult<()> {
        self.records.lock().insert(record.instance_id.clone(), record);
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> EngineResult<InstanceRecord> {
        self.records.lock().get(instance_id).cloned().ok_or(EngineError::RecordNotFound)
    }

    async fn save(&self, record: &InstanceRecord) -> EngineResult<()> {
        self.records.lock().insert(record.instance_id.clone(), record.clone());
        Ok(())
    }
}

/// One scheduled timer, as seen by test assertions.
#[derive(Debug, Clone)]
pub struct ScheduledTimer {
    pub function: WakeFunction,
    pub at_time_millis: i64,
    pub payload: Vec<u8>,
}

/// An in-memory [`TimerService`]. Fires nothing on its own — tests drive
/// wake handlers directly or via [`MemoryTimerService::drain_due`].
#[derive(Clone, Default)]
pub struct MemoryTimerService {
    timers: Arc<Mutex<HashMap<String, ScheduledTimer>>>,
}

impl MemoryTimerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ScheduledTimer> {
        self.timers.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TimerService for MemoryTimerService {
    async fn add_one_shot(
        &self,
        id: &str,
        function: WakeFunction,
        at_time_millis: i64,
        payload: Vec<u8>,
    ) -> EngineResult<()> {
        self.timers.lock().insert(id.to_string(), ScheduledTimer { function, at_time_millis, payload });
        Ok(())
    }

    async fn action_timer_by_name(&self, id: &str, action: TimerAction) -> EngineResult<()> {
        match action {
            TimerAction::Delete => {
                self.timers.lock().remove(id);
            }
        }
        Ok(())
    }

    async fn delete_timers_for_instance(&self, instance_id: &str) -> EngineResult<u32> {
        let mut guard = self.timers.lock();
        let before = guard.len();
        guard.retain(|id, _| !id.contains(instance_id));
        Ok((before - guard.len()) as u32)
    }
}

/// An in-memory [`EventBus`] that records registrations for inspection;
/// delivery is driven by tests calling [`crate::wake::events_wakeup`]
/// directly.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    registrations: Arc<Mutex<Vec<ListenerRegistration>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registrations(&self) -> Vec<ListenerRegistration> {
        self.registrations.lock().clone()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn register_listener(&self, registration: ListenerRegistration) -> crate::error::WorkflowResult<()> {
        self.registrations.lock().push(registration);
        Ok(())
    }

    async fn cancel_listener(&self, signature: &ListenerSignature) -> crate::error::WorkflowResult<()> {
        self.registrations.lock().retain(|r| r.signature != *signature);
        Ok(())
    }
}

/// A [`ModelProvider`] backed by a fixed, test-supplied map.
#[derive(Clone, Default)]
pub struct MemoryModelProvider {
    models: Arc<Mutex<HashMap<String, Arc<WorkflowModel>>>>,
}

impl MemoryModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, workflow_ref: impl Into<String>, model: WorkflowModel) {
        self.models.lock().insert(workflow_ref.into(), Arc::new(model));
    }
}

#[async_trait]
impl ModelProvider for MemoryModelProvider {
    async fn resolve(&self, workflow_ref: &str) -> anyhow::Result<Arc<WorkflowModel>> {
        self.models
            .lock()
            .get(workflow_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no workflow model registered for {workflow_ref:?}"))
    }
}

/// A [`FlowClient`] that forwards every action-result payload onto a
/// channel, so tests can await the parent-wake without polling the store.
#[derive(Clone)]
pub struct ChannelFlowClient {
    tx: mpsc::UnboundedSender<ActionResultPayload>,
}

impl ChannelFlowClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ActionResultPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelFlowClient { tx }, rx)
    }
}

#[async_trait]
impl FlowClient for ChannelFlowClient {
    async fn report_action_results(&self, payload: ActionResultPayload) -> anyhow::Result<()> {
        let _ = self.tx.send(payload);
        Ok(())
    }
}

/// An [`IsolateClient`] that records cancelled action ids.
#[derive(Clone, Default)]
pub struct MemoryIsolateClient {
    cancelled: Arc<Mutex<Vec<String>>>,
}

impl MemoryIsolateClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl IsolateClient for MemoryIsolateClient {
    async fn cancel(&self, action_id: &str) -> anyhow::Result<()> {
        self.cancelled.lock().push(action_id.to_string());
        Ok(())
    }
}

/// A scriptable [`crate::logic::StateLogic`] for tests: each call to `run`
/// pops the next outcome from a fixed script, repeating the last entry once
/// exhausted. Lets a scenario test drive a state through e.g. two failures
/// then a success without a bespoke type per test.
pub struct ScriptedLogic {
    id: String,
    state_type: String,
    deadline: i64,
    catchers: Vec<crate::logic::ErrorCatcher>,
    living_children: Vec<crate::logic::LivingChild>,
    script: Mutex<Vec<ScriptedOutcome>>,
    calls: Arc<Mutex<u32>>,
    last_wake: Arc<Mutex<Option<(crate::logic::SaveData, crate::logic::WakeData)>>>,
}

#[derive(Clone)]
pub enum ScriptedOutcome {
    Advance(crate::store::StateTransition),
    Suspend(Option<Vec<u8>>),
    Fail(crate::error::WorkflowError),
}

impl ScriptedLogic {
    pub fn new(id: impl Into<String>, state_type: impl Into<String>, script: Vec<ScriptedOutcome>) -> Self {
        ScriptedLogic {
            id: id.into(),
            state_type: state_type.into(),
            deadline: i64::MAX,
            catchers: Vec::new(),
            living_children: Vec::new(),
            script: Mutex::new(script),
            calls: Arc::new(Mutex::new(0)),
            last_wake: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_catchers(mut self, catchers: Vec<crate::logic::ErrorCatcher>) -> Self {
        self.catchers = catchers;
        self
    }

    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_living_children(mut self, living_children: Vec<crate::logic::LivingChild>) -> Self {
        self.living_children = living_children;
        self
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }

    /// The `(savedata, wakedata)` pair passed into the most recent `run`
    /// call, for tests asserting on resume-time payloads (e.g. events wake
    /// ordering).
    pub fn last_wake(&self) -> Option<(crate::logic::SaveData, crate::logic::WakeData)> {
        self.last_wake.lock().clone()
    }
}

#[async_trait]
impl crate::logic::StateLogic for ScriptedLogic {
    fn id(&self) -> &str {
        &self.id
    }

    fn state_type(&self) -> &str {
        &self.state_type
    }

    fn deadline(&self) -> i64 {
        self.deadline
    }

    fn error_catchers(&self) -> &[crate::logic::ErrorCatcher] {
        &self.catchers
    }

    fn living_children(&self, _memory: Option<&[u8]>) -> Vec<crate::logic::LivingChild> {
        self.living_children.clone()
    }

    async fn run(
        &self,
        _data: &serde_json::Value,
        savedata: crate::logic::SaveData,
        wakedata: crate::logic::WakeData,
    ) -> crate::error::WorkflowResult<crate::logic::RunOutcome> {
        *self.calls.lock() += 1;
        *self.last_wake.lock() = Some((savedata, wakedata));
        let mut script = self.script.lock();
        let outcome = if script.len() > 1 {
            script.remove(0)
        } else {
            script.first().expect("script must not be empty").clone()
        };
        match outcome {
            ScriptedOutcome::Advance(t) => Ok(crate::logic::RunOutcome::Advance(t.clone())),
            ScriptedOutcome::Suspend(memory) => Ok(crate::logic::RunOutcome::Suspend(memory.clone())),
            ScriptedOutcome::Fail(e) => Err(e.clone()),
        }
    }
}
