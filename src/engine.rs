//! The top-level composition root (§2): wires the registry, store, lock
//! manager, timer facade, event bus, and workflow model provider together,
//! the way the teacher's `Worker` composes a `RegistryHandle` and
//! `DatabaseHandle` plus `rivet_config`/`rivet_pools`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::jq::JqEvaluator;
use crate::lock::LockManager;
use crate::registry::{RegistryHandle, WorkflowModel};
use crate::store::Store;
use crate::timer::TimerService;

/// Resolves a workflow's parsed, validated model by reference. The parser
/// and validator themselves are an external collaborator (§1); the engine
/// only ever consumes the result.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn resolve(&self, workflow_ref: &str) -> anyhow::Result<Arc<WorkflowModel>>;
}

/// Reports a subflow's completion back to its parent (§4.7 "wake caller",
/// §6 `Flow.ReportActionResults`). The gRPC transport itself is external;
/// this is the contract the engine drives it through.
#[async_trait]
pub trait FlowClient: Send + Sync {
    async fn report_action_results(&self, payload: ActionResultPayload) -> anyhow::Result<()>;
}

/// Payload delivered to a parent action-state when its subflow child
/// completes, fails, crashes, or is cancelled (§4.7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResultPayload {
    pub instance_id: String,
    pub state: String,
    pub step: u32,
    pub action_id: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub output: Option<Value>,
}

/// Requests (fire-and-forget) that the container runner cancel a running
/// isolate action (§4.7 cancellation propagation to `isolate` children).
/// `RunIsolate` itself (§6) is invoked by the `action` state logic, not the
/// core; the core only ever needs to cancel one.
#[async_trait]
pub trait IsolateClient: Send + Sync {
    async fn cancel(&self, action_id: &str) -> anyhow::Result<()>;
}

struct EngineInner {
    registry: RegistryHandle,
    models: Arc<dyn ModelProvider>,
    store: Arc<dyn Store>,
    timers: Arc<dyn TimerService>,
    events: Arc<dyn EventBus>,
    flow: Arc<dyn FlowClient>,
    isolate: Arc<dyn IsolateClient>,
    locks: LockManager,
    jq: JqEvaluator,
    config: EngineConfig,
}

/// The engine's composition root. Cheaply cloneable (all fields are
/// reference-counted or `Copy`), mirroring the teacher's `WorkflowCtx`/
/// `RegistryHandle` cloning convention.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: RegistryHandle,
        models: Arc<dyn ModelProvider>,
        store: Arc<dyn Store>,
        timers: Arc<dyn TimerService>,
        events: Arc<dyn EventBus>,
        flow: Arc<dyn FlowClient>,
        isolate: Arc<dyn IsolateClient>,
        config: EngineConfig,
    ) -> Self {
        let jq = JqEvaluator::new(&config);
        Engine(Arc::new(EngineInner {
            registry,
            models,
            store,
            timers,
            events,
            flow,
            isolate,
            locks: LockManager::new(),
            jq,
            config,
        }))
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.0.registry
    }

    pub fn models(&self) -> &Arc<dyn ModelProvider> {
        &self.0.models
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.0.store
    }

    pub fn timers(&self) -> &Arc<dyn TimerService> {
        &self.0.timers
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.0.events
    }

    pub fn flow(&self) -> &Arc<dyn FlowClient> {
        &self.0.flow
    }

    pub fn isolate(&self) -> &Arc<dyn IsolateClient> {
        &self.0.isolate
    }

    pub fn locks(&self) -> &LockManager {
        &self.0.locks
    }

    pub fn jq(&self) -> &JqEvaluator {
        &self.0.jq
    }

    pub fn config(&self) -> &EngineConfig {
        &self.0.config
    }

    pub fn registered_states(&self) -> usize {
        self.0.registry.size()
    }
}
