//! The persistent record (§3) and the `Store` contract the engine uses to
//! read/write it. The actual SQL-backed implementation and its distributed
//! advisory locks are an external collaborator — out of scope here (§1).

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Crashed,
    Cancelled,
}

impl InstanceStatus {
    /// `status ∈ {pending, running}` is required to resume (§3 invariants).
    pub fn is_resumable(self) -> bool {
        matches!(self, InstanceStatus::Pending | InstanceStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_resumable()
    }
}

/// `{instance_id, state, step, depth}` recorded on a subflow's child instance
/// (§3). A back-reference, not ownership: the parent does not hold the
/// child, the child reports completion by explicit wake (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowCaller {
    pub instance_id: String,
    pub state: String,
    pub step: u32,
    pub depth: u32,
}

/// Value returned by a state logic's `run`: where to go next and how to
/// transform the state document to get there (§3).
#[derive(Debug, Clone, Default)]
pub struct StateTransition {
    /// JQ program producing the next `data`. Empty or `"."` means identity.
    pub transform: String,
    /// Empty means terminal.
    pub next_state: String,
}

impl StateTransition {
    pub fn terminal(transform: impl Into<String>) -> Self {
        StateTransition { transform: transform.into(), next_state: String::new() }
    }

    pub fn to(next_state: impl Into<String>) -> Self {
        StateTransition { transform: String::new(), next_state: next_state.into() }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_state.is_empty()
    }

    /// Whether `transform` is the identity transform (`""` or `"."`).
    pub fn is_identity_transform(&self) -> bool {
        self.transform.is_empty() || self.transform == "."
    }
}

/// The Workflow Instance Record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub namespace: String,
    pub workflow_ref: String,
    pub status: InstanceStatus,
    /// Ordered sequence of state ids visited; length == current step at rest.
    pub flow: Vec<String>,
    pub state_data: serde_json::Value,
    /// Opaque, logic-owned scratch for suspended states. `None` when clear.
    pub memory: Option<Vec<u8>>,
    pub attempts: u32,
    pub deadline: i64,
    pub invoked_by: Option<SubflowCaller>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub output: Option<serde_json::Value>,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl InstanceRecord {
    pub fn new(
        instance_id: String,
        namespace: String,
        workflow_ref: String,
        data: serde_json::Value,
        invoked_by: Option<SubflowCaller>,
    ) -> Self {
        InstanceRecord {
            instance_id,
            namespace,
            workflow_ref,
            status: InstanceStatus::Pending,
            flow: Vec::new(),
            state_data: data,
            memory: None,
            attempts: 0,
            deadline: 0,
            invoked_by,
            error_code: None,
            error_message: None,
            output: None,
            start_time: now_millis(),
            end_time: None,
        }
    }

    pub fn step(&self) -> u32 {
        self.flow.len() as u32
    }

    /// §3 invariant: `len(flow) == step` whenever the record is at rest.
    pub fn check_flow_step_invariant(&self, expected_step: u32) -> EngineResult<()> {
        if self.flow.len() as u32 != expected_step {
            return Err(crate::error::EngineError::FlowDesync {
                flow_len: self.flow.len(),
                step: expected_step,
            });
        }
        Ok(())
    }

    /// Records `error_code`/`error_message` unless already set (§3, §7).
    /// Returns the multiple-errors guard error if a code is already present.
    pub fn set_error_once(&mut self, code: String, message: String) -> Result<(), crate::error::WorkflowError> {
        if self.error_code.is_some() {
            return Err(crate::error::WorkflowError::catchable(
                crate::error::codes::MULTIPLE_ERRORS,
                "error_code already set for this instance",
            ));
        }
        self.error_code = Some(code);
        self.error_message = Some(message);
        Ok(())
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// The contract the engine needs from the persistent record store: CRUD on
/// `InstanceRecord` plus the cluster-wide advisory lock handle's backing
/// primitive. The SQL schema, transactions, and distributed lock wire
/// protocol are the external collaborator's concern (§1); the engine only
/// ever sees these methods.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, record: InstanceRecord) -> EngineResult<()>;
    async fn load(&self, instance_id: &str) -> EngineResult<InstanceRecord>;
    async fn save(&self, record: &InstanceRecord) -> EngineResult<()>;
}
