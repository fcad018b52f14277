//! Three-kind error model (§4.1) plus the engine-operational faults that
//! abort a run pass before a workflow instance is even classified.

use thiserror::Error;

/// Reserved codes raised by the core itself.
pub mod codes {
    pub const MULTIPLE_ERRORS: &str = "flowcore.workflow.multipleErrors";
    pub const PARALLEL_ALL_FAILED: &str = "flowcore.parallel.allFailed";
    pub const JQ_BAD_COMMAND: &str = "flowcore.jq.badCommand";
    pub const JQ_NOT_OBJECT: &str = "flowcore.jq.notObject";
    pub const LIMITS_STEPS: &str = "flowcore.limits.steps";
    pub const LIMITS_DEPTH: &str = "flowcore.limits.depth";
    pub const CANCELS_PARENT: &str = "flowcore.cancels.parent";
    pub const CANCELS_TIMEOUT: &str = "flowcore.cancels.timeout";
    pub const SUBFLOW_NOT_EXIST: &str = "flowcore.subflow.notExist";
}

/// The error a state logic's `run` returns, or that the run loop derives
/// while dispatching a state. Classification is structural: this enum *is*
/// the classification, not a message to parse.
#[derive(Debug, Error, Clone)]
pub enum WorkflowError {
    /// May be matched by a state's error catchers and rerouted/retried.
    #[error("{code}: {message}")]
    Catchable { code: String, message: String },

    /// Terminates the instance as `failed` without catcher consultation.
    #[error("{code}: {message}")]
    Uncatchable { code: String, message: String },

    /// Terminates the instance as `crashed`; the wrapped detail is logged
    /// but never surfaced to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    pub fn catchable(code: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowError::Catchable { code: code.into(), message: message.into() }
    }

    pub fn uncatchable(code: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowError::Uncatchable { code: code.into(), message: message.into() }
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        WorkflowError::Internal(detail.to_string())
    }

    /// The `code` field, if this is a classified (non-internal) error.
    pub fn code(&self) -> Option<&str> {
        match self {
            WorkflowError::Catchable { code, .. } | WorkflowError::Uncatchable { code, .. } => {
                Some(code)
            }
            WorkflowError::Internal(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            WorkflowError::Catchable { message, .. } | WorkflowError::Uncatchable { message, .. } => {
                message
            }
            WorkflowError::Internal(detail) => detail,
        }
    }

    /// The message as it may be shown to external callers: internal details
    /// are sanitized (§4.1, §7).
    pub fn sanitized_message(&self) -> &str {
        match self {
            WorkflowError::Internal(_) => "an internal error occurred",
            _ => self.message(),
        }
    }
}

/// Faults in the engine's own plumbing: lock acquisition, record loading,
/// limit checks performed before a state even runs. These never populate a
/// workflow instance's `error_code` directly — most get folded into a
/// `WorkflowError` by the caller, but some (e.g. a tardy duplicate wake)
/// simply abort the run pass.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("timed out acquiring lock for instance")]
    LockTimeout,

    #[error("instance record not found")]
    RecordNotFound,

    #[error("instance is in terminal status {0:?}, cannot resume")]
    RecordTerminal(crate::store::InstanceStatus),

    #[error("record flow length {flow_len} does not match step {step} at rest")]
    FlowDesync { flow_len: usize, step: u32 },

    #[error("transition target state {0:?} does not exist in workflow")]
    UnknownState(String),

    #[error("subflow recursion depth {0} exceeds maxSubflowDepth")]
    DepthExceeded(u32),

    #[error("workflow step {0} exceeds maxWorkflowSteps")]
    StepsExceeded(u32),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type WorkflowResult<T> = Result<T, WorkflowError>;
