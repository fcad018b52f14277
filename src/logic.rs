//! State Logic contract (§4.5): the pluggable per-state-type capability.
//! Individual state semantics (noop, switch, delay, action, parallel,
//! foreach, error, validate, generate-event, consume-event[s]) are external
//! collaborators constructed by the [`crate::registry`]; the core only
//! depends on this trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WorkflowResult;
use crate::store::StateTransition;

/// An error catcher declared on a state: `{error_regex, retry?, transition}`
/// (§4.5). Evaluated top-down; first regex match wins (§8 property 4).
#[derive(Debug, Clone)]
pub struct ErrorCatcher {
    pub error_regex: String,
    pub retry: Option<RetryPolicy>,
    pub transition: String,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// ISO-8601 duration, e.g. `"PT0S"`.
    pub delay: String,
    pub multiplier: f64,
}

/// One piece of external work a state logic believes still in flight,
/// surfaced for cancellation propagation (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivingChild {
    pub kind: ChildKind,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Isolate,
    Subflow,
}

/// The outcome of one atomic `run` pass (§4.5, §4.7):
/// - `Advance(transition)` — proceed to `transition.next_state` (or
///   terminate, if empty).
/// - `Suspend(memory)` — the logic has scheduled its own wakeup and hands
///   back the scratch bytes it wants persisted as `record.memory`; the run
///   loop persists them and releases the lock (§4.5: "logic has ... persisted
///   memory" — here the run loop is the sole writer to the store, so the
///   logic returns the bytes rather than writing them itself).
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Advance(StateTransition),
    Suspend(Option<Vec<u8>>),
}

/// Opaque bytes a suspended state persisted before yielding, returned
/// verbatim on resume (§GLOSSARY: savedata).
pub type SaveData = Option<Vec<u8>>;
/// Opaque bytes describing why a state was resumed: a sleep marker, an
/// events payload, or nothing (§GLOSSARY: wakedata).
pub type WakeData = Option<Vec<u8>>;

/// A state-logic object constructed from `(workflow, state_definition)` for
/// one execution pass (§4.5). Implementations are provided by the pluggable
/// capability this crate only depends on the contract of; the
/// [`crate::registry`] module is the tagged-union factory over known state
/// types plus an extension point for others.
#[async_trait]
pub trait StateLogic: Send + Sync {
    fn id(&self) -> &str;
    fn state_type(&self) -> &str;
    /// Absolute deadline in epoch millis for this state's execution.
    fn deadline(&self) -> i64;
    /// Declared catchers, in the order they should be consulted.
    fn error_catchers(&self) -> &[ErrorCatcher];
    /// External work this state believes is still running, derived from the
    /// logic-owned `memory` bytes persisted for a suspended instance.
    fn living_children(&self, memory: Option<&[u8]>) -> Vec<LivingChild>;

    /// Executes one atomic step against `data`. `savedata`/`wakedata` are
    /// populated when resuming a previously suspended run; both are `None`
    /// on first entry to a state.
    async fn run(
        &self,
        data: &Value,
        savedata: SaveData,
        wakedata: WakeData,
    ) -> WorkflowResult<RunOutcome>;
}
