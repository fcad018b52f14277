//! Event Bus contract (§6): registration and delivery of CloudEvent
//! listeners for `consume-event[s]` states. Routing and transport are an
//! external collaborator (§1); this module states only the shape the
//! engine registers and the payload it receives on wake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WorkflowError, WorkflowResult};

/// Signature under which an event waiter is registered: `{instance_id, step}`
/// serialized as JSON (§6). Re-delivered verbatim to `eventsWakeup`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerSignature {
    pub instance_id: String,
    pub step: u32,
}

impl ListenerSignature {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("signature is always serializable")
    }
}

/// One event context value to match against an incoming CloudEvent. A
/// literal is compared as-is; a template of the form `"{{ query }}"` is
/// evaluated as JQ against the state document at registration time and the
/// result frozen into the registration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventContextValue {
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
}

/// A registration request for one or more transformed event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerRegistration {
    pub workflow_id: String,
    pub transformed_events: Vec<TransformedEvent>,
    pub signature: ListenerSignature,
    /// `true` for `events-and` (all must arrive), `false` for `events-xor`
    /// (first arrival resumes).
    pub all_of: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedEvent {
    pub event_type: String,
    pub context: std::collections::BTreeMap<String, EventContextValue>,
}

/// A delivered CloudEvent as the engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_type: String,
    pub payload: Value,
}

/// The contract the engine needs from the event bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn register_listener(&self, registration: ListenerRegistration) -> WorkflowResult<()>;

    /// Cancels a previously registered listener, e.g. on instance cancellation.
    async fn cancel_listener(&self, signature: &ListenerSignature) -> WorkflowResult<()>;
}

/// Evaluates an event-context template value (§6): `"{{ query }}"` entries
/// are replaced by the JQ result, which must reduce to a scalar or byte
/// string; anything else fails registration.
pub async fn resolve_template(
    jq: &crate::jq::JqEvaluator,
    data: &Value,
    raw: &str,
) -> WorkflowResult<EventContextValue> {
    let trimmed = raw.trim();
    let query = match trimmed.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        Some(inner) => inner.trim(),
        None => return Ok(EventContextValue::String(raw.to_string())),
    };

    let result = jq.jq_one(data, query).await?;
    match result {
        Value::Bool(b) => Ok(EventContextValue::Bool(b)),
        Value::Number(n) if n.is_i64() => Ok(EventContextValue::Int(n.as_i64().unwrap())),
        Value::String(s) => Ok(EventContextValue::String(s)),
        other => Err(WorkflowError::catchable(
            crate::error::codes::JQ_NOT_OBJECT,
            format!("event context query must yield bool, int, or string, got {other}"),
        )),
    }
}
