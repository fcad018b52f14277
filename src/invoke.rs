//! Invocation API (§4.6): the four entry points that create a new instance
//! record and launch its first transition.

use anyhow::{anyhow, bail, Result};
use base64::Engine as _;
use rand::Rng;
use serde_json::Value;
use tracing::Instrument;

use crate::engine::Engine;
use crate::error::{codes, EngineError, WorkflowError};
use crate::store::{InstanceRecord, SubflowCaller};

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Direct invocation: the workflow's trigger must be `"default"` (§4.6).
#[tracing::instrument(skip(engine, input), fields(namespace = %namespace, name = %name))]
pub async fn direct_invoke(engine: &Engine, namespace: &str, name: &str, input: &[u8]) -> Result<String> {
    let model = engine.models().resolve(name).await?;
    if model.trigger != "default" {
        bail!("workflow {name:?} is not directly invocable (trigger = {:?})", model.trigger);
    }
    create_and_start(engine, namespace, name, &model, normalize_input(input), None).await
}

/// Cron invocation: the workflow's trigger must be `"scheduled"` (§4.6).
#[tracing::instrument(skip(engine, input), fields(namespace = %namespace, uid = %uid))]
pub async fn cron_invoke(engine: &Engine, namespace: &str, uid: &str, input: Value) -> Result<String> {
    let model = engine.models().resolve(uid).await?;
    if model.trigger != "scheduled" {
        bail!("workflow {uid:?} is not cron-invocable (trigger = {:?})", model.trigger);
    }
    create_and_start(engine, namespace, uid, &model, normalize_value(input), None).await
}

/// One inbound CloudEvent as seen by [`events_invoke`]: `event.type` plus
/// its raw payload bytes and content-type (§4.6 input synthesis).
pub struct InboundEventPayload {
    pub event_type: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Events-triggered invocation: the workflow's trigger must be one of
/// `event`, `events-and`, `events-xor` (§4.6). Input is synthesized as a
/// map from `event.type → payload`.
#[tracing::instrument(skip(engine, events), fields(namespace = %namespace, workflow_uuid = %workflow_uuid))]
pub async fn events_invoke(
    engine: &Engine,
    namespace: &str,
    workflow_uuid: &str,
    events: Vec<InboundEventPayload>,
) -> Result<String> {
    let model = engine.models().resolve(workflow_uuid).await?;
    if !matches!(model.trigger.as_str(), "event" | "events-and" | "events-xor") {
        bail!("workflow {workflow_uuid:?} is not events-invocable (trigger = {:?})", model.trigger);
    }

    let mut data = serde_json::Map::new();
    for event in events {
        let value = decode_event_payload(&event.content_type, &event.bytes)?;
        data.insert(event.event_type, value);
    }

    create_and_start(engine, namespace, workflow_uuid, &model, Value::Object(data), None).await
}

/// Subflow invocation (§4.6): the workflow's trigger must be `"default"`;
/// recursion depth is `caller.depth + 1`, rejected before the child record
/// is even created if it would exceed `maxSubflowDepth` (§8 property 7).
#[tracing::instrument(skip(engine, input), fields(namespace = %namespace, name = %name, parent = %caller.instance_id))]
pub async fn subflow_invoke(
    engine: &Engine,
    caller: &SubflowCaller,
    namespace: &str,
    name: &str,
    input: &[u8],
) -> Result<String, WorkflowError> {
    let depth = caller.depth + 1;
    if depth > engine.config().max_subflow_depth {
        return Err(WorkflowError::uncatchable(
            codes::LIMITS_DEPTH,
            format!("subflow recursion depth {depth} exceeds maxSubflowDepth"),
        ));
    }

    let model = engine
        .models()
        .resolve(name)
        .await
        .map_err(|e| WorkflowError::uncatchable(codes::SUBFLOW_NOT_EXIST, e.to_string()))?;
    if model.trigger != "default" {
        return Err(WorkflowError::uncatchable(
            codes::SUBFLOW_NOT_EXIST,
            format!("workflow {name:?} is not subflow-invocable (trigger = {:?})", model.trigger),
        ));
    }

    let child_caller = SubflowCaller {
        instance_id: caller.instance_id.clone(),
        state: caller.state.clone(),
        step: caller.step,
        depth,
    };

    create_and_start(engine, namespace, name, &model, normalize_input(input), Some(child_caller))
        .await
        .map_err(|e| WorkflowError::internal(e.to_string()))
}

async fn create_and_start(
    engine: &Engine,
    namespace: &str,
    workflow_ref: &str,
    model: &crate::registry::WorkflowModel,
    data: Value,
    invoked_by: Option<SubflowCaller>,
) -> Result<String> {
    let instance_id = generate_instance_id(namespace, workflow_ref);
    let record = InstanceRecord::new(instance_id.clone(), namespace.to_string(), workflow_ref.to_string(), data.clone(), invoked_by);

    engine.store().insert(record).await.map_err(|e| anyhow!(e))?;

    let engine = engine.clone();
    let start_state = model.start.clone();
    let instance_id_for_task = instance_id.clone();
    tokio::spawn(
        async move {
            if let Err(err) = crate::transition::transition(&engine, &instance_id_for_task, 0, &start_state, data, 0).await {
                tracing::error!(?err, "initial transition failed");
            }
        }
        .in_current_span(),
    );

    Ok(instance_id)
}

/// Instance id format `<namespace>/<name>/<6 letters A-Za-z>` (§4.6, §8
/// property 9), drawn from a cryptographically strong RNG.
fn generate_instance_id(namespace: &str, name: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..crate::config::INSTANCE_ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{namespace}/{name}/{suffix}")
}

/// §4.6 input normalization: JSON-parse the raw bytes; on parse failure,
/// re-encode as base64 wrapped in `{"input": "<b64>"}`; if the parsed value
/// is not a mapping, wrap it as `{"input": value}`.
fn normalize_input(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => normalize_value(value),
        Err(_) => wrap_as_input(Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))),
    }
}

fn normalize_value(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        wrap_as_input(value)
    }
}

fn wrap_as_input(value: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("input".to_string(), value);
    Value::Object(map)
}

/// §4.6: JSON-decode when content-type is `application/json` or absent;
/// otherwise wrap the raw bytes as base64.
fn decode_event_payload(content_type: &Option<String>, bytes: &[u8]) -> Result<Value> {
    let is_json = matches!(content_type.as_deref(), None | Some("application/json"));
    if is_json {
        Ok(serde_json::from_slice(bytes).unwrap_or_else(|_| {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }))
    } else {
        Ok(Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_input_passes_through_objects() {
        let v = normalize_input(br#"{"a":1}"#);
        assert_eq!(v, serde_json::json!({"a": 1}));
    }

    #[test]
    fn normalize_input_wraps_non_objects() {
        let v = normalize_input(b"42");
        assert_eq!(v, serde_json::json!({"input": 42}));
    }

    #[test]
    fn normalize_input_wraps_unparseable_bytes_as_base64() {
        let v = normalize_input(b"not json");
        let obj = v.as_object().unwrap();
        assert!(obj.get("input").unwrap().is_string());
    }

    #[test]
    fn generated_instance_id_matches_expected_shape() {
        let id = generate_instance_id("ns", "wf");
        let parts: Vec<&str> = id.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ns");
        assert_eq!(parts[1], "wf");
        assert_eq!(parts[2].len(), crate::config::INSTANCE_ID_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphabetic()));
    }
}
