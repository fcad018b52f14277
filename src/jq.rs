//! JQ evaluator (§4.2): data transforms and predicates over the state
//! document, bounded by a fixed per-evaluation time budget.

use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{codes, WorkflowError, WorkflowResult};

/// Evaluates JQ programs against `serde_json::Value` documents.
///
/// Each evaluation is bounded by [`EngineConfig::jq_budget`]; exhausting it
/// is an internal error, not a catchable/uncatchable one — a hung query is
/// an engine fault, not a workflow-authoring mistake (§4.2).
#[derive(Clone)]
pub struct JqEvaluator {
    budget: std::time::Duration,
}

impl JqEvaluator {
    pub fn new(config: &EngineConfig) -> Self {
        JqEvaluator { budget: config.jq_budget }
    }

    /// `jq(data, q)`: the full sequence of results.
    pub async fn jq(&self, data: &Value, query: &str) -> WorkflowResult<Vec<Value>> {
        if query.trim().is_empty() {
            return Err(WorkflowError::catchable(codes::JQ_BAD_COMMAND, "empty jq program"));
        }

        let data = data.clone();
        let query = query.to_string();
        let budget = self.budget;
        let started = std::time::Instant::now();

        let join = tokio::task::spawn_blocking(move || run_query(&data, &query));

        let outcome = match tokio::time::timeout(budget, join).await {
            Ok(Ok(res)) => res,
            Ok(Err(join_err)) => Err(WorkflowError::internal(format!(
                "jq evaluator task panicked: {join_err}"
            ))),
            Err(_) => Err(WorkflowError::internal("jq evaluation exceeded time budget")),
        };

        crate::metrics::JQ_EVAL_SECONDS
            .with_label_values(&[if outcome.is_ok() { "ok" } else { "err" }])
            .observe(started.elapsed().as_secs_f64());

        outcome
    }

    /// `jqOne`: must produce exactly one result; returns that single
    /// element (not a one-element slice — see §9 open question).
    pub async fn jq_one(&self, data: &Value, query: &str) -> WorkflowResult<Value> {
        let mut results = self.jq(data, query).await?;
        if results.len() != 1 {
            return Err(WorkflowError::catchable(
                codes::JQ_NOT_OBJECT,
                format!("expected exactly one jq result, got {}", results.len()),
            ));
        }
        Ok(results.remove(0))
    }

    /// `jqObject`: `jqOne` whose sole result must be a mapping.
    pub async fn jq_object(&self, data: &Value, query: &str) -> WorkflowResult<Value> {
        let result = self.jq_one(data, query).await?;
        if !result.is_object() {
            return Err(WorkflowError::catchable(
                codes::JQ_NOT_OBJECT,
                "jq result is not an object",
            ));
        }
        Ok(result)
    }
}

fn run_query(data: &Value, query: &str) -> WorkflowResult<Vec<Value>> {
    let (filter, errs) = jaq_parse::parse(query, jaq_parse::main());
    if !errs.is_empty() || filter.is_none() {
        let detail = errs.into_iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(WorkflowError::catchable(
            codes::JQ_BAD_COMMAND,
            format!("failed to parse jq program: {detail}"),
        ));
    }

    let mut defs = ParseCtx::new(Vec::new());
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());
    let filter = defs.compile(filter.expect("checked above"));

    if !defs.errs.is_empty() {
        let detail = defs.errs.iter().map(|(e, _)| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(WorkflowError::catchable(
            codes::JQ_BAD_COMMAND,
            format!("failed to compile jq program: {detail}"),
        ));
    }

    let inputs = RcIter::new(core::iter::empty());
    let ctx = Ctx::new([], &inputs);
    let val = Val::from(data.clone());

    let mut out = Vec::new();
    for item in filter.run((ctx, val)) {
        match item {
            Ok(v) => out.push(Value::from(v)),
            Err(e) => {
                return Err(WorkflowError::uncatchable(
                    codes::JQ_BAD_COMMAND,
                    format!("jq runtime error: {e}"),
                ))
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval() -> JqEvaluator {
        JqEvaluator::new(&EngineConfig::default())
    }

    #[tokio::test]
    async fn identity_and_merge() {
        let data = serde_json::json!({"a": 1});
        let out = eval().jq_one(&data, ". + {\"b\": 2}").await.unwrap();
        assert_eq!(out, serde_json::json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn empty_program_is_catchable() {
        let data = serde_json::json!({});
        let err = eval().jq(&data, "   ").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::JQ_BAD_COMMAND));
    }

    #[tokio::test]
    async fn jq_one_requires_single_result() {
        let data = serde_json::json!([1, 2, 3]);
        let err = eval().jq_one(&data, ".[]").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::JQ_NOT_OBJECT));
    }

    #[tokio::test]
    async fn jq_object_rejects_scalars() {
        let data = serde_json::json!({"a": 1});
        let err = eval().jq_object(&data, ".a").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::JQ_NOT_OBJECT));
    }
}
