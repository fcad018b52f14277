//! Metrics definitions, grounded on the `lazy_static!` block of declared
//! metrics the teacher's job-engine packages (e.g. `pegboard::metrics`) use,
//! adapted to the `prometheus` crate directly rather than the teacher's
//! internal `rivet-metrics`/otel wrapper (see DESIGN.md).

use lazy_static::lazy_static;
use prometheus::{HistogramVec, IntCounterVec};

lazy_static! {
    /// Labels: `state_type`.
    pub static ref RUN_PASSES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "flowcore_run_passes_total",
        "Total state-dispatch run passes started.",
        &["state_type"]
    )
    .expect("metric registration is infallible at startup");

    /// Labels: `state_type`, `outcome` ∈ {advance, suspend, terminal, retry, catch}.
    pub static ref RUN_OUTCOMES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "flowcore_run_outcomes_total",
        "Run pass outcomes by classification.",
        &["state_type", "outcome"]
    )
    .expect("metric registration is infallible at startup");

    /// Labels: `kind` ∈ {catchable, uncatchable, internal}.
    pub static ref ERRORS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "flowcore_errors_total",
        "Workflow errors classified by kind.",
        &["kind"]
    )
    .expect("metric registration is infallible at startup");

    pub static ref RETRIES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "flowcore_retries_total",
        "Retry attempts scheduled, by inline-vs-timer delivery.",
        &["delivery"]
    )
    .expect("metric registration is infallible at startup");

    /// Labels: `variant` ∈ {hard, soft}.
    pub static ref CANCELLATIONS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "flowcore_cancellations_total",
        "Instances cancelled, by variant.",
        &["variant"]
    )
    .expect("metric registration is infallible at startup");

    pub static ref LOCK_WAIT_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "flowcore_lock_wait_seconds",
        "Time spent waiting to acquire the per-instance advisory lock.",
        &["outcome"]
    )
    .expect("metric registration is infallible at startup");

    pub static ref JQ_EVAL_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "flowcore_jq_eval_seconds",
        "Time spent evaluating a JQ program against the state document.",
        &["outcome"]
    )
    .expect("metric registration is infallible at startup");
}
