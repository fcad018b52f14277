//! `tracing`/`tracing-subscriber` initialization (§10), grounded on the
//! teacher's use of an `EnvFilter`-driven `fmt` layer ahead of the workflow
//! worker's own `#[tracing::instrument]` spans.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber: an `EnvFilter` (defaulting to
/// `info`, overridable via `RUST_LOG`) plus a JSON-formatted fmt layer.
/// Call once, at process startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();
}
