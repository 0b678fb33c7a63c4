//! Structured logging emitting JSON lines.
//!
//! Each line carries the timestamp, level and target from `tracing`, plus the
//! `ev`, `code` and `dur_ms` fields written by the helpers below.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global JSON-lines subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
        .try_init();
}

/// Same as [`init`] but writes to stderr, for processes whose stdout is a data channel.
pub fn init_stderr(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

/// Emit one lifecycle event for a request.
pub fn stage(module: &str, session: &str, event: &str, code: u32, dur_ms: u128) {
    tracing::info!(module, session, ev = event, code, dur_ms = dur_ms as u64);
}

/// Emit a failure event; the detail stays in the log and never reaches callers.
pub fn failure(module: &str, session: &str, event: &str, code: u32, dur_ms: u128, detail: &str) {
    tracing::error!(
        module,
        session,
        ev = event,
        code,
        dur_ms = dur_ms as u64,
        detail
    );
}
