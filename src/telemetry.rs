//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,study=debug,study_aid_backend=debug,tower_http=info,axum=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Targets in use:
//! - `study`: generation, puzzle and chat activity (answers recorded, levels
//!   advanced, evaluations, chat exchanges, superseded results)
//! - `study_aid_backend`: startup, config, provider selection, session eviction,
//!   WebSocket lifecycle
//!
//! What gets logged:
//! - Learner content never does. Source text, answers and chat messages appear
//!   as lengths (`text_len`, `answer_len`, `message_len`); WS messages as their
//!   `kind`. Model output is logged as sizes and counts only, and provider error
//!   bodies are truncated.
//! - Spans carry ids and shape: `session_id`, `theme`, `modules`, `provider`,
//!   `model`, chat `turns`.
//! - Provider calls log latency and token usage. A failed call is logged once,
//!   at error level, where the placeholder is substituted.
//! - Provider steps run on spawned tasks inside the operation's span, so their
//!   events carry the same fields.
//!
//! Tower HTTP TraceLayer still adds per-request spans; this complements it.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
        EnvFilter::new("info,study=debug,study_aid_backend=debug,tower_http=info,axum=info")
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // Choose JSON vs pretty; don't try to store different layer types.
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => {
            builder.json().init();
        }
        _ => {
            builder.init();
        }
    }
}
