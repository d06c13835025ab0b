//! Structured observability hooks for discovery and test lifecycle events.
//!
//! Events are emitted at `info!` level (per-test events at `debug!`), so
//! `RUST_LOG=tagrun_core=debug` shows every test start and finish.

use std::path::Path;

use tracing::{debug, info, warn};

/// Span covering one session; attach with `tracing::Instrument`.
///
/// # Example
///
/// ```ignore
/// async { /* … */ }.instrument(session_span("0b6c…")).await;
/// ```
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("tagrun.session", session_id = %session_id)
}

pub fn emit_discovery_started(strategy: &str, root: &Path) {
    info!(event = "discovery.started", strategy = %strategy, root = %root.display());
}

pub fn emit_discovery_finished(strategy: &str, units: usize, duration_ms: u64) {
    info!(
        event = "discovery.finished",
        strategy = %strategy,
        units = units,
        duration_ms = duration_ms,
    );
}

pub fn emit_test_started(name: &str) {
    debug!(event = "test.started", test = %name);
}

pub fn emit_test_finished(name: &str, passed: bool, exit_code: Option<i32>, duration_ms: u64) {
    if passed {
        debug!(event = "test.finished", test = %name, passed, duration_ms);
    } else {
        warn!(event = "test.finished", test = %name, passed, exit_code = ?exit_code, duration_ms);
    }
}

pub fn emit_test_skipped(name: &str, reason: Option<&str>) {
    debug!(event = "test.skipped", test = %name, reason = reason.unwrap_or(""));
}

pub fn emit_session_finished(passed: usize, failed: usize, skipped: usize, duration_ms: u64) {
    info!(
        event = "session.finished",
        passed = passed,
        failed = failed,
        skipped = skipped,
        duration_ms = duration_ms,
    );
}
