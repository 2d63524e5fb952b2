//! Prometheus metrics for the cluster-membership agent.
//!
//! Registered once via `lazy_static`, the same way the teacher's server-wide
//! metrics are, scaled down to what this crate's state machine actually
//! produces: session churn, view size, refresh outcomes, and per-command
//! results.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    /// The number of coordination-store sessions opened since startup
    /// (the initial connect plus one per `Expired` reconnect).
    pub static ref SESSIONS_OPENED_TOTAL: Counter = register_counter!(
        "membership_sessions_opened_total",
        "Total number of coordination-store sessions opened."
    )
    .unwrap();

    /// The number of nodes in the most recently published cluster view.
    pub static ref VIEW_SIZE: Gauge = register_gauge!(
        "membership_view_size",
        "Number of nodes in the current cluster view."
    )
    .unwrap();

    /// The number of refresh attempts that failed to list or decode znodes.
    pub static ref REFRESH_FAILURES_TOTAL: Counter = register_counter!(
        "membership_refresh_failures_total",
        "Total number of refresh attempts that failed."
    )
    .unwrap();

    /// Mutation command outcomes, labeled by command kind and result.
    pub static ref COMMANDS_TOTAL: CounterVec = register_counter_vec!(
        "membership_commands_total",
        "Total number of mutation commands handled, labeled by command and outcome.",
        &["command", "outcome"]
    )
    .unwrap();
}

pub fn record_session_opened() {
    SESSIONS_OPENED_TOTAL.inc();
}

pub fn record_view_size(size: usize) {
    VIEW_SIZE.set(size as f64);
}

pub fn record_refresh_failure() {
    REFRESH_FAILURES_TOTAL.inc();
}

pub fn record_command_outcome(command: &str, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    COMMANDS_TOTAL.with_label_values(&[command, outcome]).inc();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// format, for the demo binary's health endpoint.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
