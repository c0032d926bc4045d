//! Counters exported through the `metrics` facade.
//!
//! Nothing is recorded unless the application installs a recorder.

/// Subscriptions started.
pub const SUBSCRIPTIONS: &str = "fluxweld_subscriptions_total";
/// Signals sent, labelled by kind.
pub const SIGNALS: &str = "fluxweld_signals_total";
/// Demand protocol violations.
pub const PROTOCOL_VIOLATIONS: &str = "fluxweld_protocol_violations_total";

pub(crate) fn record_subscribe() {
    metrics::counter!(SUBSCRIPTIONS).increment(1);
}

pub(crate) fn record_signal(kind: &'static str) {
    metrics::counter!(SIGNALS, "kind" => kind).increment(1);
}

pub(crate) fn record_protocol_violation() {
    metrics::counter!(PROTOCOL_VIOLATIONS).increment(1);
}
