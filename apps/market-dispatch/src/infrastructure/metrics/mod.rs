//! Prometheus Metrics Module
//!
//! Exposes dispatch metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Protocol events pulled from the gateway, by kind
//! - **Routing**: Notifications delivered, unknown tokens, decode errors
//! - **Requests**: One-shot request outcomes and durations
//! - **Subscriptions**: Active subscription count
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::event::EventKind;
use crate::domain::request::RequestMode;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (for example when
/// another global recorder is already set).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "dispatch_events_received_total",
        "Total protocol events pulled from the session gateway"
    );
    describe_counter!(
        "dispatch_notifications_total",
        "Total notifications delivered to observers"
    );
    describe_counter!(
        "dispatch_decode_errors_total",
        "Total field values that failed to decode"
    );
    describe_counter!(
        "dispatch_unknown_tokens_total",
        "Total messages dropped for an unregistered correlation token"
    );
    describe_counter!(
        "dispatch_requests_total",
        "Total one-shot requests by outcome"
    );

    describe_gauge!(
        "dispatch_active_subscriptions",
        "Number of securities currently subscribed"
    );

    describe_histogram!(
        "dispatch_request_duration_seconds",
        "Time from request submission to terminal state"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for the engine that observed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// One-shot request engine.
    Request,
    /// Streaming subscription engine.
    Subscription,
}

impl EngineKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Subscription => "subscription",
        }
    }
}

/// Metric labels for request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcomeLabel {
    /// Final response consumed.
    Completed,
    /// Protocol or gateway failure.
    Failed,
    /// Deadline elapsed.
    TimedOut,
}

impl RequestOutcomeLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Record an event pulled from the gateway.
pub fn record_event_received(kind: EventKind) {
    counter!(
        "dispatch_events_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record notifications delivered.
pub fn record_notifications(count: u64) {
    counter!("dispatch_notifications_total").increment(count);
}

/// Record field decode errors.
pub fn record_decode_errors(mode: &'static str, count: u64) {
    counter!(
        "dispatch_decode_errors_total",
        "mode" => mode
    )
    .increment(count);
}

/// Record a message dropped for an unknown token.
pub fn record_unknown_token(engine: EngineKind) {
    counter!(
        "dispatch_unknown_tokens_total",
        "engine" => engine.as_str()
    )
    .increment(1);
}

/// Record a request reaching a terminal state.
pub fn record_request(mode: RequestMode, outcome: RequestOutcomeLabel, duration: Duration) {
    counter!(
        "dispatch_requests_total",
        "mode" => mode.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "dispatch_request_duration_seconds",
        "mode" => mode.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("dispatch_active_subscriptions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
