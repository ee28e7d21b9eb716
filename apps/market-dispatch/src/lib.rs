#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Dispatch - Correlation-keyed Request/Subscription Engine
//!
//! Client-side dispatch for a market-data session: turns the ordered event
//! feed of a provider session into completed reference/historical result
//! sets and a continuously updated live field table, and fans each update
//! out to registered observers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Protocol shapes and result state
//!   - `element`, `value`: Tagged message bodies and decoded field values
//!   - `correlation`: Token to context registry
//!   - `result`: Reference tables and historical series
//!   - `subscription`: Live field table and incremental updates
//!
//! - **Application**: Engines and port definitions
//!   - `ports`: Session gateway and observer interfaces
//!   - `services`: Request engine, subscription engine, observer hub
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `replay`: Scripted session gateway
//!   - `broadcast`: Tracing and channel observers
//!   - `config`, `metrics`, `telemetry`: Ambient plumbing
//!
//! # Data Flow
//!
//! ```text
//!                   ┌──────────────────┐     ┌─────────────┐
//! SessionGateway ──►│ RequestEngine /  │────►│ ObserverHub │──► Observer 1
//!  (next_event)     │ SubscriptionEng. │     └─────────────┘──► Observer N
//!                   └────────┬─────────┘
//!                            ▼
//!                ResultTable / ResultSeries / LiveFieldTable
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Dispatch types with no I/O.
pub mod domain;

/// Application layer - Engines and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::correlation::{CorrelationRegistry, CorrelationToken, RegistryError};
pub use domain::element::{DecodeError, Element};
pub use domain::event::{Event, EventKind, Message};
pub use domain::notification::{Notification, NotificationData, NotifiedField};
pub use domain::request::{
    FieldId, HistoricalRange, Periodicity, RequestContext, RequestMode, RequestState, Security,
};
pub use domain::result::{RequestOutcome, ResultSeries, ResultTable, SecuritySeries};
pub use domain::subscription::{LiveFieldTable, LiveRow, SubscriptionEntry, SubscriptionState};
pub use domain::value::FieldValue;

// Ports
pub use application::ports::{GatewayError, Observer, Service, SessionGateway};

// Engines
pub use application::services::{
    ObserverHub, RequestEngine, RequestEngineConfig, RequestError, StatusReport,
    SubscriptionEngine, SubscriptionError, SubscriptionHandle, fetch_history, fetch_ohlc,
    fetch_reference_value,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, DispatchConfig};

// Adapters
pub use infrastructure::broadcast::{ChannelObserver, TracingObserver};
pub use infrastructure::replay::{ReplayScript, ScriptMode, ScriptedGateway, ScriptedSubscription};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
