//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Observer adapters (tracing, broadcast channel).
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Scripted session gateway for offline replay.
pub mod replay;

/// OpenTelemetry tracing integration.
pub mod telemetry;
