//! Application Layer - Dispatch engines and port definitions.
//!
//! This layer contains the request and subscription engines and the port
//! interfaces they use to reach the provider session and observers.

/// Port interfaces for the session gateway and observers.
pub mod ports;

/// Request, subscription and fan-out services.
pub mod services;
