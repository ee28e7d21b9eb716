//! Application Ports (Driver and Driven)
//!
//! Ports define the contracts the dispatch engines depend on.
//! - **Driven Ports** (Secondary/Outbound): the session gateway that opens
//!   services, sends requests and yields protocol events
//! - **Driver Ports** (Primary/Inbound): observers that receive dispatch
//!   notifications

mod observer_port;
mod session_gateway_port;

pub use observer_port::Observer;
#[cfg(test)]
pub use observer_port::MockObserver;
pub use session_gateway_port::{GatewayError, Service, SessionGateway};
