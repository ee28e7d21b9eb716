//! Application Services
//!
//! Services that drive the session gateway and route protocol events into
//! domain state and observer notifications.
//!
//! - `RequestEngine`: One-shot reference and historical requests
//! - `SubscriptionEngine`: Streaming subscriptions with a live field table
//! - `ObserverHub`: Ordered synchronous notification fan-out

mod aggregator;
mod observer_hub;
mod request_engine;
mod shortcuts;
mod stats;
mod subscription_engine;

pub use aggregator::{AggregateError, AggregateSummary, ResponseAggregator};
pub use observer_hub::ObserverHub;
pub use request_engine::{RequestEngine, RequestEngineConfig, RequestError};
pub use shortcuts::{OHLC_FIELDS, fetch_history, fetch_ohlc, fetch_reference_value};
pub use stats::{DispatchStats, DispatchStatsSnapshot};
pub use subscription_engine::{
    StatusReport, SubscriptionEngine, SubscriptionError, SubscriptionHandle,
};
