//! Configuration Module
//!
//! Configuration loading for the dispatch engines and the replay binary.

mod settings;

pub use settings::{
    ConfigError, DispatchConfig, MetricsSettings, ReplaySettings, RequestSettings,
    SubscriptionSettings,
};
