//! Dispatch Configuration Settings
//!
//! Configuration types for the dispatch engines, loaded from environment
//! variables. Unparseable values fall back to their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::application::services::RequestEngineConfig;

/// One-shot request settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestSettings {
    /// Upper bound on a request's lifetime (`None` = wait indefinitely).
    pub deadline: Option<Duration>,
}

impl From<RequestSettings> for RequestEngineConfig {
    fn from(settings: RequestSettings) -> Self {
        Self {
            deadline: settings.deadline,
        }
    }
}

/// Streaming subscription settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSettings {
    /// Minimum seconds between updates for new subscriptions.
    pub interval_seconds: f64,
    /// Capacity of the status diagnostics channel.
    pub diagnostics_capacity: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 0.0,
            diagnostics_capacity: 256,
        }
    }
}

/// Replay gateway settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySettings {
    /// Path of the replay script.
    pub script: Option<PathBuf>,
}

/// Metrics settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSettings {
    /// Whether the Prometheus recorder is installed.
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete dispatch configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchConfig {
    /// Request settings.
    pub request: RequestSettings,
    /// Subscription settings.
    pub subscription: SubscriptionSettings,
    /// Replay settings.
    pub replay: ReplaySettings,
    /// Metrics settings.
    pub metrics: MetricsSettings,
}

impl DispatchConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a negative subscription
    /// interval and [`ConfigError::EmptyValue`] for an empty script path.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let deadline_ms = parse_u64(&lookup, "DISPATCH_REQUEST_DEADLINE_MS", 0);
        let request = RequestSettings {
            deadline: (deadline_ms > 0).then(|| Duration::from_millis(deadline_ms)),
        };

        let interval_seconds = parse_f64(
            &lookup,
            "DISPATCH_SUBSCRIPTION_INTERVAL_SECS",
            SubscriptionSettings::default().interval_seconds,
        );
        if interval_seconds < 0.0 || !interval_seconds.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "DISPATCH_SUBSCRIPTION_INTERVAL_SECS".to_string(),
                value: interval_seconds.to_string(),
            });
        }
        let subscription = SubscriptionSettings {
            interval_seconds,
            diagnostics_capacity: parse_usize(
                &lookup,
                "DISPATCH_DIAGNOSTICS_CAPACITY",
                SubscriptionSettings::default().diagnostics_capacity,
            )
            .max(1),
        };

        let script = match lookup("DISPATCH_REPLAY_SCRIPT") {
            Some(path) if path.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("DISPATCH_REPLAY_SCRIPT".to_string()));
            }
            Some(path) => Some(PathBuf::from(path)),
            None => None,
        };

        let metrics = MetricsSettings {
            enabled: parse_bool(&lookup, "DISPATCH_METRICS_ENABLED", true),
        };

        Ok(Self {
            request,
            subscription,
            replay: ReplaySettings { script },
            metrics,
        })
    }

    /// The replay script path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if no script is configured.
    pub fn replay_script(&self) -> Result<&Path, ConfigError> {
        self.replay
            .script
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DISPATCH_REPLAY_SCRIPT".to_string()))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an out-of-range value.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_f64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| {
        !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off")
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<DispatchConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        DispatchConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]).unwrap();

        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.request.deadline, None);
        assert_eq!(config.subscription.diagnostics_capacity, 256);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn zero_deadline_means_no_deadline() {
        let config = config(&[("DISPATCH_REQUEST_DEADLINE_MS", "0")]).unwrap();
        assert_eq!(config.request.deadline, None);
    }

    #[test]
    fn deadline_in_millis() {
        let config = config(&[("DISPATCH_REQUEST_DEADLINE_MS", "1500")]).unwrap();
        assert_eq!(config.request.deadline, Some(Duration::from_millis(1500)));
        assert_eq!(
            RequestEngineConfig::from(config.request).deadline,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = config(&[
            ("DISPATCH_REQUEST_DEADLINE_MS", "soon"),
            ("DISPATCH_DIAGNOSTICS_CAPACITY", "many"),
        ])
        .unwrap();
        assert_eq!(config.request.deadline, None);
        assert_eq!(config.subscription.diagnostics_capacity, 256);
    }

    #[test]
    fn negative_interval_is_rejected() {
        let err = config(&[("DISPATCH_SUBSCRIPTION_INTERVAL_SECS", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn metrics_can_be_disabled() {
        let config = config(&[("DISPATCH_METRICS_ENABLED", "false")]).unwrap();
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn replay_script_is_required_when_asked_for() {
        let config = config(&[]).unwrap();
        assert!(matches!(
            config.replay_script(),
            Err(ConfigError::MissingEnvVar(_))
        ));

        let config = config_with_script();
        assert_eq!(config.replay_script().unwrap(), Path::new("/tmp/script.json"));
    }

    fn config_with_script() -> DispatchConfig {
        config(&[("DISPATCH_REPLAY_SCRIPT", "/tmp/script.json")]).unwrap()
    }

    #[test]
    fn empty_script_path_is_rejected() {
        let err = config(&[("DISPATCH_REPLAY_SCRIPT", " ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }
}
