//! Observer Adapters
//!
//! Ready-made [`Observer`] implementations for the engines' observer hubs.
//!
//! - [`TracingObserver`] logs each notification through `tracing`.
//! - [`ChannelObserver`] forwards notifications into a tokio broadcast
//!   channel so any number of async consumers can follow a request or
//!   subscription without running inside the dispatch loop.

use tokio::sync::broadcast;

use crate::application::ports::Observer;
use crate::domain::notification::{Notification, NotificationData};

// =============================================================================
// Tracing Observer
// =============================================================================

/// Logs notifications at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver {
    aggregate_only: bool,
}

impl TracingObserver {
    /// Log every notification.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            aggregate_only: false,
        }
    }

    /// Log only the `ALL` notification of each security.
    #[must_use]
    pub const fn aggregate_only() -> Self {
        Self {
            aggregate_only: true,
        }
    }
}

impl Observer for TracingObserver {
    fn update(&self, notification: &Notification) {
        if self.aggregate_only && !notification.field.is_all() {
            return;
        }

        match &notification.data {
            NotificationData::Value(value) => {
                tracing::info!(
                    token = %notification.correlation_token,
                    security = %notification.security,
                    field = %notification.field,
                    value = %value,
                    provider_time = notification.provider_timestamp.as_deref(),
                    "Field update"
                );
            }
            NotificationData::Row(row) => {
                tracing::info!(
                    token = %notification.correlation_token,
                    security = %notification.security,
                    fields = row.len(),
                    provider_time = notification.provider_timestamp.as_deref(),
                    "Row update"
                );
            }
            NotificationData::Column(column) => {
                tracing::info!(
                    token = %notification.correlation_token,
                    security = %notification.security,
                    field = %notification.field,
                    rows = column.len(),
                    "Column update"
                );
            }
            NotificationData::Series(series) => {
                tracing::info!(
                    token = %notification.correlation_token,
                    security = %notification.security,
                    rows = series.row_count(),
                    fields = series.fields().len(),
                    "Series update"
                );
            }
        }
    }
}

// =============================================================================
// Channel Observer
// =============================================================================

/// Default capacity of a [`ChannelObserver`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Forwards notifications into a broadcast channel.
///
/// Sending never blocks the dispatch loop. Slow receivers observe
/// `RecvError::Lagged` and skip ahead; with no receivers the notification
/// is dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: broadcast::Sender<Notification>,
}

impl Default for ChannelObserver {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChannelObserver {
    /// Create an observer with the given channel capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Get a new receiver. It sees notifications sent after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Observer for ChannelObserver {
    fn update(&self, notification: &Notification) {
        if self.tx.send(notification.clone()).is_err() {
            tracing::trace!(
                security = %notification.security,
                field = %notification.field,
                "No channel receivers, dropping notification"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::correlation::CorrelationToken;
    use crate::domain::value::FieldValue;

    fn bid(value: f64) -> Notification {
        Notification::field(
            "IBM US Equity",
            "BID",
            NotificationData::Value(FieldValue::Float(value)),
            CorrelationToken(1),
            Utc::now(),
        )
    }

    #[test]
    fn channel_observer_starts_without_receivers() {
        let observer = ChannelObserver::default();
        assert_eq!(observer.receiver_count(), 0);

        // Dropped silently
        observer.update(&bid(1.0));
    }

    #[test]
    fn zero_capacity_is_raised() {
        let observer = ChannelObserver::new(0);
        let mut rx = observer.subscribe();

        let sent = bid(1.0);
        observer.update(&sent);

        assert_eq!(rx.try_recv().unwrap(), sent);
    }

    #[tokio::test]
    async fn channel_observer_fans_out_to_all_receivers() {
        let observer = ChannelObserver::new(16);
        let mut rx1 = observer.subscribe();
        let mut rx2 = observer.subscribe();
        assert_eq!(observer.receiver_count(), 2);

        let sent = bid(101.5);
        observer.update(&sent);

        assert_eq!(rx1.recv().await.unwrap(), sent);
        assert_eq!(rx2.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let observer = ChannelObserver::new(2);
        let mut rx = observer.subscribe();

        for i in 0..4 {
            observer.update(&bid(f64::from(i)));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(
            rx.recv().await.unwrap().data.as_value(),
            Some(&FieldValue::Float(2.0))
        );
    }

    #[test]
    fn tracing_observer_accepts_every_payload() {
        let observer = TracingObserver::new();
        observer.update(&bid(1.0));
        observer.update(&Notification::all(
            "IBM US Equity",
            NotificationData::Row(vec![("BID".to_string(), FieldValue::NotAvailable)]),
            CorrelationToken(1),
            Utc::now(),
        ));

        TracingObserver::aggregate_only().update(&bid(2.0));
    }
}
