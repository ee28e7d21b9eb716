//! Subscription Engine
//!
//! Drives streaming subscriptions: registers one correlation token per
//! subscribed security, issues the subscribe, then pulls events and applies
//! subscription data to the live field table until cancelled.
//!
//! # State Machine
//!
//! ```text
//! Unsubscribed ──subscribe──► Subscribing ──run──► Streaming
//!       ▲                                              │
//!       └───────────── unsubscribe ◄── Unsubscribing ◄─┘ cancel
//! ```
//!
//! Subscription and authorization status events are logged and, when a
//! diagnostics channel is attached, forwarded as [`StatusReport`]s. Decode
//! errors never end the stream; a closed session does.
//!
//! The engine can be driven on the caller's task (`subscribe` + `run`) or
//! moved onto its own task with [`SubscriptionEngine::start`], which returns
//! a [`SubscriptionHandle`] for snapshots and teardown.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::observer_hub::ObserverHub;
use super::stats::DispatchStats;
use crate::application::ports::{GatewayError, Service, SessionGateway};
use crate::domain::correlation::{CorrelationRegistry, CorrelationToken, RegistryError};
use crate::domain::element::Element;
use crate::domain::event::{Event, EventKind};
use crate::domain::notification::Notification;
use crate::domain::request::{FieldId, Security};
use crate::domain::subscription::{
    LiveFieldTable, SubscriptionEntry, SubscriptionState, SubscriptionTable,
};
use crate::infrastructure::metrics::{self, EngineKind};

/// Subscription engine errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The gateway failed to open, subscribe or deliver events.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Token registration failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The operation is not valid in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State the engine was in.
        state: &'static str,
    },

    /// The streaming task panicked or was aborted.
    #[error("subscription task failed: {0}")]
    Task(String),
}

/// A status or authorization event forwarded to the diagnostics channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Event classification.
    pub kind: EventKind,
    /// Tokens the message was addressed to.
    pub correlation_tokens: Vec<CorrelationToken>,
    /// Provider message type, if reported.
    pub message_type: Option<String>,
    /// Message body.
    pub body: Element,
    /// Local receipt time.
    pub received_at: DateTime<Utc>,
}

/// Streaming subscription driver.
pub struct SubscriptionEngine<G: SessionGateway> {
    gateway: Arc<G>,
    registry: CorrelationRegistry<SubscriptionEntry>,
    table: Arc<RwLock<SubscriptionTable>>,
    observers: ObserverHub,
    stats: Arc<DispatchStats>,
    diagnostics: Option<mpsc::Sender<StatusReport>>,
    entries: Vec<SubscriptionEntry>,
    state: SubscriptionState,
    service_open: bool,
}

impl<G: SessionGateway> std::fmt::Debug for SubscriptionEngine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("state", &self.state)
            .field("entries", &self.entries.len())
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl<G: SessionGateway + 'static> SubscriptionEngine<G> {
    /// Create an engine.
    #[must_use]
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            registry: CorrelationRegistry::new(),
            table: Arc::new(RwLock::new(SubscriptionTable::new())),
            observers: ObserverHub::new(),
            stats: Arc::new(DispatchStats::new(EngineKind::Subscription)),
            diagnostics: None,
            entries: Vec::new(),
            state: SubscriptionState::Unsubscribed,
            service_open: false,
        }
    }

    /// Forward status and authorization events to `sender`.
    ///
    /// Reports are dropped (with a warning) when the channel is full.
    #[must_use]
    pub fn with_diagnostics(mut self, sender: mpsc::Sender<StatusReport>) -> Self {
        self.diagnostics = Some(sender);
        self
    }

    /// Observer registry for this engine.
    #[must_use]
    pub const fn observers(&self) -> &ObserverHub {
        &self.observers
    }

    /// Dispatch counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Active entries.
    #[must_use]
    pub fn entries(&self) -> &[SubscriptionEntry] {
        &self.entries
    }

    /// Owned copy of the live field table.
    #[must_use]
    pub fn snapshot(&self) -> LiveFieldTable {
        self.table.read().snapshot()
    }

    /// Build one entry per security with engine-assigned tokens.
    pub fn entries_for<S, F>(
        &mut self,
        securities: impl IntoIterator<Item = S>,
        fields: &[F],
        interval_seconds: f64,
    ) -> Vec<SubscriptionEntry>
    where
        S: Into<Security>,
        F: Clone + Into<FieldId>,
    {
        securities
            .into_iter()
            .map(|security| {
                SubscriptionEntry::new(
                    self.registry.next_token(),
                    security,
                    fields.iter().cloned(),
                )
                .with_interval(interval_seconds)
            })
            .collect()
    }

    /// Register tokens and subscribe.
    ///
    /// The live table is rebuilt with one empty row per entry, discarding
    /// rows from any earlier subscription. On any failure every token
    /// registered by this call is released again.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::InvalidState`] unless unsubscribed
    /// - [`SubscriptionError::Registry`] if a token is already in use
    /// - [`SubscriptionError::Gateway`] if the service cannot be opened or
    ///   the subscribe is rejected
    pub async fn subscribe(&mut self, entries: Vec<SubscriptionEntry>) -> Result<(), SubscriptionError> {
        if self.state != SubscriptionState::Unsubscribed {
            return Err(self.invalid("subscribe"));
        }

        if !self.service_open {
            self.gateway.open(Service::MktData).await?;
            self.service_open = true;
        }

        for (registered, entry) in entries.iter().enumerate() {
            if let Err(e) = self.registry.register(entry.correlation_token, entry.clone()) {
                for done in &entries[..registered] {
                    self.registry.unregister(done.correlation_token);
                }
                return Err(e.into());
            }
        }

        self.table.write().restart(&entries);

        self.state = SubscriptionState::Subscribing;
        if let Err(e) = self.gateway.subscribe(&entries).await {
            for entry in &entries {
                self.registry.unregister(entry.correlation_token);
            }
            self.state = SubscriptionState::Unsubscribed;
            return Err(e.into());
        }

        tracing::info!(
            securities = entries.len(),
            tokens = ?entries.iter().map(|e| e.correlation_token.value()).collect::<Vec<_>>(),
            "Subscribed"
        );
        metrics::set_active_subscriptions(entries.len());
        self.entries = entries;
        Ok(())
    }

    /// Pull and apply events until `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::InvalidState`] if nothing is subscribed
    /// - [`SubscriptionError::Gateway`] if the session closes or fails
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), SubscriptionError> {
        if !matches!(
            self.state,
            SubscriptionState::Subscribing | SubscriptionState::Streaming
        ) {
            return Err(self.invalid("run"));
        }
        self.state = SubscriptionState::Streaming;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!("Subscription stream cancelled");
                    return Ok(());
                }
                event = self.gateway.next_event() => {
                    match event {
                        Ok(event) => self.dispatch(&event),
                        Err(e) => {
                            tracing::warn!(error = %e, "Subscription stream ended");
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    /// Unsubscribe and release every token. The live table keeps its last
    /// values until the next subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Gateway`] if the unsubscribe is
    /// rejected; tokens are released regardless.
    pub async fn unsubscribe(&mut self) -> Result<(), SubscriptionError> {
        if self.state == SubscriptionState::Unsubscribed {
            return Ok(());
        }
        self.state = SubscriptionState::Unsubscribing;

        let result = self.gateway.unsubscribe(&self.entries).await;

        for entry in self.entries.drain(..) {
            self.registry.unregister(entry.correlation_token);
        }
        self.state = SubscriptionState::Unsubscribed;
        metrics::set_active_subscriptions(0);

        match result {
            Ok(()) => {
                tracing::info!("Unsubscribed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unsubscribe failed, tokens released");
                Err(e.into())
            }
        }
    }

    /// Subscribe and move the stream loop onto its own task.
    ///
    /// # Errors
    ///
    /// Same as [`SubscriptionEngine::subscribe`].
    pub async fn start(
        mut self,
        entries: Vec<SubscriptionEntry>,
    ) -> Result<SubscriptionHandle<G>, SubscriptionError> {
        self.subscribe(entries).await?;

        let cancel = CancellationToken::new();
        let table = Arc::clone(&self.table);
        let observers = self.observers.clone();
        let stats = Arc::clone(&self.stats);

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = self.run(token).await;
            (self, result)
        });

        Ok(SubscriptionHandle {
            cancel,
            task,
            table,
            observers,
            stats,
        })
    }

    fn invalid(&self, operation: &'static str) -> SubscriptionError {
        SubscriptionError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }

    fn dispatch(&self, event: &Event) {
        let kind = event.classify();
        self.stats.record_event(kind);

        match kind {
            EventKind::SubscriptionData => {
                for message in event.messages() {
                    self.apply_data(message);
                }
            }
            EventKind::SubscriptionStatus | EventKind::AuthorizationStatus => {
                for message in event.messages() {
                    tracing::info!(
                        kind = %kind,
                        tokens = ?message.correlation_tokens,
                        message_type = message.message_type.as_deref().unwrap_or("unknown"),
                        "Status event"
                    );
                    self.forward_status(kind, message);
                }
            }
            other => {
                tracing::debug!(kind = %other, "Ignoring event");
            }
        }
    }

    fn apply_data(&self, message: &crate::domain::event::Message) {
        if message.correlation_tokens.is_empty() {
            self.stats.record_unknown_token();
            tracing::warn!("Subscription data without a correlation token, dropping");
            return;
        }

        let mut pending: Vec<Notification> = Vec::new();
        let summary = self
            .table
            .write()
            .apply(&self.registry, message, Utc::now(), &mut |n| pending.push(n));

        for token in &summary.unknown {
            self.stats.record_unknown_token();
            tracing::warn!(
                token = %token,
                "Subscription data for unknown correlation token, dropping"
            );
        }
        self.stats.record_routed(summary.routed as u64);
        self.stats
            .record_decode_errors("subscription", summary.decode_errors as u64);

        for notification in &pending {
            self.observers.notify(notification);
        }
        self.stats.record_notifications(pending.len() as u64);
    }

    fn forward_status(&self, kind: EventKind, message: &crate::domain::event::Message) {
        let Some(sender) = &self.diagnostics else {
            return;
        };
        let report = StatusReport {
            kind,
            correlation_tokens: message.correlation_tokens.clone(),
            message_type: message.message_type.clone(),
            body: message.body.clone(),
            received_at: Utc::now(),
        };
        if let Err(e) = sender.try_send(report) {
            tracing::warn!(error = %e, "Diagnostics channel unavailable, status report dropped");
        }
    }
}

/// Handle to a subscription running on its own task.
pub struct SubscriptionHandle<G: SessionGateway> {
    cancel: CancellationToken,
    task: JoinHandle<(SubscriptionEngine<G>, Result<(), SubscriptionError>)>,
    table: Arc<RwLock<SubscriptionTable>>,
    observers: ObserverHub,
    stats: Arc<DispatchStats>,
}

impl<G: SessionGateway + 'static> SubscriptionHandle<G> {
    /// Observer registry of the running engine.
    #[must_use]
    pub const fn observers(&self) -> &ObserverHub {
        &self.observers
    }

    /// Dispatch counters of the running engine.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Owned copy of the live field table.
    #[must_use]
    pub fn snapshot(&self) -> LiveFieldTable {
        self.table.read().snapshot()
    }

    /// Whether the stream loop has exited (cancelled or failed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the stream, wait for the loop to exit, unsubscribe and
    /// release every token. Returns the final live table.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::Task`] if the stream task panicked
    /// - the stream loop's own error, if it ended before cancellation
    /// - [`SubscriptionError::Gateway`] if the unsubscribe is rejected
    pub async fn stop(self) -> Result<LiveFieldTable, SubscriptionError> {
        self.cancel.cancel();

        let (mut engine, run_result) = self
            .task
            .await
            .map_err(|e| SubscriptionError::Task(e.to_string()))?;

        let unsubscribed = engine.unsubscribe().await;
        run_result?;
        unsubscribed?;

        Ok(engine.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message() {
        let err = SubscriptionError::InvalidState {
            operation: "subscribe",
            state: SubscriptionState::Streaming.as_str(),
        };
        assert_eq!(err.to_string(), "cannot subscribe while streaming");
    }
}
