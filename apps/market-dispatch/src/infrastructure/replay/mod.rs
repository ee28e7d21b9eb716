//! Scripted Session Gateway
//!
//! An in-memory [`SessionGateway`] that replays a fixed sequence of events.
//! Used by the binary to run a captured session offline and by tests to
//! drive the engines deterministically.
//!
//! # Behavior
//!
//! - Events are delivered in the order they were pushed.
//! - While the gateway is open and the queue is empty, `next_event`
//!   suspends. After [`ScriptedGateway::close`] it drains what is left and
//!   then returns [`GatewayError::Closed`].
//! - Every open, request, subscribe and unsubscribe call is recorded.
//!
//! # Script Format (JSON)
//!
//! ```json
//! {
//!   "request": {"mode": "reference", "securities": ["IBM US Equity"], "fields": ["PX_LAST"]},
//!   "events": [
//!     {"kind": "final_response", "messages": [{"correlation_ids": [1], "body": {"securityData": []}}]}
//!   ]
//! }
//! ```
//!
//! Engines assign tokens from 1 upwards, so a script addresses its first
//! request (or first subscribed security) as token 1.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::application::ports::{GatewayError, Service, SessionGateway};
use crate::domain::correlation::CorrelationToken;
use crate::domain::event::Event;
use crate::domain::request::{FieldId, RequestContext, Security};
use crate::domain::subscription::SubscriptionEntry;

// =============================================================================
// Replay Script
// =============================================================================

/// Errors loading a replay script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The file could not be read.
    #[error("failed to read replay script {path}: {source}")]
    Io {
        /// Script path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid script.
    #[error("invalid replay script {path}: {source}")]
    Parse {
        /// Script path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The script names both a request and a subscription, or neither.
    #[error("replay script must contain exactly one of `request` or `subscription`")]
    Ambiguous,
}

/// What a replay script drives.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptMode<'a> {
    /// A one-shot request.
    Request(&'a RequestContext),
    /// A subscription over these securities.
    Subscription(&'a [ScriptedSubscription]),
}

/// A subscribed security as written in a script.
///
/// The interval is optional so a configured default applies only where the
/// script does not set one; an explicit `0` keeps tick-by-tick updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedSubscription {
    /// Token the scripted events address this security with.
    pub correlation_id: CorrelationToken,
    /// Subscribed security.
    pub security: Security,
    /// Subscribed fields.
    pub fields: Vec<FieldId>,
    /// Minimum seconds between updates, if the script sets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
}

impl ScriptedSubscription {
    /// Engine entry for this security, using `default_interval` when the
    /// script leaves the interval out.
    #[must_use]
    pub fn to_entry(&self, default_interval: f64) -> SubscriptionEntry {
        SubscriptionEntry::new(
            self.correlation_id,
            self.security.clone(),
            self.fields.iter().cloned(),
        )
        .with_interval(self.interval_seconds.unwrap_or(default_interval))
    }
}

/// A captured session: what the client asked for and what came back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// One-shot request to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestContext>,

    /// Securities to subscribe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscription: Vec<ScriptedSubscription>,

    /// Events in delivery order.
    #[serde(default)]
    pub events: Vec<Event>,
}

impl ReplayScript {
    /// Load a script from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Io`] or [`ScriptError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ScriptError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse a script from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The driven operation.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Ambiguous`] unless exactly one of `request`
    /// and `subscription` is set.
    pub fn mode(&self) -> Result<ScriptMode<'_>, ScriptError> {
        match (&self.request, self.subscription.is_empty()) {
            (Some(request), true) => Ok(ScriptMode::Request(request)),
            (None, false) => Ok(ScriptMode::Subscription(&self.subscription)),
            _ => Err(ScriptError::Ambiguous),
        }
    }
}

// =============================================================================
// Scripted Gateway
// =============================================================================

/// Replaying session gateway.
#[derive(Debug)]
pub struct ScriptedGateway {
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
    refused: Mutex<Option<(Service, String)>>,
    send_failure: Mutex<Option<String>>,
    opened: Mutex<Vec<Service>>,
    requests: Mutex<Vec<(CorrelationToken, RequestContext)>>,
    subscribed: Mutex<Vec<SubscriptionEntry>>,
    unsubscribed: Mutex<Vec<SubscriptionEntry>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// Create an open gateway with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            refused: Mutex::new(None),
            send_failure: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
        }
    }

    /// Create a gateway preloaded with events, closed after the last one.
    #[must_use]
    pub fn replaying(events: impl IntoIterator<Item = Event>) -> Self {
        let gateway = Self::new();
        for event in events {
            gateway.push_event(event);
        }
        gateway.close();
        gateway
    }

    /// Refuse authorization when `service` is opened.
    #[must_use]
    pub fn refusing(self, service: Service, message: impl Into<String>) -> Self {
        *self.refused.lock() = Some((service, message.into()));
        self
    }

    /// Reject every request and subscription submission.
    #[must_use]
    pub fn failing_sends(self, message: impl Into<String>) -> Self {
        *self.send_failure.lock() = Some(message.into());
        self
    }

    /// Queue an event. Returns `false` once the gateway is closed.
    pub fn push_event(&self, event: Event) -> bool {
        self.tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Stop accepting events. Queued events are still delivered and
    /// submissions are still accepted.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Whether [`ScriptedGateway::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Services opened, in call order.
    #[must_use]
    pub fn opened(&self) -> Vec<Service> {
        self.opened.lock().clone()
    }

    /// Requests submitted, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<(CorrelationToken, RequestContext)> {
        self.requests.lock().clone()
    }

    /// Entries subscribed, in call order.
    #[must_use]
    pub fn subscribed(&self) -> Vec<SubscriptionEntry> {
        self.subscribed.lock().clone()
    }

    /// Entries unsubscribed, in call order.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<SubscriptionEntry> {
        self.unsubscribed.lock().clone()
    }

    fn check_send(&self) -> Result<(), GatewayError> {
        match self.send_failure.lock().as_ref() {
            Some(message) => Err(GatewayError::Send {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SessionGateway for ScriptedGateway {
    async fn open(&self, service: Service) -> Result<(), GatewayError> {
        if let Some((refused, message)) = self.refused.lock().as_ref()
            && *refused == service
        {
            tracing::warn!(service = %service, message = %message, "Authorization refused");
            return Err(GatewayError::AuthorizationFailed {
                service,
                message: message.clone(),
            });
        }

        tracing::debug!(service = %service, "Service opened");
        self.opened.lock().push(service);
        Ok(())
    }

    async fn send_request(
        &self,
        token: CorrelationToken,
        request: &RequestContext,
    ) -> Result<(), GatewayError> {
        self.check_send()?;
        tracing::trace!(token = %token, body = ?request.to_element(), "Request recorded");
        self.requests.lock().push((token, request.clone()));
        Ok(())
    }

    async fn subscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), GatewayError> {
        self.check_send()?;
        for entry in entries {
            tracing::trace!(
                token = %entry.correlation_token,
                security = %entry.security,
                options = %entry.options(),
                "Subscription recorded"
            );
        }
        self.subscribed.lock().extend_from_slice(entries);
        Ok(())
    }

    async fn unsubscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), GatewayError> {
        self.unsubscribed.lock().extend_from_slice(entries);
        Ok(())
    }

    async fn next_event(&self) -> Result<Event, GatewayError> {
        self.rx.lock().await.recv().await.ok_or(GatewayError::Closed)
    }
}

// =============================================================================
// Tests
// =============================================================================
