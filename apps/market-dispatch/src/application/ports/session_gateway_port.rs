//! Session Gateway Port (Driven Port)
//!
//! Interface to the provider session: service opening, request submission,
//! subscription management and the event pull.

use std::fmt;

use async_trait::async_trait;

use crate::domain::correlation::CorrelationToken;
use crate::domain::event::Event;
use crate::domain::request::RequestContext;
use crate::domain::subscription::SubscriptionEntry;

/// Provider service an engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Reference and historical data.
    RefData,
    /// Live market data.
    MktData,
}

impl Service {
    /// Service name as understood by the provider.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RefData => "//blp/refdata",
            Self::MktData => "//blp/mktdata",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session gateway error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The session could not be authorized for the service.
    #[error("authorization failed for {service}: {message}")]
    AuthorizationFailed {
        /// Service being opened.
        service: Service,
        /// Provider detail.
        message: String,
    },

    /// The session is gone; no further events will arrive.
    #[error("session closed")]
    Closed,

    /// A request or subscription could not be submitted.
    #[error("send failed: {message}")]
    Send {
        /// Error details.
        message: String,
    },
}

/// Port for a provider session.
///
/// Methods take `&self`; implementations own their synchronization. A
/// gateway instance is driven by one engine at a time.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Open a service. Resolves once the provider has authorized (or
    /// refused) the session for it.
    async fn open(&self, service: Service) -> Result<(), GatewayError>;

    /// Submit a one-shot request tagged with `token`.
    ///
    /// The token is registered by the caller before this is called.
    async fn send_request(
        &self,
        token: CorrelationToken,
        request: &RequestContext,
    ) -> Result<(), GatewayError>;

    /// Subscribe to every entry.
    async fn subscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), GatewayError>;

    /// Cancel every entry.
    async fn unsubscribe(&self, entries: &[SubscriptionEntry]) -> Result<(), GatewayError>;

    /// Wait for the next event. Suspends until one is available.
    async fn next_event(&self) -> Result<Event, GatewayError>;
}
