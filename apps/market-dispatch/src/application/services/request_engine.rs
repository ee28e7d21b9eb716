//! Request Engine
//!
//! Drives one-shot reference and historical requests: registers a
//! correlation token, submits the request, pulls events until the final
//! response for that token arrives and returns the completed result.
//!
//! # State Machine
//!
//! ```text
//! Idle ──send──► Sent ──partial──► Draining ──final──► Completed
//!                  │                  │
//!                  └──────────────────┴──error/deadline──► Failed
//! ```
//!
//! Requests run on the caller's task; the only suspension point is the
//! gateway's event pull. Observers registered on [`RequestEngine::observers`]
//! receive notifications as each message is applied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use super::aggregator::{AggregateError, ResponseAggregator};
use super::observer_hub::ObserverHub;
use super::stats::DispatchStats;
use crate::application::ports::{GatewayError, Service, SessionGateway};
use crate::domain::correlation::{CorrelationRegistry, CorrelationToken, RegistryError};
use crate::domain::event::{Event, EventKind};
use crate::domain::request::{RequestContext, RequestState};
use crate::domain::result::RequestOutcome;
use crate::infrastructure::metrics::{self, EngineKind, RequestOutcomeLabel};

/// Configuration for the request engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestEngineConfig {
    /// Upper bound on the time from submission to the final response.
    /// `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

/// Request engine errors.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The gateway failed to open, send or deliver events.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Token registration failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The response did not match the request.
    #[error("protocol error: {0}")]
    Protocol(#[from] AggregateError),

    /// The final response did not arrive in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// One-shot request driver.
pub struct RequestEngine<G: SessionGateway> {
    gateway: Arc<G>,
    config: RequestEngineConfig,
    registry: CorrelationRegistry<RequestContext>,
    observers: ObserverHub,
    stats: Arc<DispatchStats>,
    state: RequestState,
    service_open: bool,
}

impl<G: SessionGateway> std::fmt::Debug for RequestEngine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("outstanding", &self.registry.len())
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl<G: SessionGateway> RequestEngine<G> {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new(gateway: Arc<G>) -> Self {
        Self::with_config(gateway, RequestEngineConfig::default())
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub fn with_config(gateway: Arc<G>, config: RequestEngineConfig) -> Self {
        Self {
            gateway,
            config,
            registry: CorrelationRegistry::new(),
            observers: ObserverHub::new(),
            stats: Arc::new(DispatchStats::new(EngineKind::Request)),
            state: RequestState::Idle,
            service_open: false,
        }
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

    /// State of the most recent request.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Number of tokens currently registered.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    /// Submit a request and wait for its result.
    ///
    /// The reference data service is opened on first use. The token is
    /// released on every exit path.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Gateway`] if the service cannot be opened, the
    ///   request cannot be sent or the session closes mid-response
    /// - [`RequestError::Protocol`] if the response names an unrequested
    ///   security
    /// - [`RequestError::Timeout`] if the configured deadline elapses
    pub async fn execute(&mut self, request: RequestContext) -> Result<RequestOutcome, RequestError> {
        let mode = request.mode;
        let started = Instant::now();

        let result = self.run(request).await;

        let label = match &result {
            Ok(_) => RequestOutcomeLabel::Completed,
            Err(RequestError::Timeout(_)) => RequestOutcomeLabel::TimedOut,
            Err(_) => RequestOutcomeLabel::Failed,
        };
        metrics::record_request(mode, label, started.elapsed());

        match &result {
            Ok(_) => {
                tracing::info!(
                    mode = mode.as_str(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Request completed"
                );
            }
            Err(e) => {
                tracing::warn!(mode = mode.as_str(), error = %e, "Request failed");
            }
        }

        result
    }

    async fn run(&mut self, request: RequestContext) -> Result<RequestOutcome, RequestError> {
        if !self.service_open {
            if let Err(e) = self.gateway.open(Service::RefData).await {
                self.state = RequestState::Failed;
                return Err(e.into());
            }
            self.service_open = true;
        }

        let token = self.registry.next_token();
        self.registry.register(token, request.clone())?;

        let mut aggregator = ResponseAggregator::new(token, request);

        if let Err(e) = self
            .gateway
            .send_request(token, aggregator.request())
            .await
        {
            self.registry.unregister(token);
            self.state = RequestState::Failed;
            return Err(e.into());
        }
        self.state = RequestState::Sent;
        tracing::debug!(
            token = %token,
            request = aggregator.request().mode.request_name(),
            securities = aggregator.request().securities.len(),
            fields = aggregator.request().fields.len(),
            "Request sent"
        );

        let drained = match self.config.deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.drain(token, &mut aggregator)).await {
                    Ok(result) => result,
                    Err(_) => Err(RequestError::Timeout(deadline)),
                }
            }
            None => self.drain(token, &mut aggregator).await,
        };

        self.registry.unregister(token);

        match drained {
            Ok(()) => {
                self.state = RequestState::Completed;
                Ok(aggregator.finish())
            }
            Err(e) => {
                self.state = RequestState::Failed;
                Err(e)
            }
        }
    }

    /// Pull events until the final response for `token` has been applied.
    async fn drain(
        &mut self,
        token: CorrelationToken,
        aggregator: &mut ResponseAggregator,
    ) -> Result<(), RequestError> {
        loop {
            let event = self.gateway.next_event().await?;
            self.stats.record_event(event.classify());

            match event.classify() {
                EventKind::PartialResponse => {
                    if self.apply(token, &event, aggregator)? {
                        self.state = RequestState::Draining;
                    }
                }
                EventKind::FinalResponse => {
                    if self.apply(token, &event, aggregator)? {
                        return Ok(());
                    }
                }
                other => {
                    tracing::debug!(kind = %other, "Ignoring non-response event");
                }
            }
        }
    }

    /// Route the messages of a response event. Returns whether any message
    /// belonged to `token`.
    fn apply(
        &self,
        token: CorrelationToken,
        event: &Event,
        aggregator: &mut ResponseAggregator,
    ) -> Result<bool, RequestError> {
        let mut matched = false;
        let received_at = Utc::now();

        for message in event.messages() {
            let Some(routed) = message
                .correlation_tokens
                .iter()
                .copied()
                .find(|t| self.registry.contains(*t))
            else {
                self.stats.record_unknown_token();
                tracing::warn!(
                    tokens = ?message.correlation_tokens,
                    kind = %event.classify(),
                    "Response for unknown correlation token, dropping"
                );
                continue;
            };

            if routed != token {
                tracing::debug!(token = %routed, "Response for another outstanding request");
                continue;
            }
            matched = true;
            self.stats.record_routed(1);

            let observers = &self.observers;
            let summary = aggregator.apply(message, received_at, &mut |n| observers.notify(&n))?;

            self.stats.record_notifications(summary.notifications as u64);
            self.stats
                .record_decode_errors(aggregator.request().mode.as_str(), summary.decode_errors as u64);
        }

        Ok(matched)
    }
}
