//! Dispatch Statistics
//!
//! In-process counters kept by each engine and mirrored to the metrics
//! facade. Callers and tests read them through [`DispatchStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::event::EventKind;
use crate::infrastructure::metrics::{self, EngineKind};

/// Counters for one engine.
#[derive(Debug)]
pub struct DispatchStats {
    engine: EngineKind,
    events_pulled: AtomicU64,
    messages_routed: AtomicU64,
    unknown_tokens: AtomicU64,
    decode_errors: AtomicU64,
    notifications: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    /// Events pulled from the gateway.
    pub events_pulled: u64,
    /// Messages routed to a registered token.
    pub messages_routed: u64,
    /// Messages dropped for an unknown token.
    pub unknown_tokens: u64,
    /// Field values that failed to decode.
    pub decode_errors: u64,
    /// Notifications handed to the observer hub.
    pub notifications: u64,
}

impl DispatchStats {
    /// Create zeroed counters for an engine.
    #[must_use]
    pub const fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            events_pulled: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            unknown_tokens: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
        }
    }

    /// Record an event pulled from the gateway.
    pub fn record_event(&self, kind: EventKind) {
        self.events_pulled.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_received(kind);
    }

    /// Record messages routed to a registered token.
    pub fn record_routed(&self, count: u64) {
        self.messages_routed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a message dropped for an unknown token.
    pub fn record_unknown_token(&self) {
        self.unknown_tokens.fetch_add(1, Ordering::Relaxed);
        metrics::record_unknown_token(self.engine);
    }

    /// Record field decode errors.
    pub fn record_decode_errors(&self, mode: &'static str, count: u64) {
        if count == 0 {
            return;
        }
        self.decode_errors.fetch_add(count, Ordering::Relaxed);
        metrics::record_decode_errors(mode, count);
    }

    /// Record notifications delivered.
    pub fn record_notifications(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.notifications.fetch_add(count, Ordering::Relaxed);
        metrics::record_notifications(count);
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events_pulled: self.events_pulled.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            unknown_tokens: self.unknown_tokens.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}
