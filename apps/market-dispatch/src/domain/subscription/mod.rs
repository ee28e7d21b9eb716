//! Live Subscription Types
//!
//! Domain types for streaming subscriptions: the entry describing one
//! subscribed security, the live field table it feeds, and the incremental
//! update step that turns a subscription data message into table writes and
//! notifications.
//!
//! # Design
//!
//! The subscription table tracks:
//! - One row per correlation token, holding the subscribed fields in order
//! - The latest value of every field, overwritten in place
//! - Local and provider timestamps of the last write
//!
//! Rows survive an unsubscribe and are replaced wholesale by the next
//! subscribe, so a resubscribed security never reads stale values. The table never
//! talks to observers directly; [`SubscriptionTable::apply`] hands each
//! notification to a caller-supplied sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::correlation::{CorrelationRegistry, CorrelationToken};
use super::element::Element;
use super::event::Message;
use super::notification::{Notification, NotificationData};
use super::request::{FieldId, Security, deserialize_unique, unique};
use super::value::FieldValue;

/// Element carrying the provider's event time on subscription messages.
pub const EVENT_TIME: &str = "EVENT_TIME";

// =============================================================================
// Types
// =============================================================================

/// One subscribed security.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Token the provider tags updates for this security with.
    #[serde(rename = "correlation_id")]
    pub correlation_token: CorrelationToken,
    /// Subscribed security.
    pub security: Security,
    /// Subscribed fields, ordered and free of duplicates.
    #[serde(deserialize_with = "deserialize_unique")]
    pub fields: Vec<FieldId>,
    /// Minimum seconds between updates (0 = every tick).
    #[serde(default)]
    pub interval_seconds: f64,
}

impl SubscriptionEntry {
    /// Create an entry. Duplicate fields are dropped, keeping first
    /// occurrence order.
    #[must_use]
    pub fn new<F: Into<FieldId>>(
        correlation_token: CorrelationToken,
        security: impl Into<Security>,
        fields: impl IntoIterator<Item = F>,
    ) -> Self {
        Self {
            correlation_token,
            security: security.into(),
            fields: unique(fields.into_iter().map(Into::into)),
            interval_seconds: 0.0,
        }
    }

    /// Set the update interval.
    #[must_use]
    pub const fn with_interval(mut self, interval_seconds: f64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    /// Subscription options string passed to the market data service.
    #[must_use]
    pub fn options(&self) -> String {
        format!("interval={}", self.interval_seconds)
    }
}

/// Lifecycle of a subscription engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// No active subscription.
    #[default]
    Unsubscribed,
    /// Subscribe issued, waiting for the stream loop to start.
    Subscribing,
    /// Updates are being applied.
    Streaming,
    /// Teardown in progress.
    Unsubscribing,
}

impl SubscriptionState {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Unsubscribing => "unsubscribing",
        }
    }
}

// =============================================================================
// Live Field Table
// =============================================================================

/// The latest value of one subscribed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveCell {
    /// Decoded value (sentinel after a decode error).
    pub value: FieldValue,
    /// When the update was received locally.
    pub local_timestamp: DateTime<Utc>,
    /// Provider event time of the update, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_timestamp: Option<String>,
}

/// Fields of one subscribed security.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveRow {
    /// Token the row is fed by.
    pub correlation_token: CorrelationToken,
    /// Subscribed security.
    pub security: Security,
    fields: Vec<FieldId>,
    cells: Vec<Option<LiveCell>>,
}

impl LiveRow {
    fn new(entry: &SubscriptionEntry) -> Self {
        Self {
            correlation_token: entry.correlation_token,
            security: entry.security.clone(),
            fields: entry.fields.clone(),
            cells: vec![None; entry.fields.len()],
        }
    }

    /// Subscribed fields, in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Cell for a field, if it has received an update.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&LiveCell> {
        let index = self.fields.iter().position(|f| f == field)?;
        self.cells[index].as_ref()
    }

    /// Current values in field order; fields without updates read as the
    /// sentinel.
    #[must_use]
    pub fn values(&self) -> Vec<(FieldId, FieldValue)> {
        self.fields
            .iter()
            .zip(&self.cells)
            .map(|(field, cell)| {
                let value = cell.as_ref().map(|c| c.value.clone()).unwrap_or_default();
                (field.clone(), value)
            })
            .collect()
    }

    /// Number of fields that have received at least one update.
    #[must_use]
    pub fn updated_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

/// Live (security, field) matrix. Cells are overwritten in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveFieldTable {
    rows: Vec<LiveRow>,
}

impl LiveFieldTable {
    /// Row for a security.
    #[must_use]
    pub fn row(&self, security: &str) -> Option<&LiveRow> {
        self.rows.iter().find(|r| r.security == security)
    }

    /// Row fed by a token.
    #[must_use]
    pub fn row_for_token(&self, token: CorrelationToken) -> Option<&LiveRow> {
        self.rows.iter().find(|r| r.correlation_token == token)
    }

    /// Latest cell for `(security, field)`.
    #[must_use]
    pub fn get(&self, security: &str, field: &str) -> Option<&LiveCell> {
        self.row(security)?.get(field)
    }

    /// Latest value for `(security, field)`, or `None` if nothing has
    /// arrived yet.
    #[must_use]
    pub fn value(&self, security: &str, field: &str) -> Option<&FieldValue> {
        self.get(security, field).map(|c| &c.value)
    }

    /// Rows, in subscription order.
    #[must_use]
    pub fn rows(&self) -> &[LiveRow] {
        &self.rows
    }

    /// Number of subscribed securities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row_mut(&mut self, token: CorrelationToken) -> Option<&mut LiveRow> {
        self.rows.iter_mut().find(|r| r.correlation_token == token)
    }
}

// =============================================================================
// Subscription Table
// =============================================================================

/// Counters for one applied message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Tokens that resolved to a subscription.
    pub routed: usize,
    /// Tokens with no registered subscription.
    pub unknown: Vec<CorrelationToken>,
    /// Field values that failed to decode.
    pub decode_errors: usize,
    /// Notifications handed to the sink.
    pub notifications: usize,
}

/// Applies subscription data messages to a [`LiveFieldTable`].
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    table: LiveFieldTable,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh row for an entry. Any previous values for the
    /// same token are discarded.
    pub fn reset(&mut self, entry: &SubscriptionEntry) {
        let row = LiveRow::new(entry);
        match self.table.row_mut(entry.correlation_token) {
            Some(existing) => *existing = row,
            None => self.table.rows.push(row),
        }
    }

    /// Replace every row with fresh rows for `entries`, in entry order.
    pub fn restart(&mut self, entries: &[SubscriptionEntry]) {
        self.table.rows = entries.iter().map(LiveRow::new).collect();
    }

    /// Read-only view of the live values.
    #[must_use]
    pub const fn table(&self) -> &LiveFieldTable {
        &self.table
    }

    /// Owned copy of the live values.
    #[must_use]
    pub fn snapshot(&self) -> LiveFieldTable {
        self.table.clone()
    }

    /// Apply one subscription data message.
    ///
    /// For every token on the message that resolves through `registry`,
    /// each subscribed field present in the body is decoded as a float,
    /// written to the live table and emitted as a per-field notification.
    /// One `ALL` notification with the full row always follows, even when
    /// no subscribed field was present. Decode errors write the sentinel
    /// for that field only.
    pub fn apply(
        &mut self,
        registry: &CorrelationRegistry<SubscriptionEntry>,
        message: &Message,
        received_at: DateTime<Utc>,
        emit: &mut dyn FnMut(Notification),
    ) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        let provider_timestamp = provider_timestamp(&message.body);

        for &token in &message.correlation_tokens {
            let Ok(entry) = registry.resolve(token) else {
                summary.unknown.push(token);
                continue;
            };
            summary.routed += 1;

            if self.table.row_for_token(token).is_none() {
                self.reset(entry);
            }
            let Some(row) = self.table.row_mut(token) else {
                continue;
            };

            for (index, field) in entry.fields.iter().enumerate() {
                let Ok(element) = message.body.get_element(field) else {
                    continue;
                };

                let value = match FieldValue::decode_float(element) {
                    Ok(value) => value,
                    Err(e) if e.is_not_available() => FieldValue::NotAvailable,
                    Err(e) => {
                        warn!(
                            security = %entry.security,
                            field = %field,
                            error = %e,
                            "Failed to decode subscription field"
                        );
                        summary.decode_errors += 1;
                        FieldValue::NotAvailable
                    }
                };

                if let Some(slot) = row.cells.get_mut(index) {
                    *slot = Some(LiveCell {
                        value: value.clone(),
                        local_timestamp: received_at,
                        provider_timestamp: provider_timestamp.clone(),
                    });
                }

                emit(
                    Notification::field(
                        entry.security.clone(),
                        field.clone(),
                        NotificationData::Value(value),
                        token,
                        received_at,
                    )
                    .with_provider_timestamp(provider_timestamp.clone()),
                );
                summary.notifications += 1;
            }

            emit(
                Notification::all(
                    entry.security.clone(),
                    NotificationData::Row(row.values()),
                    token,
                    received_at,
                )
                .with_provider_timestamp(provider_timestamp.clone()),
            );
            summary.notifications += 1;

            debug!(
                security = %entry.security,
                token = %token,
                "Applied subscription update"
            );
        }

        summary
    }
}

fn provider_timestamp(body: &Element) -> Option<String> {
    body.get_element(EVENT_TIME)
        .ok()
        .and_then(|e| e.to_scalar_string().ok())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(entries: &[SubscriptionEntry]) -> CorrelationRegistry<SubscriptionEntry> {
        let mut registry = CorrelationRegistry::new();
        for entry in entries {
            registry
                .register(entry.correlation_token, entry.clone())
                .unwrap();
        }
        registry
    }

    fn entries() -> Vec<SubscriptionEntry> {
        vec![
            SubscriptionEntry::new(CorrelationToken(1), "ESM5 Index", ["BID", "ASK"]),
            SubscriptionEntry::new(CorrelationToken(2), "VGM5 Index", ["BID", "ASK"]),
        ]
    }

    fn table_for(entries: &[SubscriptionEntry]) -> SubscriptionTable {
        let mut table = SubscriptionTable::new();
        for entry in entries {
            table.reset(entry);
        }
        table
    }

    fn apply(
        table: &mut SubscriptionTable,
        registry: &CorrelationRegistry<SubscriptionEntry>,
        message: &Message,
    ) -> (UpdateSummary, Vec<Notification>) {
        let mut out = Vec::new();
        let summary = table.apply(registry, message, Utc::now(), &mut |n| out.push(n));
        (summary, out)
    }

    #[test]
    fn entry_deduplicates_fields() {
        let entry = SubscriptionEntry::new(CorrelationToken(1), "X", ["BID", "ASK", "BID"]);
        assert_eq!(entry.fields, vec!["BID".to_string(), "ASK".to_string()]);
    }

    #[test]
    fn options_render_interval() {
        let entry = SubscriptionEntry::new(CorrelationToken(1), "X", ["BID"]);
        assert_eq!(entry.options(), "interval=0");
        assert_eq!(entry.with_interval(1.5).options(), "interval=1.5");
    }

    #[test]
    fn single_field_update_emits_field_then_all() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(1),
            Element::map([("BID", Element::Float(101.5))]),
        );

        let (summary, out) = apply(&mut table, &registry, &message);

        assert_eq!(summary.routed, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].field.as_str(), "BID");
        assert_eq!(out[0].data, NotificationData::Value(FieldValue::Float(101.5)));
        assert!(out[1].field.is_all());
        assert_eq!(
            table.table().value("ESM5 Index", "BID"),
            Some(&FieldValue::Float(101.5))
        );
        assert_eq!(table.table().value("ESM5 Index", "ASK"), None);
        assert_eq!(table.table().row("VGM5 Index").unwrap().updated_count(), 0);
    }

    #[test]
    fn all_is_emitted_without_matching_fields() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(2),
            Element::map([("LAST_PRICE", Element::Float(1.0))]),
        );

        let (_, out) = apply(&mut table, &registry, &message);

        assert_eq!(out.len(), 1);
        assert!(out[0].field.is_all());
        assert_eq!(out[0].security, "VGM5 Index");
    }

    #[test]
    fn later_update_overwrites_cell() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);

        for bid in [1.0, 2.0, 3.0] {
            let message = Message::new(
                CorrelationToken(1),
                Element::map([("BID", Element::Float(bid))]),
            );
            apply(&mut table, &registry, &message);
        }

        assert_eq!(
            table.table().value("ESM5 Index", "BID"),
            Some(&FieldValue::Float(3.0))
        );
    }

    #[test]
    fn decode_error_writes_sentinel_for_that_field_only() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(1),
            Element::map([
                ("BID", Element::str("garbage")),
                ("ASK", Element::Float(2.0)),
            ]),
        );

        let (summary, out) = apply(&mut table, &registry, &message);

        assert_eq!(summary.decode_errors, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(
            table.table().value("ESM5 Index", "BID"),
            Some(&FieldValue::NotAvailable)
        );
        assert_eq!(
            table.table().value("ESM5 Index", "ASK"),
            Some(&FieldValue::Float(2.0))
        );
    }

    #[test]
    fn unknown_token_is_reported_without_notifications() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(99),
            Element::map([("BID", Element::Float(1.0))]),
        );

        let (summary, out) = apply(&mut table, &registry, &message);

        assert!(out.is_empty());
        assert_eq!(summary.unknown, vec![CorrelationToken(99)]);
        assert_eq!(table.table().row("ESM5 Index").unwrap().updated_count(), 0);
    }

    #[test]
    fn event_time_becomes_provider_timestamp() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(1),
            Element::map([
                ("BID", Element::Float(1.0)),
                (EVENT_TIME, Element::str("14:02:11.000")),
            ]),
        );

        let (_, out) = apply(&mut table, &registry, &message);

        assert_eq!(out[0].provider_timestamp.as_deref(), Some("14:02:11.000"));
        assert_eq!(
            table
                .table()
                .get("ESM5 Index", "BID")
                .unwrap()
                .provider_timestamp
                .as_deref(),
            Some("14:02:11.000")
        );
    }

    #[test]
    fn reset_clears_previous_values() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(1),
            Element::map([("BID", Element::Float(1.0))]),
        );
        apply(&mut table, &registry, &message);

        table.reset(&entries[0]);

        assert_eq!(table.table().value("ESM5 Index", "BID"), None);
        assert_eq!(table.table().len(), 2);
    }

    #[test]
    fn restart_replaces_rows_of_previous_tokens() {
        let entries = entries();
        let registry = registry(&entries);
        let mut table = table_for(&entries);
        let message = Message::new(
            CorrelationToken(1),
            Element::map([("BID", Element::Float(1.0))]),
        );
        apply(&mut table, &registry, &message);

        let renewed = SubscriptionEntry::new(CorrelationToken(3), "ESM5 Index", ["BID"]);
        table.restart(std::slice::from_ref(&renewed));

        assert_eq!(table.table().len(), 1);
        assert_eq!(table.table().value("ESM5 Index", "BID"), None);
        assert!(table.table().row_for_token(CorrelationToken(1)).is_none());
        assert!(table.table().row("VGM5 Index").is_none());
    }
}
