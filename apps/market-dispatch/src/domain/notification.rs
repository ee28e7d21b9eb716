//! Observer Notifications
//!
//! The fixed record delivered to observers on every dispatch step. A
//! per-field notification names a real field; the aggregate notification
//! for a security uses [`NotifiedField::All`] and carries the whole row or
//! series.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::correlation::CorrelationToken;
use super::request::{FieldId, Security};
use super::result::SecuritySeries;
use super::value::FieldValue;

/// Field slot of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotifiedField {
    /// A single field.
    Field(FieldId),
    /// Every field of the security (rendered as `ALL`).
    All,
}

impl Serialize for NotifiedField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl NotifiedField {
    /// Rendering of the aggregate slot.
    pub const ALL: &'static str = "ALL";

    /// Whether this is the aggregate slot.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// The field name, or `ALL`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Field(field) => field,
            Self::All => Self::ALL,
        }
    }
}

impl fmt::Display for NotifiedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NotificationData {
    /// One decoded value (reference field or live update).
    Value(FieldValue),
    /// A full security row: requested or subscribed fields in order.
    Row(Vec<(FieldId, FieldValue)>),
    /// One historical column, date ordered.
    Column(Vec<(NaiveDate, FieldValue)>),
    /// A full historical table for one security.
    Series(SecuritySeries),
}

impl NotificationData {
    /// The single value carried, if this is a value payload.
    #[must_use]
    pub const fn as_value(&self) -> Option<&FieldValue> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The row carried, if this is a row payload.
    #[must_use]
    pub fn as_row(&self) -> Option<&[(FieldId, FieldValue)]> {
        match self {
            Self::Row(row) => Some(row),
            _ => None,
        }
    }
}

/// A dispatch notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Security the notification concerns.
    pub security: Security,
    /// Field slot.
    pub field: NotifiedField,
    /// Payload.
    pub data: NotificationData,
    /// Token the source message was routed by.
    pub correlation_token: CorrelationToken,
    /// Local receipt time.
    pub local_timestamp: DateTime<Utc>,
    /// Provider event time, when the message carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_timestamp: Option<String>,
}

impl Notification {
    /// Notification for a single field.
    #[must_use]
    pub fn field(
        security: impl Into<Security>,
        field: impl Into<FieldId>,
        data: NotificationData,
        correlation_token: CorrelationToken,
        local_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            security: security.into(),
            field: NotifiedField::Field(field.into()),
            data,
            correlation_token,
            local_timestamp,
            provider_timestamp: None,
        }
    }

    /// Aggregate notification for a security.
    #[must_use]
    pub fn all(
        security: impl Into<Security>,
        data: NotificationData,
        correlation_token: CorrelationToken,
        local_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            security: security.into(),
            field: NotifiedField::All,
            data,
            correlation_token,
            local_timestamp,
            provider_timestamp: None,
        }
    }

    /// Attach the provider timestamp.
    #[must_use]
    pub fn with_provider_timestamp(mut self, provider_timestamp: Option<String>) -> Self {
        self.provider_timestamp = provider_timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn all_serializes_as_sentinel_string() {
        let notification = Notification::all(
            "IBM US Equity",
            NotificationData::Row(vec![("PX_LAST".to_string(), FieldValue::Float(1.0))]),
            CorrelationToken(3),
            DateTime::<Utc>::UNIX_EPOCH,
        );

        let value = serde_json::to_value(&notification).unwrap();

        assert_eq!(value["field"], json!("ALL"));
        assert_eq!(value["correlation_token"], json!(3));
        assert_eq!(value["data"]["type"], json!("row"));
        assert!(value.get("provider_timestamp").is_none());
    }

    #[test]
    fn field_slot_rendering() {
        assert_eq!(NotifiedField::Field("BID".to_string()).to_string(), "BID");
        assert_eq!(NotifiedField::All.to_string(), "ALL");
        assert!(NotifiedField::All.is_all());
    }
}
