//! Protocol Events
//!
//! Events pulled from a session gateway. Each event carries an explicit
//! classification and zero or more messages; a message names the
//! correlation token(s) it belongs to and a body [`Element`].
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"kind": "final_response",
//!  "messages": [{"correlation_ids": [1], "body": {"securityData": []}}]}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::correlation::CorrelationToken;
use super::element::Element;

/// Classification of a protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Part of a response; more messages follow.
    PartialResponse,
    /// Last event of a response.
    FinalResponse,
    /// Streaming field update.
    SubscriptionData,
    /// Subscription lifecycle status (started, failure, terminated).
    SubscriptionStatus,
    /// Authorization status for the session.
    AuthorizationStatus,
    /// Anything else (session status, service status, admin, ...).
    #[serde(other)]
    Other,
}

impl EventKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PartialResponse => "partial_response",
            Self::FinalResponse => "final_response",
            Self::SubscriptionData => "subscription_data",
            Self::SubscriptionStatus => "subscription_status",
            Self::AuthorizationStatus => "authorization_status",
            Self::Other => "other",
        }
    }

    /// Whether this event carries response data for a one-shot request.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(self, Self::PartialResponse | Self::FinalResponse)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation tokens the message is addressed to.
    #[serde(rename = "correlation_ids", default)]
    pub correlation_tokens: Vec<CorrelationToken>,

    /// Message type name as reported by the provider (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    /// Message body.
    #[serde(default = "empty_body")]
    pub body: Element,
}

const fn empty_body() -> Element {
    Element::Map(Vec::new())
}

impl Message {
    /// Create a message addressed to one token.
    #[must_use]
    pub fn new(token: CorrelationToken, body: Element) -> Self {
        Self {
            correlation_tokens: vec![token],
            message_type: None,
            body,
        }
    }

    /// Attach a message type name.
    #[must_use]
    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Whether the body has a named child element.
    #[must_use]
    pub fn has_element(&self, name: &str) -> bool {
        self.body.has_element(name)
    }

    /// Get a named child element of the body.
    ///
    /// # Errors
    ///
    /// See [`Element::get_element`].
    pub fn get_element(&self, name: &str) -> Result<&Element, super::element::DecodeError> {
        self.body.get_element(name)
    }

    /// The first correlation token, if any.
    #[must_use]
    pub fn primary_token(&self) -> Option<CorrelationToken> {
        self.correlation_tokens.first().copied()
    }
}

/// A protocol event: a classification plus its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event classification.
    pub kind: EventKind,

    /// Messages carried by the event.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Event {
    /// Create an event.
    #[must_use]
    pub const fn new(kind: EventKind, messages: Vec<Message>) -> Self {
        Self { kind, messages }
    }

    /// Event classification.
    #[must_use]
    pub const fn classify(&self) -> EventKind {
        self.kind
    }

    /// Messages carried by the event.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_deserializes_from_script_json() {
        let event: Event = serde_json::from_str(
            r#"{"kind": "partial_response",
                "messages": [{"correlation_ids": [4], "body": {"securityData": []}}]}"#,
        )
        .unwrap();

        assert_eq!(event.classify(), EventKind::PartialResponse);
        assert_eq!(event.messages()[0].primary_token(), Some(CorrelationToken(4)));
        assert!(event.messages()[0].has_element("securityData"));
    }

    #[test]
    fn unknown_kind_maps_to_other() {
        let event: Event = serde_json::from_str(r#"{"kind": "session_status"}"#).unwrap();
        assert_eq!(event.classify(), EventKind::Other);
        assert!(event.messages().is_empty());
    }

    #[test]
    fn message_without_tokens_has_no_primary() {
        let message: Message = serde_json::from_str(r#"{"body": {}}"#).unwrap();
        assert_eq!(message.primary_token(), None);
    }

    #[test]
    fn response_kinds() {
        assert!(EventKind::PartialResponse.is_response());
        assert!(EventKind::FinalResponse.is_response());
        assert!(!EventKind::SubscriptionData.is_response());
    }
}
