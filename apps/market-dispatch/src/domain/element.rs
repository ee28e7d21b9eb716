//! Protocol Element Shape
//!
//! The tagged data shape every gateway message body is expressed in.
//! Decoding is an explicit walk over this shape: a scalar, an ordered list
//! of elements, or an ordered map of named child elements.
//!
//! # Wire Format (JSON)
//!
//! Elements convert losslessly from JSON values. Object key order is kept,
//! so field order reported by the provider survives into notifications.
//!
//! ```json
//! {"securityData": [{"security": "IBM US Equity", "fieldData": {"PX_LAST": 181.2}}]}
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Prefix the provider uses for "value not available" markers
/// (`#N/A`, `#N/A History`, `#N/A Field Not Applicable`, ...).
pub const NOT_AVAILABLE_MARKER: &str = "#N/A";

/// Errors raised while reading a typed value out of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A named child element is absent.
    #[error("missing element: {0}")]
    MissingElement(String),

    /// The element is not of the expected shape.
    #[error("expected {expected}, found {found}")]
    WrongType {
        /// Shape that was asked for.
        expected: &'static str,
        /// Shape that was present.
        found: &'static str,
    },

    /// The provider marked the value as not available.
    #[error("value not available: {0}")]
    NotAvailable(String),

    /// A date or timestamp could not be parsed.
    #[error("invalid date: {0}")]
    InvalidDate(String),
}

impl DecodeError {
    /// Whether the provider explicitly reported the value as not available.
    ///
    /// These are expected (holidays, non-applicable fields) and are logged
    /// at a lower level than genuine shape errors.
    #[must_use]
    pub const fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable(_))
    }
}

/// A node in a protocol message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Element {
    /// Explicit null.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar (also carries dates and provider markers).
    Str(String),
    /// Ordered sequence of values.
    List(Vec<Element>),
    /// Ordered named children.
    Map(Vec<(String, Element)>),
}

impl Element {
    /// Build a map element from `(name, element)` pairs.
    #[must_use]
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list element.
    #[must_use]
    pub fn list(values: impl IntoIterator<Item = Self>) -> Self {
        Self::List(values.into_iter().collect())
    }

    /// Build a string element.
    #[must_use]
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Name of this element's shape, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Whether this element is a scalar (not a list or map).
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Whether this map element has a child with the given name.
    #[must_use]
    pub fn has_element(&self, name: &str) -> bool {
        match self {
            Self::Map(entries) => entries.iter().any(|(k, _)| k == name),
            _ => false,
        }
    }

    /// Get a named child of a map element.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongType`] if this is not a map, or
    /// [`DecodeError::MissingElement`] if the child is absent.
    pub fn get_element(&self, name: &str) -> Result<&Self, DecodeError> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| DecodeError::MissingElement(name.to_string())),
            other => Err(DecodeError::WrongType {
                expected: "map",
                found: other.kind(),
            }),
        }
    }

    /// Iterate the named children of a map element.
    ///
    /// Non-map elements yield nothing.
    pub fn elements(&self) -> impl Iterator<Item = (&str, &Self)> {
        let entries: &[(String, Self)] = match self {
            Self::Map(entries) => entries,
            _ => &[],
        };
        entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of named children (0 for non-maps).
    #[must_use]
    pub fn num_elements(&self) -> usize {
        match self {
            Self::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    /// The values held by this element.
    ///
    /// A list yields its items; any other non-null element yields itself,
    /// so a single block and a one-element array are read the same way.
    #[must_use]
    pub fn values(&self) -> &[Self] {
        match self {
            Self::List(items) => items,
            Self::Null => &[],
            other => std::slice::from_ref(other),
        }
    }

    /// Read the element as a string slice.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongType`] for anything but a string.
    pub fn as_str(&self) -> Result<&str, DecodeError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(DecodeError::WrongType {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    /// Read any scalar as its string rendering.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongType`] for null, list and map elements.
    pub fn to_scalar_string(&self) -> Result<String, DecodeError> {
        match self {
            Self::Str(s) => Ok(s.clone()),
            Self::Bool(b) => Ok(b.to_string()),
            Self::Int(i) => Ok(i.to_string()),
            Self::Float(f) => Ok(f.to_string()),
            other => Err(DecodeError::WrongType {
                expected: "scalar",
                found: other.kind(),
            }),
        }
    }

    /// Read the element as a float.
    ///
    /// Integers widen; numeric strings are parsed.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::NotAvailable`] for provider `#N/A` markers and
    /// [`DecodeError::WrongType`] for anything non-numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Result<f64, DecodeError> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(i) => Ok(*i as f64),
            Self::Str(s) if is_not_available_marker(s) => Err(DecodeError::NotAvailable(s.clone())),
            Self::Str(s) => s.trim().parse().map_err(|_| DecodeError::WrongType {
                expected: "float",
                found: "string",
            }),
            other => Err(DecodeError::WrongType {
                expected: "float",
                found: other.kind(),
            }),
        }
    }

    /// Read the element as a calendar date.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidDate`] if the string matches no
    /// supported format, or [`DecodeError::WrongType`] for non-strings.
    pub fn as_date(&self) -> Result<NaiveDate, DecodeError> {
        parse_date(self.as_str()?)
    }
}

/// Whether a provider string is a "not available" marker.
#[must_use]
pub fn is_not_available_marker(value: &str) -> bool {
    value.trim_start().starts_with(NOT_AVAILABLE_MARKER)
}

/// Parse a provider date.
///
/// Zoned timestamps are tried first, then unzoned timestamps, then plain
/// dates in ISO and compact form. A zoned timestamp keeps the calendar date
/// of its own offset.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidDate`] if no format matches.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DecodeError> {
    let s = raw.trim();

    if let Ok(zoned) = DateTime::parse_from_rfc3339(s) {
        return Ok(zoned.date_naive());
    }
    if let Ok(zoned) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(zoned.date_naive());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.date());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.date());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|_| DecodeError::InvalidDate(raw.to_string()))
}

// =============================================================================
// JSON Conversion
// =============================================================================

impl From<serde_json::Value> for Element {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<Element> for serde_json::Value {
    fn from(element: Element) -> Self {
        match element {
            Element::Null => Self::Null,
            Element::Bool(b) => Self::Bool(b),
            Element::Int(i) => Self::from(i),
            Element::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
            Element::Str(s) => Self::String(s),
            Element::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Element::Map(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
