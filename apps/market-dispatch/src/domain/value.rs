//! Decoded Field Values
//!
//! [`FieldValue`] is what lands in result tables and notifications.
//! [`FieldValue::NotAvailable`] is the sentinel for anything absent,
//! marked `#N/A` by the provider, or undecodable.

use std::fmt;

use serde::Serialize;

use super::element::{DecodeError, Element, is_not_available_marker};

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// The "not available" sentinel.
    #[default]
    NotAvailable,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Bulk (array) value.
    List(Vec<FieldValue>),
    /// Nested structured value.
    Map(Vec<(String, FieldValue)>),
}

impl FieldValue {
    /// Decode an element of any shape.
    ///
    /// Scalars keep their type, lists and maps are decoded recursively, and
    /// null or `#N/A` markers at any depth become the sentinel.
    #[must_use]
    pub fn decode(element: &Element) -> Self {
        match element {
            Element::Null => Self::NotAvailable,
            Element::Bool(b) => Self::Bool(*b),
            Element::Int(i) => Self::Int(*i),
            Element::Float(f) if f.is_nan() => Self::NotAvailable,
            Element::Float(f) => Self::Float(*f),
            Element::Str(s) if is_not_available_marker(s) => Self::NotAvailable,
            Element::Str(s) => Self::Text(s.clone()),
            Element::List(items) => Self::List(items.iter().map(Self::decode).collect()),
            Element::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(name, child)| (name.clone(), Self::decode(child)))
                    .collect(),
            ),
        }
    }

    /// Decode an element that must be numeric.
    ///
    /// # Errors
    ///
    /// Propagates the [`DecodeError`] from [`Element::as_f64`]; callers
    /// substitute the sentinel.
    pub fn decode_float(element: &Element) -> Result<Self, DecodeError> {
        element.as_f64().map(|f| {
            if f.is_nan() {
                Self::NotAvailable
            } else {
                Self::Float(f)
            }
        })
    }

    /// Whether this is the sentinel.
    #[must_use]
    pub const fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable)
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text view of the value, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => f.write_str("N/A"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (name, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {item}")?;
                }
                f.write_str("}")
            }
        }
    }
}
