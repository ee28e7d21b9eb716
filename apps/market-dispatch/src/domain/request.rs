//! One-shot Request Types
//!
//! [`RequestContext`] describes a reference or historical query. It is
//! immutable once handed to an engine; the engine keeps it registered under
//! its correlation token until the request reaches a terminal state.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use super::element::Element;

/// A security identifier, e.g. `"AAPL US Equity"`.
pub type Security = String;

/// A field mnemonic, e.g. `"PX_LAST"`.
pub type FieldId = String;

/// Collect items in first-occurrence order, dropping repeats.
pub(crate) fn unique<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

pub(crate) fn deserialize_unique<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(deserializer).map(unique)
}

/// Query mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Current field values.
    Reference,
    /// Field time series over a date range.
    Historical,
}

impl RequestMode {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Historical => "historical",
        }
    }

    /// Request type name understood by the reference data service.
    #[must_use]
    pub const fn request_name(self) -> &'static str {
        match self {
            Self::Reference => "ReferenceDataRequest",
            Self::Historical => "HistoricalDataRequest",
        }
    }
}

/// Sampling periodicity for historical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Periodicity {
    /// One row per business day.
    #[default]
    Daily,
    /// One row per week.
    Weekly,
    /// One row per month.
    Monthly,
    /// One row per quarter.
    Quarterly,
    /// One row per half year.
    SemiAnnually,
    /// One row per year.
    Yearly,
}

impl Periodicity {
    /// Wire name of the periodicity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Quarterly => "QUARTERLY",
            Self::SemiAnnually => "SEMI_ANNUALLY",
            Self::Yearly => "YEARLY",
        }
    }
}

/// Date range of a historical query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalRange {
    /// First date (inclusive).
    pub start: NaiveDate,
    /// Last date (inclusive).
    pub end: NaiveDate,
    /// Sampling periodicity.
    #[serde(default)]
    pub periodicity: Periodicity,
    /// Whether prices are adjusted for splits.
    #[serde(default)]
    pub adjustment_split: bool,
}

/// A field override applied to a reference query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    /// Field being overridden, e.g. `"PX_BID"`.
    pub field: FieldId,
    /// Override value as text.
    pub value: String,
}

/// Description of a one-shot query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Query mode.
    pub mode: RequestMode,
    /// Securities, in request order, without repeats.
    #[serde(deserialize_with = "deserialize_unique")]
    pub securities: Vec<Security>,
    /// Fields, in request order, without repeats.
    #[serde(deserialize_with = "deserialize_unique")]
    pub fields: Vec<FieldId>,
    /// Field overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
    /// Date range (historical mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoricalRange>,
}

impl RequestContext {
    /// Create a reference query. Repeated securities and fields are
    /// dropped, keeping first occurrence order.
    #[must_use]
    pub fn reference<S, F>(
        securities: impl IntoIterator<Item = S>,
        fields: impl IntoIterator<Item = F>,
    ) -> Self
    where
        S: Into<Security>,
        F: Into<FieldId>,
    {
        Self {
            mode: RequestMode::Reference,
            securities: unique(securities.into_iter().map(Into::into)),
            fields: unique(fields.into_iter().map(Into::into)),
            overrides: Vec::new(),
            history: None,
        }
    }

    /// Create a historical query with daily periodicity.
    #[must_use]
    pub fn historical<S, F>(
        securities: impl IntoIterator<Item = S>,
        fields: impl IntoIterator<Item = F>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self
    where
        S: Into<Security>,
        F: Into<FieldId>,
    {
        Self {
            mode: RequestMode::Historical,
            securities: unique(securities.into_iter().map(Into::into)),
            fields: unique(fields.into_iter().map(Into::into)),
            overrides: Vec::new(),
            history: Some(HistoricalRange {
                start,
                end,
                periodicity: Periodicity::Daily,
                adjustment_split: false,
            }),
        }
    }

    /// Add a field override.
    #[must_use]
    pub fn with_override(mut self, field: impl Into<FieldId>, value: impl Into<String>) -> Self {
        self.overrides.push(Override {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Set the historical periodicity. No effect on reference queries.
    #[must_use]
    pub fn with_periodicity(mut self, periodicity: Periodicity) -> Self {
        if let Some(range) = self.history.as_mut() {
            range.periodicity = periodicity;
        }
        self
    }

    /// Request split-adjusted history. No effect on reference queries.
    #[must_use]
    pub fn with_adjustment_split(mut self, adjust: bool) -> Self {
        if let Some(range) = self.history.as_mut() {
            range.adjustment_split = adjust;
        }
        self
    }

    /// Index of a security in request order.
    #[must_use]
    pub fn security_index(&self, security: &str) -> Option<usize> {
        self.securities.iter().position(|s| s == security)
    }

    /// Index of a field in request order.
    #[must_use]
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// Encode the request body sent to the reference data service.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut body = vec![
            (
                "securities".to_string(),
                Element::list(self.securities.iter().cloned().map(Element::Str)),
            ),
            (
                "fields".to_string(),
                Element::list(self.fields.iter().cloned().map(Element::Str)),
            ),
        ];

        if !self.overrides.is_empty() {
            body.push((
                "overrides".to_string(),
                Element::list(self.overrides.iter().map(|o| {
                    Element::map([
                        ("fieldId", Element::str(&o.field)),
                        ("value", Element::str(&o.value)),
                    ])
                })),
            ));
        }

        if let Some(range) = &self.history {
            body.push((
                "startDate".to_string(),
                Element::Str(range.start.format("%Y%m%d").to_string()),
            ));
            body.push((
                "endDate".to_string(),
                Element::Str(range.end.format("%Y%m%d").to_string()),
            ));
            body.push((
                "periodicitySelection".to_string(),
                Element::str(range.periodicity.as_str()),
            ));
            body.push((
                "adjustmentSplit".to_string(),
                Element::str(if range.adjustment_split { "TRUE" } else { "FALSE" }),
            ));
        }

        Element::Map(body)
    }
}

/// Lifecycle of a one-shot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// No request submitted.
    #[default]
    Idle,
    /// Request forwarded to the gateway, nothing received yet.
    Sent,
    /// Partial responses are being consumed.
    Draining,
    /// Final response consumed; result handed to the caller.
    Completed,
    /// Ended on a protocol error, gateway failure or deadline.
    Failed,
}

impl RequestState {
    /// Whether the request is finished, successfully or not.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
