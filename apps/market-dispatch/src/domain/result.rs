//! Completed Result Sets
//!
//! - [`ResultTable`]: reference results, one cell per (security, field).
//! - [`ResultSeries`]: historical results, one date-indexed
//!   [`SecuritySeries`] per security.
//!
//! Both are owned by the aggregator while a request is draining and handed
//! to the caller once the request completes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::request::{FieldId, Security};
use super::value::FieldValue;

static NOT_AVAILABLE: FieldValue = FieldValue::NotAvailable;

// =============================================================================
// Reference Results
// =============================================================================

/// Reference result matrix with exactly `securities x fields` cells.
///
/// Cells start unset. Each is written at most once per request cycle;
/// [`ResultTable::finalize`] turns the remaining unset cells into the
/// sentinel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    securities: Vec<Security>,
    fields: Vec<FieldId>,
    cells: Vec<Option<FieldValue>>,
}

impl ResultTable {
    /// Create a table with every cell unset.
    #[must_use]
    pub fn new(securities: Vec<Security>, fields: Vec<FieldId>) -> Self {
        let cells = vec![None; securities.len() * fields.len()];
        Self {
            securities,
            fields,
            cells,
        }
    }

    /// Securities, in request order.
    #[must_use]
    pub fn securities(&self) -> &[Security] {
        &self.securities
    }

    /// Fields, in request order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Number of addressable cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of cells not yet written.
    #[must_use]
    pub fn unset_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    const fn offset(&self, security: usize, field: usize) -> usize {
        security * self.fields.len() + field
    }

    /// Write a cell by index.
    ///
    /// Returns `false` (leaving the cell untouched) when it was already
    /// written or the indices are out of range.
    pub fn fill(&mut self, security: usize, field: usize, value: FieldValue) -> bool {
        if security >= self.securities.len() || field >= self.fields.len() {
            return false;
        }
        let offset = self.offset(security, field);
        match &mut self.cells[offset] {
            Some(_) => false,
            slot @ None => {
                *slot = Some(value);
                true
            }
        }
    }

    /// Whether a cell has been written.
    #[must_use]
    pub fn is_filled(&self, security: usize, field: usize) -> bool {
        security < self.securities.len()
            && field < self.fields.len()
            && self.cells[self.offset(security, field)].is_some()
    }

    /// Value at `(security, field)`.
    ///
    /// Unset cells read as the sentinel; `None` means the pair was not
    /// requested.
    #[must_use]
    pub fn get(&self, security: &str, field: &str) -> Option<&FieldValue> {
        let s = self.securities.iter().position(|x| x == security)?;
        let f = self.fields.iter().position(|x| x == field)?;
        Some(self.cells[self.offset(s, f)].as_ref().unwrap_or(&NOT_AVAILABLE))
    }

    /// The full row for a security index, in field order.
    #[must_use]
    pub fn row(&self, security: usize) -> Vec<(FieldId, FieldValue)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(f, name)| {
                let value = self.cells[self.offset(security, f)]
                    .clone()
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect()
    }

    /// Replace every unset cell with the sentinel. Returns how many were
    /// replaced.
    pub fn finalize(&mut self) -> usize {
        let mut replaced = 0;
        for cell in self.cells.iter_mut().filter(|c| c.is_none()) {
            *cell = Some(FieldValue::NotAvailable);
            replaced += 1;
        }
        replaced
    }

    /// Iterate `(security, field, value)` in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &FieldValue)> {
        self.securities.iter().enumerate().flat_map(move |(s, security)| {
            self.fields.iter().enumerate().map(move |(f, field)| {
                let value = self.cells[self.offset(s, f)]
                    .as_ref()
                    .unwrap_or(&NOT_AVAILABLE);
                (security.as_str(), field.as_str(), value)
            })
        })
    }
}

// =============================================================================
// Historical Results
// =============================================================================

/// Date-indexed table for one security, one column per requested field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecuritySeries {
    fields: Vec<FieldId>,
    rows: BTreeMap<NaiveDate, Vec<FieldValue>>,
}

impl SecuritySeries {
    /// Create an empty series with the given columns.
    #[must_use]
    pub const fn new(fields: Vec<FieldId>) -> Self {
        Self {
            fields,
            rows: BTreeMap::new(),
        }
    }

    /// Column names.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Number of distinct dates.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the series has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dates, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    /// Whether a row exists for the date.
    #[must_use]
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.rows.contains_key(&date)
    }

    /// Insert a row. `values` are in column order; missing trailing values
    /// are padded with the sentinel. Returns `false` if the date already
    /// had a row, which is kept.
    pub fn insert_row(&mut self, date: NaiveDate, mut values: Vec<FieldValue>) -> bool {
        if self.rows.contains_key(&date) {
            return false;
        }
        values.resize(self.fields.len(), FieldValue::NotAvailable);
        self.rows.insert(date, values);
        true
    }

    /// Value at `(date, field)`.
    #[must_use]
    pub fn get(&self, date: NaiveDate, field: &str) -> Option<&FieldValue> {
        let f = self.fields.iter().position(|x| x == field)?;
        self.rows.get(&date).map(|row| &row[f])
    }

    /// One column, date ordered.
    #[must_use]
    pub fn column(&self, field: &str) -> Option<Vec<(NaiveDate, FieldValue)>> {
        let f = self.fields.iter().position(|x| x == field)?;
        Some(
            self.rows
                .iter()
                .map(|(date, row)| (*date, row[f].clone()))
                .collect(),
        )
    }

    /// Rows, date ordered.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, &[FieldValue])> {
        self.rows.iter().map(|(date, row)| (*date, row.as_slice()))
    }
}

/// Historical results for every requested security, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSeries {
    series: Vec<(Security, SecuritySeries)>,
}

impl ResultSeries {
    /// Create empty series for each security.
    #[must_use]
    pub fn new(securities: &[Security], fields: &[FieldId]) -> Self {
        Self {
            series: securities
                .iter()
                .map(|s| (s.clone(), SecuritySeries::new(fields.to_vec())))
                .collect(),
        }
    }

    /// Series for a security.
    #[must_use]
    pub fn get(&self, security: &str) -> Option<&SecuritySeries> {
        self.series
            .iter()
            .find(|(s, _)| s == security)
            .map(|(_, series)| series)
    }

    /// Mutable series for a security.
    pub fn get_mut(&mut self, security: &str) -> Option<&mut SecuritySeries> {
        self.series
            .iter_mut()
            .find(|(s, _)| s == security)
            .map(|(_, series)| series)
    }

    /// Number of securities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether no securities were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Iterate `(security, series)` in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecuritySeries)> {
        self.series.iter().map(|(s, series)| (s.as_str(), series))
    }
}

/// Result of a completed one-shot request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "result", rename_all = "lowercase")]
pub enum RequestOutcome {
    /// Reference request result.
    Reference(ResultTable),
    /// Historical request result.
    Historical(ResultSeries),
}

impl RequestOutcome {
    /// The reference table, if this was a reference request.
    #[must_use]
    pub fn into_table(self) -> Option<ResultTable> {
        match self {
            Self::Reference(table) => Some(table),
            Self::Historical(_) => None,
        }
    }

    /// The historical series, if this was a historical request.
    #[must_use]
    pub fn into_series(self) -> Option<ResultSeries> {
        match self {
            Self::Historical(series) => Some(series),
            Self::Reference(_) => None,
        }
    }
}
