//! Response Aggregator
//!
//! Accumulates the messages of one reference or historical response into
//! a [`ResultTable`] or [`ResultSeries`], handing a notification to the
//! caller's sink for every field applied and one `ALL` notification per
//! security block.
//!
//! # Response Shape
//!
//! ```text
//! securityData            list (reference) | map or list (historical)
//!   security              string
//!   securityError         optional, whole security failed
//!   fieldExceptions[]     optional, {fieldId, errorInfo}
//!   fieldData             map of field -> value (reference)
//!                         list of {date, field...} rows (historical)
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, trace, warn};

use crate::domain::correlation::CorrelationToken;
use crate::domain::element::Element;
use crate::domain::event::Message;
use crate::domain::notification::{Notification, NotificationData};
use crate::domain::request::{RequestContext, RequestMode};
use crate::domain::result::{RequestOutcome, ResultSeries, ResultTable};
use crate::domain::value::FieldValue;

const SECURITY_DATA: &str = "securityData";
const SECURITY: &str = "security";
const SECURITY_ERROR: &str = "securityError";
const FIELD_DATA: &str = "fieldData";
const FIELD_EXCEPTIONS: &str = "fieldExceptions";
const FIELD_ID: &str = "fieldId";
const ERROR_INFO: &str = "errorInfo";
const DATE: &str = "date";

/// Aggregation errors. Anything else is absorbed into the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    /// The response reported a security that was not requested.
    #[error("response contains unrequested security {0:?}")]
    UnrequestedSecurity(String),
}

/// Counters for one applied message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Security blocks that were applied.
    pub blocks: usize,
    /// Notifications handed to the sink.
    pub notifications: usize,
    /// Values or rows that failed to decode.
    pub decode_errors: usize,
}

#[derive(Debug)]
enum Accumulator {
    Reference(ResultTable),
    Historical(ResultSeries),
}

/// Accumulator for one in-flight request.
#[derive(Debug)]
pub struct ResponseAggregator {
    token: CorrelationToken,
    request: RequestContext,
    accumulator: Accumulator,
}

impl ResponseAggregator {
    /// Create an aggregator with every cell unset.
    #[must_use]
    pub fn new(token: CorrelationToken, request: RequestContext) -> Self {
        let accumulator = match request.mode {
            RequestMode::Reference => Accumulator::Reference(ResultTable::new(
                request.securities.clone(),
                request.fields.clone(),
            )),
            RequestMode::Historical => Accumulator::Historical(ResultSeries::new(
                &request.securities,
                &request.fields,
            )),
        };
        Self {
            token,
            request,
            accumulator,
        }
    }

    /// The request being aggregated.
    #[must_use]
    pub const fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Apply one response message.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::UnrequestedSecurity`] if a block names a
    /// security outside the request. Blocks before it stay applied.
    pub fn apply(
        &mut self,
        message: &Message,
        received_at: DateTime<Utc>,
        emit: &mut dyn FnMut(Notification),
    ) -> Result<AggregateSummary, AggregateError> {
        let mut summary = AggregateSummary::default();

        let Ok(security_data) = message.get_element(SECURITY_DATA) else {
            warn!(
                token = %self.token,
                message_type = message.message_type.as_deref().unwrap_or("unknown"),
                "Response message without securityData"
            );
            return Ok(summary);
        };

        let mut ctx = BlockContext {
            token: self.token,
            request: &self.request,
            received_at,
            emit,
            summary: &mut summary,
        };

        for block in security_data.values() {
            match &mut self.accumulator {
                Accumulator::Reference(table) => ctx.reference_block(table, block)?,
                Accumulator::Historical(series) => ctx.historical_block(series, block)?,
            }
        }

        Ok(summary)
    }

    /// Close the cycle and hand back the result. Unset reference cells
    /// become the sentinel.
    #[must_use]
    pub fn finish(self) -> RequestOutcome {
        match self.accumulator {
            Accumulator::Reference(mut table) => {
                let missing = table.finalize();
                if missing > 0 {
                    debug!(
                        token = %self.token,
                        missing,
                        "Reference cells not reported, set to not available"
                    );
                }
                RequestOutcome::Reference(table)
            }
            Accumulator::Historical(series) => RequestOutcome::Historical(series),
        }
    }
}

struct BlockContext<'a, 'e> {
    token: CorrelationToken,
    request: &'a RequestContext,
    received_at: DateTime<Utc>,
    emit: &'a mut (dyn FnMut(Notification) + 'e),
    summary: &'a mut AggregateSummary,
}

impl BlockContext<'_, '_> {
    fn send(&mut self, notification: Notification) {
        (self.emit)(notification);
        self.summary.notifications += 1;
    }

    /// Security name of a block, checked against the request.
    ///
    /// `Ok(None)` means the block is malformed and was skipped.
    fn security_of(&self, block: &Element) -> Result<Option<(usize, String)>, AggregateError> {
        let security = match block.get_element(SECURITY).and_then(Element::as_str) {
            Ok(security) => security.to_string(),
            Err(e) => {
                warn!(token = %self.token, error = %e, "Security block without a security name");
                return Ok(None);
            }
        };

        let Some(index) = self.request.security_index(&security) else {
            return Err(AggregateError::UnrequestedSecurity(security));
        };

        if let Ok(error) = block.get_element(SECURITY_ERROR) {
            warn!(
                security = %security,
                error = %describe(error),
                "Security error reported, fields left not available"
            );
            return Ok(None);
        }

        log_field_exceptions(&security, block);
        Ok(Some((index, security)))
    }

    fn reference_block(
        &mut self,
        table: &mut ResultTable,
        block: &Element,
    ) -> Result<(), AggregateError> {
        let Some((index, security)) = self.security_of(block)? else {
            return Ok(());
        };

        let field_data = match block.get_element(FIELD_DATA) {
            Ok(field_data) if field_data.num_elements() > 0 => field_data,
            Ok(_) | Err(_) => {
                warn!(security = %security, "Empty reference response");
                return Ok(());
            }
        };

        for (field, element) in field_data.elements() {
            let Some(field_index) = self.request.field_index(field) else {
                debug!(security = %security, field = %field, "Skipping unrequested field");
                continue;
            };

            let value = FieldValue::decode(element);
            if !table.fill(index, field_index, value.clone()) {
                debug!(security = %security, field = %field, "Field already reported");
                continue;
            }
            trace!(security = %security, field = %field, value = %value, "Reference field");

            self.send(Notification::field(
                security.clone(),
                field,
                NotificationData::Value(value),
                self.token,
                self.received_at,
            ));
        }

        let row = table.row(index);
        self.send(Notification::all(
            security,
            NotificationData::Row(row),
            self.token,
            self.received_at,
        ));
        self.summary.blocks += 1;
        Ok(())
    }

    fn historical_block(
        &mut self,
        series: &mut ResultSeries,
        block: &Element,
    ) -> Result<(), AggregateError> {
        let Some((_, security)) = self.security_of(block)? else {
            return Ok(());
        };

        let rows = block.get_element(FIELD_DATA).map(Element::values).unwrap_or_default();
        if rows.is_empty() {
            warn!(security = %security, "Empty historical response");
            return Ok(());
        }

        let request = self.request;
        let fields = &request.fields;
        let mut columns: Vec<Vec<(NaiveDate, FieldValue)>> = vec![Vec::new(); fields.len()];

        let Some(target) = series.get_mut(&security) else {
            return Ok(());
        };

        for row in rows {
            let date = match row.get_element(DATE).and_then(Element::as_date) {
                Ok(date) => date,
                Err(e) => {
                    warn!(security = %security, error = %e, "Skipping historical row without a usable date");
                    self.summary.decode_errors += 1;
                    continue;
                }
            };

            let mut values = Vec::with_capacity(fields.len());
            for (column, field) in columns.iter_mut().zip(fields) {
                let value = match row.get_element(field) {
                    Ok(element) => match FieldValue::decode_float(element) {
                        Ok(value) => value,
                        Err(e) if e.is_not_available() => FieldValue::NotAvailable,
                        Err(e) => {
                            warn!(
                                security = %security,
                                field = %field,
                                date = %date,
                                error = %e,
                                "Failed to decode historical value"
                            );
                            self.summary.decode_errors += 1;
                            FieldValue::NotAvailable
                        }
                    },
                    Err(_) => FieldValue::NotAvailable,
                };
                column.push((date, value.clone()));
                values.push(value);
            }

            if !target.insert_row(date, values) {
                debug!(security = %security, date = %date, "Duplicate historical date, keeping first");
            }
        }

        let snapshot = target.clone();
        for (field, column) in fields.iter().zip(columns) {
            self.send(Notification::field(
                security.clone(),
                field.clone(),
                NotificationData::Column(column),
                self.token,
                self.received_at,
            ));
        }
        self.send(Notification::all(
            security,
            NotificationData::Series(snapshot),
            self.token,
            self.received_at,
        ));
        self.summary.blocks += 1;
        Ok(())
    }
}

fn log_field_exceptions(security: &str, block: &Element) {
    let Ok(exceptions) = block.get_element(FIELD_EXCEPTIONS) else {
        return;
    };
    for exception in exceptions.values() {
        let field = exception
            .get_element(FIELD_ID)
            .and_then(Element::to_scalar_string)
            .unwrap_or_default();
        let detail = exception
            .get_element(ERROR_INFO)
            .map(describe)
            .unwrap_or_default();
        warn!(
            security = %security,
            field = %field,
            error = %detail,
            "Field exception reported, value left not available"
        );
    }
}

fn describe(error: &Element) -> String {
    error
        .get_element("message")
        .and_then(Element::to_scalar_string)
        .or_else(|_| error.to_scalar_string())
        .unwrap_or_else(|_| serde_json::Value::from(error.clone()).to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn message(body: serde_json::Value) -> Message {
        Message::new(CorrelationToken(1), Element::from(body))
    }

    fn apply(
        aggregator: &mut ResponseAggregator,
        body: serde_json::Value,
    ) -> (Result<AggregateSummary, AggregateError>, Vec<Notification>) {
        let mut out = Vec::new();
        let result = aggregator.apply(&message(body), Utc::now(), &mut |n| out.push(n));
        (result, out)
    }

    fn reference(securities: &[&str], fields: &[&str]) -> ResponseAggregator {
        ResponseAggregator::new(
            CorrelationToken(1),
            RequestContext::reference(securities.iter().copied(), fields.iter().copied()),
        )
    }

    fn historical(securities: &[&str], fields: &[&str]) -> ResponseAggregator {
        ResponseAggregator::new(
            CorrelationToken(1),
            RequestContext::historical(
                securities.iter().copied(),
                fields.iter().copied(),
                day(1),
                day(31),
            ),
        )
    }

    #[test]
    fn reference_block_emits_fields_then_all() {
        let mut aggregator = reference(&["IBM US Equity"], &["PX_LAST", "NAME"]);

        let (result, out) = apply(
            &mut aggregator,
            json!({"securityData": [{
                "security": "IBM US Equity",
                "fieldData": {"PX_LAST": 182.5, "NAME": "IBM"}
            }]}),
        );

        assert_eq!(result.unwrap().notifications, 3);
        assert_eq!(out[0].field.as_str(), "PX_LAST");
        assert_eq!(out[1].field.as_str(), "NAME");
        assert!(out[2].field.is_all());
        assert_eq!(
            out[2].data.as_row().unwrap()[1],
            ("NAME".to_string(), FieldValue::Text("IBM".to_string()))
        );
    }

    #[test]
    fn reference_not_available_marker_is_sentinel() {
        let mut aggregator = reference(&["US900123AL40 Govt"], &["YLD_YTM_BID"]);

        let (_, out) = apply(
            &mut aggregator,
            json!({"securityData": [{
                "security": "US900123AL40 Govt",
                "fieldData": {"YLD_YTM_BID": "#N/A"}
            }]}),
        );

        assert_eq!(out[0].data, NotificationData::Value(FieldValue::NotAvailable));
        let table = aggregator.finish().into_table().unwrap();
        assert_eq!(
            table.get("US900123AL40 Govt", "YLD_YTM_BID"),
            Some(&FieldValue::NotAvailable)
        );
    }

    #[test]
    fn reference_bulk_field_decodes_recursively() {
        let mut aggregator = reference(&["SPX Index"], &["INDX_MEMBERS"]);

        apply(
            &mut aggregator,
            json!({"securityData": [{
                "security": "SPX Index",
                "fieldData": {"INDX_MEMBERS": [
                    {"Member Ticker and Exchange Code": "AAPL UW"},
                    {"Member Ticker and Exchange Code": "#N/A"}
                ]}
            }]}),
        );

        let table = aggregator.finish().into_table().unwrap();
        assert_eq!(
            table.get("SPX Index", "INDX_MEMBERS"),
            Some(&FieldValue::List(vec![
                FieldValue::Map(vec![(
                    "Member Ticker and Exchange Code".to_string(),
                    FieldValue::Text("AAPL UW".to_string())
                )]),
                FieldValue::Map(vec![(
                    "Member Ticker and Exchange Code".to_string(),
                    FieldValue::NotAvailable
                )]),
            ]))
        );
    }

    #[test]
    fn empty_reference_block_emits_nothing() {
        let mut aggregator = reference(&["IBM US Equity"], &["PX_LAST"]);

        let (result, out) = apply(
            &mut aggregator,
            json!({"securityData": [{"security": "IBM US Equity", "fieldData": {}}]}),
        );

        assert_eq!(result.unwrap().blocks, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn cells_are_not_overwritten_by_later_reports() {
        let mut aggregator = reference(&["IBM US Equity"], &["PX_LAST"]);
        let block = |px: f64| {
            json!({"securityData": [{"security": "IBM US Equity", "fieldData": {"PX_LAST": px}}]})
        };

        apply(&mut aggregator, block(1.0));
        let (_, out) = apply(&mut aggregator, block(2.0));

        assert_eq!(out.len(), 1);
        let table = aggregator.finish().into_table().unwrap();
        assert_eq!(table.get("IBM US Equity", "PX_LAST"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn unrequested_security_is_rejected() {
        let mut aggregator = reference(&["IBM US Equity"], &["PX_LAST"]);

        let (result, out) = apply(
            &mut aggregator,
            json!({"securityData": [{"security": "MSFT US Equity", "fieldData": {"PX_LAST": 1.0}}]}),
        );

        assert_eq!(
            result,
            Err(AggregateError::UnrequestedSecurity("MSFT US Equity".to_string()))
        );
        assert!(out.is_empty());
    }

    #[test]
    fn security_error_leaves_sentinel() {
        let mut aggregator = reference(&["BAD Equity"], &["PX_LAST"]);

        let (_, out) = apply(
            &mut aggregator,
            json!({"securityData": [{
                "security": "BAD Equity",
                "securityError": {"message": "Unknown/Invalid security"}
            }]}),
        );

        assert!(out.is_empty());
        let table = aggregator.finish().into_table().unwrap();
        assert_eq!(table.get("BAD Equity", "PX_LAST"), Some(&FieldValue::NotAvailable));
    }

    #[test]
    fn field_exceptions_do_not_block_other_fields() {
        let mut aggregator = reference(&["IBM US Equity"], &["PX_LAST", "BOGUS"]);

        let (_, out) = apply(
            &mut aggregator,
            json!({"securityData": [{
                "security": "IBM US Equity",
                "fieldExceptions": [{"fieldId": "BOGUS", "errorInfo": {"message": "Field not valid"}}],
                "fieldData": {"PX_LAST": 10.0}
            }]}),
        );

        assert_eq!(out.len(), 2);
        let row = out[1].data.as_row().unwrap();
        assert_eq!(row[1], ("BOGUS".to_string(), FieldValue::NotAvailable));
    }

    #[test]
    fn historical_block_builds_series() {
        let mut aggregator = historical(&["SPX Index"], &["PX_LAST", "VOLUME"]);

        let (result, out) = apply(
            &mut aggregator,
            json!({"securityData": {
                "security": "SPX Index",
                "fieldData": [
                    {"date": "2024-01-02", "PX_LAST": 4742.83, "VOLUME": 3_743_050_000_i64},
                    {"date": "2024-01-03", "PX_LAST": 4704.81},
                    {"date": "2024-01-04", "PX_LAST": "#N/A History", "VOLUME": 1.0}
                ]
            }}),
        );

        assert_eq!(result.unwrap().decode_errors, 0);
        assert_eq!(out.len(), 3);
        assert!(matches!(&out[0].data, NotificationData::Column(c) if c.len() == 3));
        assert!(out[2].field.is_all());

        let series = aggregator.finish().into_series().unwrap();
        let spx = series.get("SPX Index").unwrap();
        assert_eq!(spx.row_count(), 3);
        assert_eq!(spx.get(day(3), "VOLUME"), Some(&FieldValue::NotAvailable));
        assert_eq!(spx.get(day(4), "PX_LAST"), Some(&FieldValue::NotAvailable));
        assert_eq!(spx.get(day(4), "VOLUME"), Some(&FieldValue::Float(1.0)));
    }

    #[test]
    fn historical_partials_merge_per_security() {
        let mut aggregator = historical(&["SPX Index", "SX5E Index"], &["PX_LAST"]);

        apply(
            &mut aggregator,
            json!({"securityData": {"security": "SPX Index", "fieldData": [
                {"date": "2024-01-02", "PX_LAST": 1.0}
            ]}}),
        );
        apply(
            &mut aggregator,
            json!({"securityData": {"security": "SX5E Index", "fieldData": [
                {"date": "2024-01-02", "PX_LAST": 2.0}
            ]}}),
        );
        apply(
            &mut aggregator,
            json!({"securityData": {"security": "SPX Index", "fieldData": [
                {"date": "2024-01-02", "PX_LAST": 9.0},
                {"date": "2024-01-03", "PX_LAST": 3.0}
            ]}}),
        );

        let series = aggregator.finish().into_series().unwrap();
        let spx = series.get("SPX Index").unwrap();
        assert_eq!(spx.row_count(), 2);
        assert_eq!(spx.get(day(2), "PX_LAST"), Some(&FieldValue::Float(1.0)));
        assert_eq!(series.get("SX5E Index").unwrap().row_count(), 1);
    }

    #[test]
    fn historical_row_without_date_is_skipped() {
        let mut aggregator = historical(&["SPX Index"], &["PX_LAST"]);

        let (result, _) = apply(
            &mut aggregator,
            json!({"securityData": {"security": "SPX Index", "fieldData": [
                {"PX_LAST": 1.0},
                {"date": "2024-01-05", "PX_LAST": 2.0}
            ]}}),
        );

        assert_eq!(result.unwrap().decode_errors, 1);
        let series = aggregator.finish().into_series().unwrap();
        assert_eq!(series.get("SPX Index").unwrap().row_count(), 1);
    }

    #[test_case("2024-01-05T00:00:00+00:00" ; "zoned")]
    #[test_case("2024-01-05T00:00:00.000" ; "unzoned")]
    #[test_case("2024-01-05" ; "iso date")]
    #[test_case("20240105" ; "compact date")]
    fn historical_date_formats(raw: &str) {
        let mut aggregator = historical(&["SPX Index"], &["PX_LAST"]);

        apply(
            &mut aggregator,
            json!({"securityData": {"security": "SPX Index", "fieldData": [
                {"date": raw, "PX_LAST": 1.0}
            ]}}),
        );

        let series = aggregator.finish().into_series().unwrap();
        assert!(series.get("SPX Index").unwrap().contains_date(day(5)));
    }

    #[test]
    fn missing_security_data_is_tolerated() {
        let mut aggregator = reference(&["IBM US Equity"], &["PX_LAST"]);

        let (result, out) = apply(&mut aggregator, json!({"responseError": {"message": "x"}}));

        assert_eq!(result, Ok(AggregateSummary::default()));
        assert!(out.is_empty());
    }
}
