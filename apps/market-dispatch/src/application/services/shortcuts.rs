//! One-call Queries
//!
//! Convenience wrappers over [`RequestEngine`] for the common single-shot
//! cases: one reference value, a historical table, and an OHLC table.

use std::sync::Arc;

use chrono::NaiveDate;

use super::request_engine::{RequestEngine, RequestError};
use crate::application::ports::SessionGateway;
use crate::domain::request::{FieldId, Periodicity, RequestContext, Security};
use crate::domain::result::{ResultSeries, SecuritySeries};
use crate::domain::value::FieldValue;

/// Fields of an OHLC table, in column order.
pub const OHLC_FIELDS: [&str; 4] = ["PX_OPEN", "PX_HIGH", "PX_LOW", "PX_LAST"];

/// Fetch one reference value, optionally with a single field override.
///
/// Values the provider marks as not available come back as
/// [`FieldValue::NotAvailable`].
///
/// # Errors
///
/// Propagates [`RequestError`] from the engine.
pub async fn fetch_reference_value<G: SessionGateway>(
    gateway: Arc<G>,
    security: impl Into<Security>,
    field: impl Into<FieldId>,
    field_override: Option<(&str, &str)>,
) -> Result<FieldValue, RequestError> {
    let security = security.into();
    let field = field.into();

    let mut request = RequestContext::reference([security.clone()], [field.clone()]);
    if let Some((override_field, value)) = field_override {
        request = request.with_override(override_field, value);
    }

    let outcome = RequestEngine::new(gateway).execute(request).await?;

    Ok(outcome
        .into_table()
        .and_then(|table| table.get(&security, &field).cloned())
        .unwrap_or_default())
}

/// Fetch a historical table for several securities.
///
/// # Errors
///
/// Propagates [`RequestError`] from the engine.
pub async fn fetch_history<G, S, F>(
    gateway: Arc<G>,
    securities: impl IntoIterator<Item = S>,
    fields: impl IntoIterator<Item = F>,
    start: NaiveDate,
    end: NaiveDate,
    periodicity: Periodicity,
) -> Result<ResultSeries, RequestError>
where
    G: SessionGateway,
    S: Into<Security>,
    F: Into<FieldId>,
{
    let request =
        RequestContext::historical(securities, fields, start, end).with_periodicity(periodicity);
    let outcome = RequestEngine::new(gateway).execute(request).await?;
    Ok(outcome
        .into_series()
        .unwrap_or_else(|| ResultSeries::new(&[], &[])))
}

/// Fetch open, high, low and last prices for one security.
///
/// # Errors
///
/// Propagates [`RequestError`] from the engine.
pub async fn fetch_ohlc<G: SessionGateway>(
    gateway: Arc<G>,
    security: impl Into<Security>,
    start: NaiveDate,
    end: NaiveDate,
    periodicity: Periodicity,
) -> Result<SecuritySeries, RequestError> {
    let security = security.into();
    let series = fetch_history(
        gateway,
        [security.clone()],
        OHLC_FIELDS,
        start,
        end,
        periodicity,
    )
    .await?;

    Ok(series
        .get(&security)
        .cloned()
        .unwrap_or_else(|| SecuritySeries::new(OHLC_FIELDS.map(String::from).to_vec())))
}
