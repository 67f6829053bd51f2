//! Provider adapters and the normalization helpers they share.
//!
//! Each adapter is thin mapping code: build the provider request, map the
//! provider payload into [`NormalizedReading`]s in canonical units. HTTP
//! status mapping, JSON decoding and forecast trimming live here so every
//! adapter reports failures the same way.

mod meteoblue;
mod meteosource;
mod open_meteo;
mod openweather;

use serde::de::DeserializeOwned;
use time::Duration;

pub use meteoblue::MeteoblueAdapter;
pub use meteosource::MeteosourceAdapter;
pub use open_meteo::OpenMeteoAdapter;
pub use openweather::OpenWeatherAdapter;

use crate::data_source::SourceError;
use crate::http_client::{HttpClient, HttpRequest};
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, Variable};

/// Runs a request and maps transport and status failures onto [`SourceError`].
pub(crate) async fn fetch_body(
    http_client: &dyn HttpClient,
    provider: ProviderId,
    request: HttpRequest,
) -> Result<String, SourceError> {
    let response = http_client.execute(request).await.map_err(|error| {
        SourceError::unavailable(format!("{provider} transport error: {}", error.message()))
            .with_provider(provider)
    })?;

    match response.status {
        status if (200..300).contains(&status) => Ok(response.body),
        429 => Err(SourceError::rate_limited(
            format!("{provider} rejected the request quota (status 429)"),
            response.retry_after(),
        )
        .with_provider(provider)),
        401 | 403 => Err(SourceError::unavailable(format!(
            "{provider} rejected the credentials (status {})",
            response.status
        ))
        .with_provider(provider)),
        status => Err(SourceError::unavailable(format!(
            "{provider} upstream returned status {status}"
        ))
        .with_provider(provider)),
    }
}

/// Decodes a provider body, attaching the raw body to the error on failure.
pub(crate) fn decode_json<T: DeserializeOwned>(
    provider: ProviderId,
    body: &str,
) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|error| {
        SourceError::schema(
            format!("{provider} payload does not match the expected schema: {error}"),
            body,
        )
        .with_provider(provider)
    })
}

pub(crate) fn unix_to_utc(
    provider: ProviderId,
    seconds: i64,
    body: &str,
) -> Result<UtcDateTime, SourceError> {
    UtcDateTime::from_unix_timestamp(seconds).map_err(|error| {
        SourceError::schema(format!("{provider} timestamp rejected: {error}"), body)
            .with_provider(provider)
    })
}

/// Pushes one reading per `(variable, value)` pair sharing a timestamp.
pub(crate) fn push_readings(
    out: &mut Vec<NormalizedReading>,
    location: &Location,
    timestamp: UtcDateTime,
    source: ProviderId,
    values: impl IntoIterator<Item = (Variable, Option<f64>)>,
) {
    out.extend(
        values
            .into_iter()
            .map(|(variable, value)| NormalizedReading::new(location, timestamp, variable, value, source)),
    );
}

/// One provider column: variable, values aligned with the time axis, and
/// the conversion into the canonical unit.
pub(crate) type Series = (Variable, Option<Vec<Option<f64>>>, fn(f64) -> f64);

/// Zips columnar series onto their time axis, ordered by time then variable.
/// Absent columns are skipped; a column whose length differs from the axis
/// is a schema error.
pub(crate) fn columns_to_readings(
    provider: ProviderId,
    location: &Location,
    timestamps: &[UtcDateTime],
    series: impl IntoIterator<Item = Series>,
    body: &str,
) -> Result<Vec<NormalizedReading>, SourceError> {
    let mut readings = Vec::new();
    for (variable, values, convert) in series {
        let Some(values) = values else {
            continue;
        };
        if values.len() != timestamps.len() {
            return Err(SourceError::schema(
                format!(
                    "{provider} series '{variable}' has {} values for {} timestamps",
                    values.len(),
                    timestamps.len()
                ),
                body,
            )
            .with_provider(provider));
        }

        readings.extend(timestamps.iter().zip(values).map(|(timestamp, value)| {
            NormalizedReading::new(location, *timestamp, variable, value.map(convert), provider)
        }));
    }

    readings.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.variable.cmp(&b.variable))
    });
    Ok(readings)
}

pub(crate) fn identity(value: f64) -> f64 {
    value
}

/// Drops readings that fall past `horizon_days` calendar days, counted from
/// the day of the earliest reading.
pub(crate) fn trim_to_horizon(
    mut readings: Vec<NormalizedReading>,
    horizon_days: u16,
) -> Vec<NormalizedReading> {
    let Some(first) = readings.iter().map(|reading| reading.timestamp).min() else {
        return readings;
    };
    let Some(cutoff) = first
        .start_of_day()
        .checked_add(Duration::days(i64::from(horizon_days)))
    else {
        return readings;
    };

    readings.retain(|reading| reading.timestamp < cutoff);
    readings
}

pub(crate) fn zero_horizon_error(provider: ProviderId) -> SourceError {
    SourceError::invalid_request("forecast horizon must be at least one day").with_provider(provider)
}
