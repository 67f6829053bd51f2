use std::sync::Arc;

use serde::Deserialize;

use super::{
    columns_to_readings, decode_json, fetch_body, identity, push_readings, trim_to_horizon, unix_to_utc,
    zero_horizon_error, Series,
};
use crate::data_source::{CapabilitySet, ForecastBatch, SourceError, SourceFuture, TimeWindow, WeatherSource};
use crate::domain::units::{kmh_to_ms, normalize_bearing};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, Variable};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const MAX_FORECAST_DAYS: u16 = 16;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,surface_pressure,\
wind_speed_10m,wind_direction_10m,precipitation,cloud_cover";
const HOURLY_FIELDS: &str = CURRENT_FIELDS;

/// Open-Meteo adapter. Free API, no credentials.
///
/// Wind speed arrives in km/h and is converted to m/s.
#[derive(Clone)]
pub struct OpenMeteoAdapter {
    http_client: Arc<dyn HttpClient>,
    forecast_url: String,
    archive_url: String,
    timeout_ms: u64,
}

impl Default for OpenMeteoAdapter {
    fn default() -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()))
    }
}

impl OpenMeteoAdapter {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            forecast_url: FORECAST_URL.to_owned(),
            archive_url: ARCHIVE_URL.to_owned(),
            timeout_ms: 10_000,
        }
    }

    pub fn with_base_urls(mut self, forecast_url: impl Into<String>, archive_url: impl Into<String>) -> Self {
        self.forecast_url = forecast_url.into();
        self.archive_url = archive_url.into();
        self
    }

    fn base_request(&self, url: &str, location: &Location) -> HttpRequest {
        HttpRequest::get(url)
            .with_query("latitude", location.lat)
            .with_query("longitude", location.lon)
            .with_query("timeformat", "unixtime")
            .with_query("timezone", "GMT")
            .with_timeout_ms(self.timeout_ms)
    }

    async fn fetch_hourly(
        &self,
        request: HttpRequest,
        location: &Location,
    ) -> Result<Vec<NormalizedReading>, SourceError> {
        let body = fetch_body(self.http_client.as_ref(), ProviderId::OpenMeteo, request).await?;
        let payload: HourlyPayload = decode_json(ProviderId::OpenMeteo, &body)?;
        normalize_hourly(payload.hourly, location, &body)
    }
}

impl WeatherSource for OpenMeteoAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenMeteo
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, true, MAX_FORECAST_DAYS)
    }

    fn fetch_current<'a>(&'a self, location: &'a Location) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(async move {
            let request = self
                .base_request(&self.forecast_url, location)
                .with_query("current", CURRENT_FIELDS);
            let body = fetch_body(self.http_client.as_ref(), ProviderId::OpenMeteo, request).await?;
            let payload: CurrentPayload = decode_json(ProviderId::OpenMeteo, &body)?;

            let current = payload.current;
            let timestamp = unix_to_utc(ProviderId::OpenMeteo, current.time, &body)?;
            let mut readings = Vec::with_capacity(Variable::ALL.len());
            push_readings(
                &mut readings,
                location,
                timestamp,
                ProviderId::OpenMeteo,
                [
                    (Variable::Temperature, current.temperature_2m),
                    (Variable::Humidity, current.relative_humidity_2m),
                    (Variable::Pressure, current.surface_pressure),
                    (Variable::WindSpeed, current.wind_speed_10m.map(kmh_to_ms)),
                    (Variable::WindDirection, current.wind_direction_10m.map(normalize_bearing)),
                    (Variable::Precipitation, current.precipitation),
                    (Variable::CloudCover, current.cloud_cover),
                ],
            );
            Ok(readings)
        })
    }

    fn fetch_forecast<'a>(
        &'a self,
        location: &'a Location,
        horizon_days: u16,
    ) -> SourceFuture<'a, ForecastBatch> {
        Box::pin(async move {
            if horizon_days == 0 {
                return Err(zero_horizon_error(ProviderId::OpenMeteo));
            }
            let capped = self.capabilities().clamp_horizon(horizon_days);

            let request = self
                .base_request(&self.forecast_url, location)
                .with_query("hourly", HOURLY_FIELDS)
                .with_query("forecast_days", capped);
            let readings = self.fetch_hourly(request, location).await?;

            Ok(ForecastBatch {
                readings: trim_to_horizon(readings, capped),
                requested_horizon_days: horizon_days,
                horizon_days: capped,
            })
        })
    }

    fn fetch_historical<'a>(
        &'a self,
        location: &'a Location,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(async move {
            let window = TimeWindow::new(start, end).map_err(|e| e.with_provider(ProviderId::OpenMeteo))?;

            let request = self
                .base_request(&self.archive_url, location)
                .with_query("start_date", window.start.into_inner().date())
                .with_query("end_date", window.end.into_inner().date())
                .with_query("hourly", HOURLY_FIELDS);
            let mut readings = self.fetch_hourly(request, location).await?;

            // The archive answers whole days; keep the requested instants only.
            readings.retain(|reading| reading.timestamp >= window.start && reading.timestamp <= window.end);
            Ok(readings)
        })
    }
}

#[derive(Debug, Deserialize)]
struct CurrentPayload {
    current: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: i64,
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    surface_pressure: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    precipitation: Option<f64>,
    cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HourlyPayload {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<i64>,
    #[serde(default)]
    temperature_2m: Option<Vec<Option<f64>>>,
    #[serde(default)]
    relative_humidity_2m: Option<Vec<Option<f64>>>,
    #[serde(default)]
    surface_pressure: Option<Vec<Option<f64>>>,
    #[serde(default)]
    wind_speed_10m: Option<Vec<Option<f64>>>,
    #[serde(default)]
    wind_direction_10m: Option<Vec<Option<f64>>>,
    #[serde(default)]
    precipitation: Option<Vec<Option<f64>>>,
    #[serde(default)]
    cloud_cover: Option<Vec<Option<f64>>>,
}

fn normalize_hourly(
    hourly: HourlyBlock,
    location: &Location,
    body: &str,
) -> Result<Vec<NormalizedReading>, SourceError> {
    let timestamps = hourly
        .time
        .iter()
        .map(|seconds| unix_to_utc(ProviderId::OpenMeteo, *seconds, body))
        .collect::<Result<Vec<_>, _>>()?;

    let series: [Series; 7] = [
        (Variable::Temperature, hourly.temperature_2m, identity),
        (Variable::Humidity, hourly.relative_humidity_2m, identity),
        (Variable::Pressure, hourly.surface_pressure, identity),
        (Variable::WindSpeed, hourly.wind_speed_10m, kmh_to_ms),
        (Variable::WindDirection, hourly.wind_direction_10m, normalize_bearing),
        (Variable::Precipitation, hourly.precipitation, identity),
        (Variable::CloudCover, hourly.cloud_cover, identity),
    ];
    columns_to_readings(ProviderId::OpenMeteo, location, &timestamps, series, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::CannedHttpClient;

    fn location() -> Location {
        Location::new("medellin", "Medellín", 6.2442, -75.5812).expect("valid location")
    }

    #[tokio::test]
    async fn current_converts_wind_to_metres_per_second() {
        let client = Arc::new(CannedHttpClient::json(
            r#"{"current":{"time":1717243200,"interval":900,"temperature_2m":22.5,
                "relative_humidity_2m":71,"surface_pressure":848.2,"wind_speed_10m":18.0,
                "wind_direction_10m":365.0,"precipitation":0.0,"cloud_cover":null}}"#,
        ));
        let adapter = OpenMeteoAdapter::with_http_client(client.clone());

        let readings = adapter.fetch_current(&location()).await.expect("current");

        assert_eq!(readings.len(), 7);
        let wind = readings
            .iter()
            .find(|r| r.variable == Variable::WindSpeed)
            .expect("wind reading");
        assert!((wind.value.expect("value") - 5.0).abs() < 1e-9);
        let bearing = readings
            .iter()
            .find(|r| r.variable == Variable::WindDirection)
            .expect("bearing");
        assert!((bearing.value.expect("value") - 5.0).abs() < 1e-9);
        let cloud = readings
            .iter()
            .find(|r| r.variable == Variable::CloudCover)
            .expect("cloud reading");
        assert_eq!(cloud.value, None);
        assert_eq!(wind.timestamp.format_rfc3339(), "2024-06-01T12:00:00Z");

        let request = &client.recorded_requests()[0];
        assert_eq!(request.query_value("timeformat"), Some("unixtime"));
        assert!(request.query_value("current").is_some());
    }

    #[tokio::test]
    async fn forecast_requests_capped_days() {
        let client = Arc::new(CannedHttpClient::json(
            r#"{"hourly":{"time":[1717200000,1717203600],"temperature_2m":[20.1,19.8]}}"#,
        ));
        let adapter = OpenMeteoAdapter::with_http_client(client.clone());

        let batch = adapter.fetch_forecast(&location(), 30).await.expect("forecast");

        assert_eq!(batch.horizon_days, 16);
        assert_eq!(batch.requested_horizon_days, 30);
        assert!(batch.was_capped());
        assert_eq!(batch.readings.len(), 2);
        assert_eq!(
            client.recorded_requests()[0].query_value("forecast_days"),
            Some("16")
        );
    }

    #[tokio::test]
    async fn mismatched_series_is_schema_error() {
        let body = r#"{"hourly":{"time":[1717200000,1717203600],"temperature_2m":[20.1]}}"#;
        let adapter = OpenMeteoAdapter::with_http_client(Arc::new(CannedHttpClient::json(body)));

        let error = adapter
            .fetch_forecast(&location(), 1)
            .await
            .expect_err("length mismatch");
        assert_eq!(error.kind(), SourceErrorKind::ProviderSchemaError);
        assert_eq!(error.raw_payload(), Some(body));
    }

    #[tokio::test]
    async fn historical_rejects_inverted_window_without_network_call() {
        let client = Arc::new(CannedHttpClient::json("{}"));
        let adapter = OpenMeteoAdapter::with_http_client(client.clone());
        let start = UtcDateTime::parse("2024-01-10T00:00:00Z").expect("valid");
        let end = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid");

        let error = adapter
            .fetch_historical(&location(), start, end)
            .await
            .expect_err("inverted window");

        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest);
        assert!(client.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn historical_filters_to_window_and_hits_archive() {
        let client = Arc::new(CannedHttpClient::json(
            r#"{"hourly":{"time":[1704067200,1704070800,1704074400],
                "relative_humidity_2m":[80,82,85]}}"#,
        ));
        let adapter = OpenMeteoAdapter::with_http_client(client.clone());
        let start = UtcDateTime::parse("2024-01-01T01:00:00Z").expect("valid");
        let end = UtcDateTime::parse("2024-01-01T02:00:00Z").expect("valid");

        let readings = adapter
            .fetch_historical(&location(), start, end)
            .await
            .expect("historical");

        assert_eq!(readings.len(), 2);
        let request = &client.recorded_requests()[0];
        assert!(request.url.starts_with(ARCHIVE_URL));
        assert_eq!(request.query_value("start_date"), Some("2024-01-01"));
        assert_eq!(request.query_value("end_date"), Some("2024-01-01"));
    }
}
