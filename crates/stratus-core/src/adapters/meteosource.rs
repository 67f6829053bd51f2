use std::sync::Arc;

use serde::Deserialize;

use super::{decode_json, fetch_body, push_readings, trim_to_horizon, zero_horizon_error};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    CapabilitySet, ForecastBatch, RequestKind, SourceError, SourceFuture, WeatherSource,
};
use crate::domain::units::normalize_bearing;
use crate::http_client::{Credentials, HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, Variable};

const BASE_URL: &str = "https://www.meteosource.com/api/v1/free/point";
const MAX_FORECAST_DAYS: u16 = 7;

/// Meteosource adapter. Requires an API key, sent as the `key` query parameter.
///
/// The free point endpoint carries no observation time for `current`, so
/// those readings are stamped with the adapter clock. Daily entries are
/// stamped at midnight UTC of their day.
#[derive(Clone)]
pub struct MeteosourceAdapter {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    auth: HttpAuth,
    base_url: String,
    timeout_ms: u64,
}

impl MeteosourceAdapter {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_http_client(credentials, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(credentials: Credentials, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            clock: Arc::new(SystemClock),
            auth: HttpAuth::QueryParam {
                name: "key",
                credentials,
            },
            base_url: BASE_URL.to_owned(),
            timeout_ms: 10_000,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, section: &str, location: &Location) -> HttpRequest {
        HttpRequest::get(self.base_url.as_str())
            .with_query("lat", location.lat)
            .with_query("lon", location.lon)
            .with_query("sections", section)
            .with_query("units", "metric")
            .with_query("timezone", "UTC")
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms)
    }
}

impl WeatherSource for MeteosourceAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Meteosource
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, false, MAX_FORECAST_DAYS)
    }

    fn fetch_current<'a>(&'a self, location: &'a Location) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(async move {
            let request = self.request("current", location);
            let body = fetch_body(self.http_client.as_ref(), ProviderId::Meteosource, request).await?;
            let payload: CurrentPayload = decode_json(ProviderId::Meteosource, &body)?;
            let current = payload.current;

            let mut values = vec![
                (Variable::Temperature, current.temperature),
                (Variable::WindSpeed, current.wind.as_ref().and_then(|wind| wind.speed)),
                (
                    Variable::WindDirection,
                    current
                        .wind
                        .as_ref()
                        .and_then(|wind| wind.angle)
                        .map(normalize_bearing),
                ),
                (
                    Variable::Precipitation,
                    current.precipitation.and_then(|precipitation| precipitation.total),
                ),
                (Variable::CloudCover, current.cloud_cover),
            ];
            // Paid tiers add these; the free tier omits them entirely.
            if let Some(humidity) = current.humidity {
                values.push((Variable::Humidity, Some(humidity)));
            }
            if let Some(pressure) = current.pressure {
                values.push((Variable::Pressure, Some(pressure)));
            }

            let mut readings = Vec::with_capacity(values.len());
            push_readings(&mut readings, location, self.clock.now(), ProviderId::Meteosource, values);
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
                return Err(zero_horizon_error(ProviderId::Meteosource));
            }
            let capped = self.capabilities().clamp_horizon(horizon_days);

            let request = self.request("daily", location);
            let body = fetch_body(self.http_client.as_ref(), ProviderId::Meteosource, request).await?;
            let payload: DailyPayload = decode_json(ProviderId::Meteosource, &body)?;

            let mut readings = Vec::with_capacity(payload.daily.data.len() * 4);
            for day in payload.daily.data {
                let timestamp = UtcDateTime::parse(&format!("{}T00:00:00Z", day.day)).map_err(|error| {
                    SourceError::schema(format!("meteosource day '{}' rejected: {error}", day.day), &body)
                        .with_provider(ProviderId::Meteosource)
                })?;
                let summary = day.all_day;
                push_readings(
                    &mut readings,
                    location,
                    timestamp,
                    ProviderId::Meteosource,
                    [
                        (Variable::Temperature, summary.temperature),
                        (Variable::WindSpeed, summary.wind.as_ref().and_then(|wind| wind.speed)),
                        (
                            Variable::WindDirection,
                            summary
                                .wind
                                .as_ref()
                                .and_then(|wind| wind.angle)
                                .map(normalize_bearing),
                        ),
                        (
                            Variable::Precipitation,
                            summary.precipitation.and_then(|precipitation| precipitation.total),
                        ),
                        (
                            Variable::CloudCover,
                            summary.cloud_cover.and_then(|cloud| cloud.total),
                        ),
                    ],
                );
            }

            Ok(ForecastBatch {
                readings: trim_to_horizon(readings, capped),
                requested_horizon_days: horizon_days,
                horizon_days: capped,
            })
        })
    }

    fn fetch_historical<'a>(
        &'a self,
        _location: &'a Location,
        _start: UtcDateTime,
        _end: UtcDateTime,
    ) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(async move {
            Err(SourceError::unsupported_request(RequestKind::Historical)
                .with_provider(ProviderId::Meteosource))
        })
    }
}

#[derive(Debug, Deserialize)]
struct CurrentPayload {
    current: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    pressure: Option<f64>,
    #[serde(default)]
    wind: Option<Wind>,
    #[serde(default)]
    precipitation: Option<Precipitation>,
    #[serde(default)]
    cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: Option<f64>,
    angle: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Precipitation {
    total: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DailyPayload {
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    data: Vec<DailyEntry>,
}

#[derive(Debug, Deserialize)]
struct DailyEntry {
    day: String,
    all_day: DaySummary,
}

#[derive(Debug, Deserialize)]
struct DaySummary {
    temperature: Option<f64>,
    #[serde(default)]
    wind: Option<Wind>,
    #[serde(default)]
    precipitation: Option<Precipitation>,
    #[serde(default)]
    cloud_cover: Option<CloudCover>,
}

#[derive(Debug, Deserialize)]
struct CloudCover {
    total: Option<f64>,
}
