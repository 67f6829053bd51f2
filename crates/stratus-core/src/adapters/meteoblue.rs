use std::sync::Arc;

use serde::Deserialize;

use super::{
    columns_to_readings, decode_json, fetch_body, identity, trim_to_horizon, unix_to_utc,
    zero_horizon_error, Series,
};
use crate::clock::{Clock, SystemClock};
use crate::data_source::{
    CapabilitySet, ForecastBatch, RequestKind, SourceError, SourceFuture, WeatherSource,
};
use crate::domain::units::normalize_bearing;
use crate::http_client::{Credentials, HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, Variable};

const BASE_URL: &str = "https://my.meteoblue.com/packages";
const MAX_FORECAST_DAYS: u16 = 16;

/// Forecast package; MeteoBlue sells hourly and daily data separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Package {
    Hourly,
    Daily,
    Extended,
}

impl Package {
    const fn for_horizon(days: u16) -> Self {
        match days {
            0..=1 => Self::Hourly,
            2..=5 => Self::Daily,
            _ => Self::Extended,
        }
    }

    const fn path(self) -> &'static str {
        match self {
            Self::Hourly => "basic-1h",
            Self::Daily => "basic-day",
            Self::Extended => "basic-16d",
        }
    }
}

/// MeteoBlue adapter. Requires an API key, sent as the `apikey` query parameter.
///
/// Responses are columnar (`data_1h` / `data_day`) with UTC unix timestamps
/// and wind already in m/s. `current` is the latest hourly slot at or before
/// the adapter clock.
#[derive(Clone)]
pub struct MeteoblueAdapter {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    auth: HttpAuth,
    base_url: String,
    timeout_ms: u64,
}

impl MeteoblueAdapter {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_http_client(credentials, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(credentials: Credentials, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            clock: Arc::new(SystemClock),
            auth: HttpAuth::QueryParam {
                name: "apikey",
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

    fn request(&self, package: Package, location: &Location) -> HttpRequest {
        HttpRequest::get(format!("{}/{}", self.base_url.trim_end_matches('/'), package.path()))
            .with_query("lat", location.lat)
            .with_query("lon", location.lon)
            .with_query("format", "json")
            .with_query("timeformat", "timestamp_utc")
            .with_query("windspeed", "ms-1")
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms)
    }

    async fn fetch_package(
        &self,
        package: Package,
        request: HttpRequest,
        location: &Location,
    ) -> Result<Vec<NormalizedReading>, SourceError> {
        let body = fetch_body(self.http_client.as_ref(), ProviderId::Meteoblue, request).await?;
        match package {
            Package::Hourly => {
                let payload: HourlyPayload = decode_json(ProviderId::Meteoblue, &body)?;
                normalize_hourly(payload.data_1h, location, &body)
            }
            Package::Daily | Package::Extended => {
                let payload: DailyPayload = decode_json(ProviderId::Meteoblue, &body)?;
                normalize_daily(payload.data_day, location, &body)
            }
        }
    }
}

impl WeatherSource for MeteoblueAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Meteoblue
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, false, MAX_FORECAST_DAYS)
    }

    fn fetch_current<'a>(&'a self, location: &'a Location) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(async move {
            let request = self
                .request(Package::Hourly, location)
                .with_query("forecast_days", 1);
            let body = fetch_body(self.http_client.as_ref(), ProviderId::Meteoblue, request).await?;
            let payload: HourlyPayload = decode_json(ProviderId::Meteoblue, &body)?;
            let mut readings = normalize_hourly(payload.data_1h, location, &body)?;

            let now = self.clock.now();
            let slot = readings
                .iter()
                .map(|reading| reading.timestamp)
                .filter(|timestamp| *timestamp <= now)
                .max()
                .or_else(|| readings.iter().map(|reading| reading.timestamp).min());
            let Some(slot) = slot else {
                return Err(SourceError::schema("meteoblue data_1h has no readings", &body)
                    .with_provider(ProviderId::Meteoblue));
            };

            readings.retain(|reading| reading.timestamp == slot);
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
                return Err(zero_horizon_error(ProviderId::Meteoblue));
            }
            let capped = self.capabilities().clamp_horizon(horizon_days);
            let package = Package::for_horizon(capped);

            let request = self
                .request(package, location)
                .with_query("forecast_days", capped);
            let readings = self.fetch_package(package, request, location).await?;

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
                .with_provider(ProviderId::Meteoblue))
        })
    }
}

#[derive(Debug, Deserialize)]
struct HourlyPayload {
    data_1h: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<i64>,
    #[serde(default)]
    temperature: Option<Vec<Option<f64>>>,
    #[serde(default)]
    relativehumidity: Option<Vec<Option<f64>>>,
    #[serde(default)]
    sealevelpressure: Option<Vec<Option<f64>>>,
    #[serde(default)]
    windspeed: Option<Vec<Option<f64>>>,
    #[serde(default)]
    winddirection: Option<Vec<Option<f64>>>,
    #[serde(default)]
    precipitation: Option<Vec<Option<f64>>>,
    #[serde(default)]
    totalcloudcover: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct DailyPayload {
    data_day: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<i64>,
    #[serde(default)]
    temperature_mean: Option<Vec<Option<f64>>>,
    #[serde(default)]
    relativehumidity_mean: Option<Vec<Option<f64>>>,
    #[serde(default)]
    sealevelpressure_mean: Option<Vec<Option<f64>>>,
    #[serde(default)]
    windspeed_mean: Option<Vec<Option<f64>>>,
    #[serde(default)]
    winddirection: Option<Vec<Option<f64>>>,
    #[serde(default)]
    precipitation: Option<Vec<Option<f64>>>,
    #[serde(default)]
    totalcloudcover_mean: Option<Vec<Option<f64>>>,
}

fn time_axis(time: &[i64], body: &str) -> Result<Vec<UtcDateTime>, SourceError> {
    time.iter()
        .map(|seconds| unix_to_utc(ProviderId::Meteoblue, *seconds, body))
        .collect()
}

fn normalize_hourly(
    block: HourlyBlock,
    location: &Location,
    body: &str,
) -> Result<Vec<NormalizedReading>, SourceError> {
    let timestamps = time_axis(&block.time, body)?;
    let series: [Series; 7] = [
        (Variable::Temperature, block.temperature, identity),
        (Variable::Humidity, block.relativehumidity, identity),
        (Variable::Pressure, block.sealevelpressure, identity),
        (Variable::WindSpeed, block.windspeed, identity),
        (Variable::WindDirection, block.winddirection, normalize_bearing),
        (Variable::Precipitation, block.precipitation, identity),
        (Variable::CloudCover, block.totalcloudcover, identity),
    ];
    columns_to_readings(ProviderId::Meteoblue, location, &timestamps, series, body)
}

fn normalize_daily(
    block: DailyBlock,
    location: &Location,
    body: &str,
) -> Result<Vec<NormalizedReading>, SourceError> {
    let timestamps = time_axis(&block.time, body)?;
    let series: [Series; 7] = [
        (Variable::Temperature, block.temperature_mean, identity),
        (Variable::Humidity, block.relativehumidity_mean, identity),
        (Variable::Pressure, block.sealevelpressure_mean, identity),
        (Variable::WindSpeed, block.windspeed_mean, identity),
        (Variable::WindDirection, block.winddirection, normalize_bearing),
        (Variable::Precipitation, block.precipitation, identity),
        (Variable::CloudCover, block.totalcloudcover_mean, identity),
    ];
    columns_to_readings(ProviderId::Meteoblue, location, &timestamps, series, body)
}
