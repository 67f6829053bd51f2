use std::sync::Arc;

use serde::Deserialize;

use super::{decode_json, fetch_body, push_readings, trim_to_horizon, unix_to_utc, zero_horizon_error};
use crate::data_source::{
    CapabilitySet, ForecastBatch, RequestKind, SourceError, SourceFuture, WeatherSource,
};
use crate::domain::units::{kelvin_to_celsius, normalize_bearing};
use crate::http_client::{Credentials, HttpAuth, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, Variable};

const BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const MAX_FORECAST_DAYS: u16 = 5;
/// The free forecast endpoint returns one slot every three hours.
const SLOTS_PER_DAY: u16 = 8;

/// OpenWeather adapter. Requires an API key, sent as the `appid` query parameter.
///
/// Requests `units=standard` so temperatures arrive in Kelvin and wind in m/s.
#[derive(Clone)]
pub struct OpenWeatherAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    base_url: String,
    timeout_ms: u64,
}

impl OpenWeatherAdapter {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_http_client(credentials, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(credentials: Credentials, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::QueryParam {
                name: "appid",
                credentials,
            },
            base_url: BASE_URL.to_owned(),
            timeout_ms: 10_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, endpoint: &str, location: &Location) -> HttpRequest {
        HttpRequest::get(format!("{}/{endpoint}", self.base_url.trim_end_matches('/')))
            .with_query("lat", location.lat)
            .with_query("lon", location.lon)
            .with_query("units", "standard")
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms)
    }
}

impl WeatherSource for OpenWeatherAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, false, MAX_FORECAST_DAYS)
    }

    fn fetch_current<'a>(&'a self, location: &'a Location) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(async move {
            let request = self.request("weather", location);
            let body = fetch_body(self.http_client.as_ref(), ProviderId::OpenWeather, request).await?;
            let observation: Observation = decode_json(ProviderId::OpenWeather, &body)?;

            let mut readings = Vec::with_capacity(Variable::ALL.len());
            observation.push_into(&mut readings, location, &body)?;
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
                return Err(zero_horizon_error(ProviderId::OpenWeather));
            }
            let capped = self.capabilities().clamp_horizon(horizon_days);

            let request = self
                .request("forecast", location)
                .with_query("cnt", capped * SLOTS_PER_DAY);
            let body = fetch_body(self.http_client.as_ref(), ProviderId::OpenWeather, request).await?;
            let payload: ForecastPayload = decode_json(ProviderId::OpenWeather, &body)?;

            let mut readings = Vec::with_capacity(payload.list.len() * Variable::ALL.len());
            for slot in payload.list {
                slot.push_into(&mut readings, location, &body)?;
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
                .with_provider(ProviderId::OpenWeather))
        })
    }
}

/// Shape shared by `/weather` and each `/forecast` list entry.
#[derive(Debug, Deserialize)]
struct Observation {
    dt: i64,
    main: MainBlock,
    #[serde(default)]
    wind: Option<WindBlock>,
    #[serde(default)]
    clouds: Option<CloudBlock>,
    #[serde(default)]
    rain: Option<RainBlock>,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CloudBlock {
    all: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RainBlock {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastPayload {
    list: Vec<Observation>,
}

impl Observation {
    fn push_into(
        self,
        out: &mut Vec<NormalizedReading>,
        location: &Location,
        body: &str,
    ) -> Result<(), SourceError> {
        let timestamp = unix_to_utc(ProviderId::OpenWeather, self.dt, body)?;
        let (wind_speed, wind_deg) = self
            .wind
            .map_or((None, None), |wind| (wind.speed, wind.deg));
        // No rain block means no rain fell.
        let precipitation = self
            .rain
            .map_or(Some(0.0), |rain| rain.one_hour.or(rain.three_hours));

        push_readings(
            out,
            location,
            timestamp,
            ProviderId::OpenWeather,
            [
                (Variable::Temperature, self.main.temp.map(kelvin_to_celsius)),
                (Variable::Humidity, self.main.humidity),
                (Variable::Pressure, self.main.pressure),
                (Variable::WindSpeed, wind_speed),
                (Variable::WindDirection, wind_deg.map(normalize_bearing)),
                (Variable::Precipitation, precipitation),
                (Variable::CloudCover, self.clouds.and_then(|clouds| clouds.all)),
            ],
        );
        Ok(())
    }
}
