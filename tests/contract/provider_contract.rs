//! Contract tests every provider adapter must pass.
//!
//! Each adapter runs against canned provider bodies, so these tests never
//! touch the network.

use std::sync::Arc;

use stratus_core::{
    CannedHttpClient, Credentials, Location, MeteoblueAdapter, MeteosourceAdapter, OpenMeteoAdapter,
    OpenWeatherAdapter, ProviderId, RequestKind, SourceErrorKind, UtcDateTime, Variable,
    WeatherSource,
};

struct ProviderCase {
    id: ProviderId,
    source: Arc<dyn WeatherSource>,
    http: Arc<CannedHttpClient>,
}

const OPEN_METEO_CURRENT: &str = r#"{"current":{"time":1717243200,"interval":900,
    "temperature_2m":22.5,"relative_humidity_2m":71,"surface_pressure":848.2,
    "wind_speed_10m":18.0,"wind_direction_10m":200.0,"precipitation":0.0,"cloud_cover":35}}"#;

const OPENWEATHER_CURRENT: &str = r#"{"dt":1717243200,
    "main":{"temp":295.65,"humidity":71,"pressure":1013},
    "wind":{"speed":5.0,"deg":200},"clouds":{"all":35}}"#;

const METEOSOURCE_CURRENT: &str = r#"{"current":{"icon":"partly_sunny","temperature":22.5,
    "wind":{"speed":5.0,"angle":200,"dir":"SSW"},
    "precipitation":{"total":0.0,"type":"none"},"cloud_cover":35}}"#;

const METEOBLUE_CURRENT: &str = r#"{"data_1h":{"time":[1717239600,1717243200],
    "temperature":[21.8,22.5],"relativehumidity":[74,71],"sealevelpressure":[1013,1012],
    "windspeed":[4.2,5.0],"winddirection":[190,200],"precipitation":[0.0,0.0],
    "totalcloudcover":[40,35]}}"#;

const OPEN_METEO_FORECAST: &str = r#"{"hourly":{"time":[1717200000,1717203600,1717207200],
    "temperature_2m":[18.0,17.6,17.1],"relative_humidity_2m":[80,82,84]}}"#;

const OPENWEATHER_FORECAST: &str = r#"{"cnt":2,"list":[
    {"dt":1717200000,"main":{"temp":291.15,"humidity":80,"pressure":1012}},
    {"dt":1717210800,"main":{"temp":290.15,"humidity":84,"pressure":1012}}]}"#;

const METEOSOURCE_FORECAST: &str = r#"{"daily":{"data":[
    {"day":"2024-06-01","all_day":{"temperature":18.0,"cloud_cover":{"total":60}}},
    {"day":"2024-06-02","all_day":{"temperature":19.5,"cloud_cover":{"total":20}}}]}}"#;

const METEOBLUE_FORECAST: &str = r#"{"data_day":{"time":[1717200000,1717286400],
    "temperature_mean":[18.4,19.1],"precipitation":[1.2,0.0],"totalcloudcover_mean":[70,40]}}"#;

fn adapter_for(id: ProviderId, http: Arc<CannedHttpClient>) -> Arc<dyn WeatherSource> {
    match id {
        ProviderId::OpenMeteo => Arc::new(OpenMeteoAdapter::with_http_client(http)),
        ProviderId::OpenWeather => Arc::new(OpenWeatherAdapter::with_http_client(
            Credentials::api_key("ow-test"),
            http,
        )),
        ProviderId::Meteosource => Arc::new(MeteosourceAdapter::with_http_client(
            Credentials::api_key("ms-test"),
            http,
        )),
        ProviderId::Meteoblue => Arc::new(MeteoblueAdapter::with_http_client(
            Credentials::api_key("mb-test"),
            http,
        )),
    }
}

fn case(id: ProviderId, body: &str) -> ProviderCase {
    let http = Arc::new(CannedHttpClient::json(body));
    let source = adapter_for(id, http.clone());
    ProviderCase { id, source, http }
}

fn current_cases() -> Vec<ProviderCase> {
    vec![
        case(ProviderId::OpenMeteo, OPEN_METEO_CURRENT),
        case(ProviderId::OpenWeather, OPENWEATHER_CURRENT),
        case(ProviderId::Meteosource, METEOSOURCE_CURRENT),
        case(ProviderId::Meteoblue, METEOBLUE_CURRENT),
    ]
}

fn forecast_cases() -> Vec<ProviderCase> {
    vec![
        case(ProviderId::OpenMeteo, OPEN_METEO_FORECAST),
        case(ProviderId::OpenWeather, OPENWEATHER_FORECAST),
        case(ProviderId::Meteosource, METEOSOURCE_FORECAST),
        case(ProviderId::Meteoblue, METEOBLUE_FORECAST),
    ]
}

fn location() -> Location {
    Location::new("medellin", "Medellín", 6.2442, -75.5812).expect("valid location")
}

fn value(readings: &[stratus_core::NormalizedReading], variable: Variable) -> Option<f64> {
    readings
        .iter()
        .find(|reading| reading.variable == variable)
        .and_then(|reading| reading.value)
}

#[test]
fn capabilities_are_declared_for_every_provider() {
    for case in current_cases() {
        assert_eq!(case.source.id(), case.id);
        let capabilities = case.source.capabilities();
        assert!(capabilities.supports(RequestKind::Current), "{}: current", case.id);
        assert!(capabilities.supports(RequestKind::Forecast), "{}: forecast", case.id);

        let (historical, max_days) = match case.id {
            ProviderId::OpenMeteo => (true, 16),
            ProviderId::OpenWeather => (false, 5),
            ProviderId::Meteosource => (false, 7),
            ProviderId::Meteoblue => (false, 16),
        };
        assert_eq!(capabilities.supports(RequestKind::Historical), historical, "{}", case.id);
        assert_eq!(capabilities.max_forecast_days, max_days, "{}", case.id);
    }
}

#[tokio::test]
async fn current_readings_arrive_in_canonical_units() {
    for case in current_cases() {
        let readings = case
            .source
            .fetch_current(&location())
            .await
            .unwrap_or_else(|error| panic!("provider '{}' current failed: {error}", case.id));

        assert!(!readings.is_empty(), "{}: readings", case.id);
        for reading in &readings {
            assert_eq!(reading.source, case.id, "{}: source tag", case.id);
            assert_eq!(reading.location, location(), "{}: location", case.id);
        }

        let temperature = value(&readings, Variable::Temperature).expect("temperature");
        assert!((temperature - 22.5).abs() < 1e-6, "{}: celsius, got {temperature}", case.id);
        let wind = value(&readings, Variable::WindSpeed).expect("wind speed");
        assert!((wind - 5.0).abs() < 1e-6, "{}: m/s, got {wind}", case.id);
        assert_eq!(value(&readings, Variable::WindDirection), Some(200.0), "{}", case.id);
        assert_eq!(value(&readings, Variable::CloudCover), Some(35.0), "{}", case.id);
        assert_eq!(case.http.recorded_requests().len(), 1, "{}: one request", case.id);
    }
}

#[tokio::test]
async fn forecast_reports_served_horizon_within_capability() {
    for case in forecast_cases() {
        let max_days = case.source.capabilities().max_forecast_days;

        let batch = case
            .source
            .fetch_forecast(&location(), 30)
            .await
            .unwrap_or_else(|error| panic!("provider '{}' forecast failed: {error}", case.id));

        assert_eq!(batch.requested_horizon_days, 30, "{}", case.id);
        assert_eq!(batch.horizon_days, max_days, "{}: capped", case.id);
        assert!(batch.was_capped(), "{}", case.id);
        assert!(!batch.readings.is_empty(), "{}: readings", case.id);
        assert!(batch.readings.iter().all(|reading| reading.source == case.id));
    }
}

#[tokio::test]
async fn zero_horizon_is_rejected_without_a_request() {
    for case in forecast_cases() {
        let error = case
            .source
            .fetch_forecast(&location(), 0)
            .await
            .expect_err("zero horizon");

        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest, "{}", case.id);
        assert!(case.http.recorded_requests().is_empty(), "{}: no request", case.id);
    }
}

#[tokio::test]
async fn historical_is_rejected_before_the_network_when_not_servable() {
    let start = UtcDateTime::parse("2024-01-10T00:00:00Z").expect("valid");
    let end = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid");

    for case in current_cases() {
        let supports = case.source.capabilities().supports(RequestKind::Historical);
        let error = case
            .source
            .fetch_historical(&location(), start, end)
            .await
            .expect_err("inverted or unsupported");

        let expected = if supports {
            SourceErrorKind::InvalidRequest
        } else {
            SourceErrorKind::UnsupportedRequest
        };
        assert_eq!(error.kind(), expected, "{}", case.id);
        assert!(case.http.recorded_requests().is_empty(), "{}: no request", case.id);
    }
}

#[tokio::test]
async fn errors_are_attributed_to_the_failing_provider() {
    for case in current_cases() {
        let http = Arc::new(CannedHttpClient::new([Ok(
            stratus_core::HttpResponse::with_status(500, "internal error"),
        )]));
        let source = adapter_for(case.id, http);

        let error = source.fetch_current(&location()).await.expect_err("500");

        assert_eq!(error.kind(), SourceErrorKind::ProviderUnavailable, "{}", case.id);
        assert_eq!(error.provider(), Some(case.id));
    }
}

#[test]
fn every_provider_has_a_contract_case() {
    let covered: Vec<_> = current_cases().into_iter().map(|case| case.id).collect();
    assert_eq!(covered, ProviderId::ALL.to_vec());
}
