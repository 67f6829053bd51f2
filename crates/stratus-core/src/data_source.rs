//! Weather source trait and request/response types.
//!
//! This module defines the adapter contract ([`WeatherSource`]) every
//! provider implementation follows, the structured [`SourceError`] used by
//! the orchestrator's fallback policy, and the small request types shared
//! by adapters and the cache key.
//!
//! # Request kinds
//!
//! | Kind | Adapter call | Typical TTL |
//! |------|--------------|-------------|
//! | Current | [`WeatherSource::fetch_current`] | minutes |
//! | Forecast | [`WeatherSource::fetch_forecast`] | about an hour |
//! | Historical | [`WeatherSource::fetch_historical`] | never expires |
//!
//! # Example
//!
//! ```rust,ignore
//! use stratus_core::{Location, OpenMeteoAdapter, WeatherSource};
//!
//! async fn print_current(adapter: &OpenMeteoAdapter) -> Result<(), stratus_core::SourceError> {
//!     let location = Location::new("medellin", "Medellín", 6.2442, -75.5812)?;
//!     for reading in adapter.fetch_current(&location).await? {
//!         println!("{} = {:?}", reading.variable, reading.value);
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, ValidationError};

/// Request kind used for capability checks, TTL selection and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Current,
    Forecast,
    Historical,
}

impl RequestKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Historical => "historical",
        }
    }
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported request matrix for a weather source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub current: bool,
    pub forecast: bool,
    pub historical: bool,
    /// Longest forecast horizon the provider serves, in days.
    pub max_forecast_days: u16,
}

impl CapabilitySet {
    pub const fn new(current: bool, forecast: bool, historical: bool, max_forecast_days: u16) -> Self {
        Self {
            current,
            forecast,
            historical,
            max_forecast_days,
        }
    }

    pub const fn supports(self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Current => self.current,
            RequestKind::Forecast => self.forecast && self.max_forecast_days > 0,
            RequestKind::Historical => self.historical,
        }
    }

    /// Caps a requested horizon at the provider maximum. Exceeding it is not an error.
    pub fn clamp_horizon(self, requested_days: u16) -> u16 {
        requested_days.min(self.max_forecast_days)
    }

    pub fn supported_kinds(self) -> Vec<&'static str> {
        [RequestKind::Current, RequestKind::Forecast, RequestKind::Historical]
            .into_iter()
            .filter(|kind| self.supports(*kind))
            .map(RequestKind::as_str)
            .collect()
    }
}

/// Inclusive time range for historical requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: UtcDateTime,
    pub end: UtcDateTime,
}

impl TimeWindow {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Result<Self, SourceError> {
        if start > end {
            return Err(SourceError::invalid_request(
                ValidationError::InvertedWindow {
                    start: start.format_rfc3339(),
                    end: end.format_rfc3339(),
                }
                .to_string(),
            ));
        }
        Ok(Self { start, end })
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    InvalidRequest,
    ProviderUnavailable,
    ProviderRateLimited,
    ProviderSchemaError,
    UnsupportedRequest,
    AdapterNotRegistered,
    Internal,
}

/// Structured source error used by the orchestrator's fallback policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    /// Offending provider body, kept verbatim for diagnosis of schema errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw_payload: Option<String>,
}

impl SourceError {
    fn with_kind(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            provider: None,
            retry_after_secs: None,
            raw_payload: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::InvalidRequest, message, false)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::ProviderUnavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let mut error = Self::with_kind(SourceErrorKind::ProviderRateLimited, message, true);
        error.retry_after_secs = retry_after.map(|delay| delay.as_secs().max(1));
        error
    }

    pub fn schema(message: impl Into<String>, raw_payload: impl Into<String>) -> Self {
        let mut error = Self::with_kind(SourceErrorKind::ProviderSchemaError, message, false);
        error.raw_payload = Some(raw_payload.into());
        error
    }

    pub fn unsupported_request(kind: RequestKind) -> Self {
        Self::with_kind(
            SourceErrorKind::UnsupportedRequest,
            format!("request kind '{kind}' is not supported by this source"),
            false,
        )
    }

    pub fn adapter_not_registered(provider: ProviderId) -> Self {
        Self::with_kind(
            SourceErrorKind::AdapterNotRegistered,
            format!("source adapter '{provider}' is not registered"),
            false,
        )
        .with_provider(provider)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Internal, message, false)
    }

    /// Attributes the error to a provider unless it already names one.
    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider.get_or_insert(provider);
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn provider(&self) -> Option<ProviderId> {
        self.provider
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }

    pub fn raw_payload(&self) -> Option<&str> {
        self.raw_payload.as_deref()
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::ProviderUnavailable => "source.unavailable",
            SourceErrorKind::ProviderRateLimited => "source.rate_limited",
            SourceErrorKind::ProviderSchemaError => "source.schema_error",
            SourceErrorKind::UnsupportedRequest => "source.unsupported_request",
            SourceErrorKind::AdapterNotRegistered => "source.adapter_not_registered",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.provider {
            Some(provider) => write!(f, "{provider}: {} ({})", self.message, self.code()),
            None => write!(f, "{} ({})", self.message, self.code()),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<ValidationError> for SourceError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

/// Forecast readings together with the horizon the provider actually served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBatch {
    pub readings: Vec<NormalizedReading>,
    pub requested_horizon_days: u16,
    /// Requested horizon capped at the provider maximum.
    pub horizon_days: u16,
}

impl ForecastBatch {
    pub fn was_capped(&self) -> bool {
        self.horizon_days < self.requested_horizon_days
    }
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Source adapter contract.
///
/// Every provider implements this trait to be registered with the
/// [`SourceOrchestrator`](crate::SourceOrchestrator). Adapters must be
/// stateless apart from immutable configuration, so one instance can serve
/// concurrent requests for distinct keys. Rate limiting, circuit breaking
/// and timeouts are applied by the orchestrator around these calls.
///
/// # Required Methods
///
/// | Method | Description |
/// |--------|-------------|
/// | [`id`](WeatherSource::id) | Unique provider identifier |
/// | [`capabilities`](WeatherSource::capabilities) | Supported kinds and forecast horizon |
/// | [`fetch_current`](WeatherSource::fetch_current) | Latest observation |
/// | [`fetch_forecast`](WeatherSource::fetch_forecast) | Forecast up to a horizon |
/// | [`fetch_historical`](WeatherSource::fetch_historical) | Archive data for a window |
pub trait WeatherSource: Send + Sync {
    /// Returns the unique provider identifier.
    fn id(&self) -> ProviderId;

    /// Returns the supported request kinds.
    fn capabilities(&self) -> CapabilitySet;

    /// Fetches the latest observation for a location.
    ///
    /// # Errors
    ///
    /// - [`SourceErrorKind::ProviderUnavailable`] on network or HTTP failure
    /// - [`SourceErrorKind::ProviderRateLimited`] when the provider rejects the quota
    /// - [`SourceErrorKind::ProviderSchemaError`] when the body cannot be mapped
    fn fetch_current<'a>(&'a self, location: &'a Location) -> SourceFuture<'a, Vec<NormalizedReading>>;

    /// Fetches forecast readings, silently capping `horizon_days` at the
    /// provider maximum and reporting the capped value.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_current`](WeatherSource::fetch_current), plus
    /// [`SourceErrorKind::InvalidRequest`] for a zero horizon.
    fn fetch_forecast<'a>(
        &'a self,
        location: &'a Location,
        horizon_days: u16,
    ) -> SourceFuture<'a, ForecastBatch>;

    /// Fetches archive readings between `start` and `end` inclusive.
    ///
    /// # Errors
    ///
    /// [`SourceErrorKind::InvalidRequest`] when `start > end`, raised before
    /// any network call; otherwise as for
    /// [`fetch_current`](WeatherSource::fetch_current).
    fn fetch_historical<'a>(
        &'a self,
        location: &'a Location,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> SourceFuture<'a, Vec<NormalizedReading>>;
}
