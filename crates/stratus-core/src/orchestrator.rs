//! Request orchestration: cache, guarded fetch, validation, fallback.
//!
//! One [`SourceOrchestrator::get_weather`] call makes at most one network
//! round-trip against the requested provider plus one attempt against its
//! configured fallback.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::{MeteoblueAdapter, MeteosourceAdapter, OpenMeteoAdapter, OpenWeatherAdapter};
use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::config::{FallbackRoute, OrchestratorConfig, ProviderPolicy, StratusConfig};
use crate::data_source::{RequestKind, SourceError, SourceErrorKind, TimeWindow, WeatherSource};
use crate::http_client::Credentials;
use crate::inflight::{FetchOutcome, Flight, InflightRegistry};
use crate::throttling::QuotaGate;
use crate::validation::Validator;
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, VariableSet};

/// What the caller wants from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryKind {
    Current,
    Forecast { horizon_days: u16 },
    Historical { start: UtcDateTime, end: UtcDateTime },
}

impl QueryKind {
    pub const fn request_kind(self) -> RequestKind {
        match self {
            Self::Current => RequestKind::Current,
            Self::Forecast { .. } => RequestKind::Forecast,
            Self::Historical { .. } => RequestKind::Historical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub provider: ProviderId,
    pub location: Location,
    pub kind: QueryKind,
    pub variables: VariableSet,
}

impl WeatherQuery {
    pub fn current(provider: ProviderId, location: Location) -> Self {
        Self::new(provider, location, QueryKind::Current)
    }

    pub fn forecast(provider: ProviderId, location: Location, horizon_days: u16) -> Self {
        Self::new(provider, location, QueryKind::Forecast { horizon_days })
    }

    pub fn historical(
        provider: ProviderId,
        location: Location,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Self {
        Self::new(provider, location, QueryKind::Historical { start, end })
    }

    fn new(provider: ProviderId, location: Location, kind: QueryKind) -> Self {
        Self {
            provider,
            location,
            kind,
            variables: VariableSet::all(),
        }
    }

    pub fn with_variables(mut self, variables: VariableSet) -> Self {
        self.variables = variables;
        self
    }
}

/// Where a served payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    Live,
    Cache,
    StaleFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherResponse {
    pub readings: Vec<NormalizedReading>,
    pub served_from: ServedFrom,
    pub provider: ProviderId,
    pub fetched_at: UtcDateTime,
    /// Forecast horizon actually served, after capping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon_days: Option<u16>,
    /// Errors met on the way, e.g. the rate limit behind a stale fallback.
    pub errors: Vec<SourceError>,
}

/// Expired data offered next to a failure. Never mixed into a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleData {
    pub readings: Vec<NormalizedReading>,
    pub provider: ProviderId,
    pub fetched_at: UtcDateTime,
    pub age_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherFailure {
    /// The last error encountered.
    pub error: SourceError,
    pub errors: Vec<SourceError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<StaleData>,
}

impl Display for WeatherFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        if self.errors.len() > 1 {
            write!(f, " (after {} errors)", self.errors.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for WeatherFailure {}

pub type WeatherResult = Result<WeatherResponse, WeatherFailure>;

/// Validated form of [`QueryKind`].
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Current,
    Forecast { horizon_days: u16 },
    Historical(TimeWindow),
}

impl Resolved {
    const fn request_kind(self) -> RequestKind {
        match self {
            Self::Current => RequestKind::Current,
            Self::Forecast { .. } => RequestKind::Forecast,
            Self::Historical(_) => RequestKind::Historical,
        }
    }
}

struct ProviderSlot {
    adapter: Arc<dyn WeatherSource>,
    policy: ProviderPolicy,
    quota: QuotaGate,
    breaker: CircuitBreaker,
}

/// Failed attempt against one provider, with whatever stale entry it had.
struct AttemptFailure {
    error: SourceError,
    stale: Option<Arc<CacheEntry>>,
}

/// Registry of weather sources plus the cache and guards around them.
pub struct SourceOrchestrator {
    providers: HashMap<ProviderId, ProviderSlot>,
    cache: CacheStore,
    inflight: InflightRegistry,
    validator: Validator,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
}

/// Builder for [`SourceOrchestrator`].
///
/// Credentials are passed explicitly; nothing is read from the environment.
///
/// ```rust,ignore
/// use stratus_core::{Credentials, ProviderId, SourceOrchestrator};
///
/// let orchestrator = SourceOrchestrator::builder()
///     .with_open_meteo()
///     .with_openweather(Credentials::api_key(api_key))
///     .with_fallback(ProviderId::OpenWeather, ProviderId::OpenMeteo)
///     .build();
/// ```
#[derive(Default)]
pub struct SourceOrchestratorBuilder {
    sources: Vec<Arc<dyn WeatherSource>>,
    config: StratusConfig,
    clock: Option<Arc<dyn Clock>>,
    cache: Option<CacheStore>,
}

impl SourceOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn WeatherSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_open_meteo(self) -> Self {
        self.with_source(Arc::new(OpenMeteoAdapter::default()))
    }

    pub fn with_openweather(self, credentials: Credentials) -> Self {
        self.with_source(Arc::new(OpenWeatherAdapter::new(credentials)))
    }

    pub fn with_meteosource(self, credentials: Credentials) -> Self {
        self.with_source(Arc::new(MeteosourceAdapter::new(credentials)))
    }

    pub fn with_meteoblue(self, credentials: Credentials) -> Self {
        self.with_source(Arc::new(MeteoblueAdapter::new(credentials)))
    }

    pub fn with_config(mut self, config: StratusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fallback(mut self, primary: ProviderId, fallback: ProviderId) -> Self {
        self.config
            .orchestrator
            .fallbacks
            .retain(|route| route.primary != primary);
        self.config
            .orchestrator
            .fallbacks
            .push(FallbackRoute { primary, fallback });
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.orchestrator.fetch_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses an existing cache, e.g. one restored from a snapshot.
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> SourceOrchestrator {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = self
            .cache
            .unwrap_or_else(|| CacheStore::new(self.config.cache_capacity, Arc::clone(&clock)));

        let providers = self
            .sources
            .into_iter()
            .map(|adapter| {
                let policy = self.config.policy_for(adapter.id());
                let slot = ProviderSlot {
                    quota: QuotaGate::from_policy(&policy),
                    breaker: CircuitBreaker::with_clock(policy.circuit_breaker, Arc::clone(&clock)),
                    policy,
                    adapter,
                };
                (slot.adapter.id(), slot)
            })
            .collect();

        SourceOrchestrator {
            providers,
            cache,
            inflight: InflightRegistry::new(),
            validator: Validator::new(
                self.config.anomaly.clone(),
                self.config.orchestrator.max_current_age,
            ),
            config: self.config.orchestrator,
            clock,
        }
    }
}

impl SourceOrchestrator {
    pub fn builder() -> SourceOrchestratorBuilder {
        SourceOrchestratorBuilder::new()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn registered_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.providers.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn circuit_state(&self, provider: ProviderId) -> Option<CircuitState> {
        self.providers
            .get(&provider)
            .map(|slot| slot.breaker.state())
    }

    /// Serves a query from cache, the requested provider, a stale entry or
    /// the configured fallback provider, in that order of preference.
    #[tracing::instrument(
        name = "get_weather",
        skip_all,
        fields(
            provider = %query.provider,
            location = %query.location.id,
            kind = %query.kind.request_kind(),
        )
    )]
    pub async fn get_weather(&self, query: &WeatherQuery) -> WeatherResult {
        let resolved = match validate(query) {
            Ok(resolved) => resolved,
            Err(error) => return Err(self.failed(error, Vec::new(), None)),
        };

        let primary = query.provider;
        let failure = match self.attempt(primary, query, resolved).await {
            Ok(response) => return Ok(response),
            Err(failure) => failure,
        };
        let mut errors = vec![failure.error.clone()];

        match failure.error.kind() {
            SourceErrorKind::InvalidRequest
            | SourceErrorKind::AdapterNotRegistered
            | SourceErrorKind::Internal => {
                return Err(self.failed(failure.error, errors, failure.stale));
            }
            SourceErrorKind::ProviderRateLimited => {
                // Rate limits recover locally or surface; they never hop providers.
                if let Some(stale) = &failure.stale {
                    return Ok(self.stale_response(stale, errors));
                }
                return Err(self.failed(failure.error, errors, failure.stale));
            }
            SourceErrorKind::ProviderUnavailable
            | SourceErrorKind::ProviderSchemaError
            | SourceErrorKind::UnsupportedRequest => {
                if self.config.serve_stale_on_unavailable {
                    if let Some(stale) = &failure.stale {
                        return Ok(self.stale_response(stale, errors));
                    }
                }
            }
        }

        let Some(fallback) = self
            .config
            .fallback_for(primary)
            .filter(|fallback| self.supports(*fallback, resolved.request_kind()))
        else {
            return Err(self.failed(failure.error, errors, failure.stale));
        };

        tracing::warn!(%fallback, code = failure.error.code(), "trying fallback provider");
        match self.attempt(fallback, query, resolved).await {
            Ok(mut response) => {
                response.errors = errors;
                Ok(response)
            }
            Err(fallback_failure) => {
                errors.push(fallback_failure.error.clone());
                let stale = failure.stale.or(fallback_failure.stale);
                Err(self.failed(fallback_failure.error, errors, stale))
            }
        }
    }

    fn supports(&self, provider: ProviderId, kind: RequestKind) -> bool {
        self.providers
            .get(&provider)
            .is_some_and(|slot| slot.adapter.capabilities().supports(kind))
    }

    /// One provider: cache lookup, then a collapsed, guarded fetch on miss.
    async fn attempt(
        &self,
        provider: ProviderId,
        query: &WeatherQuery,
        resolved: Resolved,
    ) -> Result<WeatherResponse, AttemptFailure> {
        let Some(slot) = self.providers.get(&provider) else {
            return Err(AttemptFailure {
                error: SourceError::adapter_not_registered(provider),
                stale: None,
            });
        };
        let capabilities = slot.adapter.capabilities();
        if !capabilities.supports(resolved.request_kind()) {
            return Err(AttemptFailure {
                error: SourceError::unsupported_request(resolved.request_kind()).with_provider(provider),
                stale: None,
            });
        }

        let key = match resolved {
            Resolved::Current => CacheKey::current(provider, &query.location, query.variables),
            Resolved::Forecast { horizon_days } => CacheKey::forecast(
                provider,
                &query.location,
                capabilities.clamp_horizon(horizon_days),
                query.variables,
            ),
            Resolved::Historical(window) => {
                CacheKey::historical(provider, &query.location, window, query.variables)
            }
        };

        let cached = self.cache.get(&key);
        if let Some(entry) = cached.as_ref().filter(|entry| self.cache.is_fresh(entry)) {
            tracing::debug!(%key, "cache hit");
            return Ok(response_from(entry, ServedFrom::Cache, Vec::new()));
        }
        tracing::debug!(%key, stale = cached.is_some(), "cache miss");

        let outcome = match self.inflight.join(&key) {
            Flight::Leader(guard) => {
                // A flight may have landed between the lookup and the join.
                if let Some(entry) = self.cache.get(&key).filter(|entry| self.cache.is_fresh(entry)) {
                    guard.complete(Ok(Arc::clone(&entry)));
                    return Ok(response_from(&entry, ServedFrom::Cache, Vec::new()));
                }
                let outcome = self.fetch(slot, query, resolved, key).await;
                guard.complete(outcome.clone());
                outcome
            }
            Flight::Waiter(waiter) => {
                tracing::debug!("joining in-flight fetch");
                waiter.outcome().await
            }
        };

        match outcome {
            Ok(entry) => Ok(response_from(&entry, ServedFrom::Live, Vec::new())),
            Err(error) => Err(AttemptFailure {
                error: error.with_provider(provider),
                stale: cached,
            }),
        }
    }

    async fn fetch(
        &self,
        slot: &ProviderSlot,
        query: &WeatherQuery,
        resolved: Resolved,
        key: CacheKey,
    ) -> FetchOutcome {
        let provider = slot.adapter.id();
        if !slot.breaker.allow_request() {
            return Err(
                SourceError::unavailable(format!("circuit open for {provider}")).with_provider(provider),
            );
        }
        if let Err(wait) = slot.quota.acquire() {
            slot.breaker.release_trial();
            return Err(SourceError::rate_limited(
                format!("local quota for {provider} is spent"),
                Some(wait),
            )
            .with_provider(provider));
        }

        let location = &query.location;
        let call = async {
            match resolved {
                Resolved::Current => slot
                    .adapter
                    .fetch_current(location)
                    .await
                    .map(|readings| (readings, None)),
                Resolved::Forecast { horizon_days } => slot
                    .adapter
                    .fetch_forecast(location, horizon_days)
                    .await
                    .map(|batch| (batch.readings, Some(batch.horizon_days))),
                Resolved::Historical(window) => slot
                    .adapter
                    .fetch_historical(location, window.start, window.end)
                    .await
                    .map(|readings| (readings, None)),
            }
        };

        let timeout = self.config.fetch_timeout;
        let result = tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
            Err(SourceError::unavailable(format!(
                "{provider} did not answer within {}ms",
                timeout.as_millis()
            )))
        });

        let (readings, horizon_days) = match result {
            Ok(fetched) => {
                slot.breaker.record_success();
                fetched
            }
            Err(error) => {
                if matches!(
                    error.kind(),
                    SourceErrorKind::ProviderUnavailable | SourceErrorKind::ProviderSchemaError
                ) {
                    slot.breaker.record_failure();
                } else {
                    slot.breaker.release_trial();
                }
                tracing::debug!(code = error.code(), "provider fetch failed");
                return Err(error.with_provider(provider));
            }
        };

        let kind = resolved.request_kind();
        let readings: Vec<_> = readings
            .into_iter()
            .filter(|reading| query.variables.contains(reading.variable))
            .collect();
        let fetched_at = self.clock.now();
        let readings = self.validator.annotate(readings, kind, fetched_at);

        let mut entry = CacheEntry::new(key, readings, fetched_at, slot.policy.ttl.for_kind(kind));
        if let Some(horizon_days) = horizon_days {
            entry = entry.with_served_horizon(horizon_days);
        }
        tracing::debug!(readings = entry.readings.len(), "provider fetch succeeded");
        Ok(self.cache.insert(entry))
    }

    fn stale_response(&self, entry: &CacheEntry, errors: Vec<SourceError>) -> WeatherResponse {
        tracing::warn!(
            provider = %entry.key.provider,
            age_secs = entry.age_at(self.clock.now()).as_secs(),
            "serving stale cache entry"
        );
        response_from(entry, ServedFrom::StaleFallback, errors)
    }

    fn failed(
        &self,
        error: SourceError,
        mut errors: Vec<SourceError>,
        stale: Option<Arc<CacheEntry>>,
    ) -> WeatherFailure {
        if errors.is_empty() {
            errors.push(error.clone());
        }
        tracing::error!(code = error.code(), %error, "weather request failed");

        let now = self.clock.now();
        WeatherFailure {
            error,
            errors,
            stale: stale.map(|entry| StaleData {
                readings: entry.readings.clone(),
                provider: entry.key.provider,
                fetched_at: entry.fetched_at,
                age_secs: entry.age_at(now).as_secs(),
            }),
        }
    }
}

fn validate(query: &WeatherQuery) -> Result<Resolved, SourceError> {
    Location::new(
        query.location.id.as_str(),
        query.location.name.as_str(),
        query.location.lat,
        query.location.lon,
    )?;
    if query.variables.is_empty() {
        return Err(SourceError::invalid_request("variable set must not be empty"));
    }

    match query.kind {
        QueryKind::Current => Ok(Resolved::Current),
        QueryKind::Forecast { horizon_days: 0 } => Err(SourceError::invalid_request(
            "forecast horizon must be at least one day",
        )),
        QueryKind::Forecast { horizon_days } => Ok(Resolved::Forecast { horizon_days }),
        QueryKind::Historical { start, end } => TimeWindow::new(start, end).map(Resolved::Historical),
    }
}

fn response_from(entry: &CacheEntry, served_from: ServedFrom, errors: Vec<SourceError>) -> WeatherResponse {
    WeatherResponse {
        readings: entry.readings.clone(),
        served_from,
        provider: entry.key.provider,
        fetched_at: entry.fetched_at,
        horizon_days: entry.served_horizon_days,
        errors,
    }
}
