//! # Stratus Core
//!
//! Weather data-source abstraction, cache and validation pipeline.
//!
//! ## Overview
//!
//! This crate unifies heterogeneous weather providers behind one contract:
//!
//! - **Canonical readings** in one unit per variable, whatever the provider sends
//! - **Provider adapters** (Open-Meteo, OpenWeather, Meteosource, MeteoBlue) behind
//!   [`WeatherSource`]
//! - **Keyed cache** with TTL expiry, stale lookup, LRU eviction and JSON snapshots
//! - **Validator** that grades readings `ok`, `suspect` or `invalid` and never drops them
//! - **Orchestrator** that collapses concurrent misses, guards providers with a
//!   quota gate and circuit breaker, and falls back to stale data or one
//!   fallback provider
//! - **Combiner** that summarizes readings across providers or locations
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters and shared normalization helpers |
//! | [`cache`] | Cache keys, entries and the store |
//! | [`circuit_breaker`] | Per-provider circuit breaker |
//! | [`clock`] | System and manual clocks |
//! | [`combine`] | Cross-provider and cross-location summaries |
//! | [`config`] | Policy configuration (TTLs, quotas, fallbacks) |
//! | [`data_source`] | Adapter contract and [`SourceError`] |
//! | [`domain`] | Location, variables, readings, timestamps, units |
//! | [`error`] | Validation and persistence errors |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`inflight`] | In-flight request registry |
//! | [`orchestrator`] | Query orchestration |
//! | [`source`] | Provider identifiers |
//! | [`telemetry`] | Tracing subscriber setup |
//! | [`throttling`] | Local provider quota gate |
//! | [`validation`] | Anomaly policies and the validator |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stratus_core::{Location, ProviderId, SourceOrchestrator, WeatherQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     stratus_core::telemetry::init_tracing("stratus_core=info");
//!
//!     let orchestrator = SourceOrchestrator::builder().with_open_meteo().build();
//!     let medellin = Location::new("medellin", "Medellín", 6.2442, -75.5812)?;
//!
//!     let response = orchestrator
//!         .get_weather(&WeatherQuery::forecast(ProviderId::OpenMeteo, medellin, 3))
//!         .await?;
//!     println!("{} readings ({:?})", response.readings.len(), response.served_from);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐     ┌──────────────────┐
//! │ Source Orchestrator │────▶│ Cache Store      │
//! └──────────┬──────────┘     └──────────────────┘
//!            │ miss
//!            ▼
//! ┌─────────────────────┐     ┌──────────────────┐
//! │ In-flight Registry  │────▶│ Quota Gate +     │
//! └──────────┬──────────┘     │ Circuit Breaker  │
//!            │ leader         └──────────────────┘
//!            ▼
//! ┌─────────────────────┐     ┌──────────────────┐
//! │ Weather Source      │────▶│ HTTP Client      │
//! │ (Adapter Trait)     │     │ (reqwest/canned) │
//! └──────────┬──────────┘     └──────────────────┘
//!            ▼
//! ┌─────────────────────┐
//! │ Validator           │
//! └─────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use stratus_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::ProviderRateLimited => "quota spent, stale data may be served",
//!         SourceErrorKind::ProviderUnavailable => "provider down, fallback may be tried",
//!         SourceErrorKind::InvalidRequest => "caller error, never retried",
//!         _ => "other",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Credentials are passed to adapters explicitly and redacted from `Debug`
//! - The core never reads the environment for secrets
//! - All HTTP requests use TLS via rustls

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod combine;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod inflight;
pub mod orchestrator;
pub mod source;
pub mod telemetry;
pub mod throttling;
pub mod validation;

// Adapter implementations
pub use adapters::{MeteoblueAdapter, MeteosourceAdapter, OpenMeteoAdapter, OpenWeatherAdapter};

// Caching
pub use cache::{CacheEntry, CacheKey, CacheStore};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Clocks
pub use clock::{Clock, ManualClock, SystemClock};

// Summaries
pub use combine::{aggregate_locations, combine_sources, FieldStats, LocationSummary, SourceSummary};

// Configuration
pub use config::{
    FallbackRoute, OrchestratorConfig, ProviderPolicy, StratusConfig, TtlPolicy, NEVER_EXPIRES,
};

// Adapter contract
pub use data_source::{
    CapabilitySet, ForecastBatch, RequestKind, SourceError, SourceErrorKind, SourceFuture,
    TimeWindow, WeatherSource,
};

// Domain types
pub use domain::{Location, NormalizedReading, Quality, UtcDateTime, Variable, VariableSet};

// Error types
pub use error::{CacheError, ValidationError};

// HTTP client types
pub use http_client::{
    CannedHttpClient, Credentials, HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Orchestration
pub use orchestrator::{
    QueryKind, ServedFrom, SourceOrchestrator, SourceOrchestratorBuilder, StaleData,
    WeatherFailure, WeatherQuery, WeatherResponse, WeatherResult,
};

// Source identifiers
pub use source::ProviderId;

// Throttling
pub use throttling::QuotaGate;

// Validation
pub use validation::{AnomalyPolicy, AnomalyPolicySet, Validator};
