//! In-memory policy configuration.
//!
//! The caller builds or deserializes a [`StratusConfig`]; this crate never
//! reads configuration files or the environment. Durations are serialized
//! as whole seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::data_source::RequestKind;
use crate::validation::AnomalyPolicySet;
use crate::ProviderId;

/// TTL that never elapses. Used for historical data.
pub const NEVER_EXPIRES: Duration = Duration::from_secs(u64::MAX);

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Entry lifetime per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    #[serde(with = "duration_secs")]
    pub current: Duration,
    #[serde(with = "duration_secs")]
    pub forecast: Duration,
    #[serde(with = "duration_secs")]
    pub historical: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            current: Duration::from_secs(10 * 60),
            forecast: Duration::from_secs(60 * 60),
            historical: NEVER_EXPIRES,
        }
    }
}

impl TtlPolicy {
    pub const fn for_kind(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Current => self.current,
            RequestKind::Forecast => self.forecast,
            RequestKind::Historical => self.historical,
        }
    }
}

/// Per-provider TTLs, local quota and circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPolicy {
    pub provider: ProviderId,
    #[serde(default)]
    pub ttl: TtlPolicy,
    #[serde(with = "duration_secs")]
    pub quota_window: Duration,
    pub quota_limit: u32,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ProviderPolicy {
    /// Free tier: 600 calls per minute.
    pub fn open_meteo_default() -> Self {
        Self {
            provider: ProviderId::OpenMeteo,
            ttl: TtlPolicy::default(),
            quota_window: Duration::from_secs(60),
            quota_limit: 600,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Free tier: 60 calls per minute.
    pub fn openweather_default() -> Self {
        Self {
            provider: ProviderId::OpenWeather,
            ttl: TtlPolicy::default(),
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Free tier: 400 calls per day.
    pub fn meteosource_default() -> Self {
        Self {
            provider: ProviderId::Meteosource,
            ttl: TtlPolicy::default(),
            quota_window: Duration::from_secs(24 * 60 * 60),
            quota_limit: 400,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Trial tier: 500 calls per day.
    pub fn meteoblue_default() -> Self {
        Self {
            provider: ProviderId::Meteoblue,
            ttl: TtlPolicy::default(),
            quota_window: Duration::from_secs(24 * 60 * 60),
            quota_limit: 500,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn default_for(provider: ProviderId) -> Self {
        match provider {
            ProviderId::OpenMeteo => Self::open_meteo_default(),
            ProviderId::OpenWeather => Self::openweather_default(),
            ProviderId::Meteosource => Self::meteosource_default(),
            ProviderId::Meteoblue => Self::meteoblue_default(),
        }
    }
}

/// A single allowed fallback hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRoute {
    pub primary: ProviderId,
    pub fallback: ProviderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on one adapter call.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,
    /// Serve a stale entry instead of failing when the provider is down.
    #[serde(default)]
    pub serve_stale_on_unavailable: bool,
    /// Current readings older than this are graded suspect.
    #[serde(with = "duration_secs")]
    pub max_current_age: Duration,
    #[serde(default)]
    pub fallbacks: Vec<FallbackRoute>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(15),
            serve_stale_on_unavailable: false,
            max_current_age: Duration::from_secs(3 * 60 * 60),
            fallbacks: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn fallback_for(&self, primary: ProviderId) -> Option<ProviderId> {
        self.fallbacks
            .iter()
            .find(|route| route.primary == primary && route.fallback != primary)
            .map(|route| route.fallback)
    }
}

/// Complete policy configuration for a [`SourceOrchestrator`](crate::SourceOrchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratusConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub providers: Vec<ProviderPolicy>,
    #[serde(default)]
    pub anomaly: AnomalyPolicySet,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

const fn default_cache_capacity() -> usize {
    1024
}

impl Default for StratusConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            providers: ProviderId::ALL
                .into_iter()
                .map(ProviderPolicy::default_for)
                .collect(),
            anomaly: AnomalyPolicySet::default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl StratusConfig {
    /// Configured policy for `provider`, falling back to its built-in default.
    pub fn policy_for(&self, provider: ProviderId) -> ProviderPolicy {
        self.providers
            .iter()
            .find(|policy| policy.provider == provider)
            .cloned()
            .unwrap_or_else(|| ProviderPolicy::default_for(provider))
    }
}
