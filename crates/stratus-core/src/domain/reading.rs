use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Location, ProviderId, UtcDateTime, ValidationError};

/// Measured quantity. Each variable has exactly one canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    #[serde(rename = "temperature_c")]
    Temperature,
    #[serde(rename = "humidity_pct")]
    Humidity,
    #[serde(rename = "pressure_hpa")]
    Pressure,
    #[serde(rename = "wind_speed_ms")]
    WindSpeed,
    #[serde(rename = "wind_dir_deg")]
    WindDirection,
    #[serde(rename = "precipitation_mm")]
    Precipitation,
    #[serde(rename = "cloud_cover_pct")]
    CloudCover,
}

impl Variable {
    pub const ALL: [Self; 7] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::WindSpeed,
        Self::WindDirection,
        Self::Precipitation,
        Self::CloudCover,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature_c",
            Self::Humidity => "humidity_pct",
            Self::Pressure => "pressure_hpa",
            Self::WindSpeed => "wind_speed_ms",
            Self::WindDirection => "wind_dir_deg",
            Self::Precipitation => "precipitation_mm",
            Self::CloudCover => "cloud_cover_pct",
        }
    }

    pub const fn canonical_unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity | Self::CloudCover => "%",
            Self::Pressure => "hPa",
            Self::WindSpeed => "m/s",
            Self::WindDirection => "°",
            Self::Precipitation => "mm",
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variable {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|variable| variable.as_str() == normalized)
            .ok_or(ValidationError::InvalidVariable { value: normalized })
    }
}

/// Order-independent set of requested variables.
///
/// Backed by a bitmask, so its hash token is stable across processes and
/// independent of the order the caller listed the variables in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Variable>", into = "Vec<Variable>")]
pub struct VariableSet(u16);

impl VariableSet {
    pub fn new(variables: impl IntoIterator<Item = Variable>) -> Result<Self, ValidationError> {
        let bits = variables
            .into_iter()
            .fold(0_u16, |acc, variable| acc | variable.bit());
        if bits == 0 {
            return Err(ValidationError::EmptyVariableSet);
        }
        Ok(Self(bits))
    }

    pub fn all() -> Self {
        Self(Variable::ALL.iter().fold(0, |acc, variable| acc | variable.bit()))
    }

    pub const fn contains(self, variable: Variable) -> bool {
        self.0 & variable.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Variable> {
        Variable::ALL
            .into_iter()
            .filter(move |variable| self.contains(*variable))
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Hex token used as the variable-set component of cache keys.
    pub fn hash_token(self) -> String {
        format!("{:04x}", self.0)
    }
}

impl TryFrom<Vec<Variable>> for VariableSet {
    type Error = ValidationError;

    fn try_from(value: Vec<Variable>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VariableSet> for Vec<Variable> {
    fn from(value: VariableSet) -> Self {
        value.iter().collect()
    }
}

/// Validator verdict attached to every reading. Never removes the reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Ok,
    Suspect,
    Invalid,
}

impl Quality {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Suspect => "suspect",
            Self::Invalid => "invalid",
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::Ok
    }
}

/// Canonical record every provider maps into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub location: Location,
    /// Instant the value applies to; for forecasts this is the target time.
    pub timestamp: UtcDateTime,
    pub variable: Variable,
    /// `None` when the provider reported the field as missing.
    pub value: Option<f64>,
    pub source: ProviderId,
    #[serde(default)]
    pub quality: Quality,
}

impl NormalizedReading {
    pub fn new(
        location: &Location,
        timestamp: UtcDateTime,
        variable: Variable,
        value: Option<f64>,
        source: ProviderId,
    ) -> Self {
        Self {
            location: location.clone(),
            timestamp,
            variable,
            value,
            source,
            quality: Quality::Ok,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}
