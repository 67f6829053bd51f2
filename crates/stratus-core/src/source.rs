use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in readings, cache keys and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    OpenMeteo,
    #[serde(rename = "openweather", alias = "open_weather")]
    OpenWeather,
    Meteosource,
    Meteoblue,
}

impl ProviderId {
    pub const ALL: [Self; 4] = [
        Self::OpenMeteo,
        Self::OpenWeather,
        Self::Meteosource,
        Self::Meteoblue,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenMeteo => "open_meteo",
            Self::OpenWeather => "openweather",
            Self::Meteosource => "meteosource",
            Self::Meteoblue => "meteoblue",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open_meteo" | "openmeteo" | "open-meteo" => Ok(Self::OpenMeteo),
            "openweather" | "openweathermap" => Ok(Self::OpenWeather),
            "meteosource" => Ok(Self::Meteosource),
            "meteoblue" | "meteo_blue" => Ok(Self::Meteoblue),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_aliases() {
        assert_eq!("Open-Meteo".parse::<ProviderId>(), Ok(ProviderId::OpenMeteo));
        assert_eq!(
            " openweathermap ".parse::<ProviderId>(),
            Ok(ProviderId::OpenWeather)
        );
        assert_eq!("MeteoBlue".parse::<ProviderId>(), Ok(ProviderId::Meteoblue));
        for provider in ProviderId::ALL {
            assert_eq!(provider.as_str().parse::<ProviderId>(), Ok(provider));
        }
    }

    #[test]
    fn serde_name_matches_display() {
        for provider in ProviderId::ALL {
            let json = serde_json::to_string(&provider).expect("serialize");
            assert_eq!(json, format!("\"{provider}\""));
        }
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = "siata".parse::<ProviderId>().expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidSource { .. }));
    }
}
