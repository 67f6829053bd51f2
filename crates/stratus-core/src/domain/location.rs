use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Resolved location handed to the core by the configuration layer.
///
/// Coordinates are WGS84 decimal degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        lat: f64,
        lon: f64,
    ) -> Result<Self, ValidationError> {
        let id = id.into().trim().to_owned();
        if id.is_empty() {
            return Err(ValidationError::EmptyLocationId);
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::LatitudeOutOfRange { value: lat });
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::LongitudeOutOfRange { value: lon });
        }

        Ok(Self {
            id,
            name: name.into(),
            lat,
            lon,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.4}, {:.4})", self.id, self.lat, self.lon)
    }
}
