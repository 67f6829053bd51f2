//! Summary statistics over readings served by several providers or for
//! several locations.
//!
//! Readings graded `invalid` and readings without a value never enter a
//! summary. Timestamps are bucketed to a caller-chosen resolution so that
//! providers reporting at different instants (an hourly series next to a
//! 3-hourly one, a clock-stamped `current` next to a quarter-hour one) can
//! still be compared; a zero resolution groups on the exact instant.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::units::normalize_bearing;
use crate::orchestrator::WeatherResponse;
use crate::{NormalizedReading, ProviderId, Quality, UtcDateTime, Variable};

/// Mean, extremes and sample count of one group of values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl FieldStats {
    fn from_values(variable: Variable, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = match variable {
            // Bearings average on the circle: 350° and 10° give 0°, not 180°.
            Variable::WindDirection => {
                let (sin, cos) = values.iter().fold((0.0, 0.0), |(sin, cos), degrees: &f64| {
                    let radians = degrees.to_radians();
                    (sin + radians.sin(), cos + radians.cos())
                });
                normalize_bearing(f64::atan2(sin, cos).to_degrees())
            }
            _ => values.iter().sum::<f64>() / values.len() as f64,
        };

        Some(Self {
            mean,
            min,
            max,
            count: values.len(),
        })
    }
}

/// One `(location, variable, time bucket)` combined across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub location_id: String,
    pub variable: Variable,
    /// Start of the time bucket.
    pub timestamp: UtcDateTime,
    pub providers: Vec<ProviderId>,
    pub stats: FieldStats,
}

/// One `(variable, time bucket)` combined across locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSummary {
    pub variable: Variable,
    /// Start of the time bucket.
    pub timestamp: UtcDateTime,
    pub location_ids: Vec<String>,
    pub stats: FieldStats,
}

#[derive(Default)]
struct Group {
    values: Vec<f64>,
    providers: BTreeSet<ProviderId>,
    locations: BTreeSet<String>,
}

impl Group {
    fn push(&mut self, reading: &NormalizedReading, value: f64) {
        self.values.push(value);
        self.providers.insert(reading.source);
        self.locations.insert(reading.location.id.clone());
    }
}

/// Combines the readings of several responses, typically the same query
/// answered by different providers.
///
/// Output is ordered by location, variable and time.
pub fn combine_sources<'a>(
    responses: impl IntoIterator<Item = &'a WeatherResponse>,
    resolution: Duration,
) -> Vec<SourceSummary> {
    let mut groups: BTreeMap<(String, Variable, UtcDateTime), Group> = BTreeMap::new();
    for (reading, value) in usable_readings(responses) {
        let key = (
            reading.location.id.clone(),
            reading.variable,
            bucket(reading.timestamp, resolution),
        );
        groups.entry(key).or_default().push(reading, value);
    }

    groups
        .into_iter()
        .filter_map(|((location_id, variable, timestamp), group)| {
            Some(SourceSummary {
                stats: FieldStats::from_values(variable, &group.values)?,
                location_id,
                variable,
                timestamp,
                providers: group.providers.into_iter().collect(),
            })
        })
        .collect()
}

/// Combines readings for different locations into one regional figure
/// per variable and time bucket.
///
/// Output is ordered by variable and time.
pub fn aggregate_locations<'a>(
    responses: impl IntoIterator<Item = &'a WeatherResponse>,
    resolution: Duration,
) -> Vec<LocationSummary> {
    let mut groups: BTreeMap<(Variable, UtcDateTime), Group> = BTreeMap::new();
    for (reading, value) in usable_readings(responses) {
        let key = (reading.variable, bucket(reading.timestamp, resolution));
        groups.entry(key).or_default().push(reading, value);
    }

    groups
        .into_iter()
        .filter_map(|((variable, timestamp), group)| {
            Some(LocationSummary {
                stats: FieldStats::from_values(variable, &group.values)?,
                variable,
                timestamp,
                location_ids: group.locations.into_iter().collect(),
            })
        })
        .collect()
}

fn usable_readings<'a>(
    responses: impl IntoIterator<Item = &'a WeatherResponse>,
) -> impl Iterator<Item = (&'a NormalizedReading, f64)> {
    responses
        .into_iter()
        .flat_map(|response| response.readings.iter())
        .filter(|reading| reading.quality != Quality::Invalid)
        .filter_map(|reading| {
            reading
                .value
                .filter(|value| value.is_finite())
                .map(|value| (reading, value))
        })
}

fn bucket(timestamp: UtcDateTime, resolution: Duration) -> UtcDateTime {
    let step = i64::try_from(resolution.as_secs()).unwrap_or(i64::MAX);
    if step == 0 {
        return timestamp;
    }
    let seconds = timestamp.unix_timestamp();
    UtcDateTime::from_unix_timestamp(seconds - seconds.rem_euclid(step)).unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ServedFrom;
    use crate::Location;

    const HOUR: Duration = Duration::from_secs(3600);

    fn medellin() -> Location {
        Location::new("medellin", "Medellín", 6.2442, -75.5812).expect("valid location")
    }

    fn bogota() -> Location {
        Location::new("bogota", "Bogotá", 4.711, -74.0721).expect("valid location")
    }

    fn at(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("valid timestamp")
    }

    fn response(provider: ProviderId, readings: Vec<NormalizedReading>) -> WeatherResponse {
        WeatherResponse {
            readings,
            served_from: ServedFrom::Live,
            provider,
            fetched_at: at("2024-06-01T12:00:00Z"),
            horizon_days: None,
            errors: Vec::new(),
        }
    }

    fn reading(
        location: &Location,
        timestamp: &str,
        variable: Variable,
        value: Option<f64>,
        source: ProviderId,
    ) -> NormalizedReading {
        NormalizedReading::new(location, at(timestamp), variable, value, source)
    }

    #[test]
    fn providers_reporting_the_same_hour_are_combined() {
        let open_meteo = response(
            ProviderId::OpenMeteo,
            vec![reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Temperature, Some(22.0), ProviderId::OpenMeteo)],
        );
        let openweather = response(
            ProviderId::OpenWeather,
            vec![reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Temperature, Some(24.0), ProviderId::OpenWeather)],
        );
        let meteoblue = response(
            ProviderId::Meteoblue,
            vec![reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Temperature, Some(23.0), ProviderId::Meteoblue)],
        );

        let summaries = combine_sources([&open_meteo, &openweather, &meteoblue], HOUR);

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.location_id, "medellin");
        assert_eq!(summary.stats, FieldStats { mean: 23.0, min: 22.0, max: 24.0, count: 3 });
        assert_eq!(
            summary.providers,
            vec![ProviderId::OpenMeteo, ProviderId::OpenWeather, ProviderId::Meteoblue]
        );
    }

    #[test]
    fn invalid_and_missing_values_are_left_out() {
        let flagged = reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Humidity, Some(140.0), ProviderId::OpenMeteo)
            .with_quality(Quality::Invalid);
        let suspect = reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Humidity, Some(90.0), ProviderId::Meteosource)
            .with_quality(Quality::Suspect);
        let responses = [
            response(ProviderId::OpenMeteo, vec![flagged]),
            response(
                ProviderId::OpenWeather,
                vec![
                    reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Humidity, Some(70.0), ProviderId::OpenWeather),
                    reading(&medellin(), "2024-06-01T12:00:00Z", Variable::CloudCover, None, ProviderId::OpenWeather),
                ],
            ),
            response(ProviderId::Meteosource, vec![suspect]),
        ];

        let summaries = combine_sources(&responses, HOUR);

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].variable, Variable::Humidity);
        assert_eq!(summaries[0].stats.count, 2);
        assert_eq!(summaries[0].stats.mean, 80.0);
        assert_eq!(summaries[0].providers, vec![ProviderId::OpenWeather, ProviderId::Meteosource]);
    }

    #[test]
    fn resolution_buckets_nearby_instants() {
        let responses = [
            response(
                ProviderId::OpenMeteo,
                vec![reading(&medellin(), "2024-06-01T12:15:00Z", Variable::Pressure, Some(1012.0), ProviderId::OpenMeteo)],
            ),
            response(
                ProviderId::Meteosource,
                vec![reading(&medellin(), "2024-06-01T12:47:31Z", Variable::Pressure, Some(1014.0), ProviderId::Meteosource)],
            ),
        ];

        let hourly = combine_sources(&responses, HOUR);
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].timestamp, at("2024-06-01T12:00:00Z"));
        assert_eq!(hourly[0].stats.mean, 1013.0);

        let exact = combine_sources(&responses, Duration::ZERO);
        assert_eq!(exact.len(), 2);
    }

    #[test]
    fn wind_direction_mean_wraps_around_north() {
        let responses = [response(
            ProviderId::OpenMeteo,
            vec![
                reading(&medellin(), "2024-06-01T12:00:00Z", Variable::WindDirection, Some(350.0), ProviderId::OpenMeteo),
                reading(&medellin(), "2024-06-01T12:00:00Z", Variable::WindDirection, Some(10.0), ProviderId::OpenWeather),
            ],
        )];

        let summary = &combine_sources(&responses, HOUR)[0];

        let mean = summary.stats.mean;
        assert!(mean < 1e-9 || (360.0 - mean) < 1e-9, "got {mean}");
        assert_eq!(summary.stats.min, 10.0);
        assert_eq!(summary.stats.max, 350.0);
    }

    #[test]
    fn locations_aggregate_per_variable_and_time() {
        let responses = [
            response(
                ProviderId::OpenMeteo,
                vec![
                    reading(&medellin(), "2024-06-01T12:00:00Z", Variable::Temperature, Some(24.0), ProviderId::OpenMeteo),
                    reading(&medellin(), "2024-06-01T13:00:00Z", Variable::Temperature, Some(25.0), ProviderId::OpenMeteo),
                ],
            ),
            response(
                ProviderId::OpenMeteo,
                vec![reading(&bogota(), "2024-06-01T12:00:00Z", Variable::Temperature, Some(14.0), ProviderId::OpenMeteo)],
            ),
        ];

        let summaries = aggregate_locations(&responses, HOUR);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].timestamp, at("2024-06-01T12:00:00Z"));
        assert_eq!(summaries[0].location_ids, vec!["bogota".to_owned(), "medellin".to_owned()]);
        assert_eq!(summaries[0].stats, FieldStats { mean: 19.0, min: 14.0, max: 24.0, count: 2 });
        assert_eq!(summaries[1].location_ids, vec!["medellin".to_owned()]);
        assert_eq!(summaries[1].stats.count, 1);
    }

    #[test]
    fn nothing_to_combine_yields_no_summaries() {
        let empty: [WeatherResponse; 0] = [];
        assert!(combine_sources(&empty, HOUR).is_empty());
        assert!(aggregate_locations(&empty, HOUR).is_empty());
    }
}
