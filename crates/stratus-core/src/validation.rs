//! Reading-level quality grading.
//!
//! The validator only flags. Readings are never dropped, reordered or
//! corrected; each one leaves with a [`Quality`] verdict.
//!
//! | Verdict | Condition |
//! |---------|-----------|
//! | `invalid` | value missing, non-finite or outside static bounds |
//! | `suspect` | implausible rate of change from the prior accepted reading, or a `current` reading older than `max_current_age` |
//! | `ok` | otherwise |

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data_source::RequestKind;
use crate::domain::units::angular_difference;
use crate::{NormalizedReading, Quality, UtcDateTime, ValidationError, Variable};

/// Consecutive readings closer than this are compared as if this far apart.
const MIN_RATE_INTERVAL_SECS: f64 = 60.0;

/// Static bounds and optional rate-of-change limit for one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPolicy {
    pub min: f64,
    pub max: f64,
    /// Largest plausible change per hour, in the variable's canonical unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_per_hour: Option<f64>,
}

impl AnomalyPolicy {
    pub fn bounded(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            max_rate_per_hour: None,
        }
    }

    pub fn with_max_rate(mut self, per_hour: f64) -> Self {
        self.max_rate_per_hour = Some(per_hour);
        self
    }

    pub fn default_for(variable: Variable) -> Self {
        match variable {
            Variable::Temperature => Self::bounded(-90.0, 60.0).with_max_rate(10.0),
            Variable::Humidity => Self::bounded(0.0, 100.0).with_max_rate(40.0),
            Variable::Pressure => Self::bounded(800.0, 1100.0).with_max_rate(10.0),
            Variable::WindSpeed => Self::bounded(0.0, 120.0).with_max_rate(25.0),
            Variable::WindDirection => Self::bounded(0.0, 360.0),
            Variable::Precipitation => Self::bounded(0.0, 500.0),
            Variable::CloudCover => Self::bounded(0.0, 100.0),
        }
    }

    fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Per-variable policies. Variables without an override use
/// [`AnomalyPolicy::default_for`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnomalyPolicySet {
    overrides: BTreeMap<Variable, AnomalyPolicy>,
}

impl AnomalyPolicySet {
    pub fn get(&self, variable: Variable) -> AnomalyPolicy {
        self.overrides
            .get(&variable)
            .copied()
            .unwrap_or_else(|| AnomalyPolicy::default_for(variable))
    }

    pub fn with_policy(
        mut self,
        variable: Variable,
        policy: AnomalyPolicy,
    ) -> Result<Self, ValidationError> {
        if !(policy.min <= policy.max) {
            return Err(ValidationError::InvertedBounds {
                variable: variable.as_str(),
                min: policy.min,
                max: policy.max,
            });
        }
        self.overrides.insert(variable, policy);
        Ok(self)
    }
}

/// Stateless grader applied to every payload before it is cached.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    policies: AnomalyPolicySet,
    max_current_age: Duration,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(AnomalyPolicySet::default(), Duration::from_secs(3 * 60 * 60))
    }
}

impl Validator {
    pub fn new(policies: AnomalyPolicySet, max_current_age: Duration) -> Self {
        Self {
            policies,
            max_current_age,
        }
    }

    pub fn policies(&self) -> &AnomalyPolicySet {
        &self.policies
    }

    /// Grades one reading against its predecessor for the same location and
    /// variable. An `invalid` or empty predecessor is ignored.
    pub fn check(
        &self,
        reading: &NormalizedReading,
        previous: Option<&NormalizedReading>,
        kind: RequestKind,
        now: UtcDateTime,
    ) -> Quality {
        let policy = self.policies.get(reading.variable);
        let Some(value) = reading.value.filter(|value| value.is_finite()) else {
            return Quality::Invalid;
        };
        if !policy.contains(value) {
            return Quality::Invalid;
        }

        if kind == RequestKind::Current && self.is_too_old(reading.timestamp, now) {
            return Quality::Suspect;
        }

        let previous_value = previous
            .filter(|previous| previous.quality != Quality::Invalid)
            .and_then(|previous| {
                previous
                    .value
                    .filter(|value| value.is_finite())
                    .map(|value| (previous.timestamp, value))
            });
        if let (Some(max_rate), Some((previous_at, previous_value))) =
            (policy.max_rate_per_hour, previous_value)
        {
            let change = match reading.variable {
                Variable::WindDirection => angular_difference(value, previous_value),
                _ => (value - previous_value).abs(),
            };
            let seconds = (reading.timestamp - previous_at)
                .unsigned_abs()
                .as_secs_f64()
                .max(MIN_RATE_INTERVAL_SECS);
            if change / (seconds / 3600.0) > max_rate {
                return Quality::Suspect;
            }
        }

        Quality::Ok
    }

    /// Grades a payload. Order and count are preserved; each reading is
    /// compared with the closest earlier accepted reading of its
    /// location and variable.
    pub fn annotate(
        &self,
        mut readings: Vec<NormalizedReading>,
        kind: RequestKind,
        now: UtcDateTime,
    ) -> Vec<NormalizedReading> {
        let mut order: Vec<usize> = (0..readings.len()).collect();
        order.sort_by(|&a, &b| readings[a].timestamp.cmp(&readings[b].timestamp));

        let mut last_accepted: HashMap<(String, Variable), usize> = HashMap::new();
        for index in order {
            let group = (readings[index].location.id.clone(), readings[index].variable);
            let previous = last_accepted.get(&group).map(|&previous| &readings[previous]);
            let quality = self.check(&readings[index], previous, kind, now);

            readings[index].quality = quality;
            if quality != Quality::Invalid {
                last_accepted.insert(group, index);
            }
        }

        let flagged = readings
            .iter()
            .filter(|reading| reading.quality != Quality::Ok)
            .count();
        if flagged > 0 {
            tracing::debug!(flagged, total = readings.len(), "validator flagged readings");
        }
        readings
    }

    fn is_too_old(&self, timestamp: UtcDateTime, now: UtcDateTime) -> bool {
        now > timestamp && (now - timestamp).unsigned_abs() > self.max_current_age
    }
}

#[cfg(test)]
mod tests {
    use time::Duration as TimeDuration;

    use super::*;
    use crate::{Location, ProviderId};

    fn location() -> Location {
        Location::new("medellin", "Medellín", 6.2442, -75.5812).expect("valid location")
    }

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-06-01T12:00:00Z").expect("valid")
    }

    fn reading(variable: Variable, minutes_ago: i64, value: Option<f64>) -> NormalizedReading {
        NormalizedReading::new(
            &location(),
            now() - TimeDuration::minutes(minutes_ago),
            variable,
            value,
            ProviderId::OpenMeteo,
        )
    }

    #[test]
    fn missing_nan_and_out_of_bounds_are_invalid() {
        let validator = Validator::default();
        for value in [None, Some(f64::NAN), Some(f64::INFINITY), Some(75.0), Some(-95.0)] {
            let quality = validator.check(
                &reading(Variable::Temperature, 0, value),
                None,
                RequestKind::Forecast,
                now(),
            );
            assert_eq!(quality, Quality::Invalid, "value {value:?}");
        }
    }

    #[test]
    fn humidity_outside_percent_range_is_invalid() {
        let validator = Validator::default();
        let quality = validator.check(
            &reading(Variable::Humidity, 0, Some(104.0)),
            None,
            RequestKind::Current,
            now(),
        );
        assert_eq!(quality, Quality::Invalid);
    }

    #[test]
    fn in_bounds_single_reading_is_ok() {
        let validator = Validator::default();
        let quality = validator.check(
            &reading(Variable::Pressure, 10, Some(1013.0)),
            None,
            RequestKind::Current,
            now(),
        );
        assert_eq!(quality, Quality::Ok);
    }

    #[test]
    fn temperature_jump_is_suspect() {
        let validator = Validator::default();
        let previous = reading(Variable::Temperature, 60, Some(18.0));
        let jump = reading(Variable::Temperature, 0, Some(35.0));

        assert_eq!(
            validator.check(&jump, Some(&previous), RequestKind::Forecast, now()),
            Quality::Suspect
        );
    }

    #[test]
    fn wind_direction_wraps_around_north() {
        let validator = Validator::new(
            AnomalyPolicySet::default()
                .with_policy(
                    Variable::WindDirection,
                    AnomalyPolicy::bounded(0.0, 360.0).with_max_rate(90.0),
                )
                .expect("valid bounds"),
            Duration::from_secs(3 * 3600),
        );
        let previous = reading(Variable::WindDirection, 60, Some(355.0));
        let next = reading(Variable::WindDirection, 0, Some(5.0));

        assert_eq!(
            validator.check(&next, Some(&previous), RequestKind::Forecast, now()),
            Quality::Ok
        );
    }

    #[test]
    fn stale_current_reading_is_suspect_but_forecast_is_not() {
        let validator = Validator::default();
        let old = reading(Variable::Temperature, 4 * 60, Some(20.0));

        assert_eq!(
            validator.check(&old, None, RequestKind::Current, now()),
            Quality::Suspect
        );
        assert_eq!(
            validator.check(&old, None, RequestKind::Historical, now()),
            Quality::Ok
        );
    }

    #[test]
    fn annotate_preserves_order_and_skips_invalid_predecessors() {
        let validator = Validator::default();
        let readings = vec![
            reading(Variable::Temperature, 0, Some(21.0)),
            reading(Variable::Temperature, 120, Some(20.0)),
            reading(Variable::Temperature, 60, Some(999.0)),
            reading(Variable::Humidity, 60, None),
        ];

        let graded = validator.annotate(readings.clone(), RequestKind::Forecast, now());

        assert_eq!(graded.len(), readings.len());
        for (graded, original) in graded.iter().zip(&readings) {
            assert_eq!(graded.timestamp, original.timestamp);
            assert_eq!(graded.value.map(f64::to_bits), original.value.map(f64::to_bits));
        }
        assert_eq!(
            graded.iter().map(|r| r.quality).collect::<Vec<_>>(),
            vec![Quality::Ok, Quality::Ok, Quality::Invalid, Quality::Invalid]
        );
    }

    #[test]
    fn inverted_override_is_rejected() {
        let error = AnomalyPolicySet::default()
            .with_policy(Variable::Pressure, AnomalyPolicy::bounded(1100.0, 800.0))
            .expect_err("inverted");
        assert!(matches!(error, ValidationError::InvertedBounds { .. }));
    }
}
