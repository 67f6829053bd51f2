use thiserror::Error;

/// Validation and contract errors exposed by `stratus-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("location id cannot be empty")]
    EmptyLocationId,
    #[error("latitude {value} is outside [-90, 90]")]
    LatitudeOutOfRange { value: f64 },
    #[error("longitude {value} is outside [-180, 180]")]
    LongitudeOutOfRange { value: f64 },

    #[error("invalid source '{value}', expected one of open_meteo, openweather, meteosource")]
    InvalidSource { value: String },
    #[error("invalid variable '{value}'")]
    InvalidVariable { value: String },
    #[error("variable set must contain at least one variable")]
    EmptyVariableSet,

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("window start {start} is after window end {end}")]
    InvertedWindow { start: String, end: String },
    #[error("anomaly bounds for '{variable}' are inverted (min {min} > max {max})")]
    InvertedBounds { variable: &'static str, min: f64, max: f64 },
}

/// Errors raised while persisting or restoring the cache snapshot file.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache snapshot could not be persisted: {0}")]
    Persist(#[from] tempfile::PersistError),
}
