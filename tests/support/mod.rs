//! Scripted weather sources shared by the behaviour tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stratus_core::{
    CapabilitySet, Clock, ForecastBatch, Location, ManualClock, NormalizedReading, ProviderId,
    SourceError, SourceFuture, UtcDateTime, Variable, WeatherSource,
};

/// In-memory source that replays one scripted outcome and counts invocations.
pub struct ScriptedSource {
    id: ProviderId,
    capabilities: CapabilitySet,
    clock: Arc<dyn Clock>,
    outcome: Mutex<Result<Vec<(Variable, f64)>, SourceError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(id: ProviderId, clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_capabilities(id, clock, CapabilitySet::new(true, true, true, 7))
    }

    pub fn with_capabilities(
        id: ProviderId,
        clock: Arc<dyn Clock>,
        capabilities: CapabilitySet,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            capabilities,
            clock,
            outcome: Mutex::new(Ok(vec![
                (Variable::Temperature, 21.5),
                (Variable::Humidity, 68.0),
            ])),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeed_with(&self, values: Vec<(Variable, f64)>) {
        *self.outcome.lock().expect("script lock") = Ok(values);
    }

    pub fn fail_with(&self, error: SourceError) {
        *self.outcome.lock().expect("script lock") = Err(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("script lock") = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self, location: &Location) -> Result<Vec<NormalizedReading>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("script lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcome.lock().expect("script lock").clone();
        let now = self.clock.now();
        outcome.map(|values| {
            values
                .into_iter()
                .map(|(variable, value)| {
                    NormalizedReading::new(location, now, variable, Some(value), self.id)
                })
                .collect()
        })
    }
}

impl WeatherSource for ScriptedSource {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn fetch_current<'a>(&'a self, location: &'a Location) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(self.run(location))
    }

    fn fetch_forecast<'a>(
        &'a self,
        location: &'a Location,
        horizon_days: u16,
    ) -> SourceFuture<'a, ForecastBatch> {
        Box::pin(async move {
            let readings = self.run(location).await?;
            Ok(ForecastBatch {
                readings,
                requested_horizon_days: horizon_days,
                horizon_days: self.capabilities.clamp_horizon(horizon_days),
            })
        })
    }

    fn fetch_historical<'a>(
        &'a self,
        location: &'a Location,
        _start: UtcDateTime,
        _end: UtcDateTime,
    ) -> SourceFuture<'a, Vec<NormalizedReading>> {
        Box::pin(self.run(location))
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        UtcDateTime::parse("2024-06-01T12:00:00Z").expect("valid timestamp"),
    ))
}

pub fn medellin() -> Location {
    Location::new("medellin", "Medellín", 6.2442, -75.5812).expect("valid location")
}

pub fn bogota() -> Location {
    Location::new("bogota", "Bogotá", 4.711, -74.0721).expect("valid location")
}
