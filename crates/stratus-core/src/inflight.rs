//! Collapses concurrent misses for one cache key into a single fetch.
//!
//! The first caller for a key becomes the leader and performs the fetch;
//! later callers subscribe to a `watch` channel and receive the leader's
//! outcome. The registry entry is removed when the leader finishes or is
//! dropped, so a cancelled leader never strands its waiters.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::cache::{CacheEntry, CacheKey};
use crate::data_source::SourceError;

pub type FetchOutcome = Result<Arc<CacheEntry>, SourceError>;

type Slot = watch::Receiver<Option<FetchOutcome>>;

#[derive(Debug, Default, Clone)]
pub struct InflightRegistry {
    slots: Arc<DashMap<CacheKey, Slot>>,
}

/// Result of joining the registry for a key.
#[derive(Debug)]
pub enum Flight {
    Leader(LeaderGuard),
    Waiter(Waiter),
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &CacheKey) -> Flight {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => Flight::Waiter(Waiter {
                receiver: slot.get().clone(),
            }),
            Entry::Vacant(slot) => {
                let (sender, receiver) = watch::channel(None);
                slot.insert(receiver);
                Flight::Leader(LeaderGuard {
                    slots: Arc::clone(&self.slots),
                    key: key.clone(),
                    sender: Some(sender),
                })
            }
        }
    }

    /// Number of keys with a fetch in progress.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Held by the caller performing the fetch. Dropping it without
/// [`complete`](LeaderGuard::complete) abandons the flight.
#[derive(Debug)]
pub struct LeaderGuard {
    slots: Arc<DashMap<CacheKey, Slot>>,
    key: CacheKey,
    sender: Option<watch::Sender<Option<FetchOutcome>>>,
}

impl LeaderGuard {
    /// Publishes the outcome to every waiter.
    pub fn complete(mut self, outcome: FetchOutcome) {
        self.slots.remove(&self.key);
        if let Some(sender) = self.sender.take() {
            // No receivers left is fine; the registry's own copy was just removed.
            let _ = sender.send(Some(outcome));
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.slots.remove(&self.key);
            tracing::debug!(key = %self.key, "in-flight fetch abandoned by its leader");
        }
    }
}

#[derive(Debug)]
pub struct Waiter {
    receiver: watch::Receiver<Option<FetchOutcome>>,
}

impl Waiter {
    /// Waits for the leader's outcome. A leader dropped before completing
    /// yields `ProviderUnavailable`.
    pub async fn outcome(mut self) -> FetchOutcome {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(SourceError::internal("in-flight outcome missing"))),
            Err(_) => Err(SourceError::unavailable("in-flight fetch abandoned")),
        }
    }
}
