use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock as _, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::config::ProviderPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Local quota gate for one provider.
///
/// Rejects calls before they reach the network once the configured quota is
/// spent, returning how long until the next call would be admitted.
pub struct QuotaGate {
    limiter: DirectRateLimiter,
    clock: DefaultClock,
}

impl QuotaGate {
    pub fn new(quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_from_window(quota_window, quota_limit)),
            clock: DefaultClock::default(),
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.quota_window, policy.quota_limit)
    }

    /// Takes one unit of quota, or returns the wait until one is available.
    pub fn acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl std::fmt::Debug for QuotaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGate").finish_non_exhaustive()
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_once_quota_is_spent() {
        let gate = QuotaGate::new(Duration::from_secs(60), 2);

        assert!(gate.acquire().is_ok());
        assert!(gate.acquire().is_ok());

        let wait = gate.acquire().expect_err("third call exceeds quota");
        assert!(wait > Duration::from_secs(20));
        assert!(wait <= Duration::from_secs(30));
    }

    #[test]
    fn zero_limit_still_admits_one_call() {
        let gate = QuotaGate::new(Duration::from_secs(3600), 0);
        assert!(gate.acquire().is_ok());
        assert!(gate.acquire().is_err());
    }
}
