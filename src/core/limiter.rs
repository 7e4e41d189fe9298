use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use std::hash::Hash;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type KeyedLimiter<K, C> = RateLimiter<K, DashMapStateStore<K>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Per-key message budget: at most `max_events` at once, refilled evenly over `window`.
///
/// Keys whose budget has fully refilled are dropped on every check, so idle
/// recipients do not accumulate.
pub struct RecipientLimiter<K, C = DefaultClock>
where
    K: Hash + Eq + Clone,
    C: Clock,
{
    inner: KeyedLimiter<K, C>,
}

impl<K> RecipientLimiter<K>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
{
    /// Returns `None` when the budget or the window is zero.
    pub fn new(max_events: u32, window: Duration) -> Option<Self> {
        Self::with_clock(max_events, window, &DefaultClock::default())
    }
}

impl<K, C> RecipientLimiter<K, C>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    C: Clock,
{
    pub fn with_clock(max_events: u32, window: Duration, clock: &C) -> Option<Self> {
        let quota = quota_for_window(max_events, window)?;
        Some(Self {
            inner: RateLimiter::dashmap_with_clock(quota, clock),
        })
    }

    /// Spends one unit of `key`'s budget if any is left.
    pub fn try_acquire(&self, key: &K) -> bool {
        self.inner.retain_recent();
        match self.inner.check_key(key) {
            Ok(()) => true,
            Err(_) => {
                debug!(?key, "Limiter budget exhausted");
                false
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.inner.len()
    }
}

fn quota_for_window(max_events: u32, window: Duration) -> Option<Quota> {
    let burst = NonZeroU32::new(max_events)?;
    let period = window.checked_div(max_events)?;
    Some(Quota::with_period(period)?.allow_burst(burst))
}
