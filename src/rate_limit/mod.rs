//! Per-client rate limiting for tool calls.
//!
//! Token buckets keyed by `client_id`: a per-minute bucket, a per-hour bucket
//! and a burst allowance that is spent before either of them. Buckets refill
//! continuously. A denial starts a cooldown during which every call is
//! rejected without looking at the buckets.
//!
//! Continuous refill means a client can empty a full minute bucket and then
//! spend what trickles back in during the same minute: any rolling minute
//! admits fewer than `2 * per_minute + burst * 61 / 60` calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::CoreConfig;
use crate::session::{RateLimitState, SessionRegistry};

const MINUTE: f64 = 60.0;
const HOUR: f64 = 3600.0;

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
    pub burst: u32,
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            burst: 10,
            cooldown: Duration::from_secs(5),
        }
    }
}

impl From<&CoreConfig> for RateLimitConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            per_minute: config.rate_limit_per_minute,
            per_hour: config.rate_limit_per_hour,
            burst: config.rate_limit_burst,
            cooldown: config.rate_limit_cooldown,
        }
    }
}

/// Which allowance paid for an admitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Burst,
    /// One token from the minute bucket and one from the hour bucket.
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { bucket: Bucket },
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Rate limiter for tool calls.
///
/// Holds no per-client state of its own; everything lives in the session
/// registry and is mutated under that client's shard lock.
pub struct RateLimiter {
    config: RateLimitConfig,
    sessions: Arc<SessionRegistry>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, sessions: Arc<SessionRegistry>) -> Self {
        Self { config, sessions }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether `client_id` may make a call at `now`, and charge for it if so.
    pub fn admit(&self, client_id: &str, now: Instant) -> Admission {
        self.sessions.with_session(client_id, now, |session| {
            let state = session
                .rate_limit
                .get_or_insert_with(|| self.full_state(now));
            let admission = self.admit_state(state, now);
            self.check_invariants(state, now);
            admission
        })
    }

    /// Current bucket state for a client (for debugging/metrics)
    pub fn usage(&self, client_id: &str) -> Option<RateLimitState> {
        self.sessions
            .get(client_id)
            .and_then(|session| session.rate_limit)
    }

    fn admit_state(&self, state: &mut RateLimitState, now: Instant) -> Admission {
        if let Some(until) = state.cooldown_until {
            if until > now {
                return Admission::Denied {
                    retry_after: until - now,
                };
            }
            state.cooldown_until = None;
        }

        self.refill(state, now);

        if state.burst_tokens >= 1.0 {
            state.burst_tokens -= 1.0;
            return Admission::Allowed {
                bucket: Bucket::Burst,
            };
        }

        if state.tokens_minute >= 1.0 && state.tokens_hour >= 1.0 {
            state.tokens_minute -= 1.0;
            state.tokens_hour -= 1.0;
            return Admission::Allowed {
                bucket: Bucket::Steady,
            };
        }

        let token_wait = self.time_to_steady_token(state);
        if !self.config.cooldown.is_zero() {
            state.cooldown_until = Some(now + self.config.cooldown);
        }
        let retry_after = token_wait.max(self.config.cooldown);
        debug!(
            "Denied call: {:.2} minute / {:.2} hour tokens left, retry after {:?}",
            state.tokens_minute, state.tokens_hour, retry_after
        );
        Admission::Denied { retry_after }
    }

    fn full_state(&self, now: Instant) -> RateLimitState {
        RateLimitState {
            tokens_minute: self.config.per_minute as f64,
            tokens_hour: self.config.per_hour as f64,
            burst_tokens: self.config.burst as f64,
            last_refill_minute: now,
            last_refill_hour: now,
            cooldown_until: None,
        }
    }

    fn refill(&self, state: &mut RateLimitState, now: Instant) {
        let per_minute = self.config.per_minute as f64;
        let per_hour = self.config.per_hour as f64;
        let burst = self.config.burst as f64;

        let minute_elapsed = now
            .saturating_duration_since(state.last_refill_minute)
            .as_secs_f64();
        state.tokens_minute = (state.tokens_minute + minute_elapsed * per_minute / MINUTE).min(per_minute);
        if now > state.last_refill_minute {
            state.last_refill_minute = now;
        }

        // Burst refills over the hour window, alongside the hour bucket.
        let hour_elapsed = now
            .saturating_duration_since(state.last_refill_hour)
            .as_secs_f64();
        state.tokens_hour = (state.tokens_hour + hour_elapsed * per_hour / HOUR).min(per_hour);
        state.burst_tokens = (state.burst_tokens + hour_elapsed * burst / HOUR).min(burst);
        if now > state.last_refill_hour {
            state.last_refill_hour = now;
        }
    }

    fn time_to_steady_token(&self, state: &RateLimitState) -> Duration {
        let wait = |tokens: f64, capacity: u32, window: f64| -> f64 {
            if tokens >= 1.0 || capacity == 0 {
                0.0
            } else {
                (1.0 - tokens) * window / capacity as f64
            }
        };
        let minute = wait(state.tokens_minute, self.config.per_minute, MINUTE);
        let hour = wait(state.tokens_hour, self.config.per_hour, HOUR);
        Duration::from_secs_f64(minute.max(hour))
    }

    fn check_invariants(&self, state: &RateLimitState, now: Instant) {
        debug_assert!(
            state.tokens_minute >= 0.0 && state.tokens_minute <= self.config.per_minute as f64,
            "minute bucket out of range: {}",
            state.tokens_minute
        );
        debug_assert!(
            state.tokens_hour >= 0.0 && state.tokens_hour <= self.config.per_hour as f64,
            "hour bucket out of range: {}",
            state.tokens_hour
        );
        debug_assert!(
            state.burst_tokens >= 0.0 && state.burst_tokens <= self.config.burst as f64,
            "burst allowance out of range: {}",
            state.burst_tokens
        );
        debug_assert!(
            state.cooldown_until.map_or(true, |until| until >= now),
            "cooldown set in the past"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn limiter(config: RateLimitConfig) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let sessions = Arc::new(SessionRegistry::new(clock.clone()));
        (clock, RateLimiter::new(config, sessions))
    }

    fn config(per_minute: u32, per_hour: u32, burst: u32, cooldown_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            per_minute,
            per_hour,
            burst,
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    #[test]
    fn test_third_call_in_minute_is_denied() {
        let (clock, limiter) = limiter(config(2, 100, 0, 5));
        let now = clock.now();

        assert!(limiter.admit("c1", now).is_allowed());
        assert!(limiter.admit("c1", now).is_allowed());
        match limiter.admit("c1", now) {
            Admission::Denied { retry_after } => assert!(retry_after > Duration::ZERO),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_burst_is_spent_before_steady_buckets() {
        let (clock, limiter) = limiter(config(5, 100, 2, 5));
        let now = clock.now();

        assert_eq!(
            limiter.admit("c1", now),
            Admission::Allowed { bucket: Bucket::Burst }
        );
        assert_eq!(
            limiter.admit("c1", now),
            Admission::Allowed { bucket: Bucket::Burst }
        );
        assert_eq!(
            limiter.admit("c1", now),
            Admission::Allowed { bucket: Bucket::Steady }
        );

        let usage = limiter.usage("c1").unwrap();
        assert_eq!(usage.burst_tokens, 0.0);
        assert_eq!(usage.tokens_minute, 4.0);
        assert_eq!(usage.tokens_hour, 99.0);
    }

    #[test]
    fn test_admissions_at_one_instant_never_exceed_minute_plus_burst() {
        let (clock, limiter) = limiter(config(7, 1000, 3, 1));
        let now = clock.now();

        let admitted = (0..50)
            .filter(|_| limiter.admit("c1", now).is_allowed())
            .count();

        assert_eq!(admitted, 10);
    }

    /// Admission instants (ms since start) for two calls per second over `secs`.
    fn admissions_over(limiter: &RateLimiter, clock: &ManualClock, secs: u64) -> Vec<u64> {
        let mut admitted = vec![];
        for t in 0..secs {
            clock.set_elapsed(Duration::from_secs(t));
            for _ in 0..2 {
                if limiter.admit("c1", clock.now()).is_allowed() {
                    admitted.push(t * 1000);
                }
            }
        }
        admitted
    }

    fn max_in_any_minute(admitted: &[u64]) -> usize {
        admitted
            .iter()
            .map(|&start| {
                admitted
                    .iter()
                    .filter(|&&t| t >= start && t < start + 60_000)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_rolling_minute_stays_below_refill_bound() {
        for (per_minute, burst) in [(2u32, 0u32), (3, 2), (10, 5)] {
            let (clock, limiter) = limiter(config(per_minute, 10_000, burst, 5));
            let admitted = admissions_over(&limiter, &clock, 240);

            let bound = 2.0 * per_minute as f64 + burst as f64 * 61.0 / 60.0;
            let worst = max_in_any_minute(&admitted);
            assert!(
                (worst as f64) < bound,
                "{} admissions in one minute, bound {}",
                worst,
                bound
            );
            // A full bucket is always usable up front.
            assert!(worst >= (per_minute + burst) as usize);
        }
    }

    #[test]
    fn test_cooldown_blocks_even_when_tokens_refilled() {
        let (clock, limiter) = limiter(config(60, 1000, 0, 10));
        let t0 = clock.now();
        for _ in 0..60 {
            assert!(limiter.admit("c1", t0).is_allowed());
        }
        assert!(!limiter.admit("c1", t0).is_allowed());

        // Five seconds refills five tokens, but the cooldown still holds.
        clock.advance(Duration::from_secs(5));
        match limiter.admit("c1", clock.now()) {
            Admission::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(5))
            }
            other => panic!("expected denial, got {:?}", other),
        }
        let usage = limiter.usage("c1").unwrap();
        assert!(usage.tokens_minute < 1.0);

        clock.advance(Duration::from_secs(6));
        assert!(limiter.admit("c1", clock.now()).is_allowed());
        let usage = limiter.usage("c1").unwrap();
        assert!((usage.tokens_minute - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (clock, limiter) = limiter(config(3, 1000, 0, 0));
        let now = clock.now();
        limiter.admit("c1", now);

        clock.advance(Duration::from_secs(3600));
        limiter.admit("c1", clock.now());

        let usage = limiter.usage("c1").unwrap();
        assert_eq!(usage.tokens_minute, 2.0);
    }

    #[test]
    fn test_hour_bucket_is_enforced() {
        let (clock, limiter) = limiter(config(100, 3, 0, 0));
        let now = clock.now();

        for _ in 0..3 {
            assert!(limiter.admit("c1", now).is_allowed());
        }
        match limiter.admit("c1", now) {
            // One hour token every 20 minutes.
            Admission::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1200))
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_clients_do_not_share_budget() {
        let (clock, limiter) = limiter(config(2, 100, 0, 5));
        let now = clock.now();

        limiter.admit("c1", now);
        limiter.admit("c1", now);
        assert!(!limiter.admit("c1", now).is_allowed());

        assert!(limiter.admit("c2", now).is_allowed());
        assert!(limiter.admit("c2", now).is_allowed());
    }

    #[test]
    fn test_unknown_client_starts_with_full_buckets() {
        let (clock, limiter) = limiter(config(4, 40, 1, 5));
        assert!(limiter.usage("new").is_none());

        limiter.admit("new", clock.now());

        let usage = limiter.usage("new").unwrap();
        assert_eq!(usage.burst_tokens, 0.0);
        assert_eq!(usage.tokens_minute, 4.0);
        assert_eq!(usage.tokens_hour, 40.0);
    }

    #[test]
    fn test_zero_cooldown_never_sets_cooldown() {
        let (clock, limiter) = limiter(config(1, 100, 0, 0));
        let now = clock.now();
        limiter.admit("c1", now);
        assert!(!limiter.admit("c1", now).is_allowed());
        assert!(limiter.usage("c1").unwrap().cooldown_until.is_none());

        clock.advance(Duration::from_secs(60));
        assert!(limiter.admit("c1", clock.now()).is_allowed());
    }
}
