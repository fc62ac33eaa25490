//! Client session tracking.
//!
//! One record per known `client_id`, created lazily on first contact and
//! swept after a period of inactivity. The registry is sharded (one lock
//! per shard), so unrelated clients never contend on the same lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::clock::SharedClock;

/// Token-bucket state for a single client.
///
/// Owned by the session; only the rate limiter mutates it, and only through
/// [`SessionRegistry::with_session`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitState {
    pub tokens_minute: f64,
    pub tokens_hour: f64,
    pub burst_tokens: f64,
    pub last_refill_minute: Instant,
    pub last_refill_hour: Instant,
    pub cooldown_until: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub client_id: String,
    pub created_at: Instant,
    pub last_seen_at: Instant,
    /// Absent until the rate limiter sees this client for the first time.
    pub rate_limit: Option<RateLimitState>,
}

impl ClientSession {
    fn new(client_id: &str, now: Instant) -> Self {
        Self {
            client_id: client_id.to_string(),
            created_at: now,
            last_seen_at: now,
            rate_limit: None,
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen_at)
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, ClientSession>,
    clock: SharedClock,
}

impl SessionRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Returns a snapshot of the session, creating it if needed.
    pub fn get_or_create(&self, client_id: &str) -> ClientSession {
        let now = self.clock.now();
        self.sessions
            .entry(client_id.to_string())
            .or_insert_with(|| {
                debug!("New session for client {}", client_id);
                ClientSession::new(client_id, now)
            })
            .clone()
    }

    /// Marks the client as seen now, creating the session on first contact.
    pub fn touch(&self, client_id: &str) {
        let now = self.clock.now();
        self.sessions
            .entry(client_id.to_string())
            .and_modify(|session| {
                if now > session.last_seen_at {
                    session.last_seen_at = now;
                }
            })
            .or_insert_with(|| {
                debug!("New session for client {}", client_id);
                ClientSession::new(client_id, now)
            });
    }

    /// Runs `f` against the client's session while holding that client's shard lock.
    pub fn with_session<R>(
        &self,
        client_id: &str,
        now: Instant,
        f: impl FnOnce(&mut ClientSession) -> R,
    ) -> R {
        let mut entry = self
            .sessions
            .entry(client_id.to_string())
            .or_insert_with(|| ClientSession::new(client_id, now));
        f(entry.value_mut())
    }

    pub fn get(&self, client_id: &str) -> Option<ClientSession> {
        self.sessions.get(client_id).map(|s| s.clone())
    }

    /// Removes sessions idle for longer than `max_idle`. Returns the number removed.
    pub fn sweep(&self, now: Instant, max_idle: Duration) -> usize {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = session.idle_for(now) <= max_idle;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!("Swept {} idle sessions", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
