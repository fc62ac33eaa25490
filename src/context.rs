//! The explicit server context.
//!
//! Constructed once at startup and shared by reference; every serving
//! component lives here instead of in process-wide globals.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::broadcast::BroadcastHub;
use crate::cache::CacheManager;
use crate::clock::SharedClock;
use crate::config::CoreConfig;
use crate::metrics::{Gauges, PerformanceMonitor, PerformanceSnapshot};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::session::SessionRegistry;
use crate::streams::StreamRegistry;

pub struct ServerContext {
    pub config: CoreConfig,
    pub clock: SharedClock,
    pub sessions: Arc<SessionRegistry>,
    pub limiter: RateLimiter,
    pub cache: CacheManager,
    pub streams: Arc<StreamRegistry>,
    pub hub: Arc<BroadcastHub>,
    pub monitor: PerformanceMonitor,
}

/// Telemetry surface: the performance snapshot plus registry sizes.
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    #[serde(flatten)]
    pub performance: PerformanceSnapshot,
    pub cache_entries: usize,
    pub cache_capacity: usize,
    pub active_sessions: usize,
    pub active_streams: usize,
    pub active_connections: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub sessions_swept: usize,
    pub streams_abandoned: usize,
    pub cache_entries_purged: usize,
}

impl ServerContext {
    pub fn new(config: CoreConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionRegistry::new(clock.clone()));
        let limiter = RateLimiter::new(RateLimitConfig::from(&config), sessions.clone());
        let cache = CacheManager::new(
            config.cache_max_entries,
            config.cache_default_ttl,
            clock.clone(),
        );
        let streams = Arc::new(StreamRegistry::new(
            config.stream_idle_timeout,
            clock.clone(),
        ));
        let hub = Arc::new(BroadcastHub::new(clock.clone()));
        let monitor = PerformanceMonitor::new(clock.clone())?;

        Ok(Self {
            config,
            clock,
            sessions,
            limiter,
            cache,
            streams,
            hub,
            monitor,
        })
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            performance: self.monitor.snapshot(),
            cache_entries: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            active_sessions: self.sessions.len(),
            active_streams: self.streams.active_count(),
            active_connections: self.hub.connection_count(),
        }
    }

    /// One pass of housekeeping: idle sessions, idle streams, expired cache
    /// entries, then a gauge refresh.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let sessions_swept = self.sessions.sweep(now, self.config.session_max_idle);
        let streams_abandoned = self.streams.sweep_idle();
        let cache_entries_purged = self.cache.purge_expired().unwrap_or_else(|e| {
            warn!("Skipping cache purge: {}", e);
            0
        });

        self.refresh_gauges();

        let report = MaintenanceReport {
            sessions_swept,
            streams_abandoned,
            cache_entries_purged,
        };
        debug!("Maintenance pass: {:?}", report);
        report
    }

    pub fn refresh_gauges(&self) {
        self.monitor.set_gauges(Gauges {
            sessions: self.sessions.len(),
            streams: self.streams.active_count(),
            cache_entries: self.cache.len(),
            connections: self.hub.connection_count(),
        });
    }
}
