mod file_config;

pub use file_config::{FileConfig, ToolConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::collections::HashSet;
use std::time::Duration;

/// Settings of the serving core: rate limiting, caching, streams and sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Steady-state minute-bucket capacity.
    pub rate_limit_per_minute: u32,
    /// Steady-state hour-bucket capacity.
    pub rate_limit_per_hour: u32,
    /// Extra allowance spent before the steady-state buckets.
    pub rate_limit_burst: u32,
    /// How long a denied client is blocked outright.
    pub rate_limit_cooldown: Duration,
    pub cache_max_entries: usize,
    /// TTL for cacheable operations that do not declare their own.
    pub cache_default_ttl: Duration,
    /// Producer/reader silence after which a stream is abandoned.
    pub stream_idle_timeout: Duration,
    /// Inactivity after which a client session is swept.
    pub session_max_idle: Duration,
    pub maintenance_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 1000,
            rate_limit_burst: 10,
            rate_limit_cooldown: Duration::from_secs(5),
            cache_max_entries: 1000,
            cache_default_ttl: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(60),
            session_max_idle: Duration::from_secs(3600),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_per_minute == 0 {
            bail!("rate_limit_per_minute must be greater than zero");
        }
        if self.rate_limit_per_hour == 0 {
            bail!("rate_limit_per_hour must be greater than zero");
        }
        if self.cache_max_entries == 0 {
            bail!("cache_max_entries must be greater than zero");
        }
        for (name, value) in [
            ("cache_default_ttl", self.cache_default_ttl),
            ("stream_idle_timeout", self.stream_idle_timeout),
            ("session_max_idle", self.session_max_idle),
            ("maintenance_interval", self.maintenance_interval),
        ] {
            if value.is_zero() {
                bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub backend_url: Option<String>,
    pub backend_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub backend_url: Option<String>,
    pub backend_timeout_sec: u64,
    pub core: CoreConfig,
    pub tools: Vec<ToolConfig>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let backend_url = file.backend_url.or_else(|| cli.backend_url.clone());
        let backend_timeout_sec = file.backend_timeout_sec.unwrap_or(cli.backend_timeout_sec);

        let defaults = CoreConfig::default();
        let secs = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        let core = CoreConfig {
            rate_limit_per_minute: file
                .rate_limit_per_minute
                .unwrap_or(defaults.rate_limit_per_minute),
            rate_limit_per_hour: file
                .rate_limit_per_hour
                .unwrap_or(defaults.rate_limit_per_hour),
            rate_limit_burst: file.rate_limit_burst.unwrap_or(defaults.rate_limit_burst),
            rate_limit_cooldown: secs(file.rate_limit_cooldown_secs, defaults.rate_limit_cooldown),
            cache_max_entries: file.cache_max_entries.unwrap_or(defaults.cache_max_entries),
            cache_default_ttl: secs(file.cache_default_ttl_secs, defaults.cache_default_ttl),
            stream_idle_timeout: secs(file.stream_idle_timeout_secs, defaults.stream_idle_timeout),
            session_max_idle: secs(file.session_max_idle_secs, defaults.session_max_idle),
            maintenance_interval: secs(
                file.maintenance_interval_secs,
                defaults.maintenance_interval,
            ),
        };
        core.validate()?;

        let tools = file.tools;
        if !tools.is_empty() && backend_url.is_none() {
            bail!("backend tools are configured but no backend_url was given");
        }
        let mut names = HashSet::new();
        for tool in &tools {
            if tool.name.trim().is_empty() {
                bail!("tool names must not be empty");
            }
            if !names.insert(tool.name.as_str()) {
                bail!("tool {} is declared more than once", tool.name);
            }
        }

        Ok(Self {
            port,
            logging_level,
            backend_url,
            backend_timeout_sec,
            core,
            tools,
        })
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
