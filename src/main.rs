use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolhub_server::clock::SystemClock;
use toolhub_server::config;
use toolhub_server::context::ServerContext;
use toolhub_server::dispatch::{Dispatcher, ToolRegistry};
use toolhub_server::server::{run_server, RequestsLoggingLevel};
use toolhub_server::tools::register_all_tools;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// URL of the backend service that executes forwarded operations.
    #[clap(long)]
    pub backend_url: Option<String>,

    /// Timeout in seconds for backend requests.
    #[clap(long, default_value_t = 30)]
    pub backend_timeout_sec: u64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            port: args.port,
            logging_level: args.logging_level.clone(),
            backend_url: args.backend_url.clone(),
            backend_timeout_sec: args.backend_timeout_sec,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration:");
    info!("  port: {}", app_config.port);
    info!("  logging_level: {}", app_config.logging_level);
    info!("  backend_url: {:?}", app_config.backend_url);
    info!("  core: {:?}", app_config.core);

    let context = Arc::new(ServerContext::new(
        app_config.core.clone(),
        Arc::new(SystemClock),
    )?);

    let mut registry = ToolRegistry::new();
    register_all_tools(&mut registry, &app_config)?;
    info!("Registered {} tools", registry.len());

    let dispatcher = Arc::new(Dispatcher::new(context, registry));
    let shutdown_token = CancellationToken::new();

    info!("Ready to serve at port {}!", app_config.port);

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            signal_token.cancel();
        }
    });

    let result = run_server(&app_config, dispatcher, shutdown_token).await;
    info!("HTTP server stopped: {:?}", result);
    result
}
