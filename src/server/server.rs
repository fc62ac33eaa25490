use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::protocol::ApiResponse;
use super::websocket::ws_handler;
use super::{log_requests, state::*, RequestsLoggingLevel};
use crate::config::AppConfig;
use crate::context::ServerContext;
use crate::dispatch::{Dispatcher, ToolCall, ToolCallRequest};
use crate::error::{kinds, ServeError};
use crate::streams::StreamHandle;

/// Used when a stream read does not say how long to wait.
const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub version: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug, Default)]
struct ReadStreamQuery {
    pub since: Option<u64>,
    pub timeout_ms: Option<u64>,
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.context.monitor.uptime()),
        hash: state.hash.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    Json(stats)
}

async fn call_tool(
    State(dispatcher): State<GuardedDispatcher>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            dispatcher
                .server()
                .monitor
                .record_error(kinds::INVALID_REQUEST);
            return ServeError::invalid(rejection.body_text()).into();
        }
    };

    let request = match ToolCallRequest::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            dispatcher.server().monitor.record_error(e.kind());
            return e.into();
        }
    };

    debug!(
        "Tool call {} from {} (stream: {})",
        request.operation, request.client_id, request.stream
    );
    match dispatcher.dispatch(ToolCall::from(request)).await {
        Ok(outcome) => outcome.into(),
        Err(e) => e.into(),
    }
}

async fn read_stream(
    State(state): State<ServerState>,
    Path(handle): Path<String>,
    query: Result<Query<ReadStreamQuery>, QueryRejection>,
) -> ApiResponse {
    let context = &state.context;
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            context
                .monitor
                .record_error(kinds::INVALID_REQUEST);
            return ServeError::invalid(rejection.body_text()).into();
        }
    };

    let timeout_ms = query
        .timeout_ms
        .unwrap_or(DEFAULT_READ_TIMEOUT_MS)
        .min(state.max_read_timeout_ms);
    let handle = StreamHandle::from(handle);

    // A disconnecting HTTP client drops this future, which ends the wait.
    match context
        .streams
        .read(
            &handle,
            query.since.unwrap_or(0),
            Duration::from_millis(timeout_ms),
        )
        .await
    {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            context.monitor.record_error(e.kind());
            e.into()
        }
    }
}

async fn list_tools(State(dispatcher): State<GuardedDispatcher>) -> impl IntoResponse {
    Json(dispatcher.tools().definitions())
}

async fn get_telemetry(State(context): State<GuardedServerContext>) -> impl IntoResponse {
    Json(context.telemetry())
}

async fn get_metrics(State(context): State<GuardedServerContext>) -> impl IntoResponse {
    context.refresh_gauges();
    match context.monitor.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let api_routes: Router = Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/streams/{handle}", get(read_stream))
        .route("/telemetry", get(get_telemetry))
        .route("/ws", get(ws_handler))
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .route("/metrics", get(get_metrics))
        .with_state(state.clone());

    home_router
        .nest("/v1", api_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Runs the periodic sweep over sessions, streams and the cache until
/// `shutdown` fires.
pub fn spawn_maintenance(
    context: Arc<ServerContext>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = context.config.maintenance_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first immediate tick, wait for the first interval
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = context.run_maintenance();
                    if report.sessions_swept > 0 || report.streams_abandoned > 0 {
                        info!(
                            "Swept {} idle sessions and {} idle streams",
                            report.sessions_swept, report.streams_abandoned
                        );
                    }
                }
            }
        }
        debug!("Maintenance loop stopped");
    })
}

pub async fn run_server(
    config: &AppConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = ServerState::new(dispatcher, config.logging_level.clone());
    let maintenance = spawn_maintenance(state.context.clone(), shutdown.clone());
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    info!("Listening on {}", listener.local_addr()?);
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    let _ = maintenance.await;
    Ok(())
}
