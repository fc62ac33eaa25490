//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own serving core and a small
//! set of test tools next to the built-in ones.

use super::constants::*;
use anyhow::anyhow;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use toolhub_server::clock::SystemClock;
use toolhub_server::config::CoreConfig;
use toolhub_server::context::ServerContext;
use toolhub_server::dispatch::{Dispatcher, ToolBuilder, ToolContext, ToolRegistry};
use toolhub_server::server::{make_app, RequestsLoggingLevel, ServerState};
use toolhub_server::tools::builtin;

/// Test server instance
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Direct access to the serving core
    pub context: Arc<ServerContext>,

    /// How many times the handler of [`COUNTED_TOOL`] ran
    pub counted_calls: Arc<AtomicUsize>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with the default core config
    pub async fn spawn() -> Self {
        Self::spawn_with(CoreConfig::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the port cannot be bound or the server doesn't become ready
    /// within [`SERVER_READY_TIMEOUT_MS`].
    pub async fn spawn_with(core: CoreConfig) -> Self {
        let context = Arc::new(
            ServerContext::new(core, Arc::new(SystemClock)).expect("Failed to build context"),
        );

        let counted_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        builtin::register_tools(&mut registry).expect("Failed to register built-in tools");
        register_test_tools(&mut registry, counted_calls.clone());

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let dispatcher = Arc::new(Dispatcher::new(context.clone(), registry));
        let app = make_app(ServerState::new(dispatcher, RequestsLoggingLevel::None));

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            context,
            counted_calls,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// WebSocket URL for `client_id`
    pub fn ws_url(&self, client_id: &str) -> String {
        format!("ws://127.0.0.1:{}/v1/ws?client_id={}", self.port, client_id)
    }

    /// Waits for the server to become ready by polling the root endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn register_test_tools(registry: &mut ToolRegistry, counted_calls: Arc<AtomicUsize>) {
    registry
        .register(
            ToolBuilder::new(COUNTED_TOOL)
                .description("Counts handler invocations")
                .cacheable(Some(Duration::from_secs(60)))
                .build(move |_ctx, params| {
                    let counted_calls = counted_calls.clone();
                    async move {
                        let n = counted_calls.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok(json!({ "params": params, "invocation": n }))
                    }
                }),
        )
        .expect("Failed to register counted tool");

    registry
        .register(
            ToolBuilder::new(FAILING_TOOL)
                .build(|_ctx, _params| async move { Err(anyhow!(FAILING_TOOL_MESSAGE)) }),
        )
        .expect("Failed to register failing tool");

    registry
        .register(ToolBuilder::new(SCENES_TOOL).build(scenes_handler))
        .expect("Failed to register scenes tool");
}

/// Streams one chunk per scene; called without a stream it returns them all.
async fn scenes_handler(ctx: ToolContext, _params: Value) -> anyhow::Result<Value> {
    let scenes = (1..=SCENE_COUNT).map(|scene| json!({ "scene": scene }));
    match &ctx.stream {
        Some(stream) => {
            for scene in scenes {
                tokio::time::sleep(Duration::from_millis(SCENE_DELAY_MS)).await;
                stream.push(scene)?;
            }
            Ok(Value::Null)
        }
        None => Ok(Value::Array(scenes.collect())),
    }
}
