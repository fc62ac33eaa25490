//! WebSocket route handler.
//!
//! Handles WebSocket upgrade, message loop, and cleanup.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::broadcast::messages::{
    calls::{CallRequest, CallResult, ReadRequest},
    msg_types, system, topics, ClientMessage, ServerMessage,
};
use crate::broadcast::{BroadcastHub, Connection, ConnectionId};
use crate::dispatch::{ToolCall, ToolResponse};
use crate::server::protocol::{dispatch_result, read_result};
use crate::server::state::ServerState;
use crate::streams::StreamHandle;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub client_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// This is the route handler for `GET /v1/ws?client_id=...`.
pub async fn ws_handler(
    Query(params): Query<WsParams>,
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = match params.client_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            warn!("WebSocket connection attempt without client_id");
            return (
                StatusCode::BAD_REQUEST,
                "client_id required for WebSocket connection",
            )
                .into_response();
        }
    };

    debug!("WebSocket upgrade for client {}", client_id);
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, client_id: String, state: ServerState) {
    let context = state.context.clone();
    context.sessions.touch(&client_id);

    // Register connection and get receiver for outgoing messages
    let (connection, outgoing_rx) = context.hub.connect(&client_id);
    debug!(
        "WebSocket connected: client {} connection {}",
        client_id,
        connection.id()
    );

    let (ws_sink, ws_stream) = socket.split();

    let connected_msg = ServerMessage::new(
        msg_types::CONNECTED,
        system::Connected {
            connection_id: connection.id(),
            client_id: client_id.clone(),
            server_version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        },
    );

    // Spawn task to forward outgoing messages to WebSocket
    let outgoing_handle = tokio::spawn(forward_outgoing(ws_sink, outgoing_rx, connected_msg));

    process_incoming(ws_stream, &connection, &state).await;

    debug!(
        "WebSocket disconnected: client {} connection {}",
        client_id,
        connection.id()
    );
    outgoing_handle.abort();

    // Unsubscribes everything and cancels pending reads.
    drop(connection);
}

/// Forward messages from the outgoing channel to the WebSocket.
async fn forward_outgoing(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<ServerMessage>,
    initial_msg: ServerMessage,
) {
    // Send initial connected message
    if let Ok(json) = serde_json::to_string(&initial_msg) {
        if ws_sink.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    // Forward all subsequent messages
    while let Some(msg) = outgoing_rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to serialize WebSocket message: {}", e);
            }
        }
    }
}

/// Process incoming messages from the WebSocket.
async fn process_incoming(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    connection: &Connection,
    state: &ServerState,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(msg, connection, state).await,
                Err(e) => {
                    debug!("Failed to parse client message: {}", e);
                    send_error(
                        connection,
                        "parse_error",
                        format!("Invalid message format: {}", e),
                    )
                    .await;
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                // Axum/tungstenite handles pong automatically
                debug!("Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!("Received pong");
            }
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Err(e) => {
                debug!("WebSocket error: {}", e);
                break;
            }
        }
    }
}

async fn send_error(connection: &Connection, code: &str, message: String) {
    let error_msg = ServerMessage::new(msg_types::ERROR, system::Error::new(code, message));
    let _ = connection.send(error_msg).await;
}

/// Handle a parsed client message.
async fn handle_client_message(msg: ClientMessage, connection: &Connection, state: &ServerState) {
    state.context.sessions.touch(connection.client_id());

    match msg.msg_type.as_str() {
        msg_types::PING => {
            let ping: system::Ping = serde_json::from_value(msg.payload).unwrap_or_default();
            let pong = ServerMessage::new(
                msg_types::PONG,
                system::Pong {
                    timestamp: ping.timestamp,
                },
            );
            let _ = connection.send(pong).await;
        }
        msg_types::SUBSCRIBE => {
            match serde_json::from_value::<topics::SubscriptionRequest>(msg.payload) {
                Ok(request) => match connection.subscribe(&request.stream_or_topic) {
                    Ok(()) => {
                        let _ = connection
                            .send(ServerMessage::new(msg_types::SUBSCRIBED, request))
                            .await;
                    }
                    Err(e) => send_error(connection, e.kind(), e.to_string()).await,
                },
                Err(e) => {
                    send_error(
                        connection,
                        "invalid_message",
                        format!("Invalid subscribe payload: {}", e),
                    )
                    .await
                }
            }
        }
        msg_types::UNSUBSCRIBE => {
            match serde_json::from_value::<topics::SubscriptionRequest>(msg.payload) {
                Ok(request) => {
                    connection.unsubscribe(&request.stream_or_topic);
                    let _ = connection
                        .send(ServerMessage::new(msg_types::UNSUBSCRIBED, request))
                        .await;
                }
                Err(e) => {
                    send_error(
                        connection,
                        "invalid_message",
                        format!("Invalid unsubscribe payload: {}", e),
                    )
                    .await
                }
            }
        }
        msg_types::CALL => match serde_json::from_value::<CallRequest>(msg.payload) {
            Ok(request) => {
                let responder = Responder::new(state.context.hub.clone(), connection.id());
                let call = ToolCall {
                    client_id: connection.client_id().to_string(),
                    operation: request.operation,
                    params: request.params.unwrap_or_default(),
                    stream: request.stream,
                    bypass_cache: request.bypass_cache,
                };
                let dispatcher = state.dispatcher.clone();
                // The socket keeps reading while the call runs.
                tokio::spawn(async move {
                    let response = match dispatcher.dispatch(call).await {
                        Ok(outcome) => ToolResponse::success(dispatch_result(outcome)),
                        Err(e) => ToolResponse::failure(&e),
                    };
                    responder.reply(request.id, response).await;
                });
            }
            Err(e) => {
                send_error(
                    connection,
                    "invalid_message",
                    format!("Invalid call payload: {}", e),
                )
                .await
            }
        },
        msg_types::READ => match serde_json::from_value::<ReadRequest>(msg.payload) {
            Ok(request) => {
                let responder = Responder::new(state.context.hub.clone(), connection.id());
                let context = state.context.clone();
                let cancel = connection.cancellation().clone();
                let timeout = Duration::from_millis(
                    request
                        .timeout_ms
                        .unwrap_or(state.max_read_timeout_ms)
                        .min(state.max_read_timeout_ms),
                );
                tokio::spawn(async move {
                    let handle = StreamHandle::from(request.stream);
                    let response = match context
                        .streams
                        .read_cancellable(&handle, request.since, timeout, &cancel)
                        .await
                    {
                        Ok(outcome) => ToolResponse::success(read_result(outcome)),
                        Err(e) => {
                            context.monitor.record_error(e.kind());
                            ToolResponse::failure(&e)
                        }
                    };
                    responder.reply(request.id, response).await;
                });
            }
            Err(e) => {
                send_error(
                    connection,
                    "invalid_message",
                    format!("Invalid read payload: {}", e),
                )
                .await
            }
        },
        other => {
            debug!("Unknown message type: {}", other);
            send_error(
                connection,
                "unknown_type",
                format!("Unknown message type: {}", other),
            )
            .await;
        }
    }
}

/// Sends a `result` back to a connection from a spawned task without keeping
/// the connection alive.
struct Responder {
    hub: Arc<BroadcastHub>,
    connection_id: ConnectionId,
}

impl Responder {
    fn new(hub: Arc<BroadcastHub>, connection_id: ConnectionId) -> Self {
        Self { hub, connection_id }
    }

    async fn reply(&self, id: Option<serde_json::Value>, response: ToolResponse) {
        let msg = ServerMessage::new(msg_types::RESULT, CallResult { id, response });
        if self.hub.send_to(self.connection_id, msg).await.is_err() {
            debug!(
                "Connection {} went away before its result was ready",
                self.connection_id
            );
        }
    }
}
