//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per toolhub endpoint. When API routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
    pub client_id: String,
}

impl TestClient {
    pub fn new(base_url: String, client_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            client_id: client_id.to_string(),
        }
    }

    /// POST /v1/tools/call with a raw envelope
    pub async fn call_raw(&self, envelope: Value) -> Response {
        self.client
            .post(format!("{}/v1/tools/call", self.base_url))
            .json(&envelope)
            .send()
            .await
            .expect("Tool call request failed")
    }

    /// Plain (non-streaming) call as this client
    pub async fn call(&self, operation: &str, params: Value) -> Response {
        self.call_raw(json!({
            "operation": operation,
            "params": params,
            "client_id": self.client_id,
        }))
        .await
    }

    /// Streaming call; returns the stream handle
    pub async fn call_streaming(&self, operation: &str, params: Value) -> String {
        let response = self
            .call_raw(json!({
                "operation": operation,
                "params": params,
                "client_id": self.client_id,
                "stream": true,
            }))
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Invalid JSON body");
        body["result"]["stream"]
            .as_str()
            .expect("Streaming call returned no handle")
            .to_string()
    }

    /// GET /v1/streams/{handle}
    pub async fn read_stream(&self, handle: &str, since: u64, timeout_ms: u64) -> Response {
        self.client
            .get(format!(
                "{}/v1/streams/{}?since={}&timeout_ms={}",
                self.base_url, handle, since, timeout_ms
            ))
            .send()
            .await
            .expect("Stream read request failed")
    }

    /// Reads `handle` until end of stream and returns every chunk's data
    pub async fn drain_stream(&self, handle: &str) -> Vec<Value> {
        let mut since = 0;
        let mut items = vec![];
        loop {
            let body: Value = self
                .read_stream(handle, since, 5_000)
                .await
                .json()
                .await
                .expect("Invalid JSON body");
            assert_eq!(body["ok"], true, "stream read failed: {}", body);
            if body["result"]["end_of_stream"] == true {
                return items;
            }
            since = body["result"]["seq"].as_u64().expect("chunk without seq");
            items.push(body["result"]["data"].clone());
        }
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request failed")
    }

    pub async fn telemetry(&self) -> Value {
        self.get("/v1/telemetry")
            .await
            .json()
            .await
            .expect("Invalid telemetry body")
    }
}
