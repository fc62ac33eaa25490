#![allow(dead_code)]

//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestClient, TestServer, TEST_CLIENT};
//!
//! #[tokio::test]
//! async fn test_echo() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone(), TEST_CLIENT);
//!
//!     let response = client.call("echo", serde_json::json!({"a": 1})).await;
//!     assert_eq!(response.status(), reqwest::StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
pub use server::TestServer;
