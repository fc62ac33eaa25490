//! Toolhub Server Library
//!
//! This library exposes the serving core and the HTTP surface for testing
//! and embedding.

pub mod broadcast;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod streams;
pub mod tools;

// Re-export commonly used types for convenience
pub use context::ServerContext;
pub use dispatch::{Dispatcher, ToolRegistry};
pub use error::ServeError;
pub use server::{run_server, RequestsLoggingLevel};
