mod protocol;
mod requests_logging;
pub mod server;
pub mod state;
mod websocket;

pub use requests_logging::{log_requests, RequestsLoggingLevel};
pub use server::{make_app, run_server, spawn_maintenance};
pub use state::ServerState;
