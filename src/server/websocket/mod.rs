//! WebSocket transport for the real-time channel.
//!
//! Connection bookkeeping and fan-out live in [`crate::broadcast`]; this
//! module only moves frames between the socket and the hub.

mod handler;

pub use handler::ws_handler;
