//! Real-time delivery: connection registry, topic subscriptions and the
//! message types spoken on the channel.

mod connection;
mod hub;
pub mod messages;

pub use connection::{Connection, SendError};
pub use hub::{BroadcastHub, ConnectionId, Subscription};
