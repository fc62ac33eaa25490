//! Real-time channel message types.
//!
//! Every frame is a `{ "type": ..., "payload": ... }` envelope. Payloads are
//! carried as JSON values so feature-specific messages can be added without
//! touching the envelope.

use serde::{Deserialize, Serialize};

/// Server -> Client message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Client -> Server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Clients may omit the payload for simple messages like `ping`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub mod msg_types {
    /// Sent by server on successful connection.
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Acknowledges a subscribe/unsubscribe.
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    /// Server-pushed topic event.
    pub const EVENT: &str = "event";
    /// Tool call over the socket.
    pub const CALL: &str = "call";
    /// Pull-read of a stream over the socket.
    pub const READ: &str = "read";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
}

/// Messages used by the channel itself.
pub mod system {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Connected {
        pub connection_id: u64,
        pub client_id: String,
        pub server_version: String,
    }

    /// Heartbeat. The server echoes the timestamp back in a `Pong`.
    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    pub struct Ping {
        #[serde(default)]
        pub timestamp: Option<u64>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Pong {
        pub timestamp: Option<u64>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Error {
        pub code: String,
        pub message: String,
    }

    impl Error {
        pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                code: code.into(),
                message: message.into(),
            }
        }
    }
}

/// Subscription management and pushed events.
pub mod topics {
    use serde::{Deserialize, Serialize};

    /// Payload of `subscribe`, `unsubscribe` and their acknowledgements.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct SubscriptionRequest {
        pub stream_or_topic: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Event {
        pub topic: String,
        pub data: serde_json::Value,
    }
}

/// Tool calls made over the socket.
pub mod calls {
    use serde::{Deserialize, Serialize};

    use crate::dispatch::ToolResponse;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct CallRequest {
        /// Opaque correlation id echoed back in the result.
        #[serde(default)]
        pub id: Option<serde_json::Value>,
        pub operation: String,
        #[serde(default)]
        pub params: Option<serde_json::Value>,
        #[serde(default)]
        pub stream: bool,
        #[serde(default)]
        pub bypass_cache: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct ReadRequest {
        #[serde(default)]
        pub id: Option<serde_json::Value>,
        pub stream: String,
        #[serde(default)]
        pub since: u64,
        #[serde(default)]
        pub timeout_ms: Option<u64>,
    }

    /// Answer to a `call` or a `read`.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct CallResult {
        pub id: Option<serde_json::Value>,
        pub response: ToolResponse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_serializes_correctly() {
        let msg = ServerMessage::new("test_type", serde_json::json!({"key": "value"}));
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"test_type\""));
        assert!(json.contains("\"payload\":{\"key\":\"value\"}"));
    }

    #[test]
    fn client_message_deserializes_without_payload() {
        let json = r#"{"type":"ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        assert_eq!(msg.msg_type, "ping");
        assert_eq!(msg.payload, serde_json::Value::Null);
    }

    #[test]
    fn ping_timestamp_is_optional() {
        let ping: system::Ping = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(ping.timestamp, None);

        let ping: system::Ping =
            serde_json::from_value(serde_json::json!({"timestamp": 1700000000})).unwrap();
        assert_eq!(ping.timestamp, Some(1700000000));
    }

    #[test]
    fn event_serializes_with_topic_and_data() {
        let msg = ServerMessage::new(
            msg_types::EVENT,
            topics::Event {
                topic: "T".to_string(),
                data: serde_json::json!({"n": 1}),
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["payload"]["topic"], "T");
        assert_eq!(json["payload"]["data"]["n"], 1);
    }

    #[test]
    fn call_request_defaults() {
        let call: calls::CallRequest =
            serde_json::from_value(serde_json::json!({"operation": "echo"})).unwrap();
        assert_eq!(call.operation, "echo");
        assert!(call.params.is_none());
        assert!(!call.stream);
        assert!(!call.bypass_cache);
    }

    #[test]
    fn read_request_defaults() {
        let read: calls::ReadRequest =
            serde_json::from_value(serde_json::json!({"stream": "stm_1"})).unwrap();
        assert_eq!(read.since, 0);
        assert!(read.timeout_ms.is_none());
        assert!(read.id.is_none());
    }

    #[test]
    fn system_error_serializes_correctly() {
        let error = system::Error::new("invalid_message", "Could not parse message");
        let msg = ServerMessage::new(msg_types::ERROR, &error);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"code\":\"invalid_message\""));
    }
}
