use std::sync::Arc;

use serde_json::{json, Value};

use super::{StreamChunk, StreamHandle, StreamRegistry};
use crate::broadcast::BroadcastHub;
use crate::error::ServeError;

/// Producer side of a stream handed to a streaming tool handler.
///
/// Every chunk is buffered in the registry for pull readers and also
/// published on the hub topic named after the handle, so subscribed
/// connections get it pushed.
#[derive(Clone)]
pub struct StreamWriter {
    handle: StreamHandle,
    streams: Arc<StreamRegistry>,
    hub: Arc<BroadcastHub>,
}

impl StreamWriter {
    pub fn new(handle: StreamHandle, streams: Arc<StreamRegistry>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            handle,
            streams,
            hub,
        }
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn push(&self, data: Value) -> Result<StreamChunk, ServeError> {
        let chunk = self.streams.push(&self.handle, data)?;
        self.hub.publish_sequenced(
            self.handle.as_str(),
            chunk.seq,
            json!({ "seq": chunk.seq, "data": chunk.data }),
        );
        Ok(chunk)
    }

    pub fn close(&self) -> Result<(), ServeError> {
        self.streams.close(&self.handle)?;
        self.hub
            .publish(self.handle.as_str(), json!({ "end_of_stream": true }));
        Ok(())
    }

    pub fn fail(&self, message: &str) -> Result<(), ServeError> {
        self.streams.fail(&self.handle, message)?;
        self.hub
            .publish(self.handle.as_str(), json!({ "error": message }));
        Ok(())
    }
}
