//! In-flight result streams.
//!
//! A producer pushes chunks into a stream identified by an unguessable
//! [`StreamHandle`]; readers pull them by sequence number. Reads suspend on a
//! per-stream `watch` channel until a newer chunk arrives, the stream ends or
//! the read's own timeout elapses. Streams that see neither a push nor a read
//! for `idle_timeout` are abandoned: their buffer is dropped together with the
//! registry entry, and any later access reports `StreamGone`.

mod writer;

pub use writer::StreamWriter;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::ServeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(String);

impl StreamHandle {
    fn generate() -> Self {
        Self(format!("stm_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StreamHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Producing,
    Exhausted,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub seq: u64,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Chunk(StreamChunk),
    EndOfStream,
}

struct StreamEntry {
    created_at: Instant,
    last_activity: Instant,
    state: StreamState,
    /// Chunks not yet acknowledged by a reader, in sequence order.
    buffer: VecDeque<StreamChunk>,
    last_seq: u64,
    /// Carries `last_seq`; dropping it wakes every pending reader.
    signal: watch::Sender<u64>,
}

impl StreamEntry {
    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > idle_timeout
    }

    fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

enum Poll {
    Ready(ReadOutcome),
    Pending(watch::Receiver<u64>),
}

pub struct StreamRegistry {
    streams: Mutex<HashMap<StreamHandle, StreamEntry>>,
    idle_timeout: Duration,
    clock: SharedClock,
}

impl StreamRegistry {
    pub fn new(idle_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            idle_timeout,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamHandle, StreamEntry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self) -> StreamHandle {
        let now = self.clock.now();
        let handle = StreamHandle::generate();
        let (signal, _) = watch::channel(0);
        self.lock().insert(
            handle.clone(),
            StreamEntry {
                created_at: now,
                last_activity: now,
                state: StreamState::Producing,
                buffer: VecDeque::new(),
                last_seq: 0,
                signal,
            },
        );
        debug!("Created stream {}", handle);
        handle
    }

    /// Looks up a live entry, removing it first if it has gone idle.
    fn live_entry<'a>(
        &self,
        streams: &'a mut HashMap<StreamHandle, StreamEntry>,
        handle: &StreamHandle,
        now: Instant,
    ) -> Result<&'a mut StreamEntry, ServeError> {
        let idle = match streams.get(handle) {
            None => return Err(ServeError::StreamGone(format!("unknown stream {}", handle))),
            Some(entry) => entry.is_idle(now, self.idle_timeout),
        };
        if idle {
            streams.remove(handle);
            debug!("Stream {} abandoned", handle);
            return Err(ServeError::StreamGone(format!("stream {} abandoned", handle)));
        }
        streams
            .get_mut(handle)
            .ok_or_else(|| ServeError::StreamGone(format!("unknown stream {}", handle)))
    }

    /// Appends a chunk and wakes pending readers. Returns the stored chunk.
    pub fn push(&self, handle: &StreamHandle, data: Value) -> Result<StreamChunk, ServeError> {
        let now = self.clock.now();
        let mut streams = self.lock();
        let entry = self.live_entry(&mut streams, handle, now)?;
        if entry.state != StreamState::Producing {
            return Err(ServeError::StreamGone(format!(
                "stream {} is no longer producing",
                handle
            )));
        }

        entry.last_seq += 1;
        let chunk = StreamChunk {
            seq: entry.last_seq,
            data,
        };
        entry.buffer.push_back(chunk.clone());
        entry.touch(now);
        entry.signal.send_replace(entry.last_seq);

        debug_assert!(
            entry
                .buffer
                .iter()
                .zip(entry.buffer.iter().skip(1))
                .all(|(a, b)| a.seq < b.seq),
            "stream buffer out of order"
        );
        Ok(chunk)
    }

    /// Marks the stream exhausted. Closing twice is a no-op.
    pub fn close(&self, handle: &StreamHandle) -> Result<(), ServeError> {
        self.finish(handle, StreamState::Exhausted)
    }

    /// Marks the stream errored; readers get `message` after draining the buffer.
    pub fn fail(&self, handle: &StreamHandle, message: impl Into<String>) -> Result<(), ServeError> {
        self.finish(handle, StreamState::Errored(message.into()))
    }

    fn finish(&self, handle: &StreamHandle, state: StreamState) -> Result<(), ServeError> {
        let now = self.clock.now();
        let mut streams = self.lock();
        let entry = self.live_entry(&mut streams, handle, now)?;
        if entry.state == StreamState::Producing {
            debug!("Stream {} finished: {:?}", handle, state);
            entry.state = state;
            entry.touch(now);
            entry.signal.send_replace(entry.last_seq);
        }
        Ok(())
    }

    fn poll(&self, handle: &StreamHandle, since_seq: u64) -> Result<Poll, ServeError> {
        let now = self.clock.now();
        let mut streams = self.lock();
        let entry = self.live_entry(&mut streams, handle, now)?;
        entry.touch(now);

        // Everything up to `since_seq` has been seen by the reader.
        while entry
            .buffer
            .front()
            .is_some_and(|chunk| chunk.seq <= since_seq)
        {
            entry.buffer.pop_front();
        }

        if let Some(chunk) = entry.buffer.front() {
            return Ok(Poll::Ready(ReadOutcome::Chunk(chunk.clone())));
        }
        match &entry.state {
            StreamState::Exhausted => Ok(Poll::Ready(ReadOutcome::EndOfStream)),
            StreamState::Errored(message) => Err(ServeError::HandlerError(message.clone())),
            StreamState::Producing => Ok(Poll::Pending(entry.signal.subscribe())),
        }
    }

    /// Waits for the first chunk after `since_seq`, the end of the stream,
    /// or `timeout`, whichever comes first.
    pub async fn read(
        &self,
        handle: &StreamHandle,
        since_seq: u64,
        timeout: Duration,
    ) -> Result<ReadOutcome, ServeError> {
        self.read_until(handle, since_seq, timeout, std::future::pending())
            .await
    }

    /// Like [`read`](Self::read), but returns `ConnectionGone` as soon as
    /// `cancel` fires.
    pub async fn read_cancellable(
        &self,
        handle: &StreamHandle,
        since_seq: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, ServeError> {
        if cancel.is_cancelled() {
            return Err(ServeError::ConnectionGone);
        }
        self.read_until(handle, since_seq, timeout, cancel.cancelled())
            .await
    }

    async fn read_until(
        &self,
        handle: &StreamHandle,
        since_seq: u64,
        timeout: Duration,
        cancelled: impl Future<Output = ()>,
    ) -> Result<ReadOutcome, ServeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        tokio::pin!(cancelled);

        loop {
            let mut signal = match self.poll(handle, since_seq)? {
                Poll::Ready(outcome) => return Ok(outcome),
                Poll::Pending(signal) => signal,
            };

            tokio::select! {
                biased;
                _ = &mut cancelled => return Err(ServeError::ConnectionGone),
                changed = tokio::time::timeout_at(deadline, signal.changed()) => match changed {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => {
                        return Err(ServeError::StreamGone(format!("stream {} abandoned", handle)))
                    }
                    Err(_) => {
                        // Data that landed right at the deadline still wins over a timeout.
                        return match self.poll(handle, since_seq)? {
                            Poll::Ready(outcome) => Ok(outcome),
                            Poll::Pending(_) => Err(ServeError::Timeout),
                        };
                    }
                },
            }
        }
    }

    /// Drops every stream idle for longer than the idle timeout.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut streams = self.lock();
        let before = streams.len();
        streams.retain(|_, entry| !entry.is_idle(now, self.idle_timeout));
        let removed = before - streams.len();
        if removed > 0 {
            debug!("Abandoned {} idle streams", removed);
        }
        removed
    }

    pub fn state(&self, handle: &StreamHandle) -> Option<StreamState> {
        self.lock().get(handle).map(|entry| entry.state.clone())
    }

    /// Age of the stream, if it is still registered.
    pub fn age(&self, handle: &StreamHandle) -> Option<Duration> {
        let now = self.clock.now();
        self.lock()
            .get(handle)
            .map(|entry| now.saturating_duration_since(entry.created_at))
    }

    pub fn buffered(&self, handle: &StreamHandle) -> usize {
        self.lock()
            .get(handle)
            .map(|entry| entry.buffer.len())
            .unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
