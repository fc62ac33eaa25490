use axum::extract::FromRef;
use std::sync::Arc;

use crate::context::ServerContext;
use crate::dispatch::Dispatcher;

use super::RequestsLoggingLevel;

pub type GuardedDispatcher = Arc<Dispatcher>;
pub type GuardedServerContext = Arc<ServerContext>;

#[derive(Clone)]
pub struct ServerState {
    pub dispatcher: GuardedDispatcher,
    pub context: GuardedServerContext,
    pub logging_level: RequestsLoggingLevel,
    /// Upper bound on a single long-poll stream read.
    pub max_read_timeout_ms: u64,
    pub hash: String,
}

impl ServerState {
    pub fn new(dispatcher: Arc<Dispatcher>, logging_level: RequestsLoggingLevel) -> Self {
        Self {
            context: dispatcher.server().clone(),
            dispatcher,
            logging_level,
            max_read_timeout_ms: DEFAULT_MAX_READ_TIMEOUT_MS,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

pub const DEFAULT_MAX_READ_TIMEOUT_MS: u64 = 30_000;

impl FromRef<ServerState> for GuardedDispatcher {
    fn from_ref(input: &ServerState) -> Self {
        input.dispatcher.clone()
    }
}

impl FromRef<ServerState> for GuardedServerContext {
    fn from_ref(input: &ServerState) -> Self {
        input.context.clone()
    }
}
