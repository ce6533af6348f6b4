//! Scripted in-memory memory service for tests and simulations
use super::{MemoryService, ServiceResponse};
use crate::{
    errors::{BridgeError, Result},
    types::{AddMemoryRequest, SearchRequest},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scripted outcome of one call
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this status and body
    Respond(ServiceResponse),
    /// Fail without an HTTP response
    NetworkError(String),
    /// Sleep, then answer
    Delayed(Duration, ServiceResponse),
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Credential presented
    pub api_key: String,
    /// Request body as JSON
    pub body: serde_json::Value,
    /// When the call arrived
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    search: VecDeque<MockReply>,
    add: VecDeque<MockReply>,
    search_fallback: Option<MockReply>,
    add_fallback: Option<MockReply>,
    search_calls: Vec<RecordedCall>,
    add_calls: Vec<RecordedCall>,
}

/// A `MemoryService` that replays scripted replies and records every call
///
/// Queued replies are consumed first; once a queue is empty the endpoint's
/// fallback reply is used, and with no fallback an empty 200 is returned.
#[derive(Clone, Default)]
pub struct MockMemoryService {
    script: Arc<Mutex<Script>>,
}

impl MockMemoryService {
    /// Create an empty mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a search reply
    pub fn push_search(&self, reply: MockReply) -> &Self {
        self.script.lock().search.push_back(reply);
        self
    }

    /// Queue an add reply
    pub fn push_add(&self, reply: MockReply) -> &Self {
        self.script.lock().add.push_back(reply);
        self
    }

    /// Reply used by every search once the queue is drained
    pub fn always_search(&self, reply: MockReply) -> &Self {
        self.script.lock().search_fallback = Some(reply);
        self
    }

    /// Reply used by every add once the queue is drained
    pub fn always_add(&self, reply: MockReply) -> &Self {
        self.script.lock().add_fallback = Some(reply);
        self
    }

    /// Calls made to the search endpoint so far
    pub fn search_calls(&self) -> Vec<RecordedCall> {
        self.script.lock().search_calls.clone()
    }

    /// Calls made to the add endpoint so far
    pub fn add_calls(&self) -> Vec<RecordedCall> {
        self.script.lock().add_calls.clone()
    }

    async fn play(reply: Option<MockReply>) -> Result<ServiceResponse> {
        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::NetworkError(message)) => Err(BridgeError::Network(message)),
            Some(MockReply::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            },
            None => Ok(ServiceResponse::new(200, "{}")),
        }
    }
}

/// JSON body for a search reply with the given `(content, score)` pairs
pub fn search_body(fragments: &[(&str, f64)]) -> String {
    let contexts: Vec<_> = fragments
        .iter()
        .map(|(content, score)| serde_json::json!({"content": content, "score": score}))
        .collect();
    serde_json::json!({ "contexts": contexts }).to_string()
}

#[async_trait]
impl MemoryService for MockMemoryService {
    async fn search(&self, api_key: &str, request: &SearchRequest) -> Result<ServiceResponse> {
        let reply = {
            let mut script = self.script.lock();
            script.search_calls.push(RecordedCall {
                api_key: api_key.to_string(),
                body: serde_json::to_value(request)?,
                at: Instant::now(),
            });
            script
                .search
                .pop_front()
                .or_else(|| script.search_fallback.clone())
        };
        Self::play(reply).await
    }

    async fn add(&self, api_key: &str, request: &AddMemoryRequest) -> Result<ServiceResponse> {
        let reply = {
            let mut script = self.script.lock();
            script.add_calls.push(RecordedCall {
                api_key: api_key.to_string(),
                body: serde_json::to_value(request)?,
                at: Instant::now(),
            });
            script.add.pop_front().or_else(|| script.add_fallback.clone())
        };
        Self::play(reply).await
    }
}
