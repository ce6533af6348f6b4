//! Background gateway: sole owner of the credential and of outbound HTTP
//!
//! The gateway keeps no state between operations. The credential is read from
//! storage at the start of every operation, so the worker hosting it can be
//! evicted and restarted at any point between messages.

use crate::{
    channel::GatewayPort,
    config::BridgeConfig,
    errors::{BridgeError, Result},
    memory_api::MemoryService,
    retry::{RetryConfig, RetryPolicy},
    runtime::ActivityClock,
    storage::ProfileSettings,
    types::{
        AddMemoryRequest, ChannelRequest, ChannelResponse, ContentItem, ContextFragment,
        RuntimeMessage, RuntimeReply, SearchRequest, SearchResponse,
    },
};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Serves `search` and `addMemory` against the memory service
pub struct BackgroundGateway {
    settings: ProfileSettings,
    service: Arc<dyn MemoryService>,
    config: Arc<BridgeConfig>,
}

impl BackgroundGateway {
    /// Create a gateway
    pub fn new(
        settings: ProfileSettings,
        service: Arc<dyn MemoryService>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            settings,
            service,
            config,
        }
    }

    async fn load_credential(&self) -> Result<String> {
        self.settings
            .api_key()
            .await?
            .ok_or(BridgeError::MissingCredential)
    }

    /// Fetch the context block for a query
    pub async fn search(&self, query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            debug!("Empty query, returning empty context without a network call");
            return Ok(String::new());
        }

        let api_key = self.load_credential().await?;
        let request = SearchRequest {
            query: query.to_string(),
            similarity_threshold: self.config.similarity_threshold,
            minimum_similarity_threshold: self.config.minimum_similarity_threshold,
            scope: self.config.scope.clone(),
            metadata: None,
        };

        let response = self.service.search(&api_key, &request).await?;
        if !response.is_success() {
            error!(
                "Search failed with status {}: {}",
                response.status, response.body
            );
            return Err(BridgeError::http(response.status, response.body));
        }

        let parsed: SearchResponse = serde_json::from_str(&response.body)
            .map_err(|e| BridgeError::parse_error(e.to_string(), response.body.clone()))?;
        let context = format_contexts(parsed.contexts, self.config.max_context_fragments);
        debug!(
            "Search returned context of {} bytes for query of {} bytes",
            context.len(),
            query.len()
        );
        Ok(context)
    }

    /// Store a conversation, retrying transient upstream failures
    pub async fn add_memory(&self, memory_id: &str, contents: Vec<ContentItem>) -> Result<String> {
        let api_key = self.load_credential().await?;
        let request = AddMemoryRequest {
            memory_id: memory_id.to_string(),
            contents,
        };
        info!(
            "Adding memory {} with {} content item(s)",
            request.memory_id,
            request.contents.len()
        );

        let policy = RetryPolicy::new(RetryConfig::from(self.config.as_ref()));
        let service = self.service.as_ref();
        let (api_key, request) = (&api_key, &request);
        policy
            .execute("addMemory", || async move {
                let response = service.add(api_key, request).await?;
                if response.is_success() {
                    Ok(response.body)
                } else {
                    Err(BridgeError::http(response.status, response.body))
                }
            })
            .await
    }

    /// Handle one Channel request, producing a response with the same id
    pub async fn handle(&self, request: ChannelRequest) -> ChannelResponse {
        let kind = request.kind();
        match request {
            ChannelRequest::FetchContext { id, query } => match self.search(&query).await {
                Ok(context) => ChannelResponse::context(id, context),
                Err(e) => {
                    warn!("fetchContext {} failed: {}", id, e);
                    ChannelResponse::failure(id, kind, &e)
                },
            },
            ChannelRequest::AddMemory {
                id,
                memory_id,
                contents,
            } => match self.add_memory(&memory_id, contents).await {
                Ok(body) => ChannelResponse::saved(id, body),
                Err(e) => {
                    warn!("addMemory {} failed: {}", id, e);
                    ChannelResponse::failure(id, kind, &e)
                },
            },
        }
    }

    /// Answer a one-shot runtime message
    pub fn handle_runtime_message(&self, message: RuntimeMessage) -> RuntimeReply {
        match message {
            RuntimeMessage::KeepAlive => debug!("Keep-alive ping received"),
            RuntimeMessage::Ping => debug!("Ping received"),
        }
        RuntimeReply {
            ok: true,
            ts: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Serve one connected Channel until the peer disconnects
    ///
    /// Requests are handled concurrently. Work already started when the peer
    /// goes away runs to completion; its response is dropped.
    pub async fn serve(self: Arc<Self>, port: GatewayPort, activity: ActivityClock) {
        let name = port.name().to_string();
        let (sender, mut receiver) = port.split();
        let mut in_flight = JoinSet::new();
        debug!("Serving channel {}", name);

        loop {
            tokio::select! {
                request = receiver.recv() => {
                    let Some(request) = request else { break };
                    activity.touch();
                    debug!("Channel {} received {} {}", name, request.kind(), request.id());

                    let gateway = self.clone();
                    let sender = sender.clone();
                    in_flight.spawn(async move {
                        let response = gateway.handle(request).await;
                        let id = response.id.clone();
                        if sender.is_closed() {
                            debug!("Skipping response {:?}: channel disconnected", id);
                        } else if sender.post(response).await.is_err() {
                            debug!("Dropped response {:?}: channel disconnected", id);
                        }
                    });
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {},
            }
        }

        debug!(
            "Channel {} disconnected with {} request(s) in flight",
            name,
            in_flight.len()
        );
        while in_flight.join_next().await.is_some() {}
    }
}

/// Re-rank fragments by descending score and render the top `limit` as a
/// dash-prefixed, newline-joined block
pub fn format_contexts(mut fragments: Vec<ContextFragment>, limit: usize) -> String {
    fragments.sort_by(|a, b| {
        let a = a.score.unwrap_or(0.0);
        let b = b.score.unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(Ordering::Equal)
    });
    fragments
        .into_iter()
        .take(limit)
        .map(|fragment| format!("- {}", fragment.text()))
        .collect::<Vec<_>>()
        .join("\n")
}
