//! Context bridge: the content-script side of the pipeline
//!
//! Relays context requests from the page bus to the background gateway over
//! one multiplexed Channel, collapsing concurrent identical queries into a
//! single round trip. Every failure degrades to an empty context.

use crate::{
    channel::ChannelClient,
    config::BridgeConfig,
    errors::{BridgeError, Result},
    page::PageBus,
    runtime::ExtensionRuntime,
    storage::ProfileSettings,
    types::{CHANNEL_NAME, ChannelRequest, CorrelationId, ErrorCode, PageMessage},
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one deduplicated fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The gateway answered, or the fetch failed and degraded to `""`
    Resolved(String),
    /// No answer within the Channel timeout
    TimedOut,
}

impl Settlement {
    fn into_context(self) -> String {
        match self {
            Settlement::Resolved(context) => context,
            Settlement::TimedOut => String::new(),
        }
    }
}

/// Observable state of a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    /// Still waiting on the gateway
    Pending,
    /// Settled with a context (possibly empty)
    Resolved,
    /// Settled by timeout
    TimedOut,
}

type SharedSettlement = Shared<BoxFuture<'static, Settlement>>;

/// In-flight fetch for one distinct trimmed query
#[derive(Clone)]
pub struct PendingRequest {
    /// Correlation id used on the Channel
    pub id: CorrelationId,
    /// Trimmed query text
    pub query: String,
    /// When the fetch started
    pub created_at: Instant,
    settlement: SharedSettlement,
}

impl PendingRequest {
    /// Current settlement state
    pub fn state(&self) -> PendingState {
        match self.settlement.peek() {
            None => PendingState::Pending,
            Some(Settlement::Resolved(_)) => PendingState::Resolved,
            Some(Settlement::TimedOut) => PendingState::TimedOut,
        }
    }

    /// Wait for the shared outcome
    pub async fn wait(&self) -> String {
        self.settlement.clone().await.into_context()
    }
}

struct BridgeInner {
    runtime: ExtensionRuntime,
    settings: ProfileSettings,
    config: Arc<BridgeConfig>,
    pending: DashMap<String, PendingRequest>,
    channel: tokio::sync::Mutex<Option<ChannelClient>>,
    credential: Mutex<Option<String>>,
}

/// Content-script relay between the page bus and the background gateway
#[derive(Clone)]
pub struct ContextBridge {
    inner: Arc<BridgeInner>,
}

impl ContextBridge {
    /// Create a bridge for one page load
    pub fn new(runtime: ExtensionRuntime, settings: ProfileSettings, config: Arc<BridgeConfig>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                runtime,
                settings,
                config,
                pending: DashMap::new(),
                channel: tokio::sync::Mutex::new(None),
                credential: Mutex::new(None),
            }),
        }
    }

    /// Context for `query`, or `""` on any failure
    ///
    /// Concurrent calls with the same trimmed query share one Channel round
    /// trip and all observe the same result. The round trip itself is not
    /// cancelled when callers go away.
    pub async fn request_context(&self, query: &str) -> String {
        let query = query.trim();
        if query.is_empty() {
            return String::new();
        }

        let pending = match self.inner.pending.entry(query.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Request already pending for query, joining {}", entry.get().id);
                entry.get().clone()
            },
            Entry::Vacant(entry) => {
                let id = CorrelationId::generate();
                let fetch = tokio::spawn(self.clone().fetch(id.clone(), query.to_string()));
                let settlement = async move {
                    fetch
                        .await
                        .unwrap_or_else(|_| Settlement::Resolved(String::new()))
                }
                .boxed()
                .shared();
                entry
                    .insert(PendingRequest {
                        id,
                        query: query.to_string(),
                        created_at: Instant::now(),
                        settlement,
                    })
                    .clone()
            },
        };

        pending.wait().await
    }

    async fn fetch(self, id: CorrelationId, query: String) -> Settlement {
        let settlement = self.round_trip(&id, &query).await;
        self.inner
            .pending
            .remove_if(&query, |_, pending| pending.id == id);
        settlement
    }

    async fn round_trip(&self, id: &CorrelationId, query: &str) -> Settlement {
        if !self.has_credential().await {
            debug!("No API key available, skipping context fetch");
            return Settlement::Resolved(String::new());
        }

        let client = match self.channel().await {
            Ok(client) => client,
            Err(e) => {
                warn!("Could not open channel to background: {}", e);
                return Settlement::Resolved(String::new());
            },
        };

        let request = ChannelRequest::FetchContext {
            id: id.clone(),
            query: query.to_string(),
        };
        match client
            .request(request, self.inner.config.channel_timeout())
            .await
        {
            Ok(response) => {
                if response.code == Some(ErrorCode::NoCredential) {
                    *self.inner.credential.lock() = None;
                }
                let context = response.context.clone();
                match response.into_error() {
                    Some(e) => {
                        warn!("Background failed to fetch context: {}", e);
                        Settlement::Resolved(String::new())
                    },
                    None => Settlement::Resolved(context.unwrap_or_default()),
                }
            },
            Err(BridgeError::Timeout { millis }) => {
                warn!("Context request {} timed out after {}ms", id, millis);
                Settlement::TimedOut
            },
            Err(e) if e.is_disconnect() => {
                warn!("Context request {} lost its channel: {}", id, e);
                self.forget_channel(&client).await;
                Settlement::Resolved(String::new())
            },
            Err(e) => {
                warn!("Context request {} failed: {}", id, e);
                Settlement::Resolved(String::new())
            },
        }
    }

    async fn has_credential(&self) -> bool {
        if self.inner.credential.lock().is_some() {
            return true;
        }
        match self.inner.settings.api_key().await {
            Ok(Some(key)) => {
                debug!("API key loaded from storage");
                *self.inner.credential.lock() = Some(key);
                true
            },
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to load API key from storage: {}", e);
                false
            },
        }
    }

    async fn channel(&self) -> Result<ChannelClient> {
        let mut slot = self.inner.channel.lock().await;
        if let Some(client) = slot.as_ref() {
            if client.is_open() {
                return Ok(client.clone());
            }
            info!("Channel {} disconnected, reconnecting", client.name());
        }
        let client = ChannelClient::attach(self.inner.runtime.connect(CHANNEL_NAME)?);
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn forget_channel(&self, stale: &ChannelClient) {
        let mut slot = self.inner.channel.lock().await;
        if slot.as_ref().is_some_and(|current| current.same_channel(stale)) {
            *slot = None;
        }
    }

    /// Number of distinct queries in flight
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Snapshot of in-flight requests
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.inner
            .pending
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn memory_enabled(&self) -> bool {
        match self.inner.settings.memory_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Failed to read memory toggle: {}", e);
                false
            },
        }
    }

    /// Answer `ALCHEMYST_CONTEXT_REQUEST`s posted on `bus` until aborted
    ///
    /// Every request gets exactly one reply echoing its `requestId`; the
    /// payload is empty when memory is switched off.
    pub fn listen(&self, bus: &PageBus) -> JoinHandle<()> {
        let bridge = self.clone();
        let bus = bus.clone();
        let mut messages = bus.messages().boxed();

        tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let PageMessage::ContextRequest { request_id, query } = message else {
                    continue;
                };
                let bridge = bridge.clone();
                let bus = bus.clone();
                tokio::spawn(async move {
                    let payload = if bridge.memory_enabled().await {
                        bridge.request_context(&query).await
                    } else {
                        debug!("Memory is disabled, skipping context fetch");
                        String::new()
                    };
                    bus.post(PageMessage::ContextReply {
                        request_id,
                        payload,
                    });
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_api::ServiceResponse;
    use crate::memory_api::mock::{MockMemoryService, MockReply, search_body};
    use std::time::Duration;

    async fn setup(mock: &MockMemoryService, with_key: bool) -> (ExtensionRuntime, ContextBridge) {
        let settings = ProfileSettings::in_memory();
        if with_key {
            settings.set_api_key("sk-test").await.unwrap();
        }
        let config = Arc::new(BridgeConfig {
            offscreen_keepalive_ms: None,
            ..Default::default()
        });
        let runtime = ExtensionRuntime::start(config.clone(), settings.clone(), Arc::new(mock.clone()));
        let bridge = ContextBridge::new(runtime.clone(), settings, config);
        (runtime, bridge)
    }

    #[tokio::test]
    async fn test_concurrent_identical_queries_share_one_call() {
        let mock = MockMemoryService::new();
        mock.push_search(MockReply::Delayed(
            Duration::from_millis(50),
            ServiceResponse::new(200, search_body(&[("likes rust", 0.9)])),
        ));
        let (_runtime, bridge) = setup(&mock, true).await;

        let (a, b) = tokio::join!(
            bridge.request_context("hello"),
            bridge.request_context("  hello ")
        );
        assert_eq!(a, "- likes rust");
        assert_eq!(a, b);
        assert_eq!(mock.search_calls().len(), 1);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_query_short_circuits() {
        let mock = MockMemoryService::new();
        let (runtime, bridge) = setup(&mock, true).await;
        assert_eq!(bridge.request_context("   ").await, "");
        assert!(mock.search_calls().is_empty());
        assert_eq!(runtime.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_never_opens_a_channel() {
        let mock = MockMemoryService::new();
        let (runtime, bridge) = setup(&mock, false).await;
        assert_eq!(bridge.request_context("hello").await, "");
        assert!(mock.search_calls().is_empty());
        assert_eq!(runtime.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_is_reused_across_requests() {
        let mock = MockMemoryService::new();
        mock.always_search(MockReply::Respond(ServiceResponse::new(
            200,
            search_body(&[("x", 0.5)]),
        )));
        let (runtime, bridge) = setup(&mock, true).await;

        assert_eq!(bridge.request_context("one").await, "- x");
        assert_eq!(bridge.request_context("two").await, "- x");
        assert_eq!(runtime.connection_count(), 1);
        assert_eq!(mock.search_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_gateway_error_degrades_to_empty() {
        let mock = MockMemoryService::new();
        mock.push_search(MockReply::Respond(ServiceResponse::new(500, "boom")));
        let (_runtime, bridge) = setup(&mock, true).await;
        assert_eq!(bridge.request_context("hello").await, "");
        assert_eq!(mock.search_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_empty_and_clears_entry() {
        let mock = MockMemoryService::new();
        mock.push_search(MockReply::Delayed(
            Duration::from_secs(120),
            ServiceResponse::new(200, search_body(&[("late", 0.9)])),
        ));
        let (runtime, bridge) = setup(&mock, true).await;

        let keep_awake = tokio::spawn({
            let runtime = runtime.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    runtime.touch();
                }
            }
        });

        let started = Instant::now();
        assert_eq!(bridge.request_context("slow").await, "");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61));
        assert_eq!(bridge.pending_count(), 0);
        keep_awake.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_channel_is_forgotten_and_reopened() {
        let mock = MockMemoryService::new();
        mock.push_search(MockReply::Delayed(
            Duration::from_secs(45),
            ServiceResponse::new(200, search_body(&[("lost", 0.9)])),
        ));
        mock.push_search(MockReply::Respond(ServiceResponse::new(
            200,
            search_body(&[("fresh", 0.9)]),
        )));
        let (runtime, bridge) = setup(&mock, true).await;

        // The idle worker is evicted while the search is still running
        assert_eq!(bridge.request_context("first").await, "");
        assert_eq!(runtime.eviction_count(), 1);
        assert!(bridge.inner.channel.lock().await.is_none());

        assert_eq!(bridge.request_context("second").await, "- fresh");
        assert_eq!(runtime.start_count(), 2);
        assert_eq!(runtime.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_replies_with_request_id_and_respects_toggle() {
        let mock = MockMemoryService::new();
        mock.always_search(MockReply::Respond(ServiceResponse::new(
            200,
            search_body(&[("ctx", 0.9)]),
        )));
        let (_runtime, bridge) = setup(&mock, true).await;
        let bus = PageBus::new();
        let listener = bridge.listen(&bus);

        let off = bus.request_context("hello", Duration::from_secs(5)).await;
        assert_eq!(off.as_deref(), Some(""));
        assert!(mock.search_calls().is_empty());

        bridge.inner.settings.set_memory_enabled(true).await.unwrap();
        let on = bus.request_context("hello", Duration::from_secs(5)).await;
        assert_eq!(on.as_deref(), Some("- ctx"));
        listener.abort();
    }
}
