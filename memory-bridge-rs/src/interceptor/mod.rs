//! Network interceptor: the page-realm side of the pipeline
//!
//! Every outgoing request (fetch, XHR or WebSocket send) is offered to
//! [`Interceptor::intercept`]. Chat submissions recognised by a registered
//! provider get their user text enriched with context from the page bus;
//! everything else, and every submission whose enrichment fails for any
//! reason, leaves with its original bytes.

use crate::{
    config::BridgeConfig, errors::Result, page::PageBus, storage::ProfileSettings,
    types::PageMessage,
};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod providers;

pub use providers::{PatternProvider, ProviderAdapter, ProviderRegistry};

/// Transport an outgoing request was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `fetch()`
    Fetch,
    /// `XMLHttpRequest.send()`
    Xhr,
    /// `WebSocket.send()`; the body is the frame
    WebSocket,
}

/// A request about to leave the page
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    /// Transport
    pub kind: RequestKind,
    /// HTTP method (`GET` for WebSocket frames)
    pub method: String,
    /// Target URL
    pub url: String,
    /// Raw body, if any
    pub body: Option<Bytes>,
}

impl OutgoingRequest {
    /// A fetch with a body
    pub fn fetch(method: impl Into<String>, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            kind: RequestKind::Fetch,
            method: method.into(),
            url: url.into(),
            body: Some(body.into()),
        }
    }
}

/// Wrap `query` with retrieved `context` in the fixed prompt framing
pub fn enrich(context: &str, query: &str) -> String {
    format!(
        "\n\nThe context of the conversation is:\n\n```\n{context}\n```\n\nThe user query is:\n```\n{query}\n```"
    )
}

/// Whether a `Content-Type` denotes a server-sent event stream
pub fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type
        .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}

/// Rewrites outgoing chat submissions and mirrors streamed replies
#[derive(Clone)]
pub struct Interceptor {
    providers: ProviderRegistry,
    settings: ProfileSettings,
    bus: PageBus,
    config: Arc<BridgeConfig>,
}

impl Interceptor {
    /// Interceptor with the built-in providers
    pub fn new(bus: PageBus, settings: ProfileSettings, config: Arc<BridgeConfig>) -> Result<Self> {
        Ok(Self::with_providers(
            ProviderRegistry::with_defaults()?,
            bus,
            settings,
            config,
        ))
    }

    /// Interceptor with a custom provider table
    pub fn with_providers(
        providers: ProviderRegistry,
        bus: PageBus,
        settings: ProfileSettings,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            providers,
            settings,
            bus,
            config,
        }
    }

    /// Provider table in use
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Enrich `request` if it is a chat submission; never fails
    pub async fn intercept(&self, mut request: OutgoingRequest) -> OutgoingRequest {
        let Some(provider) = self.providers.find(&request.url) else {
            return request;
        };
        debug!(
            "Intercepting {} {:?} request to {}",
            provider.name(),
            request.kind,
            request.url
        );

        let Some(body) = request.body.clone() else {
            return request;
        };
        if let Some(rewritten) = self.enrich_body(provider.as_ref(), &body).await {
            request.body = Some(rewritten);
        }
        request
    }

    async fn enrich_body(&self, provider: &dyn ProviderAdapter, body: &Bytes) -> Option<Bytes> {
        let text = match std::str::from_utf8(body) {
            Ok(text) => text,
            Err(_) => {
                debug!("Body is not UTF-8, leaving it untouched");
                return None;
            },
        };
        let mut payload: Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Body is not JSON ({}), leaving it untouched", e);
                return None;
            },
        };

        let query = provider.extract(&payload)?;
        if query.trim().is_empty() {
            debug!("Empty prompt, skipping enrichment");
            return None;
        }
        if !self.memory_enabled().await {
            debug!("Memory is disabled, skipping context enrichment");
            return None;
        }

        let wait = self.config.page_request_timeout();
        let Some(context) = self.bus.request_context(&query, wait).await else {
            warn!("No context reply within {:?}, sending original request", wait);
            return None;
        };
        if context.is_empty() {
            return None;
        }

        let enriched = enrich(&context, &query);
        if !provider.rewrite(&mut payload, &enriched) {
            warn!("{} payload changed shape, sending original request", provider.name());
            return None;
        }
        match serde_json::to_vec(&payload) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                warn!("Failed to serialize enriched payload: {}", e);
                None
            },
        }
    }

    async fn memory_enabled(&self) -> bool {
        match self.settings.memory_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Failed to read memory toggle: {}", e);
                false
            },
        }
    }

    /// Pass a response body through, mirroring SSE text onto the page bus
    ///
    /// The returned stream yields exactly the items of `body`. For event
    /// streams, decoded text is additionally posted as
    /// `ALCHEMYST_STREAM_CHUNK`; multi-byte characters split across chunks
    /// are held back until complete.
    pub fn mirror_response<S, E>(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: S,
    ) -> BoxStream<'static, std::result::Result<Bytes, E>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Send + 'static,
    {
        if !is_event_stream(content_type) {
            return body.boxed();
        }

        let bus = self.bus.clone();
        let url = url.to_string();
        async_stream::stream! {
            let mut decoder = Utf8Decoder::default();
            let mut body = Box::pin(body);
            while let Some(item) = body.next().await {
                if let Ok(bytes) = &item {
                    let chunk = decoder.push(bytes);
                    if !chunk.is_empty() {
                        bus.post(PageMessage::StreamChunk { url: url.clone(), chunk });
                    }
                }
                yield item;
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                bus.post(PageMessage::StreamChunk { url, chunk: rest });
            }
        }
        .boxed()
    }
}

/// Incremental UTF-8 decoder that never splits a character
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Feed bytes, returning all text that is complete so far
    ///
    /// Invalid bytes become U+FFFD; a trailing incomplete character is held
    /// back until the next chunk.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                },
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        },
                        None => {
                            rest = after;
                            break;
                        },
                    }
                },
            }
        }
        self.pending = rest.to_vec();
        text
    }

    /// Flush whatever is left, replacing incomplete sequences
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
