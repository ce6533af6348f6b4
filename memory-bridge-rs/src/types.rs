//! Wire types shared by the three realms and the memory service client

use crate::errors::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the only Channel the background gateway accepts
pub const CHANNEL_NAME: &str = "alchemyst";

/// Storage key of the memory service credential
pub const CREDENTIAL_KEY: &str = "alchemystApiKey";

/// Storage key of the memory toggle
pub const MEMORY_ENABLED_KEY: &str = "alchemyst_memory_enabled";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to a request and echoed in its response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id, unique within the process
    pub fn generate() -> Self {
        let n = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self(format!("req_{}_{}", n, uuid::Uuid::new_v4().simple()))
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages exchanged on the page bus (page realm <-> content script)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    /// Interceptor asks for context for a user query
    #[serde(rename = "ALCHEMYST_CONTEXT_REQUEST")]
    ContextRequest {
        /// Request id echoed by the reply
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<CorrelationId>,
        /// Raw user text
        query: String,
    },
    /// Bridge answers a context request; empty payload means "no context"
    #[serde(rename = "ALCHEMYST_CONTEXT_REPLY")]
    ContextReply {
        /// Id of the request being answered
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<CorrelationId>,
        /// Context block
        payload: String,
    },
    /// Decoded chunk of a streaming (SSE) response
    #[serde(rename = "ALCHEMYST_STREAM_CHUNK")]
    StreamChunk {
        /// Request URL the chunk belongs to
        url: String,
        /// Decoded text
        chunk: String,
    },
    /// The user flipped the memory toggle
    #[serde(rename = "ALCHEMYST_MEMORY_TOGGLE")]
    MemoryToggle {
        /// New state
        enabled: bool,
    },
}

/// One memory entry sent to the add endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Text to store
    pub content: String,
    /// Opaque metadata forwarded as-is
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Requests sent over a Channel (content script / popup -> background)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelRequest {
    /// Look up context for a query
    #[serde(rename = "fetchContext")]
    FetchContext {
        /// Correlation id
        id: CorrelationId,
        /// Trimmed query
        query: String,
    },
    /// Store a conversation
    #[serde(rename = "addMemory")]
    AddMemory {
        /// Correlation id
        id: CorrelationId,
        /// Conversation identifier
        #[serde(rename = "memoryId")]
        memory_id: String,
        /// Ordered contents
        contents: Vec<ContentItem>,
    },
}

impl ChannelRequest {
    /// Correlation id of the request
    pub fn id(&self) -> &CorrelationId {
        match self {
            Self::FetchContext { id, .. } | Self::AddMemory { id, .. } => id,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchContext { .. } => "fetchContext",
            Self::AddMemory { .. } => "addMemory",
        }
    }
}

/// Machine-readable error class carried by channel responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No credential stored
    NoCredential,
    /// Non-2xx from the memory service
    Http,
    /// Transport failure talking to the memory service
    Network,
    /// Round trip timed out
    Timeout,
    /// Anything else
    Internal,
}

/// Response sent back over a Channel; always echoes the request id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelResponse {
    /// Correlation id of the request
    pub id: Option<CorrelationId>,
    /// Context for `fetchContext`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Success flag for `addMemory`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// Human-readable error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Raw upstream body (add endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Raw upstream body (search endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ChannelResponse {
    /// Successful context lookup
    pub fn context(id: CorrelationId, context: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            context: Some(context.into()),
            ..Default::default()
        }
    }

    /// Successful save
    pub fn saved(id: CorrelationId, body: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            ok: Some(true),
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Failed operation; the upstream body lands in `details` for searches
    /// and in `body` for saves
    pub fn failure(id: CorrelationId, kind: &str, err: &BridgeError) -> Self {
        let mut response = Self {
            id: Some(id),
            error: Some(err.to_string()),
            code: Some(err.code()),
            ..Default::default()
        };
        if let BridgeError::Http { body, .. } = err {
            if kind == "fetchContext" {
                response.details = Some(body.clone());
            } else {
                response.body = Some(body.clone());
            }
        }
        response
    }

    /// Rebuild the typed error a failed response describes
    pub fn into_error(self) -> Option<BridgeError> {
        let message = self.error?;
        let raw = self.body.or(self.details).unwrap_or_default();
        Some(match self.code {
            Some(ErrorCode::NoCredential) => BridgeError::MissingCredential,
            Some(ErrorCode::Http) => {
                let status = message
                    .strip_prefix("HTTP ")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0);
                BridgeError::http(status, raw)
            },
            Some(ErrorCode::Network) => BridgeError::Network(message),
            _ => BridgeError::Remote(message),
        })
    }
}

/// One-shot runtime messages (keepalive pings)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeMessage {
    /// Liveness ping
    #[serde(rename = "keepAlive")]
    KeepAlive,
    /// Wake-up ping
    #[serde(rename = "ping")]
    Ping,
}

/// Reply to a runtime message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeReply {
    /// Always true when the worker answered
    pub ok: bool,
    /// Worker clock in unix millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

/// Body of the memory service search call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub query: String,
    /// Primary similarity threshold
    pub similarity_threshold: f64,
    /// Lower floor threshold
    pub minimum_similarity_threshold: f64,
    /// Scope marker
    pub scope: String,
    /// Always serialized, `null` when absent
    pub metadata: Option<JsonValue>,
}

/// Search endpoint response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    /// Ranked fragments (ranking is not trusted)
    #[serde(default)]
    pub contexts: Vec<ContextFragment>,
}

/// One fragment returned by a search
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContextFragment {
    /// Stored content, usually a string
    #[serde(default)]
    pub content: Option<JsonValue>,
    /// Relevance
    #[serde(default)]
    pub score: Option<f64>,
}

impl ContextFragment {
    /// Content as text; falsy values render empty, non-strings as JSON
    pub fn text(&self) -> String {
        match &self.content {
            None | Some(JsonValue::Null) | Some(JsonValue::Bool(false)) => String::new(),
            Some(JsonValue::String(text)) => text.clone(),
            Some(JsonValue::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// Body of the memory service add call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMemoryRequest {
    /// Conversation identifier
    #[serde(rename = "memoryId")]
    pub memory_id: String,
    /// Ordered contents
    pub contents: Vec<ContentItem>,
}

/// Acknowledgement returned by a successful save
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveAck {
    /// Conversation identifier that was saved
    pub memory_id: String,
    /// Number of contents sent
    pub count: usize,
    /// Raw success body from the memory service
    pub body: String,
}
