//! Tunables for every realm of the pipeline

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the interceptor, bridge, gateway and runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the memory service
    pub api_base_url: String,
    /// Value of the `mode` query parameter on searches, if any
    pub search_mode: Option<String>,
    /// Primary similarity threshold sent with searches
    pub similarity_threshold: f64,
    /// Floor similarity threshold sent with searches
    pub minimum_similarity_threshold: f64,
    /// Scope marker sent with searches
    pub scope: String,
    /// How many fragments make it into the context block
    pub max_context_fragments: usize,
    /// Per-request HTTP timeout for memory service calls
    pub http_timeout_ms: u64,
    /// Interceptor wait for a page-bus reply
    pub page_request_timeout_ms: u64,
    /// Bridge wait for a Channel round trip
    pub channel_timeout_ms: u64,
    /// Save path wait for a Channel round trip
    pub save_timeout_ms: u64,
    /// Total add-memory attempts
    pub add_memory_attempts: u32,
    /// First add-memory backoff, doubled on each retry
    pub add_memory_initial_backoff_ms: u64,
    /// Content-script keepalive period
    pub content_keepalive_ms: u64,
    /// Offscreen document keepalive period; `None` disables that keeper
    pub offscreen_keepalive_ms: Option<u64>,
    /// Idle period after which the runtime evicts the background worker
    pub idle_eviction_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://platform-backend.getalchemystai.com".to_string(),
            search_mode: Some("fast".to_string()),
            similarity_threshold: 0.8,
            minimum_similarity_threshold: 0.5,
            scope: "internal".to_string(),
            max_context_fragments: 5,
            http_timeout_ms: 30_000,
            page_request_timeout_ms: 30_000,
            channel_timeout_ms: 60_000,
            save_timeout_ms: 90_000,
            add_memory_attempts: 3,
            add_memory_initial_backoff_ms: 1_000,
            content_keepalive_ms: 30_000,
            offscreen_keepalive_ms: Some(25_000),
            idle_eviction_ms: 30_000,
        }
    }
}

impl BridgeConfig {
    /// Interceptor wait for a page-bus reply
    pub fn page_request_timeout(&self) -> Duration {
        Duration::from_millis(self.page_request_timeout_ms)
    }

    /// Bridge wait for a Channel round trip
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    /// Save path wait for a Channel round trip
    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    /// Per-request HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Content-script keepalive period
    pub fn content_keepalive(&self) -> Duration {
        Duration::from_millis(self.content_keepalive_ms)
    }

    /// Offscreen keepalive period, if enabled
    pub fn offscreen_keepalive(&self) -> Option<Duration> {
        self.offscreen_keepalive_ms.map(Duration::from_millis)
    }

    /// Idle eviction threshold
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_ms)
    }

    /// Full search endpoint URL, including the mode parameter
    pub fn search_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        match &self.search_mode {
            Some(mode) => format!("{base}/api/v1/context/search?mode={mode}"),
            None => format!("{base}/api/v1/context/search"),
        }
    }

    /// Add endpoint URL
    pub fn add_url(&self) -> String {
        format!(
            "{}/api/v1/context/memory/add",
            self.api_base_url.trim_end_matches('/')
        )
    }
}
