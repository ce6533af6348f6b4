//! Conversation saving: transcript conversion and the save round trip

use crate::{
    channel::ChannelClient,
    config::BridgeConfig,
    errors::{BridgeError, Result},
    runtime::ExtensionRuntime,
    storage::ProfileSettings,
    types::{CHANNEL_NAME, ChannelRequest, ContentItem, CorrelationId, SaveAck},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hosts the save action accepts
pub const SUPPORTED_HOSTS: &[&str] = &[
    "chatgpt.com",
    "chat.openai.com",
    "claude.ai",
    "gemini.google.com",
    "v0.app",
    "lovable.dev",
    "perplexity.ai",
    "bolt.new",
];

/// Human-readable list of the apps behind [`SUPPORTED_HOSTS`]
pub const SUPPORTED_APPS: &str = "ChatGPT, Claude, Gemini, v0, Lovable, Perplexity, or Bolt";

// First capture group is the conversation id; earlier entries win
static MEMORY_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"/c/([a-f0-9-]+)",
        r"/chat/([a-f0-9-]+)",
        r"/app/([a-f0-9]+)",
        r"/chat/([a-zA-Z0-9\-_]+)",
        r"lovable\.dev/projects/([a-f0-9-]+)",
        r"perplexity\.ai/search/([a-zA-Z0-9\-_]+)",
        r"bolt\.new/~/([a-zA-Z0-9-]+)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("memory id pattern is valid"))
    .collect()
});

/// One scraped message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    /// Speaker, e.g. `user` or `assistant`
    pub role: String,
    /// Message text
    pub text: String,
    /// Conversation the message belongs to; empty means "derive from URL"
    #[serde(default)]
    pub source_id: String,
    /// Page-local message id
    #[serde(default)]
    pub local_message_id: String,
}

impl TranscriptEntry {
    /// Memory content for this entry
    pub fn to_content_item(&self) -> ContentItem {
        ContentItem {
            content: format!("[{}] {}", self.role, self.text),
            metadata: serde_json::json!({
                "source": self.source_id,
                "messageId": self.local_message_id,
            }),
        }
    }
}

/// Conversation id embedded in a chat URL, or `unknown-<millis>`
pub fn memory_id_for_url(url: &str) -> String {
    MEMORY_ID_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(url)
                .and_then(|captures| captures.get(1))
                .map(|id| id.as_str().to_string())
        })
        .unwrap_or_else(|| format!("unknown-{}", chrono::Utc::now().timestamp_millis()))
}

/// Whether `url` belongs to a chat app the save action supports
pub fn is_supported_chat_url(url: &str) -> bool {
    SUPPORTED_HOSTS.iter().any(|host| url.contains(host))
}

/// Saves conversations through a dedicated Channel per save
#[derive(Clone)]
pub struct ConversationSaver {
    runtime: ExtensionRuntime,
    settings: ProfileSettings,
    config: Arc<BridgeConfig>,
}

impl ConversationSaver {
    /// Create a saver
    pub fn new(runtime: ExtensionRuntime, settings: ProfileSettings, config: Arc<BridgeConfig>) -> Self {
        Self {
            runtime,
            settings,
            config,
        }
    }

    /// Store `contents` under `memory_id`
    ///
    /// Unlike context fetches, every failure is returned, timeouts included.
    pub async fn save(&self, memory_id: &str, contents: Vec<ContentItem>) -> Result<SaveAck> {
        if contents.is_empty() {
            return Err(BridgeError::EmptyTranscript);
        }
        if self.settings.api_key().await?.is_none() {
            return Err(BridgeError::MissingCredential);
        }

        let count = contents.len();
        let id = CorrelationId::generate();
        info!(
            "Saving {} content item(s) to memory {} ({})",
            count, memory_id, id
        );

        // The channel is dropped, and so disconnected, when the save ends
        let client = ChannelClient::attach(self.runtime.connect(CHANNEL_NAME)?);
        let response = client
            .request(
                ChannelRequest::AddMemory {
                    id,
                    memory_id: memory_id.to_string(),
                    contents,
                },
                self.config.save_timeout(),
            )
            .await
            .inspect_err(|e| warn!("Save of memory {} failed: {}", memory_id, e))?;

        let body = response.body.clone().unwrap_or_default();
        if let Some(err) = response.into_error() {
            warn!("Save of memory {} rejected: {}", memory_id, err);
            return Err(err);
        }
        debug!("Memory {} saved", memory_id);
        Ok(SaveAck {
            memory_id: memory_id.to_string(),
            count,
            body,
        })
    }

    /// Save a scraped conversation found at `url`
    pub async fn save_transcript(&self, url: &str, entries: &[TranscriptEntry]) -> Result<SaveAck> {
        let memory_id = memory_id_for_url(url);
        let contents = entries
            .iter()
            .map(|entry| {
                let mut item = entry.to_content_item();
                if entry.source_id.is_empty() {
                    item.metadata["source"] = memory_id.clone().into();
                }
                item
            })
            .collect();
        self.save(&memory_id, contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_id_per_host() {
        let cases = [
            ("https://chatgpt.com/c/6721ab-09cd", "6721ab-09cd"),
            ("https://claude.ai/chat/0a1b2c3d-4e5f", "0a1b2c3d-4e5f"),
            ("https://gemini.google.com/app/abc123", "abc123"),
            ("https://v0.app/chat/My_Project-x1", "My_Project-x1"),
            ("https://lovable.dev/projects/deadbeef-01", "deadbeef-01"),
            ("https://www.perplexity.ai/search/what_is-rust", "what_is-rust"),
            ("https://bolt.new/~/sb1-Xyz", "sb1-Xyz"),
        ];
        for (url, expected) in cases {
            assert_eq!(memory_id_for_url(url), expected, "{url}");
        }
        assert!(memory_id_for_url("https://example.com/").starts_with("unknown-"));
    }

    #[test]
    fn test_memory_id_patterns_all_compile() {
        assert_eq!(MEMORY_ID_PATTERNS.len(), 7);
        // Hex ids win over the generic /chat/ pattern
        assert_eq!(memory_id_for_url("https://claude.ai/chat/abc-123"), "abc-123");
        assert_eq!(memory_id_for_url("https://v0.app/chat/Zed_1?x=1"), "Zed_1");
    }

    #[test]
    fn test_supported_urls() {
        assert!(is_supported_chat_url("https://chat.openai.com/c/1"));
        assert!(is_supported_chat_url("https://claude.ai/new"));
        assert!(!is_supported_chat_url("https://example.com/chat/1"));
    }

    #[test]
    fn test_entry_conversion() {
        let entry = TranscriptEntry {
            role: "user".into(),
            text: "hi".into(),
            source_id: "conv1".into(),
            local_message_id: "m1".into(),
        };
        assert_eq!(
            entry.to_content_item(),
            ContentItem {
                content: "[user] hi".into(),
                metadata: json!({"source": "conv1", "messageId": "m1"}),
            }
        );
    }
}
