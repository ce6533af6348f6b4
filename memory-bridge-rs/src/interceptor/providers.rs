//! Per-provider recognition, extraction and rewrite of chat submissions

use crate::errors::{BridgeError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// URL pattern of ChatGPT's conversation endpoint
pub const CHATGPT_PATTERN: &str = r"/backend-api/f/conversation(?:\?|$)";

/// URL pattern of Claude's completion endpoint
pub const CLAUDE_PATTERN: &str =
    r"/api/organizations/[^/]+/chat_conversations/[^/]+/completion$";

/// One chat provider's submission format
pub trait ProviderAdapter: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Whether an outgoing request to `url` is a chat submission
    fn matches(&self, url: &str) -> bool;

    /// The user's text in a submission payload
    fn extract(&self, payload: &Value) -> Option<String>;

    /// Replace the user's text with `enriched`; false if the shape is unknown
    fn rewrite(&self, payload: &mut Value, enriched: &str) -> bool;
}

type Extractor = fn(&Value) -> Option<String>;
type Rewriter = fn(&mut Value, &str) -> bool;

/// Provider defined by a URL regex plus a pair of payload functions
pub struct PatternProvider {
    name: String,
    pattern: Regex,
    extractor: Extractor,
    rewriter: Rewriter,
}

impl PatternProvider {
    /// Build a provider; fails on an invalid pattern
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        extractor: Extractor,
        rewriter: Rewriter,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| BridgeError::Config(format!("invalid provider pattern: {e}")))?;
        Ok(Self {
            name: name.into(),
            pattern,
            extractor,
            rewriter,
        })
    }

    /// ChatGPT: first `user` message, `content.parts` joined by newlines
    pub fn chatgpt() -> Result<Self> {
        Self::new("chatgpt", CHATGPT_PATTERN, chatgpt_extract, chatgpt_rewrite)
    }

    /// Claude: top-level `prompt`
    pub fn claude() -> Result<Self> {
        Self::new("claude", CLAUDE_PATTERN, claude_extract, claude_rewrite)
    }
}

impl ProviderAdapter for PatternProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    fn extract(&self, payload: &Value) -> Option<String> {
        (self.extractor)(payload)
    }

    fn rewrite(&self, payload: &mut Value, enriched: &str) -> bool {
        (self.rewriter)(payload, enriched)
    }
}

fn first_user_message(payload: &Value) -> Option<&Value> {
    payload
        .get("messages")?
        .as_array()?
        .iter()
        .find(|message| message.pointer("/author/role").and_then(Value::as_str) == Some("user"))
}

fn chatgpt_extract(payload: &Value) -> Option<String> {
    let parts = first_user_message(payload)?
        .pointer("/content/parts")?
        .as_array()?;
    Some(
        parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn chatgpt_rewrite(payload: &mut Value, enriched: &str) -> bool {
    let Some(messages) = payload.get_mut("messages").and_then(Value::as_array_mut) else {
        return false;
    };
    let Some(message) = messages
        .iter_mut()
        .find(|message| message.pointer("/author/role").and_then(Value::as_str) == Some("user"))
    else {
        return false;
    };
    match message.pointer_mut("/content/parts") {
        Some(parts) if parts.is_array() => {
            *parts = Value::Array(vec![Value::String(enriched.to_string())]);
            true
        },
        _ => false,
    }
}

fn claude_extract(payload: &Value) -> Option<String> {
    payload.get("prompt")?.as_str().map(str::to_string)
}

fn claude_rewrite(payload: &mut Value, enriched: &str) -> bool {
    match payload.as_object_mut() {
        Some(object) => {
            object.insert("prompt".to_string(), Value::String(enriched.to_string()));
            true
        },
        None => false,
    }
}

/// Ordered provider table; the first match wins
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with ChatGPT and Claude
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(PatternProvider::chatgpt()?));
        registry.register(Arc::new(PatternProvider::claude()?));
        Ok(registry)
    }

    /// Append a provider
    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    /// Provider handling `url`, if any
    pub fn find(&self, url: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers
            .iter()
            .find(|provider| provider.matches(url))
            .cloned()
    }

    /// Registered provider names, in match order
    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_patterns() {
        let registry = ProviderRegistry::with_defaults().unwrap();
        let name = |url: &str| registry.find(url).map(|p| p.name().to_string());

        assert_eq!(
            name("https://chatgpt.com/backend-api/f/conversation").as_deref(),
            Some("chatgpt")
        );
        assert_eq!(
            name("https://chatgpt.com/backend-api/f/conversation?x=1").as_deref(),
            Some("chatgpt")
        );
        assert_eq!(
            name("https://chatgpt.com/backend-api/f/conversation/prepare"),
            None
        );
        assert_eq!(
            name("https://claude.ai/api/organizations/org-1/chat_conversations/abc/completion")
                .as_deref(),
            Some("claude")
        );
        assert_eq!(
            name("https://claude.ai/api/organizations/org-1/chat_conversations/abc"),
            None
        );
    }

    #[test]
    fn test_chatgpt_extract_and_rewrite() {
        let provider = PatternProvider::chatgpt().unwrap();
        let mut payload = json!({
            "action": "next",
            "messages": [
                {"author": {"role": "system"}, "content": {"parts": ["sys"]}},
                {"author": {"role": "user"}, "content": {"content_type": "text", "parts": ["hello", "world"]}},
                {"author": {"role": "user"}, "content": {"parts": ["later"]}}
            ]
        });

        assert_eq!(provider.extract(&payload).as_deref(), Some("hello\nworld"));
        assert!(provider.rewrite(&mut payload, "ENRICHED"));
        assert_eq!(payload["messages"][1]["content"]["parts"], json!(["ENRICHED"]));
        assert_eq!(payload["messages"][1]["content"]["content_type"], "text");
        assert_eq!(payload["messages"][2]["content"]["parts"], json!(["later"]));
    }

    #[test]
    fn test_claude_extract_and_rewrite() {
        let provider = PatternProvider::claude().unwrap();
        let mut payload = json!({"prompt": "hi there", "timezone": "UTC"});
        assert_eq!(provider.extract(&payload).as_deref(), Some("hi there"));
        assert!(provider.rewrite(&mut payload, "ENRICHED"));
        assert_eq!(payload, json!({"prompt": "ENRICHED", "timezone": "UTC"}));
    }

    #[test]
    fn test_unknown_shapes() {
        let chatgpt = PatternProvider::chatgpt().unwrap();
        let mut no_messages = json!({"foo": 1});
        assert_eq!(chatgpt.extract(&no_messages), None);
        assert!(!chatgpt.rewrite(&mut no_messages, "x"));

        let claude = PatternProvider::claude().unwrap();
        let mut not_object = json!(["prompt"]);
        assert_eq!(claude.extract(&not_object), None);
        assert!(!claude.rewrite(&mut not_object, "x"));
    }

    #[test]
    fn test_custom_provider_registration() {
        let mut registry = ProviderRegistry::with_defaults().unwrap();
        registry.register(Arc::new(
            PatternProvider::new(
                "echo",
                r"/echo$",
                |payload| payload.get("text")?.as_str().map(str::to_string),
                |payload, enriched| {
                    payload["text"] = Value::String(enriched.to_string());
                    true
                },
            )
            .unwrap(),
        ));
        assert_eq!(registry.names(), vec!["chatgpt", "claude", "echo"]);
        assert!(registry.find("https://example.com/echo").is_some());
        assert!(PatternProvider::new("bad", "(", claude_extract, claude_rewrite).is_err());
    }
}
