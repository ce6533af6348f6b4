//! # Memory Bridge
//!
//! A persistent memory layer for chat web apps. Outgoing chat submissions are
//! intercepted, related context is fetched from a remote memory service and
//! injected into the prompt, and whole conversations can be saved back to the
//! same service.
//!
//! ## Realms
//!
//! The pipeline spans three isolated realms that only exchange messages:
//!
//! - **Page**: the [`Interceptor`] rewrites chat submissions and asks for
//!   context over the [`PageBus`].
//! - **Content script**: the [`ContextBridge`] answers those requests,
//!   de-duplicating concurrent identical queries, by talking to the gateway
//!   over a [`channel`].
//! - **Background**: the [`BackgroundGateway`] owns the credential and the
//!   HTTP calls. It lives inside an [`ExtensionRuntime`] that evicts it when
//!   idle; [`LivenessKeeper`]s hold it awake.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memory_bridge::{
//!     BridgeConfig, ExtensionRuntime, HttpMemoryService, OutgoingRequest, PageSession,
//!     ProfileSettings, Result,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(BridgeConfig::default());
//!     let settings = ProfileSettings::in_memory();
//!     settings.set_api_key("sk-...").await?;
//!     settings.set_memory_enabled(true).await?;
//!
//!     let service = Arc::new(HttpMemoryService::new(&config)?);
//!     let runtime = ExtensionRuntime::start(config, settings, service);
//!     let page = PageSession::load(&runtime)?;
//!
//!     let body = r#"{"prompt":"What did we decide about the schema?"}"#;
//!     let request = OutgoingRequest::fetch(
//!         "POST",
//!         "https://claude.ai/api/organizations/o/chat_conversations/c/completion",
//!         body,
//!     );
//!     let enriched = page.intercept(request).await;
//!     println!("{:?}", enriched.body);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bridge;
pub mod channel;
mod config;
mod errors;
pub mod gateway;
pub mod interceptor;
pub mod keeper;
pub mod memory_api;
pub mod page;
mod retry;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod transcript;
mod types;

pub use bridge::{ContextBridge, PendingRequest, PendingState};
pub use channel::{ChannelClient, ChannelState};
pub use config::BridgeConfig;
pub use errors::{BridgeError, Result};
pub use gateway::{BackgroundGateway, format_contexts};
pub use interceptor::{
    Interceptor, OutgoingRequest, PatternProvider, ProviderAdapter, ProviderRegistry,
    RequestKind, enrich,
};
pub use keeper::{KeepAliveTarget, LivenessKeeper, PingSource};
pub use memory_api::{HttpMemoryService, MemoryService, ServiceResponse};
pub use page::PageBus;
pub use retry::{RetryConfig, RetryPolicy};
pub use runtime::{ActivityClock, ExtensionRuntime, WeakRuntime};
pub use session::PageSession;
pub use storage::{FileStore, KeyValueStore, MemoryStore, ProfileSettings};
pub use transcript::{
    ConversationSaver, SUPPORTED_APPS, TranscriptEntry, is_supported_chat_url, memory_id_for_url,
};
pub use types::{
    AddMemoryRequest, CHANNEL_NAME, CREDENTIAL_KEY, ChannelRequest, ChannelResponse,
    ContentItem, ContextFragment, CorrelationId, ErrorCode, MEMORY_ENABLED_KEY, PageMessage,
    RuntimeMessage, RuntimeReply, SaveAck, SearchRequest, SearchResponse,
};
