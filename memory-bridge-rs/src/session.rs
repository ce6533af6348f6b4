//! One page load of a chat app
//!
//! Owns everything that lives in the page and content-script realms: the page
//! bus, the bridge listening on it, the interceptor posting to it and the
//! content script's keep-alive. Caches are per session and start empty on
//! every load.

use crate::{
    bridge::ContextBridge,
    errors::Result,
    interceptor::{Interceptor, OutgoingRequest, ProviderRegistry},
    keeper::{LivenessKeeper, PingSource},
    page::PageBus,
    runtime::ExtensionRuntime,
    storage::ProfileSettings,
    types::PageMessage,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Live page load wired to the extension runtime
pub struct PageSession {
    bus: PageBus,
    bridge: ContextBridge,
    interceptor: Interceptor,
    settings: ProfileSettings,
    listener: JoinHandle<()>,
    keeper: Option<LivenessKeeper>,
}

impl PageSession {
    /// Load a page with the built-in providers
    pub fn load(runtime: &ExtensionRuntime) -> Result<Self> {
        Self::load_with_providers(runtime, ProviderRegistry::with_defaults()?)
    }

    /// Load a page with a custom provider table
    pub fn load_with_providers(runtime: &ExtensionRuntime, providers: ProviderRegistry) -> Result<Self> {
        let config = runtime.config().clone();
        let settings = runtime.settings().clone();
        let bus = PageBus::new();
        let bridge = ContextBridge::new(runtime.clone(), settings.clone(), config.clone());
        let listener = bridge.listen(&bus);
        let interceptor =
            Interceptor::with_providers(providers, bus.clone(), settings.clone(), config.clone());
        let keeper = LivenessKeeper::spawn(
            PingSource::ContentScript,
            Arc::new(runtime.clone()),
            config.content_keepalive(),
        );
        info!("Page session loaded");

        Ok(Self {
            bus,
            bridge,
            interceptor,
            settings,
            listener,
            keeper: Some(keeper),
        })
    }

    /// Page message bus
    pub fn bus(&self) -> &PageBus {
        &self.bus
    }

    /// Content-script bridge
    pub fn bridge(&self) -> &ContextBridge {
        &self.bridge
    }

    /// Page-realm interceptor
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Shorthand for [`Interceptor::intercept`]
    pub async fn intercept(&self, request: OutgoingRequest) -> OutgoingRequest {
        self.interceptor.intercept(request).await
    }

    /// Persist the memory toggle and announce it on the page bus
    pub async fn set_memory_enabled(&self, enabled: bool) -> Result<()> {
        self.settings.set_memory_enabled(enabled).await?;
        self.bus.post(PageMessage::MemoryToggle { enabled });
        debug!("Memory toggle set to {}", enabled);
        Ok(())
    }

    /// Tear the page down; also happens on drop
    pub fn unload(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.listener.abort();
        if let Some(keeper) = self.keeper.take() {
            keeper.stop();
            debug!("Page session unloaded");
        }
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.stop();
    }
}
