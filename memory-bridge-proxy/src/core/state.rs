use crate::core::config::Settings;
use memory_bridge::{
    BridgeConfig, ConversationSaver, ExtensionRuntime, FileStore, HttpMemoryService,
    KeyValueStore, MemoryService, PageSession, ProfileSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything the route handlers share
#[derive(Clone)]
pub struct AppState {
    pub runtime: ExtensionRuntime,
    pub session: Arc<PageSession>,
    pub saver: ConversationSaver,
    pub profile: ProfileSettings,
    pub upstream: Upstream,
}

/// Where chat traffic is forwarded
#[derive(Clone)]
pub struct Upstream {
    pub client: reqwest::Client,
    pub base: String,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let path = match &settings.storage.path {
            Some(path) => path.clone(),
            None => FileStore::default_path()?,
        };
        info!("Using settings file {}", path.display());
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(path));

        let bridge = settings.bridge.clone();
        let service: Arc<dyn MemoryService> = Arc::new(HttpMemoryService::new(&bridge)?);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.proxy.timeout_seconds))
            .build()?;

        Self::assemble(
            bridge,
            ProfileSettings::new(store),
            service,
            Upstream {
                client,
                base: settings.upstream_base().to_string(),
                max_body_bytes: settings.proxy.max_body_bytes,
            },
        )
    }

    pub fn assemble(
        bridge: BridgeConfig,
        profile: ProfileSettings,
        service: Arc<dyn MemoryService>,
        upstream: Upstream,
    ) -> anyhow::Result<Self> {
        let bridge = Arc::new(bridge);
        let runtime = ExtensionRuntime::start(bridge.clone(), profile.clone(), service);
        let session = Arc::new(PageSession::load(&runtime)?);
        let saver = ConversationSaver::new(runtime.clone(), profile.clone(), bridge);
        Ok(Self {
            runtime,
            session,
            saver,
            profile,
            upstream,
        })
    }
}
