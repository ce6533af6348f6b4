use config::{Config, ConfigError, Environment, File};
use memory_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProxyConfig {
    /// Chat provider origin requests are forwarded to
    pub upstream: String,
    pub timeout_seconds: u64,
    /// Largest request body read before forwarding
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    /// Settings file; defaults to the user config directory
    pub path: Option<PathBuf>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8787)?
            .set_default("proxy.upstream", "https://chatgpt.com")?
            .set_default("proxy.timeout_seconds", 300)?
            .set_default("proxy.max_body_bytes", 10 * 1024 * 1024)?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("MEMORY_BRIDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn upstream_base(&self) -> &str {
        self.proxy.upstream.trim_end_matches('/')
    }
}
