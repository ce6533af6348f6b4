//! reqwest-backed memory service client

use super::{MemoryService, ServiceResponse};
use crate::{
    config::BridgeConfig,
    errors::Result,
    types::{AddMemoryRequest, SearchRequest},
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Memory service client speaking JSON over HTTPS
#[derive(Debug, Clone)]
pub struct HttpMemoryService {
    client: reqwest::Client,
    search_url: String,
    add_url: String,
}

impl HttpMemoryService {
    /// Build a client for the endpoints named in `config`
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing reqwest client
    pub fn with_client(client: reqwest::Client, config: &BridgeConfig) -> Self {
        Self {
            client,
            search_url: config.search_url(),
            add_url: config.add_url(),
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        api_key: &str,
        body: &B,
    ) -> Result<ServiceResponse> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!("POST {} -> {} ({} bytes)", url, status, body.len());
        Ok(ServiceResponse::new(status, body))
    }
}

#[async_trait]
impl MemoryService for HttpMemoryService {
    async fn search(&self, api_key: &str, request: &SearchRequest) -> Result<ServiceResponse> {
        self.post(&self.search_url, api_key, request).await
    }

    async fn add(&self, api_key: &str, request: &AddMemoryRequest) -> Result<ServiceResponse> {
        self.post(&self.add_url, api_key, request).await
    }
}
