//! Memory service abstractions
//!
//! The gateway talks to the remote memory service through the
//! [`MemoryService`] trait. [`HttpMemoryService`] is the real client; the
//! [`mock`] module provides a scripted in-memory double for tests.

use crate::{
    errors::Result,
    types::{AddMemoryRequest, SearchRequest},
};
use async_trait::async_trait;

pub mod http;
pub mod mock;

pub use http::HttpMemoryService;

/// Status and raw body of one memory service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
}

impl ServiceResponse {
    /// Build a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound calls to the memory service
///
/// Implementations return `Ok` for any HTTP response, whatever its status;
/// `Err` is reserved for calls that produced no response at all.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// POST a search
    async fn search(&self, api_key: &str, request: &SearchRequest) -> Result<ServiceResponse>;

    /// POST a batch of memory contents
    async fn add(&self, api_key: &str, request: &AddMemoryRequest) -> Result<ServiceResponse>;
}
