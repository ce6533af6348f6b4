//! The page message bus shared by the page realm and the content script
//!
//! Every posted message reaches every current subscriber, including the
//! poster, just like `window.postMessage` on a page. Messages posted while
//! nobody listens are lost.

use crate::types::{CorrelationId, PageMessage};
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

const BUS_CAPACITY: usize = 256;

/// Broadcast bus for [`PageMessage`]s within one page load
#[derive(Clone)]
pub struct PageBus {
    tx: broadcast::Sender<PageMessage>,
}

impl Default for PageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PageBus {
    /// Create a bus with no listeners
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Post a message; returns how many listeners saw it
    pub fn post(&self, message: PageMessage) -> usize {
        match self.tx.send(message) {
            Ok(listeners) => listeners,
            Err(_) => {
                debug!("Page message posted with no listeners");
                0
            },
        }
    }

    /// Raw subscription
    pub fn subscribe(&self) -> broadcast::Receiver<PageMessage> {
        self.tx.subscribe()
    }

    /// Subscription as a stream; lagged gaps are logged and skipped
    pub fn messages(&self) -> impl Stream<Item = PageMessage> + Send + use<> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Page bus listener lagged: {}", e);
                    None
                },
            }
        })
    }

    /// Post a context request and wait for the reply carrying the same id
    ///
    /// Returns `None` when no reply arrives within `wait`.
    pub async fn request_context(&self, query: &str, wait: Duration) -> Option<String> {
        let request_id = CorrelationId::generate();
        // Subscribe before posting so the reply cannot be missed
        let replies = self.messages();
        self.post(PageMessage::ContextRequest {
            request_id: Some(request_id.clone()),
            query: query.to_string(),
        });

        let wanted = request_id.clone();
        let mut replies = replies
            .filter_map(move |message| {
                let wanted = wanted.clone();
                async move {
                    match message {
                        PageMessage::ContextReply {
                            request_id: Some(id),
                            payload,
                        } if id == wanted => Some(payload),
                        _ => None,
                    }
                }
            })
            .boxed();

        match tokio::time::timeout(wait, replies.next()).await {
            Ok(payload) => payload,
            Err(_) => {
                debug!("Context request {} timed out after {:?}", request_id, wait);
                None
            },
        }
    }
}
