//! Requesting side of a Channel, multiplexing many waiters by correlation id

use super::{ClientPort, PortReceiver, PortSender};
use crate::{
    errors::{BridgeError, Result},
    types::{ChannelRequest, ChannelResponse, CorrelationId},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

type PendingMap = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<ChannelResponse>>>>;

/// Cheaply clonable handle over one open Channel
///
/// A background reader task routes every response to the waiter registered
/// under the same id. When the peer disconnects, every outstanding waiter is
/// released and sees [`BridgeError::ChannelClosed`].
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    sender: PortSender<ChannelRequest>,
    pending: PendingMap,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl ChannelClient {
    /// Take ownership of a port and start routing its responses
    pub fn attach(port: ClientPort) -> Self {
        let (sender, receiver) = port.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(route_responses(
            sender.name().to_string(),
            receiver,
            pending.clone(),
            open.clone(),
        ));

        Self {
            inner: Arc::new(ClientInner {
                sender,
                pending,
                open,
                reader,
            }),
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        self.inner.sender.name()
    }

    /// Whether the peer is still attached
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst) && !self.inner.sender.is_closed()
    }

    /// Whether both handles drive the same underlying Channel
    pub fn same_channel(&self, other: &ChannelClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Correlation ids still awaiting a response
    pub fn outstanding(&self) -> Vec<CorrelationId> {
        self.inner.pending.lock().keys().cloned().collect()
    }

    /// Send a request and wait for the response carrying its id
    ///
    /// On timeout the waiter is unregistered; a late response for it is then
    /// treated as unmatched and dropped.
    pub async fn request(
        &self,
        request: ChannelRequest,
        wait: Duration,
    ) -> Result<ChannelResponse> {
        if !self.is_open() {
            return Err(BridgeError::ChannelClosed);
        }

        let id = request.id().clone();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);

        debug!("Posting {} {} on channel {}", request.kind(), id, self.name());
        if let Err(e) = self.inner.sender.post(request).await {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        match timeout(wait, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                debug!("Request {} timed out after {:?}", id, wait);
                Err(BridgeError::timeout(wait))
            },
        }
    }
}

async fn route_responses(
    name: String,
    mut receiver: PortReceiver<ChannelResponse>,
    pending: PendingMap,
    open: Arc<AtomicBool>,
) {
    while let Some(response) = receiver.recv().await {
        let Some(id) = response.id.clone() else {
            warn!("Dropping response without id on channel {}", name);
            continue;
        };
        let waiter = pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!("Waiter for {} went away before delivery", id);
                }
            },
            None => warn!("Dropping unmatched response {} on channel {}", id, name),
        }
    }

    open.store(false, Ordering::SeqCst);
    let abandoned = {
        let mut map = pending.lock();
        let count = map.len();
        map.clear();
        count
    };
    debug!(
        "Channel {} disconnected, released {} waiter(s)",
        name, abandoned
    );
}
