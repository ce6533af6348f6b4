//! Long-lived duplex Channels between realms
//!
//! A Channel is a pair of [`Port`]s joined by two bounded mpsc queues. Dropping
//! either port (or both halves of it) is a disconnect: the peer's receiver
//! yields `None` and its sender starts failing. Nothing else is shared between
//! the two ends.

use crate::errors::Result;
use crate::types::{ChannelRequest, ChannelResponse};
use tokio::sync::mpsc;

pub mod client;

pub use client::ChannelClient;

const PORT_BUFFER: usize = 64;

/// Port held by the requesting side (content script, popup)
pub type ClientPort = Port<ChannelRequest, ChannelResponse>;

/// Port held by the background gateway
pub type GatewayPort = Port<ChannelResponse, ChannelRequest>;

/// Connection state of a Channel end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Peer still attached
    Open,
    /// Peer gone
    Closed,
}

/// One end of a Channel: sends `S`, receives `R`
#[derive(Debug)]
pub struct Port<S, R> {
    name: String,
    sender: PortSender<S>,
    receiver: PortReceiver<R>,
}

/// Sending half of a port
#[derive(Debug)]
pub struct PortSender<S> {
    name: String,
    tx: mpsc::Sender<S>,
}

impl<S> Clone for PortSender<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of a port
#[derive(Debug)]
pub struct PortReceiver<R> {
    rx: mpsc::Receiver<R>,
}

/// Create both ends of a named Channel
pub fn pair(name: impl Into<String>) -> (ClientPort, GatewayPort) {
    let name = name.into();
    let (request_tx, request_rx) = mpsc::channel(PORT_BUFFER);
    let (response_tx, response_rx) = mpsc::channel(PORT_BUFFER);

    let client = Port {
        name: name.clone(),
        sender: PortSender {
            name: name.clone(),
            tx: request_tx,
        },
        receiver: PortReceiver { rx: response_rx },
    };
    let gateway = Port {
        name: name.clone(),
        sender: PortSender {
            name,
            tx: response_tx,
        },
        receiver: PortReceiver { rx: request_rx },
    };
    (client, gateway)
}

impl<S, R> Port<S, R> {
    /// Channel name the port was opened with
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Split into independently owned halves
    pub fn split(self) -> (PortSender<S>, PortReceiver<R>) {
        (self.sender, self.receiver)
    }

    /// Post a message to the peer
    pub async fn post(&self, message: S) -> Result<()> {
        self.sender.post(message).await
    }

    /// Next message from the peer; `None` once the peer disconnected
    pub async fn recv(&mut self) -> Option<R> {
        self.receiver.recv().await
    }
}

impl<S> PortSender<S> {
    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a message to the peer
    pub async fn post(&self, message: S) -> Result<()> {
        self.tx.send(message).await?;
        Ok(())
    }

    /// Whether the peer has stopped receiving
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Current state as seen from this half
    pub fn state(&self) -> ChannelState {
        if self.is_closed() {
            ChannelState::Closed
        } else {
            ChannelState::Open
        }
    }
}

impl<R> PortReceiver<R> {
    /// Next message from the peer; `None` once the peer disconnected
    pub async fn recv(&mut self) -> Option<R> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BridgeError;
    use crate::types::CorrelationId;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (client, mut gateway) = pair("alchemyst");
        assert_eq!(client.name(), "alchemyst");

        client
            .post(ChannelRequest::FetchContext {
                id: "req_1".into(),
                query: "q".into(),
            })
            .await
            .unwrap();
        let request = gateway.recv().await.unwrap();
        assert_eq!(request.id(), &CorrelationId::from("req_1"));

        let (sender, _receiver) = gateway.split();
        sender
            .post(ChannelResponse::context("req_1".into(), "ctx"))
            .await
            .unwrap();
        let (_client_tx, mut client_rx) = client.split();
        let response = client_rx.recv().await.unwrap();
        assert_eq!(response.context.as_deref(), Some("ctx"));
    }

    #[tokio::test]
    async fn test_drop_is_disconnect() {
        let (client, gateway) = pair("alchemyst");
        let (sender, _rx) = gateway.split();
        assert_eq!(sender.state(), ChannelState::Open);

        drop(client);
        assert!(sender.is_closed());
        assert!(matches!(
            sender
                .post(ChannelResponse::context("req_1".into(), ""))
                .await,
            Err(BridgeError::ChannelSendError)
        ));
    }

    #[tokio::test]
    async fn test_receiver_sees_none_after_peer_drop() {
        let (client, mut gateway) = pair("alchemyst");
        drop(client);
        assert!(gateway.recv().await.is_none());
    }
}
