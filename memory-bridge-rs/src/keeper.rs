//! Periodic keep-alive pings that hold the background worker awake

use crate::{
    errors::{BridgeError, Result},
    runtime::{ExtensionRuntime, WeakRuntime},
    types::{RuntimeMessage, RuntimeReply},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

/// Anything that accepts a keep-alive runtime message
#[async_trait]
pub trait KeepAliveTarget: Send + Sync {
    /// Deliver one message
    async fn send_message(&self, message: RuntimeMessage) -> Result<RuntimeReply>;
}

#[async_trait]
impl KeepAliveTarget for ExtensionRuntime {
    async fn send_message(&self, message: RuntimeMessage) -> Result<RuntimeReply> {
        ExtensionRuntime::send_message(self, message).await
    }
}

#[async_trait]
impl KeepAliveTarget for WeakRuntime {
    async fn send_message(&self, message: RuntimeMessage) -> Result<RuntimeReply> {
        match self.upgrade() {
            Some(runtime) => runtime.send_message(message).await,
            None => Err(BridgeError::ChannelClosed),
        }
    }
}

/// Where pings originate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingSource {
    /// Sends `keepAlive` from each chat page
    ContentScript,
    /// Sends `ping` from the extension's hidden document
    OffscreenDocument,
}

impl PingSource {
    fn message(self) -> RuntimeMessage {
        match self {
            PingSource::ContentScript => RuntimeMessage::KeepAlive,
            PingSource::OffscreenDocument => RuntimeMessage::Ping,
        }
    }
}

/// Background task sending one ping per period
///
/// Delivery failures are logged and otherwise ignored; the next tick tries
/// again. The task stops when the keeper is dropped.
pub struct LivenessKeeper {
    source: PingSource,
    handle: JoinHandle<()>,
}

impl LivenessKeeper {
    /// Start pinging `target` every `period`, first ping one period from now
    pub fn spawn(source: PingSource, target: Arc<dyn KeepAliveTarget>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match target.send_message(source.message()).await {
                    Ok(_) => debug!("{:?} keep-alive delivered", source),
                    Err(e) => debug!("{:?} keep-alive failed: {}", source, e),
                }
            }
        });
        Self { source, handle }
    }

    /// Origin of this keeper's pings
    pub fn source(&self) -> PingSource {
        self.source
    }

    /// Whether the ping task is still scheduled
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop pinging
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for LivenessKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        keep_alive: AtomicUsize,
        ping: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl KeepAliveTarget for Counter {
        async fn send_message(&self, message: RuntimeMessage) -> Result<RuntimeReply> {
            match message {
                RuntimeMessage::KeepAlive => self.keep_alive.fetch_add(1, Ordering::SeqCst),
                RuntimeMessage::Ping => self.ping.fetch_add(1, Ordering::SeqCst),
            };
            if self.fail {
                return Err(BridgeError::ChannelClosed);
            }
            Ok(RuntimeReply { ok: true, ts: None })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_once_per_period() {
        let counter = Arc::new(Counter::default());
        let keeper = LivenessKeeper::spawn(
            PingSource::ContentScript,
            counter.clone(),
            Duration::from_secs(30),
        );

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(counter.keep_alive.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(counter.keep_alive.load(Ordering::SeqCst), 3);
        assert_eq!(counter.ping.load(Ordering::SeqCst), 0);

        keeper.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.keep_alive.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_keeper() {
        let counter = Arc::new(Counter {
            fail: true,
            ..Default::default()
        });
        let keeper = LivenessKeeper::spawn(
            PingSource::OffscreenDocument,
            counter.clone(),
            Duration::from_secs(25),
        );

        tokio::time::sleep(Duration::from_secs(76)).await;
        assert_eq!(counter.ping.load(Ordering::SeqCst), 3);
        assert!(keeper.is_running());
        assert_eq!(keeper.source(), PingSource::OffscreenDocument);
    }

    #[tokio::test]
    async fn test_weak_target_reports_closed_after_drop() {
        let runtime = ExtensionRuntime::start(
            Arc::new(crate::config::BridgeConfig {
                offscreen_keepalive_ms: None,
                ..Default::default()
            }),
            crate::storage::ProfileSettings::in_memory(),
            Arc::new(crate::memory_api::mock::MockMemoryService::new()),
        );
        let weak = runtime.downgrade();
        assert!(KeepAliveTarget::send_message(&weak, RuntimeMessage::Ping).await.is_ok());

        runtime.shutdown();
        drop(runtime);
        assert!(
            KeepAliveTarget::send_message(&weak, RuntimeMessage::Ping)
                .await
                .is_err()
        );
    }
}
