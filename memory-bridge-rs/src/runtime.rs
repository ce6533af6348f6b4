//! Host runtime for the background gateway
//!
//! Mirrors what a browser does for an extension's background worker: the
//! worker is started on demand, accepts named Channel connections and one-shot
//! runtime messages, and is torn down after a period without events. Tearing
//! it down aborts every connection it serves together with their in-flight
//! work; peers observe a plain disconnect.

use crate::{
    channel::{self, ClientPort},
    config::BridgeConfig,
    errors::{BridgeError, Result},
    gateway::BackgroundGateway,
    keeper::{LivenessKeeper, PingSource},
    memory_api::MemoryService,
    storage::ProfileSettings,
    types::{CHANNEL_NAME, RuntimeMessage, RuntimeReply},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timestamp of the last event the worker handled
#[derive(Clone)]
pub struct ActivityClock(Arc<Mutex<Instant>>);

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    /// Clock starting now
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    /// Record an event
    pub fn touch(&self) {
        *self.0.lock() = Instant::now();
    }

    /// Time since the last event
    pub fn idle_for(&self) -> Duration {
        self.0.lock().elapsed()
    }
}

struct Worker {
    gateway: Arc<BackgroundGateway>,
    connections: JoinSet<()>,
}

impl Worker {
    // Drop finished connections
    fn reap(&mut self) {
        while self.connections.try_join_next().is_some() {}
    }
}

struct RuntimeInner {
    config: Arc<BridgeConfig>,
    settings: ProfileSettings,
    service: Arc<dyn MemoryService>,
    worker: Mutex<Option<Worker>>,
    activity: ActivityClock,
    starts: AtomicU64,
    evictions: AtomicU64,
    shut_down: AtomicBool,
    offscreen: Mutex<Option<LivenessKeeper>>,
}

/// Handle to the extension runtime; clones share the same worker
#[derive(Clone)]
pub struct ExtensionRuntime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning runtime handle, used by tasks the runtime itself owns
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// Upgrade if the runtime still exists
    pub fn upgrade(&self) -> Option<ExtensionRuntime> {
        self.inner.upgrade().map(|inner| ExtensionRuntime { inner })
    }
}

impl ExtensionRuntime {
    /// Start the runtime: worker, idle-eviction watcher and offscreen keeper
    pub fn start(
        config: Arc<BridgeConfig>,
        settings: ProfileSettings,
        service: Arc<dyn MemoryService>,
    ) -> Self {
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                config,
                settings,
                service,
                worker: Mutex::new(None),
                activity: ActivityClock::new(),
                starts: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                offscreen: Mutex::new(None),
            }),
        };

        runtime.wake();
        runtime.ensure_offscreen_document();
        tokio::spawn(watch_idle(runtime.downgrade()));
        runtime
    }

    /// Non-owning handle
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Shared configuration
    pub fn config(&self) -> &Arc<BridgeConfig> {
        &self.inner.config
    }

    /// Profile settings the runtime was started with
    pub fn settings(&self) -> &ProfileSettings {
        &self.inner.settings
    }

    /// Whether a worker is currently running
    pub fn is_worker_alive(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// How many times a worker was started (initial start included)
    pub fn start_count(&self) -> u64 {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// How many times the worker was evicted for idleness
    pub fn eviction_count(&self) -> u64 {
        self.inner.evictions.load(Ordering::SeqCst)
    }

    /// Number of Channels the current worker is serving
    pub fn connection_count(&self) -> usize {
        self.inner
            .worker
            .lock()
            .as_mut()
            .map(|worker| {
                worker.reap();
                worker.connections.len()
            })
            .unwrap_or(0)
    }

    /// Record activity on behalf of the worker
    pub fn touch(&self) {
        self.inner.activity.touch();
    }

    /// Ensure a worker is running and return its gateway
    fn wake(&self) -> Arc<BackgroundGateway> {
        let mut slot = self.inner.worker.lock();
        if let Some(worker) = slot.as_ref() {
            return worker.gateway.clone();
        }

        let generation = self.inner.starts.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Starting background worker (generation {})", generation);
        let gateway = Arc::new(BackgroundGateway::new(
            self.inner.settings.clone(),
            self.inner.service.clone(),
            self.inner.config.clone(),
        ));
        *slot = Some(Worker {
            gateway: gateway.clone(),
            connections: JoinSet::new(),
        });
        self.inner.activity.touch();
        gateway
    }

    /// Start the offscreen document's keeper unless it already runs
    pub fn ensure_offscreen_document(&self) {
        let Some(period) = self.inner.config.offscreen_keepalive() else {
            return;
        };
        let mut slot = self.inner.offscreen.lock();
        if slot.as_ref().is_some_and(LivenessKeeper::is_running) {
            return;
        }
        debug!("Creating offscreen keep-alive document");
        *slot = Some(LivenessKeeper::spawn(
            PingSource::OffscreenDocument,
            Arc::new(self.downgrade()),
            period,
        ));
    }

    /// Open a Channel to the background worker
    ///
    /// Connections under any name but the extension's own are closed by the
    /// worker straight away, so the returned port reports a disconnect.
    pub fn connect(&self, name: &str) -> Result<ClientPort> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelClosed);
        }

        self.wake();
        self.ensure_offscreen_document();
        self.inner.activity.touch();

        let (client, gateway_port) = channel::pair(name);
        if name != CHANNEL_NAME {
            debug!("Ignoring connection on unknown channel {}", name);
            return Ok(client);
        }

        let mut slot = self.inner.worker.lock();
        let Some(worker) = slot.as_mut() else {
            return Err(BridgeError::ChannelClosed);
        };
        info!("Channel connected: {}", name);
        worker.reap();
        worker.connections.spawn(
            worker
                .gateway
                .clone()
                .serve(gateway_port, self.inner.activity.clone()),
        );
        Ok(client)
    }

    /// Deliver a one-shot runtime message, waking the worker if needed
    pub async fn send_message(&self, message: RuntimeMessage) -> Result<RuntimeReply> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelClosed);
        }
        let gateway = self.wake();
        self.inner.activity.touch();
        Ok(gateway.handle_runtime_message(message))
    }

    /// Evict the worker if it has been idle for the configured period
    pub fn evict_if_idle(&self) -> bool {
        let idle = self.inner.activity.idle_for();
        if idle < self.inner.config.idle_eviction() {
            return false;
        }
        let evicted = self.inner.worker.lock().take();
        match evicted {
            Some(worker) => {
                warn!(
                    "Evicting idle background worker after {:?} ({} channel(s) dropped)",
                    idle,
                    worker.connections.len()
                );
                self.inner.evictions.fetch_add(1, Ordering::SeqCst);
                drop(worker);
                true
            },
            None => false,
        }
    }

    /// Stop the worker and the offscreen keeper for good
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        if let Some(keeper) = self.inner.offscreen.lock().take() {
            keeper.stop();
        }
        if self.inner.worker.lock().take().is_some() {
            info!("Background worker shut down");
        }
    }
}

async fn watch_idle(runtime: WeakRuntime) {
    let period = match runtime.upgrade() {
        Some(runtime) => (runtime.config().idle_eviction() / 4).max(Duration::from_millis(10)),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(runtime) = runtime.upgrade() else {
            break;
        };
        if runtime.inner.shut_down.load(Ordering::SeqCst) {
            break;
        }
        runtime.evict_if_idle();
    }
}
