use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::oneshot;

use agora_core::stream::StreamHandle;
use agora_core::sync::{lock, read, write};
use agora_core::{AgoraError, CommunicationsConfig, OrderEvent, SubsystemName};

use super::orders::OrderEventFeed;
use crate::supervisor::{Lifecycle, Subsystem};

/// Outbound notification sink (chat bot, SMS gateway, mailer).
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Sink name used in logs.
    fn name(&self) -> &str;

    /// Deliver one order event.
    async fn push(&self, event: &OrderEvent) -> Result<(), AgoraError>;
}

/// `communications` subsystem: relays order events to every registered sink.
///
/// A failing sink is logged and skipped; it never blocks the others. If the
/// order feed closes while the relay is running (dispatcher stopped), the
/// relay marks itself stopped.
pub struct CommunicationsRelay {
    lifecycle: Arc<Lifecycle>,
    config: CommunicationsConfig,
    feed: OrderEventFeed,
    sinks: Arc<RwLock<Vec<Arc<dyn Communicator>>>>,
    task: std::sync::Mutex<Option<StreamHandle>>,
}

impl CommunicationsRelay {
    /// Relay reading from `feed`.
    #[must_use]
    pub fn new(config: CommunicationsConfig, feed: OrderEventFeed) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(SubsystemName::Communications)),
            config,
            feed,
            sinks: Arc::new(RwLock::new(Vec::new())),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Register a sink; takes effect for the next event.
    pub fn register(&self, sink: Arc<dyn Communicator>) {
        write(&self.sinks).push(sink);
    }

    /// Names of registered sinks.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        read(&self.sinks).iter().map(|s| s.name().to_string()).collect()
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &CommunicationsConfig {
        &self.config
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        let mut pipe = self.feed.subscribe()?;
        let sinks = Arc::clone(&self.sinks);
        let lifecycle = Arc::clone(&self.lifecycle);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    next = pipe.recv() => {
                        let Some(event) = next else {
                            #[cfg(feature = "tracing")]
                            tracing::error!("order event feed closed; communications relay stopping");
                            lifecycle.fail();
                            break;
                        };
                        let targets: Vec<_> = read(&sinks).clone();
                        for sink in targets {
                            if let Err(_e) = sink.push(&event).await {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(sink = sink.name(), error = %_e, "communicator push failed");
                            }
                        }
                    }
                }
            }
            pipe.release();
        });
        *lock(&self.task) = Some(StreamHandle::new(task, stop_tx));
        Ok(())
    }
}

#[async_trait]
impl Subsystem for CommunicationsRelay {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .stop_with(async {
                let task = lock(&self.task).take();
                if let Some(t) = task {
                    t.stop().await;
                }
                Ok(())
            })
            .await
    }
}
