use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use agora_core::{AgoraError, ConnectivityConfig, SubsystemName};

use crate::supervisor::{Lifecycle, PeriodicWorker, Subsystem, WorkerSlot};

/// Read-only view of the connectivity flag; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityStatus(Arc<AtomicBool>);

impl ConnectivityStatus {
    /// True when the last check reached at least one DNS name and one HTTP target.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, online: bool) {
        let was = self.0.swap(online, Ordering::AcqRel);
        if was != online {
            #[cfg(feature = "tracing")]
            tracing::info!(online, "internet connectivity changed");
        }
    }
}

/// `internet_monitor` subsystem.
pub struct ConnectivityMonitor {
    lifecycle: Arc<Lifecycle>,
    config: ConnectivityConfig,
    status: ConnectivityStatus,
    worker: WorkerSlot,
}

impl ConnectivityMonitor {
    /// Monitor with an initially offline status.
    #[must_use]
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(SubsystemName::InternetMonitor)),
            config,
            status: ConnectivityStatus::default(),
            worker: WorkerSlot::default(),
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status_handle(&self) -> ConnectivityStatus {
        self.status.clone()
    }

    /// Last observed connectivity.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        self.config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| AgoraError::ConfigInvalid(format!("http client: {e}")))?;
        let probe = Probe {
            config: self.config.clone(),
            client,
            status: self.status.clone(),
        };
        probe.run().await;
        let probe = Arc::new(probe);
        self.worker.put(PeriodicWorker::spawn(
            Arc::clone(&self.lifecycle),
            self.config.check_interval,
            move || {
                let probe = Arc::clone(&probe);
                async move {
                    probe.run().await;
                    Ok(())
                }
            },
        ));
        Ok(())
    }
}

struct Probe {
    config: ConnectivityConfig,
    client: reqwest::Client,
    status: ConnectivityStatus,
}

impl Probe {
    async fn run(&self) {
        let (dns, http) = tokio::join!(self.any_dns(), self.any_http());
        self.status.set(dns && http);
    }

    async fn any_dns(&self) -> bool {
        let timeout = self.config.request_timeout;
        join_all(self.config.dns_names.iter().map(|n| resolve(n, timeout)))
            .await
            .into_iter()
            .any(|ok| ok)
    }

    async fn any_http(&self) -> bool {
        join_all(self.config.http_targets.iter().map(|t| self.fetch(t)))
            .await
            .into_iter()
            .any(|ok| ok)
    }

    async fn fetch(&self, target: &str) -> bool {
        match self.client.get(target).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(url = target, error = %_e, "http check failed");
                false
            }
        }
    }
}

async fn resolve(name: &str, timeout: Duration) -> bool {
    let host = if name.contains(':') {
        name.to_string()
    } else {
        format!("{name}:80")
    };
    match tokio::time::timeout(timeout, tokio::net::lookup_host(host)).await {
        Ok(Ok(mut addrs)) => addrs.next().is_some(),
        _ => false,
    }
}

#[async_trait]
impl Subsystem for ConnectivityMonitor {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .stop_with(async {
                self.worker.stop().await;
                self.status.set(false);
                Ok(())
            })
            .await
    }
}
