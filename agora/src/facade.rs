//! Control surface used by the RPC layer to toggle subsystems by name.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use agora_core::sync::{read, write};
use agora_core::{AgoraError, RpcEndpointConfig, SubsystemName, SubsystemStatus};

use crate::supervisor::Subsystem;

/// State of one RPC endpoint as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEndpointStatus {
    /// Set by the transport once it is listening.
    pub started: bool,
    /// Configured listen address.
    pub listen_address: String,
}

/// Name-keyed dispatch to every subsystem.
#[derive(Clone)]
pub struct Facade {
    subsystems: Arc<BTreeMap<SubsystemName, Arc<dyn Subsystem>>>,
    endpoints: Arc<RwLock<BTreeMap<String, RpcEndpointStatus>>>,
}

impl Facade {
    /// Facade over `subsystems`, advertising the enabled `endpoints`.
    #[must_use]
    pub fn new(
        subsystems: impl IntoIterator<Item = Arc<dyn Subsystem>>,
        endpoints: &[RpcEndpointConfig],
    ) -> Self {
        let subsystems = subsystems.into_iter().map(|s| (s.name(), s)).collect();
        let endpoints = endpoints
            .iter()
            .filter(|e| e.enabled)
            .map(|e| {
                (
                    e.name.clone(),
                    RpcEndpointStatus {
                        started: false,
                        listen_address: e.listen_address.clone(),
                    },
                )
            })
            .collect();
        Self {
            subsystems: Arc::new(subsystems),
            endpoints: Arc::new(RwLock::new(endpoints)),
        }
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Subsystem>, AgoraError> {
        let key: SubsystemName = name.parse()?;
        self.subsystems
            .get(&key)
            .ok_or_else(|| AgoraError::UnknownSubsystem(name.to_string()))
    }

    /// `name -> running` for every subsystem.
    #[must_use]
    pub fn list_subsystems(&self) -> BTreeMap<String, bool> {
        self.subsystems
            .iter()
            .map(|(n, s)| (n.as_str().to_string(), s.is_running()))
            .collect()
    }

    /// Start (`enable = true`) or stop the named subsystem.
    ///
    /// Errors from the subsystem are returned unchanged.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::facade::set",
            skip(self),
        )
    )]
    pub async fn set(&self, name: &str, enable: bool) -> Result<(), AgoraError> {
        let sub = self.lookup(name)?;
        #[cfg(feature = "tracing")]
        tracing::info!(subsystem = name, enable, "subsystem toggled");
        if enable { sub.start().await } else { sub.stop().await }
    }

    /// Status of the named subsystem.
    pub fn status(&self, name: &str) -> Result<SubsystemStatus, AgoraError> {
        self.lookup(name).map(|s| s.status())
    }

    /// `name -> {started, listen_address}` for every enabled endpoint.
    #[must_use]
    pub fn list_rpc_endpoints(&self) -> BTreeMap<String, RpcEndpointStatus> {
        read(&self.endpoints).clone()
    }

    /// Record whether the transport for `name` is listening.
    pub fn mark_endpoint_started(&self, name: &str, started: bool) -> Result<(), AgoraError> {
        let mut endpoints = write(&self.endpoints);
        let ep = endpoints
            .get_mut(name)
            .ok_or_else(|| AgoraError::not_found(format!("rpc endpoint {name}")))?;
        ep.started = started;
        Ok(())
    }
}
