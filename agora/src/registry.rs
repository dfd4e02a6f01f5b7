//! Loaded venue adapters keyed by case-insensitive name.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use agora_core::sync::{read, write};
use agora_core::{AgoraError, VenueConfig, VenueConnector};

#[derive(Clone)]
struct Loaded {
    connector: Arc<dyn VenueConnector>,
    config: VenueConfig,
}

/// Thread-safe map of venue adapters.
///
/// Lookups clone the adapter handle out under the lock; callers never hold
/// the lock across an adapter call. Cloning the registry shares the map.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    inner: Arc<RwLock<BTreeMap<String, Loaded>>>,
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("venues", &read(&self.inner).keys().collect::<Vec<_>>())
            .finish()
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ExchangeRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with a default configuration snapshot.
    pub fn add(&self, connector: Arc<dyn VenueConnector>) -> Result<(), AgoraError> {
        let config = VenueConfig::new(connector.name());
        self.add_with_config(connector, config)
    }

    /// Insert with `config`; the snapshot's name is forced to the adapter's.
    pub fn add_with_config(
        &self,
        connector: Arc<dyn VenueConnector>,
        mut config: VenueConfig,
    ) -> Result<(), AgoraError> {
        let name = connector.name().to_string();
        if name.trim().is_empty() {
            return Err(AgoraError::InvalidArg("venue name is empty".into()));
        }
        config.name.clone_from(&name);
        let mut map = write(&self.inner);
        let k = key(&name);
        if map.contains_key(&k) {
            return Err(AgoraError::DuplicateVenue(name));
        }
        map.insert(k, Loaded { connector, config });
        Ok(())
    }

    /// Adapter named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn VenueConnector>> {
        read(&self.inner)
            .get(&key(name))
            .map(|l| Arc::clone(&l.connector))
    }

    /// Adapter named `name`, failing with `unknown-venue` when absent or disabled.
    pub fn get_enabled(&self, name: &str) -> Result<Arc<dyn VenueConnector>, AgoraError> {
        self.get(name)
            .filter(|c| c.is_enabled())
            .ok_or_else(|| AgoraError::unknown_venue(name))
    }

    /// Remove `name`; true if it was present.
    pub fn remove(&self, name: &str) -> bool {
        write(&self.inner).remove(&key(name)).is_some()
    }

    /// Every adapter, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn VenueConnector>> {
        read(&self.inner)
            .values()
            .map(|l| Arc::clone(&l.connector))
            .collect()
    }

    /// Enabled adapters, ordered by name.
    #[must_use]
    pub fn list_enabled(&self) -> Vec<Arc<dyn VenueConnector>> {
        self.list().into_iter().filter(|c| c.is_enabled()).collect()
    }

    /// Number of loaded adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    /// True when nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.inner).is_empty()
    }

    /// Configuration snapshot of `name`.
    #[must_use]
    pub fn config(&self, name: &str) -> Option<VenueConfig> {
        read(&self.inner).get(&key(name)).map(|l| l.config.clone())
    }

    /// Replace the snapshot of `name` and hand it to the adapter.
    pub async fn update_config(&self, name: &str, mut config: VenueConfig) -> Result<(), AgoraError> {
        let connector = self.get(name).ok_or_else(|| AgoraError::unknown_venue(name))?;
        config.name = connector.name().to_string();
        connector.setup(&config).await?;
        if let Some(l) = write(&self.inner).get_mut(&key(name)) {
            l.config = config;
        }
        Ok(())
    }

    /// Call `setup` on every adapter with its snapshot.
    ///
    /// Returns the first error after attempting every adapter.
    pub async fn setup_all(&self) -> Result<(), AgoraError> {
        let loaded: Vec<Loaded> = read(&self.inner).values().cloned().collect();
        let mut first = None;
        for l in loaded {
            if let Err(e) = l.connector.setup(&l.config).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(venue = l.connector.name(), error = %e, "venue setup failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
