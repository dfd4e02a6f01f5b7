//! In-memory market-data registries.
//!
//! Each registry owns its records and a typed dispatcher. Every key gets its
//! own topic on first use, and tickers and books are also published on a
//! per-venue aggregate topic. A record is published only after a successful
//! merge that changed the stored state.

mod holdings;
mod orderbook;
mod ticker;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use agora_core::sync::{read, write};
use agora_core::{AgoraError, AssetClass, CurrencyPair, Dispatcher, Pipe, TopicId};

pub use holdings::HoldingsRegistry;
pub use orderbook::{OrderbookRegistry, SnapshotRequest, SnapshotRequester};
pub use ticker::TickerRegistry;

/// Result of feeding one record into a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Stored and published.
    Published,
    /// Merged into an identical state; nothing published.
    Unchanged,
    /// Dropped without touching the stored state.
    Ignored,
    /// The book failed its invariant and is now stale.
    Stale,
}

/// Key for per-instrument records; the venue part is lower-cased.
pub(crate) type InstrumentKey = (String, CurrencyPair, AssetClass);

pub(crate) fn instrument_key(venue: &str, pair: &CurrencyPair, class: AssetClass) -> InstrumentKey {
    (venue_key(venue), pair.clone(), class)
}

pub(crate) fn venue_key(venue: &str) -> String {
    venue.to_lowercase()
}

pub(crate) fn check_venue(venue: &str) -> Result<(), AgoraError> {
    if venue.trim().is_empty() {
        return Err(AgoraError::InvalidArg("record has no venue name".into()));
    }
    Ok(())
}

pub(crate) struct Entry<V> {
    pub(crate) topic: TopicId,
    pub(crate) value: tokio::sync::RwLock<Option<V>>,
}

/// Keyed records with one topic per key plus one per venue.
pub(crate) struct Store<K, V> {
    bus: Dispatcher<V>,
    entries: RwLock<HashMap<K, Arc<Entry<V>>>>,
    venues: RwLock<HashMap<String, TopicId>>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(bus: Dispatcher<V>) -> Self {
        Self {
            bus,
            entries: RwLock::new(HashMap::new()),
            venues: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn bus(&self) -> &Dispatcher<V> {
        &self.bus
    }

    /// Entry for `key`, created with a fresh topic on first use.
    pub(crate) fn entry(&self, key: &K) -> Arc<Entry<V>> {
        if let Some(e) = read(&self.entries).get(key) {
            return Arc::clone(e);
        }
        let mut map = write(&self.entries);
        Arc::clone(map.entry(key.clone()).or_insert_with(|| {
            Arc::new(Entry {
                topic: self.bus.register_topic(),
                value: tokio::sync::RwLock::new(None),
            })
        }))
    }

    pub(crate) fn existing(&self, key: &K) -> Option<Arc<Entry<V>>> {
        read(&self.entries).get(key).cloned()
    }

    pub(crate) fn venue_topic(&self, venue: &str) -> TopicId {
        let key = venue_key(venue);
        if let Some(t) = read(&self.venues).get(&key) {
            return *t;
        }
        *write(&self.venues)
            .entry(key)
            .or_insert_with(|| self.bus.register_topic())
    }

    /// Publish to the key topic and, when given, the venue topic.
    pub(crate) async fn publish(
        &self,
        topic: TopicId,
        venue: Option<&str>,
        value: V,
    ) -> Result<(), AgoraError> {
        match venue {
            Some(v) => {
                let aggregate = self.venue_topic(v);
                self.bus.publish(topic, value.clone()).await?;
                self.bus.publish(aggregate, value).await
            }
            None => self.bus.publish(topic, value).await,
        }
    }

    pub(crate) fn subscribe(&self, key: &K) -> Result<Pipe<V>, AgoraError> {
        self.bus.subscribe(self.entry(key).topic)
    }

    pub(crate) fn subscribe_venue(&self, venue: &str) -> Result<Pipe<V>, AgoraError> {
        self.bus.subscribe(self.venue_topic(venue))
    }

    pub(crate) async fn get(&self, key: &K) -> Option<V> {
        let entry = self.existing(key)?;
        let guard = entry.value.read().await;
        guard.clone()
    }

    /// Snapshot of every stored record.
    pub(crate) async fn list(&self) -> Vec<V> {
        let entries: Vec<Arc<Entry<V>>> = read(&self.entries).values().cloned().collect();
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            if let Some(v) = e.value.read().await.clone() {
                out.push(v);
            }
        }
        out
    }
}
