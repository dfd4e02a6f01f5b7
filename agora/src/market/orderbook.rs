use std::sync::{Arc, RwLock};

use agora_core::orderbook::merge;
use agora_core::sync::{read, write};
use agora_core::{
    AgoraError, AssetClass, CurrencyPair, Dispatcher, Orderbook, OrderbookUpdate, Pipe, UpdateKind,
};

use super::{InstrumentKey, ProcessOutcome, Store, check_venue, instrument_key};

/// Book that needs a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Venue name.
    pub venue: String,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
}

/// Receives snapshot requests for stale books.
///
/// Called after the book's lock is released. Implementations must not block;
/// the engine's requester spawns the adapter call.
pub trait SnapshotRequester: Send + Sync {
    /// Ask for a fresh snapshot.
    fn request_snapshot(&self, request: SnapshotRequest);
}

/// Merged orderbook per (venue, instrument, asset class).
pub struct OrderbookRegistry {
    store: Store<InstrumentKey, Orderbook>,
    requester: RwLock<Option<Arc<dyn SnapshotRequester>>>,
}

impl OrderbookRegistry {
    /// Registry publishing on `bus`.
    #[must_use]
    pub fn new(bus: Dispatcher<Orderbook>) -> Self {
        Self {
            store: Store::new(bus),
            requester: RwLock::new(None),
        }
    }

    /// Dispatcher carrying orderbook topics.
    #[must_use]
    pub fn bus(&self) -> &Dispatcher<Orderbook> {
        self.store.bus()
    }

    /// Install the hook used when a book goes stale.
    pub fn set_requester(&self, requester: Arc<dyn SnapshotRequester>) {
        *write(&self.requester) = Some(requester);
    }

    /// Merge `update` into the stored book.
    ///
    /// Deltas are ignored while the book is stale. An update that would cross
    /// the book is not applied: the previous levels are kept, the book is
    /// flagged stale and a snapshot is requested. Nothing is stored when the
    /// publish fails.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::market::orderbook::process",
            skip(self, update),
            fields(venue = %update.venue, pair = %update.pair, kind = ?update.kind),
        )
    )]
    pub async fn process(&self, update: OrderbookUpdate) -> Result<ProcessOutcome, AgoraError> {
        check_venue(&update.venue)?;
        let entry = self
            .store
            .entry(&instrument_key(&update.venue, &update.pair, update.asset_class));
        let mut slot = entry.value.write().await;
        let current = slot.clone().unwrap_or_else(|| {
            Orderbook::empty(update.venue.clone(), update.pair.clone(), update.asset_class)
        });

        if current.stale && update.kind == UpdateKind::Delta {
            return Ok(ProcessOutcome::Ignored);
        }

        match merge(&current, &update) {
            Ok(merged) if !merged.changed => Ok(ProcessOutcome::Unchanged),
            Ok(merged) => {
                self.store
                    .publish(entry.topic, Some(&update.venue), merged.book.clone())
                    .await?;
                *slot = Some(merged.book);
                Ok(ProcessOutcome::Published)
            }
            #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(class = %update.asset_class, error = %e, "orderbook marked stale");
                let mut stale = current;
                if !stale.stale {
                    stale.stale = true;
                    self.store
                        .publish(entry.topic, Some(&update.venue), stale.clone())
                        .await?;
                }
                *slot = Some(stale);
                drop(slot);
                // A crossed snapshot is not re-requested; the next scheduled
                // refresh replaces it.
                if update.kind == UpdateKind::Delta {
                    self.request_snapshot(&update);
                }
                Ok(ProcessOutcome::Stale)
            }
        }
    }

    fn request_snapshot(&self, update: &OrderbookUpdate) {
        let requester = read(&self.requester).clone();
        if let Some(r) = requester {
            r.request_snapshot(SnapshotRequest {
                venue: update.venue.clone(),
                pair: update.pair.clone(),
                asset_class: update.asset_class,
            });
        }
    }

    /// Stored book.
    pub async fn get(
        &self,
        venue: &str,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Orderbook, AgoraError> {
        self.store
            .get(&instrument_key(venue, pair, class))
            .await
            .ok_or_else(|| AgoraError::not_found(format!("orderbook {venue} {class} {pair}")))
    }

    /// Subscribe to one book.
    pub fn subscribe(
        &self,
        venue: &str,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Pipe<Orderbook>, AgoraError> {
        self.store.subscribe(&instrument_key(venue, pair, class))
    }

    /// Subscribe to every book of `venue`.
    pub fn subscribe_venue(&self, venue: &str) -> Result<Pipe<Orderbook>, AgoraError> {
        self.store.subscribe_venue(venue)
    }

    /// Every stored book.
    pub async fn list(&self) -> Vec<Orderbook> {
        self.store.list().await
    }
}
