use agora_core::{AgoraError, AssetClass, CurrencyPair, Dispatcher, Pipe, Ticker};

use super::{InstrumentKey, ProcessOutcome, Store, check_venue, instrument_key};

/// Latest ticker per (venue, instrument, asset class).
pub struct TickerRegistry {
    store: Store<InstrumentKey, Ticker>,
}

impl TickerRegistry {
    /// Registry publishing on `bus`.
    #[must_use]
    pub fn new(bus: Dispatcher<Ticker>) -> Self {
        Self {
            store: Store::new(bus),
        }
    }

    /// Dispatcher carrying ticker topics.
    #[must_use]
    pub fn bus(&self) -> &Dispatcher<Ticker> {
        self.store.bus()
    }

    /// Replace the stored ticker.
    ///
    /// Updates older than the stored one are ignored. A newer update with the
    /// same values refreshes the timestamp without publishing. The stored
    /// ticker changes only once the publish went through.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::market::ticker::process",
            skip(self, ticker),
            fields(venue = %ticker.venue, pair = %ticker.pair, class = %ticker.asset_class),
        )
    )]
    pub async fn process(&self, ticker: Ticker) -> Result<ProcessOutcome, AgoraError> {
        check_venue(&ticker.venue)?;
        if ticker.last.is_sign_negative()
            || ticker.bid.is_sign_negative()
            || ticker.ask.is_sign_negative()
        {
            return Err(AgoraError::InvalidArg(format!(
                "{} {} ticker carries a negative price",
                ticker.venue, ticker.pair
            )));
        }
        let entry = self
            .store
            .entry(&instrument_key(&ticker.venue, &ticker.pair, ticker.asset_class));
        let mut slot = entry.value.write().await;
        if let Some(prev) = slot.as_ref() {
            if ticker.last_updated < prev.last_updated {
                return Ok(ProcessOutcome::Ignored);
            }
            if prev.same_values(&ticker) {
                *slot = Some(ticker);
                return Ok(ProcessOutcome::Unchanged);
            }
        }
        self.store
            .publish(entry.topic, Some(&ticker.venue), ticker.clone())
            .await?;
        *slot = Some(ticker);
        Ok(ProcessOutcome::Published)
    }

    /// Stored ticker.
    pub async fn get(
        &self,
        venue: &str,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Ticker, AgoraError> {
        self.store
            .get(&instrument_key(venue, pair, class))
            .await
            .ok_or_else(|| AgoraError::not_found(format!("ticker {venue} {class} {pair}")))
    }

    /// Subscribe to one instrument.
    pub fn subscribe(
        &self,
        venue: &str,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Pipe<Ticker>, AgoraError> {
        self.store.subscribe(&instrument_key(venue, pair, class))
    }

    /// Subscribe to every ticker of `venue`.
    pub fn subscribe_venue(&self, venue: &str) -> Result<Pipe<Ticker>, AgoraError> {
        self.store.subscribe_venue(venue)
    }

    /// Every stored ticker.
    pub async fn list(&self) -> Vec<Ticker> {
        self.store.list().await
    }
}
