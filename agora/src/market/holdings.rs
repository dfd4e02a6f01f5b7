use agora_core::{AccountHoldings, AgoraError, Dispatcher, Pipe};

use super::{ProcessOutcome, Store, check_venue, venue_key};

/// Account holdings per venue, replaced whole on every update.
pub struct HoldingsRegistry {
    store: Store<String, AccountHoldings>,
}

impl HoldingsRegistry {
    /// Registry publishing on `bus`.
    #[must_use]
    pub fn new(bus: Dispatcher<AccountHoldings>) -> Self {
        Self {
            store: Store::new(bus),
        }
    }

    /// Dispatcher carrying holdings topics.
    #[must_use]
    pub fn bus(&self) -> &Dispatcher<AccountHoldings> {
        self.store.bus()
    }

    /// Replace the venue's holdings once they are published.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::market::holdings::process",
            skip(self, holdings),
            fields(venue = %holdings.venue),
        )
    )]
    pub async fn process(&self, holdings: AccountHoldings) -> Result<ProcessOutcome, AgoraError> {
        check_venue(&holdings.venue)?;
        let negative = holdings
            .accounts
            .iter()
            .flat_map(|a| &a.balances)
            .any(|b| b.total.is_sign_negative() || b.hold.is_sign_negative());
        if negative {
            return Err(AgoraError::InvalidArg(format!(
                "{} holdings carry a negative balance",
                holdings.venue
            )));
        }
        let entry = self.store.entry(&venue_key(&holdings.venue));
        let mut slot = entry.value.write().await;
        if slot.as_ref() == Some(&holdings) {
            return Ok(ProcessOutcome::Unchanged);
        }
        self.store.publish(entry.topic, None, holdings.clone()).await?;
        *slot = Some(holdings);
        Ok(ProcessOutcome::Published)
    }

    /// Stored holdings of `venue`.
    pub async fn get(&self, venue: &str) -> Result<AccountHoldings, AgoraError> {
        self.store
            .get(&venue_key(venue))
            .await
            .ok_or_else(|| AgoraError::not_found(format!("holdings {venue}")))
    }

    /// Subscribe to `venue`'s holdings.
    pub fn subscribe(&self, venue: &str) -> Result<Pipe<AccountHoldings>, AgoraError> {
        self.store.subscribe(&venue_key(venue))
    }

    /// Every venue's holdings.
    pub async fn list(&self) -> Vec<AccountHoldings> {
        self.store.list().await
    }
}
