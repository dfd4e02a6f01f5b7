use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::stream::StreamHandle;
use agora_types::{
    AccountHoldings, AgoraError, AssetClass, CancelAllResponse, CancelAllScope, CancelReceipt,
    CancelRequest, Capability, CurrencyPair, OrderFilter, OrderRequest, OrderbookUpdate,
    SubmitReceipt, Ticker, VenueConfig, VenueOrder,
};

bitflags! {
    /// Capability block advertised by a venue.
    ///
    /// The runtime never calls a provider method whose flag is off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Features: u32 {
        /// `TickerProvider::fetch_ticker`.
        const FETCH_TICKER = 1 << 0;
        /// `TickerProvider::update_ticker`.
        const UPDATE_TICKER = 1 << 1;
        /// `OrderbookProvider::fetch_orderbook`.
        const FETCH_ORDERBOOK = 1 << 2;
        /// `OrderbookProvider::update_orderbook`.
        const UPDATE_ORDERBOOK = 1 << 3;
        /// `AccountProvider::fetch_account_info`.
        const ACCOUNT_INFO = 1 << 4;
        /// `OrderProvider::submit_order`.
        const SUBMIT_ORDER = 1 << 5;
        /// `OrderProvider::cancel_order`.
        const CANCEL_ORDER = 1 << 6;
        /// `OrderProvider::cancel_all`.
        const CANCEL_ALL = 1 << 7;
        /// `OrderProvider::get_order`.
        const GET_ORDER = 1 << 8;
        /// `OrderProvider::active_orders`.
        const ACTIVE_ORDERS = 1 << 9;
        /// `OrderProvider::order_history`.
        const ORDER_HISTORY = 1 << 10;
        /// `DepositProvider::deposit_address`.
        const DEPOSIT_ADDRESS = 1 << 11;
        /// `StreamProvider`.
        const WEBSOCKET = 1 << 12;

        /// Both ticker methods.
        const TICKER = Self::FETCH_TICKER.bits() | Self::UPDATE_TICKER.bits();
        /// Both orderbook methods.
        const ORDERBOOK = Self::FETCH_ORDERBOOK.bits() | Self::UPDATE_ORDERBOOK.bits();
        /// Every order method.
        const ORDERS = Self::SUBMIT_ORDER.bits()
            | Self::CANCEL_ORDER.bits()
            | Self::CANCEL_ALL.bits()
            | Self::GET_ORDER.bits()
            | Self::ACTIVE_ORDERS.bits()
            | Self::ORDER_HISTORY.bits();
    }
}

impl From<Capability> for Features {
    fn from(cap: Capability) -> Self {
        match cap {
            Capability::FetchTicker => Self::FETCH_TICKER,
            Capability::UpdateTicker => Self::UPDATE_TICKER,
            Capability::FetchOrderbook => Self::FETCH_ORDERBOOK,
            Capability::UpdateOrderbook => Self::UPDATE_ORDERBOOK,
            Capability::AccountInfo => Self::ACCOUNT_INFO,
            Capability::SubmitOrder => Self::SUBMIT_ORDER,
            Capability::CancelOrder => Self::CANCEL_ORDER,
            Capability::CancelAll => Self::CANCEL_ALL,
            Capability::GetOrder => Self::GET_ORDER,
            Capability::ActiveOrders => Self::ACTIVE_ORDERS,
            Capability::OrderHistory => Self::ORDER_HISTORY,
            Capability::DepositAddress => Self::DEPOSIT_ADDRESS,
            Capability::Websocket => Self::WEBSOCKET,
            _ => Self::empty(),
        }
    }
}

/// Kind of data carried by a websocket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Ticker updates.
    Ticker,
    /// Orderbook snapshots and deltas.
    Orderbook,
    /// Account balance changes.
    Account,
    /// Own-order updates.
    Orders,
}

/// A websocket subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Channel kind.
    pub kind: ChannelKind,
    /// Instrument; `None` for account-wide channels.
    pub pair: Option<CurrencyPair>,
    /// Asset class.
    pub asset_class: AssetClass,
}

/// Event delivered by a venue websocket session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Ticker update.
    Ticker(Ticker),
    /// Orderbook snapshot or delta.
    Orderbook(OrderbookUpdate),
    /// Full holdings replacement.
    Holdings(AccountHoldings),
    /// Own-order update.
    Order(VenueOrder),
}

/// Focused role trait for venues that serve tickers.
#[async_trait]
pub trait TickerProvider: Send + Sync {
    /// Return the latest ticker; the adapter may serve a cached value.
    async fn fetch_ticker(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Ticker, AgoraError>;

    /// Fetch a fresh ticker from the venue, bypassing any adapter cache.
    async fn update_ticker(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Ticker, AgoraError>;
}

/// Focused role trait for venues that serve orderbooks.
#[async_trait]
pub trait OrderbookProvider: Send + Sync {
    /// Return the latest book; the adapter may serve a cached value.
    async fn fetch_orderbook(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<OrderbookUpdate, AgoraError>;

    /// Fetch a fresh snapshot from the venue.
    ///
    /// The syncer applies the result as a snapshot whatever its `kind`.
    async fn update_orderbook(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<OrderbookUpdate, AgoraError>;
}

/// Focused role trait for venues that report account balances.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// Fetch holdings for every sub-account.
    async fn fetch_account_info(&self) -> Result<AccountHoldings, AgoraError>;
}

/// Focused role trait for venues that accept orders.
#[async_trait]
pub trait OrderProvider: Send + Sync {
    /// Submit an order.
    async fn submit_order(&self, req: &OrderRequest) -> Result<SubmitReceipt, AgoraError>;

    /// Cancel a single order.
    async fn cancel_order(&self, req: &CancelRequest) -> Result<CancelReceipt, AgoraError>;

    /// Cancel every order in scope; returns an outcome per venue order id.
    async fn cancel_all(&self, scope: &CancelAllScope) -> Result<CancelAllResponse, AgoraError>;

    /// Look up one order by venue id.
    async fn get_order(
        &self,
        venue_order_id: &str,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<VenueOrder, AgoraError>;

    /// List open orders.
    async fn active_orders(&self, filter: &OrderFilter) -> Result<Vec<VenueOrder>, AgoraError>;

    /// List closed orders.
    async fn order_history(&self, filter: &OrderFilter) -> Result<Vec<VenueOrder>, AgoraError>;
}

/// Focused role trait for venues that hand out deposit addresses.
#[async_trait]
pub trait DepositProvider: Send + Sync {
    /// Deposit address for `currency` on `account`.
    async fn deposit_address(&self, currency: &str, account: &str) -> Result<String, AgoraError>;
}

/// Focused role trait for venues with a websocket feed.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Whether the feed is enabled for this venue instance.
    fn websocket_enabled(&self) -> bool;

    /// Open a session. The returned handle owns the reader task.
    async fn connect(
        &self,
    ) -> Result<(StreamHandle, tokio::sync::mpsc::Receiver<StreamEvent>), AgoraError>;

    /// Subscribe the open session to channels.
    async fn subscribe(&self, channels: &[Channel]) -> Result<(), AgoraError>;

    /// Drop channel subscriptions.
    async fn unsubscribe(&self, channels: &[Channel]) -> Result<(), AgoraError>;

    /// Resubscribe to the channel set implied by the current configuration.
    async fn flush_channels(&self) -> Result<(), AgoraError>;
}

/// Main venue trait implemented by adapters. Exposes capability discovery.
#[async_trait]
pub trait VenueConnector: Send + Sync {
    /// Venue name; unique across a registry, compared case-insensitively.
    fn name(&self) -> &str;

    /// Whether the venue takes part in syncing and trading.
    fn is_enabled(&self) -> bool;

    /// Enable or disable the venue.
    fn set_enabled(&self, enabled: bool);

    /// Asset classes the venue trades.
    fn supported_asset_classes(&self) -> Vec<AssetClass>;

    /// Whether `class` is among `supported_asset_classes`.
    fn supports_asset_class(&self, class: AssetClass) -> bool {
        self.supported_asset_classes().contains(&class)
    }

    /// Apply a configuration snapshot. Called once when the venue is loaded.
    async fn setup(&self, config: &VenueConfig) -> Result<(), AgoraError> {
        let _ = config;
        Ok(())
    }

    /// Advertised capabilities.
    ///
    /// Defaults to every method of each provider the adapter exposes. Adapters
    /// that only implement part of a provider narrow this.
    fn features(&self) -> Features {
        derived_features(self)
    }

    /// Ticker capability.
    fn as_ticker_provider(&self) -> Option<&dyn TickerProvider> {
        None
    }
    /// Orderbook capability.
    fn as_orderbook_provider(&self) -> Option<&dyn OrderbookProvider> {
        None
    }
    /// Account capability.
    fn as_account_provider(&self) -> Option<&dyn AccountProvider> {
        None
    }
    /// Order capability.
    fn as_order_provider(&self) -> Option<&dyn OrderProvider> {
        None
    }
    /// Deposit capability.
    fn as_deposit_provider(&self) -> Option<&dyn DepositProvider> {
        None
    }
    /// Streaming capability.
    fn as_stream_provider(&self) -> Option<&dyn StreamProvider> {
        None
    }
}

/// Feature block implied by the provider accessors of `venue`.
pub fn derived_features<C: VenueConnector + ?Sized>(venue: &C) -> Features {
    let mut f = Features::empty();
    if venue.as_ticker_provider().is_some() {
        f |= Features::TICKER;
    }
    if venue.as_orderbook_provider().is_some() {
        f |= Features::ORDERBOOK;
    }
    if venue.as_account_provider().is_some() {
        f |= Features::ACCOUNT_INFO;
    }
    if venue.as_order_provider().is_some() {
        f |= Features::ORDERS;
    }
    if venue.as_deposit_provider().is_some() {
        f |= Features::DEPOSIT_ADDRESS;
    }
    if venue.as_stream_provider().is_some() {
        f |= Features::WEBSOCKET;
    }
    f
}

/// Fail with `Unsupported` unless `venue` advertises `cap`.
pub fn require<C: VenueConnector + ?Sized>(venue: &C, cap: Capability) -> Result<(), AgoraError> {
    if venue.features().contains(Features::from(cap)) {
        Ok(())
    } else {
        Err(AgoraError::unsupported(format!("{}:{cap}", venue.name())))
    }
}

fn missing(venue: &str, cap: Capability) -> AgoraError {
    AgoraError::unsupported(format!("{venue}:{cap}"))
}

/// Checked access to the ticker provider for `cap`.
pub fn ticker_provider<C: VenueConnector + ?Sized>(
    venue: &C,
    cap: Capability,
) -> Result<&dyn TickerProvider, AgoraError> {
    require(venue, cap)?;
    venue
        .as_ticker_provider()
        .ok_or_else(|| missing(venue.name(), cap))
}

/// Checked access to the orderbook provider for `cap`.
pub fn orderbook_provider<C: VenueConnector + ?Sized>(
    venue: &C,
    cap: Capability,
) -> Result<&dyn OrderbookProvider, AgoraError> {
    require(venue, cap)?;
    venue
        .as_orderbook_provider()
        .ok_or_else(|| missing(venue.name(), cap))
}

/// Checked access to the account provider.
pub fn account_provider<C: VenueConnector + ?Sized>(
    venue: &C,
) -> Result<&dyn AccountProvider, AgoraError> {
    require(venue, Capability::AccountInfo)?;
    venue
        .as_account_provider()
        .ok_or_else(|| missing(venue.name(), Capability::AccountInfo))
}

/// Checked access to the order provider for `cap`.
pub fn order_provider<C: VenueConnector + ?Sized>(
    venue: &C,
    cap: Capability,
) -> Result<&dyn OrderProvider, AgoraError> {
    require(venue, cap)?;
    venue
        .as_order_provider()
        .ok_or_else(|| missing(venue.name(), cap))
}

/// Checked access to the deposit provider.
pub fn deposit_provider<C: VenueConnector + ?Sized>(
    venue: &C,
) -> Result<&dyn DepositProvider, AgoraError> {
    require(venue, Capability::DepositAddress)?;
    venue
        .as_deposit_provider()
        .ok_or_else(|| missing(venue.name(), Capability::DepositAddress))
}

/// Checked access to the stream provider.
pub fn stream_provider<C: VenueConnector + ?Sized>(
    venue: &C,
) -> Result<&dyn StreamProvider, AgoraError> {
    require(venue, Capability::Websocket)?;
    venue
        .as_stream_provider()
        .ok_or_else(|| missing(venue.name(), Capability::Websocket))
}
