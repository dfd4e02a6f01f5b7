//! Deterministic in-memory venue adapter and toy script runtime.
//!
//! `MockVenue` keeps tickers, books, holdings and orders in memory, counts
//! calls per capability and can be scripted to fail the next N calls of any
//! capability. Its websocket session is driven from the outside with
//! [`MockVenue::push_event`] and [`MockVenue::fail_stream`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

use agora_core::connector::{
    AccountProvider, Channel, DepositProvider, Features, OrderProvider, OrderbookProvider,
    StreamEvent, StreamProvider, TickerProvider, VenueConnector, derived_features,
};
use agora_core::stream::StreamHandle;
use agora_core::sync::lock;
use agora_core::{
    AccountHoldings, AgoraError, AssetClass, CancelAllResponse, CancelAllScope, CancelOutcome,
    CancelReceipt, CancelRequest, Capability, CurrencyPair, OrderFilter, OrderRequest,
    OrderStatus, OrderbookUpdate, SubmitReceipt, Ticker, UpdateKind, VenueConfig, VenueOrder,
};

mod script;

pub use script::{ToyScript, ToyScriptRuntime};

type Key = (CurrencyPair, AssetClass);

#[derive(Default)]
struct State {
    tickers: HashMap<Key, Ticker>,
    books: HashMap<Key, OrderbookUpdate>,
    holdings: Option<AccountHoldings>,
    orders: Vec<VenueOrder>,
    submitted: Vec<OrderRequest>,
    failures: HashMap<Capability, VecDeque<AgoraError>>,
    calls: HashMap<Capability, usize>,
    subscriptions: Vec<Channel>,
    setup: Option<VenueConfig>,
    stream_tx: Option<mpsc::Sender<StreamEvent>>,
    kill_switch: Option<oneshot::Sender<()>>,
}

/// In-memory venue.
pub struct MockVenue {
    name: String,
    classes: Vec<AssetClass>,
    removed: Features,
    streaming: bool,
    latency: Option<Duration>,
    enabled: AtomicBool,
    websocket: AtomicBool,
    fully_match: AtomicBool,
    placing: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<State>,
}

/// Builder for [`MockVenue`].
pub struct MockVenueBuilder {
    name: String,
    classes: Vec<AssetClass>,
    removed: Features,
    streaming: bool,
    fully_match: bool,
    latency: Option<Duration>,
    state: State,
}

impl MockVenueBuilder {
    /// Asset classes the venue declares.
    #[must_use]
    pub fn asset_classes(mut self, classes: impl IntoIterator<Item = AssetClass>) -> Self {
        self.classes = classes.into_iter().collect();
        self
    }

    /// Seed a ticker.
    #[must_use]
    pub fn ticker(mut self, t: Ticker) -> Self {
        self.state.tickers.insert((t.pair.clone(), t.asset_class), t);
        self
    }

    /// Seed a book; it is served as a snapshot.
    #[must_use]
    pub fn orderbook(mut self, mut book: OrderbookUpdate) -> Self {
        book.kind = UpdateKind::Snapshot;
        self.state
            .books
            .insert((book.pair.clone(), book.asset_class), book);
        self
    }

    /// Seed holdings.
    #[must_use]
    pub fn holdings(mut self, h: AccountHoldings) -> Self {
        self.state.holdings = Some(h);
        self
    }

    /// Report every submitted order as fully matched.
    #[must_use]
    pub const fn fully_match(mut self, on: bool) -> Self {
        self.fully_match = on;
        self
    }

    /// Remove capabilities from the advertised feature block.
    #[must_use]
    pub fn without(mut self, features: Features) -> Self {
        self.removed |= features;
        self
    }

    /// Expose a websocket feed.
    #[must_use]
    pub const fn streaming(mut self, on: bool) -> Self {
        self.streaming = on;
        self
    }

    /// Delay every provider call.
    #[must_use]
    pub const fn latency(mut self, d: Duration) -> Self {
        self.latency = Some(d);
        self
    }

    /// Finish the venue.
    #[must_use]
    pub fn build(self) -> Arc<MockVenue> {
        Arc::new(MockVenue {
            name: self.name,
            classes: self.classes,
            removed: self.removed,
            streaming: self.streaming,
            latency: self.latency,
            enabled: AtomicBool::new(true),
            websocket: AtomicBool::new(self.streaming),
            fully_match: AtomicBool::new(self.fully_match),
            placing: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            state: Mutex::new(self.state),
        })
    }
}

impl MockVenue {
    /// Start building a spot-only venue named `name`.
    pub fn builder(name: impl Into<String>) -> MockVenueBuilder {
        MockVenueBuilder {
            name: name.into(),
            classes: vec![AssetClass::Spot],
            removed: Features::empty(),
            streaming: false,
            fully_match: false,
            latency: None,
            state: State::default(),
        }
    }

    /// Fail the next calls of `cap` with `errors`, in order.
    pub fn fail_next(&self, cap: Capability, errors: impl IntoIterator<Item = AgoraError>) {
        lock(&self.state)
            .failures
            .entry(cap)
            .or_default()
            .extend(errors);
    }

    /// Number of calls made for `cap`, failed ones included.
    #[must_use]
    pub fn calls(&self, cap: Capability) -> usize {
        lock(&self.state).calls.get(&cap).copied().unwrap_or(0)
    }

    /// Requests seen by `submit_order`, failed ones included.
    #[must_use]
    pub fn submitted(&self) -> Vec<OrderRequest> {
        lock(&self.state).submitted.clone()
    }

    /// Replace a ticker.
    pub fn set_ticker(&self, t: Ticker) {
        lock(&self.state)
            .tickers
            .insert((t.pair.clone(), t.asset_class), t);
    }

    /// Replace a book.
    pub fn set_orderbook(&self, mut book: OrderbookUpdate) {
        book.kind = UpdateKind::Snapshot;
        lock(&self.state)
            .books
            .insert((book.pair.clone(), book.asset_class), book);
    }

    /// Replace holdings.
    pub fn set_holdings(&self, h: AccountHoldings) {
        lock(&self.state).holdings = Some(h);
    }

    /// Toggle full matching for later submissions.
    pub fn set_fully_match(&self, on: bool) {
        self.fully_match.store(on, Ordering::SeqCst);
    }

    /// When false, submissions are acknowledged but not placed.
    pub fn set_placing(&self, on: bool) {
        self.placing.store(on, Ordering::SeqCst);
    }

    /// Add an order the venue reports as its own.
    pub fn insert_order(&self, order: VenueOrder) {
        lock(&self.state).orders.push(order);
    }

    /// Forget an order, as if the venue stopped reporting it.
    pub fn forget_order(&self, venue_order_id: &str) -> bool {
        let mut st = lock(&self.state);
        let before = st.orders.len();
        st.orders.retain(|o| o.venue_order_id != venue_order_id);
        st.orders.len() != before
    }

    /// Record a partial execution.
    pub fn fill(&self, venue_order_id: &str, executed: Decimal) -> bool {
        let mut st = lock(&self.state);
        let Some(order) = st
            .orders
            .iter_mut()
            .find(|o| o.venue_order_id == venue_order_id)
        else {
            return false;
        };
        order.executed = executed.min(order.amount);
        order.remaining = order.amount - order.executed;
        order.status = if order.remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        true
    }

    /// Orders the venue currently knows.
    #[must_use]
    pub fn orders(&self) -> Vec<VenueOrder> {
        lock(&self.state).orders.clone()
    }

    /// Channels passed to `subscribe` and not yet unsubscribed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Channel> {
        lock(&self.state).subscriptions.clone()
    }

    /// Configuration passed to `setup`, if any.
    #[must_use]
    pub fn setup_config(&self) -> Option<VenueConfig> {
        lock(&self.state).setup.clone()
    }

    /// Push an event into the open websocket session.
    ///
    /// Returns `false` when no session is open.
    pub async fn push_event(&self, event: StreamEvent) -> bool {
        let tx = lock(&self.state).stream_tx.clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Drop the open websocket session, as a remote disconnect would.
    pub fn fail_stream(&self) {
        let mut st = lock(&self.state);
        st.stream_tx = None;
        if let Some(kill) = st.kill_switch.take() {
            let _ = kill.send(());
        }
    }

    async fn enter(&self, cap: Capability) -> Result<(), AgoraError> {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        let mut st = lock(&self.state);
        *st.calls.entry(cap).or_default() += 1;
        match st.failures.get_mut(&cap).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn unknown_instrument(&self, pair: &CurrencyPair, class: AssetClass) -> AgoraError {
        AgoraError::UnknownInstrument(format!("{} {class} {pair}", self.name))
    }
}

fn filter_matches(filter: &OrderFilter, o: &VenueOrder) -> bool {
    filter.pair.as_ref().is_none_or(|p| *p == o.pair)
        && filter.asset_class.is_none_or(|c| c == o.asset_class)
        && filter.side.is_none_or(|s| s == o.side)
        && filter.since.is_none_or(|t| o.created_at >= t)
}

fn scope_matches(scope: &CancelAllScope, o: &VenueOrder) -> bool {
    scope.asset_class.is_none_or(|c| c == o.asset_class)
        && scope.pair.as_ref().is_none_or(|p| *p == o.pair)
}

fn cancel_in_place(order: &mut VenueOrder) -> CancelReceipt {
    order.status = if order.executed.is_zero() {
        OrderStatus::Cancelled
    } else {
        OrderStatus::PartiallyCancelled
    };
    CancelReceipt {
        executed: order.executed,
        remaining: order.remaining,
    }
}

#[async_trait]
impl VenueConnector for MockVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn supported_asset_classes(&self) -> Vec<AssetClass> {
        self.classes.clone()
    }

    async fn setup(&self, config: &VenueConfig) -> Result<(), AgoraError> {
        self.enabled.store(config.enabled, Ordering::SeqCst);
        self.websocket
            .store(self.streaming && config.websocket, Ordering::SeqCst);
        lock(&self.state).setup = Some(config.clone());
        Ok(())
    }

    fn features(&self) -> Features {
        derived_features(self).difference(self.removed)
    }

    fn as_ticker_provider(&self) -> Option<&dyn TickerProvider> {
        Some(self as &dyn TickerProvider)
    }
    fn as_orderbook_provider(&self) -> Option<&dyn OrderbookProvider> {
        Some(self as &dyn OrderbookProvider)
    }
    fn as_account_provider(&self) -> Option<&dyn AccountProvider> {
        Some(self as &dyn AccountProvider)
    }
    fn as_order_provider(&self) -> Option<&dyn OrderProvider> {
        Some(self as &dyn OrderProvider)
    }
    fn as_deposit_provider(&self) -> Option<&dyn DepositProvider> {
        Some(self as &dyn DepositProvider)
    }
    fn as_stream_provider(&self) -> Option<&dyn StreamProvider> {
        if self.streaming {
            Some(self as &dyn StreamProvider)
        } else {
            None
        }
    }
}

#[async_trait]
impl TickerProvider for MockVenue {
    async fn fetch_ticker(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Ticker, AgoraError> {
        self.enter(Capability::FetchTicker).await?;
        lock(&self.state)
            .tickers
            .get(&(pair.clone(), class))
            .cloned()
            .ok_or_else(|| self.unknown_instrument(pair, class))
    }

    async fn update_ticker(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<Ticker, AgoraError> {
        self.enter(Capability::UpdateTicker).await?;
        lock(&self.state)
            .tickers
            .get(&(pair.clone(), class))
            .cloned()
            .ok_or_else(|| self.unknown_instrument(pair, class))
    }
}

#[async_trait]
impl OrderbookProvider for MockVenue {
    async fn fetch_orderbook(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<OrderbookUpdate, AgoraError> {
        self.enter(Capability::FetchOrderbook).await?;
        lock(&self.state)
            .books
            .get(&(pair.clone(), class))
            .cloned()
            .ok_or_else(|| self.unknown_instrument(pair, class))
    }

    async fn update_orderbook(
        &self,
        pair: &CurrencyPair,
        class: AssetClass,
    ) -> Result<OrderbookUpdate, AgoraError> {
        self.enter(Capability::UpdateOrderbook).await?;
        lock(&self.state)
            .books
            .get(&(pair.clone(), class))
            .cloned()
            .ok_or_else(|| self.unknown_instrument(pair, class))
    }
}

#[async_trait]
impl AccountProvider for MockVenue {
    async fn fetch_account_info(&self) -> Result<AccountHoldings, AgoraError> {
        self.enter(Capability::AccountInfo).await?;
        lock(&self.state)
            .holdings
            .clone()
            .ok_or_else(|| AgoraError::not_found(format!("{} holdings", self.name)))
    }
}

#[async_trait]
impl OrderProvider for MockVenue {
    async fn submit_order(&self, req: &OrderRequest) -> Result<SubmitReceipt, AgoraError> {
        lock(&self.state).submitted.push(req.clone());
        self.enter(Capability::SubmitOrder).await?;

        let venue_order_id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        if !self.placing.load(Ordering::SeqCst) {
            return Ok(SubmitReceipt {
                venue_order_id,
                placed: false,
                fully_matched: false,
            });
        }
        let fully_matched = self.fully_match.load(Ordering::SeqCst);
        let (executed, status) = if fully_matched {
            (req.amount, OrderStatus::Filled)
        } else {
            (Decimal::ZERO, OrderStatus::Open)
        };
        lock(&self.state).orders.push(VenueOrder {
            venue_order_id: venue_order_id.clone(),
            pair: req.pair.clone(),
            asset_class: req.asset_class,
            side: req.side,
            order_type: req.order_type,
            price: req.price,
            amount: req.amount,
            executed,
            remaining: req.amount - executed,
            status,
            created_at: Utc::now(),
        });
        Ok(SubmitReceipt {
            venue_order_id,
            placed: true,
            fully_matched,
        })
    }

    async fn cancel_order(&self, req: &CancelRequest) -> Result<CancelReceipt, AgoraError> {
        self.enter(Capability::CancelOrder).await?;
        let mut st = lock(&self.state);
        let order = st
            .orders
            .iter_mut()
            .find(|o| o.venue_order_id == req.venue_order_id)
            .ok_or_else(|| {
                AgoraError::permanent(&self.name, format!("unknown order id {}", req.venue_order_id))
            })?;
        if order.status.is_terminal() {
            return Err(AgoraError::permanent(
                &self.name,
                format!("order {} already {}", order.venue_order_id, order.status),
            ));
        }
        Ok(cancel_in_place(order))
    }

    async fn cancel_all(&self, scope: &CancelAllScope) -> Result<CancelAllResponse, AgoraError> {
        self.enter(Capability::CancelAll).await?;
        let mut st = lock(&self.state);
        let mut out = CancelAllResponse::new();
        for order in st
            .orders
            .iter_mut()
            .filter(|o| o.status.is_open() && scope_matches(scope, o))
        {
            cancel_in_place(order);
            out.insert(order.venue_order_id.clone(), CancelOutcome::Success);
        }
        Ok(out)
    }

    async fn get_order(
        &self,
        venue_order_id: &str,
        _pair: &CurrencyPair,
        _class: AssetClass,
    ) -> Result<VenueOrder, AgoraError> {
        self.enter(Capability::GetOrder).await?;
        lock(&self.state)
            .orders
            .iter()
            .find(|o| o.venue_order_id == venue_order_id)
            .cloned()
            .ok_or_else(|| AgoraError::permanent(&self.name, format!("unknown order id {venue_order_id}")))
    }

    async fn active_orders(&self, filter: &OrderFilter) -> Result<Vec<VenueOrder>, AgoraError> {
        self.enter(Capability::ActiveOrders).await?;
        Ok(lock(&self.state)
            .orders
            .iter()
            .filter(|o| o.status.is_open() && filter_matches(filter, o))
            .cloned()
            .collect())
    }

    async fn order_history(&self, filter: &OrderFilter) -> Result<Vec<VenueOrder>, AgoraError> {
        self.enter(Capability::OrderHistory).await?;
        Ok(lock(&self.state)
            .orders
            .iter()
            .filter(|o| o.status.is_terminal() && filter_matches(filter, o))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DepositProvider for MockVenue {
    async fn deposit_address(&self, currency: &str, account: &str) -> Result<String, AgoraError> {
        self.enter(Capability::DepositAddress).await?;
        Ok(format!(
            "{}:{}:{}",
            self.name.to_ascii_lowercase(),
            currency.to_ascii_uppercase(),
            account
        ))
    }
}

#[async_trait]
impl StreamProvider for MockVenue {
    fn websocket_enabled(&self) -> bool {
        self.websocket.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), AgoraError> {
        self.enter(Capability::Websocket).await?;
        let (out_tx, out_rx) = mpsc::channel::<StreamEvent>(64);
        let (in_tx, mut in_rx) = mpsc::channel::<StreamEvent>(64);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        {
            let mut st = lock(&self.state);
            st.stream_tx = Some(in_tx);
            st.kill_switch = Some(kill_tx);
        }
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = &mut kill_rx => break,
                    ev = in_rx.recv() => match ev {
                        Some(ev) => {
                            if out_tx.send(ev).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        Ok((StreamHandle::new(task, stop_tx), out_rx))
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<(), AgoraError> {
        let mut st = lock(&self.state);
        for c in channels {
            if !st.subscriptions.contains(c) {
                st.subscriptions.push(c.clone());
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[Channel]) -> Result<(), AgoraError> {
        lock(&self.state)
            .subscriptions
            .retain(|c| !channels.contains(c));
        Ok(())
    }

    async fn flush_channels(&self) -> Result<(), AgoraError> {
        let channels = lock(&self.state).subscriptions.clone();
        self.unsubscribe(&channels).await?;
        self.subscribe(&channels).await
    }
}
