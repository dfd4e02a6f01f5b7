use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use agora_core::connector::{
    account_provider, orderbook_provider, stream_provider, ticker_provider,
};
use agora_core::sync::lock;
use agora_core::{
    AgoraError, AssetClass, Capability, Channel, ChannelKind, CurrencyPair, Features,
    OrderbookProvider, OrderbookUpdate, StreamEvent, SubsystemName, SyncerConfig, UpdateKind,
    VenueConnector,
};

use super::connectivity::ConnectivityStatus;
use super::orders::OrderManager;
use crate::market::{
    HoldingsRegistry, OrderbookRegistry, SnapshotRequest, SnapshotRequester, TickerRegistry,
};
use crate::registry::ExchangeRegistry;
use crate::retry::ReconnectBackoff;
use crate::supervisor::{Lifecycle, PeriodicWorker, Subsystem, WorkerSlot};

/// Destinations for venue data, shared by REST polling and stream sessions.
#[derive(Clone)]
pub struct SyncTargets {
    /// Ticker store.
    pub tickers: Arc<TickerRegistry>,
    /// Orderbook store.
    pub orderbooks: Arc<OrderbookRegistry>,
    /// Holdings store.
    pub holdings: Arc<HoldingsRegistry>,
    /// Receives own-order updates from streams.
    pub orders: Option<Arc<OrderManager>>,
}

impl SyncTargets {
    async fn forward(&self, venue: &str, event: StreamEvent) {
        let res = match event {
            StreamEvent::Ticker(t) => self.tickers.process(t).await.map(|_| ()),
            StreamEvent::Orderbook(u) => self.orderbooks.process(u).await.map(|_| ()),
            StreamEvent::Holdings(h) => self.holdings.process(h).await.map(|_| ()),
            StreamEvent::Order(o) => match &self.orders {
                Some(orders) => orders.apply_venue_update(venue, &o).await.map(|_| ()),
                None => Ok(()),
            },
        };
        if let Err(_e) = res {
            #[cfg(feature = "tracing")]
            tracing::debug!(venue, error = %_e, "stream event rejected");
        }
    }
}

/// Counts from one REST polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Tickers fetched.
    pub tickers: usize,
    /// Orderbook snapshots fetched.
    pub orderbooks: usize,
    /// Holdings fetched.
    pub holdings: usize,
    /// Adapter calls that failed.
    pub failures: usize,
    /// True when the pass was skipped because the host was offline.
    pub skipped_offline: bool,
}

struct Shared {
    config: SyncerConfig,
    exchanges: ExchangeRegistry,
    targets: SyncTargets,
    connectivity: Option<ConnectivityStatus>,
    sessions: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Shared {
    fn streaming(&self, venue: &str) -> bool {
        lock(&self.sessions)
            .iter()
            .any(|(name, h)| name.eq_ignore_ascii_case(venue) && !h.is_finished())
    }

    async fn sync_once(&self) -> SyncReport {
        let mut report = SyncReport::default();
        if self.connectivity.as_ref().is_some_and(|c| !c.is_online()) {
            report.skipped_offline = true;
            return report;
        }
        for venue in self.exchanges.list_enabled() {
            let Some(cfg) = self.exchanges.config(venue.name()) else {
                continue;
            };
            let streamed = self.streaming(venue.name());
            let features = venue.features();
            for (class, pairs) in &cfg.pairs {
                if !venue.supports_asset_class(*class) {
                    continue;
                }
                for pair in pairs {
                    if self.config.sync_tickers
                        && !streamed
                        && features.contains(Features::UPDATE_TICKER)
                    {
                        self.sync_ticker(venue.as_ref(), pair, *class, &mut report)
                            .await;
                    }
                    if self.config.sync_orderbooks
                        && !streamed
                        && features.contains(Features::UPDATE_ORDERBOOK)
                    {
                        self.sync_orderbook(venue.as_ref(), pair, *class, &mut report)
                            .await;
                    }
                }
            }
            if self.config.sync_holdings && features.contains(Features::ACCOUNT_INFO) {
                let res = match account_provider(venue.as_ref()) {
                    Ok(p) => match p.fetch_account_info().await {
                        Ok(h) => self.targets.holdings.process(h).await.map(|_| ()),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                };
                tally(venue.name(), "holdings", res, &mut report.holdings, &mut report.failures);
            }
        }
        report
    }

    async fn sync_ticker(
        &self,
        venue: &dyn VenueConnector,
        pair: &CurrencyPair,
        class: AssetClass,
        report: &mut SyncReport,
    ) {
        let res = match ticker_provider(venue, Capability::UpdateTicker) {
            Ok(p) => match p.update_ticker(pair, class).await {
                Ok(t) => self.targets.tickers.process(t).await.map(|_| ()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        tally(venue.name(), "ticker", res, &mut report.tickers, &mut report.failures);
    }

    async fn sync_orderbook(
        &self,
        venue: &dyn VenueConnector,
        pair: &CurrencyPair,
        class: AssetClass,
        report: &mut SyncReport,
    ) {
        let res = match orderbook_provider(venue, Capability::UpdateOrderbook) {
            Ok(p) => match fetch_snapshot(p, pair, class).await {
                Ok(u) => self.targets.orderbooks.process(u).await.map(|_| ()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        tally(venue.name(), "orderbook", res, &mut report.orderbooks, &mut report.failures);
    }
}

/// Book fetched over REST, always applied as a full replacement.
async fn fetch_snapshot(
    provider: &dyn OrderbookProvider,
    pair: &CurrencyPair,
    class: AssetClass,
) -> Result<OrderbookUpdate, AgoraError> {
    let mut book = provider.update_orderbook(pair, class).await?;
    book.kind = UpdateKind::Snapshot;
    Ok(book)
}

fn tally(
    _venue: &str,
    _what: &str,
    res: Result<(), AgoraError>,
    ok: &mut usize,
    failed: &mut usize,
) {
    match res {
        Ok(()) => *ok += 1,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(venue = _venue, what = _what, error = %_e, "sync call failed");
            *failed += 1;
        }
    }
}

/// Channels implied by a venue's enabled pairs.
#[must_use]
pub fn channels_for(config: &agora_core::VenueConfig, sync_holdings: bool) -> Vec<Channel> {
    let mut out = Vec::new();
    for (class, pairs) in &config.pairs {
        for pair in pairs {
            for kind in [ChannelKind::Ticker, ChannelKind::Orderbook] {
                out.push(Channel {
                    kind,
                    pair: Some(pair.clone()),
                    asset_class: *class,
                });
            }
        }
    }
    let class = config.pairs.keys().next().copied().unwrap_or(AssetClass::Spot);
    out.push(Channel {
        kind: ChannelKind::Orders,
        pair: None,
        asset_class: class,
    });
    if sync_holdings {
        out.push(Channel {
            kind: ChannelKind::Account,
            pair: None,
            asset_class: class,
        });
    }
    out
}

// Wait `ms` unless stop is signalled first. Returns false on stop.
async fn pause(wait: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stop.changed() => false,
        () = tokio::time::sleep(wait) => !*stop.borrow(),
    }
}

fn spawn_session(
    shared: Arc<Shared>,
    venue: Arc<dyn VenueConnector>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = ReconnectBackoff::new(shared.config.backoff.clone());
        let name = venue.name().to_string();
        loop {
            if *stop.borrow() {
                break;
            }
            let Ok(provider) = stream_provider(venue.as_ref()) else {
                break;
            };
            let opened = match provider.connect().await {
                Ok(session) => {
                    let channels = shared
                        .exchanges
                        .config(&name)
                        .map(|c| channels_for(&c, shared.config.sync_holdings))
                        .unwrap_or_default();
                    match provider.subscribe(&channels).await {
                        Ok(()) => Ok(session),
                        Err(e) => {
                            session.0.abort();
                            Err(e)
                        }
                    }
                }
                Err(e) => Err(e),
            };
            match opened {
                Ok((handle, mut rx)) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(venue = %name, "stream session open");
                    backoff.reset();
                    let stopped = loop {
                        tokio::select! {
                            biased;
                            _ = stop.changed() => break true,
                            ev = rx.recv() => match ev {
                                Some(ev) => shared.targets.forward(&name, ev).await,
                                None => break false,
                            },
                        }
                    };
                    handle.stop().await;
                    if stopped {
                        break;
                    }
                    #[cfg(feature = "tracing")]
                    tracing::warn!(venue = %name, "stream session dropped; reconnecting");
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(venue = %name, error = %_e, backoff_ms = backoff.current().as_millis() as u64, "stream connect failed");
                }
            }
            if !pause(backoff.next_wait(), &mut stop).await {
                break;
            }
        }
    })
}

/// `exchange_syncer` subsystem.
///
/// Polls tickers, orderbook snapshots and holdings over REST every interval
/// and keeps one stream session per websocket-capable venue. Venues with a
/// live session are not polled for tickers or books. Polling is skipped
/// entirely while the connectivity probe reports offline.
pub struct ExchangeSyncer {
    lifecycle: Arc<Lifecycle>,
    shared: Arc<Shared>,
    worker: WorkerSlot,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl ExchangeSyncer {
    /// Syncer feeding `targets` from `exchanges`.
    #[must_use]
    pub fn new(
        config: SyncerConfig,
        exchanges: ExchangeRegistry,
        targets: SyncTargets,
        connectivity: Option<ConnectivityStatus>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(SubsystemName::ExchangeSyncer)),
            shared: Arc::new(Shared {
                config,
                exchanges,
                targets,
                connectivity,
                sessions: Mutex::new(Vec::new()),
            }),
            worker: WorkerSlot::default(),
            stop_tx: Mutex::new(None),
        }
    }

    /// Run one REST pass now.
    pub async fn sync_once(&self) -> SyncReport {
        self.shared.sync_once().await
    }

    /// Venues with a live stream session.
    #[must_use]
    pub fn streaming_venues(&self) -> Vec<String> {
        lock(&self.shared.sessions)
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn open_sessions(&self, stop: &watch::Receiver<bool>) {
        let mut sessions = lock(&self.shared.sessions);
        for venue in self.shared.exchanges.list_enabled() {
            let wants = self
                .shared
                .exchanges
                .config(venue.name())
                .is_some_and(|c| c.websocket);
            let capable = venue.features().contains(Features::WEBSOCKET)
                && venue
                    .as_stream_provider()
                    .is_some_and(|s| s.websocket_enabled());
            if wants && capable {
                let name = venue.name().to_string();
                let handle = spawn_session(Arc::clone(&self.shared), venue, stop.clone());
                sessions.push((name, handle));
            }
        }
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        self.shared.config.validate()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        self.open_sessions(&stop_rx);
        *lock(&self.stop_tx) = Some(stop_tx);

        let _report = self.shared.sync_once().await;
        #[cfg(feature = "tracing")]
        tracing::debug!(?_report, "initial sync pass");

        let shared = Arc::clone(&self.shared);
        self.worker.put(PeriodicWorker::spawn(
            Arc::clone(&self.lifecycle),
            self.shared.config.interval,
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    shared.sync_once().await;
                    Ok(())
                }
            },
        ));
        Ok(())
    }

    async fn stop_inner(&self) -> Result<(), AgoraError> {
        self.worker.stop().await;
        if let Some(tx) = lock(&self.stop_tx).take() {
            let _ = tx.send(true);
        }
        let sessions: Vec<_> = lock(&self.shared.sessions).drain(..).collect();
        for (_, handle) in sessions {
            let _ = handle.await;
        }
        Ok(())
    }
}

#[async_trait]
impl Subsystem for ExchangeSyncer {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle.stop_with(self.stop_inner()).await
    }
}

/// Fetches a fresh snapshot from the venue when a book goes stale.
pub struct VenueSnapshotRequester {
    exchanges: ExchangeRegistry,
    orderbooks: Weak<OrderbookRegistry>,
}

impl VenueSnapshotRequester {
    /// Requester feeding snapshots back into `orderbooks`.
    #[must_use]
    pub fn new(exchanges: ExchangeRegistry, orderbooks: &Arc<OrderbookRegistry>) -> Self {
        Self {
            exchanges,
            orderbooks: Arc::downgrade(orderbooks),
        }
    }
}

impl SnapshotRequester for VenueSnapshotRequester {
    fn request_snapshot(&self, req: SnapshotRequest) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let exchanges = self.exchanges.clone();
        let books = Weak::clone(&self.orderbooks);
        rt.spawn(async move {
            let res = async {
                let venue = exchanges.get_enabled(&req.venue)?;
                if !venue.features().contains(Features::UPDATE_ORDERBOOK) {
                    return Ok(());
                }
                let provider = orderbook_provider(venue.as_ref(), Capability::UpdateOrderbook)?;
                let snapshot = fetch_snapshot(provider, &req.pair, req.asset_class).await?;
                if let Some(books) = books.upgrade() {
                    books.process(snapshot).await?;
                }
                Ok::<(), AgoraError>(())
            }
            .await;
            if let Err(_e) = res {
                #[cfg(feature = "tracing")]
                tracing::warn!(venue = %req.venue, pair = %req.pair, error = %_e, "snapshot request failed");
            }
        });
    }
}
