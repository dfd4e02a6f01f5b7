use async_trait::async_trait;

use agora_core::{
    AccountHoldings, AgoraError, DispatchConfig, Dispatcher, OrderEvent, Orderbook, SubsystemName,
    Ticker,
};

use crate::supervisor::{Lifecycle, Subsystem};

/// One typed dispatcher per record kind.
#[derive(Clone, Debug)]
pub struct Bus {
    /// Ticker topics.
    pub tickers: Dispatcher<Ticker>,
    /// Orderbook topics.
    pub orderbooks: Dispatcher<Orderbook>,
    /// Holdings topics.
    pub holdings: Dispatcher<AccountHoldings>,
    /// Order event topics.
    pub orders: Dispatcher<OrderEvent>,
}

impl Bus {
    /// Stopped dispatchers sharing one pipe capacity.
    #[must_use]
    pub fn new(pipe_capacity: usize) -> Self {
        Self {
            tickers: Dispatcher::new(pipe_capacity),
            orderbooks: Dispatcher::new(pipe_capacity),
            holdings: Dispatcher::new(pipe_capacity),
            orders: Dispatcher::new(pipe_capacity),
        }
    }

    /// Total deliveries dropped for slow subscribers across all kinds.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.tickers.dropped()
            + self.orderbooks.dropped()
            + self.holdings.dropped()
            + self.orders.dropped()
    }
}

/// `dispatch` subsystem: runs the worker pools of every dispatcher.
pub struct DispatchService {
    lifecycle: Lifecycle,
    config: DispatchConfig,
    bus: Bus,
}

impl DispatchService {
    /// Service over `bus`.
    #[must_use]
    pub fn new(config: DispatchConfig, bus: Bus) -> Self {
        Self {
            lifecycle: Lifecycle::new(SubsystemName::Dispatch),
            config,
            bus,
        }
    }

    /// The dispatchers.
    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    async fn start_all(&self) -> Result<(), AgoraError> {
        self.config.validate()?;
        let (w, q) = (self.config.workers, self.config.job_queue_limit);
        self.bus.tickers.start(w, q)?;
        if let Err(e) = self.bus.orderbooks.start(w, q) {
            let _ = self.bus.tickers.stop().await;
            return Err(e);
        }
        if let Err(e) = self.bus.holdings.start(w, q) {
            let _ = self.bus.tickers.stop().await;
            let _ = self.bus.orderbooks.stop().await;
            return Err(e);
        }
        if let Err(e) = self.bus.orders.start(w, q) {
            let _ = self.bus.tickers.stop().await;
            let _ = self.bus.orderbooks.stop().await;
            let _ = self.bus.holdings.stop().await;
            return Err(e);
        }
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), AgoraError> {
        let results = [
            self.bus.tickers.stop().await,
            self.bus.orderbooks.stop().await,
            self.bus.holdings.stop().await,
            self.bus.orders.stop().await,
        ];
        results.into_iter().collect()
    }
}

#[async_trait]
impl Subsystem for DispatchService {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_all()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle.stop_with(self.stop_all()).await
    }
}
