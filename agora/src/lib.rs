//! Agora is the in-process runtime core of a multi-venue crypto trading engine.
//!
//! Overview
//! - Owns the typed publish/subscribe bus that fans market data and order
//!   events out to internal consumers.
//! - Keeps the latest ticker, merged orderbook and account holdings per venue
//!   and instrument, publishing only real state changes.
//! - Supervises long-running services (probes, syncer, order manager, script
//!   VMs) through one start/stop protocol with atomic state transitions.
//! - Enforces local order policy before any request reaches a venue, retrying
//!   only transient failures.
//!
//! Key behaviors and trade-offs
//! - Delivery: each subscriber is pinned to one dispatcher worker, so per-topic
//!   order is kept; a slow subscriber loses values instead of blocking others.
//! - Orderbooks: an update that would cross the book is not applied; the book
//!   is flagged stale, deltas are ignored until a snapshot arrives, and the
//!   engine asks the venue for one.
//! - Syncing: venues with a live websocket session are not polled for tickers
//!   or books; REST polling pauses while the connectivity probe is offline.
//!   Stream sessions reconnect with jittered exponential backoff.
//! - Reconciliation is advisory: orders the venue stops reporting are marked
//!   cancelled, never deleted.
//!
//! Examples
//! Building and starting an engine:
//! ```rust,ignore
//! use std::sync::Arc;
//! use agora::Engine;
//! use agora_core::{EngineConfig, VenueConfig, AssetClass, CurrencyPair};
//!
//! let mut config = EngineConfig::default();
//! config.venues.push(
//!     VenueConfig::new("kraken").with_pair(AssetClass::Spot, CurrencyPair::new("BTC", "USD")),
//! );
//! let engine = Engine::builder()
//!     .config(config)
//!     .with_venue(kraken_adapter)
//!     .build()?;
//! engine.start().await?;
//! ```
//!
//! Toggling a subsystem through the facade:
//! ```rust,ignore
//! engine.facade().set("portfolio", false).await?;
//! assert_eq!(engine.facade().list_subsystems()["portfolio"], false);
//! ```
//!
//! Submitting an order:
//! ```rust,ignore
//! use agora_core::{OrderRequest, OrderSide};
//! use rust_decimal::dec;
//!
//! let req = OrderRequest::limit(pair, AssetClass::Spot, OrderSide::Buy, dec!(100), dec!(1));
//! let placed = engine.orders().submit("kraken", req).await?;
//! ```
#![warn(missing_docs)]

mod engine;
/// Name-keyed subsystem control surface.
pub mod facade;
pub mod market;
/// Loaded venue adapters.
pub mod registry;
/// Retry schedules and reconnect backoff.
pub mod retry;
pub mod script;
pub mod subsystems;
/// Subsystem lifecycle and periodic workers.
pub mod supervisor;
pub mod tls;

pub use engine::{Engine, EngineBuilder};
pub use facade::{Facade, RpcEndpointStatus};
pub use market::{
    HoldingsRegistry, OrderbookRegistry, ProcessOutcome, SnapshotRequest, SnapshotRequester,
    TickerRegistry,
};
pub use registry::ExchangeRegistry;
pub use script::{ScriptPool, VmInfo, VmStatus};
pub use subsystems::{
    Bus, CommunicationsRelay, Communicator, ConnectivityMonitor, ConnectivityStatus,
    CurrencyTotal, DatabaseKeepalive, DbHandle, DispatchService, DriftChoice, DriftPrompt,
    ExchangeSyncer, OrderEventFeed, OrderManager, PortfolioSummary, PortfolioTracker,
    ReconcileReport, SubmitResult, SyncReport, SyncTargets, TimeKeeper, VenueSnapshotRequester,
};
pub use supervisor::{Lifecycle, PeriodicWorker, Subsystem};
pub use tls::{CertificateStatus, RegenerationReason, ensure_certificates};
