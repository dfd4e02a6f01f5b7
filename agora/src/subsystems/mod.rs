//! The supervised services booted by the engine.

pub mod communications;
pub mod connectivity;
pub mod database;
pub mod dispatch;
pub mod orders;
pub mod portfolio;
pub mod sntp;
pub mod syncer;
pub mod timesync;

pub use communications::{CommunicationsRelay, Communicator};
pub use connectivity::{ConnectivityMonitor, ConnectivityStatus};
pub use database::{DatabaseKeepalive, DbHandle};
pub use dispatch::{Bus, DispatchService};
pub use orders::{OrderEventFeed, OrderManager, ReconcileReport, SubmitResult};
pub use portfolio::{CurrencyTotal, PortfolioSummary, PortfolioTracker};
pub use syncer::{ExchangeSyncer, SyncReport, SyncTargets, VenueSnapshotRequester};
pub use timesync::{DriftChoice, DriftPrompt, TimeKeeper};
