//! Agora data records, configuration primitives and the shared error taxonomy.
#![warn(missing_docs)]

mod capability;
mod config;
mod error;
mod ids;
mod market;
mod order;
mod subsystem;

pub use capability::Capability;
pub use config::{
    BackoffConfig, CommunicationsConfig, ConnectivityConfig, DatabaseConfig, DatabaseDriver,
    DispatchConfig, DriftLevel, EngineConfig, OrderPolicy, PortfolioConfig, RpcEndpointConfig,
    ScriptConfig, SyncerConfig, TimeSyncConfig, TlsConfig, VenueConfig,
};
pub use error::{AgoraError, ErrorCategory};
pub use ids::{DeliveryId, OrderId, TopicId, VmId};
pub use market::{
    AccountHoldings, AssetClass, Balance, BookLevel, CurrencyPair, Orderbook, OrderbookUpdate,
    PAIR_DELIMITERS, SubAccount, Ticker, UpdateKind,
};
pub use order::{
    CancelAllResponse, CancelAllScope, CancelOutcome, CancelReceipt, CancelRequest, OrderEvent,
    OrderEventKind, OrderFilter, OrderRecord, OrderRequest, OrderSide, OrderStatus, OrderType,
    SubmitReceipt, VenueOrder,
};
pub use subsystem::{SubsystemName, SubsystemState, SubsystemStatus};

pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;
