//! Configuration types for the engine and its subsystems.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgoraError, AssetClass, CurrencyPair};

/// Dispatcher worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Start the dispatcher with the engine.
    pub enabled: bool,
    /// Number of delivery workers.
    pub workers: usize,
    /// Total job queue capacity shared across workers.
    pub job_queue_limit: usize,
    /// Per-subscriber channel capacity.
    pub pipe_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 10,
            job_queue_limit: 100,
            pipe_capacity: 64,
        }
    }
}

/// Connectivity probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Start the probe with the engine.
    pub enabled: bool,
    /// Host names that must resolve.
    pub dns_names: Vec<String>,
    /// URLs fetched with a short timeout.
    pub http_targets: Vec<String>,
    /// Delay between checks.
    pub check_interval: Duration,
    /// Per-target timeout.
    pub request_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dns_names: vec!["one.one.one.one".into(), "dns.google".into()],
            http_targets: vec![
                "https://www.google.com".into(),
                "https://www.cloudflare.com".into(),
            ],
            check_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Reaction to clock drift outside the allowed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftLevel {
    /// Drift is not checked.
    Disabled,
    /// Ask the operator once, then apply the chosen level.
    PromptOnce,
    /// Log at error level and raise the drift flag.
    Alert,
    /// Log a warning.
    #[default]
    Warn,
}

/// Time-sync probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncConfig {
    /// Start the probe with the engine.
    pub enabled: bool,
    /// `host:port` SNTP servers, tried in order.
    pub servers: Vec<String>,
    /// Largest tolerated positive offset (local clock behind).
    pub allowed_positive_drift: Duration,
    /// Largest tolerated negative offset (local clock ahead).
    pub allowed_negative_drift: Duration,
    /// Reaction to out-of-window drift.
    pub level: DriftLevel,
    /// Delay between checks.
    pub check_interval: Duration,
    /// Per-server timeout.
    pub request_timeout: Duration,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: vec!["pool.ntp.org:123".into(), "time.cloudflare.com:123".into()],
            allowed_positive_drift: Duration::from_millis(50),
            allowed_negative_drift: Duration::from_millis(50),
            level: DriftLevel::Warn,
            check_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Database driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseDriver {
    /// SQLite file or in-memory database.
    #[default]
    Sqlite,
    /// PostgreSQL server.
    Postgres,
}

/// Database keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Start the keepalive with the engine.
    pub enabled: bool,
    /// Driver selection.
    pub driver: DatabaseDriver,
    /// Driver-specific connection string.
    pub connection_string: String,
    /// Delay between pings.
    pub ping_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            driver: DatabaseDriver::Sqlite,
            connection_string: "sqlite::memory:".into(),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Order manager policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPolicy {
    /// Start the order manager with the engine.
    pub enabled: bool,
    /// Only limit-type orders are accepted.
    pub enforce_limit_only: bool,
    /// Market orders are accepted.
    pub allow_market_orders: bool,
    /// Cancel every open order when the subsystem stops.
    pub cancel_on_shutdown: bool,
    /// Largest accepted amount per order.
    pub per_order_max_amount: Option<Decimal>,
    /// Accepted instruments; empty accepts all.
    pub allowed_instruments: Vec<CurrencyPair>,
    /// Accepted venues (case-insensitive); empty accepts all.
    pub allowed_venues: Vec<String>,
    /// Additional attempts after a transient failure.
    pub submission_retry_budget: u32,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            enforce_limit_only: false,
            allow_market_orders: true,
            cancel_on_shutdown: false,
            per_order_max_amount: None,
            allowed_instruments: Vec::new(),
            allowed_venues: Vec::new(),
            submission_retry_budget: 3,
        }
    }
}

/// Backoff settings for reconnecting streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Minimum backoff delay in milliseconds.
    pub min_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Exponential factor applied after each failure (>= 1).
    pub factor: u32,
    /// Random jitter percentage [0, 100] added to each delay.
    pub jitter_percent: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 500,
            max_backoff_ms: 30_000,
            factor: 2,
            jitter_percent: 20,
        }
    }
}

/// Exchange syncer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncerConfig {
    /// Start the syncer with the engine.
    pub enabled: bool,
    /// Delay between REST polling rounds.
    pub interval: Duration,
    /// Poll tickers.
    pub sync_tickers: bool,
    /// Poll orderbook snapshots.
    pub sync_orderbooks: bool,
    /// Poll account holdings.
    pub sync_holdings: bool,
    /// Reconnect backoff for websocket sessions.
    pub backoff: BackoffConfig,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            sync_tickers: true,
            sync_orderbooks: true,
            sync_holdings: false,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Script VM pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Start the pool with the engine.
    pub enabled: bool,
    /// Directory holding `.gct` scripts.
    pub script_dir: PathBuf,
    /// Deadline for a single run.
    pub script_timeout: Duration,
    /// Upper bound on loaded VMs.
    pub max_concurrent_vms: usize,
    /// Script file names loaded and run on start.
    pub autoload: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            script_dir: PathBuf::from("scripts"),
            script_timeout: Duration::from_secs(30),
            max_concurrent_vms: 10,
            autoload: Vec::new(),
        }
    }
}

/// Portfolio tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Start the tracker with the engine.
    pub enabled: bool,
    /// Delay between aggregations.
    pub interval: Duration,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Communications relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationsConfig {
    /// Start the relay with the engine.
    pub enabled: bool,
}

impl Default for CommunicationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Self-signed TLS material location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Directory holding `cert.pem` and `key.pem`.
    pub dir: PathBuf,
    /// Host name placed in the certificate's DNS SANs.
    pub hostname: String,
    /// Replace an unparseable `cert.pem` instead of refusing to start.
    pub regenerate_unparseable: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tls"),
            hostname: "localhost".into(),
            regenerate_unparseable: false,
        }
    }
}

/// Per-venue configuration snapshot handed to the adapter at setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Venue name.
    pub name: String,
    /// Whether the venue takes part in syncing and trading.
    pub enabled: bool,
    /// Use the websocket feed when the adapter supports it.
    pub websocket: bool,
    /// HTTP timeout applied by the adapter.
    pub http_timeout: Duration,
    /// Enabled pairs per asset class.
    pub pairs: BTreeMap<AssetClass, Vec<CurrencyPair>>,
}

impl VenueConfig {
    /// Enabled venue with no pairs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            websocket: false,
            http_timeout: Duration::from_secs(15),
            pairs: BTreeMap::new(),
        }
    }

    /// Add an enabled pair.
    #[must_use]
    pub fn with_pair(mut self, class: AssetClass, pair: CurrencyPair) -> Self {
        self.pairs.entry(class).or_default().push(pair);
        self
    }

    /// Enable or disable the websocket feed.
    #[must_use]
    pub const fn with_websocket(mut self, on: bool) -> Self {
        self.websocket = on;
        self
    }
}

/// An RPC listener the outer layer may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEndpointConfig {
    /// Endpoint name, e.g. `grpc`.
    pub name: String,
    /// Listen address.
    pub listen_address: String,
    /// Whether the outer layer should start it.
    pub enabled: bool,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory root.
    pub data_dir: PathBuf,
    /// Dispatcher.
    pub dispatch: DispatchConfig,
    /// Connectivity probe.
    pub connectivity: ConnectivityConfig,
    /// Time-sync probe.
    pub time_sync: TimeSyncConfig,
    /// Database keepalive.
    pub database: DatabaseConfig,
    /// Order manager.
    pub orders: OrderPolicy,
    /// Exchange syncer.
    pub syncer: SyncerConfig,
    /// Script VM pool.
    pub scripts: ScriptConfig,
    /// Portfolio tracker.
    pub portfolio: PortfolioConfig,
    /// Communications relay.
    pub communications: CommunicationsConfig,
    /// TLS material; `None` skips certificate checks.
    pub tls: Option<TlsConfig>,
    /// Venue snapshots keyed by name at build time.
    pub venues: Vec<VenueConfig>,
    /// RPC endpoints reported on the control surface.
    pub rpc_endpoints: Vec<RpcEndpointConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            dispatch: DispatchConfig::default(),
            connectivity: ConnectivityConfig::default(),
            time_sync: TimeSyncConfig::default(),
            database: DatabaseConfig::default(),
            orders: OrderPolicy::default(),
            syncer: SyncerConfig::default(),
            scripts: ScriptConfig::default(),
            portfolio: PortfolioConfig::default(),
            communications: CommunicationsConfig::default(),
            tls: None,
            venues: Vec::new(),
            rpc_endpoints: Vec::new(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> AgoraError {
    AgoraError::ConfigInvalid(msg.into())
}

fn non_zero(d: Duration, what: &str) -> Result<(), AgoraError> {
    if d.is_zero() {
        return Err(invalid(format!("{what} must be positive")));
    }
    Ok(())
}

impl DispatchConfig {
    /// Reject zero-sized pools and queues.
    pub fn validate(&self) -> Result<(), AgoraError> {
        if self.workers == 0 {
            return Err(invalid("dispatch.workers must be at least 1"));
        }
        if self.job_queue_limit == 0 {
            return Err(invalid("dispatch.job_queue_limit must be at least 1"));
        }
        if self.pipe_capacity == 0 {
            return Err(invalid("dispatch.pipe_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl ConnectivityConfig {
    /// Reject empty target lists and zero intervals.
    pub fn validate(&self) -> Result<(), AgoraError> {
        if self.dns_names.is_empty() {
            return Err(invalid("connectivity.dns_names is empty"));
        }
        if self.http_targets.is_empty() {
            return Err(invalid("connectivity.http_targets is empty"));
        }
        non_zero(self.check_interval, "connectivity.check_interval")?;
        non_zero(self.request_timeout, "connectivity.request_timeout")
    }
}

impl TimeSyncConfig {
    /// Reject an empty pool and zero intervals.
    pub fn validate(&self) -> Result<(), AgoraError> {
        if self.servers.is_empty() {
            return Err(invalid("time_sync.servers is empty"));
        }
        non_zero(self.check_interval, "time_sync.check_interval")?;
        non_zero(self.request_timeout, "time_sync.request_timeout")
    }
}

impl DatabaseConfig {
    /// Reject a blank connection string and a zero interval.
    pub fn validate(&self) -> Result<(), AgoraError> {
        if self.connection_string.trim().is_empty() {
            return Err(invalid("database.connection_string is empty"));
        }
        non_zero(self.ping_interval, "database.ping_interval")
    }
}

impl OrderPolicy {
    /// Reject contradictory rules.
    pub fn validate(&self) -> Result<(), AgoraError> {
        if self.enforce_limit_only && self.allow_market_orders {
            return Err(invalid(
                "orders.enforce_limit_only contradicts orders.allow_market_orders",
            ));
        }
        if let Some(max) = self.per_order_max_amount
            && max <= Decimal::ZERO
        {
            return Err(invalid("orders.per_order_max_amount must be positive"));
        }
        Ok(())
    }
}

impl SyncerConfig {
    /// Reject zero intervals and a malformed backoff.
    pub fn validate(&self) -> Result<(), AgoraError> {
        non_zero(self.interval, "syncer.interval")?;
        if self.backoff.factor == 0 || self.backoff.jitter_percent > 100 {
            return Err(invalid("syncer.backoff is malformed"));
        }
        if self.backoff.min_backoff_ms > self.backoff.max_backoff_ms {
            return Err(invalid("syncer.backoff.min_backoff_ms exceeds max_backoff_ms"));
        }
        Ok(())
    }
}

impl ScriptConfig {
    /// Reject a zero VM cap and a zero timeout.
    pub fn validate(&self) -> Result<(), AgoraError> {
        if self.max_concurrent_vms == 0 {
            return Err(invalid("scripts.max_concurrent_vms must be at least 1"));
        }
        non_zero(self.script_timeout, "scripts.script_timeout")
    }
}

impl EngineConfig {
    /// Validate every enabled section and the venue list.
    pub fn validate(&self) -> Result<(), AgoraError> {
        self.dispatch.validate()?;
        self.orders.validate()?;
        if self.connectivity.enabled {
            self.connectivity.validate()?;
        }
        if self.time_sync.enabled {
            self.time_sync.validate()?;
        }
        if self.database.enabled {
            self.database.validate()?;
        }
        if self.syncer.enabled {
            self.syncer.validate()?;
        }
        if self.scripts.enabled {
            self.scripts.validate()?;
        }
        if self.portfolio.enabled {
            non_zero(self.portfolio.interval, "portfolio.interval")?;
        }
        let mut seen = std::collections::HashSet::new();
        for venue in &self.venues {
            if venue.name.trim().is_empty() {
                return Err(invalid("venue name is empty"));
            }
            if !seen.insert(venue.name.to_ascii_lowercase()) {
                return Err(invalid(format!("venue '{}' configured twice", venue.name)));
            }
        }
        Ok(())
    }
}
