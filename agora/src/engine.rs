//! Engine root object and builder.

use std::sync::{Arc, Mutex};

use agora_core::sync::lock;
use agora_core::{
    AgoraError, CompileValidator, CompiledScript, EngineConfig, ScriptRuntime, ScriptValidator,
    SubsystemName, VenueConfig, VenueConnector,
};

use crate::facade::Facade;
use crate::market::{HoldingsRegistry, OrderbookRegistry, TickerRegistry};
use crate::registry::ExchangeRegistry;
use crate::script::ScriptPool;
use crate::subsystems::{
    Bus, CommunicationsRelay, Communicator, ConnectivityMonitor, DatabaseKeepalive,
    DispatchService, DriftPrompt, ExchangeSyncer, OrderEventFeed, OrderManager, PortfolioTracker,
    SyncTargets, TimeKeeper, VenueSnapshotRequester,
};
use crate::supervisor::Subsystem;
use crate::tls::{self, CertificateStatus};

// Stand-in used when no runtime is configured; every compile fails.
struct NoScriptRuntime;

impl ScriptRuntime for NoScriptRuntime {
    fn compile(&self, _name: &str, _source: &str) -> Result<Arc<dyn CompiledScript>, AgoraError> {
        Err(AgoraError::unsupported("script runtime"))
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    venues: Vec<Arc<dyn VenueConnector>>,
    script_runtime: Option<Arc<dyn ScriptRuntime>>,
    script_validator: Option<Arc<dyn ScriptValidator>>,
    drift_prompt: Option<Arc<dyn DriftPrompt>>,
    communicators: Vec<Arc<dyn Communicator>>,
}

impl EngineBuilder {
    /// Empty builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load a venue adapter. Its snapshot comes from the matching entry in
    /// `EngineConfig::venues`, or defaults.
    #[must_use]
    pub fn with_venue(mut self, venue: Arc<dyn VenueConnector>) -> Self {
        self.venues.push(venue);
        self
    }

    /// Scripting language runtime.
    #[must_use]
    pub fn script_runtime(mut self, runtime: Arc<dyn ScriptRuntime>) -> Self {
        self.script_runtime = Some(runtime);
        self
    }

    /// Upload validator; defaults to "compiles with the runtime".
    #[must_use]
    pub fn script_validator(mut self, validator: Arc<dyn ScriptValidator>) -> Self {
        self.script_validator = Some(validator);
        self
    }

    /// Interactive prompt for the `prompt-once` drift level.
    #[must_use]
    pub fn drift_prompt(mut self, prompt: Arc<dyn DriftPrompt>) -> Self {
        self.drift_prompt = Some(prompt);
        self
    }

    /// Register an outbound notification sink.
    #[must_use]
    pub fn with_communicator(mut self, sink: Arc<dyn Communicator>) -> Self {
        self.communicators.push(sink);
        self
    }

    /// Validate the configuration and wire every component.
    pub fn build(self) -> Result<Engine, AgoraError> {
        let Self {
            config,
            venues,
            script_runtime,
            script_validator,
            drift_prompt,
            communicators,
        } = self;
        config.validate()?;
        if config.scripts.enabled && script_runtime.is_none() {
            return Err(AgoraError::ConfigInvalid(
                "scripts are enabled but no script runtime was supplied".into(),
            ));
        }

        let exchanges = ExchangeRegistry::new();
        for venue in venues {
            let snapshot = config
                .venues
                .iter()
                .find(|v| v.name.eq_ignore_ascii_case(venue.name()))
                .cloned()
                .unwrap_or_else(|| VenueConfig::new(venue.name()));
            exchanges.add_with_config(venue, snapshot)?;
        }
        #[cfg(feature = "tracing")]
        for v in &config.venues {
            if exchanges.get(&v.name).is_none() {
                tracing::warn!(venue = %v.name, "configured venue has no adapter");
            }
        }

        let bus = Bus::new(config.dispatch.pipe_capacity);
        let tickers = Arc::new(TickerRegistry::new(bus.tickers.clone()));
        let orderbooks = Arc::new(OrderbookRegistry::new(bus.orderbooks.clone()));
        let holdings = Arc::new(HoldingsRegistry::new(bus.holdings.clone()));
        orderbooks.set_requester(Arc::new(VenueSnapshotRequester::new(
            exchanges.clone(),
            &orderbooks,
        )));

        let dispatch = Arc::new(DispatchService::new(config.dispatch.clone(), bus.clone()));
        let database = Arc::new(DatabaseKeepalive::new(config.database.clone()));
        let connectivity = Arc::new(ConnectivityMonitor::new(config.connectivity.clone()));
        let timekeeper = Arc::new(TimeKeeper::new(config.time_sync.clone(), drift_prompt));
        let events = OrderEventFeed::new(bus.orders.clone());
        let orders = Arc::new(OrderManager::new(
            config.orders.clone(),
            exchanges.clone(),
            events.clone(),
        ));
        let syncer = Arc::new(ExchangeSyncer::new(
            config.syncer.clone(),
            exchanges.clone(),
            SyncTargets {
                tickers: Arc::clone(&tickers),
                orderbooks: Arc::clone(&orderbooks),
                holdings: Arc::clone(&holdings),
                orders: Some(Arc::clone(&orders)),
            },
            config
                .connectivity
                .enabled
                .then(|| connectivity.status_handle()),
        ));
        let portfolio = Arc::new(PortfolioTracker::new(
            config.portfolio.clone(),
            Arc::clone(&holdings),
        ));
        let communications = Arc::new(CommunicationsRelay::new(
            config.communications.clone(),
            events,
        ));
        for sink in communicators {
            communications.register(sink);
        }
        let runtime: Arc<dyn ScriptRuntime> =
            script_runtime.unwrap_or_else(|| Arc::new(NoScriptRuntime));
        let validator = script_validator
            .unwrap_or_else(|| Arc::new(CompileValidator::new(Arc::clone(&runtime))));
        let scripts = Arc::new(ScriptPool::new(config.scripts.clone(), runtime, validator));

        let boot_order: Vec<Arc<dyn Subsystem>> = vec![
            Arc::clone(&dispatch) as Arc<dyn Subsystem>,
            Arc::clone(&database) as Arc<dyn Subsystem>,
            Arc::clone(&connectivity) as Arc<dyn Subsystem>,
            Arc::clone(&timekeeper) as Arc<dyn Subsystem>,
            Arc::clone(&syncer) as Arc<dyn Subsystem>,
            Arc::clone(&orders) as Arc<dyn Subsystem>,
            Arc::clone(&portfolio) as Arc<dyn Subsystem>,
            Arc::clone(&communications) as Arc<dyn Subsystem>,
            Arc::clone(&scripts) as Arc<dyn Subsystem>,
        ];
        let facade = Facade::new(boot_order.iter().cloned(), &config.rpc_endpoints);

        Ok(Engine {
            config,
            exchanges,
            bus,
            tickers,
            orderbooks,
            holdings,
            dispatch,
            database,
            connectivity,
            timekeeper,
            syncer,
            orders,
            portfolio,
            communications,
            scripts,
            boot_order,
            facade,
            tls: Mutex::new(None),
        })
    }
}

/// Owns every runtime component.
///
/// `start` boots the enabled subsystems in dependency order; `stop` stops the
/// running ones in reverse.
pub struct Engine {
    config: EngineConfig,
    exchanges: ExchangeRegistry,
    bus: Bus,
    tickers: Arc<TickerRegistry>,
    orderbooks: Arc<OrderbookRegistry>,
    holdings: Arc<HoldingsRegistry>,
    dispatch: Arc<DispatchService>,
    database: Arc<DatabaseKeepalive>,
    connectivity: Arc<ConnectivityMonitor>,
    timekeeper: Arc<TimeKeeper>,
    syncer: Arc<ExchangeSyncer>,
    orders: Arc<OrderManager>,
    portfolio: Arc<PortfolioTracker>,
    communications: Arc<CommunicationsRelay>,
    scripts: Arc<ScriptPool>,
    boot_order: Vec<Arc<dyn Subsystem>>,
    facade: Facade,
    tls: Mutex<Option<CertificateStatus>>,
}

impl Engine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Subsystems in boot order.
    #[must_use]
    pub fn subsystems(&self) -> Vec<Arc<dyn Subsystem>> {
        self.boot_order.clone()
    }

    fn enabled(&self, name: SubsystemName) -> bool {
        let c = &self.config;
        match name {
            SubsystemName::Dispatch => c.dispatch.enabled,
            SubsystemName::Database => c.database.enabled,
            SubsystemName::InternetMonitor => c.connectivity.enabled,
            SubsystemName::NtpTimekeeper => c.time_sync.enabled,
            SubsystemName::ExchangeSyncer => c.syncer.enabled,
            SubsystemName::Orders => c.orders.enabled,
            SubsystemName::Portfolio => c.portfolio.enabled,
            SubsystemName::Communications => c.communications.enabled,
            SubsystemName::Gctscript => c.scripts.enabled,
        }
    }

    /// Prepare TLS material, set up venues and boot enabled subsystems.
    ///
    /// If a subsystem fails to start, the ones already started are stopped
    /// again and the error is returned.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::engine::start",
            skip(self),
        )
    )]
    pub async fn start(&self) -> Result<(), AgoraError> {
        if let Some(tls_config) = &self.config.tls {
            let status = tls::ensure_certificates(tls_config)?;
            *lock(&self.tls) = Some(status);
        }
        self.exchanges.setup_all().await?;

        let mut started: Vec<Arc<dyn Subsystem>> = Vec::new();
        for sub in self.subsystems() {
            if !self.enabled(sub.name()) {
                continue;
            }
            if let Err(e) = sub.start().await {
                #[cfg(feature = "tracing")]
                tracing::error!(subsystem = %sub.name(), error = %e, "engine start aborted");
                for s in started.iter().rev() {
                    let _ = s.stop().await;
                }
                return Err(e);
            }
            started.push(sub);
        }
        #[cfg(feature = "tracing")]
        tracing::info!(subsystems = started.len(), venues = self.exchanges.len(), "engine started");
        Ok(())
    }

    /// Stop every running subsystem in reverse boot order.
    ///
    /// Keeps going past failures and returns every error collected.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "agora::engine::stop",
            skip(self),
        )
    )]
    pub async fn stop(&self) -> Result<(), Vec<AgoraError>> {
        let mut errors = Vec::new();
        for sub in self.subsystems().into_iter().rev() {
            if !sub.is_running() {
                continue;
            }
            if let Err(e) = sub.stop().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(subsystem = %sub.name(), error = %e, "subsystem stop failed");
                errors.push(e);
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Control surface.
    #[must_use]
    pub const fn facade(&self) -> &Facade {
        &self.facade
    }

    /// Loaded venue adapters.
    #[must_use]
    pub const fn exchanges(&self) -> &ExchangeRegistry {
        &self.exchanges
    }

    /// Typed dispatchers.
    #[must_use]
    pub const fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Ticker store.
    #[must_use]
    pub const fn tickers(&self) -> &Arc<TickerRegistry> {
        &self.tickers
    }

    /// Orderbook store.
    #[must_use]
    pub const fn orderbooks(&self) -> &Arc<OrderbookRegistry> {
        &self.orderbooks
    }

    /// Holdings store.
    #[must_use]
    pub const fn holdings(&self) -> &Arc<HoldingsRegistry> {
        &self.holdings
    }

    /// `dispatch` subsystem.
    #[must_use]
    pub const fn dispatch(&self) -> &Arc<DispatchService> {
        &self.dispatch
    }

    /// `database` subsystem.
    #[must_use]
    pub const fn database(&self) -> &Arc<DatabaseKeepalive> {
        &self.database
    }

    /// `internet_monitor` subsystem.
    #[must_use]
    pub const fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// `ntp_timekeeper` subsystem.
    #[must_use]
    pub const fn timekeeper(&self) -> &Arc<TimeKeeper> {
        &self.timekeeper
    }

    /// `exchange_syncer` subsystem.
    #[must_use]
    pub const fn syncer(&self) -> &Arc<ExchangeSyncer> {
        &self.syncer
    }

    /// `orders` subsystem.
    #[must_use]
    pub const fn orders(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    /// `portfolio` subsystem.
    #[must_use]
    pub const fn portfolio(&self) -> &Arc<PortfolioTracker> {
        &self.portfolio
    }

    /// `communications` subsystem.
    #[must_use]
    pub const fn communications(&self) -> &Arc<CommunicationsRelay> {
        &self.communications
    }

    /// `gctscript` subsystem.
    #[must_use]
    pub const fn scripts(&self) -> &Arc<ScriptPool> {
        &self.scripts
    }

    /// Result of the last TLS check, if TLS is configured.
    #[must_use]
    pub fn tls_status(&self) -> Option<CertificateStatus> {
        lock(&self.tls).clone()
    }
}
