use std::sync::Arc;

use agora::{Engine, Subsystem};
use agora_core::{AgoraError, AssetClass, EngineConfig, ScriptConfig, VenueConfig};
use agora_mock::{MockVenue, ToyScriptRuntime};
use rust_decimal::dec;

use crate::helpers::{BITFINEX, KRAKEN, btc_usd, limit_buy};

#[tokio::test]
async fn start_boots_enabled_subsystems_and_stop_reverses_it() {
    let venue = MockVenue::builder(KRAKEN).build();
    let engine = Engine::builder().with_venue(venue.clone()).build().unwrap();
    assert!(engine.subsystems().iter().all(|s| !s.is_running()));

    engine.start().await.unwrap();
    let running: Vec<String> = engine
        .subsystems()
        .iter()
        .filter(|s| s.is_running())
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(
        running,
        vec!["dispatch", "exchange_syncer", "orders", "portfolio", "communications"]
    );
    assert_eq!(engine.exchanges().len(), 1);
    assert!(venue.setup_config().is_some());

    let placed = engine.orders().submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    assert_eq!(placed.venue_order_id, "kraken-1");

    engine.stop().await.unwrap();
    assert!(engine.subsystems().iter().all(|s| !s.is_running()));
    let err = engine.orders().submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert_eq!(err.status_code(), "not-started");
}

#[tokio::test]
async fn failed_boot_rolls_back_started_subsystems() {
    let mut config = EngineConfig::default();
    config.database.enabled = true;
    config.database.connection_string = "sqlite:/definitely/missing/agora.db".into();
    let engine = Engine::builder().config(config).build().unwrap();

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, AgoraError::StartFailed { .. }));
    assert!(!engine.dispatch().is_running());
    assert!(!engine.orders().is_running());
    assert_eq!(engine.dispatch().status().stops, 1);
}

#[test]
fn scripts_need_a_runtime() {
    let mut config = EngineConfig::default();
    config.scripts = ScriptConfig {
        enabled: true,
        ..ScriptConfig::default()
    };
    let err = Engine::builder().config(config.clone()).build().err().unwrap();
    assert!(matches!(err, AgoraError::ConfigInvalid(_)));

    let built = Engine::builder()
        .config(config)
        .script_runtime(Arc::new(ToyScriptRuntime::new()))
        .build();
    assert!(built.is_ok());
}

#[test]
fn invalid_config_is_refused_at_build() {
    let mut config = EngineConfig::default();
    config.dispatch.workers = 0;
    let err = Engine::builder().config(config).build().err().unwrap();
    assert_eq!(err.status_code(), "config-invalid");
}

#[tokio::test]
async fn venues_get_their_configured_snapshot() {
    let kraken = MockVenue::builder(KRAKEN).build();
    let bitfinex = MockVenue::builder(BITFINEX).build();
    let snapshot = VenueConfig::new("KRAKEN").with_pair(AssetClass::Spot, btc_usd());
    let mut config = EngineConfig::default();
    config.venues = vec![snapshot.clone(), VenueConfig::new("ghost")];

    let engine = Engine::builder()
        .config(config)
        .with_venue(kraken.clone())
        .with_venue(bitfinex.clone())
        .build()
        .unwrap();
    engine.start().await.unwrap();

    // the adapter's own name wins over the configured spelling
    let expected = VenueConfig {
        name: KRAKEN.into(),
        ..snapshot
    };
    assert_eq!(kraken.setup_config(), Some(expected));
    assert_eq!(bitfinex.setup_config(), Some(VenueConfig::new(BITFINEX)));
    assert!(engine.exchanges().get("ghost").is_none());
    engine.stop().await.unwrap();
}

#[test]
fn duplicate_venues_are_refused() {
    let err = Engine::builder()
        .with_venue(MockVenue::builder(KRAKEN).build())
        .with_venue(MockVenue::builder("Kraken").build())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, AgoraError::DuplicateVenue(_)));
}
