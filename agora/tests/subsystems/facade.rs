use agora::{Engine, Subsystem};
use agora_core::{AgoraError, EngineConfig, RpcEndpointConfig, SubsystemState};

fn engine_with_endpoints() -> Engine {
    let mut config = EngineConfig::default();
    config.rpc_endpoints = vec![
        RpcEndpointConfig {
            name: "grpc".into(),
            listen_address: "127.0.0.1:9052".into(),
            enabled: true,
        },
        RpcEndpointConfig {
            name: "websocket".into(),
            listen_address: "127.0.0.1:9051".into(),
            enabled: false,
        },
    ];
    Engine::builder().config(config).build().unwrap()
}

#[tokio::test]
async fn list_reports_every_subsystem() {
    let engine = engine_with_endpoints();
    engine.start().await.unwrap();

    let listed = engine.facade().list_subsystems();
    assert_eq!(listed.len(), 9);
    assert!(listed["dispatch"]);
    assert!(listed["orders"]);
    assert!(!listed["database"]);
    assert!(!listed["gctscript"]);

    engine.stop().await.unwrap();
    assert!(engine.facade().list_subsystems().values().all(|running| !running));
}

#[tokio::test]
async fn set_toggles_and_reports_lifecycle_errors() {
    let engine = engine_with_endpoints();
    engine.start().await.unwrap();
    let facade = engine.facade();

    facade.set("portfolio", false).await.unwrap();
    assert_eq!(facade.status("portfolio").unwrap().state, SubsystemState::Stopped);
    let err = facade.set("portfolio", false).await.unwrap_err();
    assert_eq!(err.status_code(), "not-started");

    facade.set("Portfolio", true).await.unwrap();
    let err = facade.set("portfolio", true).await.unwrap_err();
    assert_eq!(err.status_code(), "already-started");
    let status = facade.status("portfolio").unwrap();
    assert_eq!((status.starts, status.stops), (2, 1));

    let err = facade.set("websocket_rpc", true).await.unwrap_err();
    assert!(matches!(err, AgoraError::UnknownSubsystem(_)));
    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_have_one_winner() {
    let engine = engine_with_endpoints();
    let (f1, f2) = (engine.facade().clone(), engine.facade().clone());
    let t1 = tokio::spawn(async move { f1.set("orders", true).await });
    let t2 = tokio::spawn(async move { f2.set("orders", true).await });
    let (a, b) = (t1.await.unwrap(), t2.await.unwrap());
    let wins = [a.is_ok(), b.is_ok()].into_iter().filter(|w| *w).count();
    assert_eq!(wins, 1);
    let loser = a.err().or(b.err()).unwrap();
    assert_eq!(loser.status_code(), "already-started");
    assert!(engine.orders().is_running());
}

#[test]
fn rpc_endpoints_lists_only_enabled_ones() {
    let engine = engine_with_endpoints();
    let facade = engine.facade();
    let eps = facade.list_rpc_endpoints();
    assert_eq!(eps.len(), 1);
    assert!(!eps["grpc"].started);
    assert_eq!(eps["grpc"].listen_address, "127.0.0.1:9052");

    facade.mark_endpoint_started("grpc", true).unwrap();
    assert!(facade.list_rpc_endpoints()["grpc"].started);
    assert!(matches!(
        facade.mark_endpoint_started("websocket", true),
        Err(AgoraError::NotFound { .. })
    ));
}
