use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agora::subsystems::sntp::respond_once;
use agora::{ConnectivityMonitor, DatabaseKeepalive, DriftChoice, DriftPrompt, Subsystem, TimeKeeper};
use agora_core::{AgoraError, ConnectivityConfig, DatabaseConfig, DriftLevel, TimeSyncConfig};
use async_trait::async_trait;
use chrono::TimeDelta;
use httpmock::prelude::*;
use tokio::net::UdpSocket;

fn connectivity(target: String) -> ConnectivityConfig {
    ConnectivityConfig {
        enabled: true,
        dns_names: vec!["localhost".into()],
        http_targets: vec![target],
        check_interval: Duration::from_secs(3600),
        request_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn reachable_targets_report_online_until_stopped() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/health");
            then.status(200);
        })
        .await;

    let monitor = ConnectivityMonitor::new(connectivity(server.url("/health")));
    let status = monitor.status_handle();
    assert!(!status.is_online());
    monitor.start().await.unwrap();
    assert!(monitor.is_online());
    assert!(status.is_online());

    monitor.stop().await.unwrap();
    assert!(!status.is_online());
}

#[tokio::test]
async fn server_errors_count_as_offline() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/health");
            then.status(503);
        })
        .await;

    let monitor = ConnectivityMonitor::new(connectivity(server.url("/health")));
    monitor.start().await.unwrap();
    assert!(!monitor.is_online());
    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn empty_probe_targets_fail_start() {
    let mut cfg = connectivity("http://127.0.0.1:1/".into());
    cfg.dns_names.clear();
    let monitor = ConnectivityMonitor::new(cfg);
    let err = monitor.start().await.unwrap_err();
    assert_eq!(err.status_code(), "start-failed");
    assert!(!monitor.is_running());
}

/// Local SNTP responder whose clock is off by `skew`.
async fn time_server(skew: TimeDelta) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while respond_once(&socket, skew).await.is_ok() {}
    });
    addr
}

fn time_sync(server: String, level: DriftLevel) -> TimeSyncConfig {
    TimeSyncConfig {
        enabled: true,
        servers: vec![server],
        level,
        check_interval: Duration::from_secs(3600),
        request_timeout: Duration::from_secs(2),
        ..TimeSyncConfig::default()
    }
}

struct Answer {
    choice: DriftChoice,
    asked: AtomicUsize,
}

#[async_trait]
impl DriftPrompt for Answer {
    async fn choose(&self, _offset: TimeDelta) -> DriftChoice {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.choice
    }
}

fn answer(choice: DriftChoice) -> Arc<Answer> {
    Arc::new(Answer {
        choice,
        asked: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn offset_inside_the_window_is_quiet() {
    let server = time_server(TimeDelta::zero()).await;
    let keeper = TimeKeeper::new(time_sync(server, DriftLevel::Alert), None);
    keeper.check_now().await.unwrap();
    let offset = keeper.last_offset().unwrap().num_milliseconds();
    assert!(offset.abs() < 50, "offset {offset}");
    assert!(!keeper.is_drifting());
}

#[tokio::test]
async fn warn_and_alert_levels_flag_drift() {
    for level in [DriftLevel::Warn, DriftLevel::Alert] {
        let server = time_server(TimeDelta::seconds(5)).await;
        let keeper = TimeKeeper::new(time_sync(server, level), None);
        keeper.check_now().await.unwrap();
        let offset = keeper.last_offset().unwrap().num_milliseconds();
        assert!((4_800..=5_200).contains(&offset), "offset {offset}");
        assert!(keeper.is_drifting());
        assert_eq!(keeper.effective_level(), level);
    }

    // local clock ahead of the server
    let server = time_server(TimeDelta::seconds(-3)).await;
    let keeper = TimeKeeper::new(time_sync(server, DriftLevel::Warn), None);
    keeper.check_now().await.unwrap();
    assert!(keeper.last_offset().unwrap() < TimeDelta::zero());
    assert!(keeper.is_drifting());
}

#[tokio::test]
async fn prompt_is_asked_once_and_its_answer_sticks() {
    let server = time_server(TimeDelta::seconds(5)).await;
    let prompt = answer(DriftChoice::Disable);
    let keeper = TimeKeeper::new(time_sync(server, DriftLevel::PromptOnce), Some(prompt.clone()));

    keeper.check_now().await.unwrap();
    assert_eq!(keeper.effective_level(), DriftLevel::Disabled);
    assert!(!keeper.is_drifting());
    keeper.check_now().await.unwrap();
    assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);

    let server = time_server(TimeDelta::seconds(5)).await;
    let prompt = answer(DriftChoice::Alert);
    let keeper = TimeKeeper::new(time_sync(server, DriftLevel::PromptOnce), Some(prompt.clone()));
    keeper.check_now().await.unwrap();
    keeper.check_now().await.unwrap();
    assert_eq!(keeper.effective_level(), DriftLevel::Alert);
    assert!(keeper.is_drifting());
    assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_level_never_queries() {
    let server = time_server(TimeDelta::seconds(5)).await;
    let keeper = TimeKeeper::new(time_sync(server, DriftLevel::Disabled), None);
    keeper.check_now().await.unwrap();
    assert!(keeper.last_offset().is_none());
}

#[tokio::test]
async fn unreachable_server_does_not_block_start() {
    // bound but silent
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut cfg = time_sync(silent.local_addr().unwrap().to_string(), DriftLevel::Warn);
    cfg.request_timeout = Duration::from_millis(100);
    let keeper = TimeKeeper::new(cfg, None);

    keeper.start().await.unwrap();
    assert!(keeper.worker_running());
    assert!(keeper.last_offset().is_none());
    assert!(matches!(keeper.check_now().await, Err(AgoraError::Timeout { .. })));

    keeper.stop().await.unwrap();
    assert!(!keeper.worker_running());
}

fn database(connection_string: &str) -> DatabaseConfig {
    DatabaseConfig {
        enabled: true,
        connection_string: connection_string.into(),
        ping_interval: Duration::from_secs(3600),
        ..DatabaseConfig::default()
    }
}

#[tokio::test]
async fn database_keepalive_tracks_the_pool() {
    let db = DatabaseKeepalive::new(database("sqlite::memory:"));
    db.start().await.unwrap();
    assert!(db.is_connected());
    assert!(db.handle().is_some());
    assert!(db.ping_now().await.unwrap());

    db.stop().await.unwrap();
    assert!(!db.is_connected());
    assert!(db.handle().is_none());
    assert!(matches!(db.ping_now().await, Err(AgoraError::NotStarted { .. })));
}

#[tokio::test]
async fn unreachable_database_fails_start() {
    let db = DatabaseKeepalive::new(database("sqlite:/definitely/missing/agora.db"));
    let err = db.start().await.unwrap_err();
    assert!(matches!(err, AgoraError::StartFailed { .. }));
    assert!(!db.is_running());
    assert!(!db.is_connected());
}
