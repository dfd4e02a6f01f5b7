use agora::{HoldingsRegistry, ProcessOutcome};
use agora_core::AgoraError;
use rust_decimal::dec;
use tokio::sync::mpsc::error::TryRecvError;

use crate::helpers::{KRAKEN, holdings, started_bus};

#[tokio::test]
async fn holdings_replace_whole_and_skip_repeats() {
    let bus = started_bus();
    let reg = HoldingsRegistry::new(bus.holdings.clone());
    let mut pipe = reg.subscribe("KRAKEN").unwrap();

    let first = holdings(KRAKEN, &[("BTC", dec!(1), dec!(0)), ("USD", dec!(500), dec!(20))]);
    assert_eq!(reg.process(first.clone()).await.unwrap(), ProcessOutcome::Published);
    assert_eq!(reg.process(first.clone()).await.unwrap(), ProcessOutcome::Unchanged);

    let second = holdings(KRAKEN, &[("BTC", dec!(0.5), dec!(0))]);
    reg.process(second.clone()).await.unwrap();

    assert_eq!(pipe.recv().await, Some(first));
    assert_eq!(pipe.recv().await, Some(second.clone()));
    assert_eq!(pipe.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(reg.get("Kraken").await.unwrap(), second);
}

#[tokio::test]
async fn negative_balances_are_rejected() {
    let bus = started_bus();
    let reg = HoldingsRegistry::new(bus.holdings.clone());
    let err = reg
        .process(holdings(KRAKEN, &[("BTC", dec!(-1), dec!(0))]))
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));
    assert!(matches!(reg.get(KRAKEN).await, Err(AgoraError::NotFound { .. })));
}

#[tokio::test]
async fn holdings_are_kept_only_once_published() {
    let bus = agora::Bus::new(64);
    let reg = HoldingsRegistry::new(bus.holdings.clone());
    let balances = holdings(KRAKEN, &[("BTC", dec!(1), dec!(0))]);

    let err = reg.process(balances.clone()).await.unwrap_err();
    assert!(matches!(err, AgoraError::DispatcherNotRunning));
    assert!(matches!(reg.get(KRAKEN).await, Err(AgoraError::NotFound { .. })));

    bus.holdings.start(2, 64).unwrap();
    let mut pipe = reg.subscribe(KRAKEN).unwrap();
    assert_eq!(reg.process(balances.clone()).await.unwrap(), ProcessOutcome::Published);
    assert_eq!(pipe.recv().await.unwrap(), balances);
    assert_eq!(pipe.try_recv(), Err(TryRecvError::Empty));
}
