use agora::{ProcessOutcome, TickerRegistry};
use agora_core::{AgoraError, AssetClass};
use rust_decimal::dec;
use tokio::sync::mpsc::error::TryRecvError;

use crate::helpers::{BITFINEX, KRAKEN, at, btc_usd, started_bus, ticker};

#[tokio::test]
async fn only_real_changes_are_published() {
    let bus = started_bus();
    let reg = TickerRegistry::new(bus.tickers.clone());
    let mut pipe = reg.subscribe(KRAKEN, &btc_usd(), AssetClass::Spot).unwrap();

    assert_eq!(
        reg.process(ticker(KRAKEN, dec!(100), at(0))).await.unwrap(),
        ProcessOutcome::Published
    );
    assert_eq!(
        reg.process(ticker(KRAKEN, dec!(100), at(1))).await.unwrap(),
        ProcessOutcome::Unchanged
    );
    assert_eq!(
        reg.process(ticker(KRAKEN, dec!(99), at(-5))).await.unwrap(),
        ProcessOutcome::Ignored
    );

    assert_eq!(pipe.recv().await.unwrap().last, dec!(100));
    // the unchanged update still refreshed the stored timestamp
    let stored = reg.get(KRAKEN, &btc_usd(), AssetClass::Spot).await.unwrap();
    assert_eq!(stored.last_updated, at(1));
    assert_eq!(pipe.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn venue_topic_sees_every_instrument_case_insensitively() {
    let bus = started_bus();
    let reg = TickerRegistry::new(bus.tickers.clone());
    let mut all = reg.subscribe_venue("KRAKEN").unwrap();

    reg.process(ticker(KRAKEN, dec!(100), at(0))).await.unwrap();
    let mut eth = ticker("Kraken", dec!(2000), at(0));
    eth.pair = crate::helpers::eth_usd();
    reg.process(eth).await.unwrap();

    assert_eq!(all.recv().await.unwrap().pair, btc_usd());
    assert_eq!(all.recv().await.unwrap().last, dec!(2000));
    assert_eq!(reg.list().await.len(), 2);
}

#[tokio::test]
async fn lookups_and_bad_records_fail_cleanly() {
    let bus = started_bus();
    let reg = TickerRegistry::new(bus.tickers.clone());

    let err = reg.get(KRAKEN, &btc_usd(), AssetClass::Spot).await.unwrap_err();
    assert!(matches!(err, AgoraError::NotFound { .. }));

    let err = reg.process(ticker("", dec!(1), at(0))).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));

    let err = reg.process(ticker(BITFINEX, dec!(-1), at(0))).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));
    assert!(reg.list().await.is_empty());
}

#[tokio::test]
async fn subscribing_needs_a_running_dispatcher() {
    let bus = agora::Bus::new(8);
    let reg = TickerRegistry::new(bus.tickers.clone());
    let err = reg.subscribe(KRAKEN, &btc_usd(), AssetClass::Spot).unwrap_err();
    assert_eq!(err, AgoraError::DispatcherNotRunning);
}

#[tokio::test]
async fn failed_publish_leaves_nothing_stored() {
    let bus = agora::Bus::new(64);
    let reg = TickerRegistry::new(bus.tickers.clone());

    let err = reg.process(ticker(KRAKEN, dec!(100), at(0))).await.unwrap_err();
    assert!(matches!(err, AgoraError::DispatcherNotRunning));
    assert!(reg.get(KRAKEN, &btc_usd(), AssetClass::Spot).await.is_err());

    bus.tickers.start(2, 64).unwrap();
    let mut pipe = reg.subscribe(KRAKEN, &btc_usd(), AssetClass::Spot).unwrap();
    assert_eq!(
        reg.process(ticker(KRAKEN, dec!(100), at(1))).await.unwrap(),
        ProcessOutcome::Published
    );
    assert_eq!(pipe.recv().await.unwrap().last_updated, at(1));
}
