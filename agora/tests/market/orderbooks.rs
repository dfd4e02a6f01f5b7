use std::sync::{Arc, Mutex};

use agora::{OrderbookRegistry, ProcessOutcome, SnapshotRequest, SnapshotRequester};
use agora_core::{AgoraError, AssetClass};
use rust_decimal::dec;

use crate::helpers::{KRAKEN, btc_usd, delta, prices, snapshot, started_bus};

#[derive(Default)]
struct Recorder(Mutex<Vec<SnapshotRequest>>);

impl SnapshotRequester for Recorder {
    fn request_snapshot(&self, request: SnapshotRequest) {
        self.0.lock().unwrap().push(request);
    }
}

fn registry() -> (agora::Bus, OrderbookRegistry, Arc<Recorder>) {
    let bus = started_bus();
    let reg = OrderbookRegistry::new(bus.orderbooks.clone());
    let rec = Arc::new(Recorder::default());
    reg.set_requester(rec.clone());
    (bus, reg, rec)
}

#[tokio::test]
async fn deltas_patch_levels_in_price_order() {
    let (_bus, reg, _rec) = registry();
    reg.process(snapshot(
        KRAKEN,
        &[(dec!(100), dec!(1)), (dec!(99), dec!(1))],
        &[(dec!(101), dec!(1)), (dec!(102), dec!(1))],
    ))
    .await
    .unwrap();

    reg.process(delta(KRAKEN, &[(dec!(99.5), dec!(3))], &[(dec!(101), dec!(0))]))
        .await
        .unwrap();
    let book = reg.get(KRAKEN, &btc_usd(), AssetClass::Spot).await.unwrap();
    assert_eq!(
        prices(&book.bids),
        vec![(dec!(100), dec!(1)), (dec!(99.5), dec!(3)), (dec!(99), dec!(1))]
    );
    assert_eq!(prices(&book.asks), vec![(dec!(102), dec!(1))]);

    // removing a level that is not there changes nothing
    let out = reg
        .process(delta(KRAKEN, &[], &[(dec!(150), dec!(0))]))
        .await
        .unwrap();
    assert_eq!(out, ProcessOutcome::Unchanged);
}

#[tokio::test]
async fn crossing_delta_reverts_and_goes_stale_until_snapshot() {
    let (_bus, reg, rec) = registry();
    let mut pipe = reg.subscribe(KRAKEN, &btc_usd(), AssetClass::Spot).unwrap();
    reg.process(snapshot(KRAKEN, &[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]))
        .await
        .unwrap();
    assert!(!pipe.recv().await.unwrap().stale);

    let out = reg
        .process(delta(KRAKEN, &[(dec!(103), dec!(1))], &[]))
        .await
        .unwrap();
    assert_eq!(out, ProcessOutcome::Stale);
    let stale = pipe.recv().await.unwrap();
    assert!(stale.stale);
    assert_eq!(prices(&stale.bids), vec![(dec!(100), dec!(1))]);
    assert_eq!(rec.0.lock().unwrap().len(), 1);

    // deltas are ignored while stale
    let out = reg
        .process(delta(KRAKEN, &[(dec!(99), dec!(2))], &[]))
        .await
        .unwrap();
    assert_eq!(out, ProcessOutcome::Ignored);

    let out = reg
        .process(snapshot(KRAKEN, &[(dec!(98), dec!(1))], &[(dec!(99), dec!(1))]))
        .await
        .unwrap();
    assert_eq!(out, ProcessOutcome::Published);
    let fresh = pipe.recv().await.unwrap();
    assert!(!fresh.stale);
    assert_eq!(prices(&fresh.asks), vec![(dec!(99), dec!(1))]);
}

#[tokio::test]
async fn crossed_snapshot_is_not_re_requested() {
    let (_bus, reg, rec) = registry();
    let out = reg
        .process(snapshot(KRAKEN, &[(dec!(105), dec!(1))], &[(dec!(101), dec!(1))]))
        .await
        .unwrap();
    assert_eq!(out, ProcessOutcome::Stale);
    assert!(rec.0.lock().unwrap().is_empty());
    let book = reg.get(KRAKEN, &btc_usd(), AssetClass::Spot).await.unwrap();
    assert!(book.stale);
    assert!(book.bids.is_empty());
}

#[tokio::test]
async fn book_is_stored_only_after_it_was_published() {
    let bus = agora::Bus::new(64);
    let reg = OrderbookRegistry::new(bus.orderbooks.clone());
    let seed = snapshot(KRAKEN, &[(dec!(99), dec!(1))], &[(dec!(101), dec!(1))]);

    let err = reg.process(seed.clone()).await.unwrap_err();
    assert!(matches!(err, AgoraError::DispatcherNotRunning));
    assert!(reg.get(KRAKEN, &btc_usd(), AssetClass::Spot).await.is_err());

    bus.orderbooks.start(2, 64).unwrap();
    let mut pipe = reg.subscribe(KRAKEN, &btc_usd(), AssetClass::Spot).unwrap();
    assert_eq!(reg.process(seed).await.unwrap(), ProcessOutcome::Published);
    let book = pipe.recv().await.unwrap();
    assert_eq!(prices(&book.bids), vec![(dec!(99), dec!(1))]);
    assert!(!book.stale);
}
