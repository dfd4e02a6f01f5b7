use agora::Subsystem;
use agora_core::connector::Features;
use agora_core::{
    AgoraError, AssetClass, CancelAllScope, CancelOutcome, Capability, OrderEventKind, OrderPolicy,
    OrderStatus,
};
use agora_mock::MockVenue;
use rust_decimal::dec;

use crate::helpers::{KRAKEN, eth_usd, limit_buy, order_harness, venue_order};

#[tokio::test]
async fn cancel_by_either_id() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let a = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    let b = h.orders.submit(KRAKEN, limit_buy(dec!(101), dec!(1))).await.unwrap();
    let mut events = h.orders.subscribe_events().unwrap();

    let rec = h.orders.cancel(KRAKEN, &a.order_id.to_string()).await.unwrap();
    assert_eq!(rec.status, OrderStatus::Cancelled);
    let rec = h.orders.cancel(KRAKEN, &b.venue_order_id).await.unwrap();
    assert_eq!(rec.status, OrderStatus::Cancelled);

    assert_eq!(events.recv().await.unwrap().kind, OrderEventKind::Cancelled);
    assert_eq!(events.recv().await.unwrap().order.id, b.order_id);
}

#[tokio::test]
async fn executed_volume_makes_a_partial_cancel() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    assert!(h.venue.fill(&placed.venue_order_id, dec!(0.4)));

    let rec = h.orders.cancel(KRAKEN, &placed.venue_order_id).await.unwrap();
    assert_eq!(rec.status, OrderStatus::PartiallyCancelled);
    assert_eq!((rec.executed, rec.remaining), (dec!(0.4), dec!(0.6)));
}

#[tokio::test]
async fn terminal_and_unknown_orders_are_refused() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    h.orders.cancel(KRAKEN, &placed.venue_order_id).await.unwrap();

    let err = h.orders.cancel(KRAKEN, &placed.venue_order_id).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));
    let err = h.orders.cancel(KRAKEN, "kraken-999").await.unwrap_err();
    assert!(matches!(err, AgoraError::NotFound { .. }));
    assert_eq!(h.venue.calls(Capability::CancelOrder), 1);
}

#[tokio::test]
async fn cancel_all_reports_each_order() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let ok = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    let gone = h.orders.submit(KRAKEN, limit_buy(dec!(99), dec!(1))).await.unwrap();
    let mut eth = limit_buy(dec!(10), dec!(1));
    eth.pair = eth_usd();
    let other = h.orders.submit(KRAKEN, eth).await.unwrap();
    h.venue.forget_order(&gone.venue_order_id);

    let scope = CancelAllScope {
        asset_class: Some(AssetClass::Spot),
        pair: Some(crate::helpers::btc_usd()),
    };
    let out = h.orders.cancel_all(Some(KRAKEN), &scope).await;
    assert_eq!(out.len(), 2);
    assert_eq!(out[&ok.order_id.to_string()], CancelOutcome::Success);
    assert!(matches!(out[&gone.order_id.to_string()], CancelOutcome::Failed(_)));
    assert_eq!(
        h.orders.get(KRAKEN, &other.venue_order_id).unwrap().status,
        OrderStatus::New
    );
}

#[tokio::test]
async fn cancel_all_on_a_stopped_manager_fails_every_order() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    h.orders.stop().await.unwrap();

    let out = h.orders.cancel_all(None, &CancelAllScope::default()).await;
    assert!(matches!(out[&placed.order_id.to_string()], CancelOutcome::Failed(_)));
    assert_eq!(h.venue.calls(Capability::CancelOrder), 0);
}

#[tokio::test]
async fn venue_bulk_cancel_covers_unknown_orders_too() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    h.venue.insert_order(venue_order("ext-9", dec!(2)));

    let out = h.orders.cancel_all_on_venue(KRAKEN).await.unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[&placed.order_id.to_string()], CancelOutcome::Success);
    assert_eq!(out["ext-9"], CancelOutcome::Success);
    assert_eq!(h.venue.calls(Capability::CancelAll), 1);
    assert_eq!(
        h.orders.get(KRAKEN, &placed.venue_order_id).unwrap().status,
        OrderStatus::Cancelled
    );
}

#[tokio::test]
async fn without_bulk_cancel_orders_go_one_by_one() {
    let venue = MockVenue::builder(KRAKEN).without(Features::CANCEL_ALL).build();
    let h = order_harness(OrderPolicy::default(), venue).await;
    h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    h.orders.submit(KRAKEN, limit_buy(dec!(99), dec!(1))).await.unwrap();

    let out = h.orders.cancel_all_on_venue(KRAKEN).await.unwrap();
    assert_eq!(out.len(), 2);
    assert!(out.values().all(CancelOutcome::is_success));
    assert_eq!(h.venue.calls(Capability::CancelOrder), 2);
    assert_eq!(h.venue.calls(Capability::CancelAll), 0);
}

#[tokio::test]
async fn shutdown_cancels_open_orders_when_asked() {
    let policy = OrderPolicy {
        cancel_on_shutdown: true,
        ..OrderPolicy::default()
    };
    let h = order_harness(policy, MockVenue::builder(KRAKEN).build()).await;
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();

    h.orders.stop().await.unwrap();
    assert_eq!(
        h.orders.get(KRAKEN, &placed.venue_order_id).unwrap().status,
        OrderStatus::Cancelled
    );
    assert_eq!(h.venue.orders()[0].status, OrderStatus::Cancelled);
}
