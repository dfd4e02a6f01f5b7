use std::time::Duration;

use agora_core::connector::VenueConnector;
use agora_core::{AgoraError, AssetClass, Capability, OrderEventKind, OrderPolicy, OrderStatus};
use agora_mock::MockVenue;
use rust_decimal::dec;

use crate::helpers::{KRAKEN, limit_buy, order_harness};

fn transient(msg: &str) -> AgoraError {
    AgoraError::transient(KRAKEN, msg)
}

#[tokio::test]
async fn accepted_order_is_stored_as_new_and_announced() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let mut events = h.orders.subscribe_events().unwrap();

    let placed = h.orders.submit("KRAKEN", limit_buy(dec!(100), dec!(1))).await.unwrap();
    assert_eq!(placed.status, OrderStatus::New);
    assert_eq!(placed.venue_order_id, "kraken-1");

    let stored = h.orders.get(KRAKEN, &placed.order_id.to_string()).unwrap();
    assert_eq!(stored.venue, KRAKEN);
    assert_eq!(stored.remaining, dec!(1));
    assert_eq!(h.orders.get(KRAKEN, "kraken-1").unwrap().id, placed.order_id);

    let ev = events.recv().await.unwrap();
    assert_eq!(ev.kind, OrderEventKind::Submitted);
    assert_eq!(ev.order.id, placed.order_id);
}

#[tokio::test]
async fn fully_matched_order_is_stored_filled() {
    let venue = MockVenue::builder(KRAKEN).fully_match(true).build();
    let h = order_harness(OrderPolicy::default(), venue).await;
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(2))).await.unwrap();
    assert_eq!(placed.status, OrderStatus::Filled);
    let stored = h.orders.get(KRAKEN, "kraken-1").unwrap();
    assert_eq!((stored.executed, stored.remaining), (dec!(2), dec!(0)));
}

#[tokio::test]
async fn acknowledged_but_not_placed_is_rejected() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    h.venue.set_placing(false);
    let err = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert!(matches!(err, AgoraError::Permanent { .. }));
    let stored = h.orders.orders(KRAKEN);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, OrderStatus::Rejected);
}

#[tokio::test]
async fn policy_rejection_never_reaches_the_venue() {
    let policy = OrderPolicy {
        per_order_max_amount: Some(dec!(1)),
        ..OrderPolicy::default()
    };
    let h = order_harness(policy, MockVenue::builder(KRAKEN).build()).await;
    let err = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(5))).await.unwrap_err();
    assert!(matches!(err, AgoraError::PolicyViolation(_)));
    assert!(h.venue.submitted().is_empty());
    assert!(h.orders.all_orders().is_empty());
}

#[tokio::test]
async fn unknown_disabled_and_unsupported_targets() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;

    let err = h.orders.submit("binance", limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert_eq!(err, AgoraError::UnknownVenue("binance".into()));

    let mut futures = limit_buy(dec!(100), dec!(1));
    futures.asset_class = AssetClass::Futures;
    let err = h.orders.submit(KRAKEN, futures).await.unwrap_err();
    assert!(matches!(err, AgoraError::UnknownInstrument(_)));

    h.venue.set_enabled(false);
    let err = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert!(matches!(err, AgoraError::UnknownVenue(_)));
    assert!(h.venue.submitted().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    h.venue
        .fail_next(Capability::SubmitOrder, [transient("503"), transient("timeout")]);

    let started = tokio::time::Instant::now();
    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(750));
    assert_eq!(h.venue.calls(Capability::SubmitOrder), 3);
    assert_eq!(placed.status, OrderStatus::New);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn spent_budget_returns_the_last_error() {
    let policy = OrderPolicy {
        submission_retry_budget: 2,
        ..OrderPolicy::default()
    };
    let h = order_harness(policy, MockVenue::builder(KRAKEN).build()).await;
    h.venue.fail_next(
        Capability::SubmitOrder,
        [transient("first"), transient("second"), transient("third")],
    );
    let err = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert_eq!(err, transient("third"));
    assert_eq!(h.venue.calls(Capability::SubmitOrder), 3);
    assert!(h.orders.all_orders().is_empty());
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    h.venue.fail_next(
        Capability::SubmitOrder,
        [AgoraError::permanent(KRAKEN, "insufficient funds")],
    );
    let err = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert!(matches!(err, AgoraError::Permanent { .. }));
    assert_eq!(h.venue.calls(Capability::SubmitOrder), 1);
}
