use agora::{ExchangeRegistry, OrderEventFeed, OrderManager, Subsystem};
use agora_core::{AgoraError, Dispatcher, OrderPolicy};
use rust_decimal::dec;

use crate::helpers::{KRAKEN, eth_usd, limit_buy, market_sell};

fn manager(policy: OrderPolicy) -> OrderManager {
    OrderManager::new(
        policy,
        ExchangeRegistry::new(),
        OrderEventFeed::new(Dispatcher::new(4)),
    )
}

fn is_policy(r: Result<(), AgoraError>) -> bool {
    matches!(r, Err(AgoraError::PolicyViolation(_)))
}

#[test]
fn default_policy_accepts_plain_orders() {
    let m = manager(OrderPolicy::default());
    assert!(m.check_policy(KRAKEN, &limit_buy(dec!(100), dec!(1))).is_ok());
    assert!(m.check_policy(KRAKEN, &market_sell(dec!(1))).is_ok());
}

#[test]
fn limit_only_rejects_market_orders() {
    let m = manager(OrderPolicy {
        enforce_limit_only: true,
        allow_market_orders: false,
        ..OrderPolicy::default()
    });
    assert!(is_policy(m.check_policy(KRAKEN, &market_sell(dec!(1)))));
    assert!(m.check_policy(KRAKEN, &limit_buy(dec!(100), dec!(1))).is_ok());
}

#[test]
fn market_switch_max_amount_instruments_and_venues() {
    let m = manager(OrderPolicy {
        allow_market_orders: false,
        per_order_max_amount: Some(dec!(2)),
        allowed_instruments: vec![crate::helpers::btc_usd()],
        allowed_venues: vec!["KRAKEN".into()],
        ..OrderPolicy::default()
    });
    assert!(is_policy(m.check_policy(KRAKEN, &market_sell(dec!(1)))));
    assert!(is_policy(m.check_policy(KRAKEN, &limit_buy(dec!(100), dec!(2.5)))));
    assert!(m.check_policy(KRAKEN, &limit_buy(dec!(100), dec!(2))).is_ok());

    let mut eth = limit_buy(dec!(100), dec!(1));
    eth.pair = eth_usd();
    assert!(is_policy(m.check_policy(KRAKEN, &eth)));
    assert!(is_policy(m.check_policy("binance", &limit_buy(dec!(100), dec!(1)))));
}

#[test]
fn malformed_requests_are_invalid_not_policy() {
    let m = manager(OrderPolicy::default());
    assert!(matches!(
        m.check_policy(KRAKEN, &limit_buy(dec!(100), dec!(0))),
        Err(AgoraError::InvalidArg(_))
    ));
    assert!(matches!(
        m.check_policy(KRAKEN, &limit_buy(dec!(0), dec!(1))),
        Err(AgoraError::InvalidArg(_))
    ));
}

#[tokio::test]
async fn contradictory_policy_fails_start() {
    let m = manager(OrderPolicy {
        enforce_limit_only: true,
        allow_market_orders: true,
        ..OrderPolicy::default()
    });
    let err = m.start().await.unwrap_err();
    assert_eq!(err.status_code(), "start-failed");
    assert!(!m.is_running());
}

#[tokio::test]
async fn operations_need_a_running_manager() {
    let m = manager(OrderPolicy::default());
    let err = m.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap_err();
    assert!(matches!(err, AgoraError::NotStarted { .. }));
    assert!(matches!(
        m.reconcile(KRAKEN).await,
        Err(AgoraError::NotStarted { .. })
    ));
    assert!(m.all_orders().is_empty());
}
