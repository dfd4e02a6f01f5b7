use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora::{
    CommunicationsRelay, Communicator, HoldingsRegistry, PortfolioTracker, Subsystem,
};
use agora_core::{
    AgoraError, CommunicationsConfig, OrderEvent, OrderEventKind, OrderPolicy, PortfolioConfig,
};
use agora_mock::MockVenue;
use async_trait::async_trait;
use rust_decimal::dec;

use crate::helpers::{BITFINEX, KRAKEN, holdings, limit_buy, order_harness, started_bus, wait_until};

#[derive(Default)]
struct Inbox {
    name: String,
    fail: bool,
    seen: Mutex<Vec<OrderEventKind>>,
}

#[async_trait]
impl Communicator for Inbox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, event: &OrderEvent) -> Result<(), AgoraError> {
        self.seen.lock().unwrap().push(event.kind);
        if self.fail {
            return Err(AgoraError::transient(&self.name, "gateway down"));
        }
        Ok(())
    }
}

fn inbox(name: &str, fail: bool) -> Arc<Inbox> {
    Arc::new(Inbox {
        name: name.into(),
        fail,
        ..Inbox::default()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_sink_sees_events_even_when_one_fails() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let relay = CommunicationsRelay::new(CommunicationsConfig::default(), h.orders.event_feed());
    let broken = inbox("sms", true);
    let chat = inbox("chat", false);
    relay.register(broken.clone());
    relay.register(chat.clone());
    assert_eq!(relay.list(), vec!["sms".to_string(), "chat".to_string()]);
    relay.start().await.unwrap();

    let placed = h.orders.submit(KRAKEN, limit_buy(dec!(100), dec!(1))).await.unwrap();
    h.orders.cancel(KRAKEN, &placed.venue_order_id).await.unwrap();

    wait_until(|| chat.seen.lock().unwrap().len() == 2).await;
    assert_eq!(
        *chat.seen.lock().unwrap(),
        vec![OrderEventKind::Submitted, OrderEventKind::Cancelled]
    );
    assert_eq!(broken.seen.lock().unwrap().len(), 2);
    relay.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_stops_itself_when_the_feed_closes() {
    let h = order_harness(OrderPolicy::default(), MockVenue::builder(KRAKEN).build()).await;
    let relay = CommunicationsRelay::new(CommunicationsConfig::default(), h.orders.event_feed());
    relay.start().await.unwrap();

    h.bus.orders.stop().await.unwrap();
    wait_until(|| !relay.is_running()).await;
    assert!(matches!(relay.stop().await, Err(AgoraError::NotStarted { .. })));
}

#[tokio::test]
async fn relay_needs_a_running_dispatcher() {
    let bus = agora::Bus::new(8);
    let relay = CommunicationsRelay::new(
        CommunicationsConfig::default(),
        agora::OrderEventFeed::new(bus.orders.clone()),
    );
    let err = relay.start().await.unwrap_err();
    assert_eq!(err.status_code(), "start-failed");
}

#[tokio::test]
async fn portfolio_sums_holdings_on_start_and_refresh() {
    let bus = started_bus();
    let registry = Arc::new(HoldingsRegistry::new(bus.holdings.clone()));
    registry
        .process(holdings(KRAKEN, &[("BTC", dec!(1), dec!(0.2)), ("USD", dec!(500), dec!(0))]))
        .await
        .unwrap();
    let tracker = PortfolioTracker::new(
        PortfolioConfig {
            enabled: true,
            interval: Duration::from_secs(3600),
        },
        Arc::clone(&registry),
    );
    assert!(tracker.summary().is_none());

    tracker.start().await.unwrap();
    let summary = tracker.summary().unwrap();
    assert_eq!(summary.total("btc"), dec!(1));
    assert_eq!(summary.venue_count, 1);

    registry
        .process(holdings(BITFINEX, &[("btc", dec!(0.5), dec!(0))]))
        .await
        .unwrap();
    let summary = tracker.refresh().await.unwrap();
    assert_eq!(summary.total("BTC"), dec!(1.5));
    assert_eq!(summary.totals["BTC"].hold, dec!(0.2));
    assert_eq!(summary.totals["BTC"].venues.len(), 2);
    assert_eq!(tracker.summary(), Some(summary));
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn zero_portfolio_interval_fails_start() {
    let bus = started_bus();
    let tracker = PortfolioTracker::new(
        PortfolioConfig {
            enabled: true,
            interval: Duration::ZERO,
        },
        Arc::new(HoldingsRegistry::new(bus.holdings.clone())),
    );
    assert!(matches!(
        tracker.start().await,
        Err(AgoraError::StartFailed { .. })
    ));
}
