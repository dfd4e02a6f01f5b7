// Shared fixtures; each test binary uses a different subset.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agora::{Bus, ExchangeRegistry, OrderEventFeed, OrderManager, Subsystem};
use agora_core::{
    AccountHoldings, AssetClass, Balance, BookLevel, CurrencyPair, DateTime, Decimal, OrderPolicy,
    OrderRequest, OrderSide, OrderStatus, OrderType, OrderbookUpdate, SubAccount, Ticker,
    UpdateKind, Utc, VenueConfig, VenueOrder,
};
use agora_mock::MockVenue;
use rust_decimal::dec;

pub const KRAKEN: &str = "kraken";
pub const BITFINEX: &str = "Bitfinex";

pub fn btc_usd() -> CurrencyPair {
    CurrencyPair::new("BTC", "USD")
}

pub fn eth_usd() -> CurrencyPair {
    CurrencyPair::new("ETH", "USD")
}

/// Fixed base time plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
}

pub fn ticker(venue: &str, last: Decimal, updated: DateTime<Utc>) -> Ticker {
    Ticker {
        venue: venue.into(),
        pair: btc_usd(),
        asset_class: AssetClass::Spot,
        last,
        bid: last,
        ask: last,
        high: last,
        low: last,
        volume: dec!(10),
        all_time_high: None,
        last_updated: updated,
    }
}

fn levels(side: &[(Decimal, Decimal)]) -> Vec<BookLevel> {
    side.iter().map(|(p, a)| BookLevel::new(*p, *a)).collect()
}

pub fn book_update(
    venue: &str,
    kind: UpdateKind,
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
) -> OrderbookUpdate {
    OrderbookUpdate {
        venue: venue.into(),
        pair: btc_usd(),
        asset_class: AssetClass::Spot,
        kind,
        bids: levels(bids),
        asks: levels(asks),
        last_updated: Utc::now(),
    }
}

pub fn snapshot(
    venue: &str,
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
) -> OrderbookUpdate {
    book_update(venue, UpdateKind::Snapshot, bids, asks)
}

pub fn delta(
    venue: &str,
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
) -> OrderbookUpdate {
    book_update(venue, UpdateKind::Delta, bids, asks)
}

/// Price/amount pairs of a book side, for compact assertions.
pub fn prices(side: &[BookLevel]) -> Vec<(Decimal, Decimal)> {
    side.iter().map(|l| (l.price, l.amount)).collect()
}

pub fn holdings(venue: &str, balances: &[(&str, Decimal, Decimal)]) -> AccountHoldings {
    AccountHoldings {
        venue: venue.into(),
        accounts: vec![SubAccount {
            id: "main".into(),
            balances: balances
                .iter()
                .map(|(c, t, h)| Balance {
                    currency: (*c).into(),
                    total: *t,
                    hold: *h,
                })
                .collect(),
        }],
    }
}

pub fn limit_buy(price: Decimal, amount: Decimal) -> OrderRequest {
    OrderRequest::limit(btc_usd(), AssetClass::Spot, OrderSide::Buy, price, amount)
}

pub fn market_sell(amount: Decimal) -> OrderRequest {
    OrderRequest::market(btc_usd(), AssetClass::Spot, OrderSide::Sell, amount)
}

/// An open order the venue knows but the engine never submitted.
pub fn venue_order(id: &str, amount: Decimal) -> VenueOrder {
    VenueOrder {
        venue_order_id: id.into(),
        pair: btc_usd(),
        asset_class: AssetClass::Spot,
        side: OrderSide::Sell,
        order_type: OrderType::Limit,
        price: dec!(105),
        amount,
        executed: Decimal::ZERO,
        remaining: amount,
        status: OrderStatus::Open,
        created_at: Utc::now(),
    }
}

/// A bus with every dispatcher running.
pub fn started_bus() -> Bus {
    let bus = Bus::new(64);
    bus.tickers.start(2, 64).expect("tickers start");
    bus.orderbooks.start(2, 64).expect("orderbooks start");
    bus.holdings.start(2, 64).expect("holdings start");
    bus.orders.start(2, 64).expect("orders start");
    bus
}

/// Registry holding `venues`, set up with their default snapshots.
pub async fn registry(venues: &[Arc<MockVenue>]) -> ExchangeRegistry {
    let exchanges = ExchangeRegistry::new();
    for v in venues {
        exchanges.add(v.clone()).expect("unique venue");
    }
    exchanges.setup_all().await.expect("setup");
    exchanges
}

/// Registry holding `venue` with `config`.
pub async fn registry_with(venue: &Arc<MockVenue>, config: VenueConfig) -> ExchangeRegistry {
    let exchanges = ExchangeRegistry::new();
    exchanges
        .add_with_config(venue.clone(), config)
        .expect("unique venue");
    exchanges.setup_all().await.expect("setup");
    exchanges
}

pub struct OrderHarness {
    pub bus: Bus,
    pub venue: Arc<MockVenue>,
    pub orders: Arc<OrderManager>,
}

/// A running order manager over one mock venue.
pub async fn order_harness(policy: OrderPolicy, venue: Arc<MockVenue>) -> OrderHarness {
    let bus = started_bus();
    let exchanges = registry(std::slice::from_ref(&venue)).await;
    let orders = Arc::new(OrderManager::new(
        policy,
        exchanges,
        OrderEventFeed::new(bus.orders.clone()),
    ));
    orders.start().await.expect("orders start");
    OrderHarness { bus, venue, orders }
}

/// Poll `cond` until it holds, failing after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
