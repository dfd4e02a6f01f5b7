//! Boot an engine over a mock venue, watch order events and toggle a subsystem.
//!
//! Suggested: RUST_LOG=info,agora=debug cargo run -p agora --example runtime_demo

use std::sync::Arc;
use std::time::Duration;

use agora::{Communicator, Engine};
use agora_core::{
    AccountHoldings, AgoraError, AssetClass, Balance, CurrencyPair, EngineConfig, OrderEvent,
    OrderRequest, OrderSide, SubAccount, Ticker, Utc, VenueConfig,
};
use agora_mock::MockVenue;
use async_trait::async_trait;
use rust_decimal::dec;
use tracing_subscriber::fmt::format::FmtSpan;

struct Console;

#[async_trait]
impl Communicator for Console {
    fn name(&self) -> &str {
        "console"
    }

    async fn push(&self, event: &OrderEvent) -> Result<(), AgoraError> {
        println!(
            "order {:?}: {} {} {} @ {} ({:?})",
            event.kind,
            event.order.venue,
            event.order.pair,
            event.order.amount,
            event.order.price,
            event.order.status
        );
        Ok(())
    }
}

fn seeded_venue(pair: &CurrencyPair) -> Arc<MockVenue> {
    let now = Utc::now();
    MockVenue::builder("kraken")
        .ticker(Ticker {
            venue: "kraken".into(),
            pair: pair.clone(),
            asset_class: AssetClass::Spot,
            last: dec!(64250.5),
            bid: dec!(64250),
            ask: dec!(64251),
            high: dec!(65010),
            low: dec!(63120),
            volume: dec!(812.4),
            all_time_high: None,
            last_updated: now,
        })
        .holdings(AccountHoldings {
            venue: "kraken".into(),
            accounts: vec![SubAccount {
                id: "main".into(),
                balances: vec![
                    Balance {
                        currency: "BTC".into(),
                        total: dec!(0.75),
                        hold: dec!(0),
                    },
                    Balance {
                        currency: "USD".into(),
                        total: dec!(12000),
                        hold: dec!(0),
                    },
                ],
            }],
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();

    let btc_usd = CurrencyPair::new("BTC", "USD");
    let mut config = EngineConfig::default();
    config.venues = vec![VenueConfig::new("kraken").with_pair(AssetClass::Spot, btc_usd.clone())];
    config.orders.per_order_max_amount = Some(dec!(1));
    config.syncer.interval = Duration::from_secs(5);

    let engine = Engine::builder()
        .config(config)
        .with_venue(seeded_venue(&btc_usd))
        .with_communicator(Arc::new(Console))
        .build()?;
    engine.start().await?;

    for (name, running) in engine.facade().list_subsystems() {
        println!("{name:>16}: {}", if running { "running" } else { "stopped" });
    }

    let ticker = engine.tickers().get("kraken", &btc_usd, AssetClass::Spot).await?;
    println!("kraken BTC-USD last {}", ticker.last);
    if let Some(summary) = engine.portfolio().summary() {
        println!("portfolio BTC total {}", summary.total("BTC"));
    }

    let req = OrderRequest::limit(btc_usd.clone(), AssetClass::Spot, OrderSide::Buy, dec!(64000), dec!(0.1));
    let placed = engine.orders().submit("kraken", req).await?;
    engine.orders().cancel("kraken", &placed.venue_order_id).await?;

    let too_big = OrderRequest::limit(btc_usd, AssetClass::Spot, OrderSide::Buy, dec!(64000), dec!(5));
    if let Err(e) = engine.orders().submit("kraken", too_big).await {
        println!("rejected: {} ({})", e, e.status_code());
    }

    engine.facade().set("portfolio", false).await?;
    println!("portfolio status: {:?}", engine.facade().status("portfolio")?.state);

    // let the relay drain before shutdown
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine
        .stop()
        .await
        .map_err(|errs| format!("{} subsystems failed to stop", errs.len()))?;
    Ok(())
}
