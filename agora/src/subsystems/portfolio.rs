use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agora_core::sync::{read, write};
use agora_core::{AccountHoldings, AgoraError, DateTime, PortfolioConfig, SubsystemName, Utc};

use crate::market::HoldingsRegistry;
use crate::supervisor::{Lifecycle, PeriodicWorker, Subsystem, WorkerSlot};

/// Summed balance of one currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotal {
    /// Total across every venue and sub-account.
    pub total: Decimal,
    /// Amount on hold.
    pub hold: Decimal,
    /// Venues holding a non-zero total.
    pub venues: Vec<String>,
}

/// Holdings aggregated per currency; no valuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Keyed by upper-cased currency code.
    pub totals: BTreeMap<String, CurrencyTotal>,
    /// Venues that contributed holdings.
    pub venue_count: usize,
    /// When the summary was computed.
    pub updated_at: DateTime<Utc>,
}

impl PortfolioSummary {
    /// Fold `holdings` into per-currency totals.
    ///
    /// Fails with `Integrity` when a currency total overflows.
    pub fn aggregate(holdings: &[AccountHoldings]) -> Result<Self, AgoraError> {
        let mut totals: BTreeMap<String, CurrencyTotal> = BTreeMap::new();
        for h in holdings {
            for account in &h.accounts {
                for b in &account.balances {
                    let entry = totals.entry(b.currency.to_ascii_uppercase()).or_default();
                    let overflow = || {
                        AgoraError::Integrity(format!(
                            "{} balance of {} overflows the portfolio total",
                            h.venue, b.currency
                        ))
                    };
                    entry.total = entry.total.checked_add(b.total).ok_or_else(overflow)?;
                    entry.hold = entry.hold.checked_add(b.hold).ok_or_else(overflow)?;
                    if !b.total.is_zero() && !entry.venues.contains(&h.venue) {
                        entry.venues.push(h.venue.clone());
                    }
                }
            }
        }
        Ok(Self {
            totals,
            venue_count: holdings.len(),
            updated_at: Utc::now(),
        })
    }

    /// Total of `currency`, zero when absent.
    #[must_use]
    pub fn total(&self, currency: &str) -> Decimal {
        self.totals
            .get(&currency.to_ascii_uppercase())
            .map_or(Decimal::ZERO, |t| t.total)
    }
}

struct Shared {
    holdings: Arc<HoldingsRegistry>,
    summary: RwLock<Option<PortfolioSummary>>,
}

impl Shared {
    async fn refresh(&self) -> Result<PortfolioSummary, AgoraError> {
        let summary = PortfolioSummary::aggregate(&self.holdings.list().await)?;
        *write(&self.summary) = Some(summary.clone());
        Ok(summary)
    }
}

/// `portfolio` subsystem: recomputes the summary every interval.
pub struct PortfolioTracker {
    lifecycle: Arc<Lifecycle>,
    config: PortfolioConfig,
    shared: Arc<Shared>,
    worker: WorkerSlot,
}

impl PortfolioTracker {
    /// Tracker over `holdings`.
    #[must_use]
    pub fn new(config: PortfolioConfig, holdings: Arc<HoldingsRegistry>) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(SubsystemName::Portfolio)),
            config,
            shared: Arc::new(Shared {
                holdings,
                summary: RwLock::new(None),
            }),
            worker: WorkerSlot::default(),
        }
    }

    /// Last computed summary.
    #[must_use]
    pub fn summary(&self) -> Option<PortfolioSummary> {
        read(&self.shared.summary).clone()
    }

    /// Recompute now. The previous summary is kept when this fails.
    pub async fn refresh(&self) -> Result<PortfolioSummary, AgoraError> {
        self.shared.refresh().await
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        if self.config.interval.is_zero() {
            return Err(AgoraError::ConfigInvalid("portfolio.interval must be positive".into()));
        }
        if let Err(_e) = self.shared.refresh().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "initial portfolio summary failed");
        }
        let shared = Arc::clone(&self.shared);
        self.worker.put(PeriodicWorker::spawn(
            Arc::clone(&self.lifecycle),
            self.config.interval,
            move || {
                let shared = Arc::clone(&shared);
                async move { shared.refresh().await.map(|_| ()) }
            },
        ));
        Ok(())
    }
}

#[async_trait]
impl Subsystem for PortfolioTracker {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle
            .stop_with(async {
                self.worker.stop().await;
                Ok(())
            })
            .await
    }
}
