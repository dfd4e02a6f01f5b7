//! Market-data records: instruments, tickers, orderbooks and account holdings.

use core::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AgoraError;

/// Delimiters accepted when parsing a pair from text.
pub const PAIR_DELIMITERS: [char; 4] = ['-', '_', '/', ':'];

/// A tradable pair of currencies.
///
/// `base` and `quote` are stored upper-cased, so equality is case-insensitive.
/// The delimiter only affects display and is ignored by `Eq` and `Hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyPair {
    base: String,
    quote: String,
    delimiter: Option<char>,
}

impl CurrencyPair {
    /// Build a pair with the default `-` delimiter.
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self::with_delimiter(base, quote, Some('-'))
    }

    /// Build a pair with an explicit display delimiter.
    pub fn with_delimiter(
        base: impl AsRef<str>,
        quote: impl AsRef<str>,
        delimiter: Option<char>,
    ) -> Self {
        Self {
            base: base.as_ref().trim().to_ascii_uppercase(),
            quote: quote.as_ref().trim().to_ascii_uppercase(),
            delimiter,
        }
    }

    /// Base currency code.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote currency code.
    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Display delimiter, if any.
    #[must_use]
    pub const fn delimiter(&self) -> Option<char> {
        self.delimiter
    }
}

impl PartialEq for CurrencyPair {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.quote == other.quote
    }
}

impl Eq for CurrencyPair {}

impl Hash for CurrencyPair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        self.quote.hash(state);
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.delimiter {
            Some(d) => write!(f, "{}{d}{}", self.base, self.quote),
            None => write!(f, "{}{}", self.base, self.quote),
        }
    }
}

impl FromStr for CurrencyPair {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(idx) = s.find(PAIR_DELIMITERS) else {
            return Err(AgoraError::InvalidArg(format!(
                "pair '{s}' has no delimiter"
            )));
        };
        let delimiter = s[idx..].chars().next();
        let (base, quote) = (&s[..idx], &s[idx + 1..]);
        if base.is_empty() || quote.is_empty() {
            return Err(AgoraError::InvalidArg(format!("pair '{s}' is incomplete")));
        }
        Ok(Self::with_delimiter(base, quote, delimiter))
    }
}

/// Market segment an instrument trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Spot market.
    Spot,
    /// Margin trading.
    Margin,
    /// Dated futures.
    Futures,
    /// Perpetual swaps.
    PerpetualSwap,
    /// Index products.
    Index,
    /// Binary options.
    Binary,
    /// Options.
    Option,
    /// Downside futures.
    DownsideFuture,
}

impl AssetClass {
    /// Every asset class, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Spot,
        Self::Margin,
        Self::Futures,
        Self::PerpetualSwap,
        Self::Index,
        Self::Binary,
        Self::Option,
        Self::DownsideFuture,
    ];

    /// Stable snake_case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::Futures => "futures",
            Self::PerpetualSwap => "perpetual_swap",
            Self::Index => "index",
            Self::Binary => "binary",
            Self::Option => "option",
            Self::DownsideFuture => "downside_future",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| AgoraError::InvalidArg(format!("unknown asset class '{s}'")))
    }
}

/// Last-trade summary for one instrument on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Venue name as reported by the adapter.
    pub venue: String,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class of the instrument.
    pub asset_class: AssetClass,
    /// Last traded price.
    pub last: Decimal,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Session volume.
    pub volume: Decimal,
    /// All-time high, when the venue reports one.
    pub all_time_high: Option<Decimal>,
    /// Venue timestamp of the update.
    pub last_updated: DateTime<Utc>,
}

impl Ticker {
    /// True if every field except the timestamp matches `other`.
    #[must_use]
    pub fn same_values(&self, other: &Self) -> bool {
        self.last == other.last
            && self.bid == other.bid
            && self.ask == other.ask
            && self.high == other.high
            && self.low == other.low
            && self.volume == other.volume
            && self.all_time_high == other.all_time_high
    }
}

/// One price level of an orderbook side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Level price.
    pub price: Decimal,
    /// Aggregate amount; zero in an update removes the level.
    pub amount: Decimal,
    /// Number of orders at this level, if reported.
    pub order_count: Option<u64>,
    /// Venue level id, if reported.
    pub id: Option<String>,
}

impl BookLevel {
    /// Convenience constructor for a price/amount pair.
    #[must_use]
    pub const fn new(price: Decimal, amount: Decimal) -> Self {
        Self {
            price,
            amount,
            order_count: None,
            id: None,
        }
    }
}

/// Whether an orderbook update replaces the whole book or patches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Full replacement of both sides.
    Snapshot,
    /// Level-wise patch; untagged adapter updates are treated as deltas.
    #[default]
    Delta,
}

/// Orderbook change as delivered by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookUpdate {
    /// Venue name.
    pub venue: String,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Snapshot or delta.
    #[serde(default)]
    pub kind: UpdateKind,
    /// Bid levels in the update.
    pub bids: Vec<BookLevel>,
    /// Ask levels in the update.
    pub asks: Vec<BookLevel>,
    /// Venue timestamp.
    pub last_updated: DateTime<Utc>,
}

/// Merged orderbook state held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderbook {
    /// Venue name.
    pub venue: String,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Bids, price descending.
    pub bids: Vec<BookLevel>,
    /// Asks, price ascending.
    pub asks: Vec<BookLevel>,
    /// Timestamp of the last merged update.
    pub last_updated: DateTime<Utc>,
    /// Set when the book failed an integrity check and awaits a snapshot.
    pub stale: bool,
}

impl Orderbook {
    /// Empty book for a key.
    pub fn empty(venue: impl Into<String>, pair: CurrencyPair, asset_class: AssetClass) -> Self {
        Self {
            venue: venue.into(),
            pair,
            asset_class,
            bids: Vec::new(),
            asks: Vec::new(),
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            stale: false,
        }
    }

    /// Highest bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    /// Lowest ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// True when max-bid >= min-ask.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        matches!(
            (self.best_bid(), self.best_ask()),
            (Some(b), Some(a)) if b.price >= a.price
        )
    }
}

/// Balance of a single currency inside a sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Currency code, upper-case.
    pub currency: String,
    /// Total amount.
    pub total: Decimal,
    /// Amount on hold (in open orders or pending withdrawal).
    pub hold: Decimal,
}

/// A venue sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAccount {
    /// Sub-account identifier; empty for the main account.
    pub id: String,
    /// Balances held in the sub-account.
    pub balances: Vec<Balance>,
}

/// Account holdings reported by one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHoldings {
    /// Venue name.
    pub venue: String,
    /// Sub-accounts.
    pub accounts: Vec<SubAccount>,
}
