//! Order records, requests and venue replies.

use core::fmt;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgoraError, AssetClass, CurrencyPair, OrderId};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
    /// Bid.
    Bid,
    /// Ask.
    Ask,
    /// Long.
    Long,
    /// Short.
    Short,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    StopLimit,
    /// Trailing stop.
    TrailingStop,
    /// Immediate-or-cancel.
    ImmediateOrCancel,
    /// Fill-or-kill.
    FillOrKill,
    /// Post-only limit order.
    PostOnly,
}

impl OrderType {
    /// Stable snake_case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::TrailingStop => "trailing_stop",
            Self::ImmediateOrCancel => "immediate_or_cancel",
            Self::FillOrKill => "fill_or_kill",
            Self::PostOnly => "post_only",
        }
    }

    /// True for the market order type.
    #[must_use]
    pub const fn is_market(self) -> bool {
        matches!(self, Self::Market)
    }

    /// True for order types that rest on the book at a limit price.
    #[must_use]
    pub const fn is_limit(self) -> bool {
        matches!(self, Self::Limit | Self::PostOnly)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted locally, not yet seen as resting.
    New,
    /// Resting on the venue.
    Open,
    /// Partially executed and still resting.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Cancelled without execution.
    Cancelled,
    /// Cancelled after partial execution.
    PartiallyCancelled,
    /// Rejected by the venue.
    Rejected,
    /// Expired on the venue.
    Expired,
}

impl OrderStatus {
    /// True for statuses no order leaves once reached.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::PartiallyCancelled | Self::Rejected | Self::Expired
        )
    }

    /// True while the order may still execute.
    #[must_use]
    pub const fn is_open(self) -> bool {
        !self.is_terminal()
    }

    const fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Open => 1,
            Self::PartiallyFilled => 2,
            _ => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return (self as u8) == (next as u8);
        }
        next.rank() >= self.rank()
    }

    /// Stable snake_case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::PartiallyCancelled => "partially_cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Limit price; zero for market orders.
    pub price: Decimal,
    /// Order amount in base currency.
    pub amount: Decimal,
    /// Optional client-supplied id.
    pub client_id: Option<String>,
}

impl OrderRequest {
    /// Limit order request.
    #[must_use]
    pub const fn limit(
        pair: CurrencyPair,
        asset_class: AssetClass,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Self {
        Self {
            pair,
            asset_class,
            side,
            order_type: OrderType::Limit,
            price,
            amount,
            client_id: None,
        }
    }

    /// Market order request.
    #[must_use]
    pub const fn market(
        pair: CurrencyPair,
        asset_class: AssetClass,
        side: OrderSide,
        amount: Decimal,
    ) -> Self {
        Self {
            pair,
            asset_class,
            side,
            order_type: OrderType::Market,
            price: Decimal::ZERO,
            amount,
            client_id: None,
        }
    }

    /// Attach a client id.
    #[must_use]
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }
}

/// Venue reply to a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Venue-assigned order id.
    pub venue_order_id: String,
    /// False when the venue acknowledged but did not place the order.
    pub placed: bool,
    /// True when the order executed in full on submission.
    pub fully_matched: bool,
}

/// Venue reply to a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReceipt {
    /// Amount executed before the cancel took effect.
    pub executed: Decimal,
    /// Amount that was cancelled.
    pub remaining: Decimal,
}

/// Cancellation request passed to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Venue order id.
    pub venue_order_id: String,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Side of the original order.
    pub side: OrderSide,
}

/// Scope of a bulk cancellation; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAllScope {
    /// Restrict to one asset class.
    pub asset_class: Option<AssetClass>,
    /// Restrict to one instrument.
    pub pair: Option<CurrencyPair>,
}

impl CancelAllScope {
    /// True if `record` falls inside the scope.
    #[must_use]
    pub fn matches(&self, record: &OrderRecord) -> bool {
        self.asset_class.is_none_or(|c| c == record.asset_class)
            && self.pair.as_ref().is_none_or(|p| *p == record.pair)
    }
}

/// Outcome of one cancellation inside a bulk cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    /// Cancelled.
    Success,
    /// Not cancelled, with the reason.
    Failed(String),
}

impl CancelOutcome {
    /// True for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// Per-venue-order-id result of an adapter bulk cancel.
pub type CancelAllResponse = HashMap<String, CancelOutcome>;

/// Filter for order listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    /// Restrict to one instrument.
    pub pair: Option<CurrencyPair>,
    /// Restrict to one asset class.
    pub asset_class: Option<AssetClass>,
    /// Restrict to one side.
    pub side: Option<OrderSide>,
    /// Only orders created at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Order as reported by a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueOrder {
    /// Venue order id.
    pub venue_order_id: String,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Price.
    pub price: Decimal,
    /// Original amount.
    pub amount: Decimal,
    /// Executed amount.
    pub executed: Decimal,
    /// Remaining amount.
    pub remaining: Decimal,
    /// Venue status.
    pub status: OrderStatus,
    /// Venue creation time.
    pub created_at: DateTime<Utc>,
}

/// Order record owned by the order manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Internal id.
    pub id: OrderId,
    /// Venue name.
    pub venue: String,
    /// Venue order id; empty until accepted.
    pub venue_order_id: String,
    /// Optional client-supplied id.
    pub client_id: Option<String>,
    /// Instrument.
    pub pair: CurrencyPair,
    /// Asset class.
    pub asset_class: AssetClass,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Price.
    pub price: Decimal,
    /// Original amount.
    pub amount: Decimal,
    /// Executed amount.
    pub executed: Decimal,
    /// Remaining amount.
    pub remaining: Decimal,
    /// Status.
    pub status: OrderStatus,
    /// Local creation time.
    pub created_at: DateTime<Utc>,
    /// Last local mutation.
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Build a `New` record from an accepted request.
    pub fn from_request(
        venue: impl Into<String>,
        venue_order_id: impl Into<String>,
        req: &OrderRequest,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            venue: venue.into(),
            venue_order_id: venue_order_id.into(),
            client_id: req.client_id.clone(),
            pair: req.pair.clone(),
            asset_class: req.asset_class,
            side: req.side,
            order_type: req.order_type,
            price: req.price,
            amount: req.amount,
            executed: Decimal::ZERO,
            remaining: req.amount,
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a record for an order first seen on the venue.
    pub fn from_venue(venue: impl Into<String>, order: &VenueOrder) -> Self {
        Self {
            id: OrderId::new(),
            venue: venue.into(),
            venue_order_id: order.venue_order_id.clone(),
            client_id: None,
            pair: order.pair.clone(),
            asset_class: order.asset_class,
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            amount: order.amount,
            executed: order.executed,
            remaining: order.remaining,
            status: order.status,
            created_at: order.created_at,
            updated_at: Utc::now(),
        }
    }

    /// True if `id` equals the internal id or the venue order id.
    #[must_use]
    pub fn matches_id(&self, id: &str) -> bool {
        (!self.venue_order_id.is_empty() && self.venue_order_id == id)
            || self.id.to_string() == id
    }

    /// Move to `next`, refusing non-monotonic transitions.
    ///
    /// Returns `Ok(true)` if the status changed.
    pub fn transition(&mut self, next: OrderStatus) -> Result<bool, AgoraError> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(AgoraError::Integrity(format!(
                "order {}: {} -> {} is not monotonic",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Record executed/remaining amounts.
    pub fn set_fill(&mut self, executed: Decimal, remaining: Decimal) -> Result<(), AgoraError> {
        if executed.is_sign_negative() || remaining.is_sign_negative() {
            return Err(AgoraError::Integrity(format!(
                "order {}: negative fill amounts",
                self.id
            )));
        }
        let accounted = executed.checked_add(remaining).ok_or_else(|| {
            AgoraError::Integrity(format!(
                "order {}: executed {executed} + remaining {remaining} overflows",
                self.id
            ))
        })?;
        if accounted > self.amount {
            return Err(AgoraError::Integrity(format!(
                "order {}: executed {executed} + remaining {remaining} exceeds amount {}",
                self.id, self.amount
            )));
        }
        self.executed = executed;
        self.remaining = remaining;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Kind of change carried by an [`OrderEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    /// Stored after a submission.
    Submitted,
    /// Fill or status update.
    Updated,
    /// Cancelled locally or on the venue.
    Cancelled,
    /// Added by reconciliation.
    Discovered,
}

/// Order state change broadcast on the order topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Change kind.
    pub kind: OrderEventKind,
    /// Record after the change.
    pub order: OrderRecord,
}
