use core::fmt;
use serde::{Deserialize, Serialize};

/// Venue capability labels used in errors, logs and feature checks.
///
/// Each label corresponds to one method group of the venue connector
/// contract; `Unsupported` errors carry the label of the missing capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Capability {
    /// REST ticker fetch.
    FetchTicker,
    /// Forced ticker refresh pushed into the registry.
    UpdateTicker,
    /// REST orderbook fetch.
    FetchOrderbook,
    /// Forced orderbook snapshot pushed into the registry.
    UpdateOrderbook,
    /// Account holdings.
    AccountInfo,
    /// Order submission.
    SubmitOrder,
    /// Single order cancellation.
    CancelOrder,
    /// Bulk cancellation.
    CancelAll,
    /// Single order lookup.
    GetOrder,
    /// Open order listing.
    ActiveOrders,
    /// Historical order listing.
    OrderHistory,
    /// Deposit address lookup.
    DepositAddress,
    /// Websocket streaming.
    Websocket,
}

impl Capability {
    /// Stable, kebab-case identifier for logs/errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FetchTicker => "fetch-ticker",
            Self::UpdateTicker => "update-ticker",
            Self::FetchOrderbook => "fetch-orderbook",
            Self::UpdateOrderbook => "update-orderbook",
            Self::AccountInfo => "account-info",
            Self::SubmitOrder => "submit-order",
            Self::CancelOrder => "cancel-order",
            Self::CancelAll => "cancel-all",
            Self::GetOrder => "get-order",
            Self::ActiveOrders => "active-orders",
            Self::OrderHistory => "order-history",
            Self::DepositAddress => "deposit-address",
            Self::Websocket => "websocket",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
