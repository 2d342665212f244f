use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }

    /// Parses the exchange spelling (`Buy` / `Sell`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Buy" => Some(Self::Buy),
            "Sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Other(String),
}

impl OrderType {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "Market" => Self::Market,
            "Limit" => Self::Limit,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Untriggered,
    Triggered,
    Other(String),
}

impl OrderStatus {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "New" => Self::New,
            "PartiallyFilled" => Self::PartiallyFilled,
            "Filled" => Self::Filled,
            "Cancelled" => Self::Cancelled,
            "Rejected" => Self::Rejected,
            "Untriggered" => Self::Untriggered,
            "Triggered" => Self::Triggered,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An order-state notification from the fill feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub symbol: String,
    pub side: Option<Side>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub quantity: Decimal,
    /// `None` when the exchange reports an empty or unparseable average price.
    pub avg_price: Option<Decimal>,
}

impl OrderUpdate {
    /// True for a completely filled market order.
    #[must_use]
    pub fn is_filled_market(&self) -> bool {
        self.order_type == OrderType::Market && self.status == OrderStatus::Filled
    }
}

/// Events delivered by a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Handshake completed; the connection is active.
    Connected,
    /// The connection dropped or a dial attempt failed.
    Disconnected { reason: String },
    /// One element of an order-topic notification.
    OrderUpdate(OrderUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    /// Reduce-only limit order, used for take-profit exits.
    ReduceOnlyLimit { price: Decimal },
    /// Reduce-only trigger order, used for stop-loss exits.
    ReduceOnlyStop { trigger_price: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderKind,
}

impl OrderRequest {
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Market,
        }
    }

    #[must_use]
    pub fn take_profit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::ReduceOnlyLimit { price },
        }
    }

    #[must_use]
    pub fn stop_loss(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::ReduceOnlyStop { trigger_price },
        }
    }

    #[must_use]
    pub const fn is_reduce_only(&self) -> bool {
        !matches!(self.kind, OrderKind::Market)
    }
}
