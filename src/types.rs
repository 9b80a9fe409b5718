// =============================================================================
// Shared types used across the position guard
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether orders are really sent to the venue or only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Live
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

// =============================================================================
// Position
// =============================================================================

/// Direction of a futures position, derived from its signed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
            Self::Flat => write!(f, "Flat"),
        }
    }
}

/// Venue-reported position risk snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Positive for long, negative for short, zero for flat.
    pub signed_quantity: f64,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
}

impl Position {
    /// A flat position, synthesized when the venue reports nothing for `symbol`.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            signed_quantity: 0.0,
            entry_price: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.signed_quantity > 0.0 {
            Direction::Long
        } else if self.signed_quantity < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        }
    }

    pub fn abs_quantity(&self) -> f64 {
        self.signed_quantity.abs()
    }

    pub fn is_flat(&self) -> bool {
        self.direction() == Direction::Flat
    }

    /// Side and hedge-mode position side of an order that reduces this
    /// position. `None` when flat.
    pub fn closing_side(&self) -> Option<(Side, PositionSide)> {
        match self.direction() {
            Direction::Long => Some((Side::Sell, PositionSide::Long)),
            Direction::Short => Some((Side::Buy, PositionSide::Short)),
            Direction::Flat => None,
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binance position side. `Both` is used by one-way accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "BOTH",
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    /// Any venue order type the guard does not manage (STOP, TAKE_PROFIT, ...).
    Other,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
            Self::StopMarket => "STOP_MARKET",
            Self::Other => "OTHER",
        }
    }

    pub fn from_venue(raw: &str) -> Self {
        match raw {
            "LIMIT" => Self::Limit,
            "MARKET" => Self::Market,
            "STOP_MARKET" => Self::StopMarket,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "GTC",
        }
    }
}

/// An order resting on the venue. The guard only observes and cancels these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub orig_quantity: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stop_price: f64,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    #[serde(default)]
    pub client_order_id: String,
}

impl RestingOrder {
    /// True when the order can only shrink a position: reduce-only, a
    /// close-position stop, or a hedge-mode order on the opposite side of its
    /// position side.
    pub fn is_closing(&self) -> bool {
        self.reduce_only
            || self.close_position
            || matches!(
                (self.position_side, self.side),
                (PositionSide::Long, Side::Sell) | (PositionSide::Short, Side::Buy)
            )
    }

    /// Stop-market orders and closing limit orders: everything the guard
    /// considers its own to manage.
    pub fn is_protective(&self) -> bool {
        match self.order_type {
            OrderType::StopMarket => true,
            OrderType::Limit => self.is_closing(),
            _ => false,
        }
    }
}
