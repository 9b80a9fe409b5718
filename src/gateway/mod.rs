// =============================================================================
// Exchange Gateway — the only seam through which the guard touches the venue
// =============================================================================
//
// The reconciler, the exit monitor and the position cache are written against
// `ExchangeGateway` so they can run against the live Binance client, the
// dry-run wrapper used in Demo mode, or the in-memory paper venue in tests.
// =============================================================================

pub mod dry_run;
#[cfg(test)]
pub mod paper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{OrderType, Position, PositionSide, RestingOrder, Side, TimeInForce};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Binance error code for "Unknown order sent." (already filled or cancelled).
pub const UNKNOWN_ORDER_CODE: i64 = -2011;

/// Failures reported by a gateway call.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("venue rejected request (HTTP {status}, code {code}): {msg}")]
    Venue { status: u16, code: i64, msg: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("failed to decode venue response: {0}")]
    Decode(String),

    #[error("request refused locally: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// The order no longer exists on the venue.
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::Venue { code, .. } if *code == UNKNOWN_ORDER_CODE)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Order placement
// ---------------------------------------------------------------------------

/// Everything needed to place one order.  Prices and quantities are already
/// rounded; the gateway formats them with the configured precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// Market order closing `quantity` on the given side.
    pub fn market(
        symbol: &str,
        side: Side,
        position_side: PositionSide,
        quantity: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            position_side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// Stop-market order triggered at `stop_price`.
    pub fn stop_market(
        symbol: &str,
        side: Side,
        position_side: PositionSide,
        quantity: f64,
        stop_price: f64,
    ) -> Self {
        Self {
            order_type: OrderType::StopMarket,
            stop_price: Some(stop_price),
            ..Self::market(symbol, side, position_side, quantity)
        }
    }

    /// Good-till-cancel limit order at `price`.
    pub fn limit_gtc(
        symbol: &str,
        side: Side,
        position_side: PositionSide,
        quantity: f64,
        price: f64,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::market(symbol, side, position_side, quantity)
        }
    }

    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// Venue acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: i64,
    pub client_order_id: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Operations the guard needs from the venue.  Every call is bounded by the
/// implementation's request timeout.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Open orders resting for `symbol`.
    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<RestingOrder>>;

    /// Cancel one order by venue id.
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> GatewayResult<()>;

    /// Cancel every open order for `symbol`.
    async fn cancel_all_open_orders(&self, symbol: &str) -> GatewayResult<()>;

    /// Place an order.
    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<OrderAck>;

    /// Position risk for every symbol on the account.
    async fn position_risk(&self) -> GatewayResult<Vec<Position>>;
}
