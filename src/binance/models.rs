// =============================================================================
// Binance USDⓈ-M wire models
// =============================================================================
//
// Binance sends almost every number as a JSON string.  Those fields are kept
// as raw `serde_json::Value`s here and converted with `lenient_f64`, which
// treats anything unparsable as zero and warns instead of failing the whole
// response.
// =============================================================================

use serde::Deserialize;
use tracing::warn;

use crate::types::{OrderType, Position, PositionSide, RestingOrder, Side};

/// Parse a JSON string or number into `f64`; zero (with a warning) otherwise.
pub fn lenient_f64(field: &str, val: &serde_json::Value) -> f64 {
    let parsed = match val {
        serde_json::Value::String(s) if s.trim().is_empty() => Some(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Null => Some(0.0),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => v,
        _ => {
            warn!(field, value = %val, "unparsable numeric field from venue — using 0");
            0.0
        }
    }
}

fn default_position_side() -> PositionSide {
    PositionSide::Both
}

// ---------------------------------------------------------------------------
// GET /fapi/v2/positionRisk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRiskEntry {
    pub symbol: String,
    #[serde(default)]
    pub position_amt: serde_json::Value,
    #[serde(default)]
    pub entry_price: serde_json::Value,
    #[serde(default, rename = "unRealizedProfit")]
    pub unrealized_profit: serde_json::Value,
}

impl PositionRiskEntry {
    pub fn into_position(self) -> Position {
        Position {
            signed_quantity: lenient_f64("positionAmt", &self.position_amt),
            entry_price: lenient_f64("entryPrice", &self.entry_price),
            unrealized_pnl: lenient_f64("unRealizedProfit", &self.unrealized_profit),
            symbol: self.symbol,
        }
    }
}

// ---------------------------------------------------------------------------
// GET /fapi/v1/openOrders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderEntry {
    pub order_id: i64,
    pub symbol: String,
    pub side: Side,
    #[serde(default = "default_position_side")]
    pub position_side: PositionSide,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub orig_qty: serde_json::Value,
    #[serde(default)]
    pub price: serde_json::Value,
    #[serde(default)]
    pub stop_price: serde_json::Value,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    #[serde(default)]
    pub client_order_id: String,
}

impl OpenOrderEntry {
    pub fn into_resting(self) -> RestingOrder {
        RestingOrder {
            order_id: self.order_id,
            order_type: OrderType::from_venue(&self.order_type),
            orig_quantity: lenient_f64("origQty", &self.orig_qty),
            price: lenient_f64("price", &self.price),
            stop_price: lenient_f64("stopPrice", &self.stop_price),
            symbol: self.symbol,
            side: self.side,
            position_side: self.position_side,
            reduce_only: self.reduce_only,
            close_position: self.close_position,
            client_order_id: self.client_order_id,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /fapi/v1/order and error bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderResponse {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub status: String,
}

/// `{"code": -2011, "msg": "Unknown order sent."}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}
