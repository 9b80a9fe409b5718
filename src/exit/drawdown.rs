// =============================================================================
// Profit-Drawdown Exit — give back half the peak, close everything
// =============================================================================
//
// Tracks the unrealized-profit high-water mark of the open position.  Once the
// peak has reached `profit_threshold` (200 by default), a fall of unrealized
// profit to `drawdown_ratio` × peak (half by default) or below closes the whole
// position at market.  This runs every tick, regardless of which stop-loss or
// take-profit orders are resting.
//
//   peak 300, pnl 160  → hold   (160 > 150)
//   peak 300, pnl 150  → close
//   peak 180, pnl 10   → hold   (peak never reached the threshold)
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{ExchangeGateway, GatewayResult, OrderAck, OrderRequest};
use crate::protective_state::ProtectiveStore;
use crate::runtime_config::{ProtectionParams, RuntimeConfig};
use crate::types::{Position, PositionSide, Side};

// =============================================================================
// Exit action
// =============================================================================

/// A market close the monitor wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitAction {
    pub symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub reduce_only: bool,
    pub peak_profit: f64,
    pub unrealized_pnl: f64,
}

impl ExitAction {
    pub fn order_request(&self) -> OrderRequest {
        let tag = &Uuid::new_v4().simple().to_string()[..16];
        OrderRequest::market(&self.symbol, self.side, self.position_side, self.quantity)
            .reduce_only(self.reduce_only)
            .with_client_order_id(format!("guard-exit-{tag}"))
    }
}

// =============================================================================
// Monitor
// =============================================================================

#[derive(Debug, Clone)]
pub struct ProfitDrawdownMonitor {
    profit_threshold: f64,
    drawdown_ratio: f64,
    hedge_mode: bool,
}

impl ProfitDrawdownMonitor {
    pub fn new(params: &ProtectionParams, hedge_mode: bool) -> Self {
        Self {
            profit_threshold: params.profit_threshold,
            drawdown_ratio: params.drawdown_ratio,
            hedge_mode,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.protection, config.hedge_mode)
    }

    /// Update the high-water mark with `position` and decide whether to close.
    /// A flat position clears all bookkeeping for the symbol.
    pub fn evaluate(&self, store: &ProtectiveStore, position: &Position) -> Option<ExitAction> {
        let symbol = position.symbol.as_str();
        let Some((side, hedge_side)) = position.closing_side() else {
            store.clear(symbol);
            return None;
        };

        let pnl = position.unrealized_pnl;
        let peak = store.observe_profit(symbol, pnl);

        if peak < self.profit_threshold || pnl > peak * self.drawdown_ratio {
            debug!(symbol, pnl, peak, "drawdown exit: hold");
            return None;
        }

        info!(
            symbol,
            pnl,
            peak,
            threshold = self.profit_threshold,
            ratio = self.drawdown_ratio,
            "profit fell below drawdown floor — closing position"
        );

        let (position_side, reduce_only) = if self.hedge_mode {
            (hedge_side, false)
        } else {
            (PositionSide::Both, true)
        };
        Some(ExitAction {
            symbol: symbol.to_string(),
            side,
            position_side,
            quantity: position.abs_quantity(),
            reduce_only,
            peak_profit: peak,
            unrealized_pnl: pnl,
        })
    }

    /// Forget the symbol once its close has been acknowledged.
    pub fn complete(&self, store: &ProtectiveStore, symbol: &str) {
        store.clear(symbol);
    }

    /// Send the market close for `action`.  The state is cleared only on
    /// success; a failed close keeps the peak so the next tick retries.
    pub async fn execute(
        &self,
        gateway: &dyn ExchangeGateway,
        store: &ProtectiveStore,
        action: &ExitAction,
    ) -> GatewayResult<OrderAck> {
        let request = action.order_request();
        match gateway.create_order(&request).await {
            Ok(ack) => {
                info!(
                    symbol = %action.symbol,
                    order_id = ack.order_id,
                    side = %action.side,
                    quantity = action.quantity,
                    peak = action.peak_profit,
                    pnl = action.unrealized_pnl,
                    "protective market close sent"
                );
                self.complete(store, &action.symbol);
                Ok(ack)
            }
            Err(e) => {
                warn!(
                    symbol = %action.symbol,
                    quantity = action.quantity,
                    error = %e,
                    "protective market close failed — will retry next tick"
                );
                Err(e)
            }
        }
    }
}
