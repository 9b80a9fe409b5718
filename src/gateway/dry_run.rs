// =============================================================================
// Dry-run gateway — Demo account mode
// =============================================================================
//
// Reads (open orders, position risk) go to the real venue so the guard sees
// the true account.  Writes (cancel, create) never leave the process: they are
// logged and acknowledged locally with a synthetic order id.
//
// Simulated resting orders are kept in memory and merged into every listing,
// and cancelled venue orders are hidden from it, so the guard sees the book it
// would have produced live and settles into no-op passes.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{ExchangeGateway, GatewayResult, OrderAck, OrderRequest};
use crate::types::{OrderType, Position, RestingOrder};

#[derive(Debug, Default)]
struct SimulatedBook {
    resting: Vec<RestingOrder>,
    /// Venue order ids cancelled in demo mode; still live on the venue.
    withdrawn: HashSet<i64>,
}

/// Wraps a real gateway and swallows every state-changing call.
pub struct DryRunGateway {
    inner: Arc<dyn ExchangeGateway>,
    next_sim_id: AtomicI64,
    book: Mutex<SimulatedBook>,
}

impl DryRunGateway {
    pub fn new(inner: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            inner,
            // Negative ids can never collide with venue-assigned ones.
            next_sim_id: AtomicI64::new(-1),
            book: Mutex::new(SimulatedBook::default()),
        }
    }
}

#[async_trait]
impl ExchangeGateway for DryRunGateway {
    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<RestingOrder>> {
        let mut orders = self.inner.list_open_orders(symbol).await?;
        let book = self.book.lock();
        orders.retain(|o| !book.withdrawn.contains(&o.order_id));
        orders.extend(book.resting.iter().filter(|o| o.symbol == symbol).cloned());
        Ok(orders)
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> GatewayResult<()> {
        let mut book = self.book.lock();
        if order_id < 0 {
            book.resting.retain(|o| o.order_id != order_id);
        } else {
            book.withdrawn.insert(order_id);
        }
        info!(symbol, order_id, "[demo] cancel order suppressed");
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> GatewayResult<()> {
        let live = self.inner.list_open_orders(symbol).await?;
        let mut book = self.book.lock();
        book.withdrawn.extend(live.iter().map(|o| o.order_id));
        book.resting.retain(|o| o.symbol != symbol);
        info!(symbol, "[demo] cancel-all suppressed");
        Ok(())
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<OrderAck> {
        let order_id = self.next_sim_id.fetch_sub(1, Ordering::Relaxed);
        let client_order_id = request
            .client_order_id
            .clone()
            .unwrap_or_else(|| format!("demo-{}", Uuid::new_v4().simple()));

        info!(
            symbol = %request.symbol,
            side = %request.side,
            position_side = %request.position_side,
            order_type = %request.order_type,
            quantity = request.quantity,
            price = ?request.price,
            stop_price = ?request.stop_price,
            order_id,
            "[demo] order simulated"
        );

        if request.order_type != OrderType::Market {
            self.book.lock().resting.push(RestingOrder {
                order_id,
                symbol: request.symbol.clone(),
                side: request.side,
                position_side: request.position_side,
                order_type: request.order_type,
                orig_quantity: request.quantity,
                price: request.price.unwrap_or(0.0),
                stop_price: request.stop_price.unwrap_or(0.0),
                reduce_only: request.reduce_only,
                close_position: false,
                client_order_id: client_order_id.clone(),
            });
        }

        Ok(OrderAck {
            order_id,
            client_order_id,
            status: "SIMULATED".to_string(),
        })
    }

    async fn position_risk(&self) -> GatewayResult<Vec<Position>> {
        self.inner.position_risk().await
    }
}
