// =============================================================================
// Paper venue — in-memory gateway for tests
// =============================================================================
//
// Keeps positions and resting orders in memory, records every call, and can
// be told to fail specific operations.  Market orders are filled immediately
// against the stored position; limit and stop orders rest until cancelled.
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ExchangeGateway, GatewayError, GatewayResult, OrderAck, OrderRequest, UNKNOWN_ORDER_CODE};
use crate::types::{OrderType, Position, PositionSide, RestingOrder, Side};

#[derive(Default)]
struct Book {
    positions: HashMap<String, Position>,
    orders: Vec<RestingOrder>,
    next_id: i64,
    created: Vec<OrderRequest>,
    cancelled: Vec<i64>,
    cancel_all_calls: u32,
    position_risk_calls: u32,
    list_calls: u32,
    fail_position_risk: bool,
    fail_list_from_call: Option<u32>,
    fail_create_types: HashSet<&'static str>,
    fail_cancel_ids: HashSet<i64>,
}

pub struct PaperVenue {
    book: Mutex<Book>,
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperVenue {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book {
                next_id: 1000,
                ..Book::default()
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Scenario setup
    // -------------------------------------------------------------------------

    pub fn set_position(&self, symbol: &str, signed_quantity: f64, entry_price: f64, pnl: f64) {
        self.book.lock().positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                signed_quantity,
                entry_price,
                unrealized_pnl: pnl,
            },
        );
    }

    pub fn clear_position(&self, symbol: &str) {
        self.book.lock().positions.remove(symbol);
    }

    fn seed(&self, mut order: RestingOrder) -> i64 {
        let mut book = self.book.lock();
        book.next_id += 1;
        order.order_id = book.next_id;
        book.orders.push(order);
        book.next_id
    }

    pub fn seed_stop_market(
        &self,
        symbol: &str,
        side: Side,
        position_side: PositionSide,
        quantity: f64,
        stop_price: f64,
    ) -> i64 {
        self.seed(RestingOrder {
            order_id: 0,
            symbol: symbol.to_string(),
            side,
            position_side,
            order_type: OrderType::StopMarket,
            orig_quantity: quantity,
            price: 0.0,
            stop_price,
            reduce_only: false,
            close_position: false,
            client_order_id: String::new(),
        })
    }

    pub fn seed_limit(
        &self,
        symbol: &str,
        side: Side,
        position_side: PositionSide,
        quantity: f64,
        price: f64,
        reduce_only: bool,
    ) -> i64 {
        self.seed(RestingOrder {
            order_id: 0,
            symbol: symbol.to_string(),
            side,
            position_side,
            order_type: OrderType::Limit,
            orig_quantity: quantity,
            price,
            stop_price: 0.0,
            reduce_only,
            close_position: false,
            client_order_id: String::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    pub fn fail_position_risk(&self, fail: bool) {
        self.book.lock().fail_position_risk = fail;
    }

    /// Every `list_open_orders` call numbered `n` or later (1-based) fails.
    pub fn fail_list_from_call(&self, n: u32) {
        self.book.lock().fail_list_from_call = Some(n);
    }

    pub fn fail_create(&self, order_type: OrderType) {
        self.book.lock().fail_create_types.insert(order_type.as_str());
    }

    pub fn heal_create(&self, order_type: OrderType) {
        self.book.lock().fail_create_types.remove(order_type.as_str());
    }

    pub fn fail_cancel(&self, order_id: i64) {
        self.book.lock().fail_cancel_ids.insert(order_id);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn open_orders(&self, symbol: &str) -> Vec<RestingOrder> {
        self.book
            .lock()
            .orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn created(&self) -> Vec<OrderRequest> {
        self.book.lock().created.clone()
    }

    pub fn cancelled(&self) -> Vec<i64> {
        self.book.lock().cancelled.clone()
    }

    pub fn cancel_all_calls(&self) -> u32 {
        self.book.lock().cancel_all_calls
    }

    pub fn position_risk_calls(&self) -> u32 {
        self.book.lock().position_risk_calls
    }

    pub fn reset_log(&self) {
        let mut book = self.book.lock();
        book.created.clear();
        book.cancelled.clear();
        book.cancel_all_calls = 0;
    }
}

#[async_trait]
impl ExchangeGateway for PaperVenue {
    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<RestingOrder>> {
        let mut book = self.book.lock();
        book.list_calls += 1;
        if matches!(book.fail_list_from_call, Some(n) if book.list_calls >= n) {
            return Err(GatewayError::Transport("paper: list failed".into()));
        }
        Ok(book
            .orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> GatewayResult<()> {
        let mut book = self.book.lock();
        if book.fail_cancel_ids.contains(&order_id) {
            return Err(GatewayError::Transport("paper: cancel failed".into()));
        }
        let before = book.orders.len();
        book.orders
            .retain(|o| !(o.symbol == symbol && o.order_id == order_id));
        if book.orders.len() == before {
            return Err(GatewayError::Venue {
                status: 400,
                code: UNKNOWN_ORDER_CODE,
                msg: "Unknown order sent.".into(),
            });
        }
        book.cancelled.push(order_id);
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> GatewayResult<()> {
        let mut book = self.book.lock();
        book.cancel_all_calls += 1;
        let ids: Vec<i64> = book
            .orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.order_id)
            .collect();
        book.orders.retain(|o| o.symbol != symbol);
        book.cancelled.extend(ids);
        Ok(())
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<OrderAck> {
        let mut book = self.book.lock();
        if book.fail_create_types.contains(request.order_type.as_str()) {
            return Err(GatewayError::Venue {
                status: 400,
                code: -2021,
                msg: "paper: order would immediately trigger".into(),
            });
        }
        book.created.push(request.clone());
        book.next_id += 1;
        let order_id = book.next_id;

        if request.order_type == OrderType::Market {
            let delta = match request.side {
                Side::Buy => request.quantity,
                Side::Sell => -request.quantity,
            };
            let now_flat = match book.positions.get_mut(&request.symbol) {
                Some(pos) => {
                    pos.signed_quantity += delta;
                    pos.signed_quantity.abs() < 1e-9
                }
                None => false,
            };
            if now_flat {
                book.positions.remove(&request.symbol);
            }
            return Ok(OrderAck {
                order_id,
                client_order_id: request.client_order_id.clone().unwrap_or_default(),
                status: "FILLED".into(),
            });
        }

        book.orders.push(RestingOrder {
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
            client_order_id: request.client_order_id.clone().unwrap_or_default(),
        });
        Ok(OrderAck {
            order_id,
            client_order_id: request.client_order_id.clone().unwrap_or_default(),
            status: "NEW".into(),
        })
    }

    async fn position_risk(&self) -> GatewayResult<Vec<Position>> {
        let mut book = self.book.lock();
        book.position_risk_calls += 1;
        if book.fail_position_risk {
            return Err(GatewayError::Transport("paper: position risk failed".into()));
        }
        Ok(book.positions.values().cloned().collect())
    }
}
