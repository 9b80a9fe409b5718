// =============================================================================
// Order Reconciler — drive the resting book toward one stop-loss + one TP
// =============================================================================
//
// For an open position the target book holds exactly one stop-market order and
// one GTC limit order on the closing side, both sized to the full position.
// Each pass lists the resting orders, works out which of them already satisfy
// a leg, cancels what is stale, waits for the venue to settle and places
// whatever is missing.  For a flat position every protective order is removed.
//
// Cancel-then-create is not transactional.  A pass interrupted halfway leaves
// the book partially protected and the next pass repairs it.
// =============================================================================

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::gateway::{ExchangeGateway, GatewayError, OrderRequest};
use crate::protective_state::ProtectiveStore;
use crate::runtime_config::{ProtectionParams, RuntimeConfig, TakeProfitMatch};
use crate::types::{Direction, OrderType, Position, PositionSide, RestingOrder, Side};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectiveLeg {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ProtectiveLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop-loss"),
            Self::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// An order placed during the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub leg: ProtectiveLeg,
    pub order_id: i64,
    pub side: Side,
    pub quantity: f64,
    /// Trigger price for the stop-loss, limit price for the take-profit.
    pub price: f64,
}

/// A single cancel or create that failed without ending the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub action: String,
    pub order_id: Option<i64>,
    pub message: String,
}

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub symbol: String,
    pub direction: Direction,
    pub cancelled: Vec<i64>,
    pub created: Vec<CreatedOrder>,
    pub errors: Vec<ActionError>,
    /// Set when the pass could not see the book (listing failed) and stopped.
    pub fatal: Option<String>,
    /// ISO-8601 timestamp of this pass.
    pub timestamp: String,
}

impl ReconcileReport {
    fn new(symbol: &str, direction: Direction) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            cancelled: Vec::new(),
            created: Vec::new(),
            errors: Vec::new(),
            fatal: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Nothing was cancelled, created or attempted.
    pub fn is_noop(&self) -> bool {
        self.cancelled.is_empty()
            && self.created.is_empty()
            && self.errors.is_empty()
            && self.fatal.is_none()
    }

    fn push_error(&mut self, action: &str, order_id: Option<i64>, err: impl ToString) {
        self.errors.push(ActionError {
            action: action.to_string(),
            order_id,
            message: err.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The resting book split into the two legs and the orders to get rid of.
#[derive(Debug, Default)]
struct Book {
    stop_loss: Option<RestingOrder>,
    take_profit: Option<RestingOrder>,
    /// Protective orders that match no leg, or duplicate one already kept.
    stale: Vec<RestingOrder>,
    /// Every order the guard considers protective for this position.
    protective: Vec<RestingOrder>,
}

/// Round `price` to the nearest multiple of `tick`.
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    (price / tick).round() * tick
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrderReconciler {
    params: ProtectionParams,
    hedge_mode: bool,
}

impl OrderReconciler {
    pub fn new(params: ProtectionParams, hedge_mode: bool) -> Self {
        Self { params, hedge_mode }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.protection.clone(), config.hedge_mode)
    }

    /// Bring the resting book for `position.symbol` in line with `position`.
    pub async fn reconcile(
        &self,
        gateway: &dyn ExchangeGateway,
        store: &ProtectiveStore,
        position: &Position,
    ) -> ReconcileReport {
        match position.closing_side() {
            None => self.reconcile_flat(gateway, store, &position.symbol).await,
            Some((side, hedge_side)) => {
                self.reconcile_open(gateway, store, position, side, hedge_side)
                    .await
            }
        }
    }

    // -------------------------------------------------------------------------
    // Flat
    // -------------------------------------------------------------------------

    async fn reconcile_flat(
        &self,
        gateway: &dyn ExchangeGateway,
        store: &ProtectiveStore,
        symbol: &str,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::new(symbol, Direction::Flat);
        store.clear(symbol);

        let orders = match gateway.list_open_orders(symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(symbol, error = %e, "flat cleanup: failed to list open orders");
                report.fatal = Some(e.to_string());
                return report;
            }
        };

        let protective: Vec<&RestingOrder> = orders.iter().filter(|o| o.is_protective()).collect();
        if protective.is_empty() {
            return report;
        }

        if protective.len() == orders.len() {
            match gateway.cancel_all_open_orders(symbol).await {
                Ok(()) => {
                    info!(symbol, count = orders.len(), "position flat — all protective orders cancelled");
                    report.cancelled.extend(orders.iter().map(|o| o.order_id));
                }
                Err(e) => {
                    warn!(symbol, error = %e, "position flat — cancel-all failed");
                    report.push_error("cancel_all", None, e);
                }
            }
        } else {
            for order in protective {
                self.cancel_one(gateway, order, &mut report).await;
            }
        }
        report
    }

    // -------------------------------------------------------------------------
    // Open position
    // -------------------------------------------------------------------------

    async fn reconcile_open(
        &self,
        gateway: &dyn ExchangeGateway,
        store: &ProtectiveStore,
        position: &Position,
        closing_side: Side,
        hedge_side: PositionSide,
    ) -> ReconcileReport {
        let symbol = position.symbol.as_str();
        let mut report = ReconcileReport::new(symbol, position.direction());

        let orders = match gateway.list_open_orders(symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(symbol, error = %e, "failed to list open orders");
                report.fatal = Some(e.to_string());
                return report;
            }
        };
        let mut book = self.classify(&orders, position, closing_side, hedge_side);

        let changed = self.position_changed(store, position);
        let to_cancel: Vec<RestingOrder> = if self.params.joint_reset {
            let incomplete = book.stop_loss.is_none() || book.take_profit.is_none();
            if changed || !book.stale.is_empty() || incomplete {
                book.protective.clone()
            } else {
                Vec::new()
            }
        } else if changed {
            book.protective.clone()
        } else {
            book.stale.clone()
        };

        if changed {
            info!(
                symbol,
                quantity = position.signed_quantity,
                entry = position.entry_price,
                "position changed — resetting protective orders"
            );
        }

        if !to_cancel.is_empty() {
            for order in &to_cancel {
                self.cancel_one(gateway, order, &mut report).await;
            }

            if self.params.settle_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.params.settle_delay_ms)).await;
            }

            match gateway.list_open_orders(symbol).await {
                Ok(orders) => {
                    book = self.classify(&orders, position, closing_side, hedge_side);
                }
                Err(e) => {
                    error!(symbol, error = %e, "failed to re-list orders after cancelling — pass aborted");
                    report.fatal = Some(e.to_string());
                    return report;
                }
            }
        }

        if book.stop_loss.is_none() {
            self.place_leg(gateway, position, closing_side, hedge_side, ProtectiveLeg::StopLoss, &mut report)
                .await;
        }
        if book.take_profit.is_none() {
            self.place_leg(gateway, position, closing_side, hedge_side, ProtectiveLeg::TakeProfit, &mut report)
                .await;
        }

        // Recorded even when a leg failed to place: the next pass sees no
        // change and tops up only the missing leg.
        store.remember_position(symbol, position.signed_quantity, position.entry_price);

        if report.is_noop() {
            debug!(symbol, "protective orders in place");
        }
        report
    }

    /// Split `orders` into the kept legs, stale protective orders and the full
    /// protective set.
    fn classify(
        &self,
        orders: &[RestingOrder],
        position: &Position,
        closing_side: Side,
        hedge_side: PositionSide,
    ) -> Book {
        let target = position.abs_quantity();
        let tolerance = self.params.quantity_tolerance + f64::EPSILON;
        let mut book = Book::default();

        for order in orders {
            let on_closing_side = order.side == closing_side
                && (order.position_side == PositionSide::Both || order.position_side == hedge_side);

            let relaxed_tp = self.params.take_profit_match == TakeProfitMatch::AnyLimit
                && order.order_type == OrderType::Limit
                && order.side == closing_side;

            if !order.is_protective() && !relaxed_tp {
                continue;
            }
            book.protective.push(order.clone());

            let size_ok = (order.orig_quantity - target).abs() <= tolerance;
            let slot = match order.order_type {
                OrderType::StopMarket if on_closing_side && size_ok => Some(&mut book.stop_loss),
                OrderType::Limit if size_ok && (relaxed_tp || (on_closing_side && order.is_closing())) => {
                    Some(&mut book.take_profit)
                }
                _ => None,
            };

            match slot {
                Some(leg) if leg.is_none() => *leg = Some(order.clone()),
                _ => book.stale.push(order.clone()),
            }
        }
        book
    }

    fn position_changed(&self, store: &ProtectiveStore, position: &Position) -> bool {
        match store.last_known(&position.symbol) {
            None => true,
            Some(mark) => {
                (mark.signed_quantity - position.signed_quantity).abs()
                    > self.params.quantity_tolerance
                    || (mark.entry_price - position.entry_price).abs()
                        > self.params.price_tolerance
            }
        }
    }

    // -------------------------------------------------------------------------
    // Venue actions
    // -------------------------------------------------------------------------

    async fn cancel_one(
        &self,
        gateway: &dyn ExchangeGateway,
        order: &RestingOrder,
        report: &mut ReconcileReport,
    ) {
        match gateway.cancel_order(&order.symbol, order.order_id).await {
            Ok(()) => {
                info!(
                    symbol = %order.symbol,
                    order_id = order.order_id,
                    order_type = %order.order_type,
                    side = %order.side,
                    quantity = order.orig_quantity,
                    "protective order cancelled"
                );
                report.cancelled.push(order.order_id);
            }
            Err(e) if e.is_unknown_order() => {
                debug!(symbol = %order.symbol, order_id = order.order_id, "order already gone");
                report.cancelled.push(order.order_id);
            }
            Err(e) => {
                warn!(symbol = %order.symbol, order_id = order.order_id, error = %e, "cancel failed");
                report.push_error("cancel", Some(order.order_id), e);
            }
        }
    }

    /// Build the order for one missing leg.  `None` when the position carries
    /// no usable entry price.
    pub fn leg_request(
        &self,
        position: &Position,
        closing_side: Side,
        hedge_side: PositionSide,
        leg: ProtectiveLeg,
    ) -> Option<OrderRequest> {
        let entry = position.entry_price;
        if entry <= 0.0 {
            return None;
        }
        // +1 for long (closing side SELL), -1 for short.
        let sign = match closing_side {
            Side::Sell => 1.0,
            Side::Buy => -1.0,
        };
        let p = &self.params;
        let (position_side, reduce_only) = if self.hedge_mode {
            (hedge_side, false)
        } else {
            (PositionSide::Both, true)
        };
        let tag = &Uuid::new_v4().simple().to_string()[..16];
        let qty = position.abs_quantity();

        let request = match leg {
            ProtectiveLeg::StopLoss => {
                let stop = round_to_tick(entry - sign * p.stop_offset, p.tick_size);
                if stop <= 0.0 {
                    return None;
                }
                OrderRequest::stop_market(&position.symbol, closing_side, position_side, qty, stop)
                    .with_client_order_id(format!("guard-sl-{tag}"))
            }
            ProtectiveLeg::TakeProfit => {
                let price = round_to_tick(
                    entry + sign * p.take_profit_multiple * p.stop_offset,
                    p.tick_size,
                );
                if price <= 0.0 {
                    return None;
                }
                OrderRequest::limit_gtc(&position.symbol, closing_side, position_side, qty, price)
                    .with_client_order_id(format!("guard-tp-{tag}"))
            }
        };
        Some(request.reduce_only(reduce_only))
    }

    async fn place_leg(
        &self,
        gateway: &dyn ExchangeGateway,
        position: &Position,
        closing_side: Side,
        hedge_side: PositionSide,
        leg: ProtectiveLeg,
        report: &mut ReconcileReport,
    ) {
        let action = match leg {
            ProtectiveLeg::StopLoss => "create_stop_loss",
            ProtectiveLeg::TakeProfit => "create_take_profit",
        };

        let Some(request) = self.leg_request(position, closing_side, hedge_side, leg) else {
            let err = GatewayError::Rejected(format!(
                "no valid {leg} price for entry {}",
                position.entry_price
            ));
            error!(symbol = %position.symbol, error = %err, "protective order not placed");
            report.push_error(action, None, err);
            return;
        };
        let price = request.stop_price.or(request.price).unwrap_or_default();

        match gateway.create_order(&request).await {
            Ok(ack) => {
                info!(
                    symbol = %request.symbol,
                    order_id = ack.order_id,
                    leg = %leg,
                    side = %request.side,
                    quantity = request.quantity,
                    price,
                    "protective order placed"
                );
                report.created.push(CreatedOrder {
                    leg,
                    order_id: ack.order_id,
                    side: request.side,
                    quantity: request.quantity,
                    price,
                });
            }
            Err(e) => {
                error!(
                    symbol = %request.symbol,
                    leg = %leg,
                    side = %request.side,
                    quantity = request.quantity,
                    price,
                    error = %e,
                    "failed to place protective order"
                );
                report.push_error(action, None, e);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::paper::PaperVenue;
    use crate::types::TimeInForce;

    const SYM: &str = "SOLUSDC";

    fn params() -> ProtectionParams {
        ProtectionParams {
            settle_delay_ms: 0,
            ..ProtectionParams::default()
        }
    }

    fn hedge() -> OrderReconciler {
        OrderReconciler::new(params(), true)
    }

    fn position(qty: f64, entry: f64) -> Position {
        Position {
            symbol: SYM.into(),
            signed_quantity: qty,
            entry_price: entry,
            unrealized_pnl: 0.0,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn leg<'a>(report: &'a ReconcileReport, leg: ProtectiveLeg) -> &'a CreatedOrder {
        report.created.iter().find(|c| c.leg == leg).unwrap()
    }

    /// Exactly one SL and one TP, full size, on the closing side.
    fn assert_covered(venue: &PaperVenue, pos: &Position) {
        let (side, _) = pos.closing_side().unwrap();
        let orders = venue.open_orders(SYM);
        let stops: Vec<_> = orders.iter().filter(|o| o.order_type == OrderType::StopMarket).collect();
        let limits: Vec<_> = orders.iter().filter(|o| o.order_type == OrderType::Limit).collect();
        assert_eq!(stops.len(), 1, "stops: {orders:?}");
        assert_eq!(limits.len(), 1, "limits: {orders:?}");
        for o in stops.iter().chain(limits.iter()) {
            assert_eq!(o.side, side);
            assert!((o.orig_quantity - pos.abs_quantity()).abs() <= 0.0001);
        }
    }

    #[test]
    fn tick_rounding() {
        assert!(approx(round_to_tick(99.004, 0.01), 99.0));
        assert!(approx(round_to_tick(99.006, 0.01), 99.01));
        assert!(approx(round_to_tick(101.3, 0.5), 101.5));
    }

    #[tokio::test]
    async fn long_position_gets_stop_and_target() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let pos = position(1.0, 100.0);

        let report = hedge().reconcile(&venue, &store, &pos).await;

        assert!(report.errors.is_empty());
        assert!(approx(leg(&report, ProtectiveLeg::StopLoss).price, 99.0));
        assert!(approx(leg(&report, ProtectiveLeg::TakeProfit).price, 102.0));

        let created = venue.created();
        let sl = created.iter().find(|r| r.order_type == OrderType::StopMarket).unwrap();
        assert_eq!(sl.side, Side::Sell);
        assert_eq!(sl.position_side, PositionSide::Long);
        assert!(!sl.reduce_only);
        assert!(sl.client_order_id.as_deref().unwrap().starts_with("guard-sl-"));

        let tp = created.iter().find(|r| r.order_type == OrderType::Limit).unwrap();
        assert_eq!(tp.side, Side::Sell);
        assert_eq!(tp.time_in_force, Some(TimeInForce::Gtc));
        assert!(approx(tp.price.unwrap(), 102.0));

        assert_covered(&venue, &pos);
    }

    #[tokio::test]
    async fn short_position_gets_stop_and_target() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let pos = position(-2.5, 50.0);

        let report = hedge().reconcile(&venue, &store, &pos).await;

        let sl = leg(&report, ProtectiveLeg::StopLoss);
        let tp = leg(&report, ProtectiveLeg::TakeProfit);
        assert_eq!(sl.side, Side::Buy);
        assert_eq!(tp.side, Side::Buy);
        assert!(approx(sl.price, 51.0));
        assert!(approx(tp.price, 48.0));
        assert!(approx(sl.quantity, 2.5));
        assert!(venue
            .created()
            .iter()
            .all(|r| r.position_side == PositionSide::Short));
        assert_covered(&venue, &pos);
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let pos = position(1.0, 100.0);
        let rec = hedge();

        rec.reconcile(&venue, &store, &pos).await;
        venue.reset_log();
        let report = rec.reconcile(&venue, &store, &pos).await;

        assert!(report.is_noop(), "{report:?}");
        assert!(venue.created().is_empty());
        assert!(venue.cancelled().is_empty());
    }

    #[tokio::test]
    async fn first_sight_replaces_existing_legs() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let sl = venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 1.0, 98.0);
        let tp = venue.seed_limit(SYM, Side::Sell, PositionSide::Long, 1.0, 105.0, false);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert_eq!(report.cancelled, vec![sl, tp]);
        assert_eq!(report.created.len(), 2);
        assert_covered(&venue, &position(1.0, 100.0));
    }

    #[tokio::test]
    async fn size_change_resets_both_legs() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = hedge();
        rec.reconcile(&venue, &store, &position(1.0, 100.0)).await;

        let bigger = position(1.5, 100.4);
        let report = rec.reconcile(&venue, &store, &bigger).await;

        assert_eq!(report.cancelled.len(), 2);
        assert_eq!(report.created.len(), 2);
        assert!(approx(leg(&report, ProtectiveLeg::StopLoss).price, 99.4));
        assert!(approx(leg(&report, ProtectiveLeg::TakeProfit).price, 102.4));
        assert_covered(&venue, &bigger);
        let mark = store.last_known(SYM).unwrap();
        assert!(approx(mark.signed_quantity, 1.5));
    }

    #[tokio::test]
    async fn drift_inside_tolerance_is_ignored() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = hedge();
        rec.reconcile(&venue, &store, &position(1.0, 100.0)).await;
        venue.reset_log();

        let report = rec.reconcile(&venue, &store, &position(1.00005, 100.005)).await;

        assert!(report.is_noop(), "{report:?}");
        assert!(venue.created().is_empty());
        assert!(venue.cancelled().is_empty());
    }

    #[tokio::test]
    async fn entry_move_resets_both_legs() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = hedge();
        rec.reconcile(&venue, &store, &position(1.0, 100.0)).await;
        rec.reconcile(&venue, &store, &position(1.00005, 100.005)).await;

        // Same size, entry 0.025 away from the last reconciled one.
        let moved = position(1.00005, 100.03);
        let report = rec.reconcile(&venue, &store, &moved).await;

        assert_eq!(report.cancelled.len(), 2);
        assert_eq!(report.created.len(), 2);
        assert!(approx(leg(&report, ProtectiveLeg::StopLoss).price, 99.03));
        assert!(approx(leg(&report, ProtectiveLeg::TakeProfit).price, 102.03));
        assert_covered(&venue, &moved);
    }

    #[tokio::test]
    async fn near_size_orders_are_adopted() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        store.remember_position(SYM, 1.0, 100.0);
        let sl = venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 0.99995, 99.0);
        let tp = venue.seed_limit(SYM, Side::Sell, PositionSide::Long, 1.00008, 102.0, false);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert!(report.is_noop(), "{report:?}");
        let ids: Vec<i64> = venue.open_orders(SYM).iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![sl, tp]);
    }

    #[tokio::test]
    async fn order_outside_size_tolerance_is_replaced() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        store.remember_position(SYM, 1.0, 100.0);
        let sl = venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 1.0003, 99.0);
        venue.seed_limit(SYM, Side::Sell, PositionSide::Long, 1.0, 102.0, false);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert_eq!(report.cancelled, vec![sl]);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].leg, ProtectiveLeg::StopLoss);
        assert_covered(&venue, &position(1.0, 100.0));
    }

    #[tokio::test]
    async fn only_missing_leg_is_topped_up() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = hedge();
        let pos = position(1.0, 100.0);
        rec.reconcile(&venue, &store, &pos).await;

        let tp_id = venue
            .open_orders(SYM)
            .iter()
            .find(|o| o.order_type == OrderType::Limit)
            .map(|o| o.order_id)
            .unwrap();
        venue.cancel_order(SYM, tp_id).await.unwrap();
        venue.reset_log();

        let report = rec.reconcile(&venue, &store, &pos).await;
        assert!(report.cancelled.is_empty());
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].leg, ProtectiveLeg::TakeProfit);
        assert_covered(&venue, &pos);
    }

    #[tokio::test]
    async fn stale_duplicates_are_cancelled() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = hedge();
        let pos = position(1.0, 100.0);
        rec.reconcile(&venue, &store, &pos).await;

        let wrong_size = venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 0.4, 97.0);
        let duplicate = venue.seed_limit(SYM, Side::Sell, PositionSide::Long, 1.0, 103.0, false);
        venue.reset_log();

        let report = rec.reconcile(&venue, &store, &pos).await;
        assert_eq!(report.cancelled, vec![wrong_size, duplicate]);
        assert!(report.created.is_empty());
        assert_covered(&venue, &pos);
    }

    #[tokio::test]
    async fn joint_reset_rebuilds_both_legs() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = OrderReconciler::new(
            ProtectionParams {
                joint_reset: true,
                ..params()
            },
            true,
        );
        let pos = position(1.0, 100.0);
        rec.reconcile(&venue, &store, &pos).await;

        let tp_id = venue
            .open_orders(SYM)
            .iter()
            .find(|o| o.order_type == OrderType::Limit)
            .map(|o| o.order_id)
            .unwrap();
        venue.cancel_order(SYM, tp_id).await.unwrap();
        venue.reset_log();

        let report = rec.reconcile(&venue, &store, &pos).await;
        assert_eq!(report.cancelled.len(), 1, "surviving stop-loss cancelled");
        assert_eq!(report.created.len(), 2);
        assert_covered(&venue, &pos);

        venue.reset_log();
        assert!(rec.reconcile(&venue, &store, &pos).await.is_noop());
    }

    #[tokio::test]
    async fn opening_orders_are_left_alone() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let entry_order = venue.seed_limit(SYM, Side::Buy, PositionSide::Long, 3.0, 95.0, false);

        let pos = position(1.0, 100.0);
        let report = hedge().reconcile(&venue, &store, &pos).await;

        assert!(!report.cancelled.contains(&entry_order));
        assert!(venue.open_orders(SYM).iter().any(|o| o.order_id == entry_order));
    }

    #[tokio::test]
    async fn relist_failure_aborts_the_pass() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 1.0, 98.0);
        venue.fail_list_from_call(2);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert!(report.fatal.is_some());
        assert_eq!(report.cancelled.len(), 1);
        assert!(report.created.is_empty());
        assert!(venue.created().is_empty());
        assert!(store.last_known(SYM).is_none());
    }

    #[tokio::test]
    async fn listing_failure_is_fatal_before_any_action() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        venue.fail_list_from_call(1);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;
        assert!(report.fatal.is_some());
        assert!(venue.created().is_empty());
    }

    #[tokio::test]
    async fn failed_leg_does_not_block_the_other() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        venue.fail_create(OrderType::StopMarket);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].action, "create_stop_loss");
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].leg, ProtectiveLeg::TakeProfit);
        // Not fatal: the position is remembered and the stop is retried next pass.
        assert!(store.last_known(SYM).is_some());

        venue.heal_create(OrderType::StopMarket);
        let retry = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert!(retry.cancelled.is_empty(), "the resting target survives");
        assert_eq!(retry.created.len(), 1);
        assert_eq!(retry.created[0].leg, ProtectiveLeg::StopLoss);
        assert_covered(&venue, &position(1.0, 100.0));
    }

    #[tokio::test]
    async fn cancel_failure_is_recorded_not_fatal() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let stuck = venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 0.3, 98.0);
        venue.fail_cancel(stuck);

        let report = hedge().reconcile(&venue, &store, &position(1.0, 100.0)).await;

        assert!(report.fatal.is_none());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].order_id, Some(stuck));
        assert_eq!(report.created.len(), 2);
    }

    #[tokio::test]
    async fn one_way_mode_uses_both_and_reduce_only() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = OrderReconciler::new(params(), false);
        let pos = position(-1.0, 80.0);

        rec.reconcile(&venue, &store, &pos).await;
        let created = venue.created();
        assert_eq!(created.len(), 2);
        assert!(created
            .iter()
            .all(|r| r.position_side == PositionSide::Both && r.reduce_only && r.side == Side::Buy));

        venue.reset_log();
        assert!(rec.reconcile(&venue, &store, &pos).await.is_noop());
    }

    #[tokio::test]
    async fn relaxed_mode_accepts_plain_limit_as_target() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = OrderReconciler::new(
            ProtectionParams {
                take_profit_match: TakeProfitMatch::AnyLimit,
                ..params()
            },
            false,
        );
        let pos = position(1.0, 100.0);
        store.remember_position(SYM, 1.0, 100.0);
        venue.seed_stop_market(SYM, Side::Sell, PositionSide::Both, 1.0, 99.0);
        venue.seed_limit(SYM, Side::Sell, PositionSide::Both, 1.0, 102.0, false);

        assert!(rec.reconcile(&venue, &store, &pos).await.is_noop());

        // The strict default does not count a non-reduce-only one-way limit.
        let strict = OrderReconciler::new(params(), false);
        let report = strict.reconcile(&venue, &store, &pos).await;
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].leg, ProtectiveLeg::TakeProfit);
    }

    #[tokio::test]
    async fn missing_entry_price_is_reported() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let report = hedge().reconcile(&venue, &store, &position(1.0, 0.0)).await;
        assert_eq!(report.errors.len(), 2);
        assert!(venue.created().is_empty());
    }

    #[tokio::test]
    async fn flat_cancels_everything_with_one_call() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let rec = hedge();
        rec.reconcile(&venue, &store, &position(1.0, 100.0)).await;
        store.observe_profit(SYM, 50.0);

        let report = rec.reconcile(&venue, &store, &Position::flat(SYM)).await;

        assert_eq!(venue.cancel_all_calls(), 1);
        assert_eq!(report.cancelled.len(), 2);
        assert!(venue.open_orders(SYM).is_empty());
        assert!(store.get(SYM).is_none());
    }

    #[tokio::test]
    async fn flat_keeps_non_protective_orders() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let stop = venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 1.0, 99.0);
        let entry = venue.seed_limit(SYM, Side::Buy, PositionSide::Long, 1.0, 95.0, false);

        let report = hedge().reconcile(&venue, &store, &Position::flat(SYM)).await;

        assert_eq!(venue.cancel_all_calls(), 0);
        assert_eq!(report.cancelled, vec![stop]);
        let left = venue.open_orders(SYM);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].order_id, entry);
    }

    #[tokio::test]
    async fn flat_with_empty_book_does_nothing() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        let report = hedge().reconcile(&venue, &store, &Position::flat(SYM)).await;
        assert!(report.is_noop());
        assert_eq!(venue.cancel_all_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_is_observed() {
        let venue = PaperVenue::new();
        let store = ProtectiveStore::new();
        venue.seed_stop_market(SYM, Side::Sell, PositionSide::Long, 1.0, 98.0);
        let rec = OrderReconciler::new(ProtectionParams::default(), true);

        let started = tokio::time::Instant::now();
        rec.reconcile(&venue, &store, &position(1.0, 100.0)).await;
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }
}
