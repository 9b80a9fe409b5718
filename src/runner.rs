// =============================================================================
// Guard Runner — fixed-cadence reconciliation loop
// =============================================================================
//
// Every tick:
//   1. Read the position through the cache (back off on failure).
//   2. Let the drawdown monitor decide on a protective market close.  When it
//      fires, the close is sent and the reconciler is skipped for this tick.
//   3. Otherwise reconcile the resting stop-loss / take-profit orders.
//
// Ticks run strictly one after another.  A shutdown request is honoured
// between ticks, never in the middle of one.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::exit::ProfitDrawdownMonitor;
use crate::gateway::{ExchangeGateway, GatewayResult};
use crate::position_cache::PositionCache;
use crate::protective_state::ProtectiveStore;
use crate::reconcile::{OrderReconciler, ReconcileReport};
use crate::runtime_config::RuntimeConfig;

/// What a single tick did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// The position could not be read; nothing else was attempted.
    PositionUnavailable(String),
    /// The drawdown rule closed the position.
    ProtectiveClose { order_id: i64 },
    /// The drawdown rule fired but the close was rejected.
    CloseFailed(String),
    Reconciled(ReconcileReport),
}

pub struct GuardRunner {
    symbol: String,
    gateway: Arc<dyn ExchangeGateway>,
    cache: PositionCache,
    store: ProtectiveStore,
    monitor: ProfitDrawdownMonitor,
    reconciler: OrderReconciler,
    loop_interval: Duration,
    error_backoff: Duration,
}

impl GuardRunner {
    pub fn new(config: &RuntimeConfig, gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            symbol: config.symbol.clone(),
            gateway,
            cache: PositionCache::new(Duration::from_secs(config.cache_ttl_secs)),
            store: ProtectiveStore::new(),
            monitor: ProfitDrawdownMonitor::from_config(config),
            reconciler: OrderReconciler::from_config(config),
            loop_interval: Duration::from_secs(config.loop_interval_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &ProtectiveStore {
        &self.store
    }

    /// Log every non-zero position on the account.  Returns how many there were.
    pub async fn log_open_positions(&self) -> GatewayResult<usize> {
        let positions = self.gateway.position_risk().await?;
        let open: Vec<_> = positions.into_iter().filter(|p| !p.is_flat()).collect();
        if open.is_empty() {
            info!("no open positions on the account");
        }
        for p in &open {
            info!(
                symbol = %p.symbol,
                direction = %p.direction(),
                quantity = p.abs_quantity(),
                entry = p.entry_price,
                pnl = p.unrealized_pnl,
                "open position"
            );
        }
        Ok(open.len())
    }

    // -------------------------------------------------------------------------
    // One tick
    // -------------------------------------------------------------------------

    pub async fn tick(&self) -> TickOutcome {
        let symbol = self.symbol.as_str();

        let position = match self.cache.get_position(self.gateway.as_ref(), symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol, error = %e, "failed to fetch position");
                return TickOutcome::PositionUnavailable(e.to_string());
            }
        };

        if let Some(action) = self.monitor.evaluate(&self.store, &position) {
            return match self
                .monitor
                .execute(self.gateway.as_ref(), &self.store, &action)
                .await
            {
                Ok(ack) => {
                    self.cache.invalidate(symbol);
                    TickOutcome::ProtectiveClose {
                        order_id: ack.order_id,
                    }
                }
                Err(e) => TickOutcome::CloseFailed(e.to_string()),
            };
        }

        debug!(
            symbol,
            direction = %position.direction(),
            quantity = position.abs_quantity(),
            entry = position.entry_price,
            pnl = position.unrealized_pnl,
            peak = ?self.store.peak(symbol),
            "tick"
        );

        let report = self
            .reconciler
            .reconcile(self.gateway.as_ref(), &self.store, &position)
            .await;

        if let Some(fatal) = &report.fatal {
            warn!(symbol, error = %fatal, "reconciliation pass aborted");
        } else if !report.is_noop() {
            info!(
                symbol,
                cancelled = report.cancelled.len(),
                created = report.created.len(),
                errors = report.errors.len(),
                "reconciliation pass applied changes"
            );
        }
        TickOutcome::Reconciled(report)
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Tick until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            symbol = %self.symbol,
            interval_secs = self.loop_interval.as_secs(),
            "position guard started"
        );

        let mut ticker = interval(self.loop_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                TickOutcome::PositionUnavailable(reason) => {
                    debug!(%reason, backoff_secs = self.error_backoff.as_secs(), "backing off");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
                TickOutcome::ProtectiveClose { order_id } => {
                    debug!(order_id, "position closed by drawdown rule; reconcile resumes next tick");
                }
                TickOutcome::CloseFailed(reason) => {
                    debug!(%reason, "drawdown close will be retried");
                }
                TickOutcome::Reconciled(report) => {
                    for err in &report.errors {
                        debug!(
                            action = %err.action,
                            order_id = ?err.order_id,
                            message = %err.message,
                            "reconcile action failed; retried next tick"
                        );
                    }
                }
            }
        }

        info!(symbol = %self.symbol, "position guard stopped");
    }
}
