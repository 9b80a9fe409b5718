// =============================================================================
// Position Cache — short-lived memo of position-risk snapshots
// =============================================================================
//
// Position risk is the heaviest call the guard makes, and the loop ticks every
// second.  Snapshots are reused until they are older than the TTL (5 s by
// default).  A failed fetch leaves the cache as it was and hands the error to
// the caller.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::gateway::{ExchangeGateway, GatewayResult};
use crate::types::Position;

#[derive(Debug, Clone)]
struct CachedPosition {
    position: Position,
    fetched_at: Instant,
}

/// Per-symbol snapshot cache.  Safe to share between tasks.
#[derive(Debug)]
pub struct PositionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedPosition>>,
}

impl PositionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Current position for `symbol`, from cache when fresh.
    pub async fn get_position(
        &self,
        gateway: &dyn ExchangeGateway,
        symbol: &str,
    ) -> GatewayResult<Position> {
        self.get_position_at(gateway, symbol, Instant::now()).await
    }

    /// Same as [`get_position`](Self::get_position) with an explicit clock.
    pub async fn get_position_at(
        &self,
        gateway: &dyn ExchangeGateway,
        symbol: &str,
        now: Instant,
    ) -> GatewayResult<Position> {
        if let Some(hit) = self.fresh(symbol, now) {
            return Ok(hit);
        }

        let all = gateway.position_risk().await?;
        let position = select_position(all, symbol);
        debug!(
            symbol,
            quantity = position.signed_quantity,
            entry = position.entry_price,
            "position snapshot refreshed"
        );

        self.entries.write().insert(
            symbol.to_string(),
            CachedPosition {
                position: position.clone(),
                fetched_at: now,
            },
        );
        Ok(position)
    }

    /// Drop the snapshot for `symbol` so the next read refetches.
    pub fn invalidate(&self, symbol: &str) {
        self.entries.write().remove(symbol);
    }

    fn fresh(&self, symbol: &str, now: Instant) -> Option<Position> {
        let entries = self.entries.read();
        let cached = entries.get(symbol)?;
        (now.saturating_duration_since(cached.fetched_at) < self.ttl)
            .then(|| cached.position.clone())
    }
}

/// Pick `symbol` out of a position-risk listing.  Hedge-mode accounts report a
/// LONG and a SHORT row per symbol; the non-zero one wins.  No row, or only
/// zero rows, means flat.
fn select_position(all: Vec<Position>, symbol: &str) -> Position {
    all.into_iter()
        .filter(|p| p.symbol == symbol)
        .find(|p| !p.is_flat())
        .unwrap_or_else(|| Position::flat(symbol))
}
