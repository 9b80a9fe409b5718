// =============================================================================
// Protective State — per-symbol bookkeeping shared by monitor and reconciler
// =============================================================================
//
// One entry per symbol with an open position:
//   - the unrealized-profit high-water mark, used by the drawdown exit;
//   - the signed quantity and entry price last reconciled, used to detect a
//     position change.
// Entries are created on first sight of a non-flat position and removed when
// the position goes flat or after a completed protective close.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Signed quantity and entry price the protective orders were last sized for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionMark {
    pub signed_quantity: f64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveState {
    pub max_unrealized_profit: Option<f64>,
    pub last_known: Option<PositionMark>,
}

/// Keyed store, owned by the loop and lent to the monitor and reconciler.
#[derive(Debug, Default)]
pub struct ProtectiveStore {
    states: RwLock<HashMap<String, ProtectiveState>>,
}

impl ProtectiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `pnl` into the high-water mark and return the new peak.  The
    /// first observation seeds the peak with `pnl` itself.
    pub fn observe_profit(&self, symbol: &str, pnl: f64) -> f64 {
        let mut states = self.states.write();
        let state = states.entry(symbol.to_string()).or_default();
        let peak = match state.max_unrealized_profit {
            Some(prev) => prev.max(pnl),
            None => pnl,
        };
        state.max_unrealized_profit = Some(peak);
        peak
    }

    pub fn peak(&self, symbol: &str) -> Option<f64> {
        self.states
            .read()
            .get(symbol)
            .and_then(|s| s.max_unrealized_profit)
    }

    pub fn last_known(&self, symbol: &str) -> Option<PositionMark> {
        self.states.read().get(symbol).and_then(|s| s.last_known)
    }

    pub fn remember_position(&self, symbol: &str, signed_quantity: f64, entry_price: f64) {
        self.states
            .write()
            .entry(symbol.to_string())
            .or_default()
            .last_known = Some(PositionMark {
            signed_quantity,
            entry_price,
        });
    }

    pub fn clear(&self, symbol: &str) {
        self.states.write().remove(symbol);
    }

    #[cfg(test)]
    pub fn get(&self, symbol: &str) -> Option<ProtectiveState> {
        self.states.read().get(symbol).cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_never_decreases() {
        let store = ProtectiveStore::new();
        let mut last = f64::MIN;
        for pnl in [10.0, 50.0, 20.0, 300.0, -40.0, 299.0, 301.0] {
            let peak = store.observe_profit("SOLUSDC", pnl);
            assert!(peak >= last);
            last = peak;
        }
        assert_eq!(store.peak("SOLUSDC"), Some(301.0));
    }

    #[test]
    fn first_sight_seeds_with_current_pnl() {
        let store = ProtectiveStore::new();
        assert_eq!(store.observe_profit("SOLUSDC", -12.0), -12.0);
        assert_eq!(store.observe_profit("SOLUSDC", -30.0), -12.0);
    }

    #[test]
    fn clear_resets_everything() {
        let store = ProtectiveStore::new();
        store.observe_profit("SOLUSDC", 250.0);
        store.remember_position("SOLUSDC", 1.0, 100.0);
        store.clear("SOLUSDC");
        assert!(store.get("SOLUSDC").is_none());
        assert_eq!(store.observe_profit("SOLUSDC", 5.0), 5.0);
    }

    #[test]
    fn symbols_are_independent() {
        let store = ProtectiveStore::new();
        store.remember_position("SOLUSDC", 1.0, 100.0);
        store.observe_profit("BTCUSDT", 42.0);
        assert_eq!(store.peak("SOLUSDC"), None);
        assert_eq!(
            store.last_known("SOLUSDC"),
            Some(PositionMark {
                signed_quantity: 1.0,
                entry_price: 100.0
            })
        );
        assert_eq!(store.last_known("BTCUSDT"), None);
    }
}
