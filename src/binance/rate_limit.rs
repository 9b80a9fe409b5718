// =============================================================================
// Rate-Limit Tracker — keeps the guard inside Binance futures request limits
// =============================================================================
//
// USDⓈ-M futures limits per IP / account:
//   - Request weight: 2400 per minute (we stop ourselves at 2200).
//   - Order rate:     300 per 10 seconds and 1200 per minute.
//
// Binance reports current usage in `X-MBX-USED-WEIGHT-1M` and, on order
// endpoints, `X-MBX-ORDER-COUNT-10S` / `X-MBX-ORDER-COUNT-1M`.  The tracker
// mirrors those headers into atomics so the client can refuse a request
// locally instead of collecting a 429 (and eventually a 418 IP ban).
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

const WEIGHT_HARD_LIMIT: u32 = 2200;
const WEIGHT_WARN_THRESHOLD: u32 = 1800;

const ORDER_10S_LIMIT: u32 = 300;
const ORDER_1M_LIMIT: u32 = 1200;

/// Thread-safe rate-limit tracker backed by atomic counters.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    order_count_10s: AtomicU32,
    order_count_1m: AtomicU32,
}

/// Point-in-time copy of the counters, logged on every tick summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub order_count_10s: u32,
    pub order_count_1m: u32,
}

fn header_u32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u32>().ok())
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            order_count_10s: AtomicU32::new(0),
            order_count_1m: AtomicU32::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Header-based updates
    // -------------------------------------------------------------------------

    /// Mirror the usage headers of a Binance response.  Header names are
    /// matched case-insensitively by `HeaderMap`.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(w) = header_u32(headers, "X-MBX-USED-WEIGHT-1M") {
            let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
            if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
                warn!(
                    used_weight = w,
                    hard_limit = WEIGHT_HARD_LIMIT,
                    "rate-limit weight crossed warning threshold"
                );
            }
            debug!(used_weight_1m = w, "rate-limit weight updated from header");
        }

        if let Some(c) = header_u32(headers, "X-MBX-ORDER-COUNT-10S") {
            self.order_count_10s.store(c, Ordering::Relaxed);
        }
        if let Some(c) = header_u32(headers, "X-MBX-ORDER-COUNT-1M") {
            self.order_count_1m.store(c, Ordering::Relaxed);
        }
    }

    // -------------------------------------------------------------------------
    // Pre-flight checks
    // -------------------------------------------------------------------------

    /// `true` if `weight` more request weight stays under the hard cap.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }

    /// `true` if another order fits in both the 10 s and the 1 min window.
    pub fn can_place_order(&self) -> bool {
        let count_10s = self.order_count_10s.load(Ordering::Relaxed);
        let count_1m = self.order_count_1m.load(Ordering::Relaxed);

        if count_10s >= ORDER_10S_LIMIT {
            warn!(count_10s, limit = ORDER_10S_LIMIT, "order blocked — 10 s order limit reached");
            return false;
        }
        if count_1m >= ORDER_1M_LIMIT {
            warn!(count_1m, limit = ORDER_1M_LIMIT, "order blocked — 1 min order limit reached");
            return false;
        }
        true
    }

    /// Count an order locally until the next response headers overwrite it.
    pub fn record_order_sent(&self) {
        self.order_count_10s.fetch_add(1, Ordering::Relaxed);
        self.order_count_1m.fetch_add(1, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            order_count_10s: self.order_count_10s.load(Ordering::Relaxed),
            order_count_1m: self.order_count_1m.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &snap.used_weight_1m)
            .field("order_count_10s", &snap.order_count_10s)
            .field("order_count_1m", &snap.order_count_1m)
            .finish()
    }
}
