// =============================================================================
// Runtime Configuration — guard settings and API credentials
// =============================================================================
//
// Every instrument- and risk-policy-specific constant lives here so that the
// guard can be pointed at a different contract without a rebuild.
//
// All fields carry `#[serde(default)]` so that a partial (or empty) JSON file
// still loads.  Credentials are kept in a separate `Credentials` value that is
// never serialised back out.
//
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::AccountMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbol() -> String {
    "SOLUSDC".to_string()
}

fn default_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_loop_interval_secs() -> u64 {
    1
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_cache_ttl_secs() -> u64 {
    5
}

fn default_stop_offset() -> f64 {
    1.0
}

fn default_take_profit_multiple() -> f64 {
    2.0
}

fn default_tick_size() -> f64 {
    0.01
}

fn default_quantity_precision() -> usize {
    4
}

fn default_price_precision() -> usize {
    2
}

fn default_quantity_tolerance() -> f64 {
    0.0001
}

fn default_price_tolerance() -> f64 {
    0.01
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_profit_threshold() -> f64 {
    200.0
}

fn default_drawdown_ratio() -> f64 {
    0.5
}

// =============================================================================
// TakeProfitMatch
// =============================================================================

/// Which resting limit orders may be adopted as the take-profit leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakeProfitMatch {
    /// Only limit orders that can only close the position (reduce-only, or a
    /// hedge-mode close on the position's own side).
    ClosingOnly,
    /// Any limit order on the closing side. May adopt a manually placed
    /// entry order of the same size.
    AnyLimit,
}

impl Default for TakeProfitMatch {
    fn default() -> Self {
        Self::ClosingOnly
    }
}

// =============================================================================
// ProtectionParams
// =============================================================================

/// Stop-loss / take-profit placement and drawdown-exit parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionParams {
    /// Price distance from entry to the stop-loss trigger.
    #[serde(default = "default_stop_offset")]
    pub stop_offset: f64,

    /// Take-profit distance as a multiple of `stop_offset`.
    #[serde(default = "default_take_profit_multiple")]
    pub take_profit_multiple: f64,

    /// Instrument tick size; every price sent is a multiple of it.
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,

    /// Decimals used when transmitting quantities (lot size).
    #[serde(default = "default_quantity_precision")]
    pub quantity_precision: usize,

    /// Decimals used when transmitting prices.
    #[serde(default = "default_price_precision")]
    pub price_precision: usize,

    /// Two quantities closer than this are the same size.
    #[serde(default = "default_quantity_tolerance")]
    pub quantity_tolerance: f64,

    /// Two entry prices closer than this are the same price.
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: f64,

    /// Wait after cancelling before re-listing orders.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Legacy policy: a missing leg cancels and re-creates both legs.
    #[serde(default)]
    pub joint_reset: bool,

    #[serde(default)]
    pub take_profit_match: TakeProfitMatch,

    /// Peak unrealized profit (quote currency) that arms the drawdown exit.
    #[serde(default = "default_profit_threshold")]
    pub profit_threshold: f64,

    /// Close at market once profit falls to this fraction of the peak.
    #[serde(default = "default_drawdown_ratio")]
    pub drawdown_ratio: f64,
}

impl Default for ProtectionParams {
    fn default() -> Self {
        Self {
            stop_offset: default_stop_offset(),
            take_profit_multiple: default_take_profit_multiple(),
            tick_size: default_tick_size(),
            quantity_precision: default_quantity_precision(),
            price_precision: default_price_precision(),
            quantity_tolerance: default_quantity_tolerance(),
            price_tolerance: default_price_tolerance(),
            settle_delay_ms: default_settle_delay_ms(),
            joint_reset: false,
            take_profit_match: TakeProfitMatch::ClosingOnly,
            profit_threshold: default_profit_threshold(),
            drawdown_ratio: default_drawdown_ratio(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the guard process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// The single contract this instance protects.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Demo logs every write instead of sending it.
    #[serde(default)]
    pub account_mode: AccountMode,

    /// USDⓈ-M futures REST base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,

    /// Upper bound on every REST call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_loop_interval_secs")]
    pub loop_interval_secs: u64,

    /// Extra wait after a failed position fetch.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Hedge-mode accounts tag orders with LONG/SHORT; one-way accounts send
    /// BOTH and mark protective orders reduce-only.
    #[serde(default = "default_true")]
    pub hedge_mode: bool,

    #[serde(default)]
    pub protection: ProtectionParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            account_mode: AccountMode::Live,
            base_url: default_base_url(),
            recv_window_ms: default_recv_window_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            loop_interval_secs: default_loop_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            hedge_mode: true,
            protection: ProtectionParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            account_mode = %config.account_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `GUARD_SYMBOL` / `GUARD_ACCOUNT_MODE` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(sym) = std::env::var("GUARD_SYMBOL") {
            let sym = sym.trim().to_uppercase();
            if !sym.is_empty() {
                self.symbol = sym;
            }
        }
        if let Ok(mode) = std::env::var("GUARD_ACCOUNT_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "demo" => self.account_mode = AccountMode::Demo,
                "live" => self.account_mode = AccountMode::Live,
                other => warn!(value = other, "ignoring unknown GUARD_ACCOUNT_MODE"),
            }
        }
    }

    /// Reject values that would make the guard place nonsensical orders.
    pub fn validate(&self) -> Result<()> {
        let p = &self.protection;
        if self.symbol.is_empty() {
            bail!("symbol must not be empty");
        }
        if p.tick_size <= 0.0 {
            bail!("tick_size must be positive, got {}", p.tick_size);
        }
        if p.stop_offset <= 0.0 {
            bail!("stop_offset must be positive, got {}", p.stop_offset);
        }
        if p.take_profit_multiple <= 0.0 {
            bail!(
                "take_profit_multiple must be positive, got {}",
                p.take_profit_multiple
            );
        }
        if !(p.drawdown_ratio > 0.0 && p.drawdown_ratio < 1.0) {
            bail!("drawdown_ratio must be in (0, 1), got {}", p.drawdown_ratio);
        }
        if p.quantity_tolerance <= 0.0 || p.price_tolerance <= 0.0 {
            bail!("tolerances must be positive");
        }
        if self.loop_interval_secs == 0 {
            bail!("loop_interval_secs must be at least 1");
        }
        Ok(())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// API key pair.  Never logged: `Debug` redacts both halves.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default, alias = "apiKey", alias = "APIKey")]
    pub api_key: String,
    #[serde(default, alias = "secretKey", alias = "SecretKey", alias = "api_secret")]
    pub secret_key: String,
}

impl Credentials {
    /// Read credentials from the environment, falling back to the JSON file at
    /// `path`.  Either half missing is a fatal configuration error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let from_env = Self::from_env();
        if from_env.is_complete() {
            info!("API credentials loaded from environment");
            return Ok(from_env);
        }

        let path = path.as_ref();
        let from_file = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<Self>(&content).with_context(|| {
                format!("failed to parse credentials from {}", path.display())
            })?,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "credentials file not readable");
                Self::default()
            }
        };

        // Environment wins field by field so a file can supply just one half.
        let merged = Self {
            api_key: non_empty_or(from_env.api_key, from_file.api_key),
            secret_key: non_empty_or(from_env.secret_key, from_file.secret_key),
        };
        merged.ensure_complete()?;
        info!(path = %path.display(), "API credentials loaded");
        Ok(merged)
    }

    fn from_env() -> Self {
        let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        let secret_key = std::env::var("BINANCE_SECRET_KEY")
            .or_else(|_| std::env::var("BINANCE_API_SECRET"))
            .unwrap_or_default();
        Self {
            api_key: api_key.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    pub fn ensure_complete(&self) -> Result<()> {
        if self.api_key.is_empty() {
            bail!("API key is empty: set BINANCE_API_KEY or api_key in the credentials file");
        }
        if self.secret_key.is_empty() {
            bail!(
                "API secret is empty: set BINANCE_SECRET_KEY or secret_key in the credentials file"
            );
        }
        Ok(())
    }
}

fn non_empty_or(preferred: String, fallback: String) -> String {
    if preferred.is_empty() {
        fallback.trim().to_string()
    } else {
        preferred
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
