// =============================================================================
// Position Guard — Main Entry Point
// =============================================================================
//
// Keeps one stop-loss and one take-profit order resting against the open
// futures position on a single symbol, and closes the position at market when
// unrealized profit gives back half of its peak.
//
// Startup fails fast on bad configuration or missing API credentials.  After
// that, nothing short of Ctrl-C stops the loop.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod binance;
mod exit;
mod gateway;
mod position_cache;
mod protective_state;
mod reconcile;
mod runner;
mod runtime_config;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::binance::BinanceFuturesClient;
use crate::gateway::dry_run::DryRunGateway;
use crate::gateway::ExchangeGateway;
use crate::runner::GuardRunner;
use crate::runtime_config::{Credentials, RuntimeConfig};
use crate::types::AccountMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Position Guard — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("GUARD_CONFIG").unwrap_or_else(|_| "guard_config.json".into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    config.validate().context("invalid runtime configuration")?;

    info!(
        symbol = %config.symbol,
        account_mode = %config.account_mode,
        hedge_mode = config.hedge_mode,
        joint_reset = config.protection.joint_reset,
        "Configuration ready"
    );

    // ── 2. Credentials & Binance client ──────────────────────────────────
    let credentials_path =
        std::env::var("GUARD_CREDENTIALS").unwrap_or_else(|_| "config.json".into());
    let credentials =
        Credentials::load(&credentials_path).context("cannot start without API credentials")?;

    let client = BinanceFuturesClient::new(&credentials, &config)?;
    let rate_limits = client.rate_limits();
    let venue: Arc<dyn ExchangeGateway> = Arc::new(client);

    let gateway: Arc<dyn ExchangeGateway> = match config.account_mode {
        AccountMode::Demo => {
            warn!("Demo mode — orders and cancels are logged, never sent");
            Arc::new(DryRunGateway::new(venue))
        }
        AccountMode::Live => venue,
    };

    // ── 3. Guard loop ────────────────────────────────────────────────────
    let runner = GuardRunner::new(&config, gateway);

    if let Err(e) = runner.log_open_positions().await {
        warn!(error = %e, "Could not list open positions at startup");
    }

    runner
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received — stopping after the current tick"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;

    let usage = rate_limits.snapshot();
    info!(
        used_weight_1m = usage.used_weight_1m,
        order_count_10s = usage.order_count_10s,
        order_count_1m = usage.order_count_1m,
        "Shutdown complete"
    );
    Ok(())
}
