// =============================================================================
// Meridian Pairs Engine — Main Entry Point
// =============================================================================
//
// Statistical-arbitrage engine for crypto perpetual-futures pair trading.
// Starts in paper mode (trading disabled) unless the runtime config says
// otherwise; orders only reach the exchange when `trading_enabled` is set.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod engine;
mod execution;
mod indicators;
mod market_data;
mod monitoring;
mod orchestrator;
mod risk;
mod runtime_config;
mod stats;
mod strategy;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::TradingEngine;
use crate::execution::BybitClient;
use crate::market_data::MarketDataManager;
use crate::runtime_config::RuntimeConfig;
use crate::types::PairConfig;

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
    info!("║        Meridian Pairs Engine — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override pairs from env if available: "BTCUSDT/ETHUSDT,SOLUSDT/AVAXUSDT".
    if let Ok(raw) = std::env::var("MERIDIAN_PAIRS") {
        let pairs: Vec<PairConfig> = raw
            .split(',')
            .filter_map(|entry| {
                let mut legs = entry.trim().split('/');
                match (legs.next(), legs.next()) {
                    (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                        Some(PairConfig::new(a.to_uppercase(), b.to_uppercase()))
                    }
                    _ => {
                        warn!(entry, "ignoring malformed pair entry");
                        None
                    }
                }
            })
            .collect();
        if !pairs.is_empty() {
            config.pairs = pairs;
        }
    }

    info!(
        pairs = ?config.pairs.iter().map(PairConfig::pair_id).collect::<Vec<_>>(),
        trading_enabled = config.trading_enabled,
        testnet = config.testnet,
        signal_mode = %config.signal_mode,
        "Configured trading pairs"
    );
    if !config.trading_enabled {
        info!("Trading disabled: running in paper mode with simulated fills");
    }

    // ── 2. Broker client ─────────────────────────────────────────────────
    let api_key = std::env::var("BYBIT_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BYBIT_API_SECRET").unwrap_or_default();
    let broker = Arc::new(BybitClient::new(api_key, api_secret, config.testnet));

    // ── 3. Spawn market data streams ─────────────────────────────────────
    let market_data = Arc::new(MarketDataManager::new());
    let symbols = config.symbols();

    for symbol in &symbols {
        let md = market_data.clone();
        let sym = symbol.clone();
        let testnet = config.testnet;
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::stream::run_market_stream(&sym, testnet, &md).await {
                    error!(symbol = %sym, error = %e, "Market stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    info!(count = symbols.len(), "Market data streams launched");

    // ── 4. Trading engine ────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let save_config = config.clone();

    let mut trading_engine = TradingEngine::new(config, broker, market_data, shutdown_rx);
    let engine_task = tokio::spawn(async move {
        trading_engine.run().await;
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        error!(error = %e, "Engine task ended abnormally");
    }

    if let Err(e) = save_config.save("runtime_config.json") {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Meridian Pairs Engine shut down complete.");
    Ok(())
}
