use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use otc_signal_engine::config;
use otc_signal_engine::core::clock::SystemClock;
use otc_signal_engine::core::engines::build_engine;
use otc_signal_engine::core::runtime::{spawn_writer, Outbound, Runtime};
use otc_signal_engine::core::signal_ledger::SignalLedger;
use otc_signal_engine::core::signal_service::SignalService;
use otc_signal_engine::core::stats_store::StatsStore;
use otc_signal_engine::logging;

const STATS_DB_FILE: &str = "signal_stats.db";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("SIGNAL_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let settings = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&settings.app.logging)?;

    info!(
        engine = %settings.signals.engine,
        interval_minutes = settings.signals.signal_interval_minutes,
        duration_minutes = settings.signals.trade_duration_minutes,
        warmup = settings.signals.warmup_candles_count,
        min_confidence = settings.signals.min_confidence_percent,
        min_payout = settings.signals.min_payout_percent,
        "OTC signal engine starting"
    );

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    let store = open_store(&settings.app.data_dir, settings.engine.ledger.history_byte_budget).await;
    let (stats, history) = match &store {
        Some(store) => store.load_or_default().await,
        None => Default::default(),
    };
    info!(
        total = stats.total,
        wins = stats.wins,
        losses = stats.losses,
        history = history.len(),
        "statistics restored"
    );

    // -----------------------------------------------------------------------
    // Service
    // -----------------------------------------------------------------------

    let engine = build_engine(settings.signals.engine, &settings.engine);
    let ledger = SignalLedger::restore(
        settings.engine.ledger.clone(),
        SignalService::throttle(&settings.signals),
        stats,
        history,
    );
    let service = SignalService::new(
        settings.signals.clone(),
        &settings.engine,
        engine,
        ledger,
        Arc::new(SystemClock),
    );

    // -----------------------------------------------------------------------
    // Runtime
    // -----------------------------------------------------------------------

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(64);
    let shutdown = CancellationToken::new();
    let writer = spawn_writer(tokio::io::stdout(), out_rx);

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received, stopping gracefully..."),
            Err(e) => error!(error = %e, "failed to listen for Ctrl+C"),
        }
        ctrl_c_token.cancel();
    });

    let runtime = Runtime::new(service, store, out_tx, shutdown);
    let service = runtime
        .run(BufReader::new(tokio::io::stdin()))
        .await
        .context("runtime failed")?;

    // The runtime owned the last sender; the writer drains and exits.
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "output writer failed"),
        Err(e) => error!(error = %e, "output writer task panicked"),
    }

    let stats = service.ledger().stats();
    info!(
        total = stats.total,
        wins = stats.wins,
        losses = stats.losses,
        "shutdown complete"
    );
    Ok(())
}

/// Open the statistics database, running without persistence if it cannot
/// be opened.
async fn open_store(data_dir: &str, byte_budget: usize) -> Option<StatsStore> {
    let dir = Path::new(data_dir);
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(data_dir, error = %e, "cannot create data directory, statistics will not persist");
        return None;
    }
    let path = dir.join(STATS_DB_FILE);
    match StatsStore::open(&path.to_string_lossy(), byte_budget).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "cannot open statistics store, statistics will not persist");
            None
        }
    }
}
