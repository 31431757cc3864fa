pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::types::EngineKind;

/// Load and merge all config JSON files into a single [`AppSettings`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   signals.json
///   engine.json   (optional, defaults apply)
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                    | Config Field                       |
/// |----------------------------|------------------------------------|
/// | `SIGNAL_INTERVAL_MINUTES`  | `signals.signal_interval_minutes`  |
/// | `TRADE_DURATION_MINUTES`   | `signals.trade_duration_minutes`   |
/// | `WARMUP_CANDLES_COUNT`     | `signals.warmup_candles_count`     |
/// | `MIN_CONFIDENCE_PERCENT`   | `signals.min_confidence_percent`   |
/// | `MIN_PAYOUT_PERCENT`       | `signals.min_payout_percent`       |
/// | `DECISION_ENGINE`          | `signals.engine`                   |
/// | `SIGNAL_DATA_DIR`          | `app.data_dir`                     |
pub fn load_config(config_dir: &Path) -> Result<AppSettings> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig =
        serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let signals: SignalConfig =
        serde_json::from_str(&read("signals.json")?).context("parsing signals.json")?;

    let engine: EngineConfig = match read("engine.json") {
        Ok(contents) => serde_json::from_str(&contents).context("parsing engine.json")?,
        Err(_) => EngineConfig::default(),
    };

    let mut config = AppSettings {
        app,
        signals,
        engine,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Only non-empty env vars take effect. Parse failures are logged and the
/// JSON value remains.
fn apply_env_overrides(config: &mut AppSettings) {
    // -- Signal cadence ------------------------------------------------------
    if let Some(val) = env_parse::<u32>("SIGNAL_INTERVAL_MINUTES") {
        info!(val, "env override: SIGNAL_INTERVAL_MINUTES");
        config.signals.signal_interval_minutes = val;
    }

    if let Some(val) = env_parse::<u32>("TRADE_DURATION_MINUTES") {
        info!(val, "env override: TRADE_DURATION_MINUTES");
        config.signals.trade_duration_minutes = val;
    }

    if let Some(val) = env_parse::<usize>("WARMUP_CANDLES_COUNT") {
        info!(val, "env override: WARMUP_CANDLES_COUNT");
        config.signals.warmup_candles_count = val;
    }

    // -- Gates ---------------------------------------------------------------
    if let Some(val) = env_parse::<u8>("MIN_CONFIDENCE_PERCENT") {
        info!(val, "env override: MIN_CONFIDENCE_PERCENT");
        config.signals.min_confidence_percent = val;
    }

    if let Some(val) = env_parse::<u8>("MIN_PAYOUT_PERCENT") {
        info!(val, "env override: MIN_PAYOUT_PERCENT");
        config.signals.min_payout_percent = val;
    }

    // -- Engine selection ----------------------------------------------------
    if let Some(raw) = env_string("DECISION_ENGINE") {
        match EngineKind::from_str(&raw) {
            Ok(kind) => {
                info!(engine = %kind, "env override: DECISION_ENGINE");
                config.signals.engine = kind;
            }
            Err(e) => tracing::warn!(value = %raw, error = %e, "ignoring DECISION_ENGINE"),
        }
    }

    if let Some(val) = env_string("SIGNAL_DATA_DIR") {
        info!(dir = %val, "env override: SIGNAL_DATA_DIR");
        config.app.data_dir = val;
    }
}

/// Read a non-empty env var.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}
