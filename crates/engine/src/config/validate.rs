use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::{AppSettings, RankingParams, SequenceParams};
use crate::constants::{DURATION_CHOICES_MINUTES, MAX_ANALYSIS_PRICE};

/// Validate invariants across the merged config that serde alone cannot enforce.
/// Called automatically by [`super::load_config`].
pub fn validate_config(config: &AppSettings) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_app_config(config, &mut errors);
    validate_signals_config(config, &mut errors);
    validate_aggregator_config(config, &mut errors);
    validate_indicator_config(config, &mut errors);
    validate_smc_config(config, &mut errors);
    validate_sequence_profile("engine.sequence.classic", &config.engine.sequence.classic, &mut errors);
    validate_sequence_profile("engine.sequence.relaxed", &config.engine.sequence.relaxed, &mut errors);
    validate_ranking_profile("engine.ranking.deep_sight", &config.engine.ranking.deep_sight, &mut errors);
    validate_ranking_profile("engine.ranking.nexus", &config.engine.ranking.nexus, &mut errors);
    validate_ledger_config(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// App config
// ---------------------------------------------------------------------------

fn validate_app_config(config: &AppSettings, errors: &mut Vec<String>) {
    if config.app.data_dir.trim().is_empty() {
        errors.push("app: data_dir is empty".into());
    }
    if config.app.logging.log_dir.trim().is_empty() {
        errors.push("app.logging: log_dir is empty".into());
    }
}

// ---------------------------------------------------------------------------
// Signals config
// ---------------------------------------------------------------------------

fn validate_signals_config(config: &AppSettings, errors: &mut Vec<String>) {
    let sig = &config.signals;

    if sig.signal_interval_minutes == 0 {
        errors.push("signals: signal_interval_minutes must be >= 1".into());
    }

    // Duration 1 is valid alongside the engine-selected choices.
    if sig.trade_duration_minutes != 1
        && !DURATION_CHOICES_MINUTES.contains(&sig.trade_duration_minutes)
    {
        errors.push(format!(
            "signals: trade_duration_minutes ({}) must be 1 or one of {:?}",
            sig.trade_duration_minutes, DURATION_CHOICES_MINUTES
        ));
    }

    if sig.warmup_candles_count == 0 {
        errors.push("signals: warmup_candles_count must be > 0".into());
    }

    if sig.min_confidence_percent > 100 {
        errors.push(format!(
            "signals: min_confidence_percent ({}) must be in [0, 100]",
            sig.min_confidence_percent
        ));
    }

    if sig.min_payout_percent > 100 {
        errors.push(format!(
            "signals: min_payout_percent ({}) must be in [0, 100]",
            sig.min_payout_percent
        ));
    }

    if sig.warmup_candles_count > config.engine.aggregator.capacity {
        errors.push(format!(
            "signals: warmup_candles_count ({}) exceeds aggregator capacity ({})",
            sig.warmup_candles_count, config.engine.aggregator.capacity
        ));
    }
}

// ---------------------------------------------------------------------------
// Engine config
// ---------------------------------------------------------------------------

fn validate_aggregator_config(config: &AppSettings, errors: &mut Vec<String>) {
    let agg = &config.engine.aggregator;

    if agg.capacity < 2 {
        errors.push(format!(
            "engine.aggregator: capacity ({}) must be >= 2",
            agg.capacity
        ));
    }
    if agg.stale_after_secs == 0 || agg.frozen_after_secs == 0 {
        errors.push("engine.aggregator: frozen/stale thresholds must be > 0".into());
    }
    if agg.flux_window_secs == 0 {
        errors.push("engine.aggregator: flux_window_secs must be > 0".into());
    }
    if agg.max_price <= Decimal::ZERO || agg.max_price > MAX_ANALYSIS_PRICE {
        errors.push(format!(
            "engine.aggregator: max_price ({}) must be in (0, {MAX_ANALYSIS_PRICE}]",
            agg.max_price
        ));
    }
}

fn validate_indicator_config(config: &AppSettings, errors: &mut Vec<String>) {
    let ind = &config.engine.indicators;

    for (name, period) in [
        ("atr_period", ind.atr_period),
        ("rsi_period", ind.rsi_period),
        ("bb_period", ind.bb_period),
        ("stoch_k", ind.stoch_k),
        ("stoch_d", ind.stoch_d),
        ("adx_period", ind.adx_period),
    ] {
        if period == 0 {
            errors.push(format!("engine.indicators: {name} must be > 0"));
        }
    }

    // EMA ordering: fast < slow < trend.
    if ind.ema_fast == 0 || ind.ema_fast >= ind.ema_slow {
        errors.push(format!(
            "engine.indicators: ema_fast ({}) must be in (0, ema_slow ({}))",
            ind.ema_fast, ind.ema_slow
        ));
    }
    if ind.ema_slow >= ind.ema_trend {
        errors.push(format!(
            "engine.indicators: ema_slow ({}) must be < ema_trend ({})",
            ind.ema_slow, ind.ema_trend
        ));
    }

    if ind.bb_std <= Decimal::ZERO {
        errors.push(format!(
            "engine.indicators: bb_std ({}) must be > 0",
            ind.bb_std
        ));
    }
}

fn validate_smc_config(config: &AppSettings, errors: &mut Vec<String>) {
    let smc = &config.engine.smc;

    if smc.swing_lookback == 0 || smc.minor_swing_lookback == 0 {
        errors.push("engine.smc: swing lookbacks must be > 0".into());
    }
    if smc.minor_swing_lookback > smc.swing_lookback {
        errors.push(format!(
            "engine.smc: minor_swing_lookback ({}) must be <= swing_lookback ({})",
            smc.minor_swing_lookback, smc.swing_lookback
        ));
    }

    for (name, value) in [
        ("equal_level_tolerance", smc.equal_level_tolerance),
        ("sweep_penetration", smc.sweep_penetration),
        ("fvg_min_gap", smc.fvg_min_gap),
    ] {
        // Fractions of price; anything above 5% is almost certainly a unit mix-up.
        if value < Decimal::ZERO || value > dec!(0.05) {
            errors.push(format!(
                "engine.smc: {name} ({value}) must be a price fraction in [0, 0.05]"
            ));
        }
    }

    if smc.impulse_multiple <= dec!(1) {
        errors.push(format!(
            "engine.smc: impulse_multiple ({}) must be > 1",
            smc.impulse_multiple
        ));
    }
    if smc.rejection_wick_ratio <= Decimal::ZERO || smc.rejection_wick_ratio >= dec!(1) {
        errors.push(format!(
            "engine.smc: rejection_wick_ratio ({}) must be in (0, 1)",
            smc.rejection_wick_ratio
        ));
    }
    if smc.analysis_window < smc.range_lookback {
        errors.push(format!(
            "engine.smc: analysis_window ({}) must be >= range_lookback ({})",
            smc.analysis_window, smc.range_lookback
        ));
    }
}

fn validate_sequence_profile(name: &str, params: &SequenceParams, errors: &mut Vec<String>) {
    if params.displacement_atr_multiple <= Decimal::ZERO {
        errors.push(format!(
            "{name}: displacement_atr_multiple ({}) must be > 0",
            params.displacement_atr_multiple
        ));
    }
    if params.choch_min_quality > 100 {
        errors.push(format!(
            "{name}: choch_min_quality ({}) must be in [0, 100]",
            params.choch_min_quality
        ));
    }
    if params.stall_candles == 0 {
        errors.push(format!("{name}: stall_candles must be > 0"));
    }
}

fn validate_ranking_profile(name: &str, params: &RankingParams, errors: &mut Vec<String>) {
    if params.shadow_history == 0 {
        errors.push(format!("{name}: shadow_history must be > 0"));
    }
    if params.inversion_threshold < Decimal::ZERO || params.inversion_threshold > dec!(0.5) {
        errors.push(format!(
            "{name}: inversion_threshold ({}) must be in [0, 0.5]",
            params.inversion_threshold
        ));
    }
    if params.weight_min <= Decimal::ZERO || params.weight_min >= params.weight_max {
        errors.push(format!(
            "{name}: weight bounds ({}, {}) must satisfy 0 < min < max",
            params.weight_min, params.weight_max
        ));
    }
    if params.flux_reference <= Decimal::ZERO || params.bias_reference <= Decimal::ZERO {
        errors.push(format!("{name}: flux_reference and bias_reference must be > 0"));
    }
    if params.volatility_floor >= params.volatility_ceiling {
        errors.push(format!(
            "{name}: volatility_floor ({}) must be < volatility_ceiling ({})",
            params.volatility_floor, params.volatility_ceiling
        ));
    }
}

fn validate_ledger_config(config: &AppSettings, errors: &mut Vec<String>) {
    let ledger = &config.engine.ledger;

    if ledger.history_cap == 0 {
        errors.push("engine.ledger: history_cap must be > 0".into());
    }
    if ledger.history_byte_budget < 1024 {
        errors.push(format!(
            "engine.ledger: history_byte_budget ({}) must be >= 1024",
            ledger.history_byte_budget
        ));
    }
    if ledger.high_confidence_percent > 100 {
        errors.push(format!(
            "engine.ledger: high_confidence_percent ({}) must be in [0, 100]",
            ledger.high_confidence_percent
        ));
    }
}
