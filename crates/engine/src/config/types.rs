use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_CANDLE_CAPACITY, DEFAULT_HISTORY_CAP, DEFAULT_MAX_TICK_PRICE,
    DEFAULT_MIN_CONFIDENCE_PERCENT, DEFAULT_MIN_PAYOUT_PERCENT, DEFAULT_WARMUP_CANDLES,
    HIGH_CONFIDENCE_PERCENT,
};
use crate::types::EngineKind;

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub signals: SignalConfig,
    pub engine: EngineConfig,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    /// Directory holding the statistics database.
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    #[serde(default = "default_log_filter")]
    pub default_filter: String,
    /// Emit stderr logs as JSON lines for a supervising process.
    #[serde(default)]
    pub json_stderr: bool,
}

fn default_log_file() -> String {
    "engine.log".into()
}

fn default_log_filter() -> String {
    "otc_signal_engine=info,warn".into()
}

// ---------------------------------------------------------------------------
// signals.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    pub signal_interval_minutes: u32,
    pub trade_duration_minutes: u32,
    #[serde(default = "default_warmup")]
    pub warmup_candles_count: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence_percent: u8,
    #[serde(default = "default_min_payout")]
    pub min_payout_percent: u8,
    pub engine: EngineKind,
    /// Minimum spacing between two published signals, any instrument.
    #[serde(default)]
    pub min_signal_gap_secs: u64,
    /// Minimum spacing between two published signals on one instrument.
    #[serde(default)]
    pub instrument_cooldown_secs: u64,
}

fn default_warmup() -> usize {
    DEFAULT_WARMUP_CANDLES
}

fn default_min_confidence() -> u8 {
    DEFAULT_MIN_CONFIDENCE_PERCENT
}

fn default_min_payout() -> u8 {
    DEFAULT_MIN_PAYOUT_PERCENT
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            signal_interval_minutes: 1,
            trade_duration_minutes: 1,
            warmup_candles_count: DEFAULT_WARMUP_CANDLES,
            min_confidence_percent: DEFAULT_MIN_CONFIDENCE_PERCENT,
            min_payout_percent: DEFAULT_MIN_PAYOUT_PERCENT,
            engine: EngineKind::Scoring,
            min_signal_gap_secs: 0,
            instrument_cooldown_secs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// engine.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub aggregator: AggregatorParams,
    pub indicators: IndicatorParams,
    pub smc: SmcParams,
    pub scoring: ScoringParams,
    pub sequence: SequenceProfiles,
    pub ranking: RankingProfiles,
    pub ledger: LedgerParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorParams {
    /// Ring-buffer capacity per instrument.
    pub capacity: usize,
    /// Price unchanged for this long marks the instrument frozen.
    pub frozen_after_secs: u64,
    /// No tick at all for this long marks the instrument frozen.
    pub stale_after_secs: u64,
    /// Housekeeping window over which tick flux is measured.
    pub flux_window_secs: u64,
    /// Ticks priced above this are dropped as out of range.
    #[serde(with = "rust_decimal::serde::float")]
    pub max_price: Decimal,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CANDLE_CAPACITY,
            frozen_after_secs: 90,
            stale_after_secs: 30,
            flux_window_secs: 10,
            max_price: DEFAULT_MAX_TICK_PRICE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub bb_period: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_std: Decimal,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub adx_period: usize,
    pub divergence_lookback: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            atr_period: 14,
            rsi_period: 14,
            ema_fast: 9,
            ema_slow: 21,
            ema_trend: 50,
            bb_period: 20,
            bb_std: dec!(2),
            stoch_k: 14,
            stoch_d: 3,
            adx_period: 14,
            divergence_lookback: 20,
        }
    }
}

/// Smart-money pattern thresholds.
///
/// Every price tolerance is a fraction of the reference price (`0.0002` is
/// two basis points, about two pips on EUR/USD). Pip-denominated inputs are
/// converted at the edge with `smc::Tolerance::from_pips`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmcParams {
    pub swing_lookback: usize,
    pub minor_swing_lookback: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub equal_level_tolerance: Decimal,
    /// Minimum wick penetration beyond a level for a sweep.
    #[serde(with = "rust_decimal::serde::str")]
    pub sweep_penetration: Decimal,
    /// Candles searched backwards for sweepable swing levels.
    pub sweep_lookback: usize,
    /// Impulse candle range multiple over the order-block candle.
    #[serde(with = "rust_decimal::serde::str")]
    pub impulse_multiple: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fvg_min_gap: Decimal,
    /// Candles before a touch searched for a sweep (breaker vs mitigation).
    pub breaker_lookback: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub rejection_wick_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub inducement_ratio: Decimal,
    /// Static range window for premium/discount when no swing leg exists.
    pub range_lookback: usize,
    /// Analysis window handed to the pattern library.
    pub analysis_window: usize,
}

impl Default for SmcParams {
    fn default() -> Self {
        Self {
            swing_lookback: 2,
            minor_swing_lookback: 1,
            equal_level_tolerance: dec!(0.0002),
            sweep_penetration: dec!(0.00005),
            sweep_lookback: 30,
            impulse_multiple: dec!(1.5),
            fvg_min_gap: dec!(0.00005),
            breaker_lookback: 10,
            rejection_wick_ratio: dec!(0.5),
            inducement_ratio: dec!(3.33),
            range_lookback: 50,
            analysis_window: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub min_candles: usize,
    /// Score gap below which buy and sell are considered tied.
    #[serde(with = "rust_decimal::serde::str")]
    pub conflict_margin: Decimal,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            min_candles: 30,
            conflict_margin: dec!(5),
        }
    }
}

/// Parameters of one generation of the sequence state machine.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceParams {
    pub min_candles: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub displacement_atr_multiple: Decimal,
    pub choch_min_quality: u8,
    pub stall_candles: usize,
    pub cooldown_minutes: u32,
    /// Sweeps must take an equal-high/low pool rather than any swing.
    pub pool_sweeps: bool,
    pub fast_paths: bool,
    pub hybrid: bool,
}

impl SequenceParams {
    pub fn classic() -> Self {
        Self {
            min_candles: 30,
            displacement_atr_multiple: dec!(1.5),
            choch_min_quality: 65,
            stall_candles: 20,
            cooldown_minutes: 10,
            pool_sweeps: false,
            fast_paths: false,
            hybrid: false,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            min_candles: 30,
            displacement_atr_multiple: dec!(1.2),
            choch_min_quality: 45,
            stall_candles: 40,
            cooldown_minutes: 3,
            pool_sweeps: true,
            fast_paths: true,
            hybrid: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceProfiles {
    pub classic: SequenceParams,
    pub relaxed: SequenceParams,
}

impl Default for SequenceProfiles {
    fn default() -> Self {
        Self {
            classic: SequenceParams::classic(),
            relaxed: SequenceParams::relaxed(),
        }
    }
}

/// Parameters of one generation of the cross-instrument ranking engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingParams {
    pub min_candles: usize,
    /// Rolling shadow outcomes kept per instrument.
    pub shadow_history: usize,
    /// Shadow trades awaiting expiry per instrument.
    pub max_pending_shadows: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub inversion_threshold: Decimal,
    pub inversion_min_samples: usize,
    pub adaptive_weights: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub learning_rate: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weight_min: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weight_max: Decimal,
    pub fractal_memory: bool,
    pub fractal_min_samples: u32,
    /// Ticks per minute treated as full institutional participation.
    #[serde(with = "rust_decimal::serde::str")]
    pub flux_reference: Decimal,
    /// ATR as a fraction of price below which a market counts as dead.
    #[serde(with = "rust_decimal::serde::str")]
    pub volatility_floor: Decimal,
    /// ATR as a fraction of price above which a market counts as choppy.
    #[serde(with = "rust_decimal::serde::str")]
    pub volatility_ceiling: Decimal,
    /// Net currency bias treated as a full-strength correlation reading.
    #[serde(with = "rust_decimal::serde::str")]
    pub bias_reference: Decimal,
}

impl RankingParams {
    pub fn deep_sight() -> Self {
        Self {
            min_candles: 30,
            shadow_history: 10,
            max_pending_shadows: 5,
            inversion_threshold: dec!(0.40),
            inversion_min_samples: 5,
            adaptive_weights: false,
            learning_rate: dec!(0.05),
            weight_min: dec!(0.5),
            weight_max: dec!(2.0),
            fractal_memory: false,
            fractal_min_samples: 4,
            flux_reference: dec!(60),
            volatility_floor: dec!(0.00002),
            volatility_ceiling: dec!(0.002),
            bias_reference: dec!(0.002),
        }
    }

    pub fn nexus() -> Self {
        Self {
            shadow_history: 20,
            inversion_threshold: dec!(0.35),
            adaptive_weights: true,
            fractal_memory: true,
            ..Self::deep_sight()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankingProfiles {
    pub deep_sight: RankingParams,
    pub nexus: RankingParams,
}

impl Default for RankingProfiles {
    fn default() -> Self {
        Self {
            deep_sight: RankingParams::deep_sight(),
            nexus: RankingParams::nexus(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    pub history_cap: usize,
    /// Upper bound on the serialized signal history kept in the store.
    pub history_byte_budget: usize,
    pub high_confidence_percent: u8,
    /// Losing streak at which shadow wins start paying the streak down.
    pub shadow_recovery_streak: u32,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            history_byte_budget: 64 * 1024,
            high_confidence_percent: HIGH_CONFIDENCE_PERCENT,
            shadow_recovery_streak: 2,
        }
    }
}
