//! Smart Money Concepts pattern library.
//!
//! Stateless analysers over a candle window. Every call recomputes from
//! scratch; zones and breaks are returned as value copies so a caller can
//! hold one across passes without aliasing later results.

pub mod liquidity;
pub mod price_action;
pub mod ranges;
pub mod regime;
pub mod structure;
pub mod zones;

use rust_decimal::Decimal;

use crate::config::{IndicatorParams, SmcParams};
use crate::constants::MAX_ANALYSIS_PRICE;
use crate::core::indicators::{self, safe_div};
use crate::types::{Candle, Regime, SmcSnapshot};

use self::liquidity::{detect_inducement, detect_sweep, equal_levels, SweepScan};
use self::structure::{market_structure, swing_points, Swings};

/// Minimum candles for a velocity reading.
const VELOCITY_MIN_CANDLES: usize = 7;

/// Price tolerance expressed as a fraction of the reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance(Decimal);

impl Tolerance {
    pub fn fraction(fraction: Decimal) -> Self {
        Self(fraction.abs())
    }

    /// Convert a pip distance at `reference_price` into a fraction.
    pub fn from_pips(pips: Decimal, pip_size: Decimal, reference_price: Decimal) -> Self {
        Self(safe_div(pips * pip_size, reference_price).abs())
    }

    pub fn as_fraction(self) -> Decimal {
        self.0
    }

    /// Absolute distance at `price`.
    pub fn of(self, price: Decimal) -> Decimal {
        price.abs() * self.0
    }

    /// Whether `b` lies within tolerance of `a`.
    pub fn matches(self, a: Decimal, b: Decimal) -> bool {
        (a - b).abs() <= self.of(a)
    }
}

/// Runs the full pattern library over a window.
#[derive(Debug, Clone)]
pub struct SmcAnalyzer {
    indicators: IndicatorParams,
    smc: SmcParams,
}

impl SmcAnalyzer {
    pub fn new(indicators: IndicatorParams, smc: SmcParams) -> Self {
        Self { indicators, smc }
    }

    pub fn indicator_params(&self) -> &IndicatorParams {
        &self.indicators
    }

    pub fn smc_params(&self) -> &SmcParams {
        &self.smc
    }

    /// Fewest candles for which [`analyze`](Self::analyze) returns a snapshot.
    pub fn min_candles(&self) -> usize {
        (self.indicators.atr_period + 1)
            .max(2 * self.smc.swing_lookback + 1)
            .max(VELOCITY_MIN_CANDLES)
    }

    /// Analyse the newest `analysis_window` candles. `None` on insufficient
    /// history.
    pub fn analyze(&self, candles: &[Candle]) -> Option<SmcSnapshot> {
        if candles.len() < self.min_candles() {
            return None;
        }
        let ind = &self.indicators;
        let smc = &self.smc;

        let window = &candles[candles.len().saturating_sub(smc.analysis_window.max(self.min_candles()))..];
        if window.iter().any(|c| c.high > MAX_ANALYSIS_PRICE) {
            return None;
        }
        let price = window.last()?.close;
        let closes = indicators::closes(window);

        // -- Indicators ------------------------------------------------------
        let atr = indicators::atr(window, ind.atr_period)?;
        let trs = indicators::true_ranges(window);
        let mean_tr = safe_div(trs.iter().copied().sum(), Decimal::from(trs.len() as u64));
        let volatility_ratio = safe_div(atr, mean_tr);

        let rsi_values = indicators::rsi_series(&closes, ind.rsi_period);
        let ema_fast = indicators::ema_last(&closes, ind.ema_fast);
        let ema_slow = indicators::ema_last(&closes, ind.ema_slow);
        let ema_trend = indicators::ema_last(&closes, ind.ema_trend);
        let bands = indicators::bollinger_bands(&closes, ind.bb_period, ind.bb_std);

        // -- Structure and liquidity -----------------------------------------
        let structure = market_structure(window, smc.swing_lookback);
        let swings = Swings {
            highs: structure.swing_highs.clone(),
            lows: structure.swing_lows.clone(),
        };
        let equal = Tolerance::fraction(smc.equal_level_tolerance);
        let mut pools = equal_levels(&swings.highs, equal);
        pools.extend(equal_levels(&swings.lows, equal));

        let scan = SweepScan {
            penetration: Tolerance::fraction(smc.sweep_penetration),
            lookback: smc.sweep_lookback,
            volatility_ratio,
        };
        let sweep = detect_sweep(window, &swings, &pools, &scan);

        let minor = swing_points(window, smc.minor_swing_lookback);
        let inducement =
            detect_inducement(window, &minor, smc.minor_swing_lookback, smc.inducement_ratio);

        // -- Zones -----------------------------------------------------------
        let order_blocks = zones::order_blocks(window, smc.impulse_multiple);
        let fair_value_gaps = zones::fair_value_gaps(window, Tolerance::fraction(smc.fvg_min_gap));
        let touched_blocks = zones::touched_blocks(
            window,
            &order_blocks,
            &swings,
            &pools,
            &scan,
            smc.breaker_lookback,
        );
        let rejection_blocks = zones::rejection_blocks(window, smc.rejection_wick_ratio);

        let range = ranges::range_position(window, &structure, smc.range_lookback, price);
        let ote = range.map(|r| ranges::optimal_trade_entry(&r, price));

        // -- Regime and momentum ---------------------------------------------
        let phase = regime::market_phase(window, atr);
        let regime = match (ema_fast, ema_slow) {
            (Some(fast), Some(slow)) => regime::classify_regime(fast, slow, &bands),
            _ => Regime::Contraction,
        };

        Some(SmcSnapshot {
            candle_count: window.len(),
            price,
            atr,
            rsi: rsi_values.last().copied(),
            stochastic_k: indicators::stochastic(window, ind.stoch_k, ind.stoch_d)
                .and_then(|s| s.last_k()),
            adx: indicators::adx(window, ind.adx_period).and_then(|a| a.adx.last().copied()),
            ema_fast,
            ema_slow,
            ema_trend,
            structure,
            pools,
            sweep,
            order_blocks,
            fair_value_gaps,
            touched_blocks,
            rejection_blocks,
            inducement,
            range,
            ote,
            phase,
            regime,
            velocity: regime::velocity_delta(window),
            patterns: price_action::detect_patterns(window),
            divergence: indicators::rsi_divergence(&closes, &rsi_values, ind.divergence_lookback),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use rust_decimal::Decimal;

    use crate::types::Candle;

    pub fn d(v: f64) -> Decimal {
        v.to_string().parse().expect("finite f64")
    }

    pub fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(i as i64 * 60_000, d(open), d(high), d(low), d(close))
    }

    /// Candles opening at the previous close. Up candles carry a small upper
    /// wick, down candles a small lower wick, so turning points form strict
    /// extremes.
    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let wick = d(0.0002);
        let mut prev = closes.first().map(|&c| d(c)).unwrap_or_default();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let close = d(c);
                let open = prev;
                prev = close;
                let (high, low) = if close > open {
                    (close + wick, open)
                } else if close < open {
                    (open, close - wick)
                } else {
                    (close, close)
                };
                Candle::new(i as i64 * 60_000, open, high, low, close)
            })
            .collect()
    }
}
