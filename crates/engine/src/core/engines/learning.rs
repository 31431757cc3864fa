//! Shadow-trade learning shared by the ranking engines.
//!
//! Every evaluation opens a synthetic trade in the raw model direction.
//! When it expires the outcome feeds a bounded win/loss history, the
//! fractal pattern memory and, when enabled, the per-feature synapse
//! weights.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::RankingParams;
use crate::types::{Candle, Reliability, ShadowOutcome, ShadowTrade};

const FRACTAL_BOOST_RATE: Decimal = dec!(0.7);
const FRACTAL_INVERT_RATE: Decimal = dec!(0.3);
const FRACTAL_DEPTH: usize = 3;

/// What fractal memory says about the current candle pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FractalBias {
    Boost,
    Invert,
    Neutral,
}

/// Up/down string of the newest candles, oldest first (`"UUD"`). Flat
/// candles count as up. Empty when there are too few candles.
pub fn candle_pattern(candles: &[Candle]) -> String {
    if candles.len() < FRACTAL_DEPTH {
        return String::new();
    }
    candles[candles.len() - FRACTAL_DEPTH..]
        .iter()
        .map(|c| if c.close < c.open { 'D' } else { 'U' })
        .collect()
}

/// Queue a shadow trade, dropping the oldest pending one past the cap.
pub fn open_shadow(reliability: &mut Reliability, params: &RankingParams, trade: ShadowTrade) {
    reliability.pending.push_back(trade);
    while reliability.pending.len() > params.max_pending_shadows {
        reliability.pending.pop_front();
    }
}

/// Resolve every pending trade that has expired by `now` against `price`.
pub fn resolve_due(
    reliability: &mut Reliability,
    params: &RankingParams,
    price: Decimal,
    now: i64,
) -> Vec<ShadowOutcome> {
    let mut resolved = Vec::new();
    let mut still_pending = std::collections::VecDeque::with_capacity(reliability.pending.len());

    for trade in reliability.pending.drain(..) {
        if trade.expires_at > now {
            still_pending.push_back(trade);
            continue;
        }
        let win = trade.direction.wins(trade.entry_price, price);

        if params.fractal_memory && !trade.pattern.is_empty() {
            let stats = reliability.fractal.entry(trade.pattern.clone()).or_default();
            stats.total += 1;
            if win {
                stats.wins += 1;
            }
        }

        if params.adaptive_weights {
            let delta = if win {
                params.learning_rate
            } else {
                -params.learning_rate
            };
            for feature in &trade.features {
                let weight = reliability.synapses.entry(*feature).or_insert(Decimal::ONE);
                *weight = (*weight + delta).clamp(params.weight_min, params.weight_max);
            }
        }

        resolved.push(ShadowOutcome {
            direction: trade.direction,
            win,
            pattern: trade.pattern,
            resolved_at: now,
        });
    }
    reliability.pending = still_pending;

    for outcome in &resolved {
        reliability.outcomes.push_back(outcome.clone());
    }
    while reliability.outcomes.len() > params.shadow_history {
        reliability.outcomes.pop_front();
    }

    resolved
}

/// Shadow history is long enough and bad enough to trade against.
pub fn should_invert(reliability: &Reliability, params: &RankingParams) -> bool {
    reliability.samples() >= params.inversion_min_samples
        && reliability
            .win_rate()
            .is_some_and(|rate| rate < params.inversion_threshold)
}

pub fn fractal_bias(reliability: &Reliability, params: &RankingParams, pattern: &str) -> FractalBias {
    if !params.fractal_memory {
        return FractalBias::Neutral;
    }
    let Some(stats) = reliability.fractal.get(pattern) else {
        return FractalBias::Neutral;
    };
    if stats.total < params.fractal_min_samples {
        return FractalBias::Neutral;
    }
    match stats.win_rate() {
        Some(rate) if rate > FRACTAL_BOOST_RATE => FractalBias::Boost,
        Some(rate) if rate < FRACTAL_INVERT_RATE => FractalBias::Invert,
        _ => FractalBias::Neutral,
    }
}
