//! Market phase, regime classification and velocity delta.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::indicators::{safe_div, BollingerBand};
use crate::types::{Candle, Direction, MarketPhase, Regime, VelocityDelta};

/// Candles averaged when comparing recent range against ATR.
const PHASE_WINDOW: usize = 5;
const EXPANSION_MARGIN: Decimal = dec!(1.2);
const CONTRACTION_MARGIN: Decimal = dec!(0.7);
/// Current band width below this share of its recent mean is a squeeze.
const SQUEEZE_RATIO: Decimal = dec!(0.6);
/// EMA separation above this share of band width reads as trending.
const TREND_SEPARATION: Decimal = dec!(0.25);
const VELOCITY_SPAN: usize = 3;

/// EXPANSION when the recent mean range beats ATR by a margin,
/// CONTRACTION when well below it (or when nothing moves at all).
pub fn market_phase(candles: &[Candle], atr: Decimal) -> MarketPhase {
    let recent = &candles[candles.len().saturating_sub(PHASE_WINDOW)..];
    if recent.is_empty() || atr <= Decimal::ZERO {
        return MarketPhase::Contraction;
    }
    let mean_range = safe_div(
        recent.iter().map(|c| c.range()).sum(),
        Decimal::from(recent.len() as u64),
    );

    if mean_range >= atr * EXPANSION_MARGIN {
        MarketPhase::Expansion
    } else if mean_range <= atr * CONTRACTION_MARGIN {
        MarketPhase::Contraction
    } else {
        MarketPhase::Ranging
    }
}

/// TRENDING / MEAN_REVERTING / CONTRACTION from EMA separation and
/// Bollinger width. A band narrower than 60% of its recent mean width is a
/// squeeze.
pub fn classify_regime(ema_fast: Decimal, ema_slow: Decimal, bands: &[BollingerBand]) -> Regime {
    let Some(current) = bands.last() else {
        return Regime::Contraction;
    };
    let widths: Vec<Decimal> = bands.iter().map(|b| b.width()).collect();
    let mean_width = safe_div(widths.iter().copied().sum(), Decimal::from(widths.len() as u64));
    let width = current.width();

    if mean_width.is_zero() || width < mean_width * SQUEEZE_RATIO {
        return Regime::Contraction;
    }

    let separation = safe_div((ema_fast - ema_slow).abs(), current.middle);
    if separation > width * TREND_SEPARATION {
        Regime::Trending
    } else {
        Regime::MeanReverting
    }
}

/// Mean close-to-close rate of change of the last three candles against the
/// three before; aligned when velocity and its change share a sign.
pub fn velocity_delta(candles: &[Candle]) -> Option<VelocityDelta> {
    if candles.len() < 2 * VELOCITY_SPAN + 1 {
        return None;
    }
    let tail = &candles[candles.len() - (2 * VELOCITY_SPAN + 1)..];
    let roc: Vec<Decimal> = tail
        .windows(2)
        .map(|w| safe_div(w[1].close - w[0].close, w[0].close))
        .collect();

    let span = Decimal::from(VELOCITY_SPAN as u64);
    let previous = roc[..VELOCITY_SPAN].iter().copied().sum::<Decimal>() / span;
    let current = roc[VELOCITY_SPAN..].iter().copied().sum::<Decimal>() / span;
    let change = current - previous;

    let aligned = if current > Decimal::ZERO && change > Decimal::ZERO {
        Some(Direction::Buy)
    } else if current < Decimal::ZERO && change < Decimal::ZERO {
        Some(Direction::Sell)
    } else {
        None
    };

    Some(VelocityDelta {
        current,
        previous,
        aligned,
    })
}
