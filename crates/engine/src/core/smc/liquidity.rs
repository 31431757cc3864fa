//! Liquidity pools, sweeps and inducement traps.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::structure::Swings;
use super::Tolerance;
use crate::core::indicators::safe_div;
use crate::types::{
    Candle, Direction, Inducement, LiquidityPool, LiquiditySweep, SwingKind, SwingPoint,
};

/// Required wick fraction in calm markets.
const CALM_WICK_FRACTION: Decimal = dec!(0.6);
/// Required wick fraction in volatile markets.
const VOLATILE_WICK_FRACTION: Decimal = dec!(0.4);
/// Volatility ratio at or below which the market counts as calm.
const CALM_RATIO: Decimal = dec!(0.8);
/// Volatility ratio at or above which the market counts as volatile.
const VOLATILE_RATIO: Decimal = dec!(1.5);

/// Cluster swing points of one side whose prices sit within `tolerance` of
/// each other. Only clusters with at least two touches are returned.
pub fn equal_levels(points: &[SwingPoint], tolerance: Tolerance) -> Vec<LiquidityPool> {
    let mut pools: Vec<(LiquidityPool, Decimal)> = Vec::new();

    for point in points {
        let existing = pools
            .iter_mut()
            .find(|(pool, _)| tolerance.matches(pool.level, point.price));
        match existing {
            Some((pool, sum)) => {
                *sum += point.price;
                pool.touches += 1;
                pool.level = *sum / Decimal::from(pool.touches as u64);
                pool.last_index = point.index;
            }
            None => pools.push((
                LiquidityPool {
                    side: point.kind,
                    level: point.price,
                    touches: 1,
                    first_index: point.index,
                    last_index: point.index,
                },
                point.price,
            )),
        }
    }

    pools
        .into_iter()
        .map(|(pool, _)| pool)
        .filter(|pool| pool.touches >= 2)
        .collect()
}

/// Wick fraction a sweep must exceed, interpolated from 0.6 at a volatility
/// ratio of 0.8 down to 0.4 at 1.5.
pub fn adaptive_wick_fraction(volatility_ratio: Decimal) -> Decimal {
    if volatility_ratio <= CALM_RATIO {
        CALM_WICK_FRACTION
    } else if volatility_ratio >= VOLATILE_RATIO {
        VOLATILE_WICK_FRACTION
    } else {
        let t = (volatility_ratio - CALM_RATIO) / (VOLATILE_RATIO - CALM_RATIO);
        CALM_WICK_FRACTION - (CALM_WICK_FRACTION - VOLATILE_WICK_FRACTION) * t
    }
}

/// Parameters of one sweep scan.
#[derive(Debug, Clone, Copy)]
pub struct SweepScan {
    /// Minimum wick penetration beyond the level.
    pub penetration: Tolerance,
    /// How far back swing levels are eligible.
    pub lookback: usize,
    /// Current ATR over the window's mean true range.
    pub volatility_ratio: Decimal,
}

struct Candidate {
    level: Decimal,
    origin: usize,
    from_pool: bool,
}

/// Sweep printed by `candles[index]`, if any.
///
/// A bullish sweep wicks below an intact swing low (or equal-low pool) by at
/// least the penetration tolerance, closes back above it, and its lower wick
/// exceeds the adaptive fraction of the candle range. Pools win over lone
/// swings; among equals the level closest to the close wins.
pub fn sweep_at(
    candles: &[Candle],
    index: usize,
    swings: &Swings,
    pools: &[LiquidityPool],
    scan: &SweepScan,
) -> Option<LiquiditySweep> {
    let candle = candles.get(index)?;
    let range = candle.range();
    if range.is_zero() {
        return None;
    }
    let min_fraction = adaptive_wick_fraction(scan.volatility_ratio);
    let earliest = index.saturating_sub(scan.lookback);

    let candidates = |side: SwingKind, points: &[SwingPoint]| -> Vec<Candidate> {
        let from_pools = pools.iter().filter(|p| p.side == side).map(|p| Candidate {
            level: p.level,
            origin: p.last_index,
            from_pool: true,
        });
        let from_swings = points.iter().map(|s| Candidate {
            level: s.price,
            origin: s.index,
            from_pool: false,
        });
        from_pools
            .chain(from_swings)
            .filter(|c| c.origin < index && c.origin >= earliest)
            .collect()
    };

    // Sweep of lows: bullish.
    let lower_fraction = safe_div(candle.lower_wick(), range);
    if lower_fraction > min_fraction {
        let best = candidates(SwingKind::Low, &swings.lows)
            .into_iter()
            .filter(|c| {
                candle.low < c.level - scan.penetration.of(c.level)
                    && candle.close > c.level
                    && candles[c.origin + 1..index].iter().all(|k| k.low >= c.level)
            })
            .max_by(|a, b| a.from_pool.cmp(&b.from_pool).then(a.level.cmp(&b.level)));
        if let Some(c) = best {
            return Some(LiquiditySweep {
                direction: Direction::Buy,
                swept_level: c.level,
                index,
                time: candle.open_time,
                wick_fraction: lower_fraction,
                from_pool: c.from_pool,
            });
        }
    }

    // Sweep of highs: bearish.
    let upper_fraction = safe_div(candle.upper_wick(), range);
    if upper_fraction > min_fraction {
        let best = candidates(SwingKind::High, &swings.highs)
            .into_iter()
            .filter(|c| {
                candle.high > c.level + scan.penetration.of(c.level)
                    && candle.close < c.level
                    && candles[c.origin + 1..index].iter().all(|k| k.high <= c.level)
            })
            .max_by(|a, b| a.from_pool.cmp(&b.from_pool).then(b.level.cmp(&a.level)));
        if let Some(c) = best {
            return Some(LiquiditySweep {
                direction: Direction::Sell,
                swept_level: c.level,
                index,
                time: candle.open_time,
                wick_fraction: upper_fraction,
                from_pool: c.from_pool,
            });
        }
    }

    None
}

/// Sweep printed by the newest candle.
pub fn detect_sweep(
    candles: &[Candle],
    swings: &Swings,
    pools: &[LiquidityPool],
    scan: &SweepScan,
) -> Option<LiquiditySweep> {
    let last = candles.len().checked_sub(1)?;
    sweep_at(candles, last, swings, pools, scan)
}

/// Most recent minor swing followed by a move at least `ratio` times the
/// swing's own size.
///
/// A minor low's size is the drop into it from the highest high of its
/// `lookback` predecessors; the move is the rally from it to the highest
/// high since. Highs mirror.
pub fn detect_inducement(
    candles: &[Candle],
    minor: &Swings,
    lookback: usize,
    ratio: Decimal,
) -> Option<Inducement> {
    let mut points: Vec<&SwingPoint> = minor.highs.iter().chain(&minor.lows).collect();
    points.sort_by_key(|p| std::cmp::Reverse(p.index));

    for point in points {
        let before = &candles[point.index.saturating_sub(lookback)..point.index];
        let after = &candles[point.index + 1..];
        if before.is_empty() || after.is_empty() {
            continue;
        }

        let (direction, swing_size, move_size) = match point.kind {
            SwingKind::Low => {
                let prior_high = before.iter().map(|c| c.high).max()?;
                let later_high = after.iter().map(|c| c.high).max()?;
                (Direction::Buy, prior_high - point.price, later_high - point.price)
            }
            SwingKind::High => {
                let prior_low = before.iter().map(|c| c.low).min()?;
                let later_low = after.iter().map(|c| c.low).min()?;
                (Direction::Sell, point.price - prior_low, point.price - later_low)
            }
        };

        if swing_size > Decimal::ZERO && move_size >= swing_size * ratio {
            return Some(Inducement {
                direction,
                level: point.price,
                index: point.index,
                swing_size,
                move_size,
            });
        }
    }

    None
}
