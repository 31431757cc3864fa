//! Order blocks, fair-value gaps, breaker/mitigation blocks and rejection
//! blocks.
//!
//! `mitigated` is recomputed from the candles after each zone on every call;
//! nothing is carried between passes.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::liquidity::{sweep_at, SweepScan};
use super::structure::Swings;
use super::Tolerance;
use crate::core::indicators::safe_div;
use crate::types::{Candle, Direction, LiquidityPool, Zone, ZoneKind};

const BREAKER_MULTIPLIER: Decimal = dec!(1.5);
const MITIGATION_MULTIPLIER: Decimal = dec!(0.7);
const MAX_IMPULSE_STRENGTH: Decimal = dec!(5);

/// First index after `from` at which price trades back into the zone.
fn first_touch(candles: &[Candle], from: usize, zone: &Zone) -> Option<usize> {
    (from..candles.len()).find(|&j| match zone.direction {
        Direction::Buy => candles[j].low <= zone.high,
        Direction::Sell => candles[j].high >= zone.low,
    })
}

/// A candle of one colour followed by an opposite impulse candle whose range
/// is at least `impulse_multiple` times larger. The first candle's band is
/// the zone.
pub fn order_blocks(candles: &[Candle], impulse_multiple: Decimal) -> Vec<Zone> {
    let mut zones = Vec::new();

    for i in 0..candles.len().saturating_sub(1) {
        let (base, impulse) = (&candles[i], &candles[i + 1]);
        let base_range = base.range();
        if base_range.is_zero() || impulse.range() < base_range * impulse_multiple {
            continue;
        }

        let direction = if base.is_bearish() && impulse.is_bullish() {
            Direction::Buy
        } else if base.is_bullish() && impulse.is_bearish() {
            Direction::Sell
        } else {
            continue;
        };

        let mut zone = Zone {
            kind: ZoneKind::OrderBlock,
            direction,
            high: base.high,
            low: base.low,
            index: i,
            created_at: base.open_time,
            mitigated: false,
            strength: (impulse.range() / base_range).min(MAX_IMPULSE_STRENGTH),
        };
        zone.mitigated = first_touch(candles, i + 2, &zone).is_some();
        zones.push(zone);
    }

    zones
}

/// Three-candle imbalance: candle 1's high below candle 3's low (bullish) or
/// candle 1's low above candle 3's high (bearish), with a gap of at least
/// `min_gap` of price. The zone belongs to the middle candle.
pub fn fair_value_gaps(candles: &[Candle], min_gap: Tolerance) -> Vec<Zone> {
    let mut zones = Vec::new();

    for i in 2..candles.len() {
        let (first, middle, third) = (&candles[i - 2], &candles[i - 1], &candles[i]);

        let (direction, high, low) = if third.low > first.high {
            (Direction::Buy, third.low, first.high)
        } else if third.high < first.low {
            (Direction::Sell, first.low, third.high)
        } else {
            continue;
        };

        let gap = high - low;
        if gap < min_gap.of(middle.close) || gap.is_zero() {
            continue;
        }

        let mut zone = Zone {
            kind: ZoneKind::FairValueGap,
            direction,
            high,
            low,
            index: i - 1,
            created_at: middle.open_time,
            mitigated: false,
            strength: safe_div(middle.range(), gap).min(MAX_IMPULSE_STRENGTH),
        };
        zone.mitigated = first_touch(candles, i + 1, &zone).is_some();
        zones.push(zone);
    }

    zones
}

/// Reclassify touched order blocks: a touch preceded by a liquidity sweep in
/// the block's direction within `lookback` candles makes a breaker (strength
/// ×1.5), otherwise a mitigation block (×0.7). The result is marked
/// mitigated once a later close finishes beyond the block's far side.
pub fn touched_blocks(
    candles: &[Candle],
    order_blocks: &[Zone],
    swings: &Swings,
    pools: &[LiquidityPool],
    scan: &SweepScan,
    lookback: usize,
) -> Vec<Zone> {
    let mut zones = Vec::new();

    for block in order_blocks.iter().filter(|z| z.mitigated) {
        let Some(touch) = first_touch(candles, block.index + 2, block) else {
            continue;
        };

        let swept = (touch.saturating_sub(lookback)..=touch).any(|j| {
            sweep_at(candles, j, swings, pools, scan).is_some_and(|s| s.direction == block.direction)
        });

        let (kind, multiplier) = if swept {
            (ZoneKind::Breaker, BREAKER_MULTIPLIER)
        } else {
            (ZoneKind::Mitigation, MITIGATION_MULTIPLIER)
        };

        let invalidated = candles[touch..].iter().any(|c| match block.direction {
            Direction::Buy => c.close < block.low,
            Direction::Sell => c.close > block.high,
        });

        zones.push(Zone {
            kind,
            mitigated: invalidated,
            strength: block.strength * multiplier,
            created_at: candles[touch].open_time,
            ..*block
        });
    }

    zones
}

/// Candles whose wick on one side is at least `wick_ratio` of the range.
/// The zone is the outer half of that wick.
pub fn rejection_blocks(candles: &[Candle], wick_ratio: Decimal) -> Vec<Zone> {
    let mut zones = Vec::new();

    for (i, c) in candles.iter().enumerate() {
        let range = c.range();
        if range.is_zero() {
            continue;
        }

        let lower = c.lower_wick();
        if lower >= range * wick_ratio {
            let mut zone = Zone {
                kind: ZoneKind::Rejection,
                direction: Direction::Buy,
                high: c.low + lower / Decimal::TWO,
                low: c.low,
                index: i,
                created_at: c.open_time,
                mitigated: false,
                strength: lower / range,
            };
            zone.mitigated = first_touch(candles, i + 1, &zone).is_some();
            zones.push(zone);
        }

        let upper = c.upper_wick();
        if upper >= range * wick_ratio {
            let mut zone = Zone {
                kind: ZoneKind::Rejection,
                direction: Direction::Sell,
                high: c.high,
                low: c.high - upper / Decimal::TWO,
                index: i,
                created_at: c.open_time,
                mitigated: false,
                strength: upper / range,
            };
            zone.mitigated = first_touch(candles, i + 1, &zone).is_some();
            zones.push(zone);
        }
    }

    zones
}
