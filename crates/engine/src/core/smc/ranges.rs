//! Premium/discount zoning and optimal-trade-entry retracements.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{Candle, Direction, MarketStructure, OteZone, PriceZone, RangePosition};

const PREMIUM_FROM: Decimal = dec!(0.75);
const DISCOUNT_TO: Decimal = dec!(0.25);
const OTE_LEVELS: [Decimal; 3] = [dec!(0.618), dec!(0.705), dec!(0.786)];

/// Candles spanning the active trading range.
///
/// After a break, the range starts at the last opposite swing before the
/// break (the origin of the leg). Without a break, the trailing
/// `fallback_lookback` candles are used.
fn active_leg<'a>(
    candles: &'a [Candle],
    structure: &MarketStructure,
    fallback_lookback: usize,
) -> (&'a [Candle], bool) {
    if let Some(brk) = structure.structure {
        let origins = match brk.direction {
            Direction::Buy => &structure.swing_lows,
            Direction::Sell => &structure.swing_highs,
        };
        if let Some(origin) = origins.iter().rev().find(|s| s.index < brk.index) {
            return (&candles[origin.index..], true);
        }
    }
    let start = candles.len().saturating_sub(fallback_lookback);
    (&candles[start..], false)
}

/// Where `price` sits within the active range; `None` for an empty window.
/// A zero-height range reads as equilibrium.
pub fn range_position(
    candles: &[Candle],
    structure: &MarketStructure,
    fallback_lookback: usize,
    price: Decimal,
) -> Option<RangePosition> {
    let (leg, dynamic) = active_leg(candles, structure, fallback_lookback);
    let range_high = leg.iter().map(|c| c.high).max()?;
    let range_low = leg.iter().map(|c| c.low).min()?;
    let height = range_high - range_low;

    let position = if height.is_zero() {
        dec!(0.5)
    } else {
        ((price - range_low) / height).clamp(Decimal::ZERO, Decimal::ONE)
    };

    let zone = if height.is_zero() {
        PriceZone::Equilibrium
    } else if position >= PREMIUM_FROM {
        PriceZone::Premium
    } else if position <= DISCOUNT_TO {
        PriceZone::Discount
    } else {
        PriceZone::Equilibrium
    };

    Some(RangePosition {
        zone,
        range_high,
        range_low,
        position,
        dynamic,
    })
}

/// Fibonacci retracement levels of the range.
///
/// BUY is in zone between the 0.705 and 0.786 retracements measured down
/// from the high; SELL between the same retracements measured up from the
/// low. A zero-height range has no zone.
pub fn optimal_trade_entry(range: &RangePosition, price: Decimal) -> OteZone {
    let height = range.range_high - range.range_low;
    let buy_levels = OTE_LEVELS.map(|r| range.range_high - height * r);
    let sell_levels = OTE_LEVELS.map(|r| range.range_low + height * r);

    let valid = height > Decimal::ZERO;
    OteZone {
        buy_levels,
        sell_levels,
        in_buy_zone: valid && price <= buy_levels[1] && price >= buy_levels[2],
        in_sell_zone: valid && price >= sell_levels[1] && price <= sell_levels[2],
    }
}
