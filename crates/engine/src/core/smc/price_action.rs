//! Candlestick patterns on the newest candle.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{Candle, PriceActionPattern};

const DOJI_BODY: Decimal = dec!(0.1);
const PIN_WICK: Decimal = dec!(0.6);
const PIN_OPPOSITE_WICK: Decimal = dec!(0.15);

/// Patterns completed by the last candle (using the one before it for
/// two-candle patterns). A flat candle reads as a doji.
pub fn detect_patterns(candles: &[Candle]) -> Vec<PriceActionPattern> {
    let mut patterns = Vec::new();
    let Some(cur) = candles.last() else {
        return patterns;
    };
    let range = cur.range();

    if range.is_zero() || cur.body() <= range * DOJI_BODY {
        patterns.push(PriceActionPattern::Doji);
    }

    if !range.is_zero() {
        if cur.lower_wick() >= range * PIN_WICK && cur.upper_wick() <= range * PIN_OPPOSITE_WICK {
            patterns.push(PriceActionPattern::Hammer);
        }
        if cur.upper_wick() >= range * PIN_WICK && cur.lower_wick() <= range * PIN_OPPOSITE_WICK {
            patterns.push(PriceActionPattern::ShootingStar);
        }
    }

    if let Some(prev) = candles.len().checked_sub(2).map(|i| &candles[i]) {
        if prev.is_bearish()
            && cur.is_bullish()
            && cur.open <= prev.close
            && cur.close >= prev.open
            && cur.body() > prev.body()
        {
            patterns.push(PriceActionPattern::BullishEngulfing);
        }
        if prev.is_bullish()
            && cur.is_bearish()
            && cur.open >= prev.close
            && cur.close <= prev.open
            && cur.body() > prev.body()
        {
            patterns.push(PriceActionPattern::BearishEngulfing);
        }
        if cur.high < prev.high && cur.low > prev.low {
            patterns.push(PriceActionPattern::InsideBar);
        }
    }

    patterns
}
