//! Swing points, market structure and the Breakout Quality Index.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::indicators::safe_div;
use crate::types::{
    BreakKind, Candle, Direction, MarketStructure, StructureBreak, SwingKind, SwingPoint, Trend,
};

/// Candles averaged for the relative-range half of the BQI.
const BQI_RANGE_WINDOW: usize = 5;

/// Swing highs and lows of a window, each in index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Swings {
    pub highs: Vec<SwingPoint>,
    pub lows: Vec<SwingPoint>,
}

/// Candle `i` is a swing high iff its high is strictly above every other
/// high within `±lookback`; symmetric for lows. Edges without a full
/// neighbourhood on both sides never qualify.
pub fn swing_points(candles: &[Candle], lookback: usize) -> Swings {
    let mut swings = Swings::default();
    if lookback == 0 || candles.len() < 2 * lookback + 1 {
        return swings;
    }

    for i in lookback..candles.len() - lookback {
        let c = &candles[i];
        let neighbours = (i - lookback..=i + lookback).filter(|&j| j != i);

        if neighbours.clone().all(|j| c.high > candles[j].high) {
            swings.highs.push(SwingPoint {
                index: i,
                price: c.high,
                time: c.open_time,
                kind: SwingKind::High,
            });
        }
        if neighbours.clone().all(|j| c.low < candles[j].low) {
            swings.lows.push(SwingPoint {
                index: i,
                price: c.low,
                time: c.open_time,
                kind: SwingKind::Low,
            });
        }
    }

    swings
}

/// Breakout Quality Index of `candles[index]` in [0, 100].
///
/// 60 points scale with body-to-range ratio; up to 40 points for the
/// candle's range relative to the mean range of the preceding five.
pub fn breakout_quality(candles: &[Candle], index: usize) -> u8 {
    let Some(candle) = candles.get(index) else {
        return 0;
    };

    let body_part = candle.body_ratio() * dec!(60);

    let start = index.saturating_sub(BQI_RANGE_WINDOW);
    let prior = &candles[start..index];
    let range_part = if prior.is_empty() {
        Decimal::ZERO
    } else {
        let mean_range = safe_div(
            prior.iter().map(|c| c.range()).sum(),
            Decimal::from(prior.len() as u64),
        );
        if mean_range.is_zero() {
            if candle.range() > Decimal::ZERO {
                dec!(40)
            } else {
                Decimal::ZERO
            }
        } else {
            (candle.range() / mean_range * dec!(20)).min(dec!(40))
        }
    };

    (body_part + range_part)
        .round()
        .clamp(Decimal::ZERO, dec!(100))
        .to_u8()
        .unwrap_or(0)
}

/// Trend from the last two swing highs and lows.
pub fn trend_from_swings(swings: &Swings) -> Trend {
    trend_of(&swings.highs, &swings.lows)
}

fn trend_of(highs: &[SwingPoint], lows: &[SwingPoint]) -> Trend {
    if highs.len() < 2 || lows.len() < 2 {
        return Trend::Ranging;
    }
    let (h1, h2) = (highs[highs.len() - 2].price, highs[highs.len() - 1].price);
    let (l1, l2) = (lows[lows.len() - 2].price, lows[lows.len() - 1].price);

    if h2 > h1 && l2 > l1 {
        Trend::Bullish
    } else if h2 < h1 && l2 < l1 {
        Trend::Bearish
    } else {
        Trend::Ranging
    }
}

/// Market structure of a window.
///
/// Candles are walked in order. A swing becomes breakable once its
/// `lookback` right-hand neighbours have printed; the first close beyond it
/// is a break. A break against the trend of the swings confirmed so far is a
/// CHoCH, one with it is a BOS. While those swings read as ranging the
/// previous break's direction stands in for the trend, and a first break
/// with neither counts as a BOS.
pub fn market_structure(candles: &[Candle], lookback: usize) -> MarketStructure {
    let swings = swing_points(candles, lookback);
    let trend = trend_from_swings(&swings);

    let mut last_bos = None;
    let mut last_choch = None;
    let mut latest: Option<StructureBreak> = None;
    let mut bias: Option<Direction> = None;

    let mut active_high: Option<SwingPoint> = None;
    let mut active_low: Option<SwingPoint> = None;
    let mut next_high = 0;
    let mut next_low = 0;

    for (i, candle) in candles.iter().enumerate() {
        // Arm swings confirmed by this candle.
        while next_high < swings.highs.len() && swings.highs[next_high].index + lookback < i {
            active_high = Some(swings.highs[next_high]);
            next_high += 1;
        }
        while next_low < swings.lows.len() && swings.lows[next_low].index + lookback < i {
            active_low = Some(swings.lows[next_low]);
            next_low += 1;
        }

        let broken = if let Some(level) = active_high.filter(|s| candle.close > s.price) {
            active_high = None;
            Some((Direction::Buy, level.price))
        } else if let Some(level) = active_low.filter(|s| candle.close < s.price) {
            active_low = None;
            Some((Direction::Sell, level.price))
        } else {
            None
        };

        if let Some((direction, level)) = broken {
            let reference = match trend_of(&swings.highs[..next_high], &swings.lows[..next_low]) {
                Trend::Bullish => Some(Direction::Buy),
                Trend::Bearish => Some(Direction::Sell),
                Trend::Ranging => bias,
            };
            let kind = match reference {
                Some(prev) if prev != direction => BreakKind::Choch,
                _ => BreakKind::Bos,
            };
            let brk = StructureBreak {
                kind,
                direction,
                level,
                index: i,
                time: candle.open_time,
                quality: breakout_quality(candles, i),
            };
            match kind {
                BreakKind::Bos => last_bos = Some(brk),
                BreakKind::Choch => last_choch = Some(brk),
            }
            latest = Some(brk);
            bias = Some(direction);
        }
    }

    MarketStructure {
        trend,
        structure: latest,
        last_bos,
        last_choch,
        swing_highs: swings.highs,
        swing_lows: swings.lows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::smc::test_support::{candle, candles_from_closes};

    // -- Swings --------------------------------------------------------------

    #[test]
    fn test_swing_high_and_low() {
        let highs = [1.0, 1.2, 1.5, 1.3, 1.1, 1.0, 1.2];
        let lows = [0.9, 1.0, 1.3, 1.0, 0.7, 0.8, 1.0];
        let candles: Vec<Candle> = highs
            .iter()
            .zip(lows)
            .enumerate()
            .map(|(i, (&h, l))| candle(i, l + 0.05, h, l, l + 0.05))
            .collect();

        let swings = swing_points(&candles, 2);
        assert_eq!(swings.highs.len(), 1);
        assert_eq!(swings.highs[0].index, 2);
        assert_eq!(swings.lows.len(), 1);
        assert_eq!(swings.lows[0].index, 4);
    }

    #[test]
    fn test_equal_neighbour_is_not_a_swing() {
        let candles: Vec<Candle> = [1.0, 1.5, 1.5, 1.0, 0.9]
            .iter()
            .enumerate()
            .map(|(i, &h)| candle(i, 0.8, h, 0.7, 0.8))
            .collect();
        assert!(swing_points(&candles, 1).highs.is_empty());
    }

    #[test]
    fn test_swing_symmetry_under_mirroring() {
        let closes = [
            1.10, 1.12, 1.15, 1.11, 1.09, 1.13, 1.18, 1.16, 1.12, 1.10, 1.14, 1.17, 1.13, 1.08,
            1.11, 1.19, 1.15, 1.12,
        ];
        let candles = candles_from_closes(&closes);
        // Mirror every price through K so highs become lows.
        let k = dec!(3);
        let mirrored: Vec<Candle> = candles
            .iter()
            .map(|c| Candle::new(c.open_time, k - c.open, k - c.low, k - c.high, k - c.close))
            .collect();

        for lookback in 1..=3 {
            let a = swing_points(&candles, lookback);
            let b = swing_points(&mirrored, lookback);
            let idx = |v: &[SwingPoint]| v.iter().map(|s| s.index).collect::<Vec<_>>();
            assert_eq!(idx(&a.highs), idx(&b.lows));
            assert_eq!(idx(&a.lows), idx(&b.highs));
        }
    }

    // -- BQI -----------------------------------------------------------------

    #[test]
    fn test_bqi_marubozu_with_large_range_is_100() {
        let mut candles: Vec<Candle> = (0..5).map(|i| candle(i, 1.0, 1.01, 0.99, 1.0)).collect();
        candles.push(candle(5, 1.0, 1.06, 1.0, 1.06));
        assert_eq!(breakout_quality(&candles, 5), 100);
    }

    #[test]
    fn test_bqi_bounds() {
        let closes: Vec<f64> = (0..40).map(|i| 1.1 + ((i * 7) % 11) as f64 * 0.001).collect();
        let candles = candles_from_closes(&closes);
        for i in 0..candles.len() {
            assert!(breakout_quality(&candles, i) <= 100);
        }
        assert_eq!(breakout_quality(&candles, 999), 0);
        let flat = vec![Candle::opened_at(0, dec!(1.1)); 6];
        assert_eq!(breakout_quality(&flat, 5), 0);
    }

    // -- Structure -----------------------------------------------------------

    #[test]
    fn test_uptrend_bos() {
        // Higher highs and higher lows with a close above the last swing high.
        let closes = [
            1.100, 1.104, 1.108, 1.104, 1.101, 1.105, 1.110, 1.114, 1.109, 1.106, 1.111, 1.116,
            1.120, 1.115, 1.112, 1.118, 1.125,
        ];
        let ms = market_structure(&candles_from_closes(&closes), 2);
        assert_eq!(ms.trend, Trend::Bullish);
        let bos = ms.last_bos.expect("bullish BOS");
        assert_eq!(bos.direction, Direction::Buy);
        assert!(ms.last_choch.is_none());
        assert_eq!(ms.structure, Some(bos));
    }

    #[test]
    fn test_reversal_is_choch() {
        let closes = [
            1.100, 1.104, 1.108, 1.104, 1.101, 1.105, 1.110, 1.114, 1.109, 1.106, 1.111, 1.116,
            1.112, 1.108, 1.104, 1.100, 1.096,
        ];
        let ms = market_structure(&candles_from_closes(&closes), 2);
        let choch = ms.last_choch.expect("bearish CHoCH");
        assert_eq!(choch.direction, Direction::Sell);
        assert_eq!(choch.kind, BreakKind::Choch);
        assert!(choch.quality <= 100);
    }

    #[test]
    fn test_first_break_against_swing_trend_is_choch() {
        // Lower highs and wick-only lower lows; no close breaks until the last
        // candle clears the second swing high.
        let ohlc = [
            (1.1000, 1.1010, 1.0990, 1.1000),
            (1.1000, 1.1050, 1.0995, 1.1040),
            (1.1020, 1.1030, 1.0960, 1.1000),
            (1.1000, 1.1040, 1.0980, 1.1020),
            (1.1020, 1.1020, 1.0950, 1.0990),
            (1.0990, 1.1010, 1.0970, 1.1000),
            (1.1000, 1.1070, 1.0990, 1.1060),
        ];
        let candles: Vec<Candle> = ohlc
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| candle(i, o, h, l, c))
            .collect();

        let ms = market_structure(&candles, 1);
        assert_eq!(ms.trend, Trend::Bearish);
        assert!(ms.last_bos.is_none());
        let choch = ms.last_choch.expect("bullish CHoCH");
        assert_eq!(choch.direction, Direction::Buy);
        assert_eq!(choch.level, dec!(1.1040));
        assert_eq!(choch.index, 6);
    }

    #[test]
    fn test_flat_window_has_no_structure() {
        let flat = vec![Candle::opened_at(0, dec!(1.1)); 50];
        let ms = market_structure(&flat, 2);
        assert_eq!(ms.trend, Trend::Ranging);
        assert!(ms.structure.is_none());
        assert!(ms.swing_highs.is_empty() && ms.swing_lows.is_empty());
    }
}
