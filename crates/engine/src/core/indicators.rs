//! Pure computation module for classical technical indicators.
//!
//! No I/O, no side effects. Each function returns an empty `Vec` or `None`
//! when the input is shorter than the required period; callers treat absence
//! of output as "insufficient data".
//!
//! Indicators implemented:
//! - Moving averages: SMA, EMA (SMA-seeded)
//! - Oscillators: RSI (Wilder's smoothing), Stochastic %K/%D
//! - Volatility: Bollinger Bands, ATR (Wilder's smoothing)
//! - Trend strength: ADX with +DI/-DI
//! - RSI divergence
//!
//! References:
//!     Wilder (1978), "New Concepts in Technical Trading Systems".
//!     Lane (1984), "Lane's Stochastics".

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::types::{Candle, Direction, Divergence};

/// `a / b`, or zero when `b` is zero.
pub fn safe_div(a: Decimal, b: Decimal) -> Decimal {
    if b.is_zero() {
        Decimal::ZERO
    } else {
        a / b
    }
}

fn mean(values: &[Decimal]) -> Decimal {
    safe_div(values.iter().copied().sum(), Decimal::from(values.len() as u64))
}

pub fn closes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.close).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Moving Averages
// ═══════════════════════════════════════════════════════════════════════════

/// Simple Moving Average. Element `i` covers `data[i..i + period]`.
pub fn sma(data: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let period_d = Decimal::from(period as u64);
    let mut sum: Decimal = data[..period].iter().copied().sum();
    let mut result = Vec::with_capacity(data.len() - period + 1);
    result.push(sum / period_d);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result.push(sum / period_d);
    }
    result
}

/// Exponential Moving Average.
///
/// Multiplier `k = 2 / (period + 1)`. First value seeded with SMA of the
/// first `period` values.
pub fn ema(data: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }

    let k = dec!(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = Decimal::ONE - k;

    let mut prev = mean(&data[..period]);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    result.push(prev);

    for &value in &data[period..] {
        prev = value * k + prev * one_minus_k;
        result.push(prev);
    }

    result
}

/// Most recent EMA value.
pub fn ema_last(data: &[Decimal], period: usize) -> Option<Decimal> {
    ema(data, period).last().copied()
}

// ═══════════════════════════════════════════════════════════════════════════
// Oscillators
// ═══════════════════════════════════════════════════════════════════════════

/// RSI series (Wilder's smoothing, factor `1/period`).
///
/// Element `i` is the RSI at `data[i + period]`. RSI is 100 whenever the
/// average loss is exactly zero.
pub fn rsi_series(data: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || data.len() < period + 1 {
        return Vec::new();
    }

    let period_d = Decimal::from(period as u64);
    let period_m1 = Decimal::from(period as u64 - 1);
    let changes: Vec<Decimal> = data.windows(2).map(|w| w[1] - w[0]).collect();

    let gain = |c: Decimal| c.max(Decimal::ZERO);
    let loss = |c: Decimal| (-c).max(Decimal::ZERO);

    let mut avg_gain = changes[..period].iter().map(|&c| gain(c)).sum::<Decimal>() / period_d;
    let mut avg_loss = changes[..period].iter().map(|&c| loss(c)).sum::<Decimal>() / period_d;

    let to_rsi = |g: Decimal, l: Decimal| {
        if l.is_zero() {
            dec!(100)
        } else {
            let rs = g / l;
            (dec!(100) - dec!(100) / (Decimal::ONE + rs)).clamp(Decimal::ZERO, dec!(100))
        }
    };

    let mut result = Vec::with_capacity(changes.len() - period + 1);
    result.push(to_rsi(avg_gain, avg_loss));

    for &c in &changes[period..] {
        avg_gain = (avg_gain * period_m1 + gain(c)) / period_d;
        avg_loss = (avg_loss * period_m1 + loss(c)) / period_d;
        result.push(to_rsi(avg_gain, avg_loss));
    }

    result
}

pub fn rsi(data: &[Decimal], period: usize) -> Option<Decimal> {
    rsi_series(data, period).last().copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stochastic {
    /// %K, element `i` ending at candle `i + k_period - 1`.
    pub k: Vec<Decimal>,
    /// SMA of %K; aligned to the tail of `k`.
    pub d: Vec<Decimal>,
}

impl Stochastic {
    pub fn last_k(&self) -> Option<Decimal> {
        self.k.last().copied()
    }

    pub fn last_d(&self) -> Option<Decimal> {
        self.d.last().copied()
    }
}

/// Stochastic oscillator. A flat window reads 50.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Option<Stochastic> {
    if k_period == 0 || d_period == 0 || candles.len() < k_period + d_period - 1 {
        return None;
    }

    let k: Vec<Decimal> = candles
        .windows(k_period)
        .map(|w| {
            let highest = w.iter().map(|c| c.high).max().unwrap_or_default();
            let lowest = w.iter().map(|c| c.low).min().unwrap_or_default();
            let close = w[w.len() - 1].close;
            let range = highest - lowest;
            if range.is_zero() {
                dec!(50)
            } else {
                dec!(100) * (close - lowest) / range
            }
        })
        .collect();

    let d = sma(&k, d_period);
    Some(Stochastic { k, d })
}

// ═══════════════════════════════════════════════════════════════════════════
// Volatility
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BollingerBand {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

impl BollingerBand {
    /// `(upper - lower) / middle`; zero for a zero middle.
    pub fn width(&self) -> Decimal {
        safe_div(self.upper - self.lower, self.middle)
    }
}

/// Sum that yields `None` instead of overflowing.
fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

/// Bollinger Bands series: rolling SMA ± `std_mult` population standard
/// deviations. Element `i` covers `data[i..i + period]`.
///
/// Empty when any window's variance leaves `Decimal` range.
pub fn bollinger_bands(data: &[Decimal], period: usize, std_mult: Decimal) -> Vec<BollingerBand> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let period_d = Decimal::from(period as u64);
    let mult = std_mult.abs();

    data.windows(period)
        .map(|window| {
            let middle = checked_sum(window.iter().copied())? / period_d;
            let variance = checked_sum(
                window
                    .iter()
                    .map(|&p| {
                        let diff = p.checked_sub(middle)?;
                        diff.checked_mul(diff)
                    })
                    .collect::<Option<Vec<_>>>()?,
            )? / period_d;
            let spread = mult.checked_mul(variance.sqrt().unwrap_or(Decimal::ZERO))?;
            Some(BollingerBand {
                upper: middle.checked_add(spread)?,
                middle,
                lower: middle.checked_sub(spread)?,
            })
        })
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}

/// `TR = max(H-L, |H-prevC|, |L-prevC|)` for every candle after the first.
pub fn true_ranges(candles: &[Candle]) -> Vec<Decimal> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Average True Range (Wilder's smoothing). `None` on insufficient data or
/// when the smoothing leaves `Decimal` range.
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let trs = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high.checked_sub(cur.low)?;
            let hc = cur.high.checked_sub(prev.close)?.abs();
            let lc = cur.low.checked_sub(prev.close)?.abs();
            Some(hl.max(hc).max(lc))
        })
        .collect::<Option<Vec<_>>>()?;

    let period_d = Decimal::from(period as u64);
    let period_m1 = Decimal::from(period as u64 - 1);

    let mut value = checked_sum(trs[..period].iter().copied())? / period_d;
    for &tr in &trs[period..] {
        value = value.checked_mul(period_m1)?.checked_add(tr)? / period_d;
    }
    Some(value)
}

// ═══════════════════════════════════════════════════════════════════════════
// Trend Strength
// ═══════════════════════════════════════════════════════════════════════════

/// ADX with directional indicators, all three aligned to the same length
/// (the last element of each refers to the last candle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adx {
    pub adx: Vec<Decimal>,
    pub plus_di: Vec<Decimal>,
    pub minus_di: Vec<Decimal>,
}

impl Adx {
    pub fn last(&self) -> Option<(Decimal, Decimal, Decimal)> {
        Some((
            *self.adx.last()?,
            *self.plus_di.last()?,
            *self.minus_di.last()?,
        ))
    }
}

/// Average Directional Index, smoothed with [`ema`].
pub fn adx(candles: &[Candle], period: usize) -> Option<Adx> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;
        plus_dm.push(if up > down && up > Decimal::ZERO { up } else { Decimal::ZERO });
        minus_dm.push(if down > up && down > Decimal::ZERO { down } else { Decimal::ZERO });
    }

    let tr_smooth = ema(&true_ranges(candles), period);
    let plus_smooth = ema(&plus_dm, period);
    let minus_smooth = ema(&minus_dm, period);

    let plus_di: Vec<Decimal> = plus_smooth
        .iter()
        .zip(&tr_smooth)
        .map(|(&dm, &tr)| dec!(100) * safe_div(dm, tr))
        .collect();
    let minus_di: Vec<Decimal> = minus_smooth
        .iter()
        .zip(&tr_smooth)
        .map(|(&dm, &tr)| dec!(100) * safe_div(dm, tr))
        .collect();

    let dx: Vec<Decimal> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(&p, &m)| dec!(100) * safe_div((p - m).abs(), p + m))
        .collect();

    let adx = ema(&dx, period);
    if adx.is_empty() {
        return None;
    }
    let skip = plus_di.len() - adx.len();

    Some(Adx {
        plus_di: plus_di[skip..].to_vec(),
        minus_di: minus_di[skip..].to_vec(),
        adx,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Divergence
// ═══════════════════════════════════════════════════════════════════════════

/// Bars at the end of the window treated as "current".
const DIVERGENCE_RECENT_BARS: usize = 3;

/// Price/RSI divergence over the last `lookback` aligned bars.
///
/// `rsi_values` may be shorter than `prices`; both are aligned on their
/// tails. Bullish: the recent price low undercuts every low at least three
/// bars back while the recent RSI trough stays above its historical trough.
/// Bearish is the mirror on highs.
pub fn rsi_divergence(prices: &[Decimal], rsi_values: &[Decimal], lookback: usize) -> Option<Divergence> {
    let len = prices.len().min(rsi_values.len()).min(lookback);
    if len < DIVERGENCE_RECENT_BARS * 2 {
        return None;
    }

    let prices = &prices[prices.len() - len..];
    let rsis = &rsi_values[rsi_values.len() - len..];
    let split = len - DIVERGENCE_RECENT_BARS;

    let (hist_p, recent_p) = prices.split_at(split);
    let (hist_r, recent_r) = rsis.split_at(split);

    let min = |xs: &[Decimal]| xs.iter().copied().min();
    let max = |xs: &[Decimal]| xs.iter().copied().max();

    let strength = |price_from: Decimal, price_to: Decimal, rsi_delta: Decimal| {
        let pct = safe_div((price_to - price_from).abs(), price_from) * dec!(100);
        (pct * dec!(100) + rsi_delta.abs() * dec!(2)).clamp(Decimal::ZERO, dec!(100))
    };

    let (hist_low, recent_low) = (min(hist_p)?, min(recent_p)?);
    let (hist_rsi_low, recent_rsi_low) = (min(hist_r)?, min(recent_r)?);
    if recent_low < hist_low && recent_rsi_low > hist_rsi_low {
        return Some(Divergence {
            direction: Direction::Buy,
            strength: strength(hist_low, recent_low, recent_rsi_low - hist_rsi_low),
        });
    }

    let (hist_high, recent_high) = (max(hist_p)?, max(recent_p)?);
    let (hist_rsi_high, recent_rsi_high) = (max(hist_r)?, max(recent_r)?);
    if recent_high > hist_high && recent_rsi_high < hist_rsi_high {
        return Some(Divergence {
            direction: Direction::Sell,
            strength: strength(hist_high, recent_high, hist_rsi_high - recent_rsi_high),
        });
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random walk around 1.1.
    fn walk(n: usize, seed: u64) -> Vec<Decimal> {
        let mut state = seed;
        let mut price = dec!(1.1000);
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let step = Decimal::from((state >> 33) % 21) - dec!(10);
                price += step * dec!(0.0001);
                price
            })
            .collect()
    }

    fn candles_from(closes: &[Decimal]) -> Vec<Candle> {
        let mut prev = closes[0];
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let open = prev;
                prev = c;
                Candle::new(
                    i as i64 * 60_000,
                    open,
                    open.max(c) + dec!(0.0002),
                    open.min(c) - dec!(0.0002),
                    c,
                )
            })
            .collect()
    }

    // -- SMA / EMA -----------------------------------------------------------

    #[test]
    fn test_sma_basic() {
        let data: Vec<Decimal> = (1..=5).map(Decimal::from).collect();
        assert_eq!(sma(&data, 2), vec![dec!(1.5), dec!(2.5), dec!(3.5), dec!(4.5)]);
        assert!(sma(&data, 6).is_empty());
        assert!(sma(&data, 0).is_empty());
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let data: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        let result = ema(&data, 3);
        assert_eq!(result[0], dec!(2));
        assert_eq!(result.len(), 8);
        assert_eq!(result[1], dec!(3)); // 4 * 0.5 + 2 * 0.5
    }

    #[test]
    fn test_ema_insufficient_data() {
        assert!(ema(&[dec!(1), dec!(2)], 5).is_empty());
        assert_eq!(ema_last(&[dec!(1)], 3), None);
    }

    // -- RSI -----------------------------------------------------------------

    #[test]
    fn test_rsi_all_gains_is_100() {
        let data: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        assert_eq!(rsi(&data, 14), Some(dec!(100)));
    }

    #[test]
    fn test_rsi_all_losses_near_zero() {
        let data: Vec<Decimal> = (1..=20).rev().map(Decimal::from).collect();
        assert_eq!(rsi(&data, 14), Some(Decimal::ZERO));
    }

    #[test]
    fn test_rsi_flat_is_100() {
        assert_eq!(rsi(&vec![dec!(1.1); 30], 14), Some(dec!(100)));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        assert_eq!(rsi(&[dec!(10), dec!(11)], 14), None);
    }

    #[test]
    fn test_rsi_bounds_on_random_walks() {
        for seed in 1..20 {
            let data = walk(200, seed);
            let series = rsi_series(&data, 14);
            assert_eq!(series.len(), 200 - 14);
            assert!(series.iter().all(|v| *v >= Decimal::ZERO && *v <= dec!(100)));
        }
    }

    // -- Bollinger -----------------------------------------------------------

    #[test]
    fn test_bollinger_ordering_on_random_walks() {
        for seed in 1..20 {
            let data = walk(120, seed);
            let bands = bollinger_bands(&data, 20, dec!(2));
            assert_eq!(bands.len(), 101);
            assert!(bands.iter().all(|b| b.upper >= b.middle && b.middle >= b.lower));
        }
    }

    #[test]
    fn test_bollinger_flat_collapses() {
        let bands = bollinger_bands(&vec![dec!(100); 20], 20, dec!(2));
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].upper, dec!(100));
        assert_eq!(bands[0].lower, dec!(100));
        assert_eq!(bands[0].width(), Decimal::ZERO);
    }

    #[test]
    fn test_bollinger_overflow_reads_as_no_data() {
        let data: Vec<Decimal> = (0..45)
            .map(|i| if i % 2 == 0 { dec!(1_000_000_000_000_000) } else { dec!(3_000_000_000_000_000) })
            .collect();
        assert!(bollinger_bands(&data, 20, dec!(2)).is_empty());
    }

    // -- ATR / Stochastic / ADX ---------------------------------------------

    #[test]
    fn test_atr_constant_range() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| Candle::new(i * 60_000, dec!(1.1), dec!(1.1010), dec!(1.0990), dec!(1.1)))
            .collect();
        assert_eq!(atr(&candles, 14), Some(dec!(0.0020)));
        assert_eq!(atr(&candles[..10], 14), None);
    }

    #[test]
    fn test_atr_overflow_reads_as_no_data() {
        let huge = Decimal::MAX / dec!(4);
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let close = if i % 2 == 0 { huge } else { Decimal::ONE };
                Candle::new(i * 60_000, close, huge, Decimal::ONE, close)
            })
            .collect();
        assert_eq!(atr(&candles, 14), None);
    }

    #[test]
    fn test_stochastic_flat_reads_50() {
        let candles = vec![Candle::opened_at(0, dec!(1.1)); 20];
        let stoch = stochastic(&candles, 14, 3).unwrap();
        assert_eq!(stoch.last_k(), Some(dec!(50)));
        assert_eq!(stoch.last_d(), Some(dec!(50)));
        assert_eq!(stoch.d.len(), stoch.k.len() - 2);
    }

    #[test]
    fn test_stochastic_close_at_high_is_100() {
        let closes: Vec<Decimal> = (1..=20).map(|i| dec!(1.1) + Decimal::from(i) * dec!(0.001)).collect();
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64, c - dec!(0.0005), c, c - dec!(0.001), c))
            .collect();
        let stoch = stochastic(&candles, 14, 3).unwrap();
        assert_eq!(stoch.last_k(), Some(dec!(100)));
    }

    #[test]
    fn test_adx_aligned_and_bounded() {
        let candles = candles_from(&walk(120, 7));
        let result = adx(&candles, 14).unwrap();
        assert_eq!(result.adx.len(), result.plus_di.len());
        assert_eq!(result.adx.len(), result.minus_di.len());
        assert!(result.adx.iter().all(|v| *v >= Decimal::ZERO && *v <= dec!(100)));
        assert!(adx(&candles[..20], 14).is_none());
    }

    #[test]
    fn test_adx_strong_uptrend_favours_plus_di() {
        let closes: Vec<Decimal> = (0..60).map(|i| dec!(1.1) + Decimal::from(i) * dec!(0.001)).collect();
        let (value, plus, minus) = adx(&candles_from(&closes), 14).unwrap().last().unwrap();
        assert!(plus > minus);
        assert!(value > dec!(50), "adx {value}");
    }

    // -- Divergence ----------------------------------------------------------

    #[test]
    fn test_bullish_divergence() {
        // Price makes a lower low while RSI's trough is higher.
        let prices = vec![
            dec!(1.10), dec!(1.09), dec!(1.08), dec!(1.09), dec!(1.10),
            dec!(1.09), dec!(1.085), dec!(1.075), dec!(1.08),
        ];
        let rsis = vec![
            dec!(50), dec!(35), dec!(20), dec!(35), dec!(50),
            dec!(45), dec!(38), dec!(30), dec!(40),
        ];
        let div = rsi_divergence(&prices, &rsis, 20).unwrap();
        assert_eq!(div.direction, Direction::Buy);
        assert!(div.strength > Decimal::ZERO && div.strength <= dec!(100));
    }

    #[test]
    fn test_bearish_divergence() {
        let prices = vec![
            dec!(1.10), dec!(1.11), dec!(1.12), dec!(1.11), dec!(1.10),
            dec!(1.11), dec!(1.115), dec!(1.125), dec!(1.12),
        ];
        let rsis = vec![
            dec!(50), dec!(65), dec!(80), dec!(65), dec!(50),
            dec!(55), dec!(62), dec!(70), dec!(60),
        ];
        let div = rsi_divergence(&prices, &rsis, 20).unwrap();
        assert_eq!(div.direction, Direction::Sell);
    }

    #[test]
    fn test_no_divergence_when_rsi_confirms() {
        let prices: Vec<Decimal> = (0..10).map(|i| dec!(1.2) - Decimal::from(i) * dec!(0.01)).collect();
        let rsis: Vec<Decimal> = (0..10).map(|i| dec!(60) - Decimal::from(i * 3)).collect();
        assert!(rsi_divergence(&prices, &rsis, 20).is_none());
        assert!(rsi_divergence(&prices[..4], &rsis[..4], 20).is_none());
    }
}
