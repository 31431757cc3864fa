use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{JPY_PIP, STANDARD_PIP, TWO_DECIMAL_PRICE_FLOOR};

/// Instrument symbol as delivered by the tick source, e.g. `"EURUSD_otc"`.
pub type InstrumentId = String;

/// One fixed time bucket of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, Unix milliseconds.
    pub open_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
}

impl Candle {
    /// A fresh candle opened by a single tick.
    pub fn opened_at(open_time: i64, price: Decimal) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    pub fn new(open_time: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
        }
    }

    /// Fold a later tick of the same bucket into the candle.
    pub fn absorb(&mut self, price: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn body_top(&self) -> Decimal {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> Decimal {
        self.open.min(self.close)
    }

    pub fn upper_wick(&self) -> Decimal {
        self.high - self.body_top()
    }

    pub fn lower_wick(&self) -> Decimal {
        self.body_bottom() - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Body as a fraction of range; zero for a flat candle.
    pub fn body_ratio(&self) -> Decimal {
        let range = self.range();
        if range.is_zero() {
            Decimal::ZERO
        } else {
            self.body() / range
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }
}

/// A single price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: InstrumentId,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub timestamp: i64,
    /// Payout percent shown by the venue, when the source knows it.
    pub payout: Option<u8>,
}

/// Pip size inferred from quote precision: two-decimal quotes (JPY crosses and
/// anything priced above the floor) use 0.01, everything else 0.0001.
pub fn pip_size(price: Decimal) -> Decimal {
    if price >= TWO_DECIMAL_PRICE_FLOOR {
        JPY_PIP
    } else {
        STANDARD_PIP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_absorb_tracks_extremes() {
        let mut candle = Candle::opened_at(0, dec!(1.1000));
        candle.absorb(dec!(1.1010));
        candle.absorb(dec!(1.0990));
        candle.absorb(dec!(1.1002));
        assert_eq!(candle.high, dec!(1.1010));
        assert_eq!(candle.low, dec!(1.0990));
        assert_eq!(candle.close, dec!(1.1002));
        assert_eq!(candle.open, dec!(1.1000));
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_wicks_and_body_ratio() {
        let candle = Candle::new(0, dec!(1.0965), dec!(1.0972), dec!(1.0950), dec!(1.0970));
        assert_eq!(candle.lower_wick(), dec!(0.0015));
        assert_eq!(candle.upper_wick(), dec!(0.0002));
        assert_eq!(candle.range(), dec!(0.0022));
        assert!(candle.is_bullish());
    }

    #[test]
    fn test_flat_candle_body_ratio_is_zero() {
        let candle = Candle::opened_at(0, dec!(1.1));
        assert_eq!(candle.body_ratio(), Decimal::ZERO);
        assert!(!candle.is_bullish() && !candle.is_bearish());
    }

    #[test]
    fn test_pip_size() {
        assert_eq!(pip_size(dec!(1.0850)), dec!(0.0001));
        assert_eq!(pip_size(dec!(151.20)), dec!(0.01));
    }
}
