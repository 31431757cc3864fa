//! Tick → 1-minute OHLC candle aggregation with a bounded ring buffer per
//! instrument.

use std::collections::VecDeque;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::trace;

use crate::constants::CANDLE_BUCKET_MS;
use crate::types::Candle;

/// What a tick did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    /// First tick of a new bucket; the previous candle is now closed.
    Opened,
    /// Folded into the current candle.
    Updated,
    /// Non-positive price, non-positive timestamp, or a bucket older than the
    /// newest candle. Nothing changed.
    Ignored,
}

/// Start of the bucket containing `timestamp_ms`.
pub fn bucket_start(timestamp_ms: i64) -> i64 {
    timestamp_ms.div_euclid(CANDLE_BUCKET_MS) * CANDLE_BUCKET_MS
}

/// Ordered, bounded candle history of one instrument.
///
/// Reads go through a cached snapshot that is rebuilt only after a write.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    capacity: usize,
    snapshot: Option<Arc<[Candle]>>,
}

impl CandleSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
            snapshot: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Apply one tick.
    pub fn on_tick(&mut self, price: Decimal, timestamp_ms: i64) -> TickEffect {
        if price <= Decimal::ZERO || timestamp_ms <= 0 {
            return TickEffect::Ignored;
        }

        let bucket = bucket_start(timestamp_ms);
        let effect = match self.candles.back_mut() {
            Some(last) if last.open_time == bucket => {
                last.absorb(price);
                TickEffect::Updated
            }
            Some(last) if last.open_time > bucket => {
                trace!(bucket, newest = last.open_time, "dropping out-of-order tick");
                return TickEffect::Ignored;
            }
            _ => {
                self.push(Candle::opened_at(bucket, price));
                TickEffect::Opened
            }
        };

        self.snapshot = None;
        effect
    }

    /// Append a finished candle, evicting the oldest once full.
    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
        self.snapshot = None;
    }

    /// Full history, oldest first.
    pub fn history(&mut self) -> Arc<[Candle]> {
        if let Some(snapshot) = &self.snapshot {
            return Arc::clone(snapshot);
        }
        let snapshot: Arc<[Candle]> = self.candles.iter().copied().collect();
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// History restricted to candles whose bucket has ended by `now_ms`.
    pub fn closed_history(&mut self, now_ms: i64) -> Arc<[Candle]> {
        let current = bucket_start(now_ms);
        let all = self.history();
        match all.last() {
            Some(last) if last.open_time >= current => all[..all.len() - 1].into(),
            _ => all,
        }
    }

    /// Number of candles that are closed at `now_ms`.
    pub fn closed_count(&self, now_ms: i64) -> usize {
        let current = bucket_start(now_ms);
        match self.candles.back() {
            Some(last) if last.open_time >= current => self.candles.len() - 1,
            _ => self.candles.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_040_000; // a minute boundary

    // -- Bucketing ----------------------------------------------------------

    #[test]
    fn test_bucket_start() {
        assert_eq!(bucket_start(T0), T0);
        assert_eq!(bucket_start(T0 + 59_999), T0);
        assert_eq!(bucket_start(T0 + 60_000), T0 + 60_000);
    }

    #[test]
    fn test_ticks_within_bucket_make_one_candle() {
        let mut series = CandleSeries::new(10);
        let prices = [dec!(1.1000), dec!(1.1004), dec!(1.0998), dec!(1.1001)];
        for (i, p) in prices.iter().enumerate() {
            series.on_tick(*p, T0 + i as i64 * 10_000);
        }

        let history = series.history();
        assert_eq!(history.len(), 1);
        let c = history[0];
        assert_eq!(c.open_time, T0);
        assert_eq!(c.open, dec!(1.1000));
        assert_eq!(c.high, dec!(1.1004));
        assert_eq!(c.low, dec!(1.0998));
        assert_eq!(c.close, dec!(1.1001));
        assert!(c.is_well_formed());
    }

    #[test]
    fn test_new_bucket_opens_new_candle() {
        let mut series = CandleSeries::new(10);
        assert_eq!(series.on_tick(dec!(1.1), T0), TickEffect::Opened);
        assert_eq!(series.on_tick(dec!(1.2), T0 + 1_000), TickEffect::Updated);
        assert_eq!(series.on_tick(dec!(1.3), T0 + 60_000), TickEffect::Opened);
        assert_eq!(series.len(), 2);
        assert_eq!(series.latest().unwrap().open, dec!(1.3));
    }

    // -- Malformed input ----------------------------------------------------

    #[test]
    fn test_rejects_bad_ticks() {
        let mut series = CandleSeries::new(10);
        assert_eq!(series.on_tick(dec!(0), T0), TickEffect::Ignored);
        assert_eq!(series.on_tick(dec!(-1.1), T0), TickEffect::Ignored);
        assert_eq!(series.on_tick(dec!(1.1), 0), TickEffect::Ignored);
        assert!(series.is_empty());

        series.on_tick(dec!(1.1), T0 + 60_000);
        assert_eq!(series.on_tick(dec!(1.5), T0), TickEffect::Ignored);
        assert_eq!(series.latest().unwrap().high, dec!(1.1));
    }

    // -- Ring buffer --------------------------------------------------------

    #[test]
    fn test_capacity_keeps_most_recent() {
        let capacity = 5;
        let mut series = CandleSeries::new(capacity);
        for i in 0..(capacity + 3) {
            series.on_tick(Decimal::from(i as u64 + 1), T0 + i as i64 * 60_000);
        }

        let history = series.history();
        assert_eq!(history.len(), capacity);
        let opens: Vec<Decimal> = history.iter().map(|c| c.open).collect();
        assert_eq!(
            opens,
            vec![dec!(4), dec!(5), dec!(6), dec!(7), dec!(8)]
        );
        assert!(history.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    // -- Snapshot cache -----------------------------------------------------

    #[test]
    fn test_snapshot_cached_until_write() {
        let mut series = CandleSeries::new(10);
        series.on_tick(dec!(1.1), T0);
        let a = series.history();
        let b = series.history();
        assert!(Arc::ptr_eq(&a, &b));

        series.on_tick(dec!(1.2), T0 + 5);
        let c = series.history();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c[0].close, dec!(1.2));
    }

    #[test]
    fn test_closed_history_excludes_forming_candle() {
        let mut series = CandleSeries::new(10);
        series.on_tick(dec!(1.1), T0);
        series.on_tick(dec!(1.2), T0 + 60_000);

        assert_eq!(series.closed_history(T0 + 61_000).len(), 1);
        assert_eq!(series.closed_count(T0 + 61_000), 1);
        assert_eq!(series.closed_history(T0 + 120_000).len(), 2);
        assert_eq!(series.closed_count(T0 + 120_000), 2);
    }
}
