//! Per-instrument registry.
//!
//! One [`InstrumentRecord`] per instrument holds everything known about it:
//! candles, last price, freshness markers, tick flux, payout and the decision
//! engine's state. Records are created lazily on the first valid tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::candle_aggregator::{CandleSeries, TickEffect};
use crate::config::AggregatorParams;
use crate::constants::{MS_PER_MINUTE, MS_PER_SECOND};
use crate::core::indicators::safe_div;
use crate::types::{Candle, EngineState, InstrumentId, Tick};

#[derive(Debug, Clone)]
pub struct InstrumentRecord {
    pub candles: CandleSeries,
    pub last_price: Option<Decimal>,
    /// When the price last moved.
    pub last_change_at: Option<i64>,
    pub last_tick_at: Option<i64>,
    /// Ticks per minute over the last housekeeping window.
    pub flux: Decimal,
    pub payout: Option<u8>,
    pub frozen: bool,
    pub state: EngineState,
    ticks_in_window: u64,
}

impl InstrumentRecord {
    fn new(capacity: usize) -> Self {
        Self {
            candles: CandleSeries::new(capacity),
            last_price: None,
            last_change_at: None,
            last_tick_at: None,
            flux: Decimal::ZERO,
            payout: None,
            frozen: false,
            state: EngineState::default(),
            ticks_in_window: 0,
        }
    }
}

/// Per-instrument line of the metrics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentStatus {
    #[serde(with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    pub candle_count: usize,
    pub warmup_complete: bool,
    pub frozen: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub flux: Decimal,
    pub payout: Option<u8>,
}

/// An instrument ready for signal generation.
#[derive(Debug, Clone)]
pub struct EligibleInstrument {
    pub instrument: InstrumentId,
    /// Closed candles only.
    pub candles: Arc<[Candle]>,
    pub flux: Decimal,
}

pub struct MarketBook {
    params: AggregatorParams,
    records: BTreeMap<InstrumentId, InstrumentRecord>,
    window_started_at: Option<i64>,
}

impl MarketBook {
    pub fn new(params: AggregatorParams) -> Self {
        Self {
            params,
            records: BTreeMap::new(),
            window_started_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, instrument: &str) -> Option<&InstrumentRecord> {
        self.records.get(instrument)
    }

    pub fn get_mut(&mut self, instrument: &str) -> Option<&mut InstrumentRecord> {
        self.records.get_mut(instrument)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstrumentId, &InstrumentRecord)> {
        self.records.iter()
    }

    pub fn price(&self, instrument: &str) -> Option<Decimal> {
        self.records.get(instrument).and_then(|r| r.last_price)
    }

    /// Fold one tick into its instrument. Malformed ticks change nothing.
    pub fn on_tick(&mut self, tick: &Tick) -> TickEffect {
        if tick.instrument.is_empty() || tick.price <= Decimal::ZERO || tick.timestamp <= 0 {
            debug!(instrument = %tick.instrument, price = %tick.price, "dropping malformed tick");
            return TickEffect::Ignored;
        }
        if tick.price > self.params.max_price {
            warn!(
                instrument = %tick.instrument,
                price = %tick.price,
                max_price = %self.params.max_price,
                "dropping out-of-range tick"
            );
            return TickEffect::Ignored;
        }

        let capacity = self.params.capacity;
        let record = self
            .records
            .entry(tick.instrument.clone())
            .or_insert_with(|| {
                info!(instrument = %tick.instrument, "tracking new instrument");
                InstrumentRecord::new(capacity)
            });

        let effect = record.candles.on_tick(tick.price, tick.timestamp);
        if effect == TickEffect::Ignored {
            return effect;
        }

        if record.last_price != Some(tick.price) {
            record.last_change_at = Some(tick.timestamp);
        }
        record.last_price = Some(tick.price);
        record.last_tick_at = Some(tick.timestamp);
        record.ticks_in_window += 1;
        if let Some(payout) = tick.payout {
            record.payout = Some(payout.min(100));
        }
        effect
    }

    /// Recompute frozen flags. Returns instruments whose flag changed.
    pub fn refresh_frozen(&mut self, now: i64) -> Vec<(InstrumentId, bool)> {
        let frozen_ms = secs_to_ms(self.params.frozen_after_secs);
        let stale_ms = secs_to_ms(self.params.stale_after_secs);
        let mut changed = Vec::new();

        for (id, record) in &mut self.records {
            let unchanged = record.last_change_at.is_some_and(|t| now - t >= frozen_ms);
            let silent = record.last_tick_at.is_some_and(|t| now - t >= stale_ms);
            let frozen = unchanged || silent;
            if frozen != record.frozen {
                record.frozen = frozen;
                info!(instrument = %id, frozen, unchanged, silent, "instrument freshness changed");
                changed.push((id.clone(), frozen));
            }
        }
        changed
    }

    /// Close the flux window once it has run its length; ticks per minute.
    pub fn measure_flux(&mut self, now: i64) -> bool {
        let started = *self.window_started_at.get_or_insert(now);
        let elapsed = now - started;
        if elapsed < secs_to_ms(self.params.flux_window_secs) || elapsed <= 0 {
            return false;
        }
        let minute = Decimal::from(MS_PER_MINUTE);
        for record in self.records.values_mut() {
            record.flux = safe_div(Decimal::from(record.ticks_in_window) * minute, Decimal::from(elapsed));
            record.ticks_in_window = 0;
        }
        self.window_started_at = Some(now);
        true
    }

    /// Instruments that may be analysed at `now`: fresh, warmed up and, when
    /// the payout is known, paying at least `min_payout`.
    pub fn eligible(&mut self, now: i64, warmup: usize, min_payout: u8) -> Vec<EligibleInstrument> {
        let mut out = Vec::new();
        for (id, record) in &mut self.records {
            if record.frozen {
                continue;
            }
            if record.payout.is_some_and(|p| p < min_payout) {
                debug!(instrument = %id, payout = ?record.payout, "payout below minimum");
                continue;
            }
            if record.candles.closed_count(now) < warmup {
                continue;
            }
            out.push(EligibleInstrument {
                instrument: id.clone(),
                candles: record.candles.closed_history(now),
                flux: record.flux,
            });
        }
        out
    }

    pub fn set_state(&mut self, instrument: &str, state: EngineState) {
        if let Some(record) = self.records.get_mut(instrument) {
            record.state = state;
        }
    }

    pub fn status(&self, now: i64, warmup: usize) -> BTreeMap<InstrumentId, InstrumentStatus> {
        self.records
            .iter()
            .map(|(id, r)| {
                let closed = r.candles.closed_count(now);
                (
                    id.clone(),
                    InstrumentStatus {
                        price: r.last_price,
                        candle_count: closed,
                        warmup_complete: closed >= warmup,
                        frozen: r.frozen,
                        flux: r.flux,
                        payout: r.payout,
                    },
                )
            })
            .collect()
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / MS_PER_SECOND) * MS_PER_SECOND
}
