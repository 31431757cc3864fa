//! The single owner of all mutable signal-engine state.
//!
//! `SignalService` is driven by the runtime loop: ticks go in through
//! [`ingest`](SignalService::ingest), timers call
//! [`tick_pass`](SignalService::tick_pass),
//! [`maybe_generate`](SignalService::maybe_generate) and
//! [`housekeeping`](SignalService::housekeeping). Nothing here blocks or
//! awaits.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::candle_aggregator::TickEffect;
use super::clock::Clock;
use super::engines::{DecisionEngine, InstrumentView, SignalContext};
use super::market_book::{InstrumentStatus, MarketBook};
use super::signal_ledger::{SignalGate, SignalLedger, Throttle};
use crate::config::{EngineConfig, SignalConfig};
use crate::types::{EngineKind, InstrumentId, Signal, SignalStats, Tick};

/// Answer to a metrics query.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub engine: EngineKind,
    pub stats: SignalStats,
    pub last_signal: Option<Signal>,
    pub confidence_cap: u8,
    pub instruments: BTreeMap<InstrumentId, InstrumentStatus>,
}

/// What one tick-timer pass did.
#[derive(Debug, Clone, Default)]
pub struct TickPass {
    pub finalized: Vec<Signal>,
    pub shadow_resolved: usize,
    pub freshness_changed: usize,
}

impl TickPass {
    /// Whether persisted statistics changed.
    pub fn changed_stats(&self) -> bool {
        !self.finalized.is_empty() || self.shadow_resolved > 0
    }
}

pub struct SignalService {
    settings: SignalConfig,
    engine: Box<dyn DecisionEngine>,
    book: MarketBook,
    ledger: SignalLedger,
    gate: SignalGate,
    clock: Arc<dyn Clock>,
}

impl SignalService {
    pub fn new(
        settings: SignalConfig,
        engine_config: &EngineConfig,
        engine: Box<dyn DecisionEngine>,
        ledger: SignalLedger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: SignalGate::new(settings.signal_interval_minutes),
            book: MarketBook::new(engine_config.aggregator.clone()),
            settings,
            engine,
            ledger,
            clock,
        }
    }

    /// Ledger throttles derived from signal settings.
    pub fn throttle(settings: &SignalConfig) -> Throttle {
        Throttle::from_secs(settings.min_signal_gap_secs, settings.instrument_cooldown_secs)
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn book(&self) -> &MarketBook {
        &self.book
    }

    pub fn ledger(&self) -> &SignalLedger {
        &self.ledger
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Fold a tick in. A missing timestamp is stamped with the clock.
    pub fn ingest(&mut self, mut tick: Tick) -> TickEffect {
        if tick.timestamp <= 0 {
            tick.timestamp = self.now();
        }
        self.book.on_tick(&tick)
    }

    /// Resolve due shadow trades and signals, then refresh freshness flags.
    pub fn tick_pass(&mut self) -> TickPass {
        let now = self.now();
        let mut pass = TickPass::default();

        let ids: Vec<InstrumentId> = self.book.iter().map(|(id, _)| id.clone()).collect();
        for id in ids {
            let Some(record) = self.book.get(&id) else {
                continue;
            };
            let Some(price) = record.last_price else {
                continue;
            };
            let Some(update) = self.engine.sync_learning(&record.state, price, now) else {
                continue;
            };
            for outcome in &update.resolved {
                debug!(
                    instrument = %id,
                    direction = %outcome.direction,
                    win = outcome.win,
                    pattern = %outcome.pattern,
                    "shadow trade resolved"
                );
                self.ledger.apply_shadow_outcome(outcome.win);
            }
            pass.shadow_resolved += update.resolved.len();
            self.book.set_state(&id, update.state);
        }

        let book = &self.book;
        pass.finalized = self.ledger.finalize_due(now, |instrument| book.price(instrument));
        pass.freshness_changed = self.book.refresh_frozen(now).len();
        pass
    }

    /// Flux measurement.
    pub fn housekeeping(&mut self) -> bool {
        let now = self.now();
        self.book.measure_flux(now)
    }

    /// Generate once per interval boundary.
    pub fn maybe_generate(&mut self) -> Option<Signal> {
        let now = self.now();
        if !self.gate.try_fire(now) {
            return None;
        }
        self.generate()
    }

    /// Run the decision engine over every eligible instrument and publish
    /// the best signal if it clears the confidence floor and the throttles.
    pub fn generate(&mut self) -> Option<Signal> {
        let now = self.now();
        let eligible = self.book.eligible(
            now,
            self.settings.warmup_candles_count.max(self.engine.min_candles()),
            self.settings.min_payout_percent,
        );
        if eligible.is_empty() {
            debug!(instruments = self.book.len(), "no instrument eligible for signals");
            return None;
        }

        let ctx = SignalContext {
            now,
            expiry_minutes: self.settings.trade_duration_minutes,
        };
        let output = {
            let views: Vec<InstrumentView<'_>> = eligible
                .iter()
                .filter_map(|e| {
                    self.book.get(&e.instrument).map(|record| InstrumentView {
                        instrument: &e.instrument,
                        candles: &e.candles,
                        state: &record.state,
                        flux: e.flux,
                    })
                })
                .collect();
            self.engine.process_snapshot(&views, &ctx)
        };
        for (id, state) in output.states {
            self.book.set_state(&id, state);
        }

        let mut signal = output.signal?;
        if signal.confidence < self.settings.min_confidence_percent {
            debug!(
                instrument = %signal.instrument,
                confidence = signal.confidence,
                minimum = self.settings.min_confidence_percent,
                "best signal below confidence floor"
            );
            return None;
        }
        if let Err(e) = self.ledger.check_throttle(&signal.instrument, now) {
            debug!(instrument = %signal.instrument, error = %e, "signal suppressed");
            return None;
        }

        let cap = self.ledger.confidence_cap();
        if signal.confidence > cap {
            info!(
                confidence = signal.confidence,
                cap,
                streak = self.ledger.stats().consecutive_losses,
                "capping confidence during losing streak"
            );
            signal.confidence = cap;
            signal.reasons.push(format!("confidence capped at {cap}% after losses"));
        }

        Some(self.ledger.record(signal))
    }

    pub fn metrics(&self) -> MetricsReport {
        let now = self.now();
        MetricsReport {
            engine: self.engine.kind(),
            stats: self.ledger.stats().clone(),
            last_signal: self.ledger.last_signal().cloned(),
            confidence_cap: self.ledger.confidence_cap(),
            instruments: self.book.status(now, self.settings.warmup_candles_count),
        }
    }

    /// Trim in-memory history to what the store kept.
    pub fn prune_history(&mut self, keep: usize) -> usize {
        self.ledger.prune_history(keep)
    }

    /// Current counters and history for persistence.
    pub fn snapshot(&self) -> (SignalStats, Vec<Signal>) {
        (
            self.ledger.stats().clone(),
            self.ledger.history().cloned().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerParams;
    use crate::core::clock::ManualClock;
    use crate::core::engines::build_engine;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_040_000;

    fn service(kind: EngineKind, clock: Arc<ManualClock>) -> SignalService {
        let settings = SignalConfig {
            min_confidence_percent: 0,
            min_signal_gap_secs: 0,
            instrument_cooldown_secs: 0,
            warmup_candles_count: 30,
            engine: kind,
            ..Default::default()
        };
        let config = EngineConfig::default();
        let ledger = SignalLedger::new(LedgerParams::default(), SignalService::throttle(&settings));
        SignalService::new(settings, &config, build_engine(kind, &config), ledger, clock)
    }

    fn feed_minutes(svc: &mut SignalService, clock: &ManualClock, instrument: &str, minutes: i64) {
        for m in 0..minutes {
            let wiggle = Decimal::from(m % 7) * dec!(0.0003);
            for s in [0, 20, 40] {
                clock.set(T0 + m * 60_000 + s * 1_000);
                let price = dec!(1.1000) + wiggle + Decimal::from(s) * dec!(0.00001);
                svc.ingest(Tick {
                    instrument: instrument.into(),
                    price,
                    timestamp: 0,
                    payout: None,
                });
            }
        }
    }

    #[test]
    fn test_no_signal_before_warmup() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Scoring, clock.clone());
        feed_minutes(&mut svc, &clock, "EURUSD", 10);
        assert!(svc.generate().is_none());
        let metrics = svc.metrics();
        assert!(!metrics.instruments["EURUSD"].warmup_complete);
    }

    #[test]
    fn test_scoring_signal_recorded_and_finalized() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Scoring, clock.clone());
        feed_minutes(&mut svc, &clock, "EURUSD", 45);

        let signal = svc.generate().expect("scoring always decides once warmed up");
        assert_eq!(signal.id, 1);
        assert_eq!(svc.ledger().stats().total, 1);

        clock.set(signal.expires_at());
        let pass = svc.tick_pass();
        assert_eq!(pass.finalized.len(), 1);
        assert!(pass.changed_stats());
        assert!(svc.ledger().last_signal().unwrap().is_resolved());
    }

    #[test]
    fn test_gate_limits_generation_per_boundary() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Scoring, clock.clone());
        feed_minutes(&mut svc, &clock, "EURUSD", 45);

        let boundary = clock.now_ms() - clock.now_ms() % 60_000 + 60_000;
        clock.set(boundary + 500);
        assert!(svc.maybe_generate().is_some());
        clock.set(boundary + 1_500);
        assert!(svc.maybe_generate().is_none());
    }

    #[test]
    fn test_confidence_floor_suppresses() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Scoring, clock.clone());
        svc.settings.min_confidence_percent = 100;
        feed_minutes(&mut svc, &clock, "EURUSD", 45);
        assert!(svc.generate().is_none());
        assert_eq!(svc.ledger().stats().total, 0);
    }

    #[test]
    fn test_out_of_range_ticks_never_reach_the_engine() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Scoring, clock.clone());
        for m in 0..45 {
            for s in [0, 20, 40] {
                clock.set(T0 + m * 60_000 + s * 1_000);
                let price = if s == 20 { dec!(3_000_000_000_000_000) } else { dec!(1_000_000_000_000_000) };
                assert_eq!(
                    svc.ingest(Tick {
                        instrument: "EURUSD".into(),
                        price,
                        timestamp: 0,
                        payout: None,
                    }),
                    TickEffect::Ignored
                );
            }
        }
        assert!(svc.book().is_empty());
        assert!(svc.generate().is_none());
    }

    #[test]
    fn test_frozen_instrument_excluded() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Scoring, clock.clone());
        feed_minutes(&mut svc, &clock, "EURUSD", 45);
        clock.advance(120_000);
        let pass = svc.tick_pass();
        assert_eq!(pass.freshness_changed, 1);
        assert!(svc.generate().is_none());
        assert!(svc.metrics().instruments["EURUSD"].frozen);
    }

    #[test]
    fn test_ranking_engine_learns_through_tick_pass() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut svc = service(EngineKind::Nexus, clock.clone());
        feed_minutes(&mut svc, &clock, "EURUSD", 45);
        svc.generate();
        assert_eq!(svc.book().get("EURUSD").unwrap().state.reliability.pending.len(), 1);

        clock.advance(3 * 60_000);
        svc.ingest(Tick {
            instrument: "EURUSD".into(),
            price: dec!(1.1050),
            timestamp: 0,
            payout: None,
        });
        let pass = svc.tick_pass();
        assert_eq!(pass.shadow_resolved, 1);
        assert_eq!(svc.book().get("EURUSD").unwrap().state.reliability.samples(), 1);
    }
}
