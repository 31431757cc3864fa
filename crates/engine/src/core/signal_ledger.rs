//! Signal lifecycle: record, schedule, finalize, throttle.
//!
//! The ledger owns the aggregate counters and the bounded history. Every
//! recorded signal is scheduled for finalisation at its expiry; the runtime
//! drains due entries with [`SignalLedger::finalize_due`] on each tick pass.

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::clock::Scheduler;
use crate::config::LedgerParams;
use crate::constants::{MS_PER_MINUTE, MS_PER_SECOND};
use crate::errors::EngineError;
use crate::types::{InstrumentId, Outcome, Signal, SignalStats};

/// Delay before retrying a finalisation that had no price.
const FINALIZE_RETRY_MS: i64 = 5 * MS_PER_SECOND;

/// Losing streak lengths at which displayed confidence is capped.
const STREAK_CAPS: [(u32, u8); 2] = [(5, 50), (3, 60)];

/// Publication throttles.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub min_gap_ms: i64,
    pub instrument_cooldown_ms: i64,
}

impl Throttle {
    pub fn from_secs(min_gap_secs: u64, instrument_cooldown_secs: u64) -> Self {
        let ms = |s: u64| i64::try_from(s).unwrap_or(i64::MAX / MS_PER_SECOND) * MS_PER_SECOND;
        Self {
            min_gap_ms: ms(min_gap_secs),
            instrument_cooldown_ms: ms(instrument_cooldown_secs),
        }
    }
}

pub struct SignalLedger {
    params: LedgerParams,
    throttle: Throttle,
    stats: SignalStats,
    /// Most recent last.
    history: VecDeque<Signal>,
    /// Recorded but unresolved, by id.
    open: BTreeMap<u64, Signal>,
    schedule: Scheduler<u64>,
    next_id: u64,
    last_published_at: Option<i64>,
    instrument_published_at: BTreeMap<InstrumentId, i64>,
}

impl SignalLedger {
    pub fn new(params: LedgerParams, throttle: Throttle) -> Self {
        Self::restore(params, throttle, SignalStats::default(), Vec::new())
    }

    /// Rebuild from persisted state. Unresolved history entries are
    /// rescheduled at their original expiry.
    pub fn restore(
        params: LedgerParams,
        throttle: Throttle,
        stats: SignalStats,
        history: Vec<Signal>,
    ) -> Self {
        let mut ledger = Self {
            params,
            throttle,
            stats,
            history: VecDeque::new(),
            open: BTreeMap::new(),
            schedule: Scheduler::new(),
            next_id: 1,
            last_published_at: None,
            instrument_published_at: BTreeMap::new(),
        };
        for signal in history {
            ledger.next_id = ledger.next_id.max(signal.id + 1);
            if !signal.is_resolved() {
                ledger.schedule.schedule(signal.expires_at(), signal.id);
                ledger.open.insert(signal.id, signal.clone());
            }
            ledger.push_history(signal);
        }
        ledger
    }

    pub fn stats(&self) -> &SignalStats {
        &self.stats
    }

    pub fn history(&self) -> impl Iterator<Item = &Signal> {
        self.history.iter()
    }

    pub fn last_signal(&self) -> Option<&Signal> {
        self.history.back()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn push_history(&mut self, signal: Signal) {
        self.history.push_back(signal);
        while self.history.len() > self.params.history_cap {
            self.history.pop_front();
        }
    }

    // -----------------------------------------------------------------------
    // Throttling
    // -----------------------------------------------------------------------

    /// Whether a signal on `instrument` may be published at `now`.
    pub fn check_throttle(&self, instrument: &str, now: i64) -> Result<(), EngineError> {
        if let Some(last) = self.last_published_at {
            let elapsed = now - last;
            if elapsed < self.throttle.min_gap_ms {
                return Err(EngineError::Throttled {
                    reason: format!(
                        "global gap: {}s remaining",
                        (self.throttle.min_gap_ms - elapsed) / MS_PER_SECOND
                    ),
                });
            }
        }
        if let Some(last) = self.instrument_published_at.get(instrument) {
            let elapsed = now - last;
            if elapsed < self.throttle.instrument_cooldown_ms {
                return Err(EngineError::Throttled {
                    reason: format!(
                        "{instrument} cooldown: {}s remaining",
                        (self.throttle.instrument_cooldown_ms - elapsed) / MS_PER_SECOND
                    ),
                });
            }
        }
        Ok(())
    }

    /// Displayed-confidence ceiling for the current losing streak.
    pub fn confidence_cap(&self) -> u8 {
        STREAK_CAPS
            .iter()
            .find(|(streak, _)| self.stats.consecutive_losses >= *streak)
            .map_or(100, |&(_, cap)| cap)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Store `signal` as the most recent one, count it and schedule its
    /// finalisation. Returns the signal with its id assigned.
    pub fn record(&mut self, mut signal: Signal) -> Signal {
        signal.id = self.next_id;
        self.next_id += 1;
        signal.outcome = Outcome::Pending;
        signal.exit_price = None;

        self.stats.total += 1;
        if signal.confidence >= self.params.high_confidence_percent {
            self.stats.high_conf_total += 1;
        }
        self.last_published_at = Some(signal.created_at);
        self.instrument_published_at
            .insert(signal.instrument.clone(), signal.created_at);

        self.schedule.schedule(signal.expires_at(), signal.id);
        self.open.insert(signal.id, signal.clone());
        self.push_history(signal.clone());

        info!(
            id = signal.id,
            instrument = %signal.instrument,
            direction = %signal.direction,
            confidence = signal.confidence,
            expiry_minutes = signal.expiry_minutes,
            entry = %signal.entry_price,
            "signal recorded"
        );
        signal
    }

    /// Resolve signal `id` against `price`. A no-op returning `None` when the
    /// signal is unknown, already resolved, or `price` is missing.
    pub fn finalize(&mut self, id: u64, price: Option<Decimal>) -> Option<Signal> {
        let price = price?;
        let mut signal = self.open.remove(&id)?;

        let win = signal.direction.wins(signal.entry_price, price);
        signal.outcome = if win { Outcome::Win } else { Outcome::Loss };
        signal.exit_price = Some(price);

        let high = signal.confidence >= self.params.high_confidence_percent;
        if win {
            self.stats.wins += 1;
            self.stats.consecutive_losses = 0;
            if high {
                self.stats.high_conf_wins += 1;
            }
        } else {
            self.stats.losses += 1;
            self.stats.consecutive_losses += 1;
            if high {
                self.stats.high_conf_losses += 1;
            }
        }

        if let Some(entry) = self.history.iter_mut().find(|s| s.id == id) {
            *entry = signal.clone();
        }

        info!(
            id,
            instrument = %signal.instrument,
            outcome = ?signal.outcome,
            entry = %signal.entry_price,
            exit = %price,
            streak = self.stats.consecutive_losses,
            "signal finalized"
        );
        Some(signal)
    }

    /// Finalize every signal whose expiry has passed. Signals without a
    /// price are retried shortly after.
    pub fn finalize_due<F>(&mut self, now: i64, price_of: F) -> Vec<Signal>
    where
        F: Fn(&str) -> Option<Decimal>,
    {
        let mut resolved = Vec::new();
        for id in self.schedule.pop_due(now) {
            let Some(instrument) = self.open.get(&id).map(|s| s.instrument.clone()) else {
                continue;
            };
            let price = price_of(&instrument);
            if price.is_none() {
                debug!(id, %instrument, "no price at expiry, retrying");
                self.schedule.schedule(now + FINALIZE_RETRY_MS, id);
                continue;
            }
            resolved.extend(self.finalize(id, price));
        }
        resolved
    }

    /// Feed a shadow-trade outcome. A shadow win during a long enough losing
    /// streak shortens it by one; returns whether it did.
    pub fn apply_shadow_outcome(&mut self, win: bool) -> bool {
        if win && self.stats.consecutive_losses >= self.params.shadow_recovery_streak {
            self.stats.consecutive_losses -= 1;
            debug!(
                streak = self.stats.consecutive_losses,
                "shadow recovery shortened losing streak"
            );
            return true;
        }
        false
    }

    /// Keep only the newest `keep` history entries, matching what the store
    /// could hold. Open signals stay tracked. Returns how many were dropped.
    pub fn prune_history(&mut self, keep: usize) -> usize {
        let drop = self.history.len().saturating_sub(keep);
        if drop > 0 {
            self.history.drain(..drop);
            warn!(dropped = drop, kept = self.history.len(), "pruned signal history");
        }
        drop
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Interval gate
// ═══════════════════════════════════════════════════════════════════════════

/// How long after an interval boundary a generation may still start.
const GATE_WINDOW_MS: i64 = 10 * MS_PER_SECOND;

/// Allows at most one generation per wall-clock interval boundary.
#[derive(Debug, Clone)]
pub struct SignalGate {
    interval_ms: i64,
    last_boundary: Option<i64>,
}

impl SignalGate {
    pub fn new(interval_minutes: u32) -> Self {
        Self {
            interval_ms: i64::from(interval_minutes.max(1)) * MS_PER_MINUTE,
            last_boundary: None,
        }
    }

    /// Claim the boundary `now` falls in. True at most once per boundary,
    /// and only within a short window after it.
    pub fn try_fire(&mut self, now: i64) -> bool {
        let boundary = now - now.rem_euclid(self.interval_ms);
        if now - boundary >= GATE_WINDOW_MS || self.last_boundary == Some(boundary) {
            return false;
        }
        self.last_boundary = Some(boundary);
        true
    }

    pub fn last_boundary(&self) -> Option<i64> {
        self.last_boundary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_040_000;

    fn ledger() -> SignalLedger {
        SignalLedger::new(LedgerParams::default(), Throttle::from_secs(20, 120))
    }

    fn signal(instrument: &str, direction: Direction, confidence: u8, at: i64) -> Signal {
        Signal::new(instrument, direction, confidence, 3, dec!(1.1000), vec![], at)
    }

    // -- Recording and finalisation ----------------------------------------

    #[test]
    fn test_record_counts_and_assigns_ids() {
        let mut l = ledger();
        let a = l.record(signal("EURUSD", Direction::Buy, 80, T0));
        let b = l.record(signal("GBPUSD", Direction::Sell, 60, T0));
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(l.stats().total, 2);
        assert_eq!(l.stats().high_conf_total, 1);
        assert_eq!(l.last_signal().map(|s| s.id), Some(2));
        assert_eq!(l.open_count(), 2);
    }

    #[test]
    fn test_finalize_due_at_expiry() {
        let mut l = ledger();
        let s = l.record(signal("EURUSD", Direction::Buy, 80, T0));

        assert!(l.finalize_due(s.expires_at() - 1, |_| Some(dec!(1.2))).is_empty());
        let done = l.finalize_due(s.expires_at(), |_| Some(dec!(1.1010)));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].outcome, Outcome::Win);
        assert_eq!(done[0].exit_price, Some(dec!(1.1010)));
        assert_eq!(l.stats().wins, 1);
        assert_eq!(l.stats().high_conf_wins, 1);
        assert_eq!(l.history().next().unwrap().outcome, Outcome::Win);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut l = ledger();
        let s = l.record(signal("EURUSD", Direction::Sell, 50, T0));
        assert!(l.finalize(s.id, None).is_none());
        assert!(l.finalize(s.id, Some(dec!(1.1000))).is_some());
        assert!(l.finalize(s.id, Some(dec!(1.0))).is_none());
        assert_eq!(l.stats().losses, 1);
        assert_eq!(l.stats().wins, 0);
    }

    #[test]
    fn test_missing_price_retries() {
        let mut l = ledger();
        let s = l.record(signal("EURUSD", Direction::Buy, 80, T0));
        assert!(l.finalize_due(s.expires_at(), |_| None).is_empty());
        assert_eq!(l.open_count(), 1);
        let done = l.finalize_due(s.expires_at() + FINALIZE_RETRY_MS, |_| Some(dec!(1.0)));
        assert_eq!(done[0].outcome, Outcome::Loss);
    }

    #[test]
    fn test_history_cap() {
        let params = LedgerParams {
            history_cap: 3,
            ..Default::default()
        };
        let mut l = SignalLedger::new(params, Throttle::from_secs(0, 0));
        for i in 0..5 {
            l.record(signal("EURUSD", Direction::Buy, 70, T0 + i));
        }
        let ids: Vec<u64> = l.history().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        // Evicted signals still finalize.
        assert_eq!(l.finalize_due(T0 + 10 * MS_PER_MINUTE, |_| Some(dec!(1.2))).len(), 5);
    }

    #[test]
    fn test_restore_reschedules_pending() {
        let mut l = ledger();
        l.record(signal("EURUSD", Direction::Buy, 80, T0));
        let history: Vec<Signal> = l.history().cloned().collect();
        let mut restored =
            SignalLedger::restore(LedgerParams::default(), Throttle::from_secs(0, 0), l.stats().clone(), history);
        assert_eq!(restored.open_count(), 1);
        assert_eq!(restored.record(signal("GBPUSD", Direction::Buy, 80, T0)).id, 2);
    }

    // -- Streaks ------------------------------------------------------------

    #[test]
    fn test_confidence_cap_follows_streak() {
        let mut l = SignalLedger::new(LedgerParams::default(), Throttle::from_secs(0, 0));
        assert_eq!(l.confidence_cap(), 100);
        for i in 0..5 {
            let s = l.record(signal("EURUSD", Direction::Buy, 80, T0 + i));
            l.finalize(s.id, Some(dec!(1.0)));
            if i == 2 {
                assert_eq!(l.confidence_cap(), 60);
            }
        }
        assert_eq!(l.confidence_cap(), 50);

        let s = l.record(signal("EURUSD", Direction::Buy, 80, T0));
        l.finalize(s.id, Some(dec!(2.0)));
        assert_eq!(l.confidence_cap(), 100);
    }

    #[test]
    fn test_shadow_recovery() {
        let mut l = SignalLedger::new(LedgerParams::default(), Throttle::from_secs(0, 0));
        let s = l.record(signal("EURUSD", Direction::Buy, 80, T0));
        l.finalize(s.id, Some(dec!(1.0)));
        assert!(!l.apply_shadow_outcome(true));

        let s = l.record(signal("EURUSD", Direction::Buy, 80, T0));
        l.finalize(s.id, Some(dec!(1.0)));
        assert!(!l.apply_shadow_outcome(false));
        assert!(l.apply_shadow_outcome(true));
        assert_eq!(l.stats().consecutive_losses, 1);
    }

    // -- Throttling ---------------------------------------------------------

    #[test]
    fn test_throttles() {
        let mut l = ledger();
        assert!(l.check_throttle("EURUSD", T0).is_ok());
        l.record(signal("EURUSD", Direction::Buy, 80, T0));

        let err = l.check_throttle("GBPUSD", T0 + 5_000).unwrap_err();
        assert!(err.to_string().contains("global gap"));
        assert!(l.check_throttle("GBPUSD", T0 + 20_000).is_ok());

        let err = l.check_throttle("EURUSD", T0 + 60_000).unwrap_err();
        assert!(err.to_string().contains("EURUSD cooldown"));
        assert!(l.check_throttle("EURUSD", T0 + 120_000).is_ok());
    }

    #[test]
    fn test_prune_history_keeps_newest() {
        let mut l = SignalLedger::new(LedgerParams::default(), Throttle::from_secs(0, 0));
        for i in 0..10 {
            l.record(signal("EURUSD", Direction::Buy, 80, T0 + i));
        }
        assert_eq!(l.prune_history(5), 5);
        assert_eq!(l.history().next().map(|s| s.id), Some(6));
        assert_eq!(l.prune_history(5), 0);

        // Pruned signals still settle.
        assert_eq!(l.open_count(), 10);
        assert!(l.finalize(1, Some(dec!(1.2))).is_some());
        assert_eq!(l.stats().wins + l.stats().losses, 1);
    }

    // -- Gate ---------------------------------------------------------------

    #[test]
    fn test_gate_fires_once_per_boundary() {
        let mut gate = SignalGate::new(1);
        let boundary = 1_700_000_040_000 - 1_700_000_040_000 % 60_000;
        assert!(gate.try_fire(boundary + 200));
        assert!(!gate.try_fire(boundary + 1_200));
        assert!(!gate.try_fire(boundary + 30_000));
        assert!(gate.try_fire(boundary + 60_000));
        assert_eq!(gate.last_boundary(), Some(boundary + 60_000));
    }

    #[test]
    fn test_gate_respects_interval() {
        let mut gate = SignalGate::new(5);
        let base = 5 * 60_000 * 1000;
        assert!(gate.try_fire(base));
        assert!(!gate.try_fire(base + 60_000));
        assert!(gate.try_fire(base + 5 * 60_000 + 3_000));
    }
}
