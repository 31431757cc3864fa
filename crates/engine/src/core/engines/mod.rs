//! Decision engines: turn candle history into a directional signal.
//!
//! Every implementation honours the same contract: insufficient history
//! yields no signal and an unchanged state, confidence is clamped to
//! [0, 100], and an emitted signal always carries BUY or SELL.

pub mod learning;
pub mod ranking;
pub mod scoring;
pub mod sequence;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::EngineConfig;
use crate::core::smc::SmcAnalyzer;
use crate::types::{
    Candle, Direction, EngineKind, EngineState, InstrumentId, MarketPhase, ShadowOutcome, Signal,
};

use self::ranking::RankingEngine;
use self::scoring::ScoringEngine;
use self::sequence::SequenceEngine;

/// Per-cycle inputs shared by all instruments.
#[derive(Debug, Clone, Copy)]
pub struct SignalContext {
    /// Unix milliseconds.
    pub now: i64,
    /// Configured trade duration; engines that choose their own ignore it.
    pub expiry_minutes: u32,
}

/// One instrument as seen by a cross-instrument pass.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentView<'a> {
    pub instrument: &'a str,
    /// Closed candles only, oldest first.
    pub candles: &'a [Candle],
    pub state: &'a EngineState,
    /// Ticks per minute.
    pub flux: Decimal,
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub signal: Option<Signal>,
    pub state: EngineState,
}

impl EngineOutput {
    pub fn unchanged(state: &EngineState) -> Self {
        Self {
            signal: None,
            state: state.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotOutput {
    pub signal: Option<Signal>,
    pub states: Vec<(InstrumentId, EngineState)>,
}

/// Result of resolving due shadow trades against a fresh price.
#[derive(Debug, Clone)]
pub struct LearningUpdate {
    pub state: EngineState,
    pub resolved: Vec<ShadowOutcome>,
}

pub trait DecisionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Closed candles an instrument needs before it can be evaluated.
    fn min_candles(&self) -> usize;

    /// Evaluate one instrument. The returned state replaces `state`.
    fn generate_signal(
        &self,
        candles: &[Candle],
        instrument: &str,
        state: &EngineState,
        ctx: &SignalContext,
    ) -> EngineOutput;

    /// Evaluate every instrument and keep the single best signal. The
    /// default runs [`generate_signal`](Self::generate_signal) per
    /// instrument; highest confidence wins, earlier instruments win ties.
    fn process_snapshot(&self, views: &[InstrumentView<'_>], ctx: &SignalContext) -> SnapshotOutput {
        let mut out = SnapshotOutput::default();
        for view in views {
            let result = self.generate_signal(view.candles, view.instrument, view.state, ctx);
            if let Some(signal) = result.signal {
                let better = out
                    .signal
                    .as_ref()
                    .map_or(true, |best| signal.confidence > best.confidence);
                if better {
                    out.signal = Some(signal);
                }
            }
            out.states.push((view.instrument.to_string(), result.state));
        }
        out
    }

    /// Resolve shadow trades due at `now`. Engines without shadow learning
    /// return `None`.
    fn sync_learning(&self, _state: &EngineState, _price: Decimal, _now: i64) -> Option<LearningUpdate> {
        None
    }
}

/// Build the engine selected in configuration.
pub fn build_engine(kind: EngineKind, config: &EngineConfig) -> Box<dyn DecisionEngine> {
    let analyzer = SmcAnalyzer::new(config.indicators.clone(), config.smc.clone());
    match kind {
        EngineKind::Scoring => Box::new(ScoringEngine::new(analyzer, config.scoring.clone())),
        EngineKind::Sequence => Box::new(SequenceEngine::new(
            kind,
            analyzer,
            config.sequence.classic.clone(),
        )),
        EngineKind::SequenceRelaxed => Box::new(SequenceEngine::new(
            kind,
            analyzer,
            config.sequence.relaxed.clone(),
        )),
        EngineKind::DeepSight => Box::new(RankingEngine::new(
            kind,
            analyzer,
            config.ranking.deep_sight.clone(),
        )),
        EngineKind::Nexus => Box::new(RankingEngine::new(
            kind,
            analyzer,
            config.ranking.nexus.clone(),
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Score → confidence lookup, linearly interpolated between points.
const CONFIDENCE_TABLE: [(Decimal, Decimal); 7] = [
    (dec!(0), dec!(10)),
    (dec!(20), dec!(35)),
    (dec!(40), dec!(50)),
    (dec!(60), dec!(65)),
    (dec!(80), dec!(78)),
    (dec!(100), dec!(88)),
    (dec!(130), dec!(95)),
];

/// Map a non-negative point score onto a confidence percentage.
pub fn score_to_confidence(score: Decimal) -> Decimal {
    let score = score.max(Decimal::ZERO);
    for pair in CONFIDENCE_TABLE.windows(2) {
        let ((s0, c0), (s1, c1)) = (pair[0], pair[1]);
        if score <= s1 {
            return c0 + (c1 - c0) * (score - s0) / (s1 - s0);
        }
    }
    CONFIDENCE_TABLE[CONFIDENCE_TABLE.len() - 1].1
}

/// Round and clamp a confidence into `[floor, 100]`.
pub fn clamp_confidence(value: Decimal, floor: u8) -> u8 {
    value
        .round()
        .clamp(Decimal::from(floor), dec!(100))
        .to_u8()
        .unwrap_or(floor)
}

/// Trade duration from confidence tier and market phase.
pub fn duration_for(confidence: u8, phase: MarketPhase) -> u32 {
    let high = confidence >= 75;
    match (phase, high) {
        (MarketPhase::Expansion, true) => 2,
        (MarketPhase::Expansion, false) | (MarketPhase::Ranging, true) => 3,
        _ => 5,
    }
}

/// Colour of the newest candle; a flat candle reads as BUY.
pub fn candle_color(candle: &Candle) -> Direction {
    if candle.close < candle.open {
        Direction::Sell
    } else {
        Direction::Buy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DURATION_CHOICES_MINUTES;

    #[test]
    fn test_confidence_table_points_and_interpolation() {
        assert_eq!(score_to_confidence(dec!(0)), dec!(10));
        assert_eq!(score_to_confidence(dec!(10)), dec!(22.5));
        assert_eq!(score_to_confidence(dec!(40)), dec!(50));
        assert_eq!(score_to_confidence(dec!(90)), dec!(83));
        assert_eq!(score_to_confidence(dec!(500)), dec!(95));
        assert_eq!(score_to_confidence(dec!(-20)), dec!(10));
    }

    #[test]
    fn test_confidence_table_is_monotonic() {
        let mut prev = Decimal::ZERO;
        for s in 0..200 {
            let c = score_to_confidence(Decimal::from(s));
            assert!(c >= prev);
            assert!(c <= dec!(100));
            prev = c;
        }
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(dec!(4.6), 1), 5);
        assert_eq!(clamp_confidence(dec!(0.2), 1), 1);
        assert_eq!(clamp_confidence(dec!(250), 0), 100);
    }

    #[test]
    fn test_durations_come_from_choice_set() {
        for phase in [MarketPhase::Expansion, MarketPhase::Ranging, MarketPhase::Contraction] {
            for conf in [0u8, 50, 74, 75, 100] {
                assert!(DURATION_CHOICES_MINUTES.contains(&duration_for(conf, phase)));
            }
        }
        assert_eq!(duration_for(90, MarketPhase::Expansion), 2);
        assert_eq!(duration_for(90, MarketPhase::Contraction), 5);
    }

    #[test]
    fn test_build_engine_registry() {
        let config = EngineConfig::default();
        for kind in [
            EngineKind::Scoring,
            EngineKind::Sequence,
            EngineKind::SequenceRelaxed,
            EngineKind::DeepSight,
            EngineKind::Nexus,
        ] {
            assert_eq!(build_engine(kind, &config).kind(), kind);
        }
    }
}
