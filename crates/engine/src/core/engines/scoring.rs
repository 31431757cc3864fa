//! Additive confluence scoring.
//!
//! Both directions collect points from SMC evidence, lose points to
//! penalties and are scaled by context multipliers. The stronger side wins
//! and its score is mapped onto a confidence through the shared table.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::{
    candle_color, clamp_confidence, duration_for, score_to_confidence, DecisionEngine,
    EngineOutput, SignalContext,
};
use crate::config::ScoringParams;
use crate::core::smc::SmcAnalyzer;
use crate::types::{
    BreakKind, Candle, Direction, EngineKind, EngineState, MarketPhase, PriceActionPattern,
    Signal, SmcSnapshot, Trend, ZoneKind,
};

/// Confidence above which an OB + FVG + OTE confluence is required.
const CONFLUENCE_GATE: Decimal = dec!(50);
/// Ceiling for signals that fail the confluence gate.
const UNCONFIRMED_CAP: Decimal = dec!(45);
/// FVG middle candle range, in ATRs, counted as displacement.
const FVG_DISPLACEMENT_ATR: Decimal = dec!(1.5);
/// Range position at or beyond which price sits deep in its zone.
const DEEP_DISCOUNT: Decimal = dec!(0.15);
const DEEP_PREMIUM: Decimal = dec!(0.85);

/// Accumulated evidence for one direction.
#[derive(Debug, Clone, Default)]
pub struct Side {
    pub score: Decimal,
    pub reasons: Vec<String>,
}

impl Side {
    fn add(&mut self, points: i64, reason: &str) {
        self.score += Decimal::from(points);
        if points > 0 {
            self.reasons.push(reason.to_string());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreCard {
    pub buy: Side,
    pub sell: Side,
}

impl ScoreCard {
    pub fn side(&self, direction: Direction) -> &Side {
        match direction {
            Direction::Buy => &self.buy,
            Direction::Sell => &self.sell,
        }
    }

    fn side_mut(&mut self, direction: Direction) -> &mut Side {
        match direction {
            Direction::Buy => &mut self.buy,
            Direction::Sell => &mut self.sell,
        }
    }
}

pub struct ScoringEngine {
    analyzer: SmcAnalyzer,
    params: ScoringParams,
}

impl ScoringEngine {
    pub fn new(analyzer: SmcAnalyzer, params: ScoringParams) -> Self {
        Self { analyzer, params }
    }

    /// Score both directions. `candles` is the series the snapshot was
    /// computed from.
    pub fn score(&self, snap: &SmcSnapshot, candles: &[Candle]) -> ScoreCard {
        let mut card = ScoreCard::default();
        let offset = candles.len().saturating_sub(snap.candle_count);
        let trend_dir = snap.structure.trend.direction();

        let patterns_for = |d: Direction| snap.patterns.iter().filter(move |p| p.direction() == Some(d));
        let conflicting = patterns_for(Direction::Buy).next().is_some()
            && patterns_for(Direction::Sell).next().is_some();
        let toxic = snap.patterns.iter().any(|p| p.is_toxic());

        for d in [Direction::Buy, Direction::Sell] {
            let side = card.side_mut(d);
            let choch = snap.structure.last_choch.filter(|b| b.direction == d);

            // -- Points ------------------------------------------------------
            if choch.is_some() && snap.has_order_block(d) {
                side.add(30, "CHoCH with order block confluence");
            }
            if snap.sweep.is_some_and(|s| s.direction == d) {
                side.add(25, "liquidity sweep");
            }
            if let Some(brk) = snap.structure.structure {
                if brk.kind == BreakKind::Bos && brk.direction == d && trend_dir == Some(d) {
                    side.add(20, "break of structure with trend");
                }
            }
            let blocks: Vec<_> = snap
                .order_blocks
                .iter()
                .filter(|z| z.direction == d && !z.mitigated)
                .collect();
            if blocks.iter().any(|z| z.contains(snap.price)) {
                side.add(15, "price inside order block");
            } else if !blocks.is_empty() {
                side.add(8, "order block");
            }
            let gaps: Vec<_> = snap
                .fair_value_gaps
                .iter()
                .filter(|z| z.direction == d && !z.mitigated)
                .collect();
            if !gaps.is_empty() {
                side.add(10, "fair value gap");
                let displaced = gaps.iter().any(|z| {
                    candles
                        .get(offset + z.index)
                        .is_some_and(|c| snap.atr > Decimal::ZERO && c.range() >= snap.atr * FVG_DISPLACEMENT_ATR)
                });
                if displaced {
                    side.add(5, "displacement gap");
                }
            }
            let touched = |kind: ZoneKind| {
                snap.touched_blocks
                    .iter()
                    .any(|z| z.kind == kind && z.direction == d && !z.mitigated)
            };
            if touched(ZoneKind::Breaker) {
                side.add(15, "breaker block");
            }
            if touched(ZoneKind::Mitigation) {
                side.add(7, "mitigation block");
            }
            if snap.rejection_blocks.iter().any(|z| z.direction == d && !z.mitigated) {
                side.add(8, "rejection block");
            }
            if snap.inducement.is_some_and(|i| i.direction == d) {
                side.add(8, "inducement");
            }
            if snap.zone_bias() == Some(d) {
                side.add(10, "premium/discount alignment");
            }
            for pattern in patterns_for(d) {
                match pattern {
                    PriceActionPattern::BullishEngulfing | PriceActionPattern::BearishEngulfing => {
                        side.add(10, "engulfing candle")
                    }
                    _ => side.add(8, "pin bar"),
                }
            }
            if trend_dir == Some(d) {
                side.add(10, "trend alignment");
            }
            if snap.velocity.and_then(|v| v.aligned) == Some(d) {
                side.add(8, "accelerating momentum");
            }
            if snap.divergence.is_some_and(|v| v.direction == d) {
                side.add(10, "RSI divergence");
            }

            // -- Penalties ---------------------------------------------------
            if trend_dir == Some(d.opposite()) && choch.is_none() {
                side.add(-15, "counter-trend");
            }
            if snap.structure.trend == Trend::Ranging {
                side.add(-5, "no trend");
            }
            if snap.zone_bias() == Some(d.opposite()) {
                side.add(-10, "wrong premium/discount zone");
            }
            if snap.phase == MarketPhase::Contraction {
                side.add(-10, "low volatility");
            }
            if let Some(ema) = snap.ema_trend {
                let against = match d {
                    Direction::Buy => snap.price < ema,
                    Direction::Sell => snap.price > ema,
                };
                if against {
                    side.add(-10, "against trend EMA");
                }
            }
            if conflicting {
                side.add(-5, "conflicting patterns");
            }
            if toxic {
                side.add(-5, "indecision candle");
            }

            // -- Multipliers -------------------------------------------------
            side.score = side.score.max(Decimal::ZERO);
            let emas_agree = match (snap.ema_fast, snap.ema_slow) {
                (Some(fast), Some(slow)) => match d {
                    Direction::Buy => fast > slow,
                    Direction::Sell => fast < slow,
                },
                _ => false,
            };
            if trend_dir == Some(d) && emas_agree {
                side.score *= dec!(1.2);
            }
            if let Some(range) = snap.range {
                let deep = match d {
                    Direction::Buy => range.position <= DEEP_DISCOUNT,
                    Direction::Sell => range.position >= DEEP_PREMIUM,
                };
                if deep {
                    side.score *= dec!(1.15);
                }
            }
            match snap.phase {
                MarketPhase::Expansion => side.score *= dec!(1.1),
                MarketPhase::Contraction => side.score *= dec!(0.8),
                MarketPhase::Ranging => {}
            }
        }

        card
    }
}

impl DecisionEngine for ScoringEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Scoring
    }

    fn min_candles(&self) -> usize {
        self.params.min_candles.max(self.analyzer.min_candles())
    }

    fn generate_signal(
        &self,
        candles: &[Candle],
        instrument: &str,
        state: &EngineState,
        ctx: &SignalContext,
    ) -> EngineOutput {
        if candles.len() < self.min_candles() {
            return EngineOutput::unchanged(state);
        }
        let (Some(snap), Some(last)) = (self.analyzer.analyze(candles), candles.last()) else {
            return EngineOutput::unchanged(state);
        };

        let card = self.score(&snap, candles);
        let direction = if card.buy.score > card.sell.score {
            Direction::Buy
        } else if card.sell.score > card.buy.score {
            Direction::Sell
        } else {
            candle_color(last)
        };

        let winner = card.side(direction);
        let loser = card.side(direction.opposite());
        let mut confidence = score_to_confidence(winner.score);
        let mut reasons = winner.reasons.clone();

        if (winner.score - loser.score).abs() < self.params.conflict_margin {
            confidence /= Decimal::TWO;
            reasons.push("conflicted read".to_string());
        }
        let confirmed = snap.has_order_block(direction)
            && snap.has_fair_value_gap(direction)
            && snap.ote.is_some_and(|o| o.contains(direction));
        if confidence >= CONFLUENCE_GATE && !confirmed {
            confidence = confidence.min(UNCONFIRMED_CAP);
        }
        let confidence = clamp_confidence(confidence, 1);

        debug!(
            instrument,
            buy = %card.buy.score,
            sell = %card.sell.score,
            %direction,
            confidence,
            "scored instrument"
        );

        let signal = Signal::new(
            instrument,
            direction,
            confidence,
            duration_for(confidence, snap.phase),
            snap.price,
            reasons,
            ctx.now,
        );
        EngineOutput {
            signal: Some(signal),
            state: state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core::smc::test_support::{candles_from_closes, d};

    fn engine() -> ScoringEngine {
        let config = EngineConfig::default();
        ScoringEngine::new(
            SmcAnalyzer::new(config.indicators, config.smc),
            config.scoring,
        )
    }

    fn ctx() -> SignalContext {
        SignalContext {
            now: 1_700_000_000_000,
            expiry_minutes: 3,
        }
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let candles = candles_from_closes(&[1.1; 10]);
        let state = EngineState::default();
        let out = engine().generate_signal(&candles, "EURUSD", &state, &ctx());
        assert!(out.signal.is_none());
        assert_eq!(out.state, state);
    }

    #[test]
    fn test_flat_candles_still_produce_bounded_signal() {
        let candles = candles_from_closes(&[1.1; 100]);
        let out = engine().generate_signal(&candles, "EURUSD", &EngineState::default(), &ctx());
        let signal = out.signal.expect("flat market still yields a signal");
        assert!((1..=100).contains(&signal.confidence));
        // Equal scores fall back to the candle colour; a flat candle is BUY.
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.entry_price, d(1.1));
        assert_eq!(signal.created_at, ctx().now);
    }

    #[test]
    fn test_flat_market_scores_zero_both_sides() {
        let candles = candles_from_closes(&[1.1; 100]);
        let eng = engine();
        let snap = eng.analyzer.analyze(&candles).unwrap();
        let card = eng.score(&snap, &candles);
        assert_eq!(card.buy.score, Decimal::ZERO);
        assert_eq!(card.sell.score, Decimal::ZERO);
    }

    #[test]
    fn test_uptrend_favours_buy() {
        let mut closes = vec![1.1000];
        for i in 0..80 {
            let step = if i % 5 < 3 { 0.0004 } else { -0.0003 };
            closes.push(closes[closes.len() - 1] + step);
        }
        let candles = candles_from_closes(&closes);
        let eng = engine();
        let snap = eng.analyzer.analyze(&candles).unwrap();
        let card = eng.score(&snap, &candles);
        assert!(card.buy.score > card.sell.score);
        assert!(card.buy.reasons.iter().any(|r| r == "trend alignment"));

        let out = eng.generate_signal(&candles, "EURUSD", &EngineState::default(), &ctx());
        let signal = out.signal.unwrap();
        assert_eq!(signal.direction, Direction::Buy);
        assert!((1..=100).contains(&signal.confidence));
    }

    #[test]
    fn test_confidence_bounded_on_random_walks() {
        let eng = engine();
        let mut seed: u64 = 42;
        for _ in 0..10 {
            let mut closes = vec![1.2];
            for _ in 0..120 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let step = ((seed >> 33) % 21) as f64 - 10.0;
                closes.push(closes[closes.len() - 1] + step * 0.0001);
            }
            let candles = candles_from_closes(&closes);
            let out = eng.generate_signal(&candles, "GBPUSD", &EngineState::default(), &ctx());
            let signal = out.signal.unwrap();
            assert!((1..=100).contains(&signal.confidence));
            assert!([2, 3, 5].contains(&signal.expiry_minutes));
        }
    }
}
