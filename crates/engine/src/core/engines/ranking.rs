//! Cross-instrument ranking with self-evaluating reliability.
//!
//! Each instrument gets a weighted score from five components: its shadow
//! win rate, regime-dependent SMC confluence, tick flux, currency
//! correlation and volatility fitness. The best-scoring instrument becomes
//! the signal. Instruments whose shadow trades keep losing are traded
//! against (ghost inversion); Nexus additionally adapts component weights
//! and consults a memory of three-candle patterns.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use super::learning::{self, FractalBias};
use super::{
    candle_color, clamp_confidence, DecisionEngine, EngineOutput, InstrumentView, LearningUpdate,
    SignalContext, SnapshotOutput,
};
use crate::config::RankingParams;
use crate::constants::MS_PER_MINUTE;
use crate::core::indicators::safe_div;
use crate::core::smc::SmcAnalyzer;
use crate::types::{
    Candle, Direction, EngineKind, EngineState, Feature, Regime, ShadowTrade, Signal, SmcSnapshot,
};

/// Candles over which currency strength is measured.
const STRENGTH_WINDOW: usize = 10;
const NEUTRAL: Decimal = dec!(50);
const FULL: Decimal = dec!(100);
const UNFIT_VOLATILITY: Decimal = dec!(20);
const FRACTAL_BOOST: Decimal = dec!(10);
const RSI_OVERSOLD: Decimal = dec!(30);
const RSI_OVERBOUGHT: Decimal = dec!(70);

fn base_weight(feature: Feature) -> Decimal {
    match feature {
        Feature::History => dec!(0.25),
        Feature::Confluence => dec!(0.35),
        Feature::Flux => dec!(0.10),
        Feature::Correlation => dec!(0.15),
        Feature::Volatility => dec!(0.15),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Currency strength
// ═══════════════════════════════════════════════════════════════════════════

/// Split a pair symbol into base and quote from its first six letters.
/// Separators and suffixes such as `_otc` are ignored.
pub fn split_pair(instrument: &str) -> Option<(String, String)> {
    let letters: String = instrument
        .chars()
        .filter(char::is_ascii_alphabetic)
        .take(6)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if letters.len() < 6 {
        return None;
    }
    Some((letters[..3].to_string(), letters[3..].to_string()))
}

/// Mean recent relative move per currency across all instruments.
#[derive(Debug, Clone, Default)]
pub struct CurrencyStrength {
    strength: BTreeMap<String, Decimal>,
}

impl CurrencyStrength {
    pub fn measure(views: &[InstrumentView<'_>]) -> Self {
        let mut sums: BTreeMap<String, (Decimal, u32)> = BTreeMap::new();
        for view in views {
            let Some((base, quote)) = split_pair(view.instrument) else {
                continue;
            };
            let n = view.candles.len();
            if n <= STRENGTH_WINDOW {
                continue;
            }
            let (then, now) = (view.candles[n - 1 - STRENGTH_WINDOW].close, view.candles[n - 1].close);
            let change = safe_div(now - then, then);

            let entry = sums.entry(base).or_default();
            entry.0 += change;
            entry.1 += 1;
            let entry = sums.entry(quote).or_default();
            entry.0 -= change;
            entry.1 += 1;
        }
        Self {
            strength: sums
                .into_iter()
                .map(|(ccy, (sum, count))| (ccy, sum / Decimal::from(count)))
                .collect(),
        }
    }

    /// Base strength minus quote strength; positive favours BUY.
    pub fn net_bias(&self, instrument: &str) -> Decimal {
        let Some((base, quote)) = split_pair(instrument) else {
            return Decimal::ZERO;
        };
        let get = |c: &str| self.strength.get(c).copied().unwrap_or_default();
        get(&base) - get(&quote)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════

/// Component readings in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components {
    pub history: Decimal,
    pub confluence: Decimal,
    pub flux: Decimal,
    pub correlation: Decimal,
    pub volatility: Decimal,
}

impl Components {
    pub fn get(&self, feature: Feature) -> Decimal {
        match feature {
            Feature::History => self.history,
            Feature::Confluence => self.confluence,
            Feature::Flux => self.flux,
            Feature::Correlation => self.correlation,
            Feature::Volatility => self.volatility,
        }
    }

    /// Components that argue for the trade.
    pub fn supporting(&self) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|&f| self.get(f) >= NEUTRAL)
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Evaluation {
    direction: Direction,
    score: Decimal,
    bias: Decimal,
    reasons: Vec<String>,
    inverted: bool,
    entry: Decimal,
}

pub struct RankingEngine {
    kind: EngineKind,
    analyzer: SmcAnalyzer,
    params: RankingParams,
}

impl RankingEngine {
    pub fn new(kind: EngineKind, analyzer: SmcAnalyzer, params: RankingParams) -> Self {
        Self {
            kind,
            analyzer,
            params,
        }
    }

    pub fn params(&self) -> &RankingParams {
        &self.params
    }

    /// Model direction before any learning override, with the rule that
    /// decided it.
    pub fn raw_direction(snap: &SmcSnapshot, last: &Candle) -> (Direction, &'static str) {
        let trend = snap.structure.trend.direction();
        let zone = snap.zone_bias();
        if let (Some(t), Some(z)) = (trend, zone) {
            if t == z {
                return (t, "trend and zone agree");
            }
        }
        if let Some(v) = snap.velocity.and_then(|v| v.aligned) {
            return (v, "momentum");
        }
        if let Some(z) = zone {
            return (z, "premium/discount zone");
        }
        if let Some(t) = trend {
            return (t, "trend");
        }
        (candle_color(last), "candle colour")
    }

    pub fn confluence(snap: &SmcSnapshot, direction: Direction) -> Decimal {
        let trend_aligned = snap.structure.trend.direction() == Some(direction);
        let break_aligned = snap
            .structure
            .structure
            .is_some_and(|b| b.direction == direction);
        let zone_aligned = snap.zone_bias() == Some(direction);
        let swept = snap.sweep.is_some_and(|s| s.direction == direction);
        let rejected = snap
            .rejection_blocks
            .iter()
            .any(|z| z.direction == direction && !z.mitigated);

        let mut points = Decimal::ZERO;
        let mut add = |cond: bool, pts: Decimal| {
            if cond {
                points += pts;
            }
        };
        match snap.regime {
            Regime::Trending => {
                add(trend_aligned, dec!(40));
                add(break_aligned, dec!(30));
                add(zone_aligned, dec!(30));
            }
            Regime::MeanReverting => {
                let stretched = snap.rsi.is_some_and(|r| match direction {
                    Direction::Buy => r < RSI_OVERSOLD,
                    Direction::Sell => r > RSI_OVERBOUGHT,
                });
                add(zone_aligned, dec!(40));
                add(swept || rejected, dec!(30));
                add(stretched, dec!(30));
            }
            Regime::Contraction => {
                add(true, dec!(20));
                add(swept, dec!(30));
            }
        }
        points.min(FULL)
    }

    pub fn components(
        &self,
        snap: &SmcSnapshot,
        state: &EngineState,
        direction: Direction,
        flux: Decimal,
        bias: Decimal,
    ) -> Components {
        let p = &self.params;
        let history = state
            .reliability
            .win_rate()
            .map_or(NEUTRAL, |rate| rate * FULL);
        let flux = (safe_div(flux, p.flux_reference) * FULL).min(FULL);
        let aligned_bias = bias * direction.sign();
        let correlation = NEUTRAL
            + NEUTRAL * safe_div(aligned_bias, p.bias_reference).clamp(-Decimal::ONE, Decimal::ONE);
        let relative_atr = safe_div(snap.atr, snap.price);
        let volatility = if relative_atr >= p.volatility_floor && relative_atr <= p.volatility_ceiling {
            FULL
        } else {
            UNFIT_VOLATILITY
        };

        Components {
            history,
            confluence: Self::confluence(snap, direction),
            flux,
            correlation,
            volatility,
        }
    }

    /// Weighted mean of the components. Weights are the base weights scaled
    /// by learned synapses when adaptation is on.
    pub fn weighted_score(&self, components: &Components, state: &EngineState) -> Decimal {
        let mut total = Decimal::ZERO;
        let mut weights = Decimal::ZERO;
        for feature in Feature::ALL {
            let synapse = if self.params.adaptive_weights {
                state.reliability.synapse(feature)
            } else {
                Decimal::ONE
            };
            let w = base_weight(feature) * synapse;
            total += w * components.get(feature);
            weights += w;
        }
        safe_div(total, weights)
    }

    fn evaluate(
        &self,
        view: &InstrumentView<'_>,
        strength: &CurrencyStrength,
        ctx: &SignalContext,
    ) -> Option<(Evaluation, EngineState)> {
        if view.candles.len() < self.min_candles() {
            return None;
        }
        let last = *view.candles.last()?;
        let snap = self.analyzer.analyze(view.candles)?;
        let mut state = view.state.clone();

        let (raw, rule) = Self::raw_direction(&snap, &last);
        let bias = strength.net_bias(view.instrument);
        let components = self.components(&snap, &state, raw, view.flux, bias);
        let mut score = self.weighted_score(&components, &state);
        let pattern = learning::candle_pattern(view.candles);

        let mut direction = raw;
        let mut inverted = false;
        let mut reasons = vec![rule.to_string(), format!("score {}", score.round_dp(1))];

        if learning::should_invert(&state.reliability, &self.params) {
            direction = raw.opposite();
            inverted = true;
            let rate = state.reliability.win_rate().unwrap_or_default() * FULL;
            warn!(
                instrument = view.instrument,
                win_rate = %rate.round_dp(1),
                samples = state.reliability.samples(),
                "ghost inversion: trading against the model"
            );
            reasons.push(format!("ghost inversion (shadow win rate {}%)", rate.round_dp(0)));
        } else {
            match learning::fractal_bias(&state.reliability, &self.params, &pattern) {
                FractalBias::Boost => {
                    score += FRACTAL_BOOST;
                    reasons.push(format!("fractal {pattern} favourable"));
                }
                FractalBias::Invert => {
                    direction = raw.opposite();
                    inverted = true;
                    reasons.push(format!("fractal {pattern} inverted"));
                }
                FractalBias::Neutral => {}
            }
        }

        // One shadow trade per closed candle, in the raw direction.
        if state.last_candle_time != Some(last.open_time) {
            state.last_candle_time = Some(last.open_time);
            learning::open_shadow(
                &mut state.reliability,
                &self.params,
                ShadowTrade {
                    direction: raw,
                    entry_price: last.close,
                    opened_at: ctx.now,
                    expires_at: ctx.now + i64::from(ctx.expiry_minutes) * MS_PER_MINUTE,
                    features: components.supporting(),
                    pattern,
                },
            );
        }

        debug!(
            instrument = view.instrument,
            %direction,
            score = %score.round_dp(2),
            history = %components.history,
            confluence = %components.confluence,
            flux = %components.flux,
            correlation = %components.correlation,
            volatility = %components.volatility,
            "ranked instrument"
        );

        Some((
            Evaluation {
                direction,
                score,
                bias: bias.abs(),
                reasons,
                inverted,
                entry: last.close,
            },
            state,
        ))
    }
}

impl DecisionEngine for RankingEngine {
    fn kind(&self) -> EngineKind {
        self.kind
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
        let view = InstrumentView {
            instrument,
            candles,
            state,
            flux: Decimal::ZERO,
        };
        let mut out = self.process_snapshot(std::slice::from_ref(&view), ctx);
        EngineOutput {
            signal: out.signal,
            state: out
                .states
                .pop()
                .map_or_else(|| state.clone(), |(_, s)| s),
        }
    }

    fn process_snapshot(&self, views: &[InstrumentView<'_>], ctx: &SignalContext) -> SnapshotOutput {
        let strength = CurrencyStrength::measure(views);
        let mut out = SnapshotOutput::default();
        let mut best: Option<(Evaluation, &str)> = None;

        for view in views {
            let Some((eval, state)) = self.evaluate(view, &strength, ctx) else {
                out.states.push((view.instrument.to_string(), view.state.clone()));
                continue;
            };
            out.states.push((view.instrument.to_string(), state));

            let better = best.as_ref().map_or(true, |(b, _)| {
                eval.score > b.score || (eval.score == b.score && eval.bias > b.bias)
            });
            if better {
                best = Some((eval, view.instrument));
            }
        }

        out.signal = best.map(|(eval, instrument)| {
            let confidence = clamp_confidence(eval.score, 1);
            let mut signal = Signal::new(
                instrument,
                eval.direction,
                confidence,
                ctx.expiry_minutes,
                eval.entry,
                eval.reasons,
                ctx.now,
            );
            signal.inverted = eval.inverted;
            signal
        });
        out
    }

    fn sync_learning(&self, state: &EngineState, price: Decimal, now: i64) -> Option<LearningUpdate> {
        if !state.reliability.pending.iter().any(|t| t.expires_at <= now) {
            return None;
        }
        let mut next = state.clone();
        let resolved = learning::resolve_due(&mut next.reliability, &self.params, price, now);
        Some(LearningUpdate {
            state: next,
            resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core::smc::test_support::candles_from_closes;
    use crate::types::ShadowOutcome;

    const NOW: i64 = 1_700_000_000_000;

    fn engine(kind: EngineKind) -> RankingEngine {
        let config = EngineConfig::default();
        let params = match kind {
            EngineKind::Nexus => config.ranking.nexus,
            _ => config.ranking.deep_sight,
        };
        RankingEngine::new(kind, SmcAnalyzer::new(config.indicators, config.smc), params)
    }

    fn ctx() -> SignalContext {
        SignalContext {
            now: NOW,
            expiry_minutes: 3,
        }
    }

    fn uptrend() -> Vec<Candle> {
        let mut closes = vec![1.1000];
        for i in 0..80 {
            let step = if i % 5 < 3 { 0.0004 } else { -0.0003 };
            closes.push(closes[closes.len() - 1] + step);
        }
        candles_from_closes(&closes)
    }

    fn losing_state(samples: usize) -> EngineState {
        let mut state = EngineState::default();
        for _ in 0..samples {
            state.reliability.outcomes.push_back(ShadowOutcome {
                direction: Direction::Buy,
                win: false,
                pattern: "UUU".into(),
                resolved_at: 0,
            });
        }
        state
    }

    // -- Pair symbols -------------------------------------------------------

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("EURUSD"), Some(("EUR".into(), "USD".into())));
        assert_eq!(split_pair("eur/usd_otc"), Some(("EUR".into(), "USD".into())));
        assert_eq!(split_pair("GBPJPY-OTC"), Some(("GBP".into(), "JPY".into())));
        assert_eq!(split_pair("BTC"), None);
    }

    #[test]
    fn test_currency_strength_from_moves() {
        let up = uptrend();
        let flat = candles_from_closes(&[1.3; 81]);
        let state = EngineState::default();
        let views = [
            InstrumentView {
                instrument: "EURUSD",
                candles: &up,
                state: &state,
                flux: Decimal::ZERO,
            },
            InstrumentView {
                instrument: "GBPJPY",
                candles: &flat,
                state: &state,
                flux: Decimal::ZERO,
            },
        ];
        let strength = CurrencyStrength::measure(&views);
        assert!(strength.net_bias("EURUSD") > Decimal::ZERO);
        assert!(strength.net_bias("USDCHF") < Decimal::ZERO);
        assert_eq!(strength.net_bias("GBPJPY"), Decimal::ZERO);
    }

    // -- Scoring ------------------------------------------------------------

    #[test]
    fn test_weights_normalise() {
        let eng = engine(EngineKind::Nexus);
        let all = Components {
            history: dec!(80),
            confluence: dec!(80),
            flux: dec!(80),
            correlation: dec!(80),
            volatility: dec!(80),
        };
        let mut state = EngineState::default();
        state.reliability.synapses.insert(Feature::Flux, dec!(2));
        state.reliability.synapses.insert(Feature::History, dec!(0.5));
        assert_eq!(eng.weighted_score(&all, &state), dec!(80));
    }

    #[test]
    fn test_raw_direction_follows_uptrend() {
        let eng = engine(EngineKind::DeepSight);
        let candles = uptrend();
        let snap = eng.analyzer.analyze(&candles).unwrap();
        let (dir, _) = RankingEngine::raw_direction(&snap, candles.last().unwrap());
        // The staircase ends on a pullback candle: either momentum or the
        // trend decides, never a coin flip.
        assert!(matches!(dir, Direction::Buy | Direction::Sell));
        let components = eng.components(&snap, &EngineState::default(), Direction::Buy, dec!(120), Decimal::ZERO);
        assert_eq!(components.history, dec!(50));
        assert_eq!(components.flux, dec!(100));
        assert_eq!(components.correlation, dec!(50));
    }

    // -- Learning overrides -------------------------------------------------

    #[test]
    fn test_ghost_inversion_flips_direction() {
        let eng = engine(EngineKind::DeepSight);
        let candles = uptrend();
        let fresh = eng.generate_signal(&candles, "EURUSD", &EngineState::default(), &ctx());
        let baseline = fresh.signal.unwrap();
        assert!(!baseline.inverted);

        let state = losing_state(eng.params().inversion_min_samples);
        let out = eng.generate_signal(&candles, "EURUSD", &state, &ctx());
        let flipped = out.signal.unwrap();
        assert!(flipped.inverted);
        assert_eq!(flipped.direction, baseline.direction.opposite());
        assert!(flipped.reasons.iter().any(|r| r.starts_with("ghost inversion")));
    }

    #[test]
    fn test_too_few_samples_never_invert() {
        let eng = engine(EngineKind::DeepSight);
        let state = losing_state(eng.params().inversion_min_samples - 1);
        let out = eng.generate_signal(&uptrend(), "EURUSD", &state, &ctx());
        assert!(!out.signal.unwrap().inverted);
    }

    #[test]
    fn test_shadow_opened_once_per_candle_and_resolved() {
        let eng = engine(EngineKind::Nexus);
        let candles = uptrend();
        let first = eng.generate_signal(&candles, "EURUSD", &EngineState::default(), &ctx());
        assert_eq!(first.state.reliability.pending.len(), 1);

        let again = eng.generate_signal(&candles, "EURUSD", &first.state, &ctx());
        assert_eq!(again.state.reliability.pending.len(), 1);

        assert!(eng.sync_learning(&again.state, dec!(1.2), NOW).is_none());
        let update = eng
            .sync_learning(&again.state, dec!(1.2), NOW + 3 * MS_PER_MINUTE)
            .expect("shadow due");
        assert_eq!(update.resolved.len(), 1);
        assert!(update.state.reliability.pending.is_empty());
        assert_eq!(update.state.reliability.samples(), 1);
    }

    #[test]
    fn test_snapshot_picks_highest_score() {
        let eng = engine(EngineKind::DeepSight);
        let up = uptrend();
        let state = EngineState::default();
        let views = [
            InstrumentView {
                instrument: "EURUSD",
                candles: &up,
                state: &state,
                flux: dec!(0),
            },
            InstrumentView {
                instrument: "AUDCAD",
                candles: &up,
                state: &state,
                flux: dec!(60),
            },
        ];
        let out = eng.process_snapshot(&views, &ctx());
        assert_eq!(out.states.len(), 2);
        let signal = out.signal.unwrap();
        assert_eq!(signal.instrument, "AUDCAD");
        assert!((1..=100).contains(&signal.confidence));
        assert_eq!(signal.expiry_minutes, 3);
    }

    #[test]
    fn test_insufficient_history_keeps_state() {
        let eng = engine(EngineKind::Nexus);
        let candles = candles_from_closes(&[1.1; 5]);
        let state = losing_state(3);
        let out = eng.generate_signal(&candles, "EURUSD", &state, &ctx());
        assert!(out.signal.is_none());
        assert_eq!(out.state, state);
    }
}
