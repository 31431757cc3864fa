//! Sweep → displacement → CHoCH → retest state machine.
//!
//! The machine advances at most one step per newly closed candle. Each
//! instrument's [`EngineState`] is handed in and the successor handed back;
//! captured zones and breaks are value copies, so re-analysing the same
//! window never disturbs a setup in progress.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use super::{clamp_confidence, duration_for, DecisionEngine, EngineOutput, SignalContext};
use crate::config::SequenceParams;
use crate::constants::{CANDLE_BUCKET_MS, MS_PER_MINUTE};
use crate::core::smc::SmcAnalyzer;
use crate::types::{
    BreakKind, Candle, Direction, EngineKind, EngineState, LiquiditySweep, MarketPhase,
    PriceActionPattern, SequenceStatus, SetupData, Signal, SmcSnapshot, StructureBreak, SwingKind,
    Trend, Zone,
};

/// Fast-path breakouts need at least this breakout quality.
const BREAKOUT_MIN_QUALITY: u8 = 70;

/// What the state machine reads from one closed candle.
#[derive(Debug, Clone)]
pub struct Observation {
    pub candle: Candle,
    pub atr: Decimal,
    pub trend: Trend,
    pub phase: MarketPhase,
    pub sweep: Option<LiquiditySweep>,
    pub latest_break: Option<StructureBreak>,
    /// Direction of accelerating momentum, if any.
    pub velocity: Option<Direction>,
    /// Unmitigated order blocks and fair-value gaps.
    pub zones: Vec<Zone>,
    /// Gap whose middle candle is the one before `candle`.
    pub fresh_gap: Option<Zone>,
    /// Rejection printed by `candle` itself.
    pub rejection: Option<Zone>,
    pub supports: Vec<Decimal>,
    pub resistances: Vec<Decimal>,
    pub in_ote: Option<Direction>,
    pub zone_bias: Option<Direction>,
    pub patterns: Vec<PriceActionPattern>,
}

impl Observation {
    pub fn from_snapshot(snap: &SmcSnapshot, candle: Candle) -> Self {
        let last = snap.candle_count.saturating_sub(1);
        let levels = |side: SwingKind| -> Vec<Decimal> {
            let swings = match side {
                SwingKind::High => &snap.structure.swing_highs,
                SwingKind::Low => &snap.structure.swing_lows,
            };
            swings
                .iter()
                .filter(|s| s.index < last)
                .map(|s| s.price)
                .chain(
                    snap.pools
                        .iter()
                        .filter(|p| p.side == side && p.last_index < last)
                        .map(|p| p.level),
                )
                .collect()
        };

        Self {
            candle,
            atr: snap.atr,
            trend: snap.structure.trend,
            phase: snap.phase,
            sweep: snap.sweep,
            latest_break: snap.structure.structure,
            velocity: snap.velocity.and_then(|v| v.aligned),
            zones: snap
                .order_blocks
                .iter()
                .chain(&snap.fair_value_gaps)
                .filter(|z| !z.mitigated)
                .copied()
                .collect(),
            fresh_gap: snap
                .fair_value_gaps
                .iter()
                .rev()
                .find(|z| z.index + 1 == last)
                .copied(),
            rejection: snap
                .rejection_blocks
                .iter()
                .filter(|z| z.index == last)
                .max_by(|a, b| a.strength.cmp(&b.strength))
                .copied(),
            supports: levels(SwingKind::Low),
            resistances: levels(SwingKind::High),
            in_ote: snap.ote.and_then(|o| {
                [Direction::Buy, Direction::Sell]
                    .into_iter()
                    .find(|&d| o.contains(d))
            }),
            zone_bias: snap.zone_bias(),
            patterns: snap.patterns.clone(),
        }
    }

    fn candle_agrees(&self, direction: Direction) -> bool {
        match direction {
            Direction::Buy => self.candle.is_bullish(),
            Direction::Sell => self.candle.is_bearish(),
        }
    }

    fn pattern_agrees(&self, direction: Direction) -> bool {
        self.patterns.iter().any(|p| p.direction() == Some(direction))
    }
}

/// A firing decision, before it becomes a [`Signal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub direction: Direction,
    pub confidence: u8,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub state: EngineState,
    pub trigger: Option<Trigger>,
}

/// One state-machine step for a newly closed candle.
///
/// On a trigger the returned state is already back at idle with the
/// cooldown marker set from `now`.
pub fn advance(params: &SequenceParams, state: &EngineState, obs: &Observation, now: i64) -> Step {
    let mut next = state.clone();
    next.last_candle_time = Some(obs.candle.open_time);

    if next.in_cooldown(now) {
        return Step {
            state: next.reset(),
            trigger: None,
        };
    }

    let trigger = match (state.status, state.direction, state.setup.clone()) {
        (SequenceStatus::Idle, _, _) => {
            if let Some(sweep) = obs.sweep.filter(|s| !params.pool_sweeps || s.from_pool) {
                next.status = SequenceStatus::LiquiditySwept;
                next.direction = Some(sweep.direction);
                next.candles_in_status = 0;
                next.setup = Some(SetupData {
                    sweep,
                    pre_sweep_trend: obs.trend,
                    displacement_time: None,
                    structure_break: None,
                    poi: None,
                });
            }
            None
        }
        (status, Some(direction), Some(setup)) => step_setup(params, &mut next, status, direction, setup, obs),
        // Non-idle without a setup cannot progress.
        _ => {
            next = next.reset();
            None
        }
    };

    if let Some(trigger) = trigger {
        let mut fired = next.reset();
        fired.cooldown_until = Some(now + i64::from(params.cooldown_minutes) * MS_PER_MINUTE);
        return Step {
            state: fired,
            trigger: Some(trigger),
        };
    }

    if next.status != SequenceStatus::Idle && next.status == state.status {
        next.candles_in_status += 1;
        if next.candles_in_status > params.stall_candles {
            debug!(status = ?state.status, "sequence stalled, resetting");
            next = next.reset();
        }
    }

    Step {
        state: next,
        trigger: None,
    }
}

fn step_setup(
    params: &SequenceParams,
    next: &mut EngineState,
    status: SequenceStatus,
    direction: Direction,
    mut setup: SetupData,
    obs: &Observation,
) -> Option<Trigger> {
    let sweep_time = setup.sweep.time;
    let fresh_zone = |z: &&Zone| z.direction == direction && z.created_at >= sweep_time - CANDLE_BUCKET_MS;

    match status {
        SequenceStatus::LiquiditySwept => {
            if params.hybrid {
                if let Some(poi) = setup.poi {
                    if retests(&poi, direction, &obs.candle)
                        && (obs.pattern_agrees(direction) || obs.candle_agrees(direction))
                    {
                        return Some(hybrid_trigger(direction, &setup.sweep, obs));
                    }
                } else if let Some(zone) = obs.zones.iter().filter(fresh_zone).last() {
                    setup.poi = Some(*zone);
                    next.setup = Some(setup.clone());
                }
            }

            let displaced = obs.candle_agrees(direction)
                && obs.atr > Decimal::ZERO
                && obs.candle.range() >= obs.atr * params.displacement_atr_multiple
                && obs.velocity != Some(direction.opposite());
            if displaced {
                setup.displacement_time = Some(obs.candle.open_time);
                setup.poi = None;
                next.status = SequenceStatus::Displacement;
                next.candles_in_status = 0;
                next.setup = Some(setup);
            }
            None
        }
        SequenceStatus::Displacement => {
            let brk = obs.latest_break.filter(|b| {
                b.direction == direction && b.time >= sweep_time && b.quality >= params.choch_min_quality
            })?;
            let poi = obs.zones.iter().filter(fresh_zone).last().copied()?;
            setup.structure_break = Some(brk);
            setup.poi = Some(poi);
            next.status = SequenceStatus::Choch;
            next.candles_in_status = 0;
            next.setup = Some(setup);
            None
        }
        SequenceStatus::Choch | SequenceStatus::Retest => {
            let poi = setup.poi?;
            if !retests(&poi, direction, &obs.candle) {
                return None;
            }
            next.status = SequenceStatus::Retest;
            Some(sequence_trigger(direction, &setup, &poi, obs))
        }
        SequenceStatus::Idle => None,
    }
}

/// Price trades into the zone and closes on its correct side.
fn retests(zone: &Zone, direction: Direction, candle: &Candle) -> bool {
    zone.overlaps(candle.low, candle.high)
        && match direction {
            Direction::Buy => candle.close >= zone.low,
            Direction::Sell => candle.close <= zone.high,
        }
}

fn sequence_trigger(direction: Direction, setup: &SetupData, poi: &Zone, obs: &Observation) -> Trigger {
    let quality = setup.structure_break.map_or(0, |b| b.quality);
    let mut confidence = dec!(72) + Decimal::from(quality) / dec!(10);
    let mut reasons = vec![
        "liquidity sweep".to_string(),
        "displacement".to_string(),
        format!("CHoCH (BQI {quality})"),
        format!("retest of {:?}", poi.kind),
    ];
    if obs.in_ote == Some(direction) {
        confidence += dec!(5);
        reasons.push("OTE zone".to_string());
    }
    if obs.zone_bias == Some(direction) {
        confidence += dec!(4);
        reasons.push("premium/discount alignment".to_string());
    }
    if setup.pre_sweep_trend.direction() == Some(direction.opposite()) {
        confidence += dec!(3);
        reasons.push("reversal of prior trend".to_string());
    }
    Trigger {
        direction,
        confidence: clamp_confidence(confidence.min(dec!(95)), 1),
        reasons,
    }
}

fn hybrid_trigger(direction: Direction, sweep: &LiquiditySweep, obs: &Observation) -> Trigger {
    let mut confidence = dec!(60) + sweep.wick_fraction * dec!(10);
    let mut reasons = vec!["liquidity sweep".to_string(), "zone retest".to_string()];
    if obs.pattern_agrees(direction) {
        confidence += dec!(5);
        reasons.push("price action confirmation".to_string());
    }
    Trigger {
        direction,
        confidence: clamp_confidence(confidence, 1),
        reasons,
    }
}

/// Momentum breakout, gap-and-go and rejection at support/resistance.
pub fn fast_path(params: &SequenceParams, obs: &Observation) -> Option<Trigger> {
    let candle = &obs.candle;

    if let Some(brk) = obs.latest_break {
        let breakout = brk.kind == BreakKind::Bos
            && brk.time == candle.open_time
            && brk.quality >= BREAKOUT_MIN_QUALITY
            && obs.velocity == Some(brk.direction)
            && obs.atr > Decimal::ZERO
            && candle.range() >= obs.atr * params.displacement_atr_multiple;
        if breakout {
            return Some(Trigger {
                direction: brk.direction,
                confidence: clamp_confidence(dec!(58) + Decimal::from(brk.quality) / dec!(5), 1),
                reasons: vec![format!("momentum breakout (BQI {})", brk.quality)],
            });
        }
    }

    if let Some(gap) = obs.fresh_gap {
        if !gap.mitigated && obs.candle_agrees(gap.direction) && obs.velocity == Some(gap.direction) {
            return Some(Trigger {
                direction: gap.direction,
                confidence: clamp_confidence(dec!(60) + (gap.strength * dec!(2)).min(dec!(10)), 1),
                reasons: vec!["gap and go".to_string()],
            });
        }
    }

    if let Some(rejection) = obs.rejection {
        let held = match rejection.direction {
            Direction::Buy => obs
                .supports
                .iter()
                .any(|&l| candle.low <= l && l <= candle.body_bottom()),
            Direction::Sell => obs
                .resistances
                .iter()
                .any(|&l| candle.high >= l && l >= candle.body_top()),
        };
        if held {
            let side = match rejection.direction {
                Direction::Buy => "support",
                Direction::Sell => "resistance",
            };
            return Some(Trigger {
                direction: rejection.direction,
                confidence: clamp_confidence(dec!(58) + rejection.strength * dec!(20), 1),
                reasons: vec![format!("rejection at {side}")],
            });
        }
    }

    None
}

pub struct SequenceEngine {
    kind: EngineKind,
    analyzer: SmcAnalyzer,
    params: SequenceParams,
}

impl SequenceEngine {
    pub fn new(kind: EngineKind, analyzer: SmcAnalyzer, params: SequenceParams) -> Self {
        Self {
            kind,
            analyzer,
            params,
        }
    }
}

impl DecisionEngine for SequenceEngine {
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
        if candles.len() < self.min_candles() {
            return EngineOutput::unchanged(state);
        }
        let Some(&last) = candles.last() else {
            return EngineOutput::unchanged(state);
        };
        if state.last_candle_time == Some(last.open_time) {
            return EngineOutput::unchanged(state);
        }
        let Some(snap) = self.analyzer.analyze(candles) else {
            return EngineOutput::unchanged(state);
        };

        let obs = Observation::from_snapshot(&snap, last);
        let mut step = advance(&self.params, state, &obs, ctx.now);

        if step.trigger.is_none()
            && self.params.fast_paths
            && step.state.status == SequenceStatus::Idle
            && !step.state.in_cooldown(ctx.now)
        {
            if let Some(trigger) = fast_path(&self.params, &obs) {
                step.state = step.state.reset();
                step.state.cooldown_until =
                    Some(ctx.now + i64::from(self.params.cooldown_minutes) * MS_PER_MINUTE);
                step.trigger = Some(trigger);
            }
        }

        if step.state.status != state.status {
            debug!(instrument, from = ?state.status, to = ?step.state.status, "sequence transition");
        }

        let signal = step.trigger.map(|t| {
            info!(
                instrument,
                direction = %t.direction,
                confidence = t.confidence,
                engine = %self.kind,
                "sequence fired"
            );
            Signal::new(
                instrument,
                t.direction,
                t.confidence,
                duration_for(t.confidence, obs.phase),
                last.close,
                t.reasons,
                ctx.now,
            )
        });

        EngineOutput {
            signal,
            state: step.state,
        }
    }
}
